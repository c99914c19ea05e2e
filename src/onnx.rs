// ============================================================================
// ONNX Runtime Integration via ort crate
// ============================================================================

use ndarray::{Array, Array1, Array2, Array3, ArrayD, Dimension, Ix3, IxDyn};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::{DynValue, Tensor};
use std::path::Path;

use crate::engine::{InferenceEngine, VectorEstimatorInputs};
use crate::error::{Result, Stage, SynthesisError};
use crate::tensor::{dims_from_i64, to_shape_and_data};

pub const DURATION_PREDICTOR_FILE: &str = "duration_predictor.onnx";
pub const TEXT_ENCODER_FILE: &str = "text_encoder.onnx";
pub const VECTOR_ESTIMATOR_FILE: &str = "vector_estimator.onnx";
pub const VOCODER_FILE: &str = "vocoder.onnx";

/// The four Supertonic sessions. Dropping the engine releases them.
pub struct OnnxEngine {
    dp_model: Session,
    text_enc_model: Session,
    vector_est_model: Session,
    vocoder_model: Session,
}

fn session_builder() -> ort::Result<ort::session::builder::SessionBuilder> {
    Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)
}

fn open_session(path: &Path) -> Result<Session> {
    if !path.exists() {
        return Err(SynthesisError::AssetMissing(path.to_path_buf()));
    }
    session_builder()
        .and_then(|builder| builder.commit_from_file(path))
        .map_err(|e| {
            SynthesisError::malformed(format!("failed to open ONNX session: {e}")).with_path(path)
        })
}

fn open_session_from_memory(name: &str, bytes: &[u8]) -> Result<Session> {
    session_builder()
        .and_then(|builder| builder.commit_from_memory(bytes))
        .map_err(|e| SynthesisError::malformed(format!("failed to open {name} session: {e}")))
}

impl OnnxEngine {
    /// Opens the four sessions from an ONNX directory.
    pub fn from_dir<P: AsRef<Path>>(onnx_dir: P) -> Result<Self> {
        let onnx_dir = onnx_dir.as_ref();

        log::info!("Loading duration predictor...");
        let dp_model = open_session(&onnx_dir.join(DURATION_PREDICTOR_FILE))?;
        log::info!("Loading text encoder...");
        let text_enc_model = open_session(&onnx_dir.join(TEXT_ENCODER_FILE))?;
        log::info!("Loading vector estimator...");
        let vector_est_model = open_session(&onnx_dir.join(VECTOR_ESTIMATOR_FILE))?;
        log::info!("Loading vocoder...");
        let vocoder_model = open_session(&onnx_dir.join(VOCODER_FILE))?;

        Ok(Self {
            dp_model,
            text_enc_model,
            vector_est_model,
            vocoder_model,
        })
    }

    /// Opens the four sessions from in-memory model files.
    pub fn from_memory(
        duration_predictor: &[u8],
        text_encoder: &[u8],
        vector_estimator: &[u8],
        vocoder: &[u8],
    ) -> Result<Self> {
        log::info!("Loading ONNX sessions from memory...");
        Ok(Self {
            dp_model: open_session_from_memory("duration predictor", duration_predictor)?,
            text_enc_model: open_session_from_memory("text encoder", text_encoder)?,
            vector_est_model: open_session_from_memory("vector estimator", vector_estimator)?,
            vocoder_model: open_session_from_memory("vocoder", vocoder)?,
        })
    }
}

fn f32_tensor<D: Dimension>(stage: Stage, array: &Array<f32, D>) -> Result<Tensor<f32>> {
    let (shape, data) = to_shape_and_data(array);
    Tensor::from_array((shape, data)).map_err(|e| SynthesisError::inference(stage, e))
}

fn i64_tensor(stage: Stage, array: &Array2<i64>) -> Result<Tensor<i64>> {
    let (shape, data) = to_shape_and_data(array);
    Tensor::from_array((shape, data)).map_err(|e| SynthesisError::inference(stage, e))
}

/// Copies an output value into an owned dynamic-rank array.
fn extract_f32(stage: Stage, value: &DynValue) -> Result<ArrayD<f32>> {
    let (shape, data) = value
        .try_extract_tensor::<f32>()
        .map_err(|e| SynthesisError::inference(stage, e))?;
    let dims = dims_from_i64(&shape[..]).map_err(|e| SynthesisError::inference(stage, e))?;
    ArrayD::from_shape_vec(IxDyn(&dims), data.to_vec())
        .map_err(|e| SynthesisError::inference(stage, e))
}

impl InferenceEngine for OnnxEngine {
    fn predict_duration(
        &mut self,
        text_ids: &Array2<i64>,
        style_dp: &ArrayD<f32>,
        text_mask: &Array3<f32>,
    ) -> Result<Array1<f32>> {
        let stage = Stage::PredictDuration;
        let outputs = self
            .dp_model
            .run(ort::inputs! {
                "text_ids" => i64_tensor(stage, text_ids)?,
                "style_dp" => f32_tensor(stage, style_dp)?,
                "text_mask" => f32_tensor(stage, text_mask)?
            })
            .map_err(|e| SynthesisError::inference(stage, e))?;
        let duration = extract_f32(stage, &outputs[0])?;
        Ok(Array1::from_iter(duration.iter().copied()))
    }

    fn encode_text(
        &mut self,
        text_ids: &Array2<i64>,
        style_ttl: &ArrayD<f32>,
        text_mask: &Array3<f32>,
    ) -> Result<ArrayD<f32>> {
        let stage = Stage::EncodeText;
        let outputs = self
            .text_enc_model
            .run(ort::inputs! {
                "text_ids" => i64_tensor(stage, text_ids)?,
                "style_ttl" => f32_tensor(stage, style_ttl)?,
                "text_mask" => f32_tensor(stage, text_mask)?
            })
            .map_err(|e| SynthesisError::inference(stage, e))?;
        extract_f32(stage, &outputs[0])
    }

    fn estimate_vector(&mut self, inputs: VectorEstimatorInputs<'_>) -> Result<Array3<f32>> {
        let stage = Stage::Denoise;
        let outputs = self
            .vector_est_model
            .run(ort::inputs! {
                "noisy_latent" => f32_tensor(stage, inputs.noisy_latent)?,
                "text_emb" => f32_tensor(stage, inputs.text_emb)?,
                "style_ttl" => f32_tensor(stage, inputs.style_ttl)?,
                "text_mask" => f32_tensor(stage, inputs.text_mask)?,
                "latent_mask" => f32_tensor(stage, inputs.latent_mask)?,
                "total_step" => f32_tensor(stage, inputs.total_step)?,
                "current_step" => f32_tensor(stage, inputs.current_step)?
            })
            .map_err(|e| SynthesisError::inference(stage, e))?;
        extract_f32(stage, &outputs[0])?
            .into_dimensionality::<Ix3>()
            .map_err(|e| SynthesisError::inference(stage, e))
    }

    fn vocode(&mut self, latent: &Array3<f32>) -> Result<Vec<f32>> {
        let stage = Stage::Vocode;
        let outputs = self
            .vocoder_model
            .run(ort::inputs! {
                "latent" => f32_tensor(stage, latent)?
            })
            .map_err(|e| SynthesisError::inference(stage, e))?;
        let wav = extract_f32(stage, &outputs[0])?;
        Ok(wav.iter().copied().collect())
    }
}
