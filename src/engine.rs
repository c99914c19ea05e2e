//! Inference seam between the pipeline and the four model stages.
//!
//! The pipeline only relies on the tensor contracts below; [`crate::onnx::OnnxEngine`]
//! implements them on ONNX Runtime and tests implement them with stubs.

use ndarray::{Array1, Array2, Array3, ArrayD};

use crate::error::Result;

/// Inputs of one denoising step.
#[derive(Debug, Clone, Copy)]
pub struct VectorEstimatorInputs<'a> {
    /// `(batch, latent_channels, latent_len)`
    pub noisy_latent: &'a Array3<f32>,
    /// Text encoder output, passed through untouched.
    pub text_emb: &'a ArrayD<f32>,
    pub style_ttl: &'a ArrayD<f32>,
    /// `(batch, 1, text_len)`
    pub text_mask: &'a Array3<f32>,
    /// `(batch, 1, latent_len)`
    pub latent_mask: &'a Array3<f32>,
    /// `(batch,)`, every entry equal to the step count.
    pub total_step: &'a Array1<f32>,
    /// `(batch,)`, every entry equal to the zero-based step index.
    pub current_step: &'a Array1<f32>,
}

/// The four model stages of the Supertonic pipeline.
///
/// Stages take `&mut self` because runtime sessions are not assumed to be
/// reentrant; the pipeline serializes access to one engine instance.
pub trait InferenceEngine: Send {
    /// Predicts one duration (seconds) per batch item.
    fn predict_duration(
        &mut self,
        text_ids: &Array2<i64>,
        style_dp: &ArrayD<f32>,
        text_mask: &Array3<f32>,
    ) -> Result<Array1<f32>>;

    /// Encodes text into the embedding consumed by the vector estimator.
    fn encode_text(
        &mut self,
        text_ids: &Array2<i64>,
        style_ttl: &ArrayD<f32>,
        text_mask: &Array3<f32>,
    ) -> Result<ArrayD<f32>>;

    /// Runs one denoising step; the output has the shape of `noisy_latent`.
    fn estimate_vector(&mut self, inputs: VectorEstimatorInputs<'_>) -> Result<Array3<f32>>;

    /// Decodes the final latent into waveform samples, batch items
    /// concatenated in batch order.
    fn vocode(&mut self, latent: &Array3<f32>) -> Result<Vec<f32>>;
}

impl<E: InferenceEngine + ?Sized> InferenceEngine for Box<E> {
    fn predict_duration(
        &mut self,
        text_ids: &Array2<i64>,
        style_dp: &ArrayD<f32>,
        text_mask: &Array3<f32>,
    ) -> Result<Array1<f32>> {
        (**self).predict_duration(text_ids, style_dp, text_mask)
    }

    fn encode_text(
        &mut self,
        text_ids: &Array2<i64>,
        style_ttl: &ArrayD<f32>,
        text_mask: &Array3<f32>,
    ) -> Result<ArrayD<f32>> {
        (**self).encode_text(text_ids, style_ttl, text_mask)
    }

    fn estimate_vector(&mut self, inputs: VectorEstimatorInputs<'_>) -> Result<Array3<f32>> {
        (**self).estimate_vector(inputs)
    }

    fn vocode(&mut self, latent: &Array3<f32>) -> Result<Vec<f32>> {
        (**self).vocode(latent)
    }
}
