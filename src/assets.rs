//! Model asset layout, presence checks and loading.
//!
//! A models root looks like:
//!
//! ```text
//! <root>/onnx/tts.json
//! <root>/onnx/unicode_indexer.json
//! <root>/onnx/{duration_predictor,text_encoder,vector_estimator,vocoder}.onnx
//! <root>/voice_styles/{M1..M5,F1..F5}.json
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{load_cfgs, parse_cfgs, CONFIG_FILE};
use crate::error::{Result, SynthesisError};
use crate::onnx::{
    OnnxEngine, DURATION_PREDICTOR_FILE, TEXT_ENCODER_FILE, VECTOR_ESTIMATOR_FILE, VOCODER_FILE,
};
use crate::pipeline::TextToSpeech;
use crate::style::{VoicePreset, VOICE_STYLES_DIR};
use crate::text::{UnicodeProcessor, UNICODE_INDEXER_FILE};

pub const ONNX_DIR: &str = "onnx";

/// Files required in the ONNX directory, in load order.
pub const MODEL_FILES: [&str; 6] = [
    CONFIG_FILE,
    UNICODE_INDEXER_FILE,
    DURATION_PREDICTOR_FILE,
    TEXT_ENCODER_FILE,
    VECTOR_ESTIMATOR_FILE,
    VOCODER_FILE,
];

// ============================================================================
// Model Status
// ============================================================================

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ModelStatus {
    pub downloaded: bool,
    pub models_dir: String,
    /// Paths relative to `models_dir`, `/`-separated.
    pub missing_files: Vec<String>,
    pub total_files: usize,
    pub downloaded_files: usize,
}

/// Checks which model and voice style files exist under a models root.
pub fn check_models<P: AsRef<Path>>(models_dir: P) -> ModelStatus {
    let models_dir = models_dir.as_ref();
    let mut expected: Vec<String> = MODEL_FILES
        .iter()
        .map(|file| format!("{ONNX_DIR}/{file}"))
        .collect();
    expected.extend(
        VoicePreset::ALL
            .iter()
            .map(|preset| format!("{VOICE_STYLES_DIR}/{}.json", preset.id())),
    );

    let total_files = expected.len();
    let missing_files: Vec<String> = expected
        .into_iter()
        .filter(|file| !models_dir.join(file).exists())
        .collect();

    ModelStatus {
        downloaded: missing_files.is_empty(),
        models_dir: models_dir.to_string_lossy().to_string(),
        downloaded_files: total_files - missing_files.len(),
        missing_files,
        total_files,
    }
}

/// First required file absent from `onnx_dir`, if any.
pub fn first_missing_model_file(onnx_dir: &Path) -> Option<PathBuf> {
    MODEL_FILES
        .iter()
        .map(|file| onnx_dir.join(file))
        .find(|path| !path.exists())
}

// ============================================================================
// Loading
// ============================================================================

/// Loads the config, tokenizer table and the four sessions from `onnx_dir`.
///
/// Every required file is checked before any session is opened.
pub fn load_text_to_speech<P: AsRef<Path>>(onnx_dir: P) -> Result<TextToSpeech<OnnxEngine>> {
    let onnx_dir = onnx_dir.as_ref();
    if let Some(missing) = first_missing_model_file(onnx_dir) {
        return Err(SynthesisError::AssetMissing(missing));
    }

    log::info!("Loading TTS models with ONNX Runtime (CPU inference)...");
    let cfgs = load_cfgs(onnx_dir)?;
    let text_processor = UnicodeProcessor::new(onnx_dir.join(UNICODE_INDEXER_FILE))?;
    let engine = OnnxEngine::from_dir(onnx_dir)?;
    log::info!("All models loaded successfully!");

    Ok(TextToSpeech::new(cfgs, text_processor, engine))
}

/// Model data held in memory, for hosts that ship assets as resources.
#[derive(Clone)]
pub struct ModelBytes {
    pub config: Vec<u8>,
    pub unicode_indexer: Vec<u8>,
    pub duration_predictor: Vec<u8>,
    pub text_encoder: Vec<u8>,
    pub vector_estimator: Vec<u8>,
    pub vocoder: Vec<u8>,
}

impl ModelBytes {
    /// Reads every required file from `onnx_dir`.
    pub fn read_dir<P: AsRef<Path>>(onnx_dir: P) -> Result<Self> {
        let onnx_dir = onnx_dir.as_ref();
        if let Some(missing) = first_missing_model_file(onnx_dir) {
            return Err(SynthesisError::AssetMissing(missing));
        }
        let read = |file: &str| fs::read(onnx_dir.join(file));
        Ok(ModelBytes {
            config: read(CONFIG_FILE)?,
            unicode_indexer: read(UNICODE_INDEXER_FILE)?,
            duration_predictor: read(DURATION_PREDICTOR_FILE)?,
            text_encoder: read(TEXT_ENCODER_FILE)?,
            vector_estimator: read(VECTOR_ESTIMATOR_FILE)?,
            vocoder: read(VOCODER_FILE)?,
        })
    }
}

impl std::fmt::Debug for ModelBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelBytes")
            .field("config", &self.config.len())
            .field("unicode_indexer", &self.unicode_indexer.len())
            .field("duration_predictor", &self.duration_predictor.len())
            .field("text_encoder", &self.text_encoder.len())
            .field("vector_estimator", &self.vector_estimator.len())
            .field("vocoder", &self.vocoder.len())
            .finish()
    }
}

pub fn load_text_to_speech_from_bytes(model_bytes: &ModelBytes) -> Result<TextToSpeech<OnnxEngine>> {
    log::info!("Loading TTS models from bytes...");
    let cfgs = parse_cfgs(&model_bytes.config)?;
    let text_processor = UnicodeProcessor::from_bytes(&model_bytes.unicode_indexer)?;
    let engine = OnnxEngine::from_memory(
        &model_bytes.duration_predictor,
        &model_bytes.text_encoder,
        &model_bytes.vector_estimator,
        &model_bytes.vocoder,
    )?;
    log::info!("All models loaded successfully!");

    Ok(TextToSpeech::new(cfgs, text_processor, engine))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG_JSON: &str = r#"{
        "ae": {"sample_rate": 44100, "base_chunk_size": 512},
        "ttl": {"chunk_compress_factor": 6, "latent_dim": 24}
    }"#;

    #[test]
    fn empty_root_reports_everything_missing() {
        let dir = tempfile::tempdir().unwrap();
        let status = check_models(dir.path());
        assert!(!status.downloaded);
        assert_eq!(status.total_files, 16);
        assert_eq!(status.downloaded_files, 0);
        assert_eq!(status.missing_files[0], "onnx/tts.json");
        assert_eq!(status.missing_files[15], "voice_styles/F5.json");
    }

    #[test]
    fn counts_present_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("onnx")).unwrap();
        fs::create_dir_all(dir.path().join("voice_styles")).unwrap();
        fs::write(dir.path().join("onnx/tts.json"), CONFIG_JSON).unwrap();
        fs::write(dir.path().join("voice_styles/M3.json"), "{}").unwrap();

        let status = check_models(dir.path());
        assert_eq!(status.downloaded_files, 2);
        assert_eq!(status.missing_files.len(), 14);
        assert!(!status.missing_files.contains(&"voice_styles/M3.json".to_string()));
    }

    #[test]
    fn missing_session_file_fails_before_loading() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), CONFIG_JSON).unwrap();
        fs::write(dir.path().join(UNICODE_INDEXER_FILE), "[0, 1, 2]").unwrap();

        match load_text_to_speech(dir.path()) {
            Err(SynthesisError::AssetMissing(path)) => {
                assert_eq!(path, dir.path().join(DURATION_PREDICTOR_FILE));
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("loading should fail"),
        }
        assert!(matches!(
            ModelBytes::read_dir(dir.path()),
            Err(SynthesisError::AssetMissing(_))
        ));
    }
}
