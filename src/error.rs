//! Error type shared by every pipeline stage.

use std::fmt;
use std::path::PathBuf;

/// Pipeline stage, used to tag inference failures and cancellations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Tokenize,
    PredictDuration,
    EncodeText,
    InitLatent,
    Denoise,
    Vocode,
    Assemble,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Tokenize => "tokenize",
            Stage::PredictDuration => "duration_predictor",
            Stage::EncodeText => "text_encoder",
            Stage::InitLatent => "init_latent",
            Stage::Denoise => "vector_estimator",
            Stage::Vocode => "vocoder",
            Stage::Assemble => "assemble",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Synthesis error types
#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("empty batch: at least one text is required")]
    EmptyBatch,

    #[error("number of texts ({texts}) must match number of style vectors ({styles})")]
    StyleBatchMismatch { texts: usize, styles: usize },

    #[error("invalid length {0}: lengths must be non-negative")]
    InvalidLength(i64),

    #[error("{stage} inference failed: {source}")]
    InferenceFailure {
        stage: Stage,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("asset not found: {}", .0.display())]
    AssetMissing(PathBuf),

    #[error("malformed asset{}: {reason}", path_suffix(.path))]
    AssetMalformed {
        path: Option<PathBuf>,
        reason: String,
    },

    #[error("invalid synthesis option: {0}")]
    InvalidOption(String),

    #[error("synthesis cancelled before {stage}")]
    Cancelled { stage: Stage },

    #[error("inference engine is unavailable (lock poisoned)")]
    EngineUnavailable,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV encoding error: {0}")]
    Wav(#[from] hound::Error),
}

fn path_suffix(path: &Option<PathBuf>) -> String {
    match path {
        Some(p) => format!(" {}", p.display()),
        None => String::new(),
    }
}

impl SynthesisError {
    /// Wraps an engine-side error for the given stage.
    pub fn inference<E>(stage: Stage, err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        SynthesisError::InferenceFailure {
            stage,
            source: err.into(),
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        SynthesisError::AssetMalformed {
            path: None,
            reason: reason.into(),
        }
    }

    /// Attaches a file path to an `AssetMalformed` error that has none yet.
    pub fn with_path(self, p: impl Into<PathBuf>) -> Self {
        match self {
            SynthesisError::AssetMalformed { path: None, reason } => {
                SynthesisError::AssetMalformed {
                    path: Some(p.into()),
                    reason,
                }
            }
            other => other,
        }
    }
}

/// Result type for the synthesis pipeline
pub type Result<T> = std::result::Result<T, SynthesisError>;
