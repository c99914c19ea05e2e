//! Supertonic text-to-speech.
//!
//! Text is normalized and tokenized, a duration predictor sizes the output,
//! a flow-matching vector estimator refines Gaussian noise into an acoustic
//! latent over a fixed number of steps, and a vocoder turns that latent into
//! a waveform.
//!
//! ```no_run
//! use supertonic_tts::{load_text_to_speech, write_wav_file, SynthesisOptions, VoicePreset};
//!
//! # fn main() -> supertonic_tts::Result<()> {
//! let tts = load_text_to_speech("assets/onnx")?;
//! let style = VoicePreset::F1.load(std::path::Path::new("assets"))?;
//! let result = tts.call("Hello, world!", &style, &SynthesisOptions::default())?;
//! write_wav_file("hello.wav", &result.trimmed(), tts.sample_rate)?;
//! # Ok(())
//! # }
//! ```

pub mod assets;
pub mod config;
pub mod engine;
pub mod error;
pub mod latent;
pub mod mask;
pub mod onnx;
pub mod pipeline;
pub mod style;
pub mod tensor;
pub mod text;
pub mod wav;

pub use assets::{
    check_models, load_text_to_speech, load_text_to_speech_from_bytes, ModelBytes, ModelStatus,
};
pub use config::{load_cfgs, parse_cfgs, Config, SynthesisOptions};
pub use engine::{InferenceEngine, VectorEstimatorInputs};
pub use error::{Result, Stage, SynthesisError};
pub use latent::{sample_noisy_latent, LatentState};
pub use mask::{get_text_mask, length_to_mask};
pub use onnx::OnnxEngine;
pub use pipeline::{LogObserver, StageObserver, SynthesisResult, TextToSpeech};
pub use style::{load_voice_style, load_voice_style_from_bytes, Style, VoicePreset, VOICE_STYLES_DIR};
pub use text::{chunk_text, preprocess_text, TokenBatch, UnicodeProcessor};
pub use wav::{encode_wav_to_bytes, write_wav_file};
