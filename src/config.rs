// ============================================================================
// Configuration Structures
// ============================================================================

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::{Result, SynthesisError};

/// File name of the model configuration inside the ONNX directory.
pub const CONFIG_FILE: &str = "tts.json";

/// Model configuration as shipped in `tts.json`. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub ae: AeConfig,
    pub ttl: TtlConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AeConfig {
    pub sample_rate: u32,
    pub base_chunk_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtlConfig {
    pub chunk_compress_factor: u32,
    pub latent_dim: u32,
}

impl Config {
    /// Rejects configurations that would produce empty or zero-sized latents.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("ae.sample_rate", self.ae.sample_rate),
            ("ae.base_chunk_size", self.ae.base_chunk_size),
            ("ttl.chunk_compress_factor", self.ttl.chunk_compress_factor),
            ("ttl.latent_dim", self.ttl.latent_dim),
        ];
        for (name, value) in fields {
            if value == 0 {
                return Err(SynthesisError::malformed(format!("{name} must be > 0")));
            }
        }
        Ok(())
    }

    pub fn sample_rate(&self) -> u32 {
        self.ae.sample_rate
    }

    /// Waveform samples represented by one latent frame.
    pub fn chunk_size(&self) -> usize {
        self.ae.base_chunk_size as usize * self.ttl.chunk_compress_factor as usize
    }

    /// Channel count of the compressed latent.
    pub fn latent_channels(&self) -> usize {
        self.ttl.latent_dim as usize * self.ttl.chunk_compress_factor as usize
    }
}

/// Parse and validate a configuration from raw JSON bytes
pub fn parse_cfgs(bytes: &[u8]) -> Result<Config> {
    let cfgs: Config = serde_json::from_slice(bytes)
        .map_err(|e| SynthesisError::malformed(format!("invalid config: {e}")))?;
    cfgs.validate()?;
    Ok(cfgs)
}

/// Load configuration from `tts.json` inside the ONNX directory
pub fn load_cfgs<P: AsRef<Path>>(onnx_dir: P) -> Result<Config> {
    let cfg_path = onnx_dir.as_ref().join(CONFIG_FILE);
    if !cfg_path.exists() {
        return Err(SynthesisError::AssetMissing(cfg_path));
    }
    let reader = BufReader::new(File::open(&cfg_path)?);
    let cfgs: Config = serde_json::from_reader(reader).map_err(|e| {
        SynthesisError::malformed(format!("invalid config: {e}")).with_path(&cfg_path)
    })?;
    cfgs.validate().map_err(|e| e.with_path(&cfg_path))?;
    Ok(cfgs)
}

// ============================================================================
// Per-call Options
// ============================================================================

/// Knobs for a single synthesis call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SynthesisOptions {
    /// Number of denoising steps.
    pub total_step: usize,
    /// Speech rate; predicted durations are divided by this.
    pub speed: f32,
    /// Seconds of silence appended after the vocoder output.
    pub silence_duration: f32,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            total_step: 5,
            speed: 1.05,
            silence_duration: 0.3,
        }
    }
}

impl SynthesisOptions {
    pub fn validate(&self) -> Result<()> {
        if self.total_step == 0 {
            return Err(SynthesisError::InvalidOption(
                "total_step must be at least 1".to_string(),
            ));
        }
        if !self.speed.is_finite() || self.speed <= 0.0 {
            return Err(SynthesisError::InvalidOption(format!(
                "speed must be a positive number, got {}",
                self.speed
            )));
        }
        if !self.silence_duration.is_finite() || self.silence_duration < 0.0 {
            return Err(SynthesisError::InvalidOption(format!(
                "silence_duration must be >= 0, got {}",
                self.silence_duration
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTS_JSON: &str = r#"{
        "ae": {"sample_rate": 44100, "base_chunk_size": 512, "n_fft": 2048},
        "ttl": {"chunk_compress_factor": 6, "latent_dim": 24},
        "tts_version": "v1"
    }"#;

    #[test]
    fn parses_shipped_config_and_ignores_extra_fields() {
        let cfgs = parse_cfgs(TTS_JSON.as_bytes()).unwrap();
        assert_eq!(cfgs.sample_rate(), 44100);
        assert_eq!(cfgs.chunk_size(), 3072);
        assert_eq!(cfgs.latent_channels(), 144);
    }

    #[test]
    fn zero_field_is_malformed() {
        let json = TTS_JSON.replace("\"latent_dim\": 24", "\"latent_dim\": 0");
        let err = parse_cfgs(json.as_bytes()).unwrap_err();
        assert!(matches!(err, SynthesisError::AssetMalformed { .. }));
        assert!(err.to_string().contains("ttl.latent_dim"));
    }

    #[test]
    fn negative_field_is_malformed() {
        let json = TTS_JSON.replace("44100", "-1");
        assert!(matches!(
            parse_cfgs(json.as_bytes()),
            Err(SynthesisError::AssetMalformed { .. })
        ));
    }

    #[test]
    fn missing_config_file() {
        let dir = tempfile::tempdir().unwrap();
        match load_cfgs(dir.path()) {
            Err(SynthesisError::AssetMissing(path)) => assert!(path.ends_with(CONFIG_FILE)),
            other => panic!("expected AssetMissing, got {other:?}"),
        }
    }

    #[test]
    fn option_defaults_and_validation() {
        let opts = SynthesisOptions::default();
        assert_eq!(opts.total_step, 5);
        assert_eq!(opts.speed, 1.05);
        assert_eq!(opts.silence_duration, 0.3);
        assert!(opts.validate().is_ok());

        for bad in [
            SynthesisOptions { total_step: 0, ..opts },
            SynthesisOptions { speed: 0.0, ..opts },
            SynthesisOptions { speed: f32::NAN, ..opts },
            SynthesisOptions { silence_duration: -0.1, ..opts },
        ] {
            assert!(matches!(bad.validate(), Err(SynthesisError::InvalidOption(_))));
        }
    }
}
