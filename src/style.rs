// ============================================================================
// Voice Style Data Structure
// ============================================================================

use ndarray::{concatenate, ArrayD, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Result, SynthesisError};
use crate::tensor::{array_from_flat, NestedArray};

/// Directory (next to `onnx/`) holding the voice style JSON files.
pub const VOICE_STYLES_DIR: &str = "voice_styles";

/// On-disk voice style: two named tensors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceStyleData {
    pub style_ttl: StyleComponent,
    pub style_dp: StyleComponent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleComponent {
    pub data: NestedArray,
    pub dims: Vec<usize>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub dtype: Option<String>,
}

impl StyleComponent {
    fn to_array(&self, name: &str) -> Result<ArrayD<f32>> {
        if self.dims.is_empty() {
            return Err(SynthesisError::malformed(format!(
                "{name}: dims must include a batch dimension"
            )));
        }
        let data = self.data.flatten();
        let expected: usize = self.dims.iter().product();
        if data.len() != expected {
            return Err(SynthesisError::malformed(format!(
                "{name}: dims {:?} need {expected} values but data has {}",
                self.dims,
                data.len()
            )));
        }
        array_from_flat(data, &self.dims)
    }
}

/// Style conditioning for one synthesis batch.
///
/// `ttl` feeds the text encoder and vector estimator, `dp` feeds the duration
/// predictor. Axis 0 of both is the batch axis.
#[derive(Debug, Clone, PartialEq)]
pub struct Style {
    pub ttl: ArrayD<f32>,
    pub dp: ArrayD<f32>,
}

impl Style {
    pub fn new(ttl: ArrayD<f32>, dp: ArrayD<f32>) -> Result<Self> {
        if ttl.ndim() == 0 || dp.ndim() == 0 {
            return Err(SynthesisError::malformed(
                "style tensors must have a batch dimension",
            ));
        }
        if ttl.shape()[0] != dp.shape()[0] {
            return Err(SynthesisError::malformed(format!(
                "style_ttl batch ({}) differs from style_dp batch ({})",
                ttl.shape()[0],
                dp.shape()[0]
            )));
        }
        Ok(Style { ttl, dp })
    }

    /// Builds a style from flat buffers, checking `product(shape) == len`.
    pub fn from_parts(
        ttl: Vec<f32>,
        ttl_shape: &[usize],
        dp: Vec<f32>,
        dp_shape: &[usize],
    ) -> Result<Self> {
        Self::new(array_from_flat(ttl, ttl_shape)?, array_from_flat(dp, dp_shape)?)
    }

    pub fn from_voice_style_data(data: &VoiceStyleData) -> Result<Self> {
        Self::new(
            data.style_ttl.to_array("style_ttl")?,
            data.style_dp.to_array("style_dp")?,
        )
    }

    /// Number of batch items this style conditions.
    pub fn batch_size(&self) -> usize {
        self.ttl.shape()[0]
    }

    /// Concatenates styles along the batch axis.
    pub fn stack(styles: &[Style]) -> Result<Style> {
        if styles.is_empty() {
            return Err(SynthesisError::EmptyBatch);
        }
        let ttl_views: Vec<_> = styles.iter().map(|s| s.ttl.view()).collect();
        let dp_views: Vec<_> = styles.iter().map(|s| s.dp.view()).collect();
        let ttl = concatenate(Axis(0), &ttl_views)
            .map_err(|e| SynthesisError::malformed(format!("style_ttl shapes differ: {e}")))?;
        let dp = concatenate(Axis(0), &dp_views)
            .map_err(|e| SynthesisError::malformed(format!("style_dp shapes differ: {e}")))?;
        Self::new(ttl, dp)
    }
}

// ============================================================================
// Loading
// ============================================================================

/// Parses one voice style JSON document.
pub fn load_voice_style_from_bytes(bytes: &[u8]) -> Result<Style> {
    let data: VoiceStyleData = serde_json::from_slice(bytes)
        .map_err(|e| SynthesisError::malformed(format!("invalid voice style: {e}")))?;
    Style::from_voice_style_data(&data)
}

/// Loads one style file per batch item and stacks them in order.
pub fn load_voice_style<P: AsRef<Path>>(voice_style_paths: &[P]) -> Result<Style> {
    let mut styles = Vec::with_capacity(voice_style_paths.len());
    for path in voice_style_paths {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SynthesisError::AssetMissing(path.to_path_buf()));
        }
        let bytes = fs::read(path)?;
        styles.push(load_voice_style_from_bytes(&bytes).map_err(|e| e.with_path(path))?);
    }
    let style = Style::stack(&styles)?;
    log::debug!(
        "Loaded {} voice style(s): ttl {:?}, dp {:?}",
        style.batch_size(),
        style.ttl.shape(),
        style.dp.shape()
    );
    Ok(style)
}

// ============================================================================
// Voice Presets
// ============================================================================

/// Voice styles shipped with the Supertonic model release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoicePreset {
    M1,
    M2,
    M3,
    M4,
    M5,
    F1,
    F2,
    F3,
    F4,
    F5,
}

impl VoicePreset {
    pub const ALL: [VoicePreset; 10] = [
        VoicePreset::M1,
        VoicePreset::M2,
        VoicePreset::M3,
        VoicePreset::M4,
        VoicePreset::M5,
        VoicePreset::F1,
        VoicePreset::F2,
        VoicePreset::F3,
        VoicePreset::F4,
        VoicePreset::F5,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            VoicePreset::M1 => "M1",
            VoicePreset::M2 => "M2",
            VoicePreset::M3 => "M3",
            VoicePreset::M4 => "M4",
            VoicePreset::M5 => "M5",
            VoicePreset::F1 => "F1",
            VoicePreset::F2 => "F2",
            VoicePreset::F3 => "F3",
            VoicePreset::F4 => "F4",
            VoicePreset::F5 => "F5",
        }
    }

    pub fn description(&self) -> String {
        let (kind, n) = self.id().split_at(1);
        match kind {
            "M" => format!("Male Voice {n}"),
            _ => format!("Female Voice {n}"),
        }
    }

    /// Relative path of the preset under the models root.
    pub fn relative_path(&self) -> PathBuf {
        Path::new(VOICE_STYLES_DIR).join(format!("{}.json", self.id()))
    }

    pub fn load(&self, models_dir: &Path) -> Result<Style> {
        load_voice_style(&[models_dir.join(self.relative_path())])
    }
}

impl fmt::Display for VoicePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for VoicePreset {
    type Err = SynthesisError;

    fn from_str(s: &str) -> Result<Self> {
        VoicePreset::ALL
            .into_iter()
            .find(|p| p.id().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| SynthesisError::InvalidOption(format!("unknown voice preset: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STYLE_JSON: &str = r#"{
        "style_ttl": {"data": [[[0.1, 0.2, 0.3], [0.4, 0.5, 0.6]]], "dims": [1, 2, 3], "type": "float32"},
        "style_dp": {"data": [[[1.0, 2.0]]], "dims": [1, 1, 2], "type": "float32"}
    }"#;

    #[test]
    fn loads_style_json() {
        let style = load_voice_style_from_bytes(STYLE_JSON.as_bytes()).unwrap();
        assert_eq!(style.batch_size(), 1);
        assert_eq!(style.ttl.shape(), &[1, 2, 3]);
        assert_eq!(style.dp.shape(), &[1, 1, 2]);
        assert_eq!(style.ttl[[0, 1, 2]], 0.6);
    }

    #[test]
    fn dims_must_match_data_length() {
        let json = STYLE_JSON.replace("\"dims\": [1, 2, 3]", "\"dims\": [1, 2, 4]");
        let err = load_voice_style_from_bytes(json.as_bytes()).unwrap_err();
        assert!(matches!(err, SynthesisError::AssetMalformed { .. }));
        assert!(err.to_string().contains("style_ttl"));
    }

    #[test]
    fn batch_sizes_must_agree() {
        let err = Style::from_parts(vec![0.0; 4], &[2, 2], vec![0.0; 2], &[1, 2]).unwrap_err();
        assert!(err.to_string().contains("batch"));
    }

    #[test]
    fn from_parts_rejects_bad_product() {
        assert!(Style::from_parts(vec![0.0; 5], &[1, 2, 3], vec![0.0; 2], &[1, 2]).is_err());
    }

    #[test]
    fn stacking_concatenates_along_batch() {
        let a = Style::from_parts(vec![1.0; 6], &[1, 2, 3], vec![1.0; 2], &[1, 1, 2]).unwrap();
        let b = Style::from_parts(vec![2.0; 6], &[1, 2, 3], vec![2.0; 2], &[1, 1, 2]).unwrap();
        let stacked = Style::stack(&[a, b]).unwrap();
        assert_eq!(stacked.batch_size(), 2);
        assert_eq!(stacked.ttl.shape(), &[2, 2, 3]);
        assert_eq!(stacked.ttl[[1, 0, 0]], 2.0);
        assert_eq!(stacked.dp[[0, 0, 1]], 1.0);
    }

    #[test]
    fn stacking_mismatched_shapes_fails() {
        let a = Style::from_parts(vec![1.0; 6], &[1, 2, 3], vec![1.0; 2], &[1, 1, 2]).unwrap();
        let b = Style::from_parts(vec![2.0; 4], &[1, 2, 2], vec![2.0; 2], &[1, 1, 2]).unwrap();
        assert!(matches!(
            Style::stack(&[a, b]),
            Err(SynthesisError::AssetMalformed { .. })
        ));
        assert!(matches!(Style::stack(&[]), Err(SynthesisError::EmptyBatch)));
    }

    #[test]
    fn load_from_files_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("M1.json");
        let second = dir.path().join("F1.json");
        fs::write(&first, STYLE_JSON).unwrap();
        fs::write(&second, STYLE_JSON.replace("0.1", "9.5")).unwrap();

        let style = load_voice_style(&[&first, &second]).unwrap();
        assert_eq!(style.batch_size(), 2);
        assert_eq!(style.ttl[[0, 0, 0]], 0.1);
        assert_eq!(style.ttl[[1, 0, 0]], 9.5);

        let missing = dir.path().join("nope.json");
        assert!(matches!(
            load_voice_style(&[missing]),
            Err(SynthesisError::AssetMissing(_))
        ));
    }

    #[test]
    fn presets_parse_and_locate() {
        assert_eq!("f3".parse::<VoicePreset>().unwrap(), VoicePreset::F3);
        assert!("X9".parse::<VoicePreset>().is_err());
        assert_eq!(
            VoicePreset::M2.relative_path(),
            Path::new("voice_styles").join("M2.json")
        );
        assert_eq!(VoicePreset::F5.description(), "Female Voice 5");
    }
}
