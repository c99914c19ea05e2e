//! Initial noisy latent for the denoising loop.

use ndarray::{Array3, Zip};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::config::Config;
use crate::error::{Result, Stage, SynthesisError};
use crate::mask::length_to_mask;

/// Latent tensor refined by the vector estimator, plus its validity mask.
#[derive(Debug, Clone)]
pub struct LatentState {
    /// `(batch, latent_channels, latent_len)`.
    pub values: Array3<f32>,
    /// `(batch, 1, latent_len)`.
    pub mask: Array3<f32>,
}

impl LatentState {
    pub fn batch_size(&self) -> usize {
        self.values.shape()[0]
    }

    pub fn latent_len(&self) -> usize {
        self.values.shape()[2]
    }

    /// Overwrites the latent with a refined estimate of the same shape,
    /// reusing the existing allocation.
    pub fn update(&mut self, denoised: &Array3<f32>) -> Result<()> {
        if denoised.shape() != self.values.shape() {
            return Err(SynthesisError::inference(
                Stage::Denoise,
                format!(
                    "denoised latent shape {:?} does not match {:?}",
                    denoised.shape(),
                    self.values.shape()
                ),
            ));
        }
        self.values.assign(denoised);
        Ok(())
    }
}

/// Latent grid geometry for a batch of durations (seconds).
#[derive(Debug, Clone, PartialEq)]
pub struct LatentGeometry {
    /// Padded latent length shared by the batch.
    pub latent_len: usize,
    /// Per-item latent length before padding.
    pub latent_lengths: Vec<i64>,
    pub latent_channels: usize,
}

impl LatentGeometry {
    pub fn new(duration: &[f32], cfgs: &Config) -> Result<Self> {
        if duration.is_empty() {
            return Err(SynthesisError::EmptyBatch);
        }
        if let Some(bad) = duration.iter().find(|d| !d.is_finite()) {
            return Err(SynthesisError::InvalidOption(format!(
                "duration must be finite, got {bad}"
            )));
        }

        let sample_rate = cfgs.sample_rate() as f64;
        let chunk_size = cfgs.chunk_size() as f64;

        let max_dur = duration.iter().copied().fold(f32::NEG_INFINITY, f32::max) as f64;
        let wav_len_max = (max_dur * sample_rate).max(0.0);
        let latent_len = (wav_len_max / chunk_size).ceil() as usize;

        let latent_lengths = duration
            .iter()
            .map(|&d| {
                let wav_len = (d as f64 * sample_rate).floor().max(0.0);
                (wav_len / chunk_size).ceil() as i64
            })
            .collect();

        Ok(Self {
            latent_len,
            latent_lengths,
            latent_channels: cfgs.latent_channels(),
        })
    }
}

/// Samples standard-normal noise for the latent grid implied by `duration`
/// and zeroes every frame past each item's own length.
pub fn sample_noisy_latent<R: Rng + ?Sized>(
    duration: &[f32],
    cfgs: &Config,
    rng: &mut R,
) -> Result<LatentState> {
    let geometry = LatentGeometry::new(duration, cfgs)?;
    let bsz = duration.len();

    let latent_mask = length_to_mask(&geometry.latent_lengths, Some(geometry.latent_len))?;

    let mut noisy_latent = Array3::from_shape_simple_fn(
        (bsz, geometry.latent_channels, geometry.latent_len),
        || rng.sample::<f32, _>(StandardNormal),
    );

    // The mask has a single channel; broadcast it over all latent channels.
    Zip::from(&mut noisy_latent)
        .and_broadcast(&latent_mask)
        .for_each(|v, &m| {
            if m == 0.0 {
                *v = 0.0;
            }
        });

    Ok(LatentState {
        values: noisy_latent,
        mask: latent_mask,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AeConfig, TtlConfig};
    use ndarray::s;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn small_config() -> Config {
        Config {
            ae: AeConfig {
                sample_rate: 100,
                base_chunk_size: 4,
            },
            ttl: TtlConfig {
                chunk_compress_factor: 2,
                latent_dim: 3,
            },
        }
    }

    #[test]
    fn geometry_follows_chunk_size() {
        let geometry = LatentGeometry::new(&[1.0, 0.3], &small_config()).unwrap();
        // chunk = 8 samples; 100 samples -> 13 frames, 30 samples -> 4 frames.
        assert_eq!(geometry.latent_len, 13);
        assert_eq!(geometry.latent_lengths, vec![13, 4]);
        assert_eq!(geometry.latent_channels, 6);
    }

    #[test]
    fn shipped_config_geometry() {
        let cfgs = Config {
            ae: AeConfig {
                sample_rate: 44100,
                base_chunk_size: 512,
            },
            ttl: TtlConfig {
                chunk_compress_factor: 6,
                latent_dim: 24,
            },
        };
        let geometry = LatentGeometry::new(&[1.0, 0.5], &cfgs).unwrap();
        assert_eq!(geometry.latent_len, 15);
        assert_eq!(geometry.latent_lengths, vec![15, 8]);
        assert_eq!(geometry.latent_channels, 144);
    }

    #[test]
    fn noise_is_zero_outside_mask() {
        let mut rng = StdRng::seed_from_u64(7);
        let latent = sample_noisy_latent(&[1.0, 0.3, 0.05], &small_config(), &mut rng).unwrap();
        assert_eq!(latent.values.shape(), &[3, 6, 13]);
        assert_eq!(latent.mask.shape(), &[3, 1, 13]);

        for b in 0..3 {
            for t in 0..13 {
                let column = latent.values.slice(s![b, .., t]);
                if latent.mask[[b, 0, t]] == 0.0 {
                    assert!(column.iter().all(|&v| v == 0.0), "b={b} t={t}");
                } else {
                    assert!(column.iter().any(|&v| v != 0.0), "b={b} t={t}");
                }
            }
        }
    }

    #[test]
    fn noise_is_standard_normal() {
        let mut rng = StdRng::seed_from_u64(42);
        let cfgs = small_config();
        let latent = sample_noisy_latent(&[40.0], &cfgs, &mut rng).unwrap();
        let n = latent.values.len() as f64;
        let mean = latent.values.iter().map(|&v| v as f64).sum::<f64>() / n;
        let var = latent.values.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
        assert!(n > 2000.0);
        assert!(mean.abs() < 0.1, "mean {mean}");
        assert!((var - 1.0).abs() < 0.15, "variance {var}");
    }

    #[test]
    fn same_seed_same_noise() {
        let cfgs = small_config();
        let a = sample_noisy_latent(&[0.7], &cfgs, &mut StdRng::seed_from_u64(3)).unwrap();
        let b = sample_noisy_latent(&[0.7], &cfgs, &mut StdRng::seed_from_u64(3)).unwrap();
        assert_eq!(a.values, b.values);
    }

    #[test]
    fn empty_and_non_finite_durations_fail() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            sample_noisy_latent(&[], &small_config(), &mut rng),
            Err(SynthesisError::EmptyBatch)
        ));
        assert!(matches!(
            sample_noisy_latent(&[f32::NAN], &small_config(), &mut rng),
            Err(SynthesisError::InvalidOption(_))
        ));
    }

    #[test]
    fn negative_duration_in_batch_gets_empty_row() {
        let mut rng = StdRng::seed_from_u64(4);
        let latent = sample_noisy_latent(&[0.5, -0.1], &small_config(), &mut rng).unwrap();
        // 50 samples -> 7 frames; the negative item keeps a zero-length row.
        assert_eq!(latent.latent_len(), 7);
        assert_eq!(latent.batch_size(), 2);
        assert!(latent.mask.slice(s![1, 0, ..]).iter().all(|&m| m == 0.0));
        assert!(latent.values.slice(s![1, .., ..]).iter().all(|&v| v == 0.0));
        assert!(latent.mask.slice(s![0, 0, ..]).iter().all(|&m| m == 1.0));

        let geometry = LatentGeometry::new(&[0.5, -0.1], &small_config()).unwrap();
        assert_eq!(geometry.latent_lengths, vec![7, 0]);
    }

    #[test]
    fn zero_duration_gives_empty_grid() {
        let mut rng = StdRng::seed_from_u64(0);
        let latent = sample_noisy_latent(&[0.0], &small_config(), &mut rng).unwrap();
        assert_eq!(latent.values.shape(), &[1, 6, 0]);
    }

    #[test]
    fn update_rejects_shape_change() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut latent = sample_noisy_latent(&[0.2], &small_config(), &mut rng).unwrap();
        let same = Array3::<f32>::ones(latent.values.raw_dim());
        latent.update(&same).unwrap();
        assert!(latent.values.iter().all(|&v| v == 1.0));
        assert!(matches!(
            latent.update(&Array3::zeros((1, 6, 1))),
            Err(SynthesisError::InferenceFailure { stage: Stage::Denoise, .. })
        ));
    }
}
