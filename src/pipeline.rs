//! Synthesis orchestration: tokenize, predict duration, encode text, sample
//! the initial latent, denoise, vocode and append the silence tail.

use ndarray::Array1;
use rand::Rng;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::config::{Config, SynthesisOptions};
use crate::engine::{InferenceEngine, VectorEstimatorInputs};
use crate::error::{Result, Stage, SynthesisError};
use crate::latent::sample_noisy_latent;
use crate::style::Style;
use crate::text::{chunk_text, UnicodeProcessor};

// ============================================================================
// Observability
// ============================================================================

/// Hook invoked at every stage boundary of a synthesis call.
///
/// `is_cancelled` is polled before each stage starts. A running inference
/// call is never interrupted, and the denoising loop runs to completion once
/// it has started.
pub trait StageObserver {
    fn stage_started(&mut self, _stage: Stage) {}

    fn stage_finished(&mut self, _stage: Stage, _elapsed: Duration) {}

    fn denoise_step(&mut self, _step: usize, _total_step: usize) {}

    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Default observer: stage timings through the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl StageObserver for LogObserver {
    fn stage_started(&mut self, stage: Stage) {
        log::debug!("{stage}...");
    }

    fn stage_finished(&mut self, stage: Stage, elapsed: Duration) {
        log::debug!("  -> {stage} completed in {:.2} sec", elapsed.as_secs_f64());
    }

    fn denoise_step(&mut self, step: usize, total_step: usize) {
        log::trace!("denoising step {}/{}", step + 1, total_step);
    }
}

fn timed<T>(
    observer: &mut dyn StageObserver,
    stage: Stage,
    f: impl FnOnce(&mut dyn StageObserver) -> Result<T>,
) -> Result<T> {
    if observer.is_cancelled() {
        return Err(SynthesisError::Cancelled { stage });
    }
    observer.stage_started(stage);
    let start = Instant::now();
    let result = f(observer)?;
    observer.stage_finished(stage, start.elapsed());
    Ok(result)
}

/// Upper bound (seconds, after speed scaling) on a predicted duration. Longer
/// predictions are treated as a duration predictor failure.
pub const MAX_PREDICTED_DURATION: f32 = 600.0;

// ============================================================================
// Waveform Assembly
// ============================================================================

/// Number of samples in `seconds` of audio, rounded down.
pub fn samples_for(seconds: f32, sample_rate: u32) -> usize {
    (seconds as f64 * sample_rate as f64).max(0.0) as usize
}

/// Appends `silence_duration` seconds of zeros; returns the samples added.
pub fn append_silence(wav: &mut Vec<f32>, silence_duration: f32, sample_rate: u32) -> usize {
    let silence_len = samples_for(silence_duration, sample_rate);
    wav.resize(wav.len() + silence_len, 0.0);
    silence_len
}

/// Output of one synthesis call.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisResult {
    /// Vocoder output followed by the silence tail.
    pub wav: Vec<f32>,
    /// Speed-adjusted predicted duration (seconds) per batch item, without
    /// the silence tail.
    pub duration: Vec<f32>,
    pub sample_rate: u32,
    /// Source text; batch texts are joined by newlines.
    pub text: String,
    /// Length of the silence tail at the end of `wav`.
    pub silence_samples: usize,
}

impl SynthesisResult {
    /// Length of `wav` in seconds.
    pub fn audio_seconds(&self) -> f32 {
        self.wav.len() as f32 / self.sample_rate as f32
    }

    /// Single-item waveform cut to the predicted speech length, keeping the
    /// silence tail. The vocoder pads to whole latent frames, so the raw
    /// output is usually a little longer than the predicted duration.
    pub fn trimmed(&self) -> Vec<f32> {
        let vocoded = self.wav.len().saturating_sub(self.silence_samples);
        let speech = self
            .duration
            .first()
            .map_or(vocoded, |&d| samples_for(d, self.sample_rate).min(vocoded));
        let mut out = Vec::with_capacity(speech + self.silence_samples);
        out.extend_from_slice(&self.wav[..speech]);
        out.extend_from_slice(&self.wav[vocoded..]);
        out
    }

    /// Splits a batch result into one waveform per item. The vocoder output
    /// is divided into equal per-item segments, each trimmed to its
    /// predicted duration and followed by the silence tail.
    pub fn split_batch(&self) -> Vec<Vec<f32>> {
        let bsz = self.duration.len().max(1);
        let vocoded = self.wav.len().saturating_sub(self.silence_samples);
        if vocoded % bsz != 0 {
            log::warn!("vocoder output ({vocoded}) does not divide into {bsz} items");
            return vec![self.wav.clone()];
        }
        let segment = vocoded / bsz;
        let tail = &self.wav[vocoded..];
        self.wav[..vocoded]
            .chunks(segment.max(1))
            .zip(&self.duration)
            .map(|(speech, &d)| {
                let keep = samples_for(d, self.sample_rate).min(speech.len());
                let mut item = Vec::with_capacity(keep + tail.len());
                item.extend_from_slice(&speech[..keep]);
                item.extend_from_slice(tail);
                item
            })
            .collect()
    }
}

// ============================================================================
// Text To Speech
// ============================================================================

/// Drives the inference stages for a loaded model set.
///
/// The engine sits behind a mutex, so one `TextToSpeech` can serve several
/// threads; each call owns its latent state and only the individual stage
/// invocations are serialized.
pub struct TextToSpeech<E> {
    cfgs: Config,
    text_processor: UnicodeProcessor,
    engine: Mutex<E>,
    pub sample_rate: u32,
}

impl<E: InferenceEngine> TextToSpeech<E> {
    pub fn new(cfgs: Config, text_processor: UnicodeProcessor, engine: E) -> Self {
        let sample_rate = cfgs.sample_rate();
        TextToSpeech {
            cfgs,
            text_processor,
            engine: Mutex::new(engine),
            sample_rate,
        }
    }

    pub fn config(&self) -> &Config {
        &self.cfgs
    }

    /// Releases the engine (and with it every model session).
    pub fn into_engine(self) -> Result<E> {
        self.engine
            .into_inner()
            .map_err(|_| SynthesisError::EngineUnavailable)
    }

    fn engine(&self) -> Result<MutexGuard<'_, E>> {
        self.engine
            .lock()
            .map_err(|_| SynthesisError::EngineUnavailable)
    }

    /// Runs the full pipeline for a batch of texts.
    ///
    /// `style` must hold one style per text. Noise comes from `rng`, stage
    /// boundaries are reported to `observer`.
    pub fn infer<R: Rng + ?Sized>(
        &self,
        text_list: &[String],
        style: &Style,
        opts: &SynthesisOptions,
        rng: &mut R,
        observer: &mut dyn StageObserver,
    ) -> Result<SynthesisResult> {
        opts.validate()?;
        let bsz = text_list.len();
        if bsz == 0 {
            return Err(SynthesisError::EmptyBatch);
        }
        if bsz != style.batch_size() {
            return Err(SynthesisError::StyleBatchMismatch {
                texts: bsz,
                styles: style.batch_size(),
            });
        }

        let tokens = timed(observer, Stage::Tokenize, |_| self.text_processor.call(text_list))?;
        log::debug!(
            "tokenized {} text(s), padded length {}",
            tokens.batch_size(),
            tokens.max_len()
        );

        let duration = timed(observer, Stage::PredictDuration, |_| {
            let mut duration =
                self.engine()?
                    .predict_duration(&tokens.ids, &style.dp, &tokens.mask)?;
            if duration.len() != bsz {
                return Err(SynthesisError::inference(
                    Stage::PredictDuration,
                    format!("expected {bsz} durations, got {}", duration.len()),
                ));
            }
            duration.mapv_inplace(|d| d / opts.speed);
            if let Some(bad) = duration
                .iter()
                .find(|d| !d.is_finite() || **d > MAX_PREDICTED_DURATION)
            {
                return Err(SynthesisError::inference(
                    Stage::PredictDuration,
                    format!(
                        "predicted duration {bad} s is non-finite or above {MAX_PREDICTED_DURATION} s"
                    ),
                ));
            }
            if duration.iter().any(|&d| d <= 0.0) {
                log::warn!("non-positive predicted duration: {duration:?}");
            }
            Ok(duration.to_vec())
        })?;

        let text_emb = timed(observer, Stage::EncodeText, |_| {
            self.engine()?
                .encode_text(&tokens.ids, &style.ttl, &tokens.mask)
        })?;

        let mut latent = timed(observer, Stage::InitLatent, |_| {
            sample_noisy_latent(&duration, &self.cfgs, rng)
        })?;
        log::debug!("latent length {} frames", latent.latent_len());

        timed(observer, Stage::Denoise, |observer| {
            let total_step = Array1::from_elem(bsz, opts.total_step as f32);
            for step in 0..opts.total_step {
                observer.denoise_step(step, opts.total_step);
                let current_step = Array1::from_elem(bsz, step as f32);
                let denoised = self.engine()?.estimate_vector(VectorEstimatorInputs {
                    noisy_latent: &latent.values,
                    text_emb: &text_emb,
                    style_ttl: &style.ttl,
                    text_mask: &tokens.mask,
                    latent_mask: &latent.mask,
                    total_step: &total_step,
                    current_step: &current_step,
                })?;
                latent.update(&denoised)?;
            }
            Ok(())
        })?;

        let mut wav = timed(observer, Stage::Vocode, |_| {
            self.engine()?.vocode(&latent.values)
        })?;

        let silence_samples = timed(observer, Stage::Assemble, |_| {
            Ok(append_silence(&mut wav, opts.silence_duration, self.sample_rate))
        })?;

        Ok(SynthesisResult {
            wav,
            duration,
            sample_rate: self.sample_rate,
            text: text_list.join("\n"),
            silence_samples,
        })
    }

    /// Synthesizes one text with a single-item style.
    pub fn call(
        &self,
        text: &str,
        style: &Style,
        opts: &SynthesisOptions,
    ) -> Result<SynthesisResult> {
        self.infer(
            &[text.to_string()],
            style,
            opts,
            &mut rand::thread_rng(),
            &mut LogObserver,
        )
    }

    /// Synthesizes several texts in one pass; `style` holds one style per text.
    pub fn batch(
        &self,
        text_list: &[String],
        style: &Style,
        opts: &SynthesisOptions,
    ) -> Result<SynthesisResult> {
        self.infer(text_list, style, opts, &mut rand::thread_rng(), &mut LogObserver)
    }

    /// Long-form synthesis: the text is chunked, each chunk is synthesized and
    /// trimmed to its predicted duration, and chunks are joined with
    /// `silence_duration` of silence. The result ends with the same tail.
    pub fn call_long<R: Rng + ?Sized>(
        &self,
        text: &str,
        style: &Style,
        opts: &SynthesisOptions,
        rng: &mut R,
        observer: &mut dyn StageObserver,
    ) -> Result<SynthesisResult> {
        opts.validate()?;
        let chunks = chunk_text(text, None);
        if chunks.is_empty() {
            return Err(SynthesisError::EmptyBatch);
        }
        log::info!("Synthesizing {} chunk(s)", chunks.len());

        let chunk_opts = SynthesisOptions {
            silence_duration: 0.0,
            ..*opts
        };
        let mut wav_cat = Vec::new();
        let mut dur_cat = Vec::with_capacity(chunks.len());

        for (i, chunk) in chunks.iter().enumerate() {
            if i > 0 {
                append_silence(&mut wav_cat, opts.silence_duration, self.sample_rate);
            }
            let result = self.infer(&[chunk.clone()], style, &chunk_opts, rng, observer)?;
            wav_cat.extend(result.trimmed());
            dur_cat.extend(result.duration);
        }
        let silence_samples = append_silence(&mut wav_cat, opts.silence_duration, self.sample_rate);

        Ok(SynthesisResult {
            wav: wav_cat,
            duration: dur_cat,
            sample_rate: self.sample_rate,
            text: text.to_string(),
            silence_samples,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_is_floor_of_seconds_times_rate() {
        let mut wav = vec![0.5; 3];
        assert_eq!(append_silence(&mut wav, 0.3, 44100), 13230);
        assert_eq!(wav.len(), 13233);
        assert!(wav[3..].iter().all(|&v| v == 0.0));
        assert_eq!(append_silence(&mut wav, 0.0, 44100), 0);
    }

    #[test]
    fn trimmed_keeps_speech_and_tail() {
        let result = SynthesisResult {
            wav: vec![1.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0],
            duration: vec![0.3],
            sample_rate: 10,
            text: "x".to_string(),
            silence_samples: 2,
        };
        assert_eq!(result.trimmed(), vec![1.0, 1.0, 1.0, 0.0, 0.0]);
        assert!((result.audio_seconds() - 0.7).abs() < 1e-6);
    }

    #[test]
    fn trimmed_never_extends_past_vocoder_output() {
        let result = SynthesisResult {
            wav: vec![1.0, 1.0],
            duration: vec![5.0],
            sample_rate: 10,
            text: String::new(),
            silence_samples: 0,
        };
        assert_eq!(result.trimmed(), vec![1.0, 1.0]);
    }

    #[test]
    fn split_batch_cuts_equal_segments() {
        let result = SynthesisResult {
            wav: vec![1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 0.0],
            duration: vec![0.2, 0.3],
            sample_rate: 10,
            text: "a\nb".to_string(),
            silence_samples: 1,
        };
        assert_eq!(
            result.split_batch(),
            vec![vec![1.0, 1.0, 0.0], vec![2.0, 2.0, 2.0, 0.0]]
        );
    }

    #[derive(Default)]
    struct Cancelling(usize);

    impl StageObserver for Cancelling {
        fn stage_started(&mut self, _stage: Stage) {
            self.0 += 1;
        }

        fn is_cancelled(&self) -> bool {
            self.0 >= 2
        }
    }

    #[test]
    fn cancellation_is_checked_before_stage() {
        let mut observer = Cancelling::default();
        timed(&mut observer, Stage::Tokenize, |_| Ok(())).unwrap();
        timed(&mut observer, Stage::PredictDuration, |_| Ok(())).unwrap();
        let err = timed(&mut observer, Stage::EncodeText, |_| Ok(())).unwrap_err();
        assert!(matches!(err, SynthesisError::Cancelled { stage: Stage::EncodeText }));
    }
}
