use anyhow::{bail, Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use std::time::Instant;

use supertonic_tts::{
    load_text_to_speech, load_voice_style, write_wav_file, LogObserver, Style, SynthesisOptions,
    VoicePreset,
};

#[derive(Parser)]
#[command(name = "supertonic-tts")]
#[command(about = "Supertonic text-to-speech on ONNX Runtime", long_about = None)]
struct Args {
    /// Directory holding tts.json, unicode_indexer.json and the ONNX models
    #[arg(long, default_value = "assets/onnx")]
    onnx_dir: PathBuf,

    /// Voice preset (M1..M5, F1..F5) or path to a voice style JSON; repeat for batches
    #[arg(long = "voice-style", default_value = "M1")]
    voice_style: Vec<String>,

    /// Text to synthesize; repeat for several outputs
    #[arg(long, required = true)]
    text: Vec<String>,

    /// Output WAV path
    #[arg(long, default_value = "output.wav")]
    out: PathBuf,

    /// Number of denoising steps
    #[arg(long, default_value_t = 5)]
    total_step: usize,

    /// Speech rate; larger is faster
    #[arg(long, default_value_t = 1.05)]
    speed: f32,

    /// Silence appended after the speech, in seconds
    #[arg(long, default_value_t = 0.3)]
    silence: f32,

    /// Seed for the initial noise
    #[arg(long)]
    seed: Option<u64>,

    /// Chunk long text and synthesize chunk by chunk
    #[arg(long, conflicts_with = "batch")]
    long: bool,

    /// Synthesize every text in a single batched pass
    #[arg(long)]
    batch: bool,
}

fn resolve_style(voice: &str, onnx_dir: &Path) -> PathBuf {
    match voice.parse::<VoicePreset>() {
        Ok(preset) => {
            let root = onnx_dir.parent().unwrap_or(Path::new("."));
            root.join(preset.relative_path())
        }
        Err(_) => PathBuf::from(voice),
    }
}

fn load_styles(voices: &[String], onnx_dir: &Path, count: usize) -> Result<Style> {
    let mut paths: Vec<PathBuf> = voices.iter().map(|s| resolve_style(s, onnx_dir)).collect();
    if paths.len() == 1 && count > 1 {
        paths = vec![paths[0].clone(); count];
    }
    if paths.len() != count {
        bail!(
            "got {} voice styles for {} texts; pass one style or one per text",
            paths.len(),
            count
        );
    }
    load_voice_style(&paths).context("failed to load voice style")
}

fn numbered_output(out: &Path, index: usize, total: usize) -> PathBuf {
    if total == 1 {
        return out.to_path_buf();
    }
    let stem = out.file_stem().and_then(|s| s.to_str()).unwrap_or("output");
    out.with_file_name(format!("{stem}_{}.wav", index + 1))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let opts = SynthesisOptions {
        total_step: args.total_step,
        speed: args.speed,
        silence_duration: args.silence,
    };
    opts.validate()?;

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let tts = load_text_to_speech(&args.onnx_dir)
        .with_context(|| format!("failed to load models from {}", args.onnx_dir.display()))?;
    let sample_rate = tts.sample_rate;

    let start = Instant::now();
    let total = args.text.len();
    if args.batch {
        let style = load_styles(&args.voice_style, &args.onnx_dir, total)?;
        let result = tts.infer(&args.text, &style, &opts, &mut rng, &mut LogObserver)?;
        for (i, wav) in result.split_batch().iter().enumerate() {
            let path = numbered_output(&args.out, i, total);
            write_wav_file(&path, wav, sample_rate)
                .with_context(|| format!("failed to write {}", path.display()))?;
            log::info!("Saved {}", path.display());
        }
    } else {
        let style = load_styles(&args.voice_style, &args.onnx_dir, 1)?;
        for (i, text) in args.text.iter().enumerate() {
            let result = if args.long {
                tts.call_long(text, &style, &opts, &mut rng, &mut LogObserver)?
            } else {
                tts.infer(&[text.clone()], &style, &opts, &mut rng, &mut LogObserver)?
            };
            let wav = if args.long { result.wav } else { result.trimmed() };
            let path = numbered_output(&args.out, i, total);
            write_wav_file(&path, &wav, sample_rate)
                .with_context(|| format!("failed to write {}", path.display()))?;
            log::info!(
                "Saved {} ({:.2} sec of audio)",
                path.display(),
                wav.len() as f32 / sample_rate as f32
            );
        }
    }
    log::info!("Synthesis finished in {:.2} sec", start.elapsed().as_secs_f64());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn args_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn long_and_batch_are_exclusive() {
        let err = Args::try_parse_from([
            "supertonic-tts",
            "--text",
            "a",
            "--text",
            "b",
            "--long",
            "--batch",
        ])
        .err()
        .expect("conflicting flags must be rejected");
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);

        let args = Args::try_parse_from(["supertonic-tts", "--text", "a", "--long"]).unwrap();
        assert!(args.long && !args.batch);
        assert_eq!(args.voice_style, vec!["M1".to_string()]);
    }

    #[test]
    fn presets_resolve_next_to_onnx_dir() {
        let path = resolve_style("f2", Path::new("assets/onnx"));
        assert_eq!(path, Path::new("assets").join("voice_styles").join("F2.json"));
        assert_eq!(
            resolve_style("my/voice.json", Path::new("assets/onnx")),
            PathBuf::from("my/voice.json")
        );
    }
}
