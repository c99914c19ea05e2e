// ============================================================================
// WAV File I/O
// ============================================================================

use hound::{SampleFormat, WavSpec, WavWriter};
use std::io::{Cursor, Seek, Write};
use std::path::Path;

use crate::error::Result;

fn mono_pcm16(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// Float sample in `[-1, 1]` to 16-bit PCM; out-of-range input is clamped.
pub fn to_pcm16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0) as i16
}

fn write_samples<W: Write + Seek>(writer: &mut WavWriter<W>, audio_data: &[f32]) -> Result<()> {
    for &sample in audio_data {
        writer.write_sample(to_pcm16(sample))?;
    }
    Ok(())
}

pub fn write_wav_file<P: AsRef<Path>>(
    filename: P,
    audio_data: &[f32],
    sample_rate: u32,
) -> Result<()> {
    let mut writer = WavWriter::create(filename, mono_pcm16(sample_rate))?;
    write_samples(&mut writer, audio_data)?;
    writer.finalize()?;
    Ok(())
}

/// Encode audio data to WAV bytes in memory
pub fn encode_wav_to_bytes(audio_data: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut buffer, mono_pcm16(sample_rate))?;
        write_samples(&mut writer, audio_data)?;
        writer.finalize()?;
    }
    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::WavReader;

    #[test]
    fn clamps_before_scaling() {
        assert_eq!(to_pcm16(0.0), 0);
        assert_eq!(to_pcm16(1.0), 32767);
        assert_eq!(to_pcm16(2.5), 32767);
        assert_eq!(to_pcm16(-4.0), -32767);
        assert_eq!(to_pcm16(0.5), 16383);
    }

    #[test]
    fn encodes_mono_16bit() {
        let bytes = encode_wav_to_bytes(&[0.0, 0.5, -1.5], 44100).unwrap();
        let reader = WavReader::new(Cursor::new(bytes)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 44100);
        assert_eq!(spec.bits_per_sample, 16);
        let samples: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0, 16383, -32767]);
    }

    #[test]
    fn writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        write_wav_file(&path, &[0.25; 100], 24000).unwrap();
        let reader = WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 24000);
        assert_eq!(reader.len(), 100);
    }
}
