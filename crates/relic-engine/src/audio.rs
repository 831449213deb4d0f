use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hound::{SampleFormat, WavSpec, WavWriter};

pub const NARRATION_SAMPLE_RATE: u32 = 24_000;
pub const NARRATION_CHANNELS: u16 = 1;

const PCM_SCALE: f32 = 32768.0;
const BYTES_PER_SAMPLE: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

impl AudioBuffer {
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn frames(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }

    pub fn write_wav(&self, path: &Path) -> Result<()> {
        let spec = WavSpec {
            channels: u16::try_from(self.channel_count().max(1))
                .context("too many channels for WAV")?,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec)
            .with_context(|| format!("failed to create {}", path.display()))?;
        for frame in 0..self.frames() {
            for channel in &self.channels {
                writer.write_sample(float_to_pcm(channel[frame]))?;
            }
        }
        writer
            .finalize()
            .with_context(|| format!("failed to finalize {}", path.display()))?;
        Ok(())
    }
}

/// Decodes base64 16-bit little-endian PCM into a planar float buffer.
///
/// A `data:...;base64,` prefix is stripped first. A trailing partial frame
/// (byte length not a multiple of `2 * channels`) is dropped.
pub fn decode_pcm_base64(encoded: &str, sample_rate: u32, channels: u16) -> Result<AudioBuffer> {
    if channels == 0 {
        bail!("channel count must be at least 1");
    }
    let bytes = BASE64
        .decode(strip_data_uri_prefix(encoded).trim().as_bytes())
        .context("narration audio base64 decode failed")?;
    Ok(decode_pcm_bytes(&bytes, sample_rate, channels))
}

pub fn decode_pcm_bytes(bytes: &[u8], sample_rate: u32, channels: u16) -> AudioBuffer {
    let channel_count = usize::from(channels.max(1));
    let frame_count = bytes.len() / (BYTES_PER_SAMPLE * channel_count);
    let mut planar = vec![Vec::with_capacity(frame_count); channel_count];

    for frame in 0..frame_count {
        for (channel, samples) in planar.iter_mut().enumerate() {
            let offset = (frame * channel_count + channel) * BYTES_PER_SAMPLE;
            let raw = i16::from_le_bytes([bytes[offset], bytes[offset + 1]]);
            samples.push(f32::from(raw) / PCM_SCALE);
        }
    }

    AudioBuffer {
        sample_rate,
        channels: planar,
    }
}

pub fn strip_data_uri_prefix(encoded: &str) -> &str {
    if encoded.starts_with("data:") {
        if let Some((_, payload)) = encoded.split_once(',') {
            return payload;
        }
    }
    encoded
}

fn float_to_pcm(sample: f32) -> i16 {
    (sample * PCM_SCALE)
        .round()
        .clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
}

#[cfg(test)]
mod tests {
    use base64::Engine as _;

    use super::{
        decode_pcm_base64, decode_pcm_bytes, float_to_pcm, strip_data_uri_prefix,
        NARRATION_SAMPLE_RATE, PCM_SCALE,
    };
    use super::BASE64;

    fn encode_interleaved(channels: &[Vec<f32>]) -> String {
        let frames = channels[0].len();
        let mut bytes = Vec::new();
        for frame in 0..frames {
            for channel in channels {
                bytes.extend_from_slice(&float_to_pcm(channel[frame]).to_le_bytes());
            }
        }
        BASE64.encode(bytes)
    }

    #[test]
    fn four_mono_bytes_yield_two_frames() -> anyhow::Result<()> {
        let encoded = BASE64.encode([0x00, 0x40, 0x00, 0xC0]);
        let buffer = decode_pcm_base64(&encoded, NARRATION_SAMPLE_RATE, 1)?;
        assert_eq!(buffer.sample_rate, 24_000);
        assert_eq!(buffer.channel_count(), 1);
        assert_eq!(buffer.frames(), 2);
        assert_eq!(buffer.channels[0], vec![0.5, -0.5]);
        Ok(())
    }

    #[test]
    fn round_trip_stays_within_quantization_error() -> anyhow::Result<()> {
        let left = vec![0.0, 0.25, -0.75, 0.999, -1.0, 0.123_456];
        let right = vec![0.5, -0.5, 0.333, -0.001, 0.9, -0.654_321];
        let encoded = encode_interleaved(&[left.clone(), right.clone()]);
        let buffer = decode_pcm_base64(&encoded, NARRATION_SAMPLE_RATE, 2)?;
        assert_eq!(buffer.frames(), left.len());
        for (original, decoded) in [(&left, &buffer.channels[0]), (&right, &buffer.channels[1])] {
            for (a, b) in original.iter().zip(decoded.iter()) {
                assert!((a - b).abs() <= 1.0 / PCM_SCALE, "{a} vs {b}");
            }
        }
        Ok(())
    }

    #[test]
    fn stereo_is_deinterleaved_by_frame_and_channel() {
        // L0=1, R0=2, L1=3, R1=4
        let bytes = [1i16, 2, 3, 4]
            .iter()
            .flat_map(|value| value.to_le_bytes())
            .collect::<Vec<u8>>();
        let buffer = decode_pcm_bytes(&bytes, 48_000, 2);
        assert_eq!(buffer.channels[0], vec![1.0 / 32768.0, 3.0 / 32768.0]);
        assert_eq!(buffer.channels[1], vec![2.0 / 32768.0, 4.0 / 32768.0]);
    }

    #[test]
    fn data_uri_prefix_is_stripped() -> anyhow::Result<()> {
        let payload = BASE64.encode([0x00, 0x40]);
        let with_prefix = format!("data:audio/L16;rate=24000;base64,{payload}");
        assert_eq!(strip_data_uri_prefix(&with_prefix), payload);
        let buffer = decode_pcm_base64(&with_prefix, NARRATION_SAMPLE_RATE, 1)?;
        assert_eq!(buffer.channels[0], vec![0.5]);
        Ok(())
    }

    #[test]
    fn trailing_partial_frame_is_dropped() {
        let buffer = decode_pcm_bytes(&[0x00, 0x40, 0x00, 0x40, 0x00, 0x40, 0x7f], 24_000, 2);
        assert_eq!(buffer.frames(), 1);
        let odd = decode_pcm_bytes(&[0x00, 0x40, 0x01], 24_000, 1);
        assert_eq!(odd.frames(), 1);
    }

    #[test]
    fn invalid_input_is_rejected() {
        assert!(decode_pcm_base64("!!not base64!!", 24_000, 1).is_err());
        assert!(decode_pcm_base64("AAAA", 24_000, 0).is_err());
    }

    #[test]
    fn wav_export_preserves_frames() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("narration.wav");
        let buffer = decode_pcm_bytes(&[0x00, 0x40, 0x00, 0xC0, 0x00, 0x00], 24_000, 1);
        buffer.write_wav(&path)?;

        let reader = hound::WavReader::open(&path)?;
        assert_eq!(reader.spec().sample_rate, 24_000);
        assert_eq!(reader.spec().channels, 1);
        let samples = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<i16>, hound::Error>>()?;
        assert_eq!(samples, vec![16384, -16384, 0]);
        assert!((buffer.duration().as_secs_f64() - 0.000_125).abs() < 1e-9);
        Ok(())
    }
}
