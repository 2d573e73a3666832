//! WAV encoding and decoding for chunk artifacts and backend pipes.

use crate::audio::AudioClip;
use crate::error::{LongvoxError, Result};
use std::io::Cursor;
use std::path::Path;

/// Decode WAV bytes into a mono clip at the file's own sample rate.
///
/// Multi-channel input is averaged down to mono. Integer PCM of any depth and
/// 32-bit float are accepted and converted to 16-bit.
pub fn decode_wav(bytes: &[u8]) -> Result<AudioClip> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();

    let interleaved: Vec<i16> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, bits) if bits <= 16 => {
            let shift = 16 - bits;
            reader
                .samples::<i16>()
                .map(|s| s.map(|v| v << shift))
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
        (hound::SampleFormat::Int, bits) => {
            let shift = bits - 16;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| (v >> shift) as i16))
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
        (hound::SampleFormat::Float, _) => reader
            .samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * 32767.0).round() as i16))
            .collect::<std::result::Result<Vec<_>, _>>()?,
    };

    let channels = spec.channels.max(1) as usize;
    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks_exact(channels)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / channels as i32) as i16
            })
            .collect()
    };

    Ok(AudioClip::new(samples, spec.sample_rate))
}

/// Encode a clip as 16-bit mono PCM WAV.
pub fn encode_wav(clip: &AudioClip) -> Result<Vec<u8>> {
    if clip.sample_rate == 0 {
        return Err(LongvoxError::AudioFormatMismatch {
            expected: "non-zero sample rate".to_string(),
            actual: "0 Hz".to_string(),
        });
    }
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: clip.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(44 + clip.samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &s in &clip.samples {
            writer.write_sample(s)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

pub fn read_wav(path: &Path) -> Result<AudioClip> {
    let bytes = std::fs::read(path)?;
    decode_wav(&bytes)
}

pub fn write_wav(path: &Path, clip: &AudioClip) -> Result<()> {
    let bytes = encode_wav(clip)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Simple linear interpolation resampling.
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx] as f64;
                let right = samples[source_idx + 1] as f64;
                (left + (right - left) * fraction) as i16
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_wav(spec: hound::WavSpec, write: impl FnOnce(&mut hound::WavWriter<&mut Cursor<Vec<u8>>>)) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        write(&mut writer);
        writer.finalize().unwrap();
        cursor.into_inner()
    }

    fn int_spec(sample_rate: u32, channels: u16, bits: u16) -> hound::WavSpec {
        hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: bits,
            sample_format: hound::SampleFormat::Int,
        }
    }

    #[test]
    fn encode_then_decode_preserves_samples() {
        let clip = AudioClip::new(vec![0, 1, -1, i16::MAX, i16::MIN], 22050);
        let decoded = decode_wav(&encode_wav(&clip).unwrap()).unwrap();
        assert_eq!(decoded, clip);
    }

    #[test]
    fn encoding_is_deterministic() {
        let clip = AudioClip::new((0..500).map(|i| (i * 7) as i16).collect(), 24000);
        assert_eq!(encode_wav(&clip).unwrap(), encode_wav(&clip).unwrap());
    }

    #[test]
    fn stereo_is_downmixed_to_mono() {
        let bytes = make_wav(int_spec(16000, 2, 16), |w| {
            for s in [100i16, 200, 300, 400, 500, 600] {
                w.write_sample(s).unwrap();
            }
        });
        let clip = decode_wav(&bytes).unwrap();
        assert_eq!(clip.samples, vec![150, 350, 550]);
        assert_eq!(clip.sample_rate, 16000);
    }

    #[test]
    fn eight_bit_wav_is_scaled_to_full_range() {
        let bytes = make_wav(int_spec(8000, 1, 8), |w| {
            for s in [0i8, 64, -128, 127] {
                w.write_sample(s).unwrap();
            }
        });
        let clip = decode_wav(&bytes).unwrap();
        assert_eq!(clip.samples, vec![0, 16384, -32768, 32512]);
    }

    #[test]
    fn float_wav_is_converted() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 24000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let bytes = make_wav(spec, |w| {
            for s in [0.0f32, 0.5, -1.0, 2.0] {
                w.write_sample(s).unwrap();
            }
        });
        let clip = decode_wav(&bytes).unwrap();
        assert_eq!(clip.samples, vec![0, 16384, -32767, 32767]);
    }

    #[test]
    fn twenty_four_bit_wav_is_scaled_down() {
        let bytes = make_wav(int_spec(22050, 1, 24), |w| {
            for s in [256i32, -256, 8_388_607] {
                w.write_sample(s).unwrap();
            }
        });
        let clip = decode_wav(&bytes).unwrap();
        assert_eq!(clip.samples, vec![1, -1, 32767]);
    }

    #[test]
    fn invalid_bytes_are_a_wav_error() {
        let result = decode_wav(&[0, 1, 2, 3, 4, 5]);
        assert!(matches!(result, Err(LongvoxError::Wav(_))));
    }

    #[test]
    fn zero_rate_cannot_be_encoded() {
        let result = encode_wav(&AudioClip::new(vec![1], 0));
        assert!(matches!(
            result,
            Err(LongvoxError::AudioFormatMismatch { .. })
        ));
    }

    #[test]
    fn write_and_read_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.wav");
        let clip = AudioClip::new(vec![10; 100], 16000);
        write_wav(&path, &clip).unwrap();
        assert_eq!(read_wav(&path).unwrap(), clip);
    }

    #[test]
    fn resample_48k_to_16k() {
        let out = resample(&vec![0i16; 48000], 48000, 16000);
        assert!(out.len() >= 15900 && out.len() <= 16100);
    }

    #[test]
    fn resample_preserves_constant_signal() {
        let out = resample(&vec![1000i16; 44100], 44100, 16000);
        assert!(out.iter().all(|&s| (900..=1100).contains(&s)));
    }

    #[test]
    fn resample_same_rate_is_identity() {
        let input = vec![1i16, 2, 3];
        assert_eq!(resample(&input, 16000, 16000), input);
    }
}
