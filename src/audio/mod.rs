pub mod encode;
pub mod wav;

pub use encode::{OutputFormat, encode_file};
pub use wav::{decode_wav, encode_wav, read_wav, resample, write_wav};

/// Mono 16-bit PCM audio at a known sample rate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

/// Number of samples in `seconds` of audio, truncated.
pub fn silence_len(sample_rate: u32, seconds: f64) -> usize {
    (sample_rate as f64 * seconds) as usize
}

impl AudioClip {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn silence(sample_rate: u32, seconds: f64) -> Self {
        Self::new(vec![0; silence_len(sample_rate, seconds)], sample_rate)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_sec(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Peak absolute amplitude as a fraction of full scale.
    pub fn peak(&self) -> f32 {
        let max = self
            .samples
            .iter()
            .map(|&s| (s as i32).abs())
            .max()
            .unwrap_or(0);
        max as f32 / 32768.0
    }

    /// Insert `seconds` of silence before the first sample.
    pub fn prepend_silence(&mut self, seconds: f64) {
        let n = silence_len(self.sample_rate, seconds);
        if n > 0 {
            self.samples.splice(0..0, std::iter::repeat_n(0, n));
        }
    }

    /// Convert to `sample_rate` with linear interpolation.
    pub fn resampled(self, sample_rate: u32) -> Self {
        if self.sample_rate == sample_rate {
            return self;
        }
        Self::new(resample(&self.samples, self.sample_rate, sample_rate), sample_rate)
    }

    /// Samples as f32 in [-1.0, 1.0), the layout Whisper expects.
    pub fn to_f32(&self) -> Vec<f32> {
        self.samples.iter().map(|&s| s as f32 / 32768.0).collect()
    }
}
