//! Deterministic test doubles for the pipeline capabilities.

use crate::audio::AudioClip;
use crate::backend::{PostProcessor, Synthesizer, Transcriber};
use crate::error::{LongvoxError, Result};
use crate::job::JobParameters;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Synthesizer that renders text into a deterministic waveform.
///
/// Every character contributes 10 ms of samples derived from its code point,
/// so identical text always yields bit-identical audio.
#[derive(Debug, Clone)]
pub struct ToneSynthesizer {
    sample_rate: u32,
    fail_first: usize,
    always_fail: bool,
    clip_first: usize,
    calls: Arc<AtomicUsize>,
}

impl ToneSynthesizer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            fail_first: 0,
            always_fail: false,
            clip_first: 0,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail the first `n` calls, then succeed.
    pub fn failing_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }

    pub fn always_failing(mut self) -> Self {
        self.always_fail = true;
        self
    }

    /// Return full-scale (clipped) audio for the first `n` calls.
    pub fn clipping_first(mut self, n: usize) -> Self {
        self.clip_first = n;
        self
    }

    /// Shared counter of synthesize calls, readable after the synthesizer is moved.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    /// The audio this synthesizer produces for `text`.
    pub fn render(&self, text: &str) -> AudioClip {
        let per_char = (self.sample_rate / 100).max(1) as usize;
        let samples = text
            .chars()
            .flat_map(|c| {
                let base = (c as u32 % 256) as i16 * 64;
                (0..per_char).map(move |i| if i % 2 == 0 { base } else { -base })
            })
            .collect();
        AudioClip::new(samples, self.sample_rate)
    }
}

impl Synthesizer for ToneSynthesizer {
    fn name(&self) -> &str {
        "tone"
    }

    fn synthesize(&mut self, text: &str, _params: &JobParameters) -> Result<AudioClip> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.always_fail || call < self.fail_first {
            return Err(LongvoxError::Synthesis {
                message: format!("mock synthesis failure (call {})", call + 1),
            });
        }
        if call < self.clip_first {
            let n = self.render(text).len().max(1);
            return Ok(AudioClip::new(vec![i16::MAX; n], self.sample_rate));
        }
        Ok(self.render(text))
    }
}

/// Post-processor that halves amplitude, optionally failing first.
#[derive(Debug, Clone, Default)]
pub struct MockPostProcessor {
    fail_first: usize,
    calls: Arc<AtomicUsize>,
}

impl MockPostProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }

    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl PostProcessor for MockPostProcessor {
    fn name(&self) -> &str {
        "mock-post"
    }

    fn process(&mut self, mut clip: AudioClip, _params: &JobParameters) -> Result<AudioClip> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err(LongvoxError::PostProcess {
                message: "mock post-processing failure".to_string(),
            });
        }
        for s in clip.samples.iter_mut() {
            *s /= 2;
        }
        Ok(clip)
    }
}

/// Mock transcriber for testing
#[derive(Debug, Clone)]
pub struct MockTranscriber {
    model_name: String,
    responses: Vec<String>,
    should_fail: bool,
    calls: Arc<AtomicUsize>,
}

impl MockTranscriber {
    /// Create a new mock transcriber with default settings
    pub fn new(model_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            responses: vec!["mock transcription".to_string()],
            should_fail: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Configure the mock to return a specific response
    pub fn with_response(mut self, response: &str) -> Self {
        self.responses = vec![response.to_string()];
        self
    }

    /// Return responses in order; the last one repeats once exhausted.
    pub fn with_responses(mut self, responses: &[&str]) -> Self {
        self.responses = responses.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Configure the mock to fail on transcribe
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl Transcriber for MockTranscriber {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn transcribe(&mut self, _clip: &AudioClip, _language: &str) -> Result<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.should_fail {
            return Err(LongvoxError::Transcription {
                message: "mock transcription failure".to_string(),
            });
        }
        let idx = call.min(self.responses.len().saturating_sub(1));
        Ok(self.responses.get(idx).cloned().unwrap_or_default())
    }
}
