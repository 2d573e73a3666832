//! Per-chunk state machine.
//!
//! ```text
//! Pending → Synthesizing → PostProcessing → Verifying → Accepted
//!                ↑                                   ↘
//!                └──────────── Retrying ←──── (any failure) → PermanentlyFailed
//! ```
//!
//! Every attempt outcome is saved to the ledger before `process` returns or
//! the next attempt starts.

use crate::audio::AudioClip;
use crate::backend::Backends;
use crate::config::Config;
use crate::error::{LongvoxError, Result};
use crate::job::{Job, JobLedger, JobParameters, JobStore, ParamView, Verification};
use crate::text::{passes, similarity};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Pending,
    Synthesizing,
    PostProcessing,
    Verifying,
    Retrying,
    Accepted,
    PermanentlyFailed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerifySettings {
    /// Minimum similarity in percent.
    pub tolerance: f64,
    pub language: String,
    pub clipping_threshold: f32,
}

/// Per-job worker behaviour, resolved from config and request parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSettings {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub skip_post_process: bool,
    pub verify: Option<VerifySettings>,
    pub front_pad_sec: f64,
    pub keep_rejected: bool,
}

impl WorkerSettings {
    pub fn resolve(config: &Config, params: &JobParameters) -> Result<Self> {
        let view = ParamView::new(params, config);
        let verify = if view.verify()? {
            Some(VerifySettings {
                tolerance: view.tolerance()?,
                language: view.language(),
                clipping_threshold: config.verify.clipping_threshold,
            })
        } else {
            None
        };
        Ok(Self {
            max_retries: view.max_retries()?,
            retry_delay: Duration::from_millis(config.retry.delay_ms),
            skip_post_process: view.skip_post_process()?,
            verify,
            front_pad_sec: config.padding().front_sec,
            keep_rejected: config.verify.keep_rejected,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    Accepted {
        artifact: String,
        duration_sec: f64,
        transcript: Option<String>,
    },
    Failed {
        reason: String,
        attempts: u32,
    },
}

/// Why one attempt did not produce an acceptable chunk.
struct AttemptFailure {
    error: LongvoxError,
    verification: Option<Verification>,
    rejected: Option<AudioClip>,
}

impl AttemptFailure {
    fn from_error(error: LongvoxError) -> Self {
        Self {
            error,
            verification: None,
            rejected: None,
        }
    }

    fn message(&self) -> String {
        match &self.error {
            LongvoxError::VerificationFailed { message } => message.clone(),
            other => other.to_string(),
        }
    }
}

enum Step {
    Synthesize,
    PostProcess(AudioClip),
    Verify(AudioClip),
    Accept(AudioClip, Option<Verification>),
    Retry(AttemptFailure),
}

pub struct ChunkWorker {
    backends: Backends,
    ledger: Arc<dyn JobLedger>,
    store: JobStore,
    settings: WorkerSettings,
}

impl ChunkWorker {
    pub fn new(
        backends: Backends,
        ledger: Arc<dyn JobLedger>,
        store: JobStore,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            backends,
            ledger,
            store,
            settings,
        }
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    /// Drive chunk `index` of `job` to a terminal state.
    ///
    /// `Err` is reserved for storage and ledger failures; generation problems
    /// surface as `ChunkOutcome::Failed`.
    pub fn process(&self, job: &mut Job, index: usize) -> Result<ChunkOutcome> {
        let chunk = job.chunk(index).ok_or_else(|| LongvoxError::Other(format!(
            "chunk {} out of range for job '{}' ({} chunks)",
            index, job.job_ref, job.total_chunks
        )))?;
        let text = chunk.text.clone();
        self.enter(job, index, ChunkState::Pending);

        // Accepted chunks are regenerated only when their artifact is gone.
        if let Some(artifact) = chunk.artifact.clone() {
            if self.store.artifact_path(&job.job_ref, &artifact).is_file() {
                tracing::info!(job = %job.job_ref, chunk = index, "chunk already accepted; reusing artifact");
                let chunk = &job.chunks[index];
                return Ok(ChunkOutcome::Accepted {
                    artifact,
                    duration_sec: chunk.duration_sec.unwrap_or(0.0),
                    transcript: chunk.transcript.clone(),
                });
            }
            tracing::warn!(job = %job.job_ref, chunk = index, %artifact, "accepted artifact missing; regenerating");
            job.release_artifacts(&[index]);
            self.ledger.save(job)?;
        }

        let params = job.parameters.clone();
        let mut failures: u32 = 0;
        let mut step = Step::Synthesize;

        loop {
            step = match step {
                Step::Synthesize => {
                    self.enter(job, index, ChunkState::Synthesizing);
                    match self.synthesize(&text, &params) {
                        Ok(clip) => Step::PostProcess(clip),
                        Err(e) => Step::Retry(AttemptFailure::from_error(e)),
                    }
                }
                Step::PostProcess(clip) => match &self.backends.post_processor {
                    Some(post) if !self.settings.skip_post_process => {
                        self.enter(job, index, ChunkState::PostProcessing);
                        match post.with(|p| p.process(clip, &params)).and_then(usable) {
                            Ok(clip) => Step::Verify(clip),
                            Err(e) => Step::Retry(AttemptFailure::from_error(e)),
                        }
                    }
                    _ => Step::Verify(clip),
                },
                Step::Verify(clip) => match &self.settings.verify {
                    Some(verify) => {
                        self.enter(job, index, ChunkState::Verifying);
                        match self.verify(&text, clip, verify) {
                            Ok((clip, verification)) => Step::Accept(clip, verification),
                            Err(failure) => Step::Retry(failure),
                        }
                    }
                    None => Step::Accept(clip, None),
                },
                Step::Accept(clip, verification) => {
                    match self.accept(job, index, clip, verification) {
                        Err(e @ (LongvoxError::AudioFormatMismatch { .. } | LongvoxError::Wav(_))) => {
                            Step::Retry(AttemptFailure::from_error(e))
                        }
                        done => return done,
                    }
                }
                Step::Retry(failure) => {
                    failures += 1;
                    let message = failure.message();
                    let retryable = failure.error.is_retryable();
                    tracing::warn!(
                        job = %job.job_ref,
                        chunk = index,
                        attempt = failures,
                        error = %message,
                        "chunk attempt failed"
                    );

                    job.record_attempt_failure(index, message.clone(), failure.verification);
                    if let Some(rejected) = failure.rejected
                        && self.settings.keep_rejected
                    {
                        let attempt = job.chunks[index].retry_count;
                        match self
                            .store
                            .preserve_rejected(&job.job_ref, index, attempt, &rejected)
                        {
                            Ok(path) => tracing::debug!(path = %path.display(), "kept rejected attempt"),
                            Err(e) => tracing::warn!(error = %e, "could not keep rejected attempt"),
                        }
                    }

                    if failures > self.settings.max_retries || !retryable {
                        let reason = if retryable {
                            format!(
                                "Permanently failed after {} retries: {}",
                                self.settings.max_retries, message
                            )
                        } else {
                            format!("Permanently failed (not retryable): {}", message)
                        };
                        job.chunks[index].processing_error = Some(reason.clone());
                        self.ledger.save(job)?;
                        self.enter(job, index, ChunkState::PermanentlyFailed);
                        return Ok(ChunkOutcome::Failed {
                            reason,
                            attempts: failures,
                        });
                    }

                    self.ledger.save(job)?;
                    self.enter(job, index, ChunkState::Retrying);
                    if !self.settings.retry_delay.is_zero() {
                        std::thread::sleep(self.settings.retry_delay);
                    }
                    Step::Synthesize
                }
            };
        }
    }

    fn enter(&self, job: &Job, index: usize, state: ChunkState) {
        tracing::debug!(job = %job.job_ref, chunk = index, ?state, "chunk state");
    }

    fn synthesize(&self, text: &str, params: &JobParameters) -> Result<AudioClip> {
        let mut clip = self
            .backends
            .synthesizer
            .with(|s| s.synthesize(text, params))
            .and_then(usable)?;
        clip.prepend_silence(self.settings.front_pad_sec);
        Ok(clip)
    }

    fn verify(
        &self,
        text: &str,
        clip: AudioClip,
        settings: &VerifySettings,
    ) -> std::result::Result<(AudioClip, Option<Verification>), AttemptFailure> {
        let peak = clip.peak();
        if peak > settings.clipping_threshold {
            return Err(AttemptFailure {
                error: LongvoxError::VerificationFailed {
                    message: format!(
                        "Clipping detected (peak {:.3} > {:.2})",
                        peak, settings.clipping_threshold
                    ),
                },
                verification: None,
                rejected: Some(clip),
            });
        }

        let Some(transcriber) = &self.backends.transcriber else {
            tracing::warn!("verification requested but no transcriber is configured; accepting unverified");
            return Ok((clip, None));
        };

        let transcript = match transcriber.with(|t| t.transcribe(&clip, &settings.language)) {
            Ok(t) => t,
            Err(e) => {
                return Err(AttemptFailure {
                    error: e,
                    verification: None,
                    rejected: Some(clip),
                });
            }
        };

        let sim = similarity(text, &transcript);
        let verification = Verification {
            transcript,
            similarity: sim,
        };
        if passes(sim, settings.tolerance) {
            tracing::debug!(similarity = sim, "verification passed");
            Ok((clip, Some(verification)))
        } else {
            Err(AttemptFailure {
                error: LongvoxError::VerificationFailed {
                    message: format!(
                        "Whisper similarity {:.3} < {:.2}",
                        sim,
                        settings.tolerance / 100.0
                    ),
                },
                verification: Some(verification),
                rejected: Some(clip),
            })
        }
    }

    fn accept(
        &self,
        job: &mut Job,
        index: usize,
        clip: AudioClip,
        verification: Option<Verification>,
    ) -> Result<ChunkOutcome> {
        let rate = job.sample_rate.unwrap_or(clip.sample_rate);
        let clip = if rate != clip.sample_rate {
            tracing::debug!(from = clip.sample_rate, to = rate, "resampling chunk to job rate");
            clip.resampled(rate)
        } else {
            clip
        };

        let artifact = self.store.write_chunk(&job.job_ref, index, &clip)?;
        job.sample_rate = Some(rate);
        let duration_sec = clip.duration_sec();
        let transcript = verification.as_ref().map(|v| v.transcript.clone());
        job.record_acceptance(index, artifact.clone(), duration_sec, verification);
        self.ledger.save(job)?;
        self.enter(job, index, ChunkState::Accepted);
        tracing::info!(job = %job.job_ref, chunk = index, duration_sec, "chunk accepted");

        Ok(ChunkOutcome::Accepted {
            artifact,
            duration_sec,
            transcript,
        })
    }
}

/// Reject clips that cannot become a chunk artifact.
fn usable(clip: AudioClip) -> Result<AudioClip> {
    if clip.is_empty() {
        return Err(LongvoxError::Synthesis {
            message: "backend returned no audio".to_string(),
        });
    }
    if clip.sample_rate == 0 {
        return Err(LongvoxError::Synthesis {
            message: "backend returned audio with a 0 Hz sample rate".to_string(),
        });
    }
    Ok(clip)
}
