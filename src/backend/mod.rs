//! External capabilities consumed by the pipeline.
//!
//! Each backend sits behind a [`BackendGate`] so only one call runs against a
//! loaded model at a time, whichever job or admin action issues it.

pub mod command;
pub mod gate;
pub mod mock;
pub mod whisper;

pub use command::{CommandPostProcessor, CommandSynthesizer, CommandTranscriber};
pub use gate::BackendGate;
pub use mock::{MockPostProcessor, MockTranscriber, ToneSynthesizer};
pub use whisper::{WhisperConfig, WhisperVerifier};

use crate::audio::AudioClip;
use crate::config::Config;
use crate::error::{LongvoxError, Result};
use crate::job::JobParameters;
use crate::process::{CommandExecutor, SystemCommandExecutor};
use std::sync::Arc;

/// Turns chunk text into audio.
pub trait Synthesizer: Send {
    fn name(&self) -> &str;

    fn synthesize(&mut self, text: &str, params: &JobParameters) -> Result<AudioClip>;
}

/// Cleans raw synthesized audio (filtering, loudness, de-essing).
pub trait PostProcessor: Send {
    fn name(&self) -> &str;

    fn process(&mut self, clip: AudioClip, params: &JobParameters) -> Result<AudioClip>;
}

/// Speech-to-text used to verify a chunk.
pub trait Transcriber: Send {
    fn model_name(&self) -> &str;

    fn transcribe(&mut self, clip: &AudioClip, language: &str) -> Result<String>;
}

/// The gated backends one pipeline runs against.
#[derive(Clone)]
pub struct Backends {
    pub synthesizer: Arc<BackendGate<dyn Synthesizer>>,
    pub post_processor: Option<Arc<BackendGate<dyn PostProcessor>>>,
    pub transcriber: Option<Arc<BackendGate<dyn Transcriber>>>,
}

impl Backends {
    pub fn new(synthesizer: impl Synthesizer + 'static) -> Self {
        let name = synthesizer.name().to_string();
        let backend: Box<dyn Synthesizer> = Box::new(synthesizer);
        Self {
            synthesizer: Arc::new(BackendGate::loaded(name, backend)),
            post_processor: None,
            transcriber: None,
        }
    }

    pub fn with_post_processor(mut self, post: impl PostProcessor + 'static) -> Self {
        let name = post.name().to_string();
        let backend: Box<dyn PostProcessor> = Box::new(post);
        self.post_processor = Some(Arc::new(BackendGate::loaded(name, backend)));
        self
    }

    pub fn with_transcriber(mut self, transcriber: impl Transcriber + 'static) -> Self {
        let name = transcriber.model_name().to_string();
        let backend: Box<dyn Transcriber> = Box::new(transcriber);
        self.transcriber = Some(Arc::new(BackendGate::loaded(name, backend)));
        self
    }

    /// Release every loaded model. Later calls through these gates fail with
    /// `BackendUnavailable`.
    pub fn unload_all(&self) {
        if let Err(e) = self.synthesizer.unload() {
            tracing::warn!(error = %e, "could not unload synthesizer");
        }
        if let Some(post) = &self.post_processor
            && let Err(e) = post.unload()
        {
            tracing::warn!(error = %e, "could not unload post-processor");
        }
        if let Some(transcriber) = &self.transcriber
            && let Err(e) = transcriber.unload()
        {
            tracing::warn!(error = %e, "could not unload transcriber");
        }
    }

    /// Build command-line backends (and Whisper, if configured) from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::from_config_with_executor(config, Arc::new(SystemCommandExecutor::new()))
    }

    pub fn from_config_with_executor(
        config: &Config,
        executor: Arc<dyn CommandExecutor>,
    ) -> Result<Self> {
        let synth = CommandSynthesizer::new(
            &config.backend.name,
            &config.backend.synth_command,
            executor.clone(),
        )
        .ok_or_else(|| LongvoxError::ConfigInvalidValue {
            key: "backend.synth_command".to_string(),
            message: "a synthesis command is required".to_string(),
        })?;
        let mut backends = Self::new(synth);

        if let Some(post) = CommandPostProcessor::new(&config.backend.post_command, executor.clone())
        {
            backends = backends.with_post_processor(post);
        }

        if let Some(model_path) = &config.verify.whisper_model {
            let verifier = WhisperVerifier::new(WhisperConfig {
                model_path: model_path.clone(),
                threads: config.verify.threads,
            })?;
            backends = backends.with_transcriber(verifier);
        } else if let Some(transcriber) =
            CommandTranscriber::new(&config.verify.transcribe_command, executor)
        {
            backends = backends.with_transcriber(transcriber);
        }

        Ok(backends)
    }
}
