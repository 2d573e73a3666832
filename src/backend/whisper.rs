//! Whisper-based chunk verification.
//!
//! Requires the `whisper` feature (and cmake to build whisper.cpp). Without it
//! the verifier still constructs, but every transcription fails with a hint
//! on how to rebuild.

use crate::audio::AudioClip;
use crate::backend::Transcriber;
use crate::defaults::WHISPER_SAMPLE_RATE;
use crate::error::{LongvoxError, Result};
use std::path::PathBuf;

#[cfg(feature = "whisper")]
use std::sync::Once;
#[cfg(feature = "whisper")]
use whisper_rs::{
    FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, install_logging_hooks,
};

#[cfg(feature = "whisper")]
static LOGGING_HOOKS_INSTALLED: Once = Once::new();

/// Language value that lets Whisper detect the language itself.
pub const AUTO_LANGUAGE: &str = "auto";

#[derive(Debug, Clone)]
pub struct WhisperConfig {
    pub model_path: PathBuf,
    /// Number of threads for inference (None = whisper.cpp default)
    pub threads: Option<usize>,
}

#[cfg(feature = "whisper")]
pub struct WhisperVerifier {
    context: WhisperContext,
    config: WhisperConfig,
    model_name: String,
}

#[cfg(feature = "whisper")]
impl std::fmt::Debug for WhisperVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperVerifier")
            .field("config", &self.config)
            .field("model_name", &self.model_name)
            .field("context", &"<WhisperContext>")
            .finish()
    }
}

#[cfg(not(feature = "whisper"))]
#[derive(Debug)]
pub struct WhisperVerifier {
    config: WhisperConfig,
    model_name: String,
}

fn model_name_of(config: &WhisperConfig) -> Result<String> {
    if !config.model_path.exists() {
        return Err(LongvoxError::ModelNotFound {
            path: config.model_path.to_string_lossy().to_string(),
        });
    }
    Ok(config
        .model_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string())
}

#[cfg(feature = "whisper")]
impl WhisperVerifier {
    /// Load a ggml Whisper model.
    ///
    /// # Errors
    /// Returns `ModelNotFound` if the model file doesn't exist and
    /// `Transcription` if whisper.cpp fails to load it.
    pub fn new(config: WhisperConfig) -> Result<Self> {
        // Install logging hooks to suppress whisper.cpp output (only once)
        LOGGING_HOOKS_INSTALLED.call_once(|| {
            install_logging_hooks();
        });

        let model_name = model_name_of(&config)?;

        let mut context_params = WhisperContextParameters::default();
        context_params.flash_attn(true);
        let context = WhisperContext::new_with_params(
            config
                .model_path
                .to_str()
                .ok_or_else(|| LongvoxError::Transcription {
                    message: "Invalid UTF-8 in model path".to_string(),
                })?,
            context_params,
        )
        .map_err(|e| LongvoxError::Transcription {
            message: format!("Failed to load Whisper model: {}", e),
        })?;

        tracing::info!(model = %model_name, "loaded Whisper verifier");

        Ok(Self {
            context,
            config,
            model_name,
        })
    }

    pub fn config(&self) -> &WhisperConfig {
        &self.config
    }
}

#[cfg(not(feature = "whisper"))]
impl WhisperVerifier {
    pub fn new(config: WhisperConfig) -> Result<Self> {
        let model_name = model_name_of(&config)?;
        tracing::warn!("built without the whisper feature; verification will fail");
        Ok(Self { config, model_name })
    }

    pub fn config(&self) -> &WhisperConfig {
        &self.config
    }
}

/// Whisper wants 16 kHz mono f32.
fn prepare_audio(clip: &AudioClip) -> Vec<f32> {
    clip.clone().resampled(WHISPER_SAMPLE_RATE).to_f32()
}

#[cfg(feature = "whisper")]
impl Transcriber for WhisperVerifier {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn transcribe(&mut self, clip: &AudioClip, language: &str) -> Result<String> {
        let audio = prepare_audio(clip);

        let mut state = self
            .context
            .create_state()
            .map_err(|e| LongvoxError::Transcription {
                message: format!("Failed to create Whisper state: {}", e),
            })?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        if language.is_empty() || language == AUTO_LANGUAGE {
            params.set_language(None);
        } else {
            params.set_language(Some(language));
        }
        if let Some(threads) = self.config.threads {
            params.set_n_threads(threads as i32);
        }
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        state
            .full(params, &audio)
            .map_err(|e| LongvoxError::Transcription {
                message: format!("Whisper inference failed: {}", e),
            })?;

        let mut transcript = String::new();
        for segment in state.as_iter() {
            transcript.push_str(&segment.to_string());
        }
        Ok(transcript.trim().to_string())
    }
}

#[cfg(not(feature = "whisper"))]
impl Transcriber for WhisperVerifier {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn transcribe(&mut self, _clip: &AudioClip, _language: &str) -> Result<String> {
        Err(LongvoxError::Transcription {
            message: concat!(
                "Whisper feature not enabled. This binary was built without speech recognition.\n",
                "To fix: cargo build --release (whisper is enabled by default)\n",
                "Or set verify.transcribe_command to an external transcriber"
            )
            .to_string(),
        })
    }
}
