//! Backends that shell out to external programs.
//!
//! Protocol:
//! - synthesis: chunk text on stdin, WAV on stdout
//! - post-processing: WAV on stdin, WAV on stdout
//! - transcription: WAV on stdin, transcript text on stdout
//!
//! Job parameters are passed as JSON in `LONGVOX_PARAMS`; the language for
//! transcription in `LONGVOX_LANGUAGE`.

use crate::audio::{AudioClip, decode_wav, encode_wav};
use crate::backend::{PostProcessor, Synthesizer, Transcriber};
use crate::defaults::PARAMS_ENV;
use crate::error::{LongvoxError, Result};
use crate::job::JobParameters;
use crate::process::CommandExecutor;
use std::sync::Arc;

const LANGUAGE_ENV: &str = "LONGVOX_LANGUAGE";

/// Program and arguments split out of a configured command line.
#[derive(Debug, Clone)]
struct CommandLine {
    program: String,
    args: Vec<String>,
}

impl CommandLine {
    fn parse(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        if program.trim().is_empty() {
            return None;
        }
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

fn params_env(params: &JobParameters) -> Result<Vec<(String, String)>> {
    Ok(vec![(PARAMS_ENV.to_string(), serde_json::to_string(params)?)])
}

pub struct CommandSynthesizer {
    name: String,
    command: CommandLine,
    executor: Arc<dyn CommandExecutor>,
}

impl CommandSynthesizer {
    /// Returns `None` when `command` is empty.
    pub fn new(name: &str, command: &[String], executor: Arc<dyn CommandExecutor>) -> Option<Self> {
        Some(Self {
            name: name.to_string(),
            command: CommandLine::parse(command)?,
            executor,
        })
    }
}

impl Synthesizer for CommandSynthesizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn synthesize(&mut self, text: &str, params: &JobParameters) -> Result<AudioClip> {
        let env = params_env(params)?;
        let stdout = self
            .executor
            .execute(
                &self.command.program,
                &self.command.args,
                Some(text.as_bytes()),
                &env,
            )
            .map_err(|e| LongvoxError::Synthesis {
                message: e.to_string(),
            })?;

        let clip = decode_wav(&stdout).map_err(|e| LongvoxError::Synthesis {
            message: format!("{} produced unreadable audio: {}", self.command.program, e),
        })?;
        if clip.is_empty() {
            return Err(LongvoxError::Synthesis {
                message: format!("{} produced no audio", self.command.program),
            });
        }
        Ok(clip)
    }
}

pub struct CommandPostProcessor {
    command: CommandLine,
    executor: Arc<dyn CommandExecutor>,
}

impl CommandPostProcessor {
    /// Returns `None` when `command` is empty.
    pub fn new(command: &[String], executor: Arc<dyn CommandExecutor>) -> Option<Self> {
        Some(Self {
            command: CommandLine::parse(command)?,
            executor,
        })
    }
}

impl PostProcessor for CommandPostProcessor {
    fn name(&self) -> &str {
        &self.command.program
    }

    fn process(&mut self, clip: AudioClip, params: &JobParameters) -> Result<AudioClip> {
        let input = encode_wav(&clip)?;
        let env = params_env(params)?;
        let stdout = self
            .executor
            .execute(&self.command.program, &self.command.args, Some(&input), &env)
            .map_err(|e| LongvoxError::PostProcess {
                message: e.to_string(),
            })?;

        let processed = decode_wav(&stdout).map_err(|e| LongvoxError::PostProcess {
            message: format!("{} produced unreadable audio: {}", self.command.program, e),
        })?;
        if processed.is_empty() {
            return Err(LongvoxError::PostProcess {
                message: format!("{} produced no audio", self.command.program),
            });
        }
        Ok(processed)
    }
}

pub struct CommandTranscriber {
    command: CommandLine,
    executor: Arc<dyn CommandExecutor>,
}

impl CommandTranscriber {
    /// Returns `None` when `command` is empty.
    pub fn new(command: &[String], executor: Arc<dyn CommandExecutor>) -> Option<Self> {
        Some(Self {
            command: CommandLine::parse(command)?,
            executor,
        })
    }
}

impl Transcriber for CommandTranscriber {
    fn model_name(&self) -> &str {
        &self.command.program
    }

    fn transcribe(&mut self, clip: &AudioClip, language: &str) -> Result<String> {
        let input = encode_wav(clip)?;
        let env = vec![(LANGUAGE_ENV.to_string(), language.to_string())];
        let stdout = self
            .executor
            .execute(&self.command.program, &self.command.args, Some(&input), &env)
            .map_err(|e| LongvoxError::Transcription {
                message: e.to_string(),
            })?;
        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }
}
