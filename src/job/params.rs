//! Typed view over the opaque request parameters.
//!
//! The parameter map is stored verbatim in the ledger so recovery reproduces the
//! original request. Only a handful of keys steer the pipeline itself; the rest
//! are passed through untouched to the synthesis backend.

use crate::audio::OutputFormat;
use crate::config::Config;
use crate::error::{LongvoxError, Result};
use serde_json::Value;

/// Opaque generation parameters, echoed verbatim to backends and the ledger.
pub type JobParameters = serde_json::Map<String, Value>;

pub const KEY_LANGUAGE: &str = "language";
pub const KEY_TOLERANCE: &str = "tolerance";
pub const KEY_VERIFY: &str = "verify_whisper";
pub const KEY_SKIP_POST: &str = "skip_post_process";
pub const KEY_AUTO_RETRY: &str = "auto_retry";
pub const KEY_OUTPUT_FORMAT: &str = "output_format";
pub const KEY_SAVE_PATH: &str = "save_path";

/// Read pipeline settings from parameters, falling back to configuration.
#[derive(Debug, Clone, Copy)]
pub struct ParamView<'a> {
    params: &'a JobParameters,
    config: &'a Config,
}

impl<'a> ParamView<'a> {
    pub fn new(params: &'a JobParameters, config: &'a Config) -> Self {
        Self { params, config }
    }

    pub fn language(&self) -> String {
        self.string(KEY_LANGUAGE)
            .unwrap_or_else(|| self.config.verify.language.clone())
    }

    /// Verification tolerance in percent.
    pub fn tolerance(&self) -> Result<f64> {
        match self.number(KEY_TOLERANCE)? {
            Some(t) if (0.0..=100.0).contains(&t) => Ok(t),
            Some(t) => Err(invalid(KEY_TOLERANCE, format!("{} is outside 0-100", t))),
            None => Ok(self.config.verify.tolerance),
        }
    }

    pub fn verify(&self) -> Result<bool> {
        Ok(self.flag(KEY_VERIFY)?.unwrap_or(self.config.verify.enabled))
    }

    pub fn skip_post_process(&self) -> Result<bool> {
        Ok(self
            .flag(KEY_SKIP_POST)?
            .unwrap_or(self.config.backend.skip_post_process))
    }

    /// Retries allowed per chunk after the first attempt.
    pub fn max_retries(&self) -> Result<u32> {
        match self.number(KEY_AUTO_RETRY)? {
            Some(n) if n >= 0.0 && n.fract() == 0.0 && n <= u32::MAX as f64 => Ok(n as u32),
            Some(n) => Err(invalid(
                KEY_AUTO_RETRY,
                format!("{} is not a non-negative integer", n),
            )),
            None => Ok(self.config.retry.max_retries),
        }
    }

    pub fn output_format(&self) -> Result<OutputFormat> {
        match self.string(KEY_OUTPUT_FORMAT) {
            Some(s) => s.parse(),
            None => Ok(OutputFormat::Wav),
        }
    }

    pub fn save_path(&self) -> Option<String> {
        self.string(KEY_SAVE_PATH).filter(|s| !s.trim().is_empty())
    }

    /// Validate every pipeline key up front so a bad request never creates a job.
    pub fn validate(&self) -> Result<()> {
        self.tolerance()?;
        self.verify()?;
        self.skip_post_process()?;
        self.max_retries()?;
        self.output_format()?;
        Ok(())
    }

    fn string(&self, key: &str) -> Option<String> {
        match self.params.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    fn number(&self, key: &str) -> Result<Option<f64>> {
        match self.params.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => Ok(n.as_f64()),
            Some(Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| invalid(key, format!("'{}' is not a number", s))),
            Some(other) => Err(invalid(key, format!("{} is not a number", other))),
        }
    }

    fn flag(&self, key: &str) -> Result<Option<bool>> {
        match self.params.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(Value::Number(n)) => Ok(Some(n.as_f64().is_some_and(|v| v != 0.0))),
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(Some(true)),
                "false" | "no" | "off" | "0" | "" => Ok(Some(false)),
                _ => Err(invalid(key, format!("'{}' is not a boolean", s))),
            },
            Some(other) => Err(invalid(key, format!("{} is not a boolean", other))),
        }
    }
}

fn invalid(key: &str, message: String) -> LongvoxError {
    LongvoxError::Validation {
        message: format!("parameter '{}': {}", key, message),
    }
}
