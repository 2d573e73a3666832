use crate::defaults;
use crate::error::{LongvoxError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub backend: BackendConfig,
    pub splitter: SplitterConfig,
    pub retry: RetryConfig,
    pub verify: VerifyConfig,
    pub assembly: AssemblyConfig,
    pub storage: StorageConfig,
}

/// Synthesis backend configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
    /// Profile name (xtts, fish, kokoro); selects chunk sizes and padding.
    pub name: String,
    /// Program + arguments that read text on stdin and write WAV on stdout.
    pub synth_command: Vec<String>,
    /// Optional program + arguments that filter WAV stdin to WAV stdout.
    pub post_command: Vec<String>,
    pub skip_post_process: bool,
}

/// Text splitter configuration. Unset values come from the backend profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct SplitterConfig {
    pub max_chars: Option<usize>,
    pub min_merge_chars: Option<usize>,
}

/// Per-chunk retry configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub delay_ms: u64,
}

/// Transcript verification configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VerifyConfig {
    pub enabled: bool,
    /// Minimum similarity in percent (0-100).
    pub tolerance: f64,
    pub language: String,
    pub clipping_threshold: f32,
    /// Keep rejected attempts under `<job>/rejected/` for inspection.
    pub keep_rejected: bool,
    pub whisper_model: Option<PathBuf>,
    pub threads: Option<usize>,
    /// Program + arguments that read WAV on stdin and print a transcript.
    /// Used when no Whisper model is configured.
    pub transcribe_command: Vec<String>,
}

/// Final assembly configuration. Unset durations come from the backend profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AssemblyConfig {
    pub leading_pad_sec: Option<f64>,
    pub trailing_pad_sec: Option<f64>,
    pub inter_chunk_pause_sec: Option<f64>,
    pub front_pad_sec: Option<f64>,
    pub ffmpeg: String,
}

/// Job storage configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub projects_dir: PathBuf,
}

/// Fixed per-backend tuning: chunk sizes and silence durations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackendProfile {
    pub name: &'static str,
    pub max_chars: usize,
    pub min_merge_chars: usize,
    pub leading_pad_sec: f64,
    pub trailing_pad_sec: f64,
    pub inter_chunk_pause_sec: f64,
    pub front_pad_sec: f64,
}

pub const PROFILES: &[BackendProfile] = &[
    BackendProfile {
        name: "xtts",
        max_chars: 250,
        min_merge_chars: 30,
        leading_pad_sec: 0.5,
        trailing_pad_sec: 0.5,
        inter_chunk_pause_sec: 0.25,
        front_pad_sec: 0.0,
    },
    BackendProfile {
        name: "fish",
        max_chars: 250,
        min_merge_chars: 30,
        leading_pad_sec: 0.5,
        trailing_pad_sec: 0.5,
        inter_chunk_pause_sec: 0.2,
        front_pad_sec: 0.0,
    },
    BackendProfile {
        name: "kokoro",
        max_chars: 500,
        min_merge_chars: 40,
        leading_pad_sec: 0.5,
        trailing_pad_sec: 0.5,
        inter_chunk_pause_sec: 0.3,
        front_pad_sec: 0.15,
    },
];

/// Look up a backend profile by name (case-insensitive).
pub fn profile(name: &str) -> Option<&'static BackendProfile> {
    PROFILES.iter().find(|p| p.name.eq_ignore_ascii_case(name))
}

/// Splitter limits after profile fallback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitLimits {
    pub max_chars: usize,
    pub min_merge_chars: usize,
}

/// Silence durations after profile fallback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Padding {
    pub leading_sec: f64,
    pub trailing_sec: f64,
    pub inter_chunk_sec: f64,
    pub front_sec: f64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            name: defaults::DEFAULT_BACKEND.to_string(),
            synth_command: Vec::new(),
            post_command: Vec::new(),
            skip_post_process: false,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: defaults::MAX_RETRIES,
            delay_ms: defaults::RETRY_DELAY_MS,
        }
    }
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            tolerance: defaults::VERIFY_TOLERANCE,
            language: defaults::DEFAULT_LANGUAGE.to_string(),
            clipping_threshold: defaults::CLIPPING_THRESHOLD,
            keep_rejected: true,
            whisper_model: None,
            threads: None,
            transcribe_command: Vec::new(),
        }
    }
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            leading_pad_sec: None,
            trailing_pad_sec: None,
            inter_chunk_pause_sec: None,
            front_pad_sec: None,
            ffmpeg: defaults::FFMPEG_BIN.to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            projects_dir: base.join("longvox").join("projects"),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if the file doesn't exist
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e)
                if e.downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound) =>
            {
                Ok(Self::default())
            }
            Err(e) => Err(e.context(format!("Failed to load config from {}", path.display()))),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - LONGVOX_BACKEND → backend.name
    /// - LONGVOX_PROJECTS_DIR → storage.projects_dir
    /// - LONGVOX_MAX_RETRIES → retry.max_retries
    /// - LONGVOX_WHISPER_MODEL → verify.whisper_model
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(name) = std::env::var("LONGVOX_BACKEND")
            && !name.is_empty()
        {
            self.backend.name = name;
        }

        if let Ok(dir) = std::env::var("LONGVOX_PROJECTS_DIR")
            && !dir.is_empty()
        {
            self.storage.projects_dir = PathBuf::from(dir);
        }

        if let Ok(retries) = std::env::var("LONGVOX_MAX_RETRIES")
            && let Ok(retries) = retries.trim().parse::<u32>()
        {
            self.retry.max_retries = retries;
        }

        if let Ok(model) = std::env::var("LONGVOX_WHISPER_MODEL")
            && !model.is_empty()
        {
            self.verify.whisper_model = Some(PathBuf::from(model));
        }

        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/longvox/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("longvox")
            .join("config.toml")
    }

    /// The profile named by `backend.name`, falling back to the default profile.
    pub fn profile(&self) -> &'static BackendProfile {
        profile(&self.backend.name).unwrap_or(&PROFILES[0])
    }

    pub fn split_limits(&self) -> SplitLimits {
        let p = self.profile();
        SplitLimits {
            max_chars: self.splitter.max_chars.unwrap_or(p.max_chars),
            min_merge_chars: self.splitter.min_merge_chars.unwrap_or(p.min_merge_chars),
        }
    }

    pub fn padding(&self) -> Padding {
        let p = self.profile();
        Padding {
            leading_sec: self.assembly.leading_pad_sec.unwrap_or(p.leading_pad_sec),
            trailing_sec: self.assembly.trailing_pad_sec.unwrap_or(p.trailing_pad_sec),
            inter_chunk_sec: self
                .assembly
                .inter_chunk_pause_sec
                .unwrap_or(p.inter_chunk_pause_sec),
            front_sec: self.assembly.front_pad_sec.unwrap_or(p.front_pad_sec),
        }
    }

    /// Check value ranges the pipeline relies on.
    pub fn validate(&self) -> Result<()> {
        if self.split_limits().max_chars == 0 {
            return Err(invalid("splitter.max_chars", "must be greater than 0"));
        }
        if !(0.0..=100.0).contains(&self.verify.tolerance) {
            return Err(invalid("verify.tolerance", "must be between 0 and 100"));
        }
        if !(0.0..=1.0).contains(&self.verify.clipping_threshold) {
            return Err(invalid(
                "verify.clipping_threshold",
                "must be between 0.0 and 1.0",
            ));
        }
        let pad = self.padding();
        for (key, value) in [
            ("assembly.leading_pad_sec", pad.leading_sec),
            ("assembly.trailing_pad_sec", pad.trailing_sec),
            ("assembly.inter_chunk_pause_sec", pad.inter_chunk_sec),
            ("assembly.front_pad_sec", pad.front_sec),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(key, "must be a non-negative number of seconds"));
            }
        }
        Ok(())
    }
}

fn invalid(key: &str, message: &str) -> LongvoxError {
    LongvoxError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_longvox_env() {
        remove_env("LONGVOX_BACKEND");
        remove_env("LONGVOX_PROJECTS_DIR");
        remove_env("LONGVOX_MAX_RETRIES");
        remove_env("LONGVOX_WHISPER_MODEL");
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.backend.name, "xtts");
        assert!(config.backend.synth_command.is_empty());
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.delay_ms, 1000);
        assert!(!config.verify.enabled);
        assert_eq!(config.verify.tolerance, 80.0);
        assert_eq!(config.verify.clipping_threshold, 0.95);
        assert_eq!(config.assembly.ffmpeg, "ffmpeg");

        let limits = config.split_limits();
        assert_eq!(limits.max_chars, 250);
        assert_eq!(limits.min_merge_chars, 30);
    }

    #[test]
    fn test_profile_fallback_for_kokoro() {
        let mut config = Config::default();
        config.backend.name = "Kokoro".to_string();

        let limits = config.split_limits();
        assert_eq!(limits.max_chars, 500);
        assert_eq!(limits.min_merge_chars, 40);

        let pad = config.padding();
        assert_eq!(pad.inter_chunk_sec, 0.3);
        assert_eq!(pad.front_sec, 0.15);
        assert_eq!(pad.leading_sec, 0.5);
    }

    #[test]
    fn test_unknown_backend_uses_default_profile() {
        let mut config = Config::default();
        config.backend.name = "my-custom-model".to_string();
        assert_eq!(config.profile().name, "xtts");
    }

    #[test]
    fn test_explicit_values_override_profile() {
        let toml_content = r#"
            [backend]
            name = "fish"

            [splitter]
            max_chars = 180

            [assembly]
            inter_chunk_pause_sec = 0.75
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.split_limits().max_chars, 180);
        assert_eq!(config.split_limits().min_merge_chars, 30);
        assert_eq!(config.padding().inter_chunk_sec, 0.75);
        assert_eq!(config.padding().leading_sec, 0.5);
    }

    #[test]
    fn test_load_from_toml_file() {
        let toml_content = r#"
            [backend]
            name = "kokoro"
            synth_command = ["kokoro-cli", "--voice", "af_bella"]
            post_command = ["sox", "-t", "wav", "-", "-t", "wav", "-", "highpass", "80"]

            [retry]
            max_retries = 5
            delay_ms = 250

            [verify]
            enabled = true
            tolerance = 85.0
            language = "de"
            whisper_model = "/models/ggml-medium.bin"

            [storage]
            projects_dir = "/srv/longvox"
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.backend.name, "kokoro");
        assert_eq!(config.backend.synth_command[0], "kokoro-cli");
        assert_eq!(config.backend.post_command.len(), 9);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.delay_ms, 250);
        assert!(config.verify.enabled);
        assert_eq!(config.verify.tolerance, 85.0);
        assert_eq!(config.verify.language, "de");
        assert_eq!(
            config.verify.whisper_model,
            Some(PathBuf::from("/models/ggml-medium.bin"))
        );
        assert_eq!(config.storage.projects_dir, PathBuf::from("/srv/longvox"));
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"[retry\nmax_retries = ").unwrap();

        assert!(Config::load(temp_file.path()).is_err());
        assert!(Config::load_or_default(temp_file.path()).is_err());
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let missing_path = Path::new("/tmp/nonexistent_longvox_config_12345.toml");
        let config = Config::load_or_default(missing_path).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_validate_rejects_out_of_range_tolerance() {
        let mut config = Config::default();
        config.verify.tolerance = 120.0;
        match config.validate() {
            Err(LongvoxError::ConfigInvalidValue { key, .. }) => {
                assert_eq!(key, "verify.tolerance");
            }
            other => panic!("Expected ConfigInvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_negative_padding() {
        let mut config = Config::default();
        config.assembly.trailing_pad_sec = Some(-0.1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_max_chars() {
        let mut config = Config::default();
        config.splitter.max_chars = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_env_override_backend_and_retries() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_longvox_env();

        set_env("LONGVOX_BACKEND", "fish");
        set_env("LONGVOX_MAX_RETRIES", "7");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.backend.name, "fish");
        assert_eq!(config.retry.max_retries, 7);

        clear_longvox_env();
    }

    #[test]
    fn test_env_override_unparseable_retries_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_longvox_env();

        set_env("LONGVOX_MAX_RETRIES", "lots");
        let config = Config::default().with_env_overrides();
        assert_eq!(config.retry.max_retries, 3);

        clear_longvox_env();
    }

    #[test]
    fn test_env_override_empty_string_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_longvox_env();

        set_env("LONGVOX_PROJECTS_DIR", "");
        let config = Config::default().with_env_overrides();
        assert_eq!(config.storage, StorageConfig::default());

        clear_longvox_env();
    }

    #[test]
    fn test_default_path_is_xdg_compliant() {
        let path = Config::default_path();
        let path_str = path.to_string_lossy();
        assert!(path_str.contains("longvox"));
        assert!(path_str.ends_with("config.toml"));
    }
}
