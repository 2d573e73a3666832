//! Error types for longvox.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LongvoxError {
    // Request errors (rejected before a job exists)
    #[error("Invalid request: {message}")]
    Validation { message: String },

    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Per-chunk generation errors (retried up to the job's retry budget)
    #[error("Synthesis failed: {message}")]
    Synthesis { message: String },

    #[error("Post-processing failed: {message}")]
    PostProcess { message: String },

    #[error("Transcription failed: {message}")]
    Transcription { message: String },

    #[error("Verification failed: {message}")]
    VerificationFailed { message: String },

    #[error("Whisper model not found at {path}")]
    ModelNotFound { path: String },

    #[error("Backend '{backend}' is not loaded")]
    BackendUnavailable { backend: String },

    // Job-level errors
    #[error("Chunk {index} failed after {retries} retries: {message}")]
    ChunkPermanentFailure {
        index: usize,
        retries: u32,
        message: String,
    },

    #[error("Unknown job: {job}")]
    JobNotFound { job: String },

    #[error("Job '{job_ref}' is already finished")]
    JobAlreadyFinished { job_ref: String },

    #[error("Job '{job_ref}' is already running")]
    JobBusy { job_ref: String },

    // Ledger errors
    #[error("No job ledger found at {path}")]
    LedgerNotFound { path: String },

    #[error("Job ledger at {path} is corrupted: {message}")]
    LedgerCorruption { path: String, message: String },

    // Audio errors
    #[error("Audio format mismatch: expected {expected}, got {actual}")]
    AudioFormatMismatch { expected: String, actual: String },

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Encoding to {format} failed: {message}")]
    Encode { format: String, message: String },

    // External tools
    #[error("External tool not found: {tool}")]
    ToolNotFound { tool: String },

    #[error("{tool} failed: {message}")]
    ToolFailed { tool: String, message: String },

    // IPC errors
    #[error("IPC socket error: {message}")]
    IpcSocket { message: String },

    #[error("IPC protocol error: {message}")]
    IpcProtocol { message: String },

    #[error("IPC connection failed: {message}")]
    IpcConnection { message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl LongvoxError {
    /// Whether a chunk attempt that hit this error may be tried again.
    ///
    /// Ledger, configuration and request errors are never retryable: repeating the
    /// attempt cannot change their outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LongvoxError::Synthesis { .. }
                | LongvoxError::PostProcess { .. }
                | LongvoxError::Transcription { .. }
                | LongvoxError::VerificationFailed { .. }
                | LongvoxError::BackendUnavailable { .. }
                | LongvoxError::AudioFormatMismatch { .. }
                | LongvoxError::Wav(_)
                | LongvoxError::ToolFailed { .. }
        )
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, LongvoxError>;
