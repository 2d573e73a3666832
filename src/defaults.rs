//! Default configuration constants for longvox.
//!
//! Backend-specific values live in [`crate::config::BackendProfile`]; everything here is
//! shared across backends.

/// Default backend profile name.
pub const DEFAULT_BACKEND: &str = "xtts";

/// Default maximum chunk length in characters.
///
/// 250 characters keeps a chunk well inside the context window of the common
/// sentence-level TTS models while still producing natural prosody.
pub const MAX_CHUNK_CHARS: usize = 250;

/// Chunks shorter than this are folded into their predecessor when they fit.
pub const MIN_MERGE_CHARS: usize = 30;

/// Retries per chunk after the first attempt.
pub const MAX_RETRIES: u32 = 3;

/// Pause between chunk attempts in milliseconds.
pub const RETRY_DELAY_MS: u64 = 1000;

/// Minimum transcript similarity, in percent, for a chunk to be accepted.
pub const VERIFY_TOLERANCE: f64 = 80.0;

/// Peak amplitude (fraction of full scale) above which a chunk counts as clipped.
pub const CLIPPING_THRESHOLD: f32 = 0.95;

/// Default language passed to the verifier.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Sample rate expected by Whisper.
pub const WHISPER_SAMPLE_RATE: u32 = 16000;

/// Ledger file name inside a job folder.
pub const LEDGER_FILE: &str = "job.json";

/// Folder inside a job folder that receives rejected chunk attempts.
pub const REJECTED_DIR: &str = "rejected";

/// Environment variable carrying job parameters (JSON) to command backends.
pub const PARAMS_ENV: &str = "LONGVOX_PARAMS";

/// Default ffmpeg binary used for non-WAV output.
pub const FFMPEG_BIN: &str = "ffmpeg";
