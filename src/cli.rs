//! Command-line interface for longvox
//!
//! Provides argument parsing using clap derive macros.

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

/// Crash-recoverable long-form text-to-speech
#[derive(Parser, Debug)]
#[command(name = "longvox", version, about = "Crash-recoverable long-form text-to-speech")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: info, -vv: debug, -vvv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Directory holding job folders (overrides config)
    #[arg(long, global = true, value_name = "DIR")]
    pub projects_dir: Option<PathBuf>,
}

/// Parse a retry delay. Bare numbers are milliseconds.
///
/// Anything else goes through `humantime` (`500ms`, `2s`, `1m30s`).
fn parse_delay(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(ms) = s.parse::<u64>() {
        return Ok(Duration::from_millis(ms));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Parse `key=value`. The value is read as JSON when it parses, else as a string.
fn parse_param(s: &str) -> Result<(String, Value), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty parameter name in '{}'", s));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Generation options shared by `run` and `submit`.
#[derive(Args, Debug, Clone, Default)]
pub struct JobArgs {
    /// Text file to speak, or '-' for stdin
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Job name or folder (default: temp_<backend>_<timestamp>)
    #[arg(long, value_name = "NAME")]
    pub job_ref: Option<String>,

    /// Output container (wav, mp3, ogg, flac, m4a)
    #[arg(long, value_name = "FORMAT")]
    pub format: Option<String>,

    /// Verify every chunk with speech-to-text
    #[arg(long)]
    pub verify: bool,

    /// Minimum transcript similarity in percent
    #[arg(long, value_name = "PERCENT")]
    pub tolerance: Option<f64>,

    /// Retries per chunk after the first attempt
    #[arg(long, value_name = "N")]
    pub retries: Option<u32>,

    /// Extra backend parameter, repeatable (e.g. --param speed=1.1)
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
    pub params: Vec<(String, Value)>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show how a text would be split into chunks
    Split {
        /// Text file, or '-' for stdin
        #[arg(value_name = "INPUT")]
        input: PathBuf,
        /// Maximum characters per chunk (default: backend profile)
        #[arg(long, value_name = "N")]
        max_chars: Option<usize>,
        /// Merge chunks shorter than this into their predecessor
        #[arg(long, value_name = "N")]
        min_merge_chars: Option<usize>,
        /// Print chunks as a JSON array
        #[arg(long)]
        json: bool,
    },

    /// Create a job and run it in the foreground
    Run {
        #[command(flatten)]
        job: JobArgs,
        /// Pause between retries (e.g. 500ms, 2s)
        #[arg(long, value_name = "DURATION", value_parser = parse_delay)]
        retry_delay: Option<Duration>,
    },

    /// Resume a failed or interrupted job from its last completed chunk
    Recover {
        /// Job name or folder
        job_ref: String,
        /// Pause between retries (e.g. 500ms, 2s)
        #[arg(long, value_name = "DURATION", value_parser = parse_delay)]
        retry_delay: Option<Duration>,
        /// Ask a running daemon to resume it instead
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Show a job's ledger, or list all jobs
    Status {
        /// Job id or name (omit to list every job)
        job: Option<String>,
        /// Print the raw ledger record
        #[arg(long)]
        json: bool,
    },

    /// Start the daemon (foreground process for service managers)
    Daemon {
        /// Path to Unix socket (default: $XDG_RUNTIME_DIR/longvox.sock)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Submit a job to the daemon and return immediately
    Submit {
        #[command(flatten)]
        job: JobArgs,
        /// Path to Unix socket (default: $XDG_RUNTIME_DIR/longvox.sock)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Cancel a daemon job before its next chunk
    Cancel {
        /// Job id or name
        job: String,
        /// Path to Unix socket (default: $XDG_RUNTIME_DIR/longvox.sock)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Ask the daemon for a job's status (omit the job to list all)
    JobStatus {
        /// Job id or name
        job: Option<String>,
        /// Path to Unix socket (default: $XDG_RUNTIME_DIR/longvox.sock)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn subcommand_is_required() {
        let err = Cli::try_parse_from(["longvox"]).unwrap_err();
        assert_eq!(
            err.kind(),
            clap::error::ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
        );
    }

    #[test]
    fn parse_verbose_and_quiet() {
        let cli = Cli::try_parse_from(["longvox", "-vv", "status"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(!cli.quiet);

        let cli = Cli::try_parse_from(["longvox", "status", "-q"]).unwrap();
        assert!(cli.quiet);
    }

    #[test]
    fn parse_split() {
        let cli =
            Cli::try_parse_from(["longvox", "split", "book.txt", "--max-chars", "120", "--json"])
                .unwrap();
        match cli.command {
            Commands::Split {
                input,
                max_chars,
                min_merge_chars,
                json,
            } => {
                assert_eq!(input, PathBuf::from("book.txt"));
                assert_eq!(max_chars, Some(120));
                assert_eq!(min_merge_chars, None);
                assert!(json);
            }
            other => panic!("Expected Split, got {:?}", other),
        }
    }

    #[test]
    fn parse_run_with_params() {
        let cli = Cli::try_parse_from([
            "longvox",
            "run",
            "-",
            "--job-ref",
            "novel",
            "--format",
            "mp3",
            "--verify",
            "--tolerance",
            "85",
            "--param",
            "speed=1.1",
            "--param",
            "voice=narrator.wav",
            "--retry-delay",
            "2s",
        ])
        .unwrap();
        match cli.command {
            Commands::Run { job, retry_delay } => {
                assert_eq!(job.input, PathBuf::from("-"));
                assert_eq!(job.job_ref.as_deref(), Some("novel"));
                assert_eq!(job.format.as_deref(), Some("mp3"));
                assert!(job.verify);
                assert_eq!(job.tolerance, Some(85.0));
                assert_eq!(
                    job.params,
                    vec![
                        ("speed".to_string(), json!(1.1)),
                        ("voice".to_string(), json!("narrator.wav")),
                    ]
                );
                assert_eq!(retry_delay, Some(Duration::from_secs(2)));
            }
            other => panic!("Expected Run, got {:?}", other),
        }
    }

    #[test]
    fn parse_recover_via_daemon() {
        let cli =
            Cli::try_parse_from(["longvox", "recover", "novel", "--socket", "/tmp/l.sock"]).unwrap();
        match cli.command {
            Commands::Recover {
                job_ref, socket, ..
            } => {
                assert_eq!(job_ref, "novel");
                assert_eq!(socket, Some(PathBuf::from("/tmp/l.sock")));
            }
            other => panic!("Expected Recover, got {:?}", other),
        }
    }

    #[test]
    fn parse_daemon_commands() {
        assert!(matches!(
            Cli::try_parse_from(["longvox", "daemon"]).unwrap().command,
            Commands::Daemon { socket: None }
        ));
        assert!(matches!(
            Cli::try_parse_from(["longvox", "cancel", "novel"]).unwrap().command,
            Commands::Cancel { .. }
        ));
        assert!(matches!(
            Cli::try_parse_from(["longvox", "job-status"]).unwrap().command,
            Commands::JobStatus { job: None, .. }
        ));
        assert!(matches!(
            Cli::try_parse_from(["longvox", "submit", "book.txt"]).unwrap().command,
            Commands::Submit { .. }
        ));
    }

    #[test]
    fn parse_config_and_completions() {
        assert!(matches!(
            Cli::try_parse_from(["longvox", "config", "show"]).unwrap().command,
            Commands::Config {
                action: ConfigAction::Show
            }
        ));
        assert!(matches!(
            Cli::try_parse_from(["longvox", "completions", "bash"]).unwrap().command,
            Commands::Completions { shell: Shell::Bash }
        ));
    }

    #[test]
    fn global_projects_dir_after_command() {
        let cli = Cli::try_parse_from(["longvox", "status", "--projects-dir", "/srv/tts"]).unwrap();
        assert_eq!(cli.projects_dir, Some(PathBuf::from("/srv/tts")));
    }

    #[test]
    fn delay_parsing() {
        assert_eq!(parse_delay("250"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_delay("1m30s"), Ok(Duration::from_secs(90)));
        assert!(parse_delay("soon").is_err());
    }

    #[test]
    fn param_parsing() {
        assert_eq!(parse_param("n=3"), Ok(("n".into(), json!(3))));
        assert_eq!(parse_param("flag=true"), Ok(("flag".into(), json!(true))));
        assert_eq!(parse_param("name=Ada"), Ok(("name".into(), json!("Ada"))));
        assert_eq!(parse_param("eq=a=b"), Ok(("eq".into(), json!("a=b"))));
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=1").is_err());
    }
}
