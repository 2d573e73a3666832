//! Structured logging setup.
//!
//! Library code logs through `tracing`; the binary installs a subscriber here.
//! - `RUST_LOG` overrides the level derived from `-v` flags
//! - `LONGVOX_LOG_FORMAT=json` switches to JSON lines

use tracing_subscriber::EnvFilter;

/// Map CLI verbosity to a default filter directive.
fn default_directive(quiet: bool, verbosity: u8) -> &'static str {
    if quiet {
        return "longvox=error";
    }
    match verbosity {
        0 => "longvox=warn",
        1 => "longvox=info",
        2 => "longvox=debug",
        _ => "longvox=trace",
    }
}

/// Initialize the global tracing subscriber.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init(quiet: bool, verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(quiet, verbosity)));

    let is_json = std::env::var("LONGVOX_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if is_json {
        let _ = subscriber.json().try_init();
    } else {
        let _ = subscriber.try_init();
    }
}
