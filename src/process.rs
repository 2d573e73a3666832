//! External process execution with a mockable seam.
//!
//! The `CommandExecutor` trait lets command-line backends and the ffmpeg
//! encoder be tested without spawning real processes.

use crate::error::{LongvoxError, Result};
use std::io::Write;
use std::process::{Command, Stdio};

/// Trait for executing external programs.
///
/// Object-safe, Send + Sync for use across job threads.
pub trait CommandExecutor: Send + Sync {
    /// Run `program` with `args`, feeding `stdin` (if any) and extra `env` vars.
    ///
    /// Returns the raw stdout on success. A missing program maps to
    /// `ToolNotFound`, a non-zero exit to `ToolFailed` carrying stderr.
    fn execute(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<&[u8]>,
        env: &[(String, String)],
    ) -> Result<Vec<u8>>;
}

/// Production command executor using std::process::Command.
#[derive(Debug, Clone, Default)]
pub struct SystemCommandExecutor;

impl SystemCommandExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl CommandExecutor for SystemCommandExecutor {
    fn execute(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<&[u8]>,
        env: &[(String, String)],
    ) -> Result<Vec<u8>> {
        let mut child = Command::new(program)
            .args(args)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    LongvoxError::ToolNotFound {
                        tool: program.to_string(),
                    }
                } else {
                    LongvoxError::ToolFailed {
                        tool: program.to_string(),
                        message: format!("failed to start: {}", e),
                    }
                }
            })?;

        let pipe = child.stdin.take();

        // stdin is written from a separate thread so a child that fills its
        // stdout pipe before draining stdin cannot deadlock us.
        let (output, write_result) = std::thread::scope(|s| {
            let writer = match (stdin, pipe) {
                (Some(bytes), Some(mut pipe)) => Some(s.spawn(move || pipe.write_all(bytes))),
                _ => None,
            };
            let output = child.wait_with_output();
            let write_result = match writer {
                Some(handle) => handle.join().unwrap_or_else(|_| {
                    Err(std::io::Error::other("stdin writer thread panicked"))
                }),
                None => Ok(()),
            };
            (output, write_result)
        });

        let output = output.map_err(|e| LongvoxError::ToolFailed {
            tool: program.to_string(),
            message: format!("failed to collect output: {}", e),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LongvoxError::ToolFailed {
                tool: program.to_string(),
                message: format!("exited with {}: {}", output.status, stderr.trim()),
            });
        }

        // A child may legitimately exit without reading all of stdin.
        if let Err(e) = write_result
            && e.kind() != std::io::ErrorKind::BrokenPipe
        {
            return Err(LongvoxError::ToolFailed {
                tool: program.to_string(),
                message: format!("failed to write stdin: {}", e),
            });
        }

        Ok(output.stdout)
    }
}
