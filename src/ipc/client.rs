//! IPC client for sending commands to the daemon.

use crate::error::{LongvoxError, Result};
use crate::ipc::protocol::{Command, Response};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

/// Send one command to the daemon and wait for its response.
///
/// # Errors
/// Returns `LongvoxError::IpcConnection` if the daemon cannot be reached and
/// `LongvoxError::IpcProtocol` if a message cannot be encoded or decoded.
pub async fn send_command(socket_path: &Path, command: Command) -> Result<Response> {
    let stream =
        UnixStream::connect(socket_path)
            .await
            .map_err(|e| LongvoxError::IpcConnection {
                message: format!("Failed to connect to daemon: {}", e),
            })?;

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let mut command_json = command.to_json().map_err(|e| LongvoxError::IpcProtocol {
        message: format!("Failed to serialize command: {}", e),
    })?;
    command_json.push('\n');

    writer
        .write_all(command_json.as_bytes())
        .await
        .map_err(|e| LongvoxError::IpcConnection {
            message: format!("Failed to write command: {}", e),
        })?;

    writer
        .flush()
        .await
        .map_err(|e| LongvoxError::IpcConnection {
            message: format!("Failed to flush writer: {}", e),
        })?;

    let mut response_line = String::new();
    reader
        .read_line(&mut response_line)
        .await
        .map_err(|e| LongvoxError::IpcConnection {
            message: format!("Failed to read response: {}", e),
        })?;

    Response::from_json(response_line.trim()).map_err(|e| LongvoxError::IpcProtocol {
        message: format!("Failed to deserialize response: {}", e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::server::{CommandHandler, IpcServer};
    use tempfile::TempDir;
    use uuid::Uuid;

    struct MockHandler;

    #[async_trait::async_trait]
    impl CommandHandler for MockHandler {
        async fn handle(&self, command: Command) -> Response {
            match command {
                Command::CreateJob { job_ref, .. } => Response::JobCreated {
                    job_id: Uuid::nil(),
                    job_ref: job_ref.unwrap_or_else(|| "temp_xtts_0".into()),
                    total_chunks: 3,
                },
                Command::RecoverJob { job_ref } => Response::AlreadyFinished {
                    job_ref,
                    final_file: Some("book_final.wav".into()),
                },
                Command::ListJobs => Response::Jobs { jobs: Vec::new() },
                _ => Response::Ok,
            }
        }
    }

    async fn serve(temp_dir: &TempDir) -> std::path::PathBuf {
        let socket_path = temp_dir.path().join("test.sock");
        let server_socket_path = socket_path.clone();
        tokio::spawn(async move {
            let server = IpcServer::new(server_socket_path).unwrap();
            server.start(MockHandler).await
        });
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        socket_path
    }

    #[tokio::test]
    async fn create_job_returns_identity() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = serve(&temp_dir).await;

        let response = send_command(
            &socket_path,
            Command::CreateJob {
                text: "Hello there.".into(),
                parameters: Default::default(),
                job_ref: Some("book".into()),
            },
        )
        .await
        .unwrap();
        assert_eq!(
            response,
            Response::JobCreated {
                job_id: Uuid::nil(),
                job_ref: "book".into(),
                total_chunks: 3
            }
        );
    }

    #[tokio::test]
    async fn sequential_commands_share_a_daemon() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = serve(&temp_dir).await;

        let recover = send_command(
            &socket_path,
            Command::RecoverJob {
                job_ref: "book".into(),
            },
        )
        .await
        .unwrap();
        assert!(matches!(recover, Response::AlreadyFinished { .. }));

        let list = send_command(&socket_path, Command::ListJobs).await.unwrap();
        assert_eq!(list, Response::Jobs { jobs: Vec::new() });

        let cancel = send_command(&socket_path, Command::CancelJob { job: "book".into() })
            .await
            .unwrap();
        assert_eq!(cancel, Response::Ok);
    }

    #[tokio::test]
    async fn missing_daemon_is_connection_error() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("nonexistent.sock");

        match send_command(&socket_path, Command::ListJobs).await {
            Err(LongvoxError::IpcConnection { message }) => {
                assert!(message.contains("Failed to connect to daemon"));
            }
            other => panic!("Expected IpcConnection error, got: {:?}", other),
        }
    }
}
