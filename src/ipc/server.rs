//! Async Unix socket server for the job daemon.

use crate::error::{LongvoxError, Result};
use crate::ipc::protocol::{Command, Response};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;

/// Handler trait for processing IPC commands.
#[async_trait::async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, command: Command) -> Response;
}

#[async_trait::async_trait]
impl<H: CommandHandler + ?Sized> CommandHandler for Arc<H> {
    async fn handle(&self, command: Command) -> Response {
        (**self).handle(command).await
    }
}

#[derive(Debug, Clone)]
struct ServerState {
    shutdown: Arc<Mutex<bool>>,
}

impl ServerState {
    fn new() -> Self {
        Self {
            shutdown: Arc::new(Mutex::new(false)),
        }
    }

    async fn is_shutdown(&self) -> bool {
        *self.shutdown.lock().await
    }

    async fn set_shutdown(&self) {
        *self.shutdown.lock().await = true;
    }
}

pub struct IpcServer {
    socket_path: PathBuf,
    state: ServerState,
}

impl IpcServer {
    pub fn new(socket_path: PathBuf) -> Result<Self> {
        Ok(Self {
            socket_path,
            state: ServerState::new(),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// `$XDG_RUNTIME_DIR/longvox.sock`, or a per-user path under /tmp.
    pub fn default_socket_path() -> PathBuf {
        if let Ok(xdg_runtime) = std::env::var("XDG_RUNTIME_DIR") {
            PathBuf::from(xdg_runtime).join("longvox.sock")
        } else {
            let uid = unsafe { libc::getuid() };
            PathBuf::from(format!("/tmp/longvox-{}.sock", uid))
        }
    }

    /// Accept connections until [`IpcServer::stop`] is called.
    pub async fn start<H>(&self, handler: H) -> Result<()>
    where
        H: CommandHandler + 'static,
    {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| LongvoxError::IpcSocket {
                message: format!("Failed to remove existing socket: {}", e),
            })?;
        }

        let listener =
            UnixListener::bind(&self.socket_path).map_err(|e| LongvoxError::IpcSocket {
                message: format!("Failed to bind to socket: {}", e),
            })?;
        tracing::info!(socket = %self.socket_path.display(), "ipc server listening");

        let handler = Arc::new(handler);

        loop {
            if self.state.is_shutdown().await {
                break;
            }

            // Poll so a shutdown request is noticed without a new connection.
            let accept_result =
                tokio::time::timeout(tokio::time::Duration::from_millis(100), listener.accept())
                    .await;

            match accept_result {
                Ok(Ok((stream, _))) => {
                    let handler = Arc::clone(&handler);
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, handler).await {
                            tracing::warn!(error = %e, "ipc client error");
                        }
                    });
                }
                Ok(Err(e)) => {
                    return Err(LongvoxError::IpcConnection {
                        message: format!("Failed to accept connection: {}", e),
                    });
                }
                Err(_) => continue,
            }
        }

        Ok(())
    }

    /// Stop accepting connections and remove the socket file.
    pub async fn stop(&self) -> Result<()> {
        self.state.set_shutdown().await;

        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| LongvoxError::IpcSocket {
                message: format!("Failed to remove socket file: {}", e),
            })?;
        }

        Ok(())
    }
}

async fn handle_client<H>(stream: UnixStream, handler: Arc<H>) -> Result<()>
where
    H: CommandHandler,
{
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    reader
        .read_line(&mut line)
        .await
        .map_err(|e| LongvoxError::IpcConnection {
            message: format!("Failed to read from client: {}", e),
        })?;

    // A malformed request still gets an answer so the client can report it.
    let response = match Command::from_json(line.trim()) {
        Ok(command) => {
            tracing::debug!(?command, "ipc command");
            handler.handle(command).await
        }
        Err(e) => Response::Error {
            message: format!("Failed to parse command: {}", e),
        },
    };

    let mut response_json = response.to_json().map_err(|e| LongvoxError::IpcProtocol {
        message: format!("Failed to serialize response: {}", e),
    })?;
    response_json.push('\n');

    writer
        .write_all(response_json.as_bytes())
        .await
        .map_err(|e| LongvoxError::IpcConnection {
            message: format!("Failed to write to client: {}", e),
        })?;

    writer
        .flush()
        .await
        .map_err(|e| LongvoxError::IpcConnection {
            message: format!("Failed to flush writer: {}", e),
        })?;

    Ok(())
}
