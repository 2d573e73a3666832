//! Daemon mode: one job service behind a Unix socket.

pub mod handler;

use crate::backend::Backends;
use crate::config::Config;
use crate::error::{LongvoxError, Result};
use crate::ipc::server::IpcServer;
use crate::service::JobService;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;

/// Load backends, serve IPC until a signal or `shutdown` command, then stop
/// running jobs at their next chunk boundary.
pub async fn run_daemon(config: Config, socket_path: Option<PathBuf>, quiet: bool) -> Result<()> {
    if !quiet {
        eprintln!("Loading backend '{}'...", config.backend.name);
    }
    let backends = tokio::task::spawn_blocking({
        let config = config.clone();
        move || Backends::from_config(&config)
    })
    .await
    .map_err(|e| LongvoxError::Other(format!("backend loading task failed: {}", e)))??;

    if !quiet {
        eprintln!("Backend loaded. Projects in {}", config.storage.projects_dir.display());
    }

    let service = Arc::new(JobService::new(config, backends));
    let shutdown = Arc::new(Notify::new());

    let socket_path = socket_path.unwrap_or_else(IpcServer::default_socket_path);
    let server = Arc::new(IpcServer::new(socket_path)?);

    if !quiet {
        eprintln!(
            "IPC server listening at: {}",
            server.socket_path().display()
        );
        eprintln!("Daemon ready.");
    }

    let handler = handler::DaemonCommandHandler::new(Arc::clone(&service), Arc::clone(&shutdown));
    let server_clone = Arc::clone(&server);
    let server_handle = tokio::spawn(async move { server_clone.start(handler).await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            if !quiet {
                eprintln!("\nReceived SIGINT, shutting down...");
            }
        }
        res = wait_for_sigterm() => {
            if let Err(e) = res {
                eprintln!("Error setting up signal handler: {}", e);
            }
            if !quiet {
                eprintln!("\nReceived SIGTERM, shutting down...");
            }
        }
        _ = shutdown.notified() => {
            if !quiet {
                eprintln!("Shutdown requested, shutting down...");
            }
        }
    }

    server.stop().await?;

    match server_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => eprintln!("longvox: ipc server failed: {e}"),
        Err(e) => eprintln!("longvox: daemon server task failed: {e}"),
    }

    // Jobs stop at the next chunk boundary and stay recoverable.
    if let Err(e) = tokio::task::spawn_blocking(move || service.shutdown()).await {
        eprintln!("longvox: job shutdown failed: {e}");
    }

    if !quiet {
        eprintln!("Daemon stopped.");
    }

    Ok(())
}

/// Wait for SIGTERM (sent by service managers).
#[cfg(unix)]
async fn wait_for_sigterm() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| LongvoxError::Other(format!("Failed to register SIGTERM handler: {}", e)))?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_sigterm() -> Result<()> {
    std::future::pending::<()>().await;
    Ok(())
}
