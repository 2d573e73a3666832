//! Command handler implementation for the daemon.

use crate::error::{LongvoxError, Result};
use crate::ipc::protocol::{Command, Response};
use crate::ipc::server::CommandHandler;
use crate::job::JobParameters;
use crate::service::{JobService, RecoverStart};
use std::sync::Arc;
use tokio::sync::Notify;

/// Routes IPC commands to the job service.
pub struct DaemonCommandHandler {
    service: Arc<JobService>,
    shutdown: Arc<Notify>,
}

impl DaemonCommandHandler {
    pub fn new(service: Arc<JobService>, shutdown: Arc<Notify>) -> Self {
        Self { service, shutdown }
    }

    /// Service calls touch the disk and spawn threads, so keep them off the
    /// async workers.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&JobService) -> Result<T> + Send + 'static,
    {
        let service = Arc::clone(&self.service);
        tokio::task::spawn_blocking(move || f(&service))
            .await
            .map_err(|e| LongvoxError::Other(format!("service task failed: {}", e)))?
    }

    async fn create_job(
        &self,
        text: String,
        parameters: JobParameters,
        job_ref: Option<String>,
    ) -> Response {
        match self
            .blocking(move |s| s.create_job(&text, parameters, job_ref.as_deref()))
            .await
        {
            Ok(handle) => Response::JobCreated {
                job_id: handle.job_id,
                job_ref: handle.job_ref,
                total_chunks: handle.total_chunks,
            },
            Err(e) => error_response(e),
        }
    }

    async fn recover_job(&self, job_ref: String) -> Response {
        match self.blocking(move |s| s.recover_job(&job_ref)).await {
            Ok(RecoverStart::Started(handle)) => Response::RecoveryStarted {
                job_id: handle.job_id,
                job_ref: handle.job_ref,
                resume_index: handle.start_index,
                total_chunks: handle.total_chunks,
            },
            Ok(RecoverStart::AlreadyFinished {
                job_ref,
                final_file,
            }) => Response::AlreadyFinished {
                job_ref,
                final_file,
            },
            Err(e) => error_response(e),
        }
    }

    async fn job_status(&self, job: String) -> Response {
        match self.blocking(move |s| s.job_status(&job)).await {
            Ok(job) => Response::JobStatus { job: Box::new(job) },
            Err(e) => error_response(e),
        }
    }

    async fn cancel_job(&self, job: String) -> Response {
        match self.blocking(move |s| s.cancel_job(&job)).await {
            Ok(()) => Response::Ok,
            Err(e) => error_response(e),
        }
    }

    async fn list_jobs(&self) -> Response {
        match self.blocking(|s| s.list_jobs()).await {
            Ok(jobs) => Response::Jobs { jobs },
            Err(e) => error_response(e),
        }
    }
}

fn error_response(e: LongvoxError) -> Response {
    tracing::debug!(error = %e, "command failed");
    Response::Error {
        message: e.to_string(),
    }
}

#[async_trait::async_trait]
impl CommandHandler for DaemonCommandHandler {
    async fn handle(&self, command: Command) -> Response {
        match command {
            Command::CreateJob {
                text,
                parameters,
                job_ref,
            } => self.create_job(text, parameters, job_ref).await,
            Command::RecoverJob { job_ref } => self.recover_job(job_ref).await,
            Command::JobStatus { job } => self.job_status(job).await,
            Command::CancelJob { job } => self.cancel_job(job).await,
            Command::ListJobs => self.list_jobs().await,
            Command::Shutdown => {
                self.shutdown.notify_one();
                Response::Ok
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backends, ToneSynthesizer};
    use crate::config::Config;
    use crate::job::JobStatus;
    use std::time::Duration;
    use tempfile::TempDir;

    fn create_test_handler(dir: &TempDir) -> (DaemonCommandHandler, Arc<Notify>) {
        let mut config = Config::default();
        config.storage.projects_dir = dir.path().to_path_buf();
        config.retry.delay_ms = 0;
        let service = Arc::new(JobService::new(
            config,
            Backends::new(ToneSynthesizer::new(8000)),
        ));
        let shutdown = Arc::new(Notify::new());
        (
            DaemonCommandHandler::new(service, Arc::clone(&shutdown)),
            shutdown,
        )
    }

    async fn wait_for_status(handler: &DaemonCommandHandler, job: &str, want: JobStatus) {
        for _ in 0..200 {
            if let Response::JobStatus { job } = handler.handle(Command::JobStatus { job: job.into() }).await
                && job.status == want
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never reached {}", job, want);
    }

    #[tokio::test]
    async fn create_then_status_by_id() {
        let dir = TempDir::new().unwrap();
        let (handler, _) = create_test_handler(&dir);

        let response = handler
            .handle(Command::CreateJob {
                text: "A short story. It ends quickly.".into(),
                parameters: JobParameters::new(),
                job_ref: Some("story".into()),
            })
            .await;
        let job_id = match response {
            Response::JobCreated {
                job_id,
                job_ref,
                total_chunks,
            } => {
                assert_eq!(job_ref, "story");
                assert_eq!(total_chunks, 1);
                job_id
            }
            other => panic!("Expected JobCreated, got {:?}", other),
        };

        wait_for_status(&handler, &job_id.to_string(), JobStatus::Completed).await;

        match handler.handle(Command::RecoverJob { job_ref: "story".into() }).await {
            Response::AlreadyFinished { final_file, .. } => {
                assert_eq!(final_file.as_deref(), Some("story_final.wav"));
            }
            other => panic!("Expected AlreadyFinished, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn validation_errors_become_error_responses() {
        let dir = TempDir::new().unwrap();
        let (handler, _) = create_test_handler(&dir);
        match handler
            .handle(Command::CreateJob {
                text: "   ".into(),
                parameters: JobParameters::new(),
                job_ref: None,
            })
            .await
        {
            Response::Error { message } => assert!(message.contains("empty")),
            other => panic!("Expected Error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn unknown_job_status_and_cancel() {
        let dir = TempDir::new().unwrap();
        let (handler, _) = create_test_handler(&dir);
        assert!(matches!(
            handler.handle(Command::JobStatus { job: "ghost".into() }).await,
            Response::Error { .. }
        ));
        assert!(matches!(
            handler.handle(Command::CancelJob { job: "ghost".into() }).await,
            Response::Error { .. }
        ));
    }

    #[tokio::test]
    async fn list_jobs_on_empty_store() {
        let dir = TempDir::new().unwrap();
        let (handler, _) = create_test_handler(&dir);
        assert_eq!(
            handler.handle(Command::ListJobs).await,
            Response::Jobs { jobs: Vec::new() }
        );
    }

    #[tokio::test]
    async fn shutdown_notifies_daemon() {
        let dir = TempDir::new().unwrap();
        let (handler, shutdown) = create_test_handler(&dir);
        assert_eq!(handler.handle(Command::Shutdown).await, Response::Ok);
        tokio::time::timeout(Duration::from_secs(1), shutdown.notified())
            .await
            .unwrap();
    }
}
