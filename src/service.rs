//! Job lifecycle: create, recover, inspect, cancel.
//!
//! Each submitted job runs on its own named thread and reports its
//! [`JobOutcome`] over a channel. The ledger stays the source of truth for
//! status; the registry only tracks what is running in this process.

use crate::audio::OutputFormat;
use crate::backend::Backends;
use crate::config::Config;
use crate::error::{LongvoxError, Result};
use crate::job::{
    FileLedger, Job, JobLedger, JobParameters, JobStatus, JobStore, ParamView, Recovery, recover,
};
use crate::pipeline::{
    Assembler, CancelToken, ChunkWorker, JobOutcome, JobRunner, WorkerSettings,
};
use crate::process::{CommandExecutor, SystemCommandExecutor};
use crate::text::split;
use crossbeam_channel::{Receiver, bounded};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use uuid::Uuid;

/// Identity of a job that was just started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_id: Uuid,
    pub job_ref: String,
    pub total_chunks: usize,
    pub start_index: usize,
}

/// Result of asking to recover a job.
#[derive(Debug, Clone, PartialEq)]
pub enum RecoverStart {
    Started(JobHandle),
    AlreadyFinished {
        job_ref: String,
        final_file: Option<String>,
    },
}

/// One line of `list_jobs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: Uuid,
    pub job_ref: String,
    pub status: JobStatus,
    pub chunks_completed: usize,
    pub total_chunks: usize,
    /// Running in this process right now.
    pub active: bool,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.job_id,
            job_ref: job.job_ref.clone(),
            status: job.status,
            chunks_completed: job.chunks_completed,
            total_chunks: job.total_chunks,
            active: false,
        }
    }
}

struct ActiveJob {
    job_id: Uuid,
    cancel: CancelToken,
    result_rx: Receiver<Result<JobOutcome>>,
    thread: Option<JoinHandle<()>>,
}

impl ActiveJob {
    fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    fn join(mut self) -> Result<JobOutcome> {
        let received = self.result_rx.recv();
        if let Some(thread) = self.thread.take()
            && let Err(panic_info) = thread.join()
        {
            let msg = panic_info
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| panic_info.downcast_ref::<String>().map(|s| s.as_str()))
                .unwrap_or("unknown panic");
            return Err(LongvoxError::Other(format!("job thread panicked: {msg}")));
        }
        received.map_err(|_| LongvoxError::Other("job thread exited without a result".into()))?
    }
}

pub struct JobService {
    config: Config,
    backends: Backends,
    store: JobStore,
    ledger: Arc<dyn JobLedger>,
    executor: Arc<dyn CommandExecutor>,
    active: Mutex<HashMap<String, ActiveJob>>,
}

impl JobService {
    /// File-backed service rooted at the configured projects directory.
    pub fn new(config: Config, backends: Backends) -> Self {
        let store = JobStore::new(&config.storage.projects_dir);
        let ledger: Arc<dyn JobLedger> = Arc::new(FileLedger::new(store.clone()));
        Self::with_parts(
            config,
            backends,
            store,
            ledger,
            Arc::new(SystemCommandExecutor::new()),
        )
    }

    pub fn with_parts(
        config: Config,
        backends: Backends,
        store: JobStore,
        ledger: Arc<dyn JobLedger>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        Self {
            config,
            backends,
            store,
            ledger,
            executor,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    /// Validate, split and persist a new job without running it.
    pub fn prepare_job(
        &self,
        text: &str,
        parameters: JobParameters,
        job_ref: Option<&str>,
    ) -> Result<Job> {
        if text.trim().is_empty() {
            return Err(LongvoxError::Validation {
                message: "text must not be empty".to_string(),
            });
        }
        let view = ParamView::new(&parameters, &self.config);
        view.validate()?;
        let output_format = view.output_format()?;

        let chunks = split(text, self.config.split_limits());
        let requested = match job_ref.map(str::trim).filter(|r| !r.is_empty()) {
            Some(r) => Some(r.to_string()),
            None => view.save_path(),
        };
        let job = match requested {
            Some(job_ref) => {
                if self.is_active(&job_ref)? {
                    return Err(LongvoxError::JobBusy { job_ref });
                }
                let job = Job::new(
                    &job_ref,
                    &self.config.backend.name,
                    text,
                    chunks,
                    parameters,
                    output_format,
                );
                if !self.ledger.create(&job)? {
                    return Err(LongvoxError::Validation {
                        message: format!("job '{}' already exists; recover it instead", job_ref),
                    });
                }
                job
            }
            None => self.create_temp_job(text, chunks, parameters, output_format)?,
        };
        tracing::info!(
            job = %job.job_ref,
            job_id = %job.job_id,
            chunks = job.total_chunks,
            backend = %job.backend,
            "job created"
        );
        Ok(job)
    }

    /// Create a job and start it in the background. Returns as soon as the
    /// ledger exists.
    pub fn create_job(
        &self,
        text: &str,
        parameters: JobParameters,
        job_ref: Option<&str>,
    ) -> Result<JobHandle> {
        let job = self.prepare_job(text, parameters, job_ref)?;
        self.spawn(job, 0)
    }

    /// Create a job and run it to an outcome on the calling thread.
    pub fn run_blocking(
        &self,
        text: &str,
        parameters: JobParameters,
        job_ref: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<JobOutcome> {
        let mut job = self.prepare_job(text, parameters, job_ref)?;
        let runner = self.runner(&job.parameters)?;
        runner.run(&mut job, 0, cancel)
    }

    /// Resume `job_ref` in the background from its completion counter.
    pub fn recover_job(&self, job_ref: &str) -> Result<RecoverStart> {
        if self.is_active(job_ref)? {
            return Err(LongvoxError::JobBusy {
                job_ref: job_ref.to_string(),
            });
        }
        match recover(self.ledger.as_ref(), job_ref)? {
            Recovery::AlreadyFinished {
                job_ref,
                final_file,
            } => Ok(RecoverStart::AlreadyFinished {
                job_ref,
                final_file,
            }),
            Recovery::Resume(plan) => {
                let plan = *plan;
                self.spawn(plan.job, plan.resume_index)
                    .map(RecoverStart::Started)
            }
        }
    }

    /// Resume `job_ref` on the calling thread.
    ///
    /// A completed job yields `JobAlreadyFinished`.
    pub fn recover_blocking(&self, job_ref: &str, cancel: &CancelToken) -> Result<JobOutcome> {
        if self.is_active(job_ref)? {
            return Err(LongvoxError::JobBusy {
                job_ref: job_ref.to_string(),
            });
        }
        match recover(self.ledger.as_ref(), job_ref)? {
            Recovery::AlreadyFinished { job_ref, .. } => {
                Err(LongvoxError::JobAlreadyFinished { job_ref })
            }
            Recovery::Resume(plan) => {
                let mut plan = *plan;
                let runner = self.runner(&plan.parameters)?;
                runner.run(&mut plan.job, plan.resume_index, cancel)
            }
        }
    }

    /// Current ledger record for a job id or job reference.
    pub fn job_status(&self, job: &str) -> Result<Job> {
        let job_ref = self.resolve_ref(job)?;
        self.ledger.load(&job_ref).map_err(|e| match e {
            LongvoxError::LedgerNotFound { .. } => LongvoxError::JobNotFound {
                job: job.to_string(),
            },
            other => other,
        })
    }

    /// Ask a running job to stop before its next chunk.
    pub fn cancel_job(&self, job: &str) -> Result<()> {
        let job_ref = self.resolve_ref(job)?;
        let cancelled = self
            .active()?
            .get(&job_ref)
            .filter(|entry| !entry.is_finished())
            .map(|entry| {
                entry.cancel.cancel();
                entry.job_id
            });
        if let Some(job_id) = cancelled {
            tracing::info!(job = %job_ref, %job_id, "cancellation requested");
            return Ok(());
        }
        match self.ledger.load(&job_ref) {
            Ok(record) if record.is_finished() => Err(LongvoxError::JobAlreadyFinished { job_ref }),
            _ => Err(LongvoxError::JobNotFound {
                job: job.to_string(),
            }),
        }
    }

    /// Every job under the projects directory plus any running elsewhere.
    pub fn list_jobs(&self) -> Result<Vec<JobSummary>> {
        let mut refs = self.store.list_jobs()?;
        let running: Vec<String> = {
            let active = self.active()?;
            active
                .iter()
                .filter(|(_, entry)| !entry.is_finished())
                .map(|(job_ref, _)| job_ref.clone())
                .collect()
        };
        for job_ref in &running {
            if !refs.contains(job_ref) {
                refs.push(job_ref.clone());
            }
        }

        let mut summaries = Vec::with_capacity(refs.len());
        for job_ref in refs {
            match self.ledger.load(&job_ref) {
                Ok(job) => {
                    let mut summary = JobSummary::from(&job);
                    summary.active = running.contains(&job_ref);
                    summaries.push(summary);
                }
                Err(e) => tracing::warn!(job = %job_ref, error = %e, "skipping unreadable ledger"),
            }
        }
        Ok(summaries)
    }

    /// Block until the background run of `job` ends.
    pub fn wait(&self, job: &str) -> Result<JobOutcome> {
        let job_ref = self.resolve_ref(job)?;
        let entry = self
            .active()?
            .remove(&job_ref)
            .ok_or_else(|| LongvoxError::JobNotFound {
                job: job.to_string(),
            })?;
        entry.join()
    }

    /// Cancel every running job, wait for each to stop, then release the backends.
    pub fn shutdown(&self) {
        let entries: Vec<(String, ActiveJob)> = match self.active() {
            Ok(mut active) => active.drain().collect(),
            Err(e) => {
                tracing::error!(error = %e, "cannot drain job registry");
                return;
            }
        };
        for (_, entry) in &entries {
            entry.cancel.cancel();
        }
        for (job_ref, entry) in entries {
            match entry.join() {
                Ok(outcome) => tracing::info!(job = %job_ref, ?outcome, "job stopped"),
                Err(e) => tracing::warn!(job = %job_ref, error = %e, "job ended with error"),
            }
        }
        self.backends.unload_all();
    }

    fn runner(&self, parameters: &JobParameters) -> Result<JobRunner> {
        let settings = WorkerSettings::resolve(&self.config, parameters)?;
        let worker = ChunkWorker::new(
            self.backends.clone(),
            self.ledger.clone(),
            self.store.clone(),
            settings,
        );
        let assembler = Assembler::new(
            self.store.clone(),
            self.ledger.clone(),
            self.config.padding().into(),
            self.executor.clone(),
            self.config.assembly.ffmpeg.clone(),
        );
        Ok(JobRunner::new(worker, assembler, self.ledger.clone()))
    }

    fn spawn(&self, mut job: Job, start_index: usize) -> Result<JobHandle> {
        let runner = self.runner(&job.parameters)?;
        let cancel = CancelToken::new();
        let (result_tx, result_rx) = bounded(1);
        let handle = JobHandle {
            job_id: job.job_id,
            job_ref: job.job_ref.clone(),
            total_chunks: job.total_chunks,
            start_index,
        };

        let mut active = self.active()?;
        active.retain(|_, entry| !entry.is_finished());
        if active.contains_key(&job.job_ref) {
            return Err(LongvoxError::JobBusy {
                job_ref: job.job_ref.clone(),
            });
        }

        let thread_cancel = cancel.clone();
        let thread = std::thread::Builder::new()
            .name(format!("longvox-job-{}", job.final_stem))
            .spawn(move || {
                let result = runner.run(&mut job, start_index, &thread_cancel);
                if let Err(e) = &result {
                    tracing::error!(job = %job.job_ref, error = %e, "job run aborted");
                }
                let _ = result_tx.send(result);
            })?;

        active.insert(
            handle.job_ref.clone(),
            ActiveJob {
                job_id: handle.job_id,
                cancel,
                result_rx,
                thread: Some(thread),
            },
        );
        Ok(handle)
    }

    /// Map a job id to its reference; anything else is taken as a reference.
    fn resolve_ref(&self, job: &str) -> Result<String> {
        let Ok(id) = Uuid::parse_str(job) else {
            return Ok(job.to_string());
        };
        if let Some(job_ref) = self
            .active()?
            .iter()
            .find(|(_, entry)| entry.job_id == id)
            .map(|(job_ref, _)| job_ref.clone())
        {
            return Ok(job_ref);
        }
        for job_ref in self.store.list_jobs()? {
            if let Ok(record) = self.ledger.load(&job_ref)
                && record.job_id == id
            {
                return Ok(job_ref);
            }
        }
        Err(LongvoxError::JobNotFound {
            job: job.to_string(),
        })
    }

    fn is_active(&self, job_ref: &str) -> Result<bool> {
        Ok(self
            .active()?
            .get(job_ref)
            .is_some_and(|entry| !entry.is_finished()))
    }

    /// Claim `temp_<backend>_<unix-ts>`, suffixed while that name is taken.
    fn create_temp_job(
        &self,
        text: &str,
        chunks: Vec<String>,
        parameters: JobParameters,
        output_format: OutputFormat,
    ) -> Result<Job> {
        let base = format!(
            "temp_{}_{}",
            self.config.backend.name,
            chrono::Utc::now().timestamp()
        );
        for n in 1.. {
            let candidate = if n == 1 {
                base.clone()
            } else {
                format!("{}_{}", base, n)
            };
            if self.is_active(&candidate)? {
                continue;
            }
            let job = Job::new(
                &candidate,
                &self.config.backend.name,
                text,
                chunks.clone(),
                parameters.clone(),
                output_format,
            );
            if self.ledger.create(&job)? {
                return Ok(job);
            }
        }
        Err(LongvoxError::Other(format!("no free temp name under '{}'", base)))
    }

    fn active(&self) -> Result<MutexGuard<'_, HashMap<String, ActiveJob>>> {
        self.active
            .lock()
            .map_err(|_| LongvoxError::Other("job registry lock poisoned".to_string()))
    }
}

impl Drop for JobService {
    fn drop(&mut self) {
        if let Ok(active) = self.active.get_mut() {
            for entry in active.values() {
                entry.cancel.cancel();
            }
        }
    }
}
