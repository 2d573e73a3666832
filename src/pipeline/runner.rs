//! Sequential job driver: chunks in order, then assembly.

use crate::error::Result;
use crate::job::{Job, JobLedger};
use crate::pipeline::assembler::{Assembler, AssemblyOutcome};
use crate::pipeline::cancel::CancelToken;
use crate::pipeline::worker::{ChunkOutcome, ChunkWorker};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed {
        job_ref: String,
        final_path: PathBuf,
        duration_sec: f64,
    },
    Failed {
        job_ref: String,
        failed_chunk: usize,
        reason: String,
        /// Pass to `recover` to resume from the failed chunk.
        recover_token: String,
    },
    Cancelled {
        job_ref: String,
        chunks_completed: usize,
    },
    Incomplete {
        job_ref: String,
        missing: Vec<String>,
    },
}

impl JobOutcome {
    pub fn job_ref(&self) -> &str {
        match self {
            JobOutcome::Completed { job_ref, .. }
            | JobOutcome::Failed { job_ref, .. }
            | JobOutcome::Cancelled { job_ref, .. }
            | JobOutcome::Incomplete { job_ref, .. } => job_ref,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, JobOutcome::Completed { .. })
    }
}

pub struct JobRunner {
    worker: ChunkWorker,
    assembler: Assembler,
    ledger: Arc<dyn JobLedger>,
}

impl JobRunner {
    pub fn new(worker: ChunkWorker, assembler: Assembler, ledger: Arc<dyn JobLedger>) -> Self {
        Self {
            worker,
            assembler,
            ledger,
        }
    }

    /// Process chunks `start_index..` in order and assemble once all are accepted.
    ///
    /// If assembly finds accepted artifacts gone from disk, the released chunks
    /// are regenerated once before the job is left `Incomplete`.
    ///
    /// `Err` means the ledger or storage failed; everything else is a `JobOutcome`.
    pub fn run(&self, job: &mut Job, start_index: usize, cancel: &CancelToken) -> Result<JobOutcome> {
        job.mark_running();
        self.ledger.save(job)?;
        tracing::info!(
            job = %job.job_ref,
            job_id = %job.job_id,
            start_index,
            total = job.total_chunks,
            "job run started"
        );

        let mut start = start_index;
        let mut regenerated = false;
        loop {
            if let Some(outcome) = self.process_from(job, start, cancel)? {
                return Ok(outcome);
            }

            match self.assembler.assemble(job)? {
                AssemblyOutcome::Completed {
                    final_path,
                    duration_sec,
                } => {
                    return Ok(JobOutcome::Completed {
                        job_ref: job.job_ref.clone(),
                        final_path,
                        duration_sec,
                    });
                }
                AssemblyOutcome::Incomplete { missing } => {
                    if !regenerated && job.resume_index() < job.total_chunks {
                        regenerated = true;
                        start = job.resume_index();
                        tracing::info!(job = %job.job_ref, ?missing, start, "regenerating lost chunks");
                        continue;
                    }
                    job.mark_incomplete();
                    self.ledger.save(job)?;
                    return Ok(JobOutcome::Incomplete {
                        job_ref: job.job_ref.clone(),
                        missing,
                    });
                }
            }
        }
    }

    /// Run chunks `start..` through the worker. `Some` is an early stop.
    fn process_from(
        &self,
        job: &mut Job,
        start: usize,
        cancel: &CancelToken,
    ) -> Result<Option<JobOutcome>> {
        for index in start..job.total_chunks {
            if cancel.is_cancelled() {
                job.mark_incomplete();
                self.ledger.save(job)?;
                tracing::info!(job = %job.job_ref, chunks_completed = job.chunks_completed, "job cancelled");
                return Ok(Some(JobOutcome::Cancelled {
                    job_ref: job.job_ref.clone(),
                    chunks_completed: job.chunks_completed,
                }));
            }

            match self.worker.process(job, index)? {
                ChunkOutcome::Accepted { .. } => {
                    job.complete_chunk(index);
                    self.ledger.save(job)?;
                    tracing::info!(
                        job = %job.job_ref,
                        progress = format!("{}/{}", job.chunks_completed, job.total_chunks),
                        "chunk complete"
                    );
                }
                ChunkOutcome::Failed { reason, attempts } => {
                    job.mark_failed(index, reason.clone());
                    self.ledger.save(job)?;
                    tracing::error!(job = %job.job_ref, chunk = index, attempts, %reason, "job failed");
                    return Ok(Some(JobOutcome::Failed {
                        job_ref: job.job_ref.clone(),
                        failed_chunk: index,
                        reason,
                        recover_token: job.job_ref.clone(),
                    }));
                }
            }
        }
        Ok(None)
    }
}
