//! Rehydrating a run from a previously written ledger.
//!
//! The completion counter is the single source of truth. Chunk files on disk
//! that the ledger never accepted are regenerated, so a half-written artifact
//! from an interrupted attempt is never trusted. A counted chunk whose artifact
//! was released because its file disappeared is regenerated first.

use crate::error::Result;
use crate::job::{Job, JobLedger, JobParameters, JobStatus};

/// Starting state for resuming a job.
#[derive(Debug, Clone)]
pub struct RecoveryPlan {
    pub job: Job,
    pub resume_index: usize,
    pub chunk_texts: Vec<String>,
    pub parameters: JobParameters,
}

#[derive(Debug, Clone)]
pub enum Recovery {
    Resume(Box<RecoveryPlan>),
    /// The job already completed; nothing to do.
    AlreadyFinished {
        job_ref: String,
        final_file: Option<String>,
    },
}

/// Read the ledger for `job_ref` and compute where to resume.
pub fn recover(ledger: &dyn JobLedger, job_ref: &str) -> Result<Recovery> {
    let job = ledger.load(job_ref)?;

    if job.status == JobStatus::Completed {
        tracing::info!(job = %job_ref, "job already finished; nothing to recover");
        return Ok(Recovery::AlreadyFinished {
            job_ref: job.job_ref,
            final_file: job.final_file,
        });
    }

    let resume_index = job.resume_index();
    tracing::info!(
        job = %job_ref,
        resume_index,
        total = job.total_chunks,
        status = %job.status,
        "recovering job"
    );

    Ok(Recovery::Resume(Box::new(RecoveryPlan {
        resume_index,
        chunk_texts: job.chunks.iter().map(|c| c.text.clone()).collect(),
        parameters: job.parameters.clone(),
        job,
    })))
}
