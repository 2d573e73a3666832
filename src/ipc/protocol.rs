//! JSON message protocol between the CLI and the job daemon.
//!
//! One command per connection, one line of JSON each way.

use crate::job::{Job, JobParameters};
use crate::service::JobSummary;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Commands sent by the CLI to the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Split `text` into a new job and start it.
    CreateJob {
        text: String,
        #[serde(default)]
        parameters: JobParameters,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        job_ref: Option<String>,
    },
    /// Resume a failed, cancelled or interrupted job.
    RecoverJob { job_ref: String },
    /// Ledger record for a job id or job reference.
    JobStatus { job: String },
    /// Stop a running job before its next chunk.
    CancelJob { job: String },
    ListJobs,
    Shutdown,
}

impl Command {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Responses sent by the daemon to the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Ok,
    JobCreated {
        job_id: Uuid,
        job_ref: String,
        total_chunks: usize,
    },
    RecoveryStarted {
        job_id: Uuid,
        job_ref: String,
        resume_index: usize,
        total_chunks: usize,
    },
    AlreadyFinished {
        job_ref: String,
        final_file: Option<String>,
    },
    JobStatus {
        job: Box<Job>,
    },
    Jobs {
        jobs: Vec<JobSummary>,
    },
    Error {
        message: String,
    },
}

impl Response {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
