//! Durable job records.
//!
//! Every save rewrites the whole record. The file ledger does so through a
//! temp file and rename, so a crash mid-save leaves the previous record intact.

use crate::error::{LongvoxError, Result};
use crate::job::Job;
use crate::job::store::{JobStore, atomic_create, atomic_write};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Mutex;

/// Repository for job records, keyed by job reference.
pub trait JobLedger: Send + Sync {
    fn load(&self, job_ref: &str) -> Result<Job>;

    fn save(&self, job: &Job) -> Result<()>;

    /// Store the first record for a new job. Returns `false`, leaving the
    /// existing record alone, when `job.job_ref` is already taken.
    fn create(&self, job: &Job) -> Result<bool>;

    fn exists(&self, job_ref: &str) -> bool;
}

/// Pretty-printed `job.json` inside each job folder.
#[derive(Debug, Clone)]
pub struct FileLedger {
    store: JobStore,
}

impl FileLedger {
    pub fn new(store: JobStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }
}

fn parse_record(source: &str, contents: &str) -> Result<Job> {
    let job: Job =
        serde_json::from_str(contents).map_err(|e| LongvoxError::LedgerCorruption {
            path: source.to_string(),
            message: e.to_string(),
        })?;
    job.check_invariants()
        .map_err(|message| LongvoxError::LedgerCorruption {
            path: source.to_string(),
            message,
        })?;
    Ok(job)
}

impl JobLedger for FileLedger {
    fn load(&self, job_ref: &str) -> Result<Job> {
        let path = self.store.ledger_path(job_ref);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(LongvoxError::LedgerNotFound {
                    path: path.display().to_string(),
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                return Err(LongvoxError::LedgerCorruption {
                    path: path.display().to_string(),
                    message: e.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        parse_record(&path.display().to_string(), &contents)
    }

    fn save(&self, job: &Job) -> Result<()> {
        let path = self.store.ledger_path(&job.job_ref);
        let json = serde_json::to_vec_pretty(job)?;
        atomic_write(&path, &json)?;
        tracing::trace!(path = %path.display(), status = %job.status, "ledger saved");
        Ok(())
    }

    fn create(&self, job: &Job) -> Result<bool> {
        let path = self.store.ledger_path(&job.job_ref);
        let json = serde_json::to_vec_pretty(job)?;
        let created = atomic_create(&path, &json)?;
        tracing::trace!(path = %path.display(), created, "ledger claimed");
        Ok(created)
    }

    fn exists(&self, job_ref: &str) -> bool {
        self.store.ledger_path(job_ref).is_file()
    }
}

/// In-memory ledger holding serialized records, for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    records: Mutex<HashMap<String, String>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the raw record for `job_ref`, bypassing validation.
    pub fn put_raw(&self, job_ref: &str, contents: &str) -> Result<()> {
        self.records()?
            .insert(job_ref.to_string(), contents.to_string());
        Ok(())
    }

    fn records(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.records
            .lock()
            .map_err(|_| LongvoxError::Other("memory ledger lock poisoned".to_string()))
    }
}

impl JobLedger for MemoryLedger {
    fn load(&self, job_ref: &str) -> Result<Job> {
        let records = self.records()?;
        let contents = records
            .get(job_ref)
            .ok_or_else(|| LongvoxError::LedgerNotFound {
                path: job_ref.to_string(),
            })?;
        parse_record(job_ref, contents)
    }

    fn save(&self, job: &Job) -> Result<()> {
        let json = serde_json::to_string(job)?;
        self.records()?.insert(job.job_ref.clone(), json);
        Ok(())
    }

    fn create(&self, job: &Job) -> Result<bool> {
        let json = serde_json::to_string(job)?;
        match self.records()?.entry(job.job_ref.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(json);
                Ok(true)
            }
        }
    }

    fn exists(&self, job_ref: &str) -> bool {
        self.records()
            .map(|r| r.contains_key(job_ref))
            .unwrap_or(false)
    }
}
