//! Job and chunk records as persisted in the ledger.

use crate::audio::OutputFormat;
use crate::job::JobParameters;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    /// Stopped before all chunks were accepted (cancelled, interrupted, or
    /// assembly found a chunk missing). Resumable.
    Incomplete,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Incomplete => "incomplete",
        };
        f.write_str(s)
    }
}

/// Transcript check result attached to a chunk attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    pub transcript: String,
    pub similarity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
    pub char_length: usize,
    /// Deterministic artifact file name for this index.
    pub file: String,
    #[serde(default)]
    pub duration_sec: Option<f64>,
    /// Set once the chunk is accepted; never changes afterwards.
    #[serde(default)]
    pub artifact: Option<String>,
    #[serde(default)]
    pub verification_passed: Option<bool>,
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub similarity: Option<f64>,
    #[serde(default)]
    pub processing_error: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: Uuid,
    pub job_ref: String,
    pub backend: String,
    pub created_at: DateTime<Utc>,
    pub status: JobStatus,
    pub input_text: String,
    pub total_chunks: usize,
    pub chunks_completed: usize,
    #[serde(default)]
    pub total_duration_sec: Option<f64>,
    /// Sample rate of the first accepted chunk; later chunks are converted to it.
    #[serde(default)]
    pub sample_rate: Option<u32>,
    pub output_format: OutputFormat,
    pub final_stem: String,
    #[serde(default)]
    pub final_file: Option<String>,
    pub expected_files: Vec<String>,
    pub missing_files: Vec<String>,
    pub chunks: Vec<Chunk>,
    pub parameters: JobParameters,
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub failed_chunk: Option<usize>,
}

pub fn chunk_file_name(index: usize) -> String {
    format!("chunk_{:03}.wav", index)
}

pub fn final_file_name(stem: &str, format: OutputFormat) -> String {
    format!("{}_final.{}", stem, format.extension())
}

/// A path-like ref whose last segment has a suffix (`out/book.mp3`) names a
/// file: its parent is the job folder and its stem names the output.
pub fn file_target(job_ref: &str) -> Option<(&Path, &str)> {
    if !job_ref.contains(['/', '\\']) || job_ref.ends_with(['/', '\\']) {
        return None;
    }
    let path = Path::new(job_ref);
    path.extension()?;
    let folder = path.parent().filter(|p| !p.as_os_str().is_empty())?;
    Some((folder, path.file_stem()?.to_str()?))
}

impl Job {
    /// Create a running job whose chunk order is fixed from here on.
    pub fn new(
        job_ref: &str,
        backend: &str,
        input_text: &str,
        chunk_texts: Vec<String>,
        parameters: JobParameters,
        output_format: OutputFormat,
    ) -> Self {
        let final_stem = match file_target(job_ref) {
            Some((_, stem)) => stem,
            None => job_ref
                .trim_end_matches(['/', '\\'])
                .rsplit(['/', '\\'])
                .next()
                .filter(|s| !s.is_empty())
                .unwrap_or("output"),
        }
        .to_string();

        let chunks: Vec<Chunk> = chunk_texts
            .into_iter()
            .enumerate()
            .map(|(index, text)| Chunk {
                index,
                char_length: text.chars().count(),
                text,
                file: chunk_file_name(index),
                duration_sec: None,
                artifact: None,
                verification_passed: None,
                transcript: None,
                similarity: None,
                processing_error: None,
                retry_count: 0,
            })
            .collect();

        let mut expected_files: Vec<String> = chunks.iter().map(|c| c.file.clone()).collect();
        expected_files.push(final_file_name(&final_stem, output_format));

        Self {
            job_id: Uuid::new_v4(),
            job_ref: job_ref.to_string(),
            backend: backend.to_string(),
            created_at: Utc::now(),
            status: JobStatus::Running,
            input_text: input_text.to_string(),
            total_chunks: chunks.len(),
            chunks_completed: 0,
            total_duration_sec: None,
            sample_rate: None,
            output_format,
            final_stem,
            final_file: None,
            missing_files: expected_files.clone(),
            expected_files,
            chunks,
            parameters,
            failure_reason: None,
            failed_chunk: None,
        }
    }

    pub fn chunk(&self, index: usize) -> Option<&Chunk> {
        self.chunks.get(index)
    }

    pub fn final_file_name(&self) -> String {
        final_file_name(&self.final_stem, self.output_format)
    }

    pub fn is_finished(&self) -> bool {
        self.status == JobStatus::Completed
    }

    /// Record a failed attempt on chunk `index`.
    pub fn record_attempt_failure(
        &mut self,
        index: usize,
        message: String,
        verification: Option<Verification>,
    ) {
        let Some(chunk) = self.chunks.get_mut(index) else {
            return;
        };
        chunk.retry_count += 1;
        chunk.processing_error = Some(message);
        match verification {
            Some(v) => {
                chunk.verification_passed = Some(false);
                chunk.transcript = Some(v.transcript);
                chunk.similarity = Some(v.similarity);
            }
            None => {
                chunk.verification_passed = None;
                chunk.transcript = None;
                chunk.similarity = None;
            }
        }
    }

    /// Attach the accepted artifact to chunk `index`.
    ///
    /// Returns `false` without touching anything when the chunk already has one.
    pub fn record_acceptance(
        &mut self,
        index: usize,
        artifact: String,
        duration_sec: f64,
        verification: Option<Verification>,
    ) -> bool {
        let Some(chunk) = self.chunks.get_mut(index) else {
            return false;
        };
        if chunk.artifact.is_some() {
            return false;
        }
        chunk.artifact = Some(artifact);
        chunk.duration_sec = Some(duration_sec);
        chunk.verification_passed = Some(true);
        chunk.processing_error = None;
        if let Some(v) = verification {
            chunk.transcript = Some(v.transcript);
            chunk.similarity = Some(v.similarity);
        }
        true
    }

    /// Advance the completion counter past chunk `index`.
    pub fn complete_chunk(&mut self, index: usize) {
        self.chunks_completed = self.chunks_completed.max(index + 1).min(self.total_chunks);
        if let Some(chunk) = self.chunks.get(index) {
            let file = chunk.file.clone();
            self.missing_files.retain(|f| *f != file);
        }
    }

    /// Forget the accepted artifacts of chunks whose files are gone.
    ///
    /// Their files go back into `missing_files`. The counter stays where it is;
    /// [`Job::resume_index`] points at the first released chunk instead.
    pub fn release_artifacts(&mut self, indices: &[usize]) {
        for &index in indices {
            let Some(chunk) = self.chunks.get_mut(index) else {
                continue;
            };
            chunk.artifact = None;
            chunk.duration_sec = None;
            chunk.verification_passed = None;
            chunk.transcript = None;
            chunk.similarity = None;
            if !self.missing_files.contains(&chunk.file) {
                self.missing_files.push(chunk.file.clone());
            }
        }
        let order = &self.expected_files;
        self.missing_files
            .sort_by_key(|f| order.iter().position(|e| e == f).unwrap_or(usize::MAX));
    }

    /// First chunk a run has to (re)generate: a counted chunk whose artifact
    /// was released, else the completion counter.
    pub fn resume_index(&self) -> usize {
        self.chunks[..self.chunks_completed.min(self.chunks.len())]
            .iter()
            .position(|c| c.artifact.is_none())
            .unwrap_or(self.chunks_completed)
    }

    pub fn mark_running(&mut self) {
        self.status = JobStatus::Running;
        self.failure_reason = None;
        self.failed_chunk = None;
    }

    pub fn mark_failed(&mut self, index: usize, reason: String) {
        self.status = JobStatus::Failed;
        self.failure_reason = Some(reason);
        self.failed_chunk = Some(index);
    }

    pub fn mark_incomplete(&mut self) {
        self.status = JobStatus::Incomplete;
    }

    pub fn mark_completed(&mut self, final_file: String, total_duration_sec: f64) {
        self.status = JobStatus::Completed;
        self.final_file = Some(final_file);
        self.total_duration_sec = Some((total_duration_sec * 1000.0).round() / 1000.0);
        self.missing_files.clear();
        self.failure_reason = None;
        self.failed_chunk = None;
    }

    /// Structural checks a ledger record must pass to be trusted.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        if self.chunks.len() != self.total_chunks {
            return Err(format!(
                "total_chunks is {} but {} chunks are recorded",
                self.total_chunks,
                self.chunks.len()
            ));
        }
        if self.chunks_completed > self.total_chunks {
            return Err(format!(
                "chunks_completed ({}) exceeds total_chunks ({})",
                self.chunks_completed, self.total_chunks
            ));
        }
        for (position, chunk) in self.chunks.iter().enumerate() {
            if chunk.index != position {
                return Err(format!(
                    "chunk at position {} has index {}",
                    position, chunk.index
                ));
            }
            let accepted = chunk.verification_passed == Some(true);
            let consistent = chunk.artifact.is_some() && chunk.processing_error.is_none();
            if accepted != consistent {
                return Err(format!(
                    "chunk {} acceptance flag disagrees with its artifact/error",
                    chunk.index
                ));
            }
            if position < self.chunks_completed
                && chunk.artifact.is_none()
                && !self.missing_files.contains(&chunk.file)
            {
                return Err(format!(
                    "chunk {} is counted as completed but has no artifact",
                    chunk.index
                ));
            }
        }
        let completed = self.status == JobStatus::Completed;
        if completed != (self.final_file.is_some() && self.missing_files.is_empty()) {
            return Err("completed status disagrees with final_file/missing_files".to_string());
        }
        if (self.status == JobStatus::Failed) != self.failure_reason.is_some() {
            return Err("failed status disagrees with failure_reason".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(n: usize) -> Job {
        Job::new(
            "projects/my_book",
            "xtts",
            "input",
            (0..n).map(|i| format!("Chunk number {i}.")).collect(),
            JobParameters::new(),
            OutputFormat::Mp3,
        )
    }

    #[test]
    fn new_job_has_expected_layout() {
        let job = job(3);
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.total_chunks, 3);
        assert_eq!(job.final_stem, "my_book");
        assert_eq!(
            job.expected_files,
            vec![
                "chunk_000.wav",
                "chunk_001.wav",
                "chunk_002.wav",
                "my_book_final.mp3"
            ]
        );
        assert_eq!(job.missing_files, job.expected_files);
        assert_eq!(job.chunks[1].char_length, "Chunk number 1.".len());
        assert!(job.check_invariants().is_ok());
    }

    #[test]
    fn bare_ref_is_its_own_stem() {
        let job = Job::new("temp_ab12", "x", "t", vec!["t".into()], JobParameters::new(), OutputFormat::Wav);
        assert_eq!(job.final_file_name(), "temp_ab12_final.wav");
    }

    #[test]
    fn file_like_ref_uses_its_stem() {
        let job = Job::new("out/book.mp3", "x", "t", vec!["t".into()], JobParameters::new(), OutputFormat::Wav);
        assert_eq!(job.final_stem, "book");
        assert_eq!(job.final_file_name(), "book_final.wav");

        assert_eq!(file_target("out/book.mp3"), Some((Path::new("out"), "book")));
        assert_eq!(file_target("out/book"), None);
        assert_eq!(file_target("out/book.d/"), None);
        assert_eq!(file_target("book.mp3"), None);
    }

    #[test]
    fn acceptance_is_immutable() {
        let mut job = job(2);
        assert!(job.record_acceptance(0, "chunk_000.wav".into(), 1.5, None));
        assert!(!job.record_acceptance(0, "other.wav".into(), 9.0, None));
        assert_eq!(job.chunks[0].artifact.as_deref(), Some("chunk_000.wav"));
        assert_eq!(job.chunks[0].duration_sec, Some(1.5));
    }

    #[test]
    fn failure_then_acceptance_clears_error() {
        let mut job = job(1);
        job.record_attempt_failure(
            0,
            "Whisper similarity 0.500 < 0.80".into(),
            Some(Verification {
                transcript: "half".into(),
                similarity: 0.5,
            }),
        );
        assert_eq!(job.chunks[0].retry_count, 1);
        assert_eq!(job.chunks[0].verification_passed, Some(false));
        assert!(job.check_invariants().is_ok());

        job.record_acceptance(
            0,
            "chunk_000.wav".into(),
            2.0,
            Some(Verification {
                transcript: "chunk number 0".into(),
                similarity: 1.0,
            }),
        );
        let chunk = &job.chunks[0];
        assert_eq!(chunk.verification_passed, Some(true));
        assert_eq!(chunk.processing_error, None);
        assert_eq!(chunk.similarity, Some(1.0));
        assert_eq!(chunk.retry_count, 1);
        assert!(job.check_invariants().is_ok());
    }

    #[test]
    fn complete_chunk_is_monotonic_and_clears_missing() {
        let mut job = job(3);
        job.record_acceptance(0, "chunk_000.wav".into(), 1.0, None);
        job.complete_chunk(0);
        job.record_acceptance(1, "chunk_001.wav".into(), 1.0, None);
        job.complete_chunk(1);
        job.complete_chunk(0);
        assert_eq!(job.chunks_completed, 2);
        assert_eq!(job.missing_files, vec!["chunk_002.wav", "my_book_final.mp3"]);
    }

    #[test]
    fn released_artifact_becomes_resume_point() {
        let mut job = job(3);
        for i in 0..3 {
            job.record_acceptance(i, chunk_file_name(i), 1.0, None);
            job.complete_chunk(i);
        }
        assert_eq!(job.missing_files, vec!["my_book_final.mp3"]);

        assert_eq!(job.resume_index(), 3);
        job.release_artifacts(&[1]);
        assert_eq!(job.chunks_completed, 3);
        assert_eq!(job.resume_index(), 1);
        assert_eq!(job.missing_files, vec!["chunk_001.wav", "my_book_final.mp3"]);
        assert!(job.chunks[1].artifact.is_none());
        assert_eq!(job.chunks[1].verification_passed, None);
        assert!(job.chunks[2].artifact.is_some());
        assert!(job.check_invariants().is_ok());

        job.release_artifacts(&[1]);
        assert_eq!(job.missing_files.len(), 2);

        // A hole that is not listed as missing is not a trustworthy record.
        job.missing_files.retain(|f| f != "chunk_001.wav");
        assert!(job.check_invariants().is_err());
    }

    #[test]
    fn status_transitions_keep_invariants() {
        let mut job = job(1);
        job.mark_failed(0, "Permanently failed".into());
        assert_eq!(job.failed_chunk, Some(0));
        assert!(job.check_invariants().is_ok());

        job.mark_running();
        assert_eq!(job.failure_reason, None);
        assert!(job.check_invariants().is_ok());

        job.record_acceptance(0, "chunk_000.wav".into(), 1.0, None);
        job.complete_chunk(0);
        job.mark_completed("my_book_final.mp3".into(), 2.34567);
        assert_eq!(job.total_duration_sec, Some(2.346));
        assert!(job.missing_files.is_empty());
        assert!(job.check_invariants().is_ok());
    }

    #[test]
    fn invariant_violations_are_detected() {
        let mut j = job(2);
        j.chunks_completed = 3;
        assert!(j.check_invariants().is_err());

        let mut j = job(2);
        j.chunks_completed = 1;
        assert!(j.check_invariants().unwrap_err().contains("no artifact"));

        let mut j = job(2);
        j.status = JobStatus::Failed;
        assert!(j.check_invariants().is_err());

        let mut j = job(2);
        j.status = JobStatus::Completed;
        assert!(j.check_invariants().is_err());

        let mut j = job(2);
        j.chunks.swap(0, 1);
        assert!(j.check_invariants().is_err());
    }

    #[test]
    fn serializes_status_snake_case() {
        assert_eq!(
            serde_json::to_string(&JobStatus::Incomplete).unwrap(),
            "\"incomplete\""
        );
        let job = job(1);
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["status"], "running");
        assert_eq!(value["output_format"], "mp3");
        assert_eq!(value["chunks"][0]["file"], "chunk_000.wav");
    }
}
