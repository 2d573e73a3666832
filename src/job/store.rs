//! On-disk layout of job folders.
//!
//! ```text
//! <job folder>/
//!   job.json                      ledger
//!   chunk_000.wav ...             accepted chunk artifacts
//!   rejected/chunk_003_attempt1.wav
//!   <stem>_final.<ext>            assembled output
//! ```

use crate::audio::{AudioClip, decode_wav, encode_wav};
use crate::defaults::{LEDGER_FILE, REJECTED_DIR};
use crate::error::{LongvoxError, Result};
use crate::job::model::{chunk_file_name, file_target};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Resolves job references to folders and owns artifact I/O inside them.
#[derive(Debug, Clone)]
pub struct JobStore {
    projects_dir: PathBuf,
}

impl JobStore {
    pub fn new(projects_dir: impl Into<PathBuf>) -> Self {
        Self {
            projects_dir: projects_dir.into(),
        }
    }

    pub fn projects_dir(&self) -> &Path {
        &self.projects_dir
    }

    /// A bare name lives under the projects directory. A path is used as-is,
    /// unless it names a file (`out/book.mp3`), which puts the job in `out`.
    pub fn job_dir(&self, job_ref: &str) -> PathBuf {
        if let Some((folder, _)) = file_target(job_ref) {
            return folder.to_path_buf();
        }
        let path = Path::new(job_ref);
        if path.is_absolute() || job_ref.contains(['/', '\\']) {
            path.to_path_buf()
        } else {
            self.projects_dir.join(job_ref)
        }
    }

    pub fn ledger_path(&self, job_ref: &str) -> PathBuf {
        self.job_dir(job_ref).join(LEDGER_FILE)
    }

    pub fn artifact_path(&self, job_ref: &str, file: &str) -> PathBuf {
        self.job_dir(job_ref).join(file)
    }

    pub fn rejected_path(&self, job_ref: &str, index: usize, attempt: u32) -> PathBuf {
        self.job_dir(job_ref)
            .join(REJECTED_DIR)
            .join(format!("chunk_{:03}_attempt{}.wav", index, attempt))
    }

    /// Atomically write chunk `index`, returning the artifact reference.
    pub fn write_chunk(&self, job_ref: &str, index: usize, clip: &AudioClip) -> Result<String> {
        let file = chunk_file_name(index);
        let bytes = encode_wav(clip)?;
        atomic_write(&self.artifact_path(job_ref, &file), &bytes)?;
        Ok(file)
    }

    /// Read an artifact, or `None` if it does not exist.
    pub fn read_chunk(&self, job_ref: &str, file: &str) -> Result<Option<AudioClip>> {
        match fs::read(self.artifact_path(job_ref, file)) {
            Ok(bytes) => Ok(Some(decode_wav(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Keep a rejected attempt for inspection.
    pub fn preserve_rejected(
        &self,
        job_ref: &str,
        index: usize,
        attempt: u32,
        clip: &AudioClip,
    ) -> Result<PathBuf> {
        let path = self.rejected_path(job_ref, index, attempt);
        atomic_write(&path, &encode_wav(clip)?)?;
        Ok(path)
    }

    /// Names of job folders under the projects directory that hold a ledger.
    pub fn list_jobs(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.projects_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut jobs = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.path().join(LEDGER_FILE).is_file()
                && let Some(name) = entry.file_name().to_str()
            {
                jobs.push(name.to_string());
            }
        }
        jobs.sort();
        Ok(jobs)
    }
}

/// Write `bytes` to `path` via a synced temp file and rename.
///
/// Readers see either the previous content or the new content, never a torn file.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = parent_dir(path)?;
    let tmp = parent.join(format!(".{}.tmp", file_name(path)));
    write_synced(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    sync_parent_dir(parent)?;
    Ok(())
}

/// Like [`atomic_write`], but only when `path` does not exist yet.
///
/// The temp file is hard-linked into place, which fails instead of replacing
/// an existing file, so exactly one of several racing callers gets `true`.
pub fn atomic_create(path: &Path, bytes: &[u8]) -> Result<bool> {
    let parent = parent_dir(path)?;
    let tmp = parent.join(format!(".{}.{}.tmp", file_name(path), Uuid::new_v4().simple()));
    write_synced(&tmp, bytes)?;
    let linked = fs::hard_link(&tmp, path);
    if let Err(e) = fs::remove_file(&tmp) {
        tracing::warn!(path = %tmp.display(), error = %e, "could not remove temp file");
    }
    match linked {
        Ok(()) => {
            sync_parent_dir(parent)?;
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn parent_dir(path: &Path) -> Result<&Path> {
    let parent = path.parent().ok_or_else(|| {
        LongvoxError::Other(format!("{} has no parent directory", path.display()))
    })?;
    fs::create_dir_all(parent)?;
    Ok(parent)
}

fn file_name(path: &Path) -> &str {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("artifact")
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.flush()?;
    file.sync_all()?;
    Ok(())
}

fn sync_parent_dir(parent: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        let dir = fs::File::open(parent)?;
        dir.sync_all()?;
    }
    #[cfg(not(unix))]
    let _ = parent;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn bare_ref_resolves_under_projects_dir() {
        let store = JobStore::new("/data/projects");
        assert_eq!(store.job_dir("book"), PathBuf::from("/data/projects/book"));
        assert_eq!(
            store.ledger_path("book"),
            PathBuf::from("/data/projects/book/job.json")
        );
    }

    #[test]
    fn path_ref_is_used_as_is() {
        let store = JobStore::new("/data/projects");
        assert_eq!(store.job_dir("/elsewhere/book"), PathBuf::from("/elsewhere/book"));
        assert_eq!(store.job_dir("rel/book"), PathBuf::from("rel/book"));
    }

    #[test]
    fn path_ref_naming_a_file_resolves_to_its_folder() {
        let store = JobStore::new("/data/projects");
        assert_eq!(store.job_dir("/out/book.mp3"), PathBuf::from("/out"));
        assert_eq!(
            store.ledger_path("rel/book.wav"),
            PathBuf::from("rel/job.json")
        );
        assert_eq!(store.job_dir("book.mp3"), PathBuf::from("/data/projects/book.mp3"));
    }

    #[test]
    fn rejected_path_is_named_by_index_and_attempt() {
        let store = JobStore::new("/p");
        assert_eq!(
            store.rejected_path("b", 3, 2),
            PathBuf::from("/p/b/rejected/chunk_003_attempt2.wav")
        );
    }

    #[test]
    fn chunk_write_and_read() {
        let dir = tempdir().unwrap();
        let store = JobStore::new(dir.path());
        let clip = AudioClip::new(vec![1, 2, 3], 22050);

        let file = store.write_chunk("book", 7, &clip).unwrap();
        assert_eq!(file, "chunk_007.wav");
        assert_eq!(store.read_chunk("book", &file).unwrap(), Some(clip));
        assert_eq!(store.read_chunk("book", "chunk_008.wav").unwrap(), None);
    }

    #[test]
    fn atomic_create_never_replaces() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("claim").join("job.json");
        assert!(atomic_create(&path, b"first").unwrap());
        assert!(!atomic_create(&path, b"second").unwrap());
        assert_eq!(fs::read(&path).unwrap(), b"first");
        let leftovers = fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn atomic_write_replaces_and_leaves_no_temp() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("job.json");
        atomic_write(&path, b"first").unwrap();
        atomic_write(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
        assert!(!path.parent().unwrap().join(".job.json.tmp").exists());
    }

    #[test]
    fn preserve_rejected_writes_side_file() {
        let dir = tempdir().unwrap();
        let store = JobStore::new(dir.path());
        let path = store
            .preserve_rejected("book", 0, 1, &AudioClip::new(vec![9], 16000))
            .unwrap();
        assert!(path.ends_with("rejected/chunk_000_attempt1.wav"));
        assert!(path.is_file());
    }

    #[test]
    fn list_jobs_finds_ledgers_only() {
        let dir = tempdir().unwrap();
        let store = JobStore::new(dir.path());
        fs::create_dir_all(dir.path().join("b_job")).unwrap();
        fs::write(dir.path().join("b_job").join("job.json"), "{}").unwrap();
        fs::create_dir_all(dir.path().join("a_job")).unwrap();
        fs::write(dir.path().join("a_job").join("job.json"), "{}").unwrap();
        fs::create_dir_all(dir.path().join("not_a_job")).unwrap();

        assert_eq!(store.list_jobs().unwrap(), vec!["a_job", "b_job"]);
    }

    #[test]
    fn list_jobs_on_missing_dir_is_empty() {
        let store = JobStore::new("/nonexistent/longvox/projects");
        assert!(store.list_jobs().unwrap().is_empty());
    }
}
