//! Final artifact assembly.

use crate::audio::{AudioClip, OutputFormat, encode_file, encode_wav, silence_len};
use crate::config::Padding;
use crate::error::{LongvoxError, Result};
use crate::job::{Job, JobLedger, JobStore, atomic_write};
use crate::process::CommandExecutor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Silence inserted around and between chunks, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssemblySettings {
    pub leading_pad_sec: f64,
    pub trailing_pad_sec: f64,
    pub inter_chunk_pause_sec: f64,
}

impl From<Padding> for AssemblySettings {
    fn from(p: Padding) -> Self {
        Self {
            leading_pad_sec: p.leading_sec,
            trailing_pad_sec: p.trailing_sec,
            inter_chunk_pause_sec: p.inter_chunk_sec,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssemblyOutcome {
    Completed { final_path: PathBuf, duration_sec: f64 },
    /// Some chunk artifacts were not available; the job stays resumable.
    Incomplete { missing: Vec<String> },
}

/// `leading ⧺ c0 ⧺ pause ⧺ c1 ⧺ … ⧺ trailing`, all at `sample_rate`.
pub fn concat_with_padding(
    chunks: &[AudioClip],
    sample_rate: u32,
    settings: &AssemblySettings,
) -> AudioClip {
    let lead = silence_len(sample_rate, settings.leading_pad_sec);
    let trail = silence_len(sample_rate, settings.trailing_pad_sec);
    let pause = silence_len(sample_rate, settings.inter_chunk_pause_sec);
    let body: usize = chunks.iter().map(AudioClip::len).sum();
    let gaps = pause * chunks.len().saturating_sub(1);

    let mut samples = Vec::with_capacity(lead + body + gaps + trail);
    samples.resize(lead, 0);
    for (i, chunk) in chunks.iter().enumerate() {
        if i > 0 {
            samples.resize(samples.len() + pause, 0);
        }
        samples.extend_from_slice(&chunk.samples);
    }
    samples.resize(samples.len() + trail, 0);
    AudioClip::new(samples, sample_rate)
}

pub struct Assembler {
    store: JobStore,
    ledger: Arc<dyn JobLedger>,
    settings: AssemblySettings,
    executor: Arc<dyn CommandExecutor>,
    ffmpeg: String,
}

impl Assembler {
    pub fn new(
        store: JobStore,
        ledger: Arc<dyn JobLedger>,
        settings: AssemblySettings,
        executor: Arc<dyn CommandExecutor>,
        ffmpeg: impl Into<String>,
    ) -> Self {
        Self {
            store,
            ledger,
            settings,
            executor,
            ffmpeg: ffmpeg.into(),
        }
    }

    /// Concatenate every accepted chunk of `job` into its final artifact.
    ///
    /// On success the job is marked completed and saved. A chunk whose
    /// artifact is gone from disk is released (see [`Job::release_artifacts`]),
    /// the ledger is saved, and `Incomplete` names the missing files.
    pub fn assemble(&self, job: &mut Job) -> Result<AssemblyOutcome> {
        let missing: Vec<String> = job
            .chunks
            .iter()
            .filter(|c| c.artifact.is_none())
            .map(|c| c.file.clone())
            .collect();
        if !missing.is_empty() {
            tracing::warn!(job = %job.job_ref, ?missing, "chunks not accepted yet; cannot assemble");
            return Ok(AssemblyOutcome::Incomplete { missing });
        }

        let mut clips = Vec::with_capacity(job.chunks.len());
        let mut lost = Vec::new();
        for chunk in &job.chunks {
            let file = chunk.artifact.as_deref().unwrap_or(&chunk.file);
            match self.store.read_chunk(&job.job_ref, file)? {
                Some(clip) => clips.push(clip),
                None => lost.push(chunk.index),
            }
        }
        if !lost.is_empty() {
            let missing: Vec<String> = lost.iter().map(|&i| job.chunks[i].file.clone()).collect();
            job.release_artifacts(&lost);
            self.ledger.save(job)?;
            tracing::warn!(
                job = %job.job_ref,
                ?missing,
                resume_index = job.resume_index(),
                "chunk artifacts missing on disk; released for regeneration"
            );
            return Ok(AssemblyOutcome::Incomplete { missing });
        }

        let sample_rate = job
            .sample_rate
            .or_else(|| clips.first().map(|c| c.sample_rate))
            .ok_or_else(|| LongvoxError::Validation {
                message: format!("job '{}' has no chunks to assemble", job.job_ref),
            })?;
        let clips: Vec<AudioClip> = clips.into_iter().map(|c| c.resampled(sample_rate)).collect();

        let combined = concat_with_padding(&clips, sample_rate, &self.settings);
        let duration_sec = combined.duration_sec();
        let final_name = job.final_file_name();
        let final_path = self.store.artifact_path(&job.job_ref, &final_name);

        self.write_final(&combined, job.output_format, &final_path)?;

        job.mark_completed(final_name, duration_sec);
        self.ledger.save(job)?;
        tracing::info!(
            job = %job.job_ref,
            path = %final_path.display(),
            duration_sec,
            chunks = job.total_chunks,
            "job assembled"
        );

        Ok(AssemblyOutcome::Completed {
            final_path,
            duration_sec,
        })
    }

    fn write_final(&self, clip: &AudioClip, format: OutputFormat, path: &Path) -> Result<()> {
        let wav = encode_wav(clip)?;
        if !format.needs_encoding() {
            return atomic_write(path, &wav);
        }

        let dir = path.parent().ok_or_else(|| {
            LongvoxError::Other(format!("{} has no parent directory", path.display()))
        })?;
        let input = dir.join(".assemble.combined.wav");
        let partial = dir.join(format!(".assemble.partial.{}", format.extension()));
        atomic_write(&input, &wav)?;

        let encoded = encode_file(self.executor.as_ref(), &self.ffmpeg, &input, &partial, format)
            .and_then(|()| Ok(std::fs::rename(&partial, path)?));
        remove_if_present(&input);
        if encoded.is_err() {
            remove_if_present(&partial);
        }
        encoded
    }
}

fn remove_if_present(path: &Path) {
    if let Err(e) = std::fs::remove_file(path)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = %path.display(), error = %e, "could not remove scratch file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobParameters, JobStatus, MemoryLedger};
    use crate::process::SystemCommandExecutor;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn settings() -> AssemblySettings {
        AssemblySettings {
            leading_pad_sec: 0.5,
            trailing_pad_sec: 0.5,
            inter_chunk_pause_sec: 0.25,
        }
    }

    #[test]
    fn padding_layout() {
        let chunks = vec![
            AudioClip::new(vec![1; 10], 100),
            AudioClip::new(vec![2; 20], 100),
            AudioClip::new(vec![3; 30], 100),
        ];
        let out = concat_with_padding(&chunks, 100, &settings());
        assert_eq!(out.len(), 50 + 60 + 2 * 25 + 50);
        assert!(out.samples[..50].iter().all(|&s| s == 0));
        assert!(out.samples[50..60].iter().all(|&s| s == 1));
        assert!(out.samples[60..85].iter().all(|&s| s == 0));
        assert!(out.samples[85..105].iter().all(|&s| s == 2));
        assert!(out.samples[out.len() - 50..].iter().all(|&s| s == 0));
    }

    #[test]
    fn single_chunk_has_no_pause() {
        let chunks = vec![AudioClip::new(vec![7; 10], 100)];
        let out = concat_with_padding(&chunks, 100, &settings());
        assert_eq!(out.len(), 50 + 10 + 50);
    }

    struct Fixture {
        dir: TempDir,
        store: JobStore,
        ledger: Arc<MemoryLedger>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        Fixture {
            store: JobStore::new(dir.path()),
            ledger: Arc::new(MemoryLedger::new()),
            dir,
        }
    }

    fn accepted_job(f: &Fixture, n: usize, format: OutputFormat) -> Job {
        let mut job = Job::new(
            "book",
            "tone",
            "text",
            (0..n).map(|i| format!("Part {i}.")).collect(),
            JobParameters::new(),
            format,
        );
        job.sample_rate = Some(1000);
        for i in 0..n {
            let clip = AudioClip::new(vec![(i as i16 + 1) * 100; 100], 1000);
            let file = f.store.write_chunk("book", i, &clip).unwrap();
            job.record_acceptance(i, file, clip.duration_sec(), None);
            job.complete_chunk(i);
        }
        job
    }

    fn assembler(f: &Fixture, executor: Arc<dyn CommandExecutor>) -> Assembler {
        Assembler::new(f.store.clone(), f.ledger.clone(), settings(), executor, "ffmpeg")
    }

    #[test]
    fn assembles_wav_and_completes_job() {
        let f = fixture();
        let mut job = accepted_job(&f, 3, OutputFormat::Wav);
        let a = assembler(&f, Arc::new(SystemCommandExecutor::new()));

        match a.assemble(&mut job).unwrap() {
            AssemblyOutcome::Completed {
                final_path,
                duration_sec,
            } => {
                assert_eq!(final_path, f.dir.path().join("book").join("book_final.wav"));
                // 0.5 + 3 * 0.1 + 2 * 0.25 + 0.5
                assert!((duration_sec - 1.8).abs() < 1e-9);
                let out = crate::audio::read_wav(&final_path).unwrap();
                assert_eq!(out.len(), 500 + 300 + 500 + 500);
            }
            other => panic!("Expected Completed, got {:?}", other),
        }

        let saved = f.ledger.load("book").unwrap();
        assert_eq!(saved.status, JobStatus::Completed);
        assert_eq!(saved.final_file.as_deref(), Some("book_final.wav"));
        assert_eq!(saved.total_duration_sec, Some(1.8));
        assert!(saved.missing_files.is_empty());
    }

    #[test]
    fn missing_artifact_is_released_and_recorded() {
        let f = fixture();
        let mut job = accepted_job(&f, 3, OutputFormat::Wav);
        std::fs::remove_file(f.store.artifact_path("book", "chunk_001.wav")).unwrap();
        let a = assembler(&f, Arc::new(SystemCommandExecutor::new()));

        assert_eq!(
            a.assemble(&mut job).unwrap(),
            AssemblyOutcome::Incomplete {
                missing: vec!["chunk_001.wav".into()]
            }
        );
        assert_ne!(job.status, JobStatus::Completed);

        let saved = f.ledger.load("book").unwrap();
        assert_eq!(saved.chunks_completed, 3);
        assert_eq!(saved.resume_index(), 1);
        assert!(saved.chunks[1].artifact.is_none());
        assert!(saved.chunks[2].artifact.is_some());
        assert_eq!(saved.missing_files, vec!["chunk_001.wav", "book_final.wav"]);
    }

    #[test]
    fn unaccepted_chunk_is_incomplete() {
        let f = fixture();
        let mut job = accepted_job(&f, 2, OutputFormat::Wav);
        job.chunks[1].artifact = None;
        job.chunks[1].verification_passed = None;
        let a = assembler(&f, Arc::new(SystemCommandExecutor::new()));
        assert!(matches!(
            a.assemble(&mut job).unwrap(),
            AssemblyOutcome::Incomplete { .. }
        ));
    }

    /// Copies the input to the output path instead of running ffmpeg.
    struct FakeFfmpeg {
        calls: Mutex<Vec<Vec<String>>>,
        fail: bool,
    }

    impl CommandExecutor for FakeFfmpeg {
        fn execute(
            &self,
            _program: &str,
            args: &[String],
            _stdin: Option<&[u8]>,
            _env: &[(String, String)],
        ) -> Result<Vec<u8>> {
            self.calls.lock().unwrap().push(args.to_vec());
            if self.fail {
                return Err(LongvoxError::ToolFailed {
                    tool: "ffmpeg".into(),
                    message: "Unknown encoder 'libmp3lame'".into(),
                });
            }
            let input = &args[args.iter().position(|a| a == "-i").unwrap() + 1];
            std::fs::copy(input, args.last().unwrap())?;
            Ok(Vec::new())
        }
    }

    #[test]
    fn non_wav_output_goes_through_encoder() {
        let f = fixture();
        let mut job = accepted_job(&f, 2, OutputFormat::Mp3);
        let fake = Arc::new(FakeFfmpeg {
            calls: Mutex::new(Vec::new()),
            fail: false,
        });
        let a = assembler(&f, fake.clone());

        match a.assemble(&mut job).unwrap() {
            AssemblyOutcome::Completed { final_path, .. } => {
                assert!(final_path.ends_with("book/book_final.mp3"));
                assert!(final_path.is_file());
            }
            other => panic!("Expected Completed, got {:?}", other),
        }
        let calls = fake.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].contains(&"libmp3lame".to_string()));

        let scratch: Vec<_> = std::fs::read_dir(f.dir.path().join("book"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".assemble"))
            .collect();
        assert!(scratch.is_empty());
    }

    #[test]
    fn encoder_failure_leaves_job_unfinished() {
        let f = fixture();
        let mut job = accepted_job(&f, 1, OutputFormat::Mp3);
        let a = assembler(
            &f,
            Arc::new(FakeFfmpeg {
                calls: Mutex::new(Vec::new()),
                fail: true,
            }),
        );
        assert!(matches!(
            a.assemble(&mut job),
            Err(LongvoxError::Encode { .. })
        ));
        assert_eq!(job.status, JobStatus::Running);
        assert!(!f.store.artifact_path("book", "book_final.mp3").exists());
    }
}
