//! File-backed job queue, one `<run_id>.job` file per pending job.
//!
//! FIFO by file modification time. There is no locking, visibility timeout
//! or re-delivery: the queue assumes exactly one consumer. Two workers
//! pointed at the same directory would race on the same file.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use crate::error::QueueError;

/// File extension of queued jobs.
const JOB_EXTENSION: &str = "job";

fn default_mode() -> String {
    "operator".to_string()
}

/// A queued request, mirroring the intake payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub run_id: Uuid,
    pub thread_id: String,
    pub repo_path: String,
    pub message: String,
    #[serde(default = "default_mode")]
    pub mode: String,
}

/// Handle to a job file found in the queue directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
    pub path: PathBuf,
    pub modified: SystemTime,
}

impl QueuedJob {
    /// Run id encoded in the file name, if the name is one.
    pub fn run_id_hint(&self) -> Option<Uuid> {
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| Uuid::parse_str(s).ok())
    }
}

/// Directory-backed FIFO of jobs.
#[derive(Debug, Clone)]
pub struct JobQueue {
    dir: PathBuf,
}

impl JobQueue {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> QueueError + '_ {
        move |source| QueueError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Serialize a job into `<dir>/<run_id>.job`, creating the directory if
    /// needed. The file is written under a temporary name and renamed into
    /// place, so a reader never sees a partial payload.
    pub async fn enqueue(&self, job: &Job) -> Result<PathBuf, QueueError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(Self::io_err(&self.dir))?;

        let bytes = serde_json::to_vec(job).map_err(|e| QueueError::Malformed {
            path: self.dir.clone(),
            reason: e.to_string(),
        })?;

        let final_path = self.dir.join(format!("{}.{JOB_EXTENSION}", job.run_id));
        let tmp_path = self.dir.join(format!(".{}.{JOB_EXTENSION}.tmp", job.run_id));

        fs::write(&tmp_path, &bytes)
            .await
            .map_err(Self::io_err(&tmp_path))?;
        fs::rename(&tmp_path, &final_path)
            .await
            .map_err(Self::io_err(&final_path))?;

        debug!(run_id = %job.run_id, path = %final_path.display(), "Job enqueued");
        Ok(final_path)
    }

    /// The job with the oldest modification time, or `None` when empty.
    pub async fn peek_oldest(&self) -> Result<Option<QueuedJob>, QueueError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Self::io_err(&self.dir)(e)),
        };

        let mut jobs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(Self::io_err(&self.dir))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(JOB_EXTENSION) {
                continue;
            }
            // The file may vanish between listing and stat.
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let modified = meta.modified().map_err(Self::io_err(&path))?;
            jobs.push(QueuedJob { path, modified });
        }

        jobs.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));
        Ok(jobs.into_iter().next())
    }

    /// Raw payload bytes of a queued job.
    pub async fn read_bytes(&self, job: &QueuedJob) -> Result<Vec<u8>, QueueError> {
        fs::read(&job.path).await.map_err(Self::io_err(&job.path))
    }

    /// Parse a queued job.
    pub async fn read(&self, job: &QueuedJob) -> Result<Job, QueueError> {
        let bytes = self.read_bytes(job).await?;
        serde_json::from_slice(&bytes).map_err(|e| QueueError::Malformed {
            path: job.path.clone(),
            reason: e.to_string(),
        })
    }

    /// Remove a job file. Removing an already-missing file is not an error.
    pub async fn dequeue(&self, job: &QueuedJob) -> Result<(), QueueError> {
        match fs::remove_file(&job.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io_err(&job.path)(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn job(message: &str) -> Job {
        Job {
            run_id: Uuid::new_v4(),
            thread_id: "thread-1".into(),
            repo_path: "/tmp/r".into(),
            message: message.into(),
            mode: "operator".into(),
        }
    }

    fn set_mtime(path: &Path, time: SystemTime) {
        let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(time).unwrap();
    }

    #[tokio::test]
    async fn enqueue_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let queue = JobQueue::new(tmp.path().join("storage").join("jobs"));
        let j = job("hello");

        let path = queue.enqueue(&j).await.unwrap();
        assert!(path.exists());
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), format!("{}.job", j.run_id));
    }

    #[tokio::test]
    async fn payload_survives_round_trip_byte_for_byte() {
        let tmp = tempfile::tempdir().unwrap();
        let queue = JobQueue::new(tmp.path());
        let j = job("fix the \"500\" on /api/playlist — ünïcode ✓\nsecond line");

        queue.enqueue(&j).await.unwrap();
        let queued = queue.peek_oldest().await.unwrap().unwrap();

        let bytes = queue.read_bytes(&queued).await.unwrap();
        assert_eq!(bytes, serde_json::to_vec(&j).unwrap());
        assert_eq!(queue.read(&queued).await.unwrap(), j);
        assert_eq!(queued.run_id_hint(), Some(j.run_id));
    }

    #[tokio::test]
    async fn oldest_job_comes_first() {
        let tmp = tempfile::tempdir().unwrap();
        let queue = JobQueue::new(tmp.path());
        let older = job("older");
        let newer = job("newer");

        // Enqueue the newer one first; mtimes decide, not insertion order.
        let newer_path = queue.enqueue(&newer).await.unwrap();
        let older_path = queue.enqueue(&older).await.unwrap();
        let base = SystemTime::now() - Duration::from_secs(60);
        set_mtime(&older_path, base);
        set_mtime(&newer_path, base + Duration::from_secs(10));

        let first = queue.peek_oldest().await.unwrap().unwrap();
        assert_eq!(queue.read(&first).await.unwrap(), older);
        // Peeking does not consume.
        let again = queue.peek_oldest().await.unwrap().unwrap();
        assert_eq!(again.path, first.path);

        queue.dequeue(&first).await.unwrap();
        let second = queue.peek_oldest().await.unwrap().unwrap();
        assert_eq!(queue.read(&second).await.unwrap(), newer);

        queue.dequeue(&second).await.unwrap();
        assert!(queue.peek_oldest().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_directory_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let queue = JobQueue::new(tmp.path().join("never-created"));
        assert!(queue.peek_oldest().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn non_job_files_are_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "x").unwrap();
        std::fs::write(tmp.path().join(".abc.job.tmp"), "x").unwrap();
        std::fs::create_dir(tmp.path().join("dir.job")).unwrap();

        let queue = JobQueue::new(tmp.path());
        assert!(queue.peek_oldest().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dequeue_twice_is_fine() {
        let tmp = tempfile::tempdir().unwrap();
        let queue = JobQueue::new(tmp.path());
        queue.enqueue(&job("x")).await.unwrap();
        let queued = queue.peek_oldest().await.unwrap().unwrap();

        queue.dequeue(&queued).await.unwrap();
        queue.dequeue(&queued).await.unwrap();
        assert!(!queued.path.exists());
    }

    #[tokio::test]
    async fn malformed_payload_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("garbage.job"), b"{not json").unwrap();
        let queue = JobQueue::new(tmp.path());

        let queued = queue.peek_oldest().await.unwrap().unwrap();
        assert_eq!(queued.run_id_hint(), None);
        let err = queue.read(&queued).await.unwrap_err();
        assert!(matches!(err, QueueError::Malformed { .. }));
    }

    #[test]
    fn mode_defaults_to_operator() {
        let raw = format!(
            r#"{{"run_id":"{}","thread_id":"t","repo_path":"/r","message":"m"}}"#,
            Uuid::new_v4()
        );
        let parsed: Job = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.mode, "operator");
    }
}
