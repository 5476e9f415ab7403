//! Job stores for the scheduler: in-memory and JSONL-file backed.

use std::collections::BTreeMap;
use std::fs::{create_dir_all, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::core::{JobStore, OrchestratorError, ScheduledJob};

fn backend(e: impl std::fmt::Display) -> OrchestratorError {
    OrchestratorError::UpstreamFailure(format!("job store: {e}"))
}

/// Volatile job table.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: BTreeMap<String, ScheduledJob>,
}

impl InMemoryJobStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for InMemoryJobStore {
    fn get(&self, job_id: &str) -> Result<Option<ScheduledJob>, OrchestratorError> {
        Ok(self.jobs.get(job_id).cloned())
    }

    fn put(&mut self, job: ScheduledJob) -> Result<(), OrchestratorError> {
        self.jobs.insert(job.job_id.clone(), job);
        Ok(())
    }

    fn all(&self) -> Result<Vec<ScheduledJob>, OrchestratorError> {
        Ok(self.jobs.values().cloned().collect())
    }
}

/// Job table persisted as JSON lines, one job per line.
///
/// The file is rewritten on every mutation and loaded on open, so pending
/// jobs survive a restart.
pub struct FileJobStore {
    path: PathBuf,
    jobs: BTreeMap<String, ScheduledJob>,
}

impl FileJobStore {
    /// File name used inside the store directory.
    pub const FILE_NAME: &'static str = "scheduled_jobs.jsonl";

    /// Open (or create) a store under `dir`.
    ///
    /// # Errors
    ///
    /// `UpstreamFailure` if the directory cannot be created or an existing
    /// file cannot be parsed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, OrchestratorError> {
        let dir = dir.as_ref();
        create_dir_all(dir).map_err(backend)?;
        let mut store = Self {
            path: dir.join(Self::FILE_NAME),
            jobs: BTreeMap::new(),
        };
        store.load_from_disk()?;
        tracing::debug!(path = %store.path.display(), jobs = store.jobs.len(), "job store opened");
        Ok(store)
    }

    /// Backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_from_disk(&mut self) -> Result<(), OrchestratorError> {
        if !self.path.exists() {
            return Ok(());
        }
        let file = OpenOptions::new().read(true).open(&self.path).map_err(backend)?;
        for line in BufReader::new(file).lines() {
            let line = line.map_err(backend)?;
            if line.trim().is_empty() {
                continue;
            }
            let job: ScheduledJob = serde_json::from_str(&line).map_err(backend)?;
            self.jobs.insert(job.job_id.clone(), job);
        }
        Ok(())
    }

    fn rewrite_disk(&self) -> Result<(), OrchestratorError> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
            .map_err(backend)?;
        for job in self.jobs.values() {
            let line = serde_json::to_string(job).map_err(backend)?;
            writeln!(file, "{line}").map_err(backend)?;
        }
        file.flush().map_err(backend)
    }
}

impl JobStore for FileJobStore {
    fn get(&self, job_id: &str) -> Result<Option<ScheduledJob>, OrchestratorError> {
        Ok(self.jobs.get(job_id).cloned())
    }

    fn put(&mut self, job: ScheduledJob) -> Result<(), OrchestratorError> {
        let previous = self.jobs.insert(job.job_id.clone(), job.clone());
        if let Err(e) = self.rewrite_disk() {
            // Keep memory and disk in step.
            match previous {
                Some(prev) => self.jobs.insert(job.job_id, prev),
                None => self.jobs.remove(&job.job_id),
            };
            return Err(e);
        }
        Ok(())
    }

    fn all(&self) -> Result<Vec<ScheduledJob>, OrchestratorError> {
        Ok(self.jobs.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::JobState;

    fn job(id: &str, run_at: u128) -> ScheduledJob {
        ScheduledJob {
            job_id: id.into(),
            user_id: "u1".into(),
            run_at,
            state: JobState::Scheduled,
            fire_attempts: 0,
            updated_at_ms: 0,
        }
    }

    #[test]
    fn put_replaces_by_id() {
        let mut store = InMemoryJobStore::new();
        store.put(job("a", 10)).unwrap();
        store.put(job("a", 20)).unwrap();
        let all = store.all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].run_at, 20);
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = FileJobStore::open(dir.path()).unwrap();
            store.put(job("a", 10)).unwrap();
            let mut cancelled = job("b", 30);
            cancelled.state = JobState::Cancelled;
            store.put(cancelled).unwrap();
        }
        let reopened = FileJobStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get("a").unwrap().unwrap().run_at, 10);
        assert_eq!(
            reopened.get("b").unwrap().unwrap().state,
            JobState::Cancelled
        );
        assert!(reopened.path().ends_with(FileJobStore::FILE_NAME));
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(FileJobStore::FILE_NAME), "not json\n").unwrap();
        assert!(matches!(
            FileJobStore::open(dir.path()),
            Err(OrchestratorError::UpstreamFailure(_))
        ));
    }
}
