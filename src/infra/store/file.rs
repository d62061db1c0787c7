//! File-backed job store.
//!
//! Every write appends a JSON line holding the full job snapshot; purges append
//! a tombstone. Opening the store replays the log, last record wins. `compact`
//! rewrites the file with one line per live job.

use std::fs::{create_dir_all, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::job::{Job, JobPatch, NewJob};
use crate::core::store::{CreateOutcome, JobFilter, JobStore, StatusChange, StatusUpdate};
use crate::core::SchedulerError;
use crate::infra::store::table::JobTable;
use crate::util::clock::now_ms;
use crate::util::serde::JobId;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum LogRecord {
    Put { job: Box<Job> },
    Purge { id: JobId },
}

/// Durable store using an append-only JSON-lines log.
pub struct FileJobStore {
    path: PathBuf,
    table: Mutex<JobTable>,
}

fn backend<E: std::fmt::Display>(e: E) -> SchedulerError {
    SchedulerError::Backend(e.to_string())
}

impl FileJobStore {
    /// Open or create the log at `dir/<name>.jsonl` and replay it.
    pub fn open(dir: impl AsRef<Path>, name: &str) -> Result<Self, SchedulerError> {
        let dir = dir.as_ref();
        create_dir_all(dir).map_err(backend)?;
        let path = dir.join(format!("{name}.jsonl"));
        let table = Self::replay(&path)?;
        tracing::info!(path = %path.display(), jobs = table.len(), "job log replayed");
        Ok(Self {
            path,
            table: Mutex::new(table),
        })
    }

    /// Log file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn replay(path: &Path) -> Result<JobTable, SchedulerError> {
        let mut table = JobTable::new();
        if !path.exists() {
            return Ok(table);
        }
        let file = OpenOptions::new().read(true).open(path).map_err(backend)?;
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(backend)?;
            if line.trim().is_empty() {
                continue;
            }
            let record: LogRecord = serde_json::from_str(&line)
                .map_err(|e| SchedulerError::Backend(format!("line {}: {e}", line_no + 1)))?;
            match record {
                LogRecord::Put { job } => table.put(*job),
                LogRecord::Purge { id } => {
                    table.remove(id);
                }
            }
        }
        Ok(table)
    }

    fn append(&self, records: &[LogRecord]) -> Result<(), SchedulerError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(backend)?;
        for record in records {
            let line = serde_json::to_string(record).map_err(backend)?;
            writeln!(file, "{line}").map_err(backend)?;
        }
        Ok(())
    }

    fn put(&self, job: &Job) -> Result<(), SchedulerError> {
        self.append(&[LogRecord::Put {
            job: Box::new(job.clone()),
        }])
    }

    /// Rewrite the log with one record per live job.
    pub fn compact(&self) -> Result<usize, SchedulerError> {
        let table = self.table.lock();
        let jobs = table.list(&JobFilter::new());
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
            .map_err(backend)?;
        for job in &jobs {
            let line = serde_json::to_string(&LogRecord::Put {
                job: Box::new(job.clone()),
            })
            .map_err(backend)?;
            writeln!(file, "{line}").map_err(backend)?;
        }
        tracing::debug!(path = %self.path.display(), jobs = jobs.len(), "job log compacted");
        Ok(jobs.len())
    }
}

impl JobStore for FileJobStore {
    fn create_job(&self, new: NewJob) -> Result<CreateOutcome, SchedulerError> {
        let mut table = self.table.lock();
        let outcome = table.create(new, now_ms());
        if outcome.created {
            if let Err(err) = self.put(&outcome.job) {
                table.remove(outcome.job.id);
                return Err(err);
            }
        }
        Ok(outcome)
    }

    fn get(&self, id: JobId) -> Result<Option<Job>, SchedulerError> {
        Ok(self.table.lock().get(id).cloned())
    }

    fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Job>, SchedulerError> {
        Ok(self.table.lock().by_key(key).cloned())
    }

    fn update_status(&self, id: JobId, update: StatusUpdate) -> Result<StatusChange, SchedulerError> {
        let mut table = self.table.lock();
        let before = table.get(id).cloned();
        let change = table.update_status(id, update, now_ms())?;
        if let Err(err) = self.put(&change.job) {
            if let Some(before) = before {
                table.put(before);
            }
            return Err(err);
        }
        Ok(change)
    }

    fn patch(
        &self,
        id: JobId,
        expected_version: Option<u64>,
        patch: JobPatch,
    ) -> Result<Job, SchedulerError> {
        let mut table = self.table.lock();
        let before = table.get(id).cloned();
        let job = table.patch(id, expected_version, patch, now_ms())?;
        if let Err(err) = self.put(&job) {
            if let Some(before) = before {
                table.put(before);
            }
            return Err(err);
        }
        Ok(job)
    }

    fn active_jobs(&self, cluster: &str) -> Result<Vec<Job>, SchedulerError> {
        Ok(self.table.lock().active(cluster))
    }

    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, SchedulerError> {
        Ok(self.table.lock().list(filter))
    }

    fn purge_terminal(&self, finished_before_ms: u128) -> Result<usize, SchedulerError> {
        let mut table = self.table.lock();
        let expired = table.expired(finished_before_ms);
        if expired.is_empty() {
            return Ok(0);
        }
        let records: Vec<LogRecord> = expired.iter().map(|id| LogRecord::Purge { id: *id }).collect();
        self.append(&records)?;
        for id in &expired {
            table.remove(*id);
        }
        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::job::{JobSpec, JobStatus, JobType, ResourceRequest};

    fn temp_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("prometheus-admission-{tag}-{}", uuid::Uuid::new_v4()))
    }

    fn new_job(key: &str) -> NewJob {
        NewJob {
            spec: JobSpec::new("j", "ns", JobType::Batch, ResourceRequest::gpus("a100", 1)),
            idempotency_key: Some(key.into()),
            cluster: "c1".into(),
            pool: "p".into(),
        }
    }

    #[test]
    fn test_replay_restores_latest_snapshot_and_keys() {
        let dir = temp_dir("replay");
        let id = {
            let store = FileJobStore::open(&dir, "jobs").unwrap();
            let job = store.create_job(new_job("k1")).unwrap().job;
            store.update_status(job.id, StatusUpdate::to(JobStatus::Queued)).unwrap();
            job.id
        };
        let store = FileJobStore::open(&dir, "jobs").unwrap();
        let job = store.get(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.version, 2);
        assert!(!store.create_job(new_job("k1")).unwrap().created);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_purge_and_compact() {
        let dir = temp_dir("compact");
        let store = FileJobStore::open(&dir, "jobs").unwrap();
        let done = store.create_job(new_job("a")).unwrap().job;
        store.create_job(new_job("b")).unwrap();
        store.update_status(done.id, StatusUpdate::to(JobStatus::Cancelled)).unwrap();
        assert_eq!(store.purge_terminal(u128::MAX).unwrap(), 1);
        assert_eq!(store.compact().unwrap(), 1);

        let contents = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(contents.lines().count(), 1);
        let reopened = FileJobStore::open(&dir, "jobs").unwrap();
        assert!(reopened.get(done.id).unwrap().is_none());
        assert!(reopened.find_by_idempotency_key("b").unwrap().is_some());
        let _ = std::fs::remove_dir_all(dir);
    }
}
