//! Job record storage

use crate::jobs::{JobId, JobResult, JobStatus, ReconstructionJob};
use neuropixel_common::error::{NeuroPixelError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Storage for job records
///
/// All mutation goes through [`JobStore::update`], which applies a closure
/// atomically: either the whole change lands or none of it does.
pub trait JobStore: Send + Sync {
    /// Insert a new pending job
    fn create(&self, filename: &str, file_path: &str, media_type: &str) -> Result<ReconstructionJob>;

    /// Fetch a job. Unknown ids are `NotFound`.
    fn get(&self, id: JobId) -> Result<ReconstructionJob>;

    /// Atomic read-modify-write of one job
    fn update(
        &self,
        id: JobId,
        f: &mut dyn FnMut(&mut ReconstructionJob) -> Result<()>,
    ) -> Result<ReconstructionJob>;

    /// Jobs ordered newest first
    fn list(&self, offset: usize, limit: usize) -> Vec<ReconstructionJob>;

    /// Remove a job and return its last state
    fn delete(&self, id: JobId) -> Result<ReconstructionJob>;

    /// Number of stored jobs
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overwrite status and result, keeping them consistent
    fn set_status(
        &self,
        id: JobId,
        status: JobStatus,
        result: Option<JobResult>,
    ) -> Result<ReconstructionJob> {
        if status.is_terminal() != result.is_some() {
            return Err(NeuroPixelError::invalid_input(format!(
                "A {} job {} a result",
                status,
                if status.is_terminal() { "requires" } else { "cannot carry" }
            )));
        }
        if let Some(result) = &result {
            if result.status() != status {
                return Err(NeuroPixelError::invalid_input(format!(
                    "Result does not match status {}",
                    status
                )));
            }
        }

        let mut result = result;
        self.update(id, &mut |job| {
            job.status = status;
            job.result = result.take();
            Ok(())
        })
    }
}

#[derive(Debug)]
struct Entry {
    seq: u64,
    job: ReconstructionJob,
}

/// Process-local job store
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Entry>>,
    next_seq: AtomicU64,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(id: JobId) -> NeuroPixelError {
    NeuroPixelError::not_found(format!("File with ID {} not found", id))
}

impl JobStore for InMemoryJobStore {
    fn create(&self, filename: &str, file_path: &str, media_type: &str) -> Result<ReconstructionJob> {
        let job = ReconstructionJob::new(
            filename.to_string(),
            file_path.to_string(),
            media_type.to_string(),
        );
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);

        let mut jobs = self.jobs.write();
        if jobs.contains_key(&job.id) {
            return Err(NeuroPixelError::conflict(format!("Job {} already exists", job.id)));
        }
        jobs.insert(
            job.id,
            Entry {
                seq,
                job: job.clone(),
            },
        );

        debug!("Created job {} for {}", job.id, filename);
        Ok(job)
    }

    fn get(&self, id: JobId) -> Result<ReconstructionJob> {
        self.jobs
            .read()
            .get(&id)
            .map(|entry| entry.job.clone())
            .ok_or_else(|| not_found(id))
    }

    fn update(
        &self,
        id: JobId,
        f: &mut dyn FnMut(&mut ReconstructionJob) -> Result<()>,
    ) -> Result<ReconstructionJob> {
        let mut jobs = self.jobs.write();
        let entry = jobs.get_mut(&id).ok_or_else(|| not_found(id))?;

        // Work on a copy so a failing closure leaves the record untouched.
        let mut job = entry.job.clone();
        f(&mut job)?;
        job.touch();
        entry.job = job.clone();
        Ok(job)
    }

    fn list(&self, offset: usize, limit: usize) -> Vec<ReconstructionJob> {
        let jobs = self.jobs.read();
        let mut entries: Vec<&Entry> = jobs.values().collect();
        entries.sort_unstable_by(|a, b| b.seq.cmp(&a.seq));
        entries
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|entry| entry.job.clone())
            .collect()
    }

    fn delete(&self, id: JobId) -> Result<ReconstructionJob> {
        self.jobs
            .write()
            .remove(&id)
            .map(|entry| entry.job)
            .ok_or_else(|| not_found(id))
    }

    fn len(&self) -> usize {
        self.jobs.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create(store: &InMemoryJobStore, name: &str) -> ReconstructionJob {
        store.create(name, &format!("/uploads/{}", name), "image/png").unwrap()
    }

    #[test]
    fn test_create_and_get() {
        let store = InMemoryJobStore::new();
        let job = create(&store, "a.png");

        let fetched = store.get(job.id).unwrap();
        assert_eq!(fetched, job);
        assert_eq!(fetched.status, JobStatus::Pending);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_get_unknown() {
        let store = InMemoryJobStore::new();
        let err = store.get(JobId::new_v4()).unwrap_err();
        assert!(matches!(err, NeuroPixelError::NotFound(_)));
    }

    #[test]
    fn test_list_newest_first() {
        let store = InMemoryJobStore::new();
        let first = create(&store, "1.png");
        let second = create(&store, "2.png");
        let third = create(&store, "3.png");

        let page = store.list(0, 2);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, third.id);
        assert_eq!(page[1].id, second.id);

        let rest = store.list(2, 20);
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, first.id);

        assert!(store.list(5, 20).is_empty());
    }

    #[test]
    fn test_failed_update_is_not_applied() {
        let store = InMemoryJobStore::new();
        let job = create(&store, "a.png");

        let err = store
            .update(job.id, &mut |job| {
                job.filename = "changed.png".to_string();
                Err(NeuroPixelError::conflict("nope"))
            })
            .unwrap_err();
        assert!(matches!(err, NeuroPixelError::Conflict(_)));
        assert_eq!(store.get(job.id).unwrap().filename, "a.png");
    }

    #[test]
    fn test_set_status_keeps_result_consistent() {
        let store = InMemoryJobStore::new();
        let job = create(&store, "a.png");

        assert!(store.set_status(job.id, JobStatus::Completed, None).is_err());
        assert!(store
            .set_status(job.id, JobStatus::Processing, Some(JobResult::failure("x")))
            .is_err());
        assert!(store
            .set_status(job.id, JobStatus::Completed, Some(JobResult::failure("x")))
            .is_err());

        let failed = store
            .set_status(job.id, JobStatus::Failed, Some(JobResult::failure("x")))
            .unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error(), Some("x"));
    }

    #[test]
    fn test_delete() {
        let store = InMemoryJobStore::new();
        let job = create(&store, "a.png");

        assert_eq!(store.delete(job.id).unwrap().id, job.id);
        assert!(store.is_empty());
        assert!(matches!(
            store.delete(job.id).unwrap_err(),
            NeuroPixelError::NotFound(_)
        ));
    }
}
