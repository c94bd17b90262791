//! Job orchestration
//!
//! Owns every job state transition. Handlers call in to create, reprocess,
//! inspect and delete jobs; workers call [`Orchestrator::process`] for each
//! queued job. The inference engine only ever returns an outcome, it never
//! touches a job record.

use crate::jobs::{JobId, JobResult, JobStatus, ReconstructionJob};
use crate::queue::{JobQueue, QueuedJob};
use crate::store::JobStore;
use neuropixel_common::config::ServerConfig;
use neuropixel_common::error::{NeuroPixelError, Result};
use neuropixel_common::metrics::METRICS;
use neuropixel_common::storage::BlobStore;
use neuropixel_engine::InferenceEngine;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// File extension for an accepted media type
pub fn extension_for(media_type: &str) -> Option<&'static str> {
    match media_type {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/tiff" => Some("tiff"),
        "image/bmp" => Some("bmp"),
        _ => None,
    }
}

/// Coordinates uploads, the job store, the queue and the engine
pub struct Orchestrator {
    store: Arc<dyn JobStore>,
    blobs: Arc<dyn BlobStore>,
    queue: Arc<JobQueue>,
    engine: Arc<InferenceEngine>,
    config: ServerConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        blobs: Arc<dyn BlobStore>,
        queue: Arc<JobQueue>,
        engine: Arc<InferenceEngine>,
        config: ServerConfig,
    ) -> Self {
        Self {
            store,
            blobs,
            queue,
            engine,
            config,
        }
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn engine(&self) -> &Arc<InferenceEngine> {
        &self.engine
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Check an upload before anything is written
    pub fn validate_upload(&self, media_type: &str, size: usize) -> Result<&'static str> {
        let allowed = self
            .config
            .allowed_media_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(media_type));
        let extension = extension_for(&media_type.to_ascii_lowercase()).filter(|_| allowed);
        let Some(extension) = extension else {
            return Err(NeuroPixelError::invalid_input(format!(
                "Invalid file type: {}. Allowed types: {}",
                media_type,
                self.config.allowed_media_types.join(", ")
            )));
        };

        if size == 0 {
            return Err(NeuroPixelError::invalid_input("Uploaded file is empty"));
        }
        if size > self.config.max_upload_bytes {
            return Err(NeuroPixelError::invalid_input(format!(
                "File too large. Maximum size is {} bytes",
                self.config.max_upload_bytes
            )));
        }
        Ok(extension)
    }

    /// Store an upload, create its job and queue it
    ///
    /// On any failure after the bytes were stored, the stored file is
    /// removed again and no job is left behind.
    pub fn submit_upload(&self, media_type: &str, bytes: &[u8]) -> Result<ReconstructionJob> {
        let extension = self.validate_upload(media_type, bytes.len())?;
        let filename = format!("{}.{}", Uuid::new_v4(), extension);
        let path = self.blobs.put_bytes(&filename, bytes)?;
        info!("File '{}' saved to '{}'", filename, path);

        let job = match self.store.create(&filename, &path, media_type) {
            Ok(job) => job,
            Err(e) => {
                error!("Failed to create job for {}: {}", filename, e);
                self.discard_blob(&path);
                return Err(e);
            }
        };

        if let Err(e) = self.queue.submit(QueuedJob::pending(job.id)) {
            warn!("Rejecting upload {}: {}", job.id, e);
            if let Err(e) = self.store.delete(job.id) {
                error!("Failed to roll back job {}: {}", job.id, e);
            }
            self.discard_blob(&path);
            return Err(e);
        }

        METRICS.jobs.created_total.inc();
        info!("Scheduled background processing for job {}", job.id);
        Ok(job)
    }

    fn discard_blob(&self, path: &str) {
        match self.blobs.delete(path) {
            Ok(_) => debug!("Cleaned up {}", path),
            Err(e) => error!("Failed to clean up {}: {}", path, e),
        }
    }

    /// Current state of a job
    pub fn status(&self, id: JobId) -> Result<ReconstructionJob> {
        self.store.get(id)
    }

    /// Jobs ordered newest first
    pub fn list(&self, skip: usize, limit: usize) -> Vec<ReconstructionJob> {
        self.store.list(skip, limit)
    }

    /// Run a job again
    ///
    /// Accepted from pending, failed and completed; the job moves to
    /// processing immediately. Rejected with `Conflict` while processing.
    pub fn reprocess(&self, id: JobId) -> Result<ReconstructionJob> {
        let mut previous = None;
        let job = self.store.update(id, &mut |job| {
            previous = Some((job.status, job.result.clone()));
            job.begin_reprocess()
        })?;

        if let Err(e) = self.queue.submit(QueuedJob::claimed(id)) {
            warn!("Cannot queue reprocessing of {}: {}", id, e);
            if let Some((status, result)) = previous.take() {
                let mut restore = Some(result);
                let restored = self.store.update(id, &mut |job| {
                    if job.status == JobStatus::Processing {
                        job.status = status;
                        job.result = restore.take().flatten();
                    }
                    Ok(())
                });
                if let Err(e) = restored {
                    error!("Failed to restore job {}: {}", id, e);
                }
            }
            return Err(e);
        }

        info!("Re-scheduled processing for job {}", id);
        Ok(job)
    }

    /// Remove a job and its stored image
    pub fn delete(&self, id: JobId) -> Result<ReconstructionJob> {
        let job = self.store.delete(id)?;
        match self.blobs.delete(&job.file_path) {
            Ok(true) => debug!("Deleted stored file {}", job.file_path),
            Ok(false) => warn!("Stored file {} was already gone", job.file_path),
            Err(e) => error!("Failed to delete stored file {}: {}", job.file_path, e),
        }
        info!("Deleted job {}", id);
        Ok(job)
    }

    /// Run one queued job to a terminal state
    pub async fn process(&self, item: QueuedJob) {
        let Some(job) = self.take(&item) else {
            return;
        };
        METRICS
            .jobs
            .queue_time
            .observe(item.enqueued_at.elapsed().as_secs_f64());
        info!("Processing job {} ({})", job.id, job.filename);

        let engine = Arc::clone(&self.engine);
        let path = job.file_path.clone();
        let result = match tokio::task::spawn_blocking(move || engine.infer(&path)).await {
            Ok(outcome) => JobResult::from(outcome),
            Err(e) => {
                error!("Inference task for job {} died: {}", job.id, e);
                JobResult::failure(format!("Unexpected error during processing: {}", e))
            }
        };

        self.record(job.id, result);
    }

    /// Move the job to processing if a worker still needs to
    fn take(&self, item: &QueuedJob) -> Option<ReconstructionJob> {
        let taken = if item.claimed {
            self.store.get(item.id).and_then(|job| {
                if job.status == JobStatus::Processing {
                    Ok(job)
                } else {
                    Err(NeuroPixelError::conflict(format!(
                        "Job {} is {}, not processing",
                        job.id, job.status
                    )))
                }
            })
        } else {
            self.store.update(item.id, &mut |job| job.claim())
        };

        match taken {
            Ok(job) => Some(job),
            Err(NeuroPixelError::NotFound(_)) => {
                debug!("Job {} was deleted before it ran", item.id);
                None
            }
            Err(e) => {
                debug!("Skipping queued job {}: {}", item.id, e);
                None
            }
        }
    }

    fn record(&self, id: JobId, result: JobResult) {
        let mut result = Some(result);
        let recorded = self.store.update(id, &mut |job| match result.take() {
            Some(result) => job.finish(result).map(|_| ()),
            None => Err(NeuroPixelError::internal("Result already consumed")),
        });

        match recorded {
            Ok(job) => {
                METRICS
                    .jobs
                    .finished_total
                    .with_label_values(&[job.status.as_str()])
                    .inc();
                match job.error() {
                    Some(message) => warn!("Job {} failed: {}", id, message),
                    None => info!("Job {} completed", id),
                }
            }
            Err(NeuroPixelError::NotFound(_)) => {
                warn!("Job {} was deleted while processing; result dropped", id)
            }
            Err(e) => error!("Failed to record result for job {}: {}", id, e),
        }
    }
}
