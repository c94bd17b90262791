//! Bounded job queue feeding the worker pool
//!
//! Lock-free `SegQueue` for the items, a `Notify` to wake idle workers and an
//! atomic depth counter for backpressure.

use crate::jobs::JobId;
use crossbeam::queue::SegQueue;
use neuropixel_common::error::{NeuroPixelError, Result};
use neuropixel_common::metrics::METRICS;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::Notify;
use tracing::trace;

/// A job waiting for a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
    pub id: JobId,

    /// The job was already moved to processing when it was enqueued
    pub claimed: bool,

    /// Enqueue time
    pub enqueued_at: Instant,
}

impl QueuedJob {
    /// Fresh upload, still pending
    pub fn pending(id: JobId) -> Self {
        Self {
            id,
            claimed: false,
            enqueued_at: Instant::now(),
        }
    }

    /// Reprocess request, already processing
    pub fn claimed(id: JobId) -> Self {
        Self {
            id,
            claimed: true,
            enqueued_at: Instant::now(),
        }
    }
}

/// Multi-producer multi-consumer job queue
#[derive(Debug)]
pub struct JobQueue {
    queue: SegQueue<QueuedJob>,
    depth: AtomicUsize,
    max_queue_size: usize,
    shutdown: AtomicBool,
    notify: Notify,
}

impl JobQueue {
    pub fn new(max_queue_size: usize) -> Self {
        Self {
            queue: SegQueue::new(),
            depth: AtomicUsize::new(0),
            max_queue_size,
            shutdown: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Enqueue a job. Fails with `QueueFull` at capacity.
    pub fn submit(&self, job: QueuedJob) -> Result<()> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(NeuroPixelError::queue_full("Job queue is shutting down"));
        }

        // Reserve a slot before pushing so concurrent submitters cannot
        // overshoot the bound.
        let reserved = self
            .depth
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |depth| {
                (depth < self.max_queue_size).then_some(depth + 1)
            });
        let depth = match reserved {
            Ok(previous) => previous + 1,
            Err(_) => {
                METRICS.jobs.rejected_total.inc();
                return Err(NeuroPixelError::queue_full(
                    "Job queue is full, rejecting new job",
                ));
            }
        };

        self.queue.push(job);
        METRICS.jobs.queue_depth.set(depth as i64);
        self.notify.notify_one();

        trace!("Job submitted, queue depth: {}", depth);
        Ok(())
    }

    fn pop(&self) -> Option<QueuedJob> {
        let job = self.queue.pop()?;
        let depth = self.depth.fetch_sub(1, Ordering::AcqRel) - 1;
        METRICS.jobs.queue_depth.set(depth as i64);
        Some(job)
    }

    /// Wait for the next job. Returns `None` once the queue is shut down.
    pub async fn next(&self) -> Option<QueuedJob> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a shutdown signal cannot slip by.
            notified.as_mut().enable();

            if self.shutdown.load(Ordering::Acquire) {
                return None;
            }
            if let Some(job) = self.pop() {
                return Some(job);
            }

            notified.await;
        }
    }

    /// Current number of queued jobs
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    /// Maximum number of queued jobs
    pub fn capacity(&self) -> usize {
        self.max_queue_size
    }

    /// Stop handing out jobs and wake every waiting worker
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = JobQueue::new(10);
        let ids: Vec<JobId> = (0..3).map(|_| JobId::new_v4()).collect();
        for id in &ids {
            queue.submit(QueuedJob::pending(*id)).unwrap();
        }
        assert_eq!(queue.depth(), 3);

        for id in &ids {
            assert_eq!(queue.next().await.unwrap().id, *id);
        }
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn test_backpressure() {
        let queue = JobQueue::new(5);

        for i in 0..10 {
            let result = queue.submit(QueuedJob::pending(JobId::new_v4()));
            if i < 5 {
                assert!(result.is_ok());
            } else {
                assert!(matches!(result, Err(NeuroPixelError::QueueFull(_))));
            }
        }

        queue.next().await.unwrap();
        assert!(queue.submit(QueuedJob::claimed(JobId::new_v4())).is_ok());
    }

    #[tokio::test]
    async fn test_waiting_worker_is_woken() {
        let queue = Arc::new(JobQueue::new(10));
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.next().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        let id = JobId::new_v4();
        queue.submit(QueuedJob::claimed(id)).unwrap();

        let job = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(job.id, id);
        assert!(job.claimed);
    }

    #[tokio::test]
    async fn test_shutdown_releases_workers() {
        let queue = Arc::new(JobQueue::new(10));
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.next().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_none());
        assert!(queue.submit(QueuedJob::pending(JobId::new_v4())).is_err());
    }
}
