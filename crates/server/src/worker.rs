//! Background worker pool

use crate::orchestrator::Orchestrator;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Spawn `count` workers draining the orchestrator's queue
///
/// Each worker runs one job at a time and exits once the queue is shut
/// down, after finishing whatever job it holds.
pub fn spawn_workers(orchestrator: Arc<Orchestrator>, count: usize) -> Vec<JoinHandle<()>> {
    (0..count.max(1))
        .map(|worker_id| {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(run_worker_loop(worker_id, orchestrator))
        })
        .collect()
}

/// Main worker processing loop
async fn run_worker_loop(worker_id: usize, orchestrator: Arc<Orchestrator>) {
    info!("Starting worker {}", worker_id);

    while let Some(item) = orchestrator.queue().next().await {
        orchestrator.process(item).await;
    }

    info!("Worker {} stopped", worker_id);
}
