//! NeuroPixel Server
//!
//! HTTP front end for Monte Carlo Dropout reconstruction. Uploads become
//! jobs in an in-memory store; a bounded queue feeds a pool of workers that
//! run the inference engine and record the outcome.

pub mod error;
pub mod handlers;
pub mod jobs;
pub mod orchestrator;
pub mod queue;
pub mod router;
pub mod routes;
pub mod state;
pub mod store;
pub mod worker;

pub use error::{AppError, AppResult};
pub use jobs::{JobId, JobResult, JobStatus, ReconstructionJob};
pub use orchestrator::Orchestrator;
pub use queue::{JobQueue, QueuedJob};
pub use router::build_app_router;
pub use state::AppState;
pub use store::{InMemoryJobStore, JobStore};
pub use worker::spawn_workers;
