use std::sync::Arc;

use neuropixel_common::NeuroPixelConfig;

use crate::orchestrator::Orchestrator;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; everything inside is behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Job orchestration, queue and inference engine.
    pub orchestrator: Arc<Orchestrator>,
    /// Full configuration the server was started with.
    pub config: Arc<NeuroPixelConfig>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, config: NeuroPixelConfig) -> Self {
        Self {
            orchestrator,
            config: Arc::new(config),
        }
    }
}
