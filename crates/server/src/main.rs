//! NeuroPixel Server - Main Entry Point
//!
//! Loads the reconstruction model, starts the worker pool and serves the
//! HTTP API until a shutdown signal arrives.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use neuropixel_common::config::ObservabilityConfig;
use neuropixel_common::{LocalBlobStore, NeuroPixelConfig};
use neuropixel_engine::{select_device, DropoutAutoencoder, InferenceEngine};
use neuropixel_server::{
    build_app_router, spawn_workers, AppState, InMemoryJobStore, JobQueue, Orchestrator,
};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing(config: &ObservabilityConfig) {
    let level = &config.log_level;
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "neuropixel_server={level},neuropixel_engine={level},neuropixel_common={level},tower_http={level}"
        )
        .into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if config.structured_logging {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- Configuration ---
    let config_path = std::env::var("NEUROPIXEL_CONFIG")
        .unwrap_or_else(|_| "configs/server-config.yaml".to_string());
    let config = NeuroPixelConfig::load(&config_path).context("Failed to load configuration")?;

    // --- Tracing ---
    init_tracing(&config.observability);
    info!("Starting NeuroPixel Server");
    if !Path::new(&config_path).exists() {
        warn!("Config file {} not found, running with defaults", config_path);
    }
    info!(
        "Configuration loaded: bind={}:{}, samples={}, workers={}",
        config.bind_address, config.port, config.inference.num_mc_samples, config.worker.workers
    );

    // --- Model ---
    let device = select_device(config.model.device)?;
    let model = DropoutAutoencoder::load(&config.model.weights_path, &config.model, &device)
        .context("Model unavailable, refusing to start")?;

    // --- Storage and engine ---
    let blobs = Arc::new(LocalBlobStore::new(&config.server.upload_dir)?);
    info!("Upload directory: {}", blobs.root().display());
    let engine = InferenceEngine::new(Arc::new(model), blobs.clone(), &config.inference)?;

    // --- Jobs ---
    let queue = Arc::new(JobQueue::new(config.worker.max_queue_size));
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(InMemoryJobStore::new()),
        blobs,
        queue.clone(),
        Arc::new(engine),
        config.server.clone(),
    ));
    let workers = spawn_workers(orchestrator.clone(), config.worker.workers);
    info!("Started {} workers", workers.len());

    // --- HTTP ---
    let addr: SocketAddr = format!("{}:{}", config.bind_address, config.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", config.bind_address, config.port))?;
    let app = build_app_router(AppState::new(orchestrator, config));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    // --- Drain ---
    info!("HTTP server stopped, waiting for in-flight jobs");
    queue.shutdown();
    for handle in workers {
        if let Err(e) = handle.await {
            error!("Worker task failed: {}", e);
        }
    }

    info!("NeuroPixel Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Received shutdown signal");
}
