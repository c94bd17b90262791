//! NeuroPixel common library
//!
//! This crate contains shared code used across NeuroPixel components.

pub mod config;
pub mod error;
pub mod metrics;
pub mod storage;

// Re-export commonly used types
pub use config::NeuroPixelConfig;
pub use error::{NeuroPixelError, Result};
pub use metrics::{MetricsRegistry, METRICS};
pub use storage::{BlobStore, LocalBlobStore};
