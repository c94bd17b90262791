//! Inference engine entry point
//!
//! `InferenceEngine::infer` runs the whole pipeline for one stored image:
//! load bytes, preprocess, N stochastic forward passes, aggregate, render.
//! It never fails past its boundary; every fault, panics included, comes
//! back as [`InferenceOutcome::Error`].

use crate::aggregate::aggregate;
use crate::error::{NeuroPixelError, Result};
use crate::model::DropoutAutoencoder;
use crate::preprocess::ImagePreprocessor;
use crate::render::{render, RenderedImages};
use crate::sampler::McSampler;
use neuropixel_common::config::InferenceConfig;
use neuropixel_common::metrics::{LatencyTimer, METRICS};
use neuropixel_common::storage::BlobStore;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// Result of one inference call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InferenceOutcome {
    /// Base64 PNG mean reconstruction and uncertainty heatmap
    Success {
        mean_image: String,
        uncertainty_image: String,
    },

    /// Human-readable failure description
    Error { message: String },
}

impl InferenceOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, InferenceOutcome::Success { .. })
    }
}

impl From<RenderedImages> for InferenceOutcome {
    fn from(images: RenderedImages) -> Self {
        InferenceOutcome::Success {
            mean_image: images.mean_png_b64,
            uncertainty_image: images.uncertainty_png_b64,
        }
    }
}

/// Monte Carlo Dropout inference over a shared model
pub struct InferenceEngine {
    model: Arc<DropoutAutoencoder>,
    blobs: Arc<dyn BlobStore>,
    preprocessor: ImagePreprocessor,
    sampler: McSampler,
}

impl InferenceEngine {
    /// Create an engine over an already loaded model
    pub fn new(
        model: Arc<DropoutAutoencoder>,
        blobs: Arc<dyn BlobStore>,
        config: &InferenceConfig,
    ) -> Result<Self> {
        let preprocessor = ImagePreprocessor::new(
            model.config().image_size,
            config.normalization,
            model.device().clone(),
        )?;
        let sampler = McSampler::new(config.num_mc_samples, config.serialize_forward)?;

        info!(
            "Inference engine ready: {} MC samples, normalization {}",
            sampler.num_samples(),
            if config.normalization.is_some() { "on" } else { "off" }
        );

        Ok(Self {
            model,
            blobs,
            preprocessor,
            sampler,
        })
    }

    /// The shared model
    pub fn model(&self) -> &Arc<DropoutAutoencoder> {
        &self.model
    }

    /// Run the full pipeline for the image stored at `image_path`
    ///
    /// Blocks for the duration of N forward passes; call it from a blocking
    /// context.
    pub fn infer(&self, image_path: &str) -> InferenceOutcome {
        METRICS.inference.requests_total.inc();
        METRICS.inference.active_requests.inc();
        let start = Instant::now();

        let result = catch_unwind(AssertUnwindSafe(|| self.run_pipeline(image_path)))
            .unwrap_or_else(|panic| {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(NeuroPixelError::unhandled(detail))
            });

        let elapsed = start.elapsed();
        METRICS.inference.active_requests.dec();
        METRICS.inference.request_duration.observe(elapsed.as_secs_f64());

        match result {
            Ok(images) => {
                METRICS.inference.requests_success.inc();
                info!("Inference for {} finished in {:?}", image_path, elapsed);
                images.into()
            }
            Err(e) => {
                METRICS.inference.requests_failed.inc();
                error!("Inference for {} failed: {}", image_path, e);
                InferenceOutcome::Error {
                    message: failure_message(image_path, &e),
                }
            }
        }
    }

    fn run_pipeline(&self, image_path: &str) -> Result<RenderedImages> {
        let bytes = self.blobs.load_bytes(image_path)?;
        debug!("Loaded {} bytes from {}", bytes.len(), image_path);

        let input = self.preprocessor.preprocess(&bytes)?;
        let samples = self.sampler.sample(&self.model, &input)?;
        debug!("Collected {} MC samples", samples.len());

        let summary = aggregate(&samples)?;
        METRICS.inference.render_duration.time(|| render(&summary))
    }
}

fn failure_message(image_path: &str, error: &NeuroPixelError) -> String {
    match error {
        NeuroPixelError::NotFound(_) => format!("Image file not found: {}", image_path),
        other => other.to_string(),
    }
}
