//! Metrics collection for NeuroPixel
//!
//! This module provides Prometheus metrics for observability.
//! Registration happens once, in the global `METRICS` registry.

use lazy_static::lazy_static;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Arc;

/// Metrics registry for NeuroPixel
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub inference: InferenceMetrics,
    pub jobs: JobMetrics,
}

/// Inference engine metrics
#[derive(Debug, Clone)]
pub struct InferenceMetrics {
    /// Total number of inference calls
    pub requests_total: IntCounter,

    /// Total number of successful inference calls
    pub requests_success: IntCounter,

    /// Total number of failed inference calls
    pub requests_failed: IntCounter,

    /// End-to-end inference duration
    pub request_duration: Histogram,

    /// Single stochastic forward pass duration
    pub forward_duration: Histogram,

    /// Rendering (heatmap + PNG + base64) duration
    pub render_duration: Histogram,

    /// Current active inference calls
    pub active_requests: IntGauge,
}

/// Job orchestration metrics
#[derive(Debug, Clone)]
pub struct JobMetrics {
    /// Jobs created through uploads
    pub created_total: IntCounter,

    /// Terminal transitions, labelled by status
    pub finished_total: IntCounterVec,

    /// Current job queue depth
    pub queue_depth: IntGauge,

    /// Time jobs spend queued before a worker claims them
    pub queue_time: Histogram,

    /// Jobs rejected because the queue was full
    pub rejected_total: IntCounter,
}

lazy_static! {
    /// Global metrics registry instance
    pub static ref METRICS: MetricsRegistry = MetricsRegistry::new();
}

fn histogram(name: &str, help: &str, buckets: Vec<f64>) -> Histogram {
    Histogram::with_opts(HistogramOpts::new(name, help).buckets(buckets))
        .expect("histogram options are valid")
}

fn counter(name: &str, help: &str) -> IntCounter {
    IntCounter::new(name, help).expect("counter options are valid")
}

fn gauge(name: &str, help: &str) -> IntGauge {
    IntGauge::new(name, help).expect("gauge options are valid")
}

impl MetricsRegistry {
    /// Create a new metrics registry
    pub fn new() -> Self {
        let registry = Arc::new(Registry::new());

        // Inference metrics
        let requests_total = counter(
            "inference_requests_total",
            "Total number of inference requests",
        );

        let requests_success = counter(
            "inference_requests_success_total",
            "Total number of successful inference requests",
        );

        let requests_failed = counter(
            "inference_requests_failed_total",
            "Total number of failed inference requests",
        );

        let request_duration = histogram(
            "inference_request_duration_seconds",
            "Inference request duration in seconds",
            vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0],
        );

        let forward_duration = histogram(
            "inference_forward_duration_seconds",
            "Single stochastic forward pass duration in seconds",
            vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5],
        );

        let render_duration = histogram(
            "inference_render_duration_seconds",
            "Output rendering duration in seconds",
            vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5],
        );

        let active_requests = gauge(
            "inference_active_requests",
            "Current number of active inference requests",
        );

        // Job metrics
        let created_total = counter("jobs_created_total", "Total number of jobs created");

        let finished_total = IntCounterVec::new(
            Opts::new("jobs_finished_total", "Terminal job transitions by status"),
            &["status"],
        )
        .expect("counter vec options are valid");

        let queue_depth = gauge("jobs_queue_depth", "Current depth of the job queue");

        let queue_time = histogram(
            "jobs_queue_time_seconds",
            "Time jobs spend queued before processing",
            vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0],
        );

        let rejected_total = counter(
            "jobs_rejected_total",
            "Jobs rejected because the queue was full",
        );

        // Register all metrics
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(requests_total.clone()),
            Box::new(requests_success.clone()),
            Box::new(requests_failed.clone()),
            Box::new(request_duration.clone()),
            Box::new(forward_duration.clone()),
            Box::new(render_duration.clone()),
            Box::new(active_requests.clone()),
            Box::new(created_total.clone()),
            Box::new(finished_total.clone()),
            Box::new(queue_depth.clone()),
            Box::new(queue_time.clone()),
            Box::new(rejected_total.clone()),
        ];
        for collector in collectors {
            registry
                .register(collector)
                .expect("metric names are unique within the registry");
        }

        let inference = InferenceMetrics {
            requests_total,
            requests_success,
            requests_failed,
            request_duration,
            forward_duration,
            render_duration,
            active_requests,
        };

        let jobs = JobMetrics {
            created_total,
            finished_total,
            queue_depth,
            queue_time,
            rejected_total,
        };

        MetricsRegistry {
            registry,
            inference,
            jobs,
        }
    }

    /// Gather all metrics as text
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper trait for measuring latency
pub trait LatencyTimer {
    /// Observe the duration of a closure
    fn time<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R;
}

impl LatencyTimer for Histogram {
    fn time<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = std::time::Instant::now();
        let result = f();
        self.observe(start.elapsed().as_secs_f64());
        result
    }
}
