//! Configuration structures for NeuroPixel
//!
//! This module defines all configuration types used by the inference engine
//! and the job server. Configurations are loaded from YAML files and can be
//! overridden by environment variables.

use crate::error::{NeuroPixelError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for NeuroPixel components
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeuroPixelConfig {
    /// Server binding address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Upload handling
    #[serde(default)]
    pub server: ServerConfig,

    /// Model architecture and weights
    #[serde(default)]
    pub model: ModelConfig,

    /// Monte Carlo sampling parameters
    #[serde(default)]
    pub inference: InferenceConfig,

    /// Background worker pool
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Upload and storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Directory where uploaded images are stored
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,

    /// Maximum accepted upload size in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// Accepted media types for uploads
    #[serde(default = "default_allowed_media_types")]
    pub allowed_media_types: Vec<String>,

    /// Default page size for job listings
    #[serde(default = "default_list_limit")]
    pub default_list_limit: usize,
}

/// Where tensors live for the lifetime of the process
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    /// Use CUDA device 0 when available, CPU otherwise
    #[default]
    Auto,

    /// Always use the CPU
    Cpu,

    /// Require CUDA device 0
    Cuda,
}

/// Model configuration
///
/// The defaults reproduce the trained autoencoder: six stride-2 blocks
/// taking a 512x512 RGB input down to an 8x8 bottleneck and back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Path to the weights (`.safetensors`, `.pt` or `.pth`)
    #[serde(default = "default_weights_path")]
    pub weights_path: PathBuf,

    /// Square input/output resolution in pixels
    #[serde(default = "default_image_size")]
    pub image_size: usize,

    /// Output channels of each encoder block, outermost first
    #[serde(default = "default_channels")]
    pub channels: Vec<usize>,

    /// Dropout probability used by every dropout layer
    #[serde(default = "default_dropout_p")]
    pub dropout_p: f32,

    /// Whether the bottleneck block is followed by a dropout layer
    #[serde(default)]
    pub bottleneck_dropout: bool,

    /// Device selection policy
    #[serde(default)]
    pub device: DevicePreference,
}

/// Per-channel normalization applied after scaling to [0, 1]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct NormalizationConfig {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

/// Monte Carlo Dropout inference configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Number of stochastic forward passes per request
    #[serde(default = "default_num_mc_samples")]
    pub num_mc_samples: usize,

    /// Optional input normalization. Must match what the model was trained
    /// with; a mismatch degrades output silently.
    #[serde(default)]
    pub normalization: Option<NormalizationConfig>,

    /// Guard every forward pass with a mutex
    #[serde(default)]
    pub serialize_forward: bool,
}

/// Background worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent inference workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Maximum number of queued jobs before uploads are rejected
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable Prometheus metrics endpoint
    #[serde(default = "default_metrics")]
    pub enable_metrics: bool,

    /// Emit JSON log lines instead of human-readable ones
    #[serde(default)]
    pub structured_logging: bool,
}

/// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024
}

fn default_allowed_media_types() -> Vec<String> {
    ["image/jpeg", "image/png", "image/tiff", "image/bmp"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_list_limit() -> usize {
    20
}

fn default_weights_path() -> PathBuf {
    PathBuf::from("models/autoencoder.safetensors")
}

fn default_image_size() -> usize {
    512
}

fn default_channels() -> Vec<usize> {
    vec![64, 128, 256, 512, 512, 512]
}

fn default_dropout_p() -> f32 {
    0.25
}

fn default_num_mc_samples() -> usize {
    30
}

fn default_workers() -> usize {
    1
}

fn default_max_queue_size() -> usize {
    256
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            max_upload_bytes: default_max_upload_bytes(),
            allowed_media_types: default_allowed_media_types(),
            default_list_limit: default_list_limit(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            weights_path: default_weights_path(),
            image_size: default_image_size(),
            channels: default_channels(),
            dropout_p: default_dropout_p(),
            bottleneck_dropout: false,
            device: DevicePreference::Auto,
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            num_mc_samples: default_num_mc_samples(),
            normalization: None,
            serialize_forward: false,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_queue_size: default_max_queue_size(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            enable_metrics: default_metrics(),
            structured_logging: false,
        }
    }
}

impl Default for NeuroPixelConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            server: ServerConfig::default(),
            model: ModelConfig::default(),
            inference: InferenceConfig::default(),
            worker: WorkerConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl ModelConfig {
    /// Validate the architecture parameters
    pub fn validate(&self) -> Result<()> {
        if self.channels.is_empty() {
            return Err(NeuroPixelError::config("model.channels must not be empty"));
        }
        if self.channels.iter().any(|&c| c == 0) {
            return Err(NeuroPixelError::config("model.channels entries must be > 0"));
        }
        if !(0.0..1.0).contains(&self.dropout_p) {
            return Err(NeuroPixelError::config(format!(
                "model.dropout_p must be in [0, 1), got {}",
                self.dropout_p
            )));
        }

        let stride = 1usize
            .checked_shl(self.channels.len() as u32)
            .ok_or_else(|| NeuroPixelError::config("model.channels has too many blocks"))?;
        if self.image_size == 0 || self.image_size % stride != 0 {
            return Err(NeuroPixelError::config(format!(
                "model.image_size {} must be a positive multiple of {}",
                self.image_size, stride
            )));
        }
        Ok(())
    }
}

impl NeuroPixelConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| {
            NeuroPixelError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let config: NeuroPixelConfig = serde_yaml::from_str(&content).map_err(|e| {
            NeuroPixelError::Config(format!("Failed to parse config file {}: {}", path.display(), e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when it exists, otherwise start from defaults, then
    /// apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!(
                "Config file {} not found, using defaults",
                path.display()
            );
            Self::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Override selected fields from `NEUROPIXEL_*` environment variables
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("NEUROPIXEL_BIND_ADDRESS") {
            self.bind_address = addr;
        }
        if let Ok(port) = std::env::var("NEUROPIXEL_PORT") {
            self.port = port
                .parse()
                .map_err(|_| NeuroPixelError::config(format!("Invalid port number: {}", port)))?;
        }
        if let Ok(path) = std::env::var("NEUROPIXEL_MODEL_PATH") {
            self.model.weights_path = PathBuf::from(path);
        }
        if let Ok(dir) = std::env::var("NEUROPIXEL_UPLOAD_DIR") {
            self.server.upload_dir = PathBuf::from(dir);
        }
        if let Ok(samples) = std::env::var("NEUROPIXEL_MC_SAMPLES") {
            self.inference.num_mc_samples = samples.parse().map_err(|_| {
                NeuroPixelError::config(format!("Invalid MC sample count: {}", samples))
            })?;
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;

        if self.inference.num_mc_samples == 0 {
            return Err(NeuroPixelError::config(
                "inference.num_mc_samples must be at least 1",
            ));
        }
        if let Some(norm) = &self.inference.normalization {
            if norm.std.iter().any(|&s| s <= 0.0) {
                return Err(NeuroPixelError::config(
                    "inference.normalization.std entries must be > 0",
                ));
            }
        }
        if self.worker.workers == 0 {
            return Err(NeuroPixelError::config("worker.workers must be at least 1"));
        }
        if self.worker.max_queue_size == 0 {
            return Err(NeuroPixelError::config("worker.max_queue_size must be at least 1"));
        }
        if self.server.allowed_media_types.is_empty() {
            return Err(NeuroPixelError::config(
                "server.allowed_media_types must not be empty",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = NeuroPixelConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.inference.num_mc_samples, 30);
    }

    #[test]
    fn test_config_validation_image_size() {
        let mut config = NeuroPixelConfig::default();
        config.model.image_size = 500;
        assert!(config.validate().is_err());

        config.model.image_size = 64;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_zero_samples() {
        let mut config = NeuroPixelConfig::default();
        config.inference.num_mc_samples = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_dropout_range() {
        let mut config = NeuroPixelConfig::default();
        config.model.dropout_p = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "port: 9000\nmodel:\n  image_size: 32\n  channels: [4, 8]\ninference:\n  num_mc_samples: 5\n  normalization:\n    mean: [0.485, 0.456, 0.406]\n    std: [0.229, 0.224, 0.225]\n",
        )
        .unwrap();

        let config = NeuroPixelConfig::from_file(&path).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.bind_address, "0.0.0.0");
        assert_eq!(config.model.channels, vec![4, 8]);
        assert_eq!(config.model.dropout_p, 0.25);
        assert_eq!(config.model.device, DevicePreference::Auto);
        assert_eq!(config.inference.num_mc_samples, 5);
        assert!(config.inference.normalization.is_some());
        assert_eq!(config.worker.workers, 1);
    }

    #[test]
    fn test_shipped_config_parses() {
        let yaml = include_str!("../../../configs/server-config.yaml");
        let config: NeuroPixelConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.allowed_media_types.len(), 4);
        assert!(config.inference.normalization.is_none());
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "port: not-a-number\n").unwrap();

        let err = NeuroPixelConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, NeuroPixelError::Config(_)));
    }
}
