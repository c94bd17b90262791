//! Common error types for NeuroPixel
//!
//! This module defines all error types used across the NeuroPixel system.
//! Every variant carries a stable machine-readable code so the HTTP layer
//! can map it to a response without string matching.

use thiserror::Error;

/// Main error type for NeuroPixel
#[derive(Error, Debug)]
pub enum NeuroPixelError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The trained model could not be loaded. Fatal at startup.
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// The source file is not a decodable image
    #[error("Unreadable image: {0}")]
    UnreadableImage(String),

    /// Output tensors could not be turned into images
    #[error("Render error: {0}")]
    Render(String),

    /// Tensor operation errors
    #[error("Tensor error: {0}")]
    Tensor(String),

    /// Catch-all for faults raised while running inference
    #[error("Unhandled error: {0}")]
    Unhandled(String),

    /// Missing job, file or other resource
    #[error("Not found: {0}")]
    NotFound(String),

    /// Request conflicts with the current state of a resource
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Queue full (backpressure)
    #[error("Queue full: {0}")]
    QueueFull(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl NeuroPixelError {
    /// Stable error code, used in HTTP error bodies and metric labels
    pub fn code(&self) -> &'static str {
        match self {
            NeuroPixelError::Config(_) => "CONFIG_ERROR",
            NeuroPixelError::ModelUnavailable(_) => "MODEL_UNAVAILABLE",
            NeuroPixelError::UnreadableImage(_) => "UNREADABLE_IMAGE",
            NeuroPixelError::Render(_) => "RENDER_ERROR",
            NeuroPixelError::Tensor(_) => "TENSOR_ERROR",
            NeuroPixelError::Unhandled(_) => "UNHANDLED",
            NeuroPixelError::NotFound(_) => "NOT_FOUND",
            NeuroPixelError::Conflict(_) => "CONFLICT",
            NeuroPixelError::InvalidInput(_) => "INVALID_INPUT",
            NeuroPixelError::QueueFull(_) => "QUEUE_FULL",
            NeuroPixelError::Serialization(_) => "SERIALIZATION_ERROR",
            NeuroPixelError::Io(_) => "IO_ERROR",
            NeuroPixelError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        NeuroPixelError::Config(msg.into())
    }

    /// Create a model unavailable error
    pub fn model_unavailable(msg: impl Into<String>) -> Self {
        NeuroPixelError::ModelUnavailable(msg.into())
    }

    /// Create an unreadable image error
    pub fn unreadable_image(msg: impl Into<String>) -> Self {
        NeuroPixelError::UnreadableImage(msg.into())
    }

    /// Create a render error
    pub fn render(msg: impl Into<String>) -> Self {
        NeuroPixelError::Render(msg.into())
    }

    /// Create a tensor error
    pub fn tensor(msg: impl Into<String>) -> Self {
        NeuroPixelError::Tensor(msg.into())
    }

    /// Create an unhandled error
    pub fn unhandled(msg: impl Into<String>) -> Self {
        NeuroPixelError::Unhandled(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        NeuroPixelError::NotFound(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        NeuroPixelError::Conflict(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        NeuroPixelError::InvalidInput(msg.into())
    }

    /// Create a queue full error
    pub fn queue_full(msg: impl Into<String>) -> Self {
        NeuroPixelError::QueueFull(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        NeuroPixelError::Internal(msg.into())
    }
}

/// Result type alias for NeuroPixel operations
pub type Result<T> = std::result::Result<T, NeuroPixelError>;
