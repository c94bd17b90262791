//! NeuroPixel Engine
//!
//! Monte Carlo Dropout inference for a convolutional reconstruction
//! autoencoder. The model is loaded once with its dropout layers left in
//! sampling mode; every request runs N stochastic forward passes, reduces
//! them to a mean reconstruction and a variance-based uncertainty map, and
//! renders both as base64 PNG images.

pub mod aggregate;
pub mod device;
pub mod error;
pub mod inference;
pub mod model;
pub mod preprocess;
pub mod render;
pub mod sampler;

pub use aggregate::{aggregate, Aggregate};
pub use device::select_device;
pub use inference::{InferenceEngine, InferenceOutcome};
pub use model::{DropoutAutoencoder, DropoutMode, McDropout};
pub use preprocess::ImagePreprocessor;
pub use render::{render, RenderedImages};
pub use sampler::{McSampleSet, McSampler};
