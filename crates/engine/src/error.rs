//! Engine error helpers
//!
//! The engine reports every failure through the shared [`NeuroPixelError`]
//! taxonomy. Candle errors are foreign to both crates, so they are converted
//! through an extension trait rather than a `From` impl.

pub use neuropixel_common::error::{NeuroPixelError, Result};

/// Attach context to a candle result and convert it into a tensor error
pub(crate) trait TensorResultExt<T> {
    fn tensor_context(self, what: &str) -> Result<T>;
}

impl<T> TensorResultExt<T> for candle_core::Result<T> {
    fn tensor_context(self, what: &str) -> Result<T> {
        self.map_err(|e| NeuroPixelError::tensor(format!("{}: {}", what, e)))
    }
}
