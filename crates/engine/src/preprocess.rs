//! Image decoding and tensor conversion
//!
//! Turns an arbitrary encoded image into the `(1, 3, S, S)` f32 tensor the
//! network expects: RGB, exact resize, values in [0, 1], optional
//! per-channel normalization.

use crate::error::{NeuroPixelError, Result, TensorResultExt};
use candle_core::{Device, Tensor};
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};
use neuropixel_common::config::NormalizationConfig;
use tracing::debug;

/// Resize filter. Bilinear, matching the training-time transform.
const RESIZE_FILTER: FilterType = FilterType::Triangle;

/// Converts encoded images into model input tensors
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    size: u32,
    normalization: Option<NormalizationConfig>,
    device: Device,
}

impl ImagePreprocessor {
    /// Create a preprocessor producing `size x size` tensors on `device`
    pub fn new(size: usize, normalization: Option<NormalizationConfig>, device: Device) -> Result<Self> {
        let size = u32::try_from(size)
            .map_err(|_| NeuroPixelError::config(format!("Image size {} is too large", size)))?;
        Ok(Self {
            size,
            normalization,
            device,
        })
    }

    /// Decode raw bytes of any supported format
    pub fn decode(&self, bytes: &[u8]) -> Result<DynamicImage> {
        image::load_from_memory(bytes)
            .map_err(|e| NeuroPixelError::unreadable_image(format!("Cannot decode image: {}", e)))
    }

    /// Convert to RGB and resize to the model resolution
    pub fn resize(&self, image: &DynamicImage) -> RgbImage {
        let rgb = image.to_rgb8();
        if rgb.dimensions() == (self.size, self.size) {
            return rgb;
        }
        image::imageops::resize(&rgb, self.size, self.size, RESIZE_FILTER)
    }

    /// Build the `(1, 3, S, S)` input tensor from a decoded image
    pub fn to_tensor(&self, image: &DynamicImage) -> Result<Tensor> {
        let rgb = self.resize(image);
        let size = self.size as usize;
        let plane = size * size;

        // HWC bytes to CHW floats
        let mut data = vec![0f32; 3 * plane];
        for (i, pixel) in rgb.pixels().enumerate() {
            for c in 0..3 {
                let mut value = f32::from(pixel.0[c]) / 255.0;
                if let Some(norm) = &self.normalization {
                    value = (value - norm.mean[c]) / norm.std[c];
                }
                data[c * plane + i] = value;
            }
        }

        Tensor::from_vec(data, (1, 3, size, size), &self.device)
            .tensor_context("building input tensor")
    }

    /// Decode and convert in one step
    pub fn preprocess(&self, bytes: &[u8]) -> Result<Tensor> {
        let image = self.decode(bytes)?;
        debug!(
            "Decoded image {}x{} ({:?})",
            image.width(),
            image.height(),
            image.color()
        );
        self.to_tensor(&image)
    }
}
