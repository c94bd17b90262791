//! Output rendering
//!
//! Converts the aggregate tensors into 8-bit images, encodes them as PNG and
//! wraps the bytes in base64 so they can travel inside JSON.

pub mod palette;

use crate::aggregate::Aggregate;
use crate::error::{NeuroPixelError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use candle_core::{DType, Tensor};
use image::{ImageFormat, RgbImage};
use std::io::Cursor;

pub use palette::{viridis, ZERO_COLOR};

/// Base64 PNG pair returned to clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedImages {
    pub mean_png_b64: String,
    pub uncertainty_png_b64: String,
}

/// Check the rank and read the values as f32
fn read_f32(tensor: &Tensor, rank: usize, what: &str) -> Result<Tensor> {
    if tensor.rank() != rank {
        return Err(NeuroPixelError::render(format!(
            "{} must be rank {}, got shape {:?}",
            what,
            rank,
            tensor.dims()
        )));
    }
    tensor
        .to_dtype(DType::F32)
        .map_err(|e| NeuroPixelError::render(format!("{}: {}", what, e)))
}

fn dimension(value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| NeuroPixelError::render(format!("Dimension {} too large", value)))
}

/// `(3, H, W)` tensor in [0, 1] to an RGB image
///
/// Values are clamped before scaling and truncated to integers.
pub fn mean_to_image(mean: &Tensor) -> Result<RgbImage> {
    let planes: Vec<Vec<Vec<f32>>> = read_f32(mean, 3, "Mean image")?
        .to_vec3()
        .map_err(|e| NeuroPixelError::render(format!("Reading mean image: {}", e)))?;
    if planes.len() != 3 {
        return Err(NeuroPixelError::render(format!(
            "Mean image must have 3 channels, got {}",
            planes.len()
        )));
    }
    let height = planes[0].len();
    let width = planes[0].first().map_or(0, |row| row.len());

    let mut image = RgbImage::new(dimension(width)?, dimension(height)?);
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let (row, col) = (y as usize, x as usize);
        for c in 0..3 {
            let value = planes[c][row][col];
            let value = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
            pixel.0[c] = (value * 255.0) as u8;
        }
    }
    Ok(image)
}

/// `(H, W)` scalar map to a viridis heatmap
///
/// The map is normalized by its own min and max. A constant map has no
/// spread to show and renders entirely in the zero colour.
pub fn uncertainty_to_image(uncertainty: &Tensor) -> Result<RgbImage> {
    let rows: Vec<Vec<f32>> = read_f32(uncertainty, 2, "Uncertainty map")?
        .to_vec2()
        .map_err(|e| NeuroPixelError::render(format!("Reading uncertainty map: {}", e)))?;
    let height = rows.len();
    let width = rows.first().map_or(0, |row| row.len());

    let (min, max) = rows
        .iter()
        .flatten()
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = max - min;
    let flat = !range.is_finite() || range <= 0.0;

    let mut image = RgbImage::new(dimension(width)?, dimension(height)?);
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let value = rows[y as usize][x as usize];
        pixel.0 = if flat || !value.is_finite() {
            ZERO_COLOR
        } else {
            viridis((value - min) / range)
        };
    }
    Ok(image)
}

/// Encode an image as PNG and then as standard base64
pub fn encode_png_base64(image: &RgbImage) -> Result<String> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|e| NeuroPixelError::render(format!("PNG encoding failed: {}", e)))?;
    Ok(STANDARD.encode(buffer.into_inner()))
}

/// Render both outputs of one request
pub fn render(aggregate: &Aggregate) -> Result<RenderedImages> {
    let mean = mean_to_image(&aggregate.mean)?;
    let heatmap = uncertainty_to_image(&aggregate.uncertainty)?;

    Ok(RenderedImages {
        mean_png_b64: encode_png_base64(&mean)?,
        uncertainty_png_b64: encode_png_base64(&heatmap)?,
    })
}
