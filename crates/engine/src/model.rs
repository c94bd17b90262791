//! Dropout autoencoder definition and loading
//!
//! The network is a symmetric stack of stride-2 convolutions. Tensor names
//! follow the PyTorch `nn.Sequential` layout the weights were trained with
//! (`encoder.{i}.weight`, `decoder.{i}.bias`, ...), so the index of every
//! layer inside [`DropoutAutoencoder`] matches its position in the trained
//! sequential containers, activations and dropout layers included.

use crate::error::{NeuroPixelError, Result, TensorResultExt};
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{
    conv2d, conv_transpose2d, Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig,
    VarBuilder,
};
use neuropixel_common::config::ModelConfig;
use std::path::Path;
use tracing::{debug, error, info};

/// Behaviour of a dropout layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropoutMode {
    /// Identity, as in a regular evaluation pass
    Inference,

    /// Draw a fresh Bernoulli mask on every call
    Sampling,
}

/// Dropout layer whose mode is fixed once the model is built
#[derive(Debug, Clone)]
pub struct McDropout {
    p: f32,
    mode: DropoutMode,
}

impl McDropout {
    /// Create a dropout layer in inference mode
    pub fn new(p: f32) -> Self {
        Self {
            p,
            mode: DropoutMode::Inference,
        }
    }

    /// Current mode
    pub fn mode(&self) -> DropoutMode {
        self.mode
    }

    /// Drop probability
    pub fn p(&self) -> f32 {
        self.p
    }

    fn enable_sampling(&mut self) {
        self.mode = DropoutMode::Sampling;
    }

    /// Apply the layer. Surviving activations are scaled by `1 / (1 - p)`.
    pub fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        match self.mode {
            DropoutMode::Sampling if self.p > 0.0 => candle_nn::ops::dropout(xs, self.p),
            _ => Ok(xs.clone()),
        }
    }
}

/// One entry of a sequential container
#[derive(Debug)]
enum Layer {
    Conv(Conv2d),
    ConvTranspose(ConvTranspose2d),
    Relu,
    Sigmoid,
    Dropout(McDropout),
}

impl Layer {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Layer::Conv(conv) => conv.forward(xs),
            Layer::ConvTranspose(conv) => conv.forward(xs),
            Layer::Relu => xs.relu(),
            Layer::Sigmoid => candle_nn::ops::sigmoid(xs),
            Layer::Dropout(dropout) => dropout.forward(xs),
        }
    }
}

fn down_config() -> Conv2dConfig {
    Conv2dConfig {
        padding: 1,
        stride: 2,
        dilation: 1,
        groups: 1,
        ..Default::default()
    }
}

fn up_config() -> ConvTranspose2dConfig {
    ConvTranspose2dConfig {
        padding: 1,
        output_padding: 1,
        stride: 2,
        dilation: 1,
    }
}

/// Open a weights file as a variable source
fn open_weights(path: &Path, device: &Device) -> candle_core::Result<VarBuilder<'static>> {
    let is_safetensors = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("safetensors"))
        .unwrap_or(false);

    if is_safetensors {
        // SAFETY: the weights file is not modified while the process runs.
        unsafe { VarBuilder::from_mmaped_safetensors(&[path], DType::F32, device) }
    } else {
        VarBuilder::from_pth(path, DType::F32, device)
    }
}

const KERNEL_SIZE: usize = 3;
const IMAGE_CHANNELS: usize = 3;

/// Encoder-decoder network used for Monte Carlo Dropout reconstruction
///
/// Built once, then shared read-only. All dropout layers are switched to
/// [`DropoutMode::Sampling`] during construction and never switched back.
#[derive(Debug)]
pub struct DropoutAutoencoder {
    config: ModelConfig,
    encoder: Vec<Layer>,
    decoder: Vec<Layer>,
    device: Device,
}

impl DropoutAutoencoder {
    /// Load weights from disk onto `device`
    ///
    /// `.safetensors` files are memory-mapped; anything else is read as a
    /// PyTorch state dict. Any failure is reported as `ModelUnavailable`.
    pub fn load<P: AsRef<Path>>(weights_path: P, config: &ModelConfig, device: &Device) -> Result<Self> {
        let path = weights_path.as_ref();
        info!("Attempting to load model from {}", path.display());

        config.validate()?;

        if !path.is_file() {
            error!("Model file not found at {}", path.display());
            return Err(NeuroPixelError::model_unavailable(format!(
                "Model file not found at {}",
                path.display()
            )));
        }

        let vb = open_weights(path, device).map_err(|e| {
            error!("Error reading weights from {}: {}", path.display(), e);
            NeuroPixelError::model_unavailable(format!(
                "Failed to read weights from {}: {}",
                path.display(),
                e
            ))
        })?;

        let model = Self::from_var_builder(config, vb, device).map_err(|e| match e {
            NeuroPixelError::ModelUnavailable(msg) => {
                error!("Error loading model: {}", msg);
                NeuroPixelError::model_unavailable(format!("{} ({})", msg, path.display()))
            }
            other => other,
        })?;

        info!(
            "Model loaded successfully: {} blocks, {}x{} input, {} dropout layers in sampling mode",
            config.channels.len(),
            config.image_size,
            config.image_size,
            model.dropout_layers().count()
        );
        Ok(model)
    }

    /// Build the network from an arbitrary variable source
    pub fn from_var_builder(config: &ModelConfig, vb: VarBuilder, device: &Device) -> Result<Self> {
        config.validate()?;

        let encoder = Self::build_encoder(config, vb.pp("encoder")).map_err(|e| {
            NeuroPixelError::model_unavailable(format!("Failed to build encoder: {}", e))
        })?;
        let decoder = Self::build_decoder(config, vb.pp("decoder")).map_err(|e| {
            NeuroPixelError::model_unavailable(format!("Failed to build decoder: {}", e))
        })?;

        let mut model = Self {
            config: config.clone(),
            encoder,
            decoder,
            device: device.clone(),
        };
        model.enable_mc_dropout();
        Ok(model)
    }

    fn build_encoder(config: &ModelConfig, vb: VarBuilder) -> candle_core::Result<Vec<Layer>> {
        let mut layers = Vec::new();
        let mut in_channels = IMAGE_CHANNELS;
        let last_block = config.channels.len() - 1;

        for (block, &out_channels) in config.channels.iter().enumerate() {
            let conv = conv2d(
                in_channels,
                out_channels,
                KERNEL_SIZE,
                down_config(),
                vb.pp(layers.len().to_string()),
            )?;
            layers.push(Layer::Conv(conv));
            layers.push(Layer::Relu);
            if block < last_block || config.bottleneck_dropout {
                layers.push(Layer::Dropout(McDropout::new(config.dropout_p)));
            }
            in_channels = out_channels;
        }

        Ok(layers)
    }

    fn build_decoder(config: &ModelConfig, vb: VarBuilder) -> candle_core::Result<Vec<Layer>> {
        let mut widths: Vec<usize> = config.channels.iter().rev().copied().collect();
        widths.push(IMAGE_CHANNELS);

        let mut layers = Vec::new();
        let last_block = widths.len() - 2;

        for (block, pair) in widths.windows(2).enumerate() {
            let conv = conv_transpose2d(
                pair[0],
                pair[1],
                KERNEL_SIZE,
                up_config(),
                vb.pp(layers.len().to_string()),
            )?;
            layers.push(Layer::ConvTranspose(conv));
            if block < last_block {
                layers.push(Layer::Relu);
                layers.push(Layer::Dropout(McDropout::new(config.dropout_p)));
            } else {
                layers.push(Layer::Sigmoid);
            }
        }

        Ok(layers)
    }

    /// Put every dropout layer into sampling mode. Other layers are
    /// stateless and stay deterministic.
    fn enable_mc_dropout(&mut self) {
        info!("Enabling dropout layers for Monte Carlo inference");
        for layer in self.encoder.iter_mut().chain(self.decoder.iter_mut()) {
            if let Layer::Dropout(dropout) = layer {
                dropout.enable_sampling();
            }
        }
    }

    /// All dropout layers, encoder first
    pub fn dropout_layers(&self) -> impl Iterator<Item = &McDropout> {
        self.encoder
            .iter()
            .chain(self.decoder.iter())
            .filter_map(|layer| match layer {
                Layer::Dropout(dropout) => Some(dropout),
                _ => None,
            })
    }

    /// One stochastic forward pass over a `(B, 3, S, S)` batch
    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let (_, channels, height, width) = xs.dims4().tensor_context("model input")?;
        let size = self.config.image_size;
        if channels != IMAGE_CHANNELS || height != size || width != size {
            return Err(NeuroPixelError::invalid_input(format!(
                "Expected input (B, {}, {}, {}), got {:?}",
                IMAGE_CHANNELS,
                size,
                size,
                xs.dims()
            )));
        }

        let mut hidden = xs.clone();
        for layer in self.encoder.iter().chain(self.decoder.iter()) {
            hidden = layer.forward(&hidden).tensor_context("forward pass")?;
        }
        debug!("Forward pass output shape: {:?}", hidden.dims());
        Ok(hidden)
    }

    /// Architecture parameters
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Device the weights live on
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// `(C, H, W)` of a single reconstruction
    pub fn output_shape(&self) -> (usize, usize, usize) {
        let size = self.config.image_size;
        (IMAGE_CHANNELS, size, size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarMap;

    fn tiny_config() -> ModelConfig {
        ModelConfig {
            image_size: 16,
            channels: vec![4, 8],
            dropout_p: 0.25,
            ..ModelConfig::default()
        }
    }

    #[test]
    fn test_dropout_layers_enabled_at_build() {
        let device = Device::Cpu;
        let vb = VarBuilder::zeros(DType::F32, &device);
        let model = DropoutAutoencoder::from_var_builder(&tiny_config(), vb, &device).unwrap();

        // One dropout after the first encoder block, one after the first
        // decoder block; neither the bottleneck nor the output layer has one.
        assert_eq!(model.dropout_layers().count(), 2);
        assert!(model
            .dropout_layers()
            .all(|d| d.mode() == DropoutMode::Sampling && d.p() == 0.25));
    }

    #[test]
    fn test_bottleneck_dropout_adds_layer() {
        let device = Device::Cpu;
        let config = ModelConfig {
            bottleneck_dropout: true,
            ..tiny_config()
        };
        let vb = VarBuilder::zeros(DType::F32, &device);
        let model = DropoutAutoencoder::from_var_builder(&config, vb, &device).unwrap();

        assert_eq!(model.dropout_layers().count(), 3);
    }

    #[test]
    fn test_zero_weights_forward() {
        let device = Device::Cpu;
        let vb = VarBuilder::zeros(DType::F32, &device);
        let model = DropoutAutoencoder::from_var_builder(&tiny_config(), vb, &device).unwrap();

        let input = Tensor::ones((1, 3, 16, 16), DType::F32, &device).unwrap();
        let output = model.forward(&input).unwrap();

        assert_eq!(output.dims(), &[1, 3, 16, 16]);
        // Zero weights and biases leave only the sigmoid of zero.
        let values: Vec<f32> = output.flatten_all().unwrap().to_vec1().unwrap();
        assert!(values.iter().all(|&v| (v - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_rejects_wrong_input_shape() {
        let device = Device::Cpu;
        let vb = VarBuilder::zeros(DType::F32, &device);
        let model = DropoutAutoencoder::from_var_builder(&tiny_config(), vb, &device).unwrap();

        let input = Tensor::ones((1, 3, 32, 32), DType::F32, &device).unwrap();
        let err = model.forward(&input).unwrap_err();
        assert!(matches!(err, NeuroPixelError::InvalidInput(_)));
    }

    #[test]
    fn test_mc_dropout_modes() {
        let device = Device::Cpu;
        let xs = Tensor::ones(1000, DType::F32, &device).unwrap();

        let mut dropout = McDropout::new(0.5);
        let identity: Vec<f32> = dropout.forward(&xs).unwrap().to_vec1().unwrap();
        assert!(identity.iter().all(|&v| v == 1.0));

        dropout.enable_sampling();
        let sampled: Vec<f32> = dropout.forward(&xs).unwrap().to_vec1().unwrap();
        assert!(sampled.iter().all(|&v| v == 0.0 || (v - 2.0).abs() < 1e-6));
        assert!(sampled.iter().any(|&v| v == 0.0));
        assert!(sampled.iter().any(|&v| v != 0.0));
    }

    #[test]
    fn test_load_missing_weights() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.safetensors");

        let err = DropoutAutoencoder::load(&path, &tiny_config(), &Device::Cpu).unwrap_err();
        assert!(matches!(err, NeuroPixelError::ModelUnavailable(_)));
        assert!(err.to_string().contains("missing.safetensors"));
    }

    #[test]
    fn test_load_corrupt_weights() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.safetensors");
        std::fs::write(&path, b"definitely not a safetensors file").unwrap();

        let err = DropoutAutoencoder::load(&path, &tiny_config(), &Device::Cpu).unwrap_err();
        assert!(matches!(err, NeuroPixelError::ModelUnavailable(_)));
    }

    #[test]
    fn test_saved_weights_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");
        let device = Device::Cpu;

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        DropoutAutoencoder::from_var_builder(&tiny_config(), vb, &device).unwrap();
        varmap.save(&path).unwrap();

        let model = DropoutAutoencoder::load(&path, &tiny_config(), &device).unwrap();
        assert_eq!(model.output_shape(), (3, 16, 16));
        assert_eq!(model.dropout_layers().count(), 2);

        // Same file, different architecture: the shapes no longer line up.
        let wider = ModelConfig {
            channels: vec![4, 16],
            ..tiny_config()
        };
        let err = DropoutAutoencoder::load(&path, &wider, &device).unwrap_err();
        assert!(matches!(err, NeuroPixelError::ModelUnavailable(_)));
    }
}
