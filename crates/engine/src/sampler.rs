//! Monte Carlo sampling
//!
//! Runs the same input through the model N times with dropout active and
//! stacks the reconstructions into a `(N, C, H, W)` tensor.

use crate::error::{NeuroPixelError, Result, TensorResultExt};
use crate::model::DropoutAutoencoder;
use candle_core::Tensor;
use neuropixel_common::metrics::{LatencyTimer, METRICS};
use parking_lot::Mutex;
use tracing::info;

/// Log progress every this many passes
const PROGRESS_INTERVAL: usize = 5;

/// N stochastic reconstructions of one input, stacked on the first axis
#[derive(Debug, Clone)]
pub struct McSampleSet {
    samples: Tensor,
}

impl McSampleSet {
    /// Wrap a `(N, C, H, W)` tensor with `N >= 1`
    pub fn new(samples: Tensor) -> Result<Self> {
        let (n, _, _, _) = samples.dims4().tensor_context("sample set")?;
        if n == 0 {
            return Err(NeuroPixelError::invalid_input("Sample set must not be empty"));
        }
        Ok(Self { samples })
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.samples.dims()[0]
    }

    /// Always false; an empty set cannot be constructed
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(C, H, W)` of one sample
    pub fn sample_shape(&self) -> (usize, usize, usize) {
        let dims = self.samples.dims();
        (dims[1], dims[2], dims[3])
    }

    /// Stacked samples, `(N, C, H, W)`
    pub fn tensor(&self) -> &Tensor {
        &self.samples
    }
}

/// Drives N forward passes over a shared model
///
/// The model itself is read-only, so concurrent callers may sample at the
/// same time. Backends that cannot run forwards concurrently can opt into
/// serialization; only the forward call is held under the lock.
#[derive(Debug)]
pub struct McSampler {
    num_samples: usize,
    forward_lock: Option<Mutex<()>>,
}

impl McSampler {
    pub fn new(num_samples: usize, serialize_forward: bool) -> Result<Self> {
        if num_samples == 0 {
            return Err(NeuroPixelError::config("num_mc_samples must be at least 1"));
        }
        Ok(Self {
            num_samples,
            forward_lock: serialize_forward.then(|| Mutex::new(())),
        })
    }

    /// Number of passes per request
    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    /// Run N passes over a `(1, C, H, W)` input
    pub fn sample(&self, model: &DropoutAutoencoder, input: &Tensor) -> Result<McSampleSet> {
        let mut outputs = Vec::with_capacity(self.num_samples);

        for i in 0..self.num_samples {
            let output = METRICS
                .inference
                .forward_duration
                .time(|| self.forward_once(model, input))?;
            outputs.push(output.squeeze(0).tensor_context("dropping batch axis")?);

            let done = i + 1;
            if done % PROGRESS_INTERVAL == 0 || done == self.num_samples {
                info!("MC sample {}/{} done", done, self.num_samples);
            }
        }

        let stacked = Tensor::stack(&outputs, 0).tensor_context("stacking samples")?;
        McSampleSet::new(stacked)
    }

    fn forward_once(&self, model: &DropoutAutoencoder, input: &Tensor) -> Result<Tensor> {
        match &self.forward_lock {
            Some(lock) => {
                let _guard = lock.lock();
                model.forward(input)
            }
            None => model.forward(input),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};
    use neuropixel_common::config::ModelConfig;

    fn tiny_config() -> ModelConfig {
        ModelConfig {
            image_size: 16,
            channels: vec![4, 8],
            ..ModelConfig::default()
        }
    }

    fn random_model() -> (VarMap, DropoutAutoencoder) {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = DropoutAutoencoder::from_var_builder(&tiny_config(), vb, &device).unwrap();
        (varmap, model)
    }

    #[test]
    fn test_sample_shape() {
        let (_varmap, model) = random_model();
        let input = Tensor::rand(0f32, 1f32, (1, 3, 16, 16), &Device::Cpu).unwrap();

        let sampler = McSampler::new(4, false).unwrap();
        let set = sampler.sample(&model, &input).unwrap();

        assert_eq!(set.len(), 4);
        assert_eq!(set.sample_shape(), (3, 16, 16));
        assert_eq!(set.tensor().dims(), &[4, 3, 16, 16]);
    }

    #[test]
    fn test_samples_differ_with_dropout() {
        let (_varmap, model) = random_model();
        let input = Tensor::rand(0f32, 1f32, (1, 3, 16, 16), &Device::Cpu).unwrap();

        let sampler = McSampler::new(2, true).unwrap();
        let set = sampler.sample(&model, &input).unwrap();

        let first: Vec<f32> = set.tensor().get(0).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        let second: Vec<f32> = set.tensor().get(1).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_single_sample() {
        let (_varmap, model) = random_model();
        let input = Tensor::rand(0f32, 1f32, (1, 3, 16, 16), &Device::Cpu).unwrap();

        let set = McSampler::new(1, false).unwrap().sample(&model, &input).unwrap();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_zero_samples_rejected() {
        let err = McSampler::new(0, false).unwrap_err();
        assert!(matches!(err, NeuroPixelError::Config(_)));
    }

    #[test]
    fn test_empty_set_rejected() {
        let empty = Tensor::zeros((0, 3, 4, 4), DType::F32, &Device::Cpu).unwrap();
        assert!(McSampleSet::new(empty).is_err());
    }
}
