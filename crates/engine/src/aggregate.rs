//! Reduction of a Monte Carlo sample set
//!
//! Mean and variance are taken element-wise over the sample axis. Variance
//! is the population variance (divided by N, not N - 1), so it is biased
//! for small N; consumers must not treat it as an unbiased estimate.

use crate::error::{Result, TensorResultExt};
use crate::sampler::McSampleSet;
use candle_core::{Tensor, D};

/// Mean reconstruction and uncertainty of one request
#[derive(Debug, Clone)]
pub struct Aggregate {
    /// `(C, H, W)` mean over the samples
    pub mean: Tensor,

    /// `(C, H, W)` population variance over the samples
    pub variance: Tensor,

    /// `(H, W)` variance averaged across channels
    pub uncertainty: Tensor,
}

/// Reduce `(N, C, H, W)` samples to mean, variance and uncertainty map
///
/// Differences are taken against the first sample before squaring. This
/// keeps the sums small when the samples are close together and makes a
/// set of identical samples yield exactly zero variance.
pub fn aggregate(samples: &McSampleSet) -> Result<Aggregate> {
    let xs = samples.tensor();
    let pivot = xs.get(0).tensor_context("selecting pivot sample")?;

    let deltas = xs
        .broadcast_sub(&pivot.unsqueeze(0).tensor_context("pivot")?)
        .tensor_context("centering samples")?;
    let mean_delta = deltas.mean(0).tensor_context("mean of deltas")?;
    let mean_sq_delta = deltas
        .sqr()
        .and_then(|sq| sq.mean(0))
        .tensor_context("mean of squared deltas")?;

    let mean = (&pivot + &mean_delta).tensor_context("mean")?;
    // Rounding can push the difference slightly below zero.
    let variance = mean_delta
        .sqr()
        .and_then(|sq| mean_sq_delta - sq)
        .and_then(|v| v.relu())
        .tensor_context("variance")?;
    let uncertainty = variance.mean(D::Minus(3)).tensor_context("uncertainty map")?;

    Ok(Aggregate {
        mean,
        variance,
        uncertainty,
    })
}
