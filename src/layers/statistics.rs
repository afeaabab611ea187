//! Per-channel batch statistics
//!
//! Reduces an `N × C × H × W` tensor to one mean and one biased variance per
//! channel, aggregating over the batch and spatial axes.
//!
//! The reduction is single pass: for every channel the sum and the sum of
//! squares are accumulated together, then
//!
//! ```text
//! mean     = Σx / m
//! variance = Σx² / m − mean²        (m = N·H·W)
//! ```
//!
//! Sums are accumulated in `f64`. Channels are reduced in parallel, each
//! channel in a fixed order, so repeated calls give identical results.

use crate::error::{BatchNormError, Result};
use rayon::prelude::*;

/// Mean and biased variance of every channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelStats {
    pub mean: Vec<f64>,
    pub variance: Vec<f64>,
}

impl ChannelStats {
    pub fn channels(&self) -> usize {
        self.mean.len()
    }
}

/// Number of values that contribute to each channel's statistics (`N·H·W`).
pub fn reduction_count(shape: [usize; 4]) -> usize {
    shape[0] * shape[2] * shape[3]
}

/// Checks that `shape` has channels and a non-empty reduction.
pub fn validate_shape(shape: [usize; 4]) -> Result<()> {
    if shape[1] == 0 {
        return Err(BatchNormError::NoChannels);
    }
    if reduction_count(shape) == 0 {
        return Err(BatchNormError::EmptyReduction {
            shape: shape.to_vec(),
        });
    }
    Ok(())
}

/// Computes the mean and biased variance of each channel of `data`.
///
/// # Errors
///
/// Fails if `data` does not hold `N·C·H·W` values, if there are no channels,
/// or if the reduction count is zero.
///
/// # Example
///
/// ```
/// use rust_batch_norm::layers::statistics::channel_statistics;
///
/// // Two samples, one channel, 1×2 spatial: values 1, 3, 5, 7
/// let stats = channel_statistics(&[1.0, 3.0, 5.0, 7.0], [2, 1, 1, 2]).unwrap();
/// assert_eq!(stats.mean, vec![4.0]);
/// assert_eq!(stats.variance, vec![5.0]);
/// ```
pub fn channel_statistics(data: &[f32], shape: [usize; 4]) -> Result<ChannelStats> {
    check_len(data.len(), shape)?;
    validate_shape(shape)?;

    let count = reduction_count(shape) as f64;
    let sums = reduce_channels(shape, |idx| {
        let x = data[idx] as f64;
        (x, x * x)
    });

    let (mean, variance): (Vec<f64>, Vec<f64>) = sums
        .into_iter()
        .map(|(sum, sum_sq)| {
            let mean = sum / count;
            (mean, sum_sq / count - mean * mean)
        })
        .unzip();

    Ok(ChannelStats { mean, variance })
}

/// Sums a pair of per-element terms over every `(n, h, w)` of each channel.
///
/// `term` receives the flat index of an element and returns the two values
/// to accumulate for it.
pub(crate) fn reduce_channels<F>(shape: [usize; 4], term: F) -> Vec<(f64, f64)>
where
    F: Fn(usize) -> (f64, f64) + Sync,
{
    let [num, channels, height, width] = shape;
    let spatial = height * width;

    (0..channels)
        .into_par_iter()
        .map(|c| {
            let mut acc = (0.0f64, 0.0f64);
            for n in 0..num {
                let start = (n * channels + c) * spatial;
                for idx in start..start + spatial {
                    let (a, b) = term(idx);
                    acc.0 += a;
                    acc.1 += b;
                }
            }
            acc
        })
        .collect()
}

pub(crate) fn check_len(len: usize, shape: [usize; 4]) -> Result<()> {
    let expected = shape.iter().product::<usize>();
    if len != expected {
        return Err(BatchNormError::ShapeMismatch {
            expected: vec![expected],
            actual: vec![len],
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_reduction_count() {
        assert_eq!(reduction_count([5, 2, 3, 4]), 60);
        assert_eq!(reduction_count([1, 8, 1, 1]), 1);
    }

    #[test]
    fn test_statistics_per_channel() {
        // One sample, two channels, 2×2 spatial.
        // Channel 0: [1, 2, 3, 4] -> mean 2.5, var 1.25
        // Channel 1: [10, 10, 10, 10] -> mean 10, var 0
        let data = vec![1.0f32, 2.0, 3.0, 4.0, 10.0, 10.0, 10.0, 10.0];
        let stats = channel_statistics(&data, [1, 2, 2, 2]).unwrap();

        assert_eq!(stats.channels(), 2);
        assert_abs_diff_eq!(stats.mean[0], 2.5, epsilon = 1e-12);
        assert_abs_diff_eq!(stats.variance[0], 1.25, epsilon = 1e-12);
        assert_abs_diff_eq!(stats.mean[1], 10.0, epsilon = 1e-12);
        assert_abs_diff_eq!(stats.variance[1], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_statistics_aggregate_over_batch() {
        // Two samples, one channel, 1×1 spatial: values 0 and 2.
        let stats = channel_statistics(&[0.0, 2.0], [2, 1, 1, 1]).unwrap();
        assert_abs_diff_eq!(stats.mean[0], 1.0, epsilon = 1e-12);
        // Biased estimator divides by 2, not 1.
        assert_abs_diff_eq!(stats.variance[0], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_statistics_interleaved_channels() {
        // Two samples, two channels, 1×1: layout is [n0c0, n0c1, n1c0, n1c1].
        let stats = channel_statistics(&[1.0, 100.0, 3.0, 300.0], [2, 2, 1, 1]).unwrap();
        assert_abs_diff_eq!(stats.mean[0], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(stats.mean[1], 200.0, epsilon = 1e-12);
        assert_abs_diff_eq!(stats.variance[1], 10_000.0, epsilon = 1e-9);
    }

    #[test]
    fn test_statistics_does_not_mutate_input() {
        let data = vec![0.5f32, -0.5, 1.5, 2.5];
        let before = data.clone();
        let _ = channel_statistics(&data, [1, 1, 2, 2]).unwrap();
        assert_eq!(data, before);
    }

    #[test]
    fn test_rejects_empty_reduction() {
        let result = channel_statistics(&[], [0, 3, 2, 2]);
        assert!(matches!(result, Err(BatchNormError::EmptyReduction { .. })));
    }

    #[test]
    fn test_rejects_no_channels() {
        let result = channel_statistics(&[], [2, 0, 2, 2]);
        assert!(matches!(result, Err(BatchNormError::NoChannels)));
    }

    #[test]
    fn test_rejects_wrong_length() {
        let result = channel_statistics(&[1.0, 2.0, 3.0], [1, 1, 2, 2]);
        assert!(matches!(result, Err(BatchNormError::ShapeMismatch { .. })));
    }
}
