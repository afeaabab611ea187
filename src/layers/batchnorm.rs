//! Batch normalization layer implementation
//!
//! This module provides a BatchNormLayer that normalizes every channel of a
//! 4-D activation tensor with statistics computed from the current batch, then
//! applies a learned per-channel affine transform.
//!
//! # Batch Normalization Theory
//!
//! For an input of shape `N × C × H × W`, every channel `c` is normalized over
//! its `m = N·H·W` values:
//!
//! 1. Compute batch statistics: mean μ_c and biased variance σ²_c
//! 2. Normalize: x̂ = (x - μ_c) / sqrt(σ²_c + ε)
//! 3. Scale and shift: y = scale_c * x̂ + shift_c
//!
//! # Backward Pass
//!
//! μ_c and σ²_c depend on every input of channel `c`, so the input gradient
//! has a direct term plus one term for each statistic:
//!
//! ```text
//! ∂L/∂shift_c = Σ dy
//! ∂L/∂scale_c = Σ dy · x̂
//! ∂L/∂x       = scale_c / (m · sqrt(σ²_c + ε)) · (m·dy − Σ dy − x̂ · Σ dy·x̂)
//! ```
//!
//! where the sums run over the `m` positions of channel `c`.
//!
//! # References
//!
//! Ioffe, S., & Szegedy, C. (2015). Batch Normalization: Accelerating Deep Network Training
//! by Reducing Internal Covariate Shift. ICML.

use crate::blob::Blob;
use crate::config::{BatchNormConfig, DEFAULT_EPSILON};
use crate::error::{BatchNormError, Result};
use crate::filler::{ConstantFiller, Filler};
use crate::layers::statistics::{
    channel_statistics, check_len, reduce_channels, reduction_count, validate_shape, ChannelStats,
};
use crate::layers::Layer;
use crate::utils::SimpleRng;
use log::{debug, trace, warn};
use rayon::prelude::*;

/// Index of the scale blob in [`Layer::params`].
pub const SCALE: usize = 0;
/// Index of the shift blob in [`Layer::params`].
pub const SHIFT: usize = 1;

const DEFAULT_FILLER_SEED: u64 = 1701;

/// Intermediates of one forward pass, consumed by the following backward pass.
///
/// The cache is rebuilt by every forward call; backward always reads the one
/// from the most recent forward.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchNormCache {
    shape: [usize; 4],
    stats: ChannelStats,
    inv_std: Vec<f64>,
    normalized: Vec<f32>,
}

impl BatchNormCache {
    /// Shape of the input the cache was computed from.
    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    pub fn mean(&self) -> &[f64] {
        &self.stats.mean
    }

    /// Biased variance of every channel.
    pub fn variance(&self) -> &[f64] {
        &self.stats.variance
    }

    /// `1 / sqrt(σ² + ε)` of every channel.
    pub fn inv_std(&self) -> &[f64] {
        &self.inv_std
    }

    /// Normalized input x̂, laid out like the input.
    pub fn normalized(&self) -> &[f32] {
        &self.normalized
    }

    /// Number of values reduced per channel (`N·H·W`).
    pub fn reduction_count(&self) -> usize {
        reduction_count(self.shape)
    }
}

/// Normalizes `bottom`, applies `scale`/`shift`, and writes the result to `top`.
///
/// # Arguments
///
/// * `bottom` - Input values, `N × C × H × W` row-major
/// * `shape` - `[N, C, H, W]`
/// * `scale` - Per-channel scale, length `C`
/// * `shift` - Per-channel shift, length `C`
/// * `epsilon` - Added to the variance before the square root
/// * `top` - Output buffer, same length as `bottom`
///
/// # Returns
///
/// The cache needed by [`batch_norm_backward`].
///
/// # Example
///
/// ```
/// use rust_batch_norm::layers::batchnorm::batch_norm_forward;
///
/// // One channel with values 0, 2 -> mean 1, variance 1
/// let mut top = vec![0.0f32; 2];
/// let cache = batch_norm_forward(&[0.0, 2.0], [2, 1, 1, 1], &[2.0], &[1.0], 1e-9, &mut top).unwrap();
///
/// assert!((top[0] - (-1.0)).abs() < 1e-6);
/// assert!((top[1] - 3.0).abs() < 1e-6);
/// assert_eq!(cache.mean(), &[1.0]);
/// ```
pub fn batch_norm_forward(
    bottom: &[f32],
    shape: [usize; 4],
    scale: &[f32],
    shift: &[f32],
    epsilon: f32,
    top: &mut [f32],
) -> Result<BatchNormCache> {
    let stats = channel_statistics(bottom, shape)?;
    check_len(top.len(), shape)?;
    let channels = shape[1];
    check_channels(scale.len(), channels)?;
    check_channels(shift.len(), channels)?;

    let eps = epsilon as f64;
    for (c, &var) in stats.variance.iter().enumerate() {
        if var < eps {
            warn!("Channel {} has near-zero variance {:e}; normalization is degenerate", c, var);
        }
    }
    let inv_std: Vec<f64> = stats
        .variance
        .iter()
        .map(|&var| 1.0 / (var + eps).sqrt())
        .collect();

    let spatial = shape[2] * shape[3];
    let mut normalized = vec![0.0f32; bottom.len()];

    // Planes are (n, c) pairs, so plane p belongs to channel p % C.
    top.par_chunks_mut(spatial)
        .zip(normalized.par_chunks_mut(spatial))
        .enumerate()
        .for_each(|(plane, (top_plane, norm_plane))| {
            let c = plane % channels;
            let mean = stats.mean[c];
            let inv_std = inv_std[c];
            let scale = scale[c] as f64;
            let shift = shift[c] as f64;
            let input = &bottom[plane * spatial..(plane + 1) * spatial];

            for ((y, x_hat), &x) in top_plane.iter_mut().zip(norm_plane.iter_mut()).zip(input) {
                let norm = (x as f64 - mean) * inv_std;
                *x_hat = norm as f32;
                *y = (scale * norm + shift) as f32;
            }
        });

    Ok(BatchNormCache {
        shape,
        stats,
        inv_std,
        normalized,
    })
}

/// Computes the input, scale and shift gradients from the output gradient.
///
/// `bottom_diff`, `scale_diff` and `shift_diff` are overwritten.
///
/// # Arguments
///
/// * `cache` - Intermediates from the matching [`batch_norm_forward`] call
/// * `scale` - Per-channel scale used in that forward call
/// * `top_diff` - Gradient of the loss w.r.t. the output
/// * `bottom_diff` - Receives the gradient w.r.t. the input
/// * `scale_diff` - Receives the gradient w.r.t. the scale
/// * `shift_diff` - Receives the gradient w.r.t. the shift
pub fn batch_norm_backward(
    cache: &BatchNormCache,
    scale: &[f32],
    top_diff: &[f32],
    bottom_diff: &mut [f32],
    scale_diff: &mut [f32],
    shift_diff: &mut [f32],
) -> Result<()> {
    let shape = cache.shape;
    let channels = shape[1];
    check_len(top_diff.len(), shape)?;
    check_len(bottom_diff.len(), shape)?;
    check_channels(scale.len(), channels)?;
    check_channels(scale_diff.len(), channels)?;
    check_channels(shift_diff.len(), channels)?;

    let normalized = &cache.normalized;
    let sums = reduce_channels(shape, |idx| {
        let dy = top_diff[idx] as f64;
        (dy, dy * normalized[idx] as f64)
    });

    for (c, &(sum_dy, sum_dy_xhat)) in sums.iter().enumerate() {
        shift_diff[c] = sum_dy as f32;
        scale_diff[c] = sum_dy_xhat as f32;
    }

    let m = cache.reduction_count() as f64;
    let spatial = shape[2] * shape[3];
    bottom_diff
        .par_chunks_mut(spatial)
        .enumerate()
        .for_each(|(plane, grad_plane)| {
            let c = plane % channels;
            let (sum_dy, sum_dy_xhat) = sums[c];
            let factor = scale[c] as f64 * cache.inv_std[c] / m;
            let start = plane * spatial;

            for (i, dx) in grad_plane.iter_mut().enumerate() {
                let dy = top_diff[start + i] as f64;
                let x_hat = normalized[start + i] as f64;
                *dx = (factor * (m * dy - sum_dy - x_hat * sum_dy_xhat)) as f32;
            }
        });

    Ok(())
}

fn check_channels(len: usize, channels: usize) -> Result<()> {
    if len != channels {
        return Err(BatchNormError::ShapeMismatch {
            expected: vec![channels],
            actual: vec![len],
        });
    }
    Ok(())
}

/// Batch normalization layer with learnable per-channel scale and shift.
///
/// The channel count is taken from the input at [`Layer::setup`], where the
/// scale and shift blobs (shape `1 × C × 1 × 1`) are allocated and filled.
///
/// # Example
///
/// ```
/// use rust_batch_norm::{BatchNormConfig, BatchNormLayer, Blob, Layer};
///
/// let mut layer = BatchNormLayer::new(&BatchNormConfig::with_constants(2.0, 1.0)).unwrap();
/// let bottom = Blob::from_vec([2, 1, 1, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
/// let mut top = Blob::empty();
///
/// layer.setup(&bottom, &mut top).unwrap();
/// layer.forward(&bottom, &mut top).unwrap();
///
/// assert_eq!(top.shape(), bottom.shape());
/// assert_eq!(layer.scale(), &[2.0]);
/// assert_eq!(layer.parameter_count(), 2);
/// ```
pub struct BatchNormLayer {
    epsilon: f32,
    scale_filler: Box<dyn Filler>,
    shift_filler: Box<dyn Filler>,
    filler_seed: u64,

    // [scale, shift]; empty until setup
    params: Vec<Blob>,
    bottom_shape: Option<[usize; 4]>,
    cache: Option<BatchNormCache>,
}

impl BatchNormLayer {
    /// Creates a layer from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BatchNormError::InvalidConfig`] if epsilon is not positive or
    /// a filler description is invalid.
    pub fn new(config: &BatchNormConfig) -> Result<Self> {
        config.validate()?;
        Self::with_fillers(
            config.scale_filler.build()?,
            config.shift_filler.build()?,
            config.epsilon,
        )
    }

    /// Creates a layer with injected filler strategies.
    pub fn with_fillers(
        scale_filler: Box<dyn Filler>,
        shift_filler: Box<dyn Filler>,
        epsilon: f32,
    ) -> Result<Self> {
        if !epsilon.is_finite() || epsilon <= 0.0 {
            return Err(BatchNormError::InvalidConfig(format!(
                "epsilon must be positive, got {}",
                epsilon
            )));
        }

        Ok(Self {
            epsilon,
            scale_filler,
            shift_filler,
            filler_seed: DEFAULT_FILLER_SEED,
            params: Vec::new(),
            bottom_shape: None,
            cache: None,
        })
    }

    /// Seed handed to the fillers at setup (only random fillers use it).
    pub fn with_filler_seed(mut self, seed: u64) -> Self {
        self.filler_seed = seed;
        self
    }

    pub fn epsilon(&self) -> f32 {
        self.epsilon
    }

    /// Number of channels, or 0 before setup.
    pub fn channels(&self) -> usize {
        self.params.first().map_or(0, Blob::channels)
    }

    pub fn scale(&self) -> &[f32] {
        self.params.get(SCALE).map(Blob::data).unwrap_or_default()
    }

    pub fn shift(&self) -> &[f32] {
        self.params.get(SHIFT).map(Blob::data).unwrap_or_default()
    }

    /// Scale gradient written by the last backward pass.
    pub fn scale_diff(&self) -> &[f32] {
        self.params.get(SCALE).map(Blob::diff).unwrap_or_default()
    }

    /// Shift gradient written by the last backward pass.
    pub fn shift_diff(&self) -> &[f32] {
        self.params.get(SHIFT).map(Blob::diff).unwrap_or_default()
    }

    /// Intermediates of the most recent forward pass.
    pub fn cache(&self) -> Option<&BatchNormCache> {
        self.cache.as_ref()
    }

    fn init_params(&mut self, channels: usize) {
        let mut rng = SimpleRng::new(self.filler_seed);
        let mut scale = Blob::new(1, channels, 1, 1);
        let mut shift = Blob::new(1, channels, 1, 1);
        self.scale_filler.fill(scale.data_mut(), &mut rng);
        self.shift_filler.fill(shift.data_mut(), &mut rng);
        self.params = vec![scale, shift];
    }
}

impl Default for BatchNormLayer {
    /// Scale 1, shift 0, default epsilon.
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_EPSILON,
            scale_filler: Box::new(ConstantFiller::new(1.0)),
            shift_filler: Box::new(ConstantFiller::new(0.0)),
            filler_seed: DEFAULT_FILLER_SEED,
            params: Vec::new(),
            bottom_shape: None,
            cache: None,
        }
    }
}

impl Layer for BatchNormLayer {
    /// Validates the input shape and initializes scale and shift.
    ///
    /// Parameters are filled only on the first setup; later calls keep the
    /// current values as long as the channel count is unchanged.
    fn setup(&mut self, bottom: &Blob, top: &mut Blob) -> Result<()> {
        let shape = bottom.shape();
        validate_shape(shape)?;
        let channels = shape[1];

        if self.params.is_empty() {
            self.init_params(channels);
        } else if self.channels() != channels {
            return Err(BatchNormError::ShapeMismatch {
                expected: vec![self.channels()],
                actual: vec![channels],
            });
        } else {
            debug!("Parameters already initialized, skipping fillers");
        }

        top.reshape_like(bottom);
        self.bottom_shape = Some(shape);
        self.cache = None;

        debug!(
            "BatchNorm setup: shape {:?}, {} channels, reduction count {}, epsilon {:e}",
            shape,
            channels,
            reduction_count(shape),
            self.epsilon
        );
        Ok(())
    }

    fn forward(&mut self, bottom: &Blob, top: &mut Blob) -> Result<()> {
        let shape = self.bottom_shape.ok_or(BatchNormError::NotSetUp)?;
        bottom.ensure_shape(shape)?;
        top.ensure_shape(shape)?;

        let cache = batch_norm_forward(
            bottom.data(),
            shape,
            self.params[SCALE].data(),
            self.params[SHIFT].data(),
            self.epsilon,
            top.data_mut(),
        )?;
        trace!("BatchNorm forward: {} values", bottom.count());
        self.cache = Some(cache);
        Ok(())
    }

    fn backward(&mut self, top: &Blob, bottom: &mut Blob) -> Result<()> {
        let cache = self
            .cache
            .as_ref()
            .ok_or(BatchNormError::MissingForwardCache)?;
        top.ensure_shape(cache.shape())?;
        bottom.ensure_shape(cache.shape())?;

        let channels = cache.shape()[1];
        let mut scale_diff = vec![0.0f32; channels];
        let mut shift_diff = vec![0.0f32; channels];
        batch_norm_backward(
            cache,
            self.params[SCALE].data(),
            top.diff(),
            bottom.diff_mut(),
            &mut scale_diff,
            &mut shift_diff,
        )?;

        self.params[SCALE].diff_mut().copy_from_slice(&scale_diff);
        self.params[SHIFT].diff_mut().copy_from_slice(&shift_diff);
        trace!("BatchNorm backward: {} values", bottom.count());
        Ok(())
    }

    fn params(&self) -> &[Blob] {
        &self.params
    }

    fn params_mut(&mut self) -> &mut [Blob] {
        &mut self.params
    }
}
