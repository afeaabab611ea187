//! Parameter initialization strategies
//!
//! A filler writes initial values into a buffer. The layer receives its scale
//! and shift fillers as injected strategies, so any type implementing
//! [`Filler`] works, including plain closures:
//!
//! ```
//! use rust_batch_norm::filler::{Filler, ConstantFiller};
//! use rust_batch_norm::utils::SimpleRng;
//!
//! let mut rng = SimpleRng::new(1);
//! let mut values = vec![0.0f32; 4];
//!
//! ConstantFiller::new(2.0).fill(&mut values, &mut rng);
//! assert_eq!(values, vec![2.0; 4]);
//!
//! let ramp = |buf: &mut [f32], _: &mut SimpleRng| {
//!     for (i, v) in buf.iter_mut().enumerate() {
//!         *v = i as f32;
//!     }
//! };
//! ramp.fill(&mut values, &mut rng);
//! assert_eq!(values, vec![0.0, 1.0, 2.0, 3.0]);
//! ```

use crate::error::{BatchNormError, Result};
use crate::utils::SimpleRng;
use serde::Deserialize;

/// Strategy that initializes a parameter buffer.
pub trait Filler {
    /// Overwrites every value in `values`.
    fn fill(&self, values: &mut [f32], rng: &mut SimpleRng);
}

impl<F> Filler for F
where
    F: Fn(&mut [f32], &mut SimpleRng),
{
    fn fill(&self, values: &mut [f32], rng: &mut SimpleRng) {
        self(values, rng)
    }
}

/// Fills every value with the same constant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantFiller {
    value: f32,
}

impl ConstantFiller {
    pub fn new(value: f32) -> Self {
        Self { value }
    }
}

impl Filler for ConstantFiller {
    fn fill(&self, values: &mut [f32], _rng: &mut SimpleRng) {
        values.iter_mut().for_each(|v| *v = self.value);
    }
}

/// Draws values from a normal distribution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianFiller {
    mean: f32,
    std: f32,
}

impl GaussianFiller {
    pub fn new(mean: f32, std: f32) -> Self {
        Self { mean, std }
    }
}

impl Default for GaussianFiller {
    fn default() -> Self {
        Self::new(0.0, 1.0)
    }
}

impl Filler for GaussianFiller {
    fn fill(&self, values: &mut [f32], rng: &mut SimpleRng) {
        for v in values.iter_mut() {
            *v = rng.gen_gaussian_f32(self.mean, self.std);
        }
    }
}

/// Draws values uniformly from `[min, max)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UniformFiller {
    min: f32,
    max: f32,
}

impl UniformFiller {
    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }
}

impl Filler for UniformFiller {
    fn fill(&self, values: &mut [f32], rng: &mut SimpleRng) {
        if self.min == self.max {
            values.iter_mut().for_each(|v| *v = self.min);
            return;
        }
        for v in values.iter_mut() {
            *v = rng.gen_range_f32(self.min, self.max);
        }
    }
}

/// Filler description as it appears in JSON configuration.
///
/// ```json
/// { "type": "constant", "value": 1.0 }
/// { "type": "gaussian", "mean": 0.0, "std": 1.0 }
/// { "type": "uniform", "min": -0.5, "max": 0.5 }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FillerConfig {
    Constant {
        #[serde(default)]
        value: f32,
    },
    Gaussian {
        #[serde(default)]
        mean: f32,
        #[serde(default = "default_std")]
        std: f32,
    },
    Uniform {
        #[serde(default)]
        min: f32,
        #[serde(default = "default_uniform_max")]
        max: f32,
    },
}

fn default_std() -> f32 {
    1.0
}

fn default_uniform_max() -> f32 {
    1.0
}

impl FillerConfig {
    pub fn constant(value: f32) -> Self {
        FillerConfig::Constant { value }
    }

    /// Checks that the parameters describe a valid distribution.
    pub fn validate(&self) -> Result<()> {
        match *self {
            FillerConfig::Constant { value } if !value.is_finite() => Err(
                BatchNormError::InvalidConfig(format!("constant filler value {} is not finite", value)),
            ),
            FillerConfig::Gaussian { mean, std } if !mean.is_finite() || !std.is_finite() || std < 0.0 => {
                Err(BatchNormError::InvalidConfig(format!(
                    "gaussian filler needs finite mean and non-negative std, got mean {} std {}",
                    mean, std
                )))
            }
            FillerConfig::Uniform { min, max } if !min.is_finite() || !max.is_finite() || min > max => {
                Err(BatchNormError::InvalidConfig(format!(
                    "uniform filler needs finite min <= max, got [{}, {})",
                    min, max
                )))
            }
            _ => Ok(()),
        }
    }

    /// Validates the description and builds the matching filler.
    pub fn build(&self) -> Result<Box<dyn Filler>> {
        self.validate()?;
        Ok(match *self {
            FillerConfig::Constant { value } => Box::new(ConstantFiller::new(value)),
            FillerConfig::Gaussian { mean, std } => Box::new(GaussianFiller::new(mean, std)),
            FillerConfig::Uniform { min, max } => Box::new(UniformFiller::new(min, max)),
        })
    }
}

impl Default for FillerConfig {
    fn default() -> Self {
        FillerConfig::constant(0.0)
    }
}
