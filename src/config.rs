//! Configuration structures for the batch normalization layer
//!
//! This module provides the layer configuration (scale/shift fillers and the
//! variance epsilon) and the gradient checker settings, both loadable from JSON.

use crate::error::{BatchNormError, Result};
use crate::filler::FillerConfig;
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Default variance floor added before the square root.
pub const DEFAULT_EPSILON: f32 = 1e-9;

/// Configuration of a batch normalization layer.
///
/// All fields are optional in JSON:
///
/// - **scale_filler**: initializer for the per-channel scale (default constant 1)
/// - **shift_filler**: initializer for the per-channel shift (default constant 0)
/// - **epsilon**: added to the variance before the square root (default 1e-9)
/// - **gradient_check**: settings used by the `bn_gradcheck` binary
///
/// # Example
///
/// ```json
/// {
///   "scale_filler": { "type": "constant", "value": 2.0 },
///   "shift_filler": { "type": "constant", "value": 1.0 },
///   "epsilon": 1e-9
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BatchNormConfig {
    #[serde(default = "default_scale_filler")]
    pub scale_filler: FillerConfig,

    #[serde(default)]
    pub shift_filler: FillerConfig,

    #[serde(default = "default_epsilon")]
    pub epsilon: f32,

    #[serde(default)]
    pub gradient_check: Option<GradientCheckConfig>,
}

fn default_scale_filler() -> FillerConfig {
    FillerConfig::constant(1.0)
}

fn default_epsilon() -> f32 {
    DEFAULT_EPSILON
}

impl BatchNormConfig {
    /// Config with constant scale and shift fillers and the default epsilon.
    ///
    /// ```
    /// use rust_batch_norm::config::BatchNormConfig;
    ///
    /// let config = BatchNormConfig::with_constants(2.0, 1.0);
    /// assert!(config.validate().is_ok());
    /// ```
    pub fn with_constants(scale: f32, shift: f32) -> Self {
        Self {
            scale_filler: FillerConfig::constant(scale),
            shift_filler: FillerConfig::constant(shift),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_config(self)
    }
}

impl Default for BatchNormConfig {
    fn default() -> Self {
        Self {
            scale_filler: default_scale_filler(),
            shift_filler: FillerConfig::default(),
            epsilon: DEFAULT_EPSILON,
            gradient_check: None,
        }
    }
}

/// Settings of the finite-difference gradient checker.
///
/// `kink` / `kink_range` exclude inputs close to a non-differentiable point;
/// the defaults (`0.0`, `-1.0`) never exclude anything.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct GradientCheckConfig {
    #[serde(default = "default_stepsize")]
    pub stepsize: f32,

    #[serde(default = "default_threshold")]
    pub threshold: f32,

    #[serde(default = "default_seed")]
    pub seed: u64,

    #[serde(default)]
    pub kink: f32,

    #[serde(default = "default_kink_range")]
    pub kink_range: f32,
}

fn default_stepsize() -> f32 {
    1e-2
}

fn default_threshold() -> f32 {
    1e-3
}

fn default_seed() -> u64 {
    1701
}

fn default_kink_range() -> f32 {
    -1.0
}

impl Default for GradientCheckConfig {
    fn default() -> Self {
        Self {
            stepsize: default_stepsize(),
            threshold: default_threshold(),
            seed: default_seed(),
            kink: 0.0,
            kink_range: default_kink_range(),
        }
    }
}

/// Loads a layer configuration from a JSON file.
///
/// Reads the file at `path`, deserializes it into a `BatchNormConfig` and
/// validates it.
///
/// # Returns
///
/// `Ok(BatchNormConfig)` on success, or an error if the file cannot be read,
/// the JSON is invalid, or a value is out of range.
///
/// # Examples
///
/// ```no_run
/// use rust_batch_norm::config::load_config;
///
/// let cfg = load_config("config/bn_scale_two_shift_one.json").unwrap();
/// assert_eq!(cfg.epsilon, 1e-9);
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<BatchNormConfig> {
    let contents = fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parses and validates a layer configuration from a JSON string.
pub fn parse_config(json: &str) -> Result<BatchNormConfig> {
    let config: BatchNormConfig = serde_json::from_str(json)?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &BatchNormConfig) -> Result<()> {
    if !config.epsilon.is_finite() || config.epsilon <= 0.0 {
        return Err(BatchNormError::InvalidConfig(format!(
            "epsilon must be positive, got {}",
            config.epsilon
        )));
    }

    config.scale_filler.validate()?;
    config.shift_filler.validate()?;

    if let Some(check) = config.gradient_check {
        if !check.stepsize.is_finite() || check.stepsize <= 0.0 {
            return Err(BatchNormError::InvalidConfig(
                "gradient_check.stepsize must be positive".to_string(),
            ));
        }
        if !check.threshold.is_finite() || check.threshold <= 0.0 {
            return Err(BatchNormError::InvalidConfig(
                "gradient_check.threshold must be positive".to_string(),
            ));
        }
    }

    Ok(())
}
