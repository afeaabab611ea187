//! Rust Batch Normalization Library
//!
//! This library provides a batch normalization layer for 4-D activations
//! (`batch × channel × height × width`) with an analytic backward pass, plus the
//! pieces needed to configure and verify it.
//!
//! # Modules
//!
//! - `blob`: 4-D tensor with value and gradient buffers
//! - `layers`: Layer trait, per-channel statistics and the BatchNorm layer
//! - `filler`: Parameter initialization strategies (constant, Gaussian, uniform)
//! - `gradient_check`: Finite-difference verification of backward passes
//! - `config`: JSON configuration for the layer and the checker
//! - `utils`: Seeded random number generation

pub mod blob;
pub mod config;
pub mod error;
pub mod filler;
pub mod gradient_check;
pub mod layers;
pub mod utils;

pub use blob::Blob;
pub use config::{BatchNormConfig, GradientCheckConfig};
pub use error::{BatchNormError, Result};
pub use gradient_check::{GradientCheckReport, GradientChecker};
pub use layers::{BatchNormCache, BatchNormLayer, Layer};
