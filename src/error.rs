//! Error types for the batch normalization layer
//!
//! Every fallible operation in this crate returns [`Result`], so callers can
//! propagate layer, configuration and gradient-check failures with `?`.

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, BatchNormError>;

/// Errors raised by blobs, fillers, layers and the gradient checker.
#[derive(Debug, Error)]
pub enum BatchNormError {
    /// A blob's shape disagrees with the shape the layer was set up for.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// The batch × spatial reduction count is zero, so no statistics exist.
    #[error("Reduction count is zero for input shape {shape:?}")]
    EmptyReduction { shape: Vec<usize> },

    /// The channel axis of the input is empty.
    #[error("Input has no channels")]
    NoChannels,

    /// Forward or backward called before `setup`.
    #[error("Layer used before setup")]
    NotSetUp,

    /// Backward called without a forward pass to take intermediates from.
    #[error("Backward called without a cached forward pass")]
    MissingForwardCache,

    /// A configuration value is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Analytic and numerical gradients disagree beyond the threshold.
    #[error(
        "Gradient mismatch in {blob} at index {index}: computed {computed}, estimated {estimated} (objective element {objective:?})"
    )]
    GradientMismatch {
        blob: String,
        index: usize,
        objective: Option<usize>,
        computed: f64,
        estimated: f64,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
