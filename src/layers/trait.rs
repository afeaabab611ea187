//! Layer trait definition
//!
//! This module defines the lifecycle every layer follows: one `setup`, then any
//! number of `forward`/`backward` pairs. Layers expose their parameter blobs so
//! generic tools (the gradient checker, an external optimizer) can read and
//! perturb them without knowing the layer's internals.

use crate::blob::Blob;
use crate::error::Result;

/// Core trait for layers operating on [`Blob`]s.
///
/// # Example
///
/// ```ignore
/// let mut top = Blob::empty();
/// layer.setup(&bottom, &mut top)?;
///
/// layer.forward(&bottom, &mut top)?;
/// // ... fill top.diff_mut() with the gradient of some loss ...
/// layer.backward(&top, &mut bottom)?;
/// ```
pub trait Layer {
    /// Validates the input shape, shapes `top` like `bottom` and allocates
    /// and initializes the layer's parameters.
    ///
    /// # Errors
    ///
    /// Fails when the input shape cannot be handled by the layer.
    fn setup(&mut self, bottom: &Blob, top: &mut Blob) -> Result<()>;

    /// Forward propagation: reads `bottom.data()`, writes `top.data_mut()`,
    /// and caches whatever the following backward call needs.
    fn forward(&mut self, bottom: &Blob, top: &mut Blob) -> Result<()>;

    /// Backward propagation: reads `top.diff()`, writes `bottom.diff_mut()`
    /// and the `diff` of every parameter blob.
    ///
    /// Parameter gradients are overwritten, not accumulated.
    fn backward(&mut self, top: &Blob, bottom: &mut Blob) -> Result<()>;

    /// Learnable parameter blobs, in a fixed order.
    fn params(&self) -> &[Blob];

    fn params_mut(&mut self) -> &mut [Blob];

    /// Total number of learnable values.
    fn parameter_count(&self) -> usize {
        self.params().iter().map(Blob::count).sum()
    }
}
