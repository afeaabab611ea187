//! Four-dimensional tensor with value and gradient buffers
//!
//! A [`Blob`] stores `num × channels × height × width` values in row-major
//! order, together with a same-sized `diff` buffer that holds the gradient of
//! some objective with respect to those values. Layers read `data` during the
//! forward pass and write `diff` during the backward pass.

use crate::error::{BatchNormError, Result};

/// Dense 4-D tensor indexed by `(sample, channel, row, column)`.
///
/// # Example
///
/// ```
/// use rust_batch_norm::Blob;
///
/// let mut blob = Blob::new(2, 3, 4, 5);
/// assert_eq!(blob.count(), 120);
/// let idx = blob.offset(1, 2, 3, 4);
/// blob.data_mut()[idx] = 7.0;
/// assert_eq!(blob.data_at(1, 2, 3, 4), 7.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    shape: [usize; 4],
    data: Vec<f32>,
    diff: Vec<f32>,
}

impl Blob {
    /// Creates a zero-filled blob with the given shape.
    pub fn new(num: usize, channels: usize, height: usize, width: usize) -> Self {
        let count = num * channels * height * width;
        Self {
            shape: [num, channels, height, width],
            data: vec![0.0f32; count],
            diff: vec![0.0f32; count],
        }
    }

    /// Creates an empty blob, to be shaped later by a layer's setup.
    pub fn empty() -> Self {
        Self::new(0, 0, 0, 0)
    }

    /// Creates a blob from existing values.
    ///
    /// # Errors
    ///
    /// Returns [`BatchNormError::ShapeMismatch`] if `data` does not hold exactly
    /// `num × channels × height × width` values.
    pub fn from_vec(shape: [usize; 4], data: Vec<f32>) -> Result<Self> {
        let count = shape.iter().product::<usize>();
        if data.len() != count {
            return Err(BatchNormError::ShapeMismatch {
                expected: vec![count],
                actual: vec![data.len()],
            });
        }
        Ok(Self {
            shape,
            data,
            diff: vec![0.0f32; count],
        })
    }

    /// Changes the shape, reallocating only when the element count changes.
    ///
    /// Values are zeroed whenever the count changes.
    pub fn reshape(&mut self, num: usize, channels: usize, height: usize, width: usize) {
        let count = num * channels * height * width;
        self.shape = [num, channels, height, width];
        if count != self.data.len() {
            self.data = vec![0.0f32; count];
            self.diff = vec![0.0f32; count];
        }
    }

    /// Reshapes to match `other`.
    pub fn reshape_like(&mut self, other: &Blob) {
        let [n, c, h, w] = other.shape;
        self.reshape(n, c, h, w);
    }

    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    pub fn num(&self) -> usize {
        self.shape[0]
    }

    pub fn channels(&self) -> usize {
        self.shape[1]
    }

    pub fn height(&self) -> usize {
        self.shape[2]
    }

    pub fn width(&self) -> usize {
        self.shape[3]
    }

    /// Number of values in one `height × width` plane.
    pub fn spatial_dim(&self) -> usize {
        self.shape[2] * self.shape[3]
    }

    pub fn count(&self) -> usize {
        self.data.len()
    }

    /// Flat index of `(n, c, h, w)`.
    pub fn offset(&self, n: usize, c: usize, h: usize, w: usize) -> usize {
        debug_assert!(n < self.shape[0] && c < self.shape[1]);
        debug_assert!(h < self.shape[2] && w < self.shape[3]);
        ((n * self.shape[1] + c) * self.shape[2] + h) * self.shape[3] + w
    }

    pub fn data_at(&self, n: usize, c: usize, h: usize, w: usize) -> f32 {
        self.data[self.offset(n, c, h, w)]
    }

    pub fn diff_at(&self, n: usize, c: usize, h: usize, w: usize) -> f32 {
        self.diff[self.offset(n, c, h, w)]
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn diff(&self) -> &[f32] {
        &self.diff
    }

    pub fn diff_mut(&mut self) -> &mut [f32] {
        &mut self.diff
    }

    /// Sets every gradient value to zero.
    pub fn zero_diff(&mut self) {
        self.diff.iter_mut().for_each(|d| *d = 0.0);
    }

    /// Checks that this blob has exactly `expected` as its shape.
    pub fn ensure_shape(&self, expected: [usize; 4]) -> Result<()> {
        if self.shape != expected {
            return Err(BatchNormError::ShapeMismatch {
                expected: expected.to_vec(),
                actual: self.shape.to_vec(),
            });
        }
        Ok(())
    }
}

impl Default for Blob {
    fn default() -> Self {
        Self::empty()
    }
}
