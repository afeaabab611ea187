//! Finite-difference gradient checking
//!
//! Verifies a layer's analytic backward pass against central-difference
//! estimates. The checker only talks to the [`Layer`] trait, so it works with
//! any layer that exposes its parameters through `params`/`params_mut`.
//!
//! For a chosen objective `f` (one output element, or half the sum of squared
//! outputs) and every checked value `x`:
//!
//! ```text
//! estimated = (f(x + h) - f(x - h)) / 2h
//! |computed - estimated| <= threshold * max(|computed|, |estimated|, 1)
//! ```

use crate::blob::Blob;
use crate::config::GradientCheckConfig;
use crate::error::{BatchNormError, Result};
use crate::layers::Layer;
use log::debug;

/// Outcome of a successful gradient check.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GradientCheckReport {
    /// Number of analytic/numeric comparisons performed.
    pub checked: usize,
    /// Values skipped because they lie inside the kink region.
    pub skipped: usize,
    /// Largest `|computed - estimated| / max(|computed|, |estimated|, 1)`.
    pub max_scaled_error: f64,
}

impl GradientCheckReport {
    fn merge(&mut self, other: GradientCheckReport) {
        self.checked += other.checked;
        self.skipped += other.skipped;
        self.max_scaled_error = self.max_scaled_error.max(other.max_scaled_error);
    }
}

/// Central-difference gradient checker.
///
/// # Example
///
/// ```
/// use rust_batch_norm::{BatchNormConfig, BatchNormLayer, Blob, GradientChecker};
///
/// let mut layer = BatchNormLayer::new(&BatchNormConfig::with_constants(1.0, 0.0)).unwrap();
/// let mut bottom = Blob::from_vec([3, 1, 1, 2], vec![0.1, -0.4, 0.9, 0.3, -1.2, 0.5]).unwrap();
/// let mut top = Blob::empty();
///
/// let checker = GradientChecker::new(1e-2, 1e-3);
/// let report = checker.check_gradient_exhaustive(&mut layer, &mut bottom, &mut top).unwrap();
/// assert!(report.checked > 0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradientChecker {
    stepsize: f32,
    threshold: f32,
    kink: f32,
    kink_range: f32,
}

impl GradientChecker {
    /// Creates a checker with no kink region.
    pub fn new(stepsize: f32, threshold: f32) -> Self {
        Self {
            stepsize,
            threshold,
            kink: 0.0,
            kink_range: -1.0,
        }
    }

    pub fn from_config(config: &GradientCheckConfig) -> Self {
        Self::new(config.stepsize, config.threshold).with_kink(config.kink, config.kink_range)
    }

    /// Skips values `x` with `|x - kink| <= kink_range`, for layers that are
    /// not differentiable at `kink`. A negative range disables skipping.
    pub fn with_kink(mut self, kink: f32, kink_range: f32) -> Self {
        self.kink = kink;
        self.kink_range = kink_range;
        self
    }

    pub fn stepsize(&self) -> f32 {
        self.stepsize
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Sets the layer up, then checks the gradient of every single output
    /// element with respect to every input and parameter value.
    pub fn check_gradient_exhaustive<L: Layer>(
        &self,
        layer: &mut L,
        bottom: &mut Blob,
        top: &mut Blob,
    ) -> Result<GradientCheckReport> {
        layer.setup(bottom, top)?;

        let mut report = GradientCheckReport::default();
        for top_id in 0..top.count() {
            report.merge(self.check_gradient_single(layer, bottom, top, true, Some(top_id))?);
        }

        debug!(
            "Exhaustive gradient check passed: {} comparisons, {} skipped, max scaled error {:e}",
            report.checked, report.skipped, report.max_scaled_error
        );
        Ok(report)
    }

    /// Sets the layer up and checks the gradient of `½ Σ top²`.
    pub fn check_gradient<L: Layer>(
        &self,
        layer: &mut L,
        bottom: &mut Blob,
        top: &mut Blob,
    ) -> Result<GradientCheckReport> {
        layer.setup(bottom, top)?;
        self.check_gradient_single(layer, bottom, top, true, None)
    }

    /// Checks one objective against every parameter value and, if
    /// `check_bottom` is set, every input value.
    ///
    /// The objective is `top.data[top_id]` or, for `None`, `½ Σ top²`.
    /// The layer must already be set up.
    pub fn check_gradient_single<L: Layer>(
        &self,
        layer: &mut L,
        bottom: &mut Blob,
        top: &mut Blob,
        check_bottom: bool,
        top_id: Option<usize>,
    ) -> Result<GradientCheckReport> {
        if let Some(id) = top_id {
            if id >= top.count() {
                return Err(BatchNormError::ShapeMismatch {
                    expected: vec![top.count()],
                    actual: vec![id],
                });
            }
        }

        // Analytic gradients from one forward/backward pass.
        for param in layer.params_mut() {
            param.zero_diff();
        }
        layer.forward(bottom, top)?;
        set_objective_gradient(top, top_id);
        layer.backward(top, bottom)?;

        let computed_params: Vec<Vec<f32>> = layer
            .params()
            .iter()
            .map(|p| p.diff().to_vec())
            .collect();
        let computed_bottom = bottom.diff().to_vec();

        let mut report = GradientCheckReport::default();

        for (param_id, computed) in computed_params.iter().enumerate() {
            for (index, &grad) in computed.iter().enumerate() {
                let estimated = self.estimate(layer, bottom, top, top_id, |layer, _| {
                    &mut layer.params_mut()[param_id].data_mut()[index]
                })?;
                let feature = layer.params()[param_id].data()[index];
                self.compare(
                    &mut report,
                    || format!("param[{}]", param_id),
                    index,
                    top_id,
                    feature,
                    grad as f64,
                    estimated,
                )?;
            }
        }

        if check_bottom {
            for (index, &grad) in computed_bottom.iter().enumerate() {
                let estimated = self.estimate(layer, bottom, top, top_id, |_, bottom| {
                    &mut bottom.data_mut()[index]
                })?;
                let feature = bottom.data()[index];
                self.compare(
                    &mut report,
                    || "bottom".to_string(),
                    index,
                    top_id,
                    feature,
                    grad as f64,
                    estimated,
                )?;
            }
        }

        Ok(report)
    }

    /// Central difference of the objective with respect to the value that
    /// `select` points at. The value is restored afterwards.
    fn estimate<L, F>(
        &self,
        layer: &mut L,
        bottom: &mut Blob,
        top: &mut Blob,
        top_id: Option<usize>,
        select: F,
    ) -> Result<f64>
    where
        L: Layer,
        F: for<'a> Fn(&'a mut L, &'a mut Blob) -> &'a mut f32,
    {
        let original = *select(&mut *layer, &mut *bottom);
        let plus = original + self.stepsize;
        let minus = original - self.stepsize;

        *select(&mut *layer, &mut *bottom) = plus;
        layer.forward(bottom, top)?;
        let positive = objective(top, top_id);

        *select(&mut *layer, &mut *bottom) = minus;
        layer.forward(bottom, top)?;
        let negative = objective(top, top_id);

        *select(&mut *layer, &mut *bottom) = original;

        // Divide by the step actually taken after f32 rounding.
        Ok((positive - negative) / (plus as f64 - minus as f64))
    }

    #[allow(clippy::too_many_arguments)]
    fn compare<N: Fn() -> String>(
        &self,
        report: &mut GradientCheckReport,
        blob: N,
        index: usize,
        top_id: Option<usize>,
        feature: f32,
        computed: f64,
        estimated: f64,
    ) -> Result<()> {
        if (feature - self.kink).abs() <= self.kink_range {
            report.skipped += 1;
            return Ok(());
        }

        let scale = computed.abs().max(estimated.abs()).max(1.0);
        let scaled_error = (computed - estimated).abs() / scale;
        if scaled_error.is_nan() || scaled_error > self.threshold as f64 {
            return Err(BatchNormError::GradientMismatch {
                blob: blob(),
                index,
                objective: top_id,
                computed,
                estimated,
            });
        }

        report.checked += 1;
        report.max_scaled_error = report.max_scaled_error.max(scaled_error);
        Ok(())
    }
}

/// Value of the objective for the current `top` data.
fn objective(top: &Blob, top_id: Option<usize>) -> f64 {
    match top_id {
        Some(id) => top.data()[id] as f64,
        None => top.data().iter().map(|&y| 0.5 * (y as f64) * (y as f64)).sum(),
    }
}

/// Writes `∂objective/∂top` into `top.diff`.
fn set_objective_gradient(top: &mut Blob, top_id: Option<usize>) {
    match top_id {
        Some(id) => {
            top.zero_diff();
            top.diff_mut()[id] = 1.0;
        }
        None => {
            let data = top.data().to_vec();
            top.diff_mut().copy_from_slice(&data);
        }
    }
}
