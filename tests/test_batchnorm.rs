// Integration tests for the batch normalization layer.
// Forward scenarios use a Gaussian-filled 5x2x3x4 batch.

use approx::assert_abs_diff_eq;
use rust_batch_norm::filler::{Filler, GaussianFiller};
use rust_batch_norm::layers::batchnorm::{batch_norm_backward, batch_norm_forward};
use rust_batch_norm::utils::SimpleRng;
use rust_batch_norm::{BatchNormConfig, BatchNormError, BatchNormLayer, Blob, Layer};

const ERROR_BOUND: f64 = 0.001;

fn gaussian_bottom(seed: u64) -> Blob {
    let mut bottom = Blob::new(5, 2, 3, 4);
    let mut rng = SimpleRng::new(seed);
    GaussianFiller::default().fill(bottom.data_mut(), &mut rng);
    bottom
}

fn forward_with(scale: f32, shift: f32, bottom: &Blob) -> (BatchNormLayer, Blob) {
    let mut layer = BatchNormLayer::new(&BatchNormConfig::with_constants(scale, shift)).unwrap();
    let mut top = Blob::empty();
    layer.setup(bottom, &mut top).unwrap();
    layer.forward(bottom, &mut top).unwrap();
    (layer, top)
}

// Per-channel mean and second moment (Σy² / m) of the output.
fn channel_moments(top: &Blob, channel: usize) -> (f64, f64) {
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for n in 0..top.num() {
        for h in 0..top.height() {
            for w in 0..top.width() {
                let y = top.data_at(n, channel, h, w) as f64;
                sum += y;
                sum_sq += y * y;
            }
        }
    }
    let m = (top.num() * top.height() * top.width()) as f64;
    (sum / m, sum_sq / m)
}

// ============================================================================
// Forward Scenarios
// ============================================================================

#[test]
fn test_forward_scale_one_shift_zero() {
    let bottom = gaussian_bottom(1701);
    let (_, top) = forward_with(1.0, 0.0, &bottom);

    for c in 0..bottom.channels() {
        let (mean, second_moment) = channel_moments(&top, c);
        // expect zero mean
        assert_abs_diff_eq!(mean, 0.0, epsilon = ERROR_BOUND);
        // expect unit variance
        assert_abs_diff_eq!(second_moment, 1.0, epsilon = ERROR_BOUND);
    }
}

#[test]
fn test_forward_scale_one_shift_one() {
    let bottom = gaussian_bottom(1701);
    let (_, top) = forward_with(1.0, 1.0, &bottom);

    for c in 0..bottom.channels() {
        let (mean, second_moment) = channel_moments(&top, c);
        assert_abs_diff_eq!(mean, 1.0, epsilon = ERROR_BOUND);
        assert_abs_diff_eq!(second_moment, 1.0 + 1.0, epsilon = ERROR_BOUND);
    }
}

#[test]
fn test_forward_scale_two_shift_one() {
    let bottom = gaussian_bottom(1701);
    let (_, top) = forward_with(2.0, 1.0, &bottom);

    for c in 0..bottom.channels() {
        let (mean, second_moment) = channel_moments(&top, c);
        assert_abs_diff_eq!(mean, 1.0, epsilon = ERROR_BOUND);
        assert_abs_diff_eq!(second_moment, 4.0 + 1.0, epsilon = ERROR_BOUND);
    }
}

#[test]
fn test_forward_variance_is_scale_squared() {
    let bottom = gaussian_bottom(42);
    let (_, top) = forward_with(3.0, -2.0, &bottom);

    for c in 0..bottom.channels() {
        let (mean, second_moment) = channel_moments(&top, c);
        let variance = second_moment - mean * mean;
        assert_abs_diff_eq!(mean, -2.0, epsilon = ERROR_BOUND);
        assert_abs_diff_eq!(variance, 9.0, epsilon = 1e-2);
    }
}

#[test]
fn test_forward_removes_input_offset() {
    // Channel statistics come from the batch, so shifting and scaling the
    // input leaves the output unchanged.
    let bottom = gaussian_bottom(7);
    let mut moved = bottom.clone();
    for v in moved.data_mut() {
        *v = 3.0 * *v + 10.0;
    }

    let (_, top) = forward_with(1.0, 0.0, &bottom);
    let (_, top_moved) = forward_with(1.0, 0.0, &moved);

    for (&a, &b) in top.data().iter().zip(top_moved.data()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-4);
    }
}

#[test]
fn test_statistics_cached_per_channel() {
    let bottom = gaussian_bottom(1701);
    let (layer, _) = forward_with(1.0, 0.0, &bottom);
    let cache = layer.cache().unwrap();

    assert_eq!(cache.shape(), [5, 2, 3, 4]);
    assert_eq!(cache.reduction_count(), 60);
    assert_eq!(cache.mean().len(), 2);
    assert_eq!(cache.variance().len(), 2);
    assert_eq!(cache.normalized().len(), bottom.count());

    for c in 0..2 {
        // Recompute with the two-pass formula and compare.
        let mut values = Vec::new();
        for n in 0..5 {
            for h in 0..3 {
                for w in 0..4 {
                    values.push(bottom.data_at(n, c, h, w) as f64);
                }
            }
        }
        let mean = values.iter().sum::<f64>() / 60.0;
        let var = values.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / 60.0;

        assert_abs_diff_eq!(cache.mean()[c], mean, epsilon = 1e-9);
        assert_abs_diff_eq!(cache.variance()[c], var, epsilon = 1e-9);
        assert!(cache.variance()[c] >= 0.0);
    }
}

// ============================================================================
// Idempotence and Shapes
// ============================================================================

#[test]
fn test_forward_is_idempotent() {
    let bottom = gaussian_bottom(99);
    let (mut layer, top) = forward_with(2.0, 1.0, &bottom);
    let first = top.data().to_vec();
    let first_cache = layer.cache().cloned();

    let mut top = top;
    layer.forward(&bottom, &mut top).unwrap();

    assert_eq!(top.data(), first.as_slice());
    assert_eq!(layer.cache().cloned(), first_cache);
}

#[test]
fn test_last_forward_wins() {
    let bottom = gaussian_bottom(1);
    let other = gaussian_bottom(2);
    let (mut layer, mut top) = forward_with(1.0, 0.0, &bottom);

    layer.forward(&other, &mut top).unwrap();
    let mut expected = vec![0.0f32; other.count()];
    let cache = batch_norm_forward(
        other.data(),
        other.shape(),
        layer.scale(),
        layer.shift(),
        layer.epsilon(),
        &mut expected,
    )
    .unwrap();

    assert_eq!(layer.cache(), Some(&cache));
    assert_eq!(top.data(), expected.as_slice());
}

#[test]
fn test_shapes_are_preserved() {
    let mut bottom = gaussian_bottom(3);
    let (mut layer, mut top) = forward_with(1.0, 0.0, &bottom);
    assert_eq!(top.shape(), bottom.shape());

    top.diff_mut().iter_mut().for_each(|d| *d = 1.0);
    layer.backward(&top, &mut bottom).unwrap();

    assert_eq!(bottom.diff().len(), bottom.count());
    assert_eq!(layer.params()[0].diff().len(), layer.params()[0].count());
    assert_eq!(layer.scale_diff().len(), 2);
    assert_eq!(layer.shift_diff().len(), 2);
}

#[test]
fn test_backward_uniform_gradient_cancels() {
    // A constant output gradient only moves the shift; the normalized output
    // is invariant to a uniform input offset, so the input gradient vanishes.
    let mut bottom = gaussian_bottom(5);
    let (mut layer, mut top) = forward_with(2.0, 1.0, &bottom);

    top.diff_mut().iter_mut().for_each(|d| *d = 1.0);
    layer.backward(&top, &mut bottom).unwrap();

    for &g in bottom.diff() {
        assert_abs_diff_eq!(g, 0.0, epsilon = 1e-5);
    }
    assert_abs_diff_eq!(layer.shift_diff()[0], 60.0, epsilon = 1e-4);
    assert_abs_diff_eq!(layer.scale_diff()[1], 0.0, epsilon = 1e-4);
}

#[test]
fn test_layer_matches_free_functions() {
    let mut bottom = gaussian_bottom(11);
    let (mut layer, mut top) = forward_with(1.5, 0.5, &bottom);

    let mut rng = SimpleRng::new(12);
    GaussianFiller::default().fill(top.diff_mut(), &mut rng);
    layer.backward(&top, &mut bottom).unwrap();

    let cache = layer.cache().unwrap();
    let mut bottom_diff = vec![0.0f32; bottom.count()];
    let mut scale_diff = vec![0.0f32; 2];
    let mut shift_diff = vec![0.0f32; 2];
    batch_norm_backward(
        cache,
        layer.scale(),
        top.diff(),
        &mut bottom_diff,
        &mut scale_diff,
        &mut shift_diff,
    )
    .unwrap();

    assert_eq!(bottom.diff(), bottom_diff.as_slice());
    assert_eq!(layer.scale_diff(), scale_diff.as_slice());
    assert_eq!(layer.shift_diff(), shift_diff.as_slice());
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn test_forward_rejects_channel_mismatch() {
    let bottom = gaussian_bottom(1);
    let (mut layer, mut top) = forward_with(1.0, 0.0, &bottom);

    let wrong = Blob::new(5, 3, 3, 4);
    let result = layer.forward(&wrong, &mut top);
    assert!(matches!(result, Err(BatchNormError::ShapeMismatch { .. })));
}

#[test]
fn test_backward_rejects_wrong_gradient_shape() {
    let bottom = gaussian_bottom(1);
    let (mut layer, _) = forward_with(1.0, 0.0, &bottom);

    let top = Blob::new(5, 2, 3, 3);
    let mut bottom = bottom;
    let result = layer.backward(&top, &mut bottom);
    assert!(matches!(result, Err(BatchNormError::ShapeMismatch { .. })));
}

#[test]
fn test_setup_rejects_zero_spatial_extent() {
    let mut layer = BatchNormLayer::default();
    let bottom = Blob::new(4, 2, 0, 3);
    let mut top = Blob::empty();

    let result = layer.setup(&bottom, &mut top);
    assert!(matches!(result, Err(BatchNormError::EmptyReduction { .. })));
}
