// bn_gradcheck.rs
// Runs a batch normalization layer on a Gaussian batch and verifies its
// backward pass against finite differences.
//
// Usage:
//   bn_gradcheck [config.json]
//
// Without a config file the layer uses scale 1, shift 0 and the checker uses
// step 1e-2, threshold 1e-3. See config/ for examples.
//
// Output:
//   - per-channel mean and second moment of the layer output
//   - number of gradient comparisons and the largest scaled error
//   - exit code 1 on any failure

use rust_batch_norm::config::{load_config, BatchNormConfig};
use rust_batch_norm::filler::{Filler, GaussianFiller};
use rust_batch_norm::utils::SimpleRng;
use rust_batch_norm::{BatchNormLayer, Blob, GradientChecker, Layer};
use std::env;
use std::process;

// Batch shape: 5 samples, 2 channels, 3x4 spatial.
const NUM: usize = 5;
const CHANNELS: usize = 2;
const HEIGHT: usize = 3;
const WIDTH: usize = 4;

fn run(config: &BatchNormConfig) -> rust_batch_norm::Result<()> {
    let check = config.gradient_check.unwrap_or_default();

    let mut bottom = Blob::new(NUM, CHANNELS, HEIGHT, WIDTH);
    let mut rng = SimpleRng::new(check.seed);
    GaussianFiller::default().fill(bottom.data_mut(), &mut rng);

    let mut layer = BatchNormLayer::new(config)?;
    let mut top = Blob::empty();
    layer.setup(&bottom, &mut top)?;
    layer.forward(&bottom, &mut top)?;

    let m = (NUM * HEIGHT * WIDTH) as f64;
    for c in 0..CHANNELS {
        let mut sum = 0.0f64;
        let mut sum_sq = 0.0f64;
        for n in 0..NUM {
            for h in 0..HEIGHT {
                for w in 0..WIDTH {
                    let y = top.data_at(n, c, h, w) as f64;
                    sum += y;
                    sum_sq += y * y;
                }
            }
        }
        println!(
            "channel {}: scale {:.3} shift {:.3} -> mean {:.6}, second moment {:.6}",
            c,
            layer.scale()[c],
            layer.shift()[c],
            sum / m,
            sum_sq / m
        );
    }

    let checker = GradientChecker::from_config(&check);
    println!(
        "Checking gradients (step {:e}, threshold {:e})...",
        checker.stepsize(),
        checker.threshold()
    );
    let report = checker.check_gradient_exhaustive(&mut layer, &mut bottom, &mut top)?;
    println!(
        "Gradient check passed: {} comparisons, {} skipped, max scaled error {:e}",
        report.checked, report.skipped, report.max_scaled_error
    );
    Ok(())
}

fn main() {
    let config = match env::args().nth(1) {
        Some(path) => match load_config(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load config '{}': {}", path, e);
                process::exit(1);
            }
        },
        None => BatchNormConfig::default(),
    };

    if let Err(e) = run(&config) {
        eprintln!("bn_gradcheck failed: {}", e);
        process::exit(1);
    }
}
