//! Seeded random number generator used by the fillers.
//!
//! A small xorshift generator keeps test fixtures reproducible: the same seed
//! always fills a blob with the same values.

/// Fallback state for a zero seed (xorshift never leaves the all-zero state).
const ZERO_SEED_STATE: u64 = 0x9e37_79b9_7f4a_7c15;

/// Xorshift PRNG with uniform and Gaussian sampling.
#[derive(Debug, Clone)]
pub struct SimpleRng {
    state: u64,
    // Second Box-Muller sample, handed out on the next gaussian call.
    spare_gaussian: Option<f64>,
}

impl SimpleRng {
    /// Create a new RNG with an explicit seed (zero maps to a fixed state).
    pub fn new(seed: u64) -> Self {
        let state = if seed == 0 { ZERO_SEED_STATE } else { seed };
        Self {
            state,
            spare_gaussian: None,
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    pub fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    /// Uniform sample in [0, 1) with 53 bits of precision.
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Uniform sample in [low, high).
    pub fn gen_range_f32(&mut self, low: f32, high: f32) -> f32 {
        let sample = (low as f64 + (high as f64 - low as f64) * self.next_f64()) as f32;
        // Rounding to f32 can land exactly on `high`.
        if sample < high {
            sample
        } else {
            low
        }
    }

    /// Standard normal sample via the Box-Muller transform.
    pub fn next_gaussian(&mut self) -> f64 {
        if let Some(spare) = self.spare_gaussian.take() {
            return spare;
        }

        // u1 in (0, 1] so that ln(u1) is finite.
        let u1 = 1.0 - self.next_f64();
        let u2 = self.next_f64();
        let radius = (-2.0 * u1.ln()).sqrt();
        let theta = 2.0 * std::f64::consts::PI * u2;

        self.spare_gaussian = Some(radius * theta.sin());
        radius * theta.cos()
    }

    /// Normal sample with the given mean and standard deviation.
    pub fn gen_gaussian_f32(&mut self, mean: f32, std: f32) -> f32 {
        (mean as f64 + std as f64 * self.next_gaussian()) as f32
    }
}
