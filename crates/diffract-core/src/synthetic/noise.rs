//! Deterministic noise for synthetic peak tables.
//!
//! A splitmix64 stream keyed by `(seed, index, component)` keeps synthetic
//! data identical across platforms and dependency versions.

use crate::Real;

/// Uniform noise in `[-max_abs, +max_abs]`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct UniformNoise {
    pub seed: u64,
    pub max_abs: Real,
}

impl UniformNoise {
    pub fn new(seed: u64, max_abs: Real) -> Self {
        Self { seed, max_abs }
    }

    /// Noise sample for the `component`-th coordinate of item `index`.
    pub fn sample(&self, index: usize, component: usize) -> Real {
        let max_abs = self.max_abs.abs();
        if max_abs == 0.0 {
            return 0.0;
        }
        let key = self.seed
            ^ (index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
            ^ (component as u64).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        (unit_interval(splitmix64(key)) - 0.5) * 2.0 * max_abs
    }

    pub fn apply(&self, index: usize, component: usize, value: Real) -> Real {
        value + self.sample(index, component)
    }
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Top 53 bits mapped to `[0, 1)`.
fn unit_interval(x: u64) -> Real {
    (x >> 11) as Real * (1.0 / (1u64 << 53) as Real)
}
