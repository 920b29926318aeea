//! Seeded random number generation for stochastic strategies.

use rand::prelude::*;

use crate::schema::Bounds;

/// Random number generator owned by the orchestrator and lent to strategies.
pub struct SearchRng {
    rng: StdRng,
}

impl SearchRng {
    /// Create from seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Uniform value in `[0, 1)`.
    pub fn unit(&mut self) -> f64 {
        self.rng.r#gen::<f64>()
    }

    /// Uniform value within `bounds`.
    pub fn uniform(&mut self, bounds: Bounds) -> f64 {
        if bounds.max > bounds.min {
            self.rng.gen_range(bounds.min..=bounds.max)
        } else {
            bounds.min
        }
    }

    /// Uniform index below `len`. `len` must be non-zero.
    pub fn index(&mut self, len: usize) -> usize {
        self.rng.gen_range(0..len)
    }
}
