//! Weight initializers and kernel regularizers

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// Stddev of a unit normal truncated to [-2, 2]
pub(crate) const TRUNCATED_NORMAL_STDDEV: f32 = 0.879_625_7;

/// Kernel initialization scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Initializer {
    /// Truncated normal with stddev `sqrt(2 / fan_in)`
    HeNormal,
    /// Uniform in `[-limit, limit]`, `limit = sqrt(6 / (fan_in + fan_out))`
    GlorotUniform,
}

impl Initializer {
    /// Draw a single weight
    pub fn sample<R: Rng + ?Sized>(&self, fan_in: usize, fan_out: usize, rng: &mut R) -> f32 {
        match self {
            Initializer::HeNormal => {
                let std = (2.0 / fan_in.max(1) as f32).sqrt() / TRUNCATED_NORMAL_STDDEV;
                // Resample until the draw lands within two standard deviations
                loop {
                    let z: f32 = rng.sample(StandardNormal);
                    if z.abs() <= 2.0 {
                        return z * std;
                    }
                }
            }
            Initializer::GlorotUniform => {
                let limit = (6.0 / (fan_in + fan_out).max(1) as f32).sqrt();
                (rng.gen::<f32>() * 2.0 - 1.0) * limit
            }
        }
    }

    /// Initialize a `[rows, cols]` kernel
    pub fn matrix<R: Rng + ?Sized>(
        &self,
        rows: usize,
        cols: usize,
        fan_in: usize,
        fan_out: usize,
        rng: &mut R,
    ) -> Array2<f32> {
        Array2::from_shape_fn((rows, cols), |_| self.sample(fan_in, fan_out, rng))
    }
}

/// Build the RNG used for weight initialization
///
/// A seed gives reproducible weights, otherwise the generator is seeded from
/// the OS entropy source.
pub fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Penalty applied to convolution kernels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Regularizer {
    /// `l1 * sum(|w|)`
    L1 { l1: f32 },
    /// `l2 * sum(w^2)`
    L2 { l2: f32 },
    /// Sum of both penalties
    L1L2 { l1: f32, l2: f32 },
}

impl Regularizer {
    /// Penalty for a single kernel
    pub fn penalty(&self, kernel: &Array2<f32>) -> f32 {
        let l1_term = |factor: f32| factor * kernel.iter().map(|w| w.abs()).sum::<f32>();
        let l2_term = |factor: f32| factor * kernel.iter().map(|w| w * w).sum::<f32>();

        match *self {
            Regularizer::L1 { l1 } => l1_term(l1),
            Regularizer::L2 { l2 } => l2_term(l2),
            Regularizer::L1L2 { l1, l2 } => l1_term(l1) + l2_term(l2),
        }
    }
}
