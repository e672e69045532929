use std::f64::consts::PI;

use rand::distr::Open01;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Source of uniform draws strictly inside `(0, 1)`.
///
/// Implementations must never return `0.0`: the Box-Muller transform takes
/// `ln(u1)`, which is `-inf` at zero.
pub trait UniformSource {
    fn next_open01(&mut self) -> f64;
}

/// Adapts any `rand` generator into a [`UniformSource`].
#[derive(Debug, Clone)]
pub struct RngSource<R> {
    rng: R,
}

impl<R: Rng> RngSource<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl RngSource<SmallRng> {
    pub fn from_seed(seed: u64) -> Self {
        Self::new(SmallRng::seed_from_u64(seed))
    }
}

impl<R: Rng> UniformSource for RngSource<R> {
    fn next_open01(&mut self) -> f64 {
        self.rng.sample(Open01)
    }
}

/// Box-Muller transform: one normal draw with the given mean and standard
/// deviation from two uniform draws.
pub fn generate_normal<S: UniformSource + ?Sized>(source: &mut S, mean: f64, std_dev: f64) -> f64 {
    let u1 = source.next_open01();
    let u2 = source.next_open01();
    debug_assert!(u1 > 0.0 && u1 < 1.0, "uniform source returned {u1}");

    let z0 = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
    z0 * std_dev + mean
}

/// Per-iteration seed so that a seeded run does not depend on scheduling.
pub(crate) fn derive_seed(base_seed: u64, iteration: u32) -> u64 {
    splitmix64(base_seed ^ ((iteration as u64) << 32))
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}
