//! Weight initialization schemes.
//!
//! All functions take the RNG explicitly so that a seeded network
//! produces reproducible parameter draws.

use rand::Rng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal, Uniform};

/// Uniform Xavier/Glorot: U(-b, b) with b = sqrt(6 / (fan_in + fan_out)).
pub fn xavier_uniform(fan_in: usize, fan_out: usize, n: usize, rng: &mut StdRng) -> Vec<f32> {
    let bound = (6.0 / (fan_in + fan_out) as f32).sqrt();
    let dist = Uniform::new(-bound, bound).unwrap();
    (0..n).map(|_| dist.sample(rng)).collect()
}

/// Gaussian Xavier/Glorot: N(0, 2 / (fan_in + fan_out)).
pub fn xavier_normal(fan_in: usize, fan_out: usize, n: usize, rng: &mut StdRng) -> Vec<f32> {
    let std = (2.0 / (fan_in + fan_out) as f32).sqrt();
    let dist = Normal::new(0.0, std).unwrap();
    (0..n).map(|_| dist.sample(rng)).collect()
}

/// Uniform He/Kaiming: U(-b, b) with b = sqrt(6 / fan_in). Suited to
/// ReLU stacks where half the activations are zeroed.
pub fn he_uniform(fan_in: usize, n: usize, rng: &mut StdRng) -> Vec<f32> {
    let bound = (6.0 / fan_in as f32).sqrt();
    let dist = Uniform::new(-bound, bound).unwrap();
    (0..n).map(|_| dist.sample(rng)).collect()
}

/// Gaussian He/Kaiming: N(0, 2 / fan_in).
pub fn he_normal(fan_in: usize, n: usize, rng: &mut StdRng) -> Vec<f32> {
    let std = (2.0 / fan_in as f32).sqrt();
    let dist = Normal::new(0.0, std).unwrap();
    (0..n).map(|_| dist.sample(rng)).collect()
}

/// Plain Gaussian draw, N(mean, std).
pub fn normal(mean: f32, std: f32, n: usize, rng: &mut StdRng) -> Vec<f32> {
    let dist = Normal::new(mean, std).unwrap();
    (0..n).map(|_| dist.sample(rng)).collect()
}

/// Uniform draw in [0, 1).
pub fn uniform01(n: usize, rng: &mut StdRng) -> Vec<f32> {
    (0..n).map(|_| rng.random::<f32>()).collect()
}
