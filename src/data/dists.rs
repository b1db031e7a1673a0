//! Distributions of `n` items (clients) into `k` groups (labels).
//!
//! Both generators return per-group counts that sum up to `n`. The biased divider uses them
//! as weights when picking a client's preferred label.

use rand::{seq::SliceRandom, Rng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// The kind of label distribution used by the biased divider.
pub enum LabelDistribution {
    Uniform,
    Normal,
}

impl LabelDistribution {
    /// Generates the distribution of `n` items into `k` groups.
    pub fn generate<R: Rng + ?Sized>(self, n: usize, k: usize, rng: &mut R) -> Vec<usize> {
        match self {
            LabelDistribution::Uniform => uniform(n, k, rng),
            LabelDistribution::Normal => normal(n, k, rng),
        }
    }
}

/// Spreads `n` items as evenly as possible over `k` groups, in shuffled order.
pub fn uniform<R: Rng + ?Sized>(n: usize, k: usize, rng: &mut R) -> Vec<usize> {
    if k == 0 {
        return Vec::new();
    }
    let mut dist: Vec<usize> = (0..k)
        .map(|i| (i + 1) * n / k - i * n / k)
        .collect();
    dist.shuffle(rng);
    dist
}

/// Draws `n` items from a normal distribution centered on the middle group.
///
/// The standard deviation is a quarter of the number of groups; draws falling outside of
/// the group range are clamped to the outermost groups.
pub fn normal<R: Rng + ?Sized>(n: usize, k: usize, rng: &mut R) -> Vec<usize> {
    if k == 0 {
        return Vec::new();
    }
    let mut dist = vec![0; k];
    let mean = (k as f64 - 1.) / 2.;
    let std_dev = (k as f64 / 4.).max(f64::MIN_POSITIVE);
    // safe unwrap: the standard deviation is finite and positive
    let normal = Normal::new(mean, std_dev).unwrap();
    for _ in 0..n {
        let group = normal.sample(rng).round().max(0.).min(k as f64 - 1.) as usize;
        dist[group] += 1;
    }
    dist
}
