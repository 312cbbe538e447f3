//! Sizing rules derived from a resource's capacity class

use crate::config::CapacityClass;
use std::time::Duration;

/// Connection pool settings applied to every client of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolProfile {
    /// Idle connections kept per host
    pub max_idle_per_host: usize,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// How long idle connections stay in the pool (also the TCP keepalive)
    pub idle_timeout: Duration,
}

impl CapacityClass {
    /// Relative share of queue capacity, initial workers and scale-up increments
    pub fn share_weight(self) -> usize {
        match self {
            Self::High => 4,
            Self::Standard => 2,
            Self::Low => 1,
        }
    }

    /// Scales a per-resource base value by this class, never below one
    ///
    /// Standard keeps the base, high doubles it, low halves it.
    pub fn scale(self, base: usize) -> usize {
        (base.saturating_mul(self.share_weight()) / 2).max(1)
    }

    /// Connection pool profile for clients of this class
    pub fn pool_profile(self) -> PoolProfile {
        match self {
            Self::High => PoolProfile {
                max_idle_per_host: 64,
                connect_timeout: Duration::from_secs(3),
                idle_timeout: Duration::from_secs(600),
            },
            Self::Standard => PoolProfile {
                max_idle_per_host: 16,
                connect_timeout: Duration::from_secs(5),
                idle_timeout: Duration::from_secs(90),
            },
            Self::Low => PoolProfile {
                max_idle_per_host: 4,
                connect_timeout: Duration::from_secs(10),
                idle_timeout: Duration::from_secs(30),
            },
        }
    }
}

/// Splits `total` across slots proportionally to `weights`
///
/// Uses the largest-remainder method so the parts always sum to `total`.
/// Ties go to the earlier slot.
pub fn distribute(total: usize, weights: &[usize]) -> Vec<usize> {
    let weight_sum: usize = weights.iter().sum();
    if weights.is_empty() || weight_sum == 0 {
        return vec![0; weights.len()];
    }

    let mut parts: Vec<usize> = weights.iter().map(|w| total * w / weight_sum).collect();
    let assigned: usize = parts.iter().sum();

    let mut by_remainder: Vec<(usize, usize)> = weights
        .iter()
        .enumerate()
        .map(|(i, w)| (i, (total * w) % weight_sum))
        .collect();
    by_remainder.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    for (i, _) in by_remainder.into_iter().take(total - assigned) {
        parts[i] += 1;
    }

    parts
}
