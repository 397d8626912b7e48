//! Latency statistics over millisecond samples.
//!
//! Percentiles use the nearest-rank rule on the sorted samples:
//! `idx = floor(p × n / 100)`, clamped to the last element. The standard
//! deviation is the population form, so a single sample has zero spread.

use serde::{Deserialize, Serialize};

/// Summary of a latency distribution (all values in milliseconds).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub count: u32,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: f64,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

impl Statistics {
    /// Compute statistics, or `None` for an empty sample set.
    pub fn compute(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let n = sorted.len() as f64;
        let mean = sorted.iter().sum::<f64>() / n;
        let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

        Some(Self {
            count: sorted.len() as u32,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            mean,
            stddev: variance.sqrt(),
            p50: percentile(&sorted, 50),
            p90: percentile(&sorted, 90),
            p95: percentile(&sorted, 95),
            p99: percentile(&sorted, 99),
        })
    }
}

/// Nearest-rank percentile of an already sorted slice.
pub fn percentile(sorted: &[f64], p: u32) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if p == 0 {
        return sorted[0];
    }
    if p >= 100 {
        return sorted[sorted.len() - 1];
    }
    let idx = (p as usize * sorted.len()) / 100;
    sorted[idx.min(sorted.len() - 1)]
}
