use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;

use super::error::SimulationError;

/// Target bar count for the terminal-capital histogram.
pub const DEFAULT_BUCKET_COUNT: usize = 50;

/// Largest histogram target accepted by [`build_histogram`](super::build_histogram).
pub const MAX_BUCKET_COUNT: usize = 1_000;

/// Inputs for one portfolio path. Rates are decimal fractions (0.07 = 7%).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationParameters {
    pub initial_capital: f64,
    pub annual_contribution: f64,
    pub annual_withdrawal: f64,
    pub mean_return: f64,
    pub std_dev_return: f64,
    pub years: u32,
}

impl SimulationParameters {
    /// Rejects non-finite values and negative amounts before any path runs.
    pub fn validate(&self) -> Result<(), SimulationError> {
        for (name, value) in [
            ("initial_capital", self.initial_capital),
            ("annual_contribution", self.annual_contribution),
            ("annual_withdrawal", self.annual_withdrawal),
            ("mean_return", self.mean_return),
            ("std_dev_return", self.std_dev_return),
        ] {
            if !value.is_finite() {
                return Err(SimulationError::invalid(name, "must be finite"));
            }
        }

        for (name, value) in [
            ("initial_capital", self.initial_capital),
            ("annual_contribution", self.annual_contribution),
            ("annual_withdrawal", self.annual_withdrawal),
            ("std_dev_return", self.std_dev_return),
        ] {
            if value < 0.0 {
                return Err(SimulationError::invalid(name, "must be >= 0"));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationOutcome {
    /// Terminal capital per iteration, in iteration order. Depleted paths are `0.0`.
    pub samples: Vec<f64>,
    /// Percentage of paths ending above zero, in `[0, 100]`.
    pub success_rate: f64,
}

impl SimulationOutcome {
    pub fn iterations(&self) -> usize {
        self.samples.len()
    }

    pub fn successes(&self) -> usize {
        self.samples.iter().filter(|&&v| v > 0.0).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PercentileSet {
    pub p10: f64,
    pub p50: f64,
    pub p90: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistogramBucket {
    pub range_start: f64,
    pub range_end: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Histogram {
    pub bucket_size: f64,
    pub buckets: Vec<HistogramBucket>,
}

impl Histogram {
    pub fn total_count(&self) -> usize {
        self.buckets.iter().map(|b| b.count).sum()
    }
}

/// Everything the presentation layer needs from one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationSummary {
    pub iterations: usize,
    pub success_rate: f64,
    pub percentiles: PercentileSet,
    pub histogram: Histogram,
}

/// Shared flag that stops a running simulation before its next path.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Base seed; `None` draws one from the thread RNG.
    pub seed: Option<u64>,
    /// Spread iterations over the rayon pool. Ignored without the `parallel` feature.
    pub parallel: bool,
    pub cancel: Option<CancelToken>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            seed: None,
            parallel: true,
            cancel: None,
        }
    }
}

impl RunConfig {
    pub fn seeded(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..Self::default()
        }
    }
}
