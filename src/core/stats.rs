use tracing::debug;

use super::error::SimulationError;
use super::types::{
    Histogram, HistogramBucket, MAX_BUCKET_COUNT, PercentileSet, SimulationOutcome,
    SimulationSummary,
};

/// Width used when every sample has the same value.
const DEGENERATE_BUCKET_SIZE: f64 = 1.0;

/// Nearest-rank 10th, 50th and 90th percentiles. Every returned value is an
/// element of `samples`.
pub fn compute_percentiles(samples: &[f64]) -> Result<PercentileSet, SimulationError> {
    check_samples(samples)?;

    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);

    Ok(PercentileSet {
        p10: nearest_rank(&sorted, 10),
        p50: nearest_rank(&sorted, 50),
        p90: nearest_rank(&sorted, 90),
    })
}

fn check_samples(samples: &[f64]) -> Result<(), SimulationError> {
    if samples.is_empty() {
        return Err(SimulationError::invalid("samples", "must not be empty"));
    }
    if samples.iter().any(|v| !v.is_finite()) {
        return Err(SimulationError::invalid("samples", "must all be finite"));
    }
    Ok(())
}

fn nearest_rank(sorted: &[f64], p: usize) -> f64 {
    let index = (p * sorted.len() / 100).min(sorted.len() - 1);
    sorted[index]
}

/// Rounds `(max - min) / target_bucket_count` up to the next multiple of its
/// power-of-ten magnitude, e.g. 19 becomes 20 and 0.34 becomes 0.4.
///
/// A zero (or non-positive) range yields a width of `1.0`. A target of zero
/// is treated as one bucket.
pub fn compute_bucket_size(min: f64, max: f64, target_bucket_count: usize) -> f64 {
    let range = max - min;
    if !(range > 0.0) {
        return DEGENERATE_BUCKET_SIZE;
    }

    let rough_size = range / target_bucket_count.max(1) as f64;
    let magnitude = 10_f64.powf(rough_size.log10().floor());
    (rough_size / magnitude).ceil() * magnitude
}

/// Buckets `samples` into half-open ranges `[min + i*size, min + (i+1)*size)`.
/// The maximum sample lands in the last bucket.
pub fn build_histogram(
    samples: &[f64],
    target_bucket_count: usize,
) -> Result<Histogram, SimulationError> {
    check_samples(samples)?;
    if target_bucket_count == 0 {
        return Err(SimulationError::invalid("target_bucket_count", "must be > 0"));
    }
    if target_bucket_count > MAX_BUCKET_COUNT {
        return Err(SimulationError::invalid(
            "target_bucket_count",
            "must not exceed MAX_BUCKET_COUNT",
        ));
    }

    let (min, max) = samples
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });

    if !(max > min) {
        debug!(value = min, "all samples equal, using a single bucket");
        return Ok(Histogram {
            bucket_size: DEGENERATE_BUCKET_SIZE,
            buckets: vec![HistogramBucket {
                range_start: min,
                range_end: min + DEGENERATE_BUCKET_SIZE,
                count: samples.len(),
            }],
        });
    }

    let bucket_size = compute_bucket_size(min, max, target_bucket_count);
    let num_buckets = ((max - min) / bucket_size).ceil() as usize;
    // Rounding can push the count one past the target, never further.
    if num_buckets == 0 || num_buckets > target_bucket_count + 1 {
        return Err(SimulationError::invalid(
            "samples",
            "range cannot be bucketed at this bucket count",
        ));
    }
    let mut counts = vec![0_usize; num_buckets];

    for &value in samples {
        let index = (((value - min) / bucket_size).floor() as usize).min(num_buckets - 1);
        counts[index] += 1;
    }

    let buckets = counts
        .into_iter()
        .enumerate()
        .map(|(i, count)| HistogramBucket {
            range_start: min + i as f64 * bucket_size,
            range_end: min + (i + 1) as f64 * bucket_size,
            count,
        })
        .collect();

    Ok(Histogram {
        bucket_size,
        buckets,
    })
}

pub fn summarize(
    outcome: &SimulationOutcome,
    target_bucket_count: usize,
) -> Result<SimulationSummary, SimulationError> {
    Ok(SimulationSummary {
        iterations: outcome.iterations(),
        success_rate: outcome.success_rate,
        percentiles: compute_percentiles(&outcome.samples)?,
        histogram: build_histogram(&outcome.samples, target_bucket_count)?,
    })
}
