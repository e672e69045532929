use rand::Rng;
use tracing::debug;

use super::error::SimulationError;
use super::rng::{RngSource, UniformSource, derive_seed, generate_normal};
use super::types::{CancelToken, RunConfig, SimulationOutcome, SimulationParameters};

/// Evolves one capital trajectory and returns its terminal value, or `0.0`
/// if the capital fell to or below zero in any year.
///
/// Each year the contribution and withdrawal are applied first and the
/// sampled return is then applied to the result.
///
/// The depletion check runs before the finiteness check, so a path that
/// reaches `-inf` counts as depleted (`0.0`). Only `+inf` or `NaN` capital
/// is reported as [`SimulationError::NumericOverflow`].
pub fn simulate_path<S: UniformSource + ?Sized>(
    params: &SimulationParameters,
    source: &mut S,
) -> Result<f64, SimulationError> {
    let mut capital = params.initial_capital;

    for year in 1..=params.years {
        let annual_return = generate_normal(source, params.mean_return, params.std_dev_return);
        capital = (capital + params.annual_contribution - params.annual_withdrawal)
            * (1.0 + annual_return);

        if capital <= 0.0 {
            return Ok(0.0);
        }
        if !capital.is_finite() {
            debug!(year, "capital overflowed");
            return Err(SimulationError::NumericOverflow { year });
        }
    }

    Ok(capital)
}

pub fn run_simulation(
    iterations: u32,
    params: &SimulationParameters,
) -> Result<SimulationOutcome, SimulationError> {
    run_simulation_with(iterations, params, &RunConfig::default())
}

/// Runs `iterations` independent paths, each with its own generator derived
/// from the base seed, so the result is identical whether or not the paths
/// run in parallel.
pub fn run_simulation_with(
    iterations: u32,
    params: &SimulationParameters,
    config: &RunConfig,
) -> Result<SimulationOutcome, SimulationError> {
    validate_run(iterations, params)?;

    let base_seed = config.seed.unwrap_or_else(|| rand::rng().random());
    debug!(
        iterations,
        base_seed,
        parallel = config.parallel,
        "starting monte carlo run"
    );

    let samples = collect_samples(iterations, params, base_seed, config)?;
    let outcome = outcome_from_samples(samples);

    debug!(
        iterations,
        success_rate = outcome.success_rate,
        "monte carlo run finished"
    );
    Ok(outcome)
}

/// Sequential run in which every path draws from the same injected source.
pub fn run_simulation_with_source<S: UniformSource + ?Sized>(
    iterations: u32,
    params: &SimulationParameters,
    source: &mut S,
) -> Result<SimulationOutcome, SimulationError> {
    validate_run(iterations, params)?;

    let mut samples = Vec::with_capacity(iterations as usize);
    for _ in 0..iterations {
        samples.push(simulate_path(params, source)?);
    }
    Ok(outcome_from_samples(samples))
}

fn validate_run(iterations: u32, params: &SimulationParameters) -> Result<(), SimulationError> {
    if iterations == 0 {
        return Err(SimulationError::invalid("iterations", "must be > 0"));
    }
    params.validate()
}

fn simulate_iteration(
    params: &SimulationParameters,
    base_seed: u64,
    iteration: u32,
    cancel: Option<&CancelToken>,
) -> Result<f64, SimulationError> {
    if cancel.is_some_and(CancelToken::is_cancelled) {
        return Err(SimulationError::Cancelled);
    }

    let mut source = RngSource::from_seed(derive_seed(base_seed, iteration));
    simulate_path(params, &mut source)
}

#[cfg(feature = "parallel")]
fn collect_samples(
    iterations: u32,
    params: &SimulationParameters,
    base_seed: u64,
    config: &RunConfig,
) -> Result<Vec<f64>, SimulationError> {
    use rayon::iter::{IntoParallelIterator, ParallelIterator};

    if !config.parallel {
        return collect_samples_sequential(iterations, params, base_seed, config);
    }

    (0..iterations)
        .into_par_iter()
        .map(|i| simulate_iteration(params, base_seed, i, config.cancel.as_ref()))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn collect_samples(
    iterations: u32,
    params: &SimulationParameters,
    base_seed: u64,
    config: &RunConfig,
) -> Result<Vec<f64>, SimulationError> {
    collect_samples_sequential(iterations, params, base_seed, config)
}

fn collect_samples_sequential(
    iterations: u32,
    params: &SimulationParameters,
    base_seed: u64,
    config: &RunConfig,
) -> Result<Vec<f64>, SimulationError> {
    (0..iterations)
        .map(|i| simulate_iteration(params, base_seed, i, config.cancel.as_ref()))
        .collect()
}

fn outcome_from_samples(samples: Vec<f64>) -> SimulationOutcome {
    let successes = samples.iter().filter(|&&v| v > 0.0).count();
    let success_rate = (successes as f64 / samples.len() as f64) * 100.0;
    SimulationOutcome {
        samples,
        success_rate,
    }
}
