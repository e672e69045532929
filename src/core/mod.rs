mod engine;
mod error;
mod rng;
mod stats;
mod types;

pub use engine::{run_simulation, run_simulation_with, run_simulation_with_source, simulate_path};
pub use error::SimulationError;
pub use rng::{RngSource, UniformSource, generate_normal};
pub use stats::{build_histogram, compute_bucket_size, compute_percentiles, summarize};
pub use types::{
    CancelToken, DEFAULT_BUCKET_COUNT, Histogram, HistogramBucket, MAX_BUCKET_COUNT, PercentileSet,
    RunConfig, SimulationOutcome, SimulationParameters, SimulationSummary,
};
