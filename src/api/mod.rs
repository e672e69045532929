use axum::{
    Router,
    extract::{Json, Query},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::Args;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::core::{
    DEFAULT_BUCKET_COUNT, MAX_BUCKET_COUNT, RunConfig, SimulationError, SimulationParameters,
    SimulationSummary, run_simulation_with, summarize,
};

/// Upper bound on paths per request; each path keeps one `f64` sample.
pub const MAX_ITERATIONS: u32 = 10_000_000;

const DEFAULT_INITIAL_CAPITAL: f64 = 10_000.0;
const DEFAULT_MEAN_RETURN: f64 = 7.0;
const DEFAULT_STD_DEV_RETURN: f64 = 15.0;
const DEFAULT_YEARS: u32 = 30;
const DEFAULT_ITERATIONS: u32 = 10_000;

/// Simulation inputs as entered by a user. Return rates are percentages.
#[derive(Args, Debug, Clone, PartialEq)]
pub struct SimulationArgs {
    #[arg(long, default_value_t = DEFAULT_INITIAL_CAPITAL, help = "Starting portfolio value")]
    pub initial_capital: f64,
    #[arg(long, default_value_t = 0.0, help = "Amount added at the start of every year")]
    pub annual_contribution: f64,
    #[arg(long, default_value_t = 0.0, help = "Amount withdrawn at the start of every year")]
    pub annual_withdrawal: f64,
    #[arg(
        long,
        allow_negative_numbers = true,
        default_value_t = DEFAULT_MEAN_RETURN,
        help = "Expected annual return in percent, e.g. 7 or -5"
    )]
    pub mean_return: f64,
    #[arg(
        long,
        default_value_t = DEFAULT_STD_DEV_RETURN,
        help = "Annual return volatility (standard deviation) in percent"
    )]
    pub std_dev_return: f64,
    #[arg(long, default_value_t = DEFAULT_YEARS, help = "Number of simulated years")]
    pub years: u32,
    #[arg(long, default_value_t = DEFAULT_ITERATIONS, help = "Number of Monte Carlo paths")]
    pub iterations: u32,
    #[arg(long, help = "Base seed for reproducible runs; random when omitted")]
    pub seed: Option<u64>,
    #[arg(
        long,
        default_value_t = DEFAULT_BUCKET_COUNT,
        help = "Target number of histogram buckets"
    )]
    pub bucket_count: usize,
    #[arg(long, help = "Include every terminal capital sample in the output")]
    pub include_samples: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulatePayload {
    initial_capital: Option<f64>,
    annual_contribution: Option<f64>,
    annual_withdrawal: Option<f64>,
    mean_return: Option<f64>,
    std_dev_return: Option<f64>,
    years: Option<u32>,
    iterations: Option<u32>,
    seed: Option<u64>,
    bucket_count: Option<usize>,
    include_samples: Option<bool>,
}

/// A validated run request with rates converted to decimal fractions.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationRequest {
    pub params: SimulationParameters,
    pub iterations: u32,
    pub seed: Option<u64>,
    pub bucket_count: usize,
    pub include_samples: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulateResponse {
    #[serde(flatten)]
    pub summary: SimulationSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub samples: Option<Vec<f64>>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn build_request(args: SimulationArgs) -> Result<SimulationRequest, String> {
    if args.iterations == 0 {
        return Err("--iterations must be > 0".to_string());
    }

    if args.iterations > MAX_ITERATIONS {
        return Err(format!("--iterations must be <= {MAX_ITERATIONS}"));
    }

    if args.bucket_count == 0 {
        return Err("--bucket-count must be > 0".to_string());
    }

    if args.bucket_count > MAX_BUCKET_COUNT {
        return Err(format!("--bucket-count must be <= {MAX_BUCKET_COUNT}"));
    }

    for (flag, value) in [
        ("--initial-capital", args.initial_capital),
        ("--annual-contribution", args.annual_contribution),
        ("--annual-withdrawal", args.annual_withdrawal),
        ("--std-dev-return", args.std_dev_return),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(format!("{flag} must be >= 0"));
        }
    }

    if !args.mean_return.is_finite() {
        return Err("--mean-return must be a finite number".to_string());
    }

    Ok(SimulationRequest {
        params: SimulationParameters {
            initial_capital: args.initial_capital,
            annual_contribution: args.annual_contribution,
            annual_withdrawal: args.annual_withdrawal,
            mean_return: args.mean_return / 100.0,
            std_dev_return: args.std_dev_return / 100.0,
            years: args.years,
        },
        iterations: args.iterations,
        seed: args.seed,
        bucket_count: args.bucket_count,
        include_samples: args.include_samples,
    })
}

/// Runs the simulation described by `request` and aggregates its outcome.
pub fn execute(request: &SimulationRequest) -> Result<SimulateResponse, SimulationError> {
    let config = RunConfig {
        seed: request.seed,
        parallel: true,
        cancel: None,
    };
    let outcome = run_simulation_with(request.iterations, &request.params, &config)?;
    let summary = summarize(&outcome, request.bucket_count)?;

    Ok(SimulateResponse {
        summary,
        samples: request.include_samples.then_some(outcome.samples),
    })
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router();

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "simulation API listening");

    axum::serve(listener, app).await
}

fn router() -> Router {
    Router::new()
        .route(
            "/api/simulate",
            get(simulate_get_handler).post(simulate_post_handler),
        )
        .fallback(not_found_handler)
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_get_handler(Query(payload): Query<SimulatePayload>) -> Response {
    simulate_handler_impl(payload).await
}

async fn simulate_post_handler(Json(payload): Json<SimulatePayload>) -> Response {
    simulate_handler_impl(payload).await
}

async fn simulate_handler_impl(payload: SimulatePayload) -> Response {
    let request = match api_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    match tokio::task::spawn_blocking(move || execute(&request)).await {
        Ok(Ok(response)) => json_response(StatusCode::OK, response),
        Ok(Err(err)) => {
            warn!(%err, "simulation failed");
            error_response(StatusCode::UNPROCESSABLE_ENTITY, &err.to_string())
        }
        Err(err) => {
            warn!(%err, "simulation task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Simulation task failed")
        }
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn api_request_from_json(json: &str) -> Result<SimulationRequest, String> {
    let payload = serde_json::from_str::<SimulatePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    api_request_from_payload(payload)
}

fn api_request_from_payload(payload: SimulatePayload) -> Result<SimulationRequest, String> {
    let mut args = default_args_for_api();

    if let Some(v) = payload.initial_capital {
        args.initial_capital = v;
    }
    if let Some(v) = payload.annual_contribution {
        args.annual_contribution = v;
    }
    if let Some(v) = payload.annual_withdrawal {
        args.annual_withdrawal = v;
    }
    if let Some(v) = payload.mean_return {
        args.mean_return = v;
    }
    if let Some(v) = payload.std_dev_return {
        args.std_dev_return = v;
    }
    if let Some(v) = payload.years {
        args.years = v;
    }
    if let Some(v) = payload.iterations {
        args.iterations = v;
    }
    if let Some(v) = payload.seed {
        args.seed = Some(v);
    }
    if let Some(v) = payload.bucket_count {
        args.bucket_count = v;
    }
    if let Some(v) = payload.include_samples {
        args.include_samples = v;
    }

    build_request(args)
}

fn default_args_for_api() -> SimulationArgs {
    SimulationArgs {
        initial_capital: DEFAULT_INITIAL_CAPITAL,
        annual_contribution: 0.0,
        annual_withdrawal: 0.0,
        mean_return: DEFAULT_MEAN_RETURN,
        std_dev_return: DEFAULT_STD_DEV_RETURN,
        years: DEFAULT_YEARS,
        iterations: DEFAULT_ITERATIONS,
        seed: None,
        bucket_count: DEFAULT_BUCKET_COUNT,
        include_samples: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    const EPS: f64 = 1e-9;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        args: SimulationArgs,
    }

    fn sample_args() -> SimulationArgs {
        let mut args = default_args_for_api();
        args.initial_capital = 10_000.0;
        args.annual_withdrawal = 500.0;
        args.iterations = 200;
        args.seed = Some(7);
        args
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("readable body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[test]
    fn api_defaults_match_cli_defaults() {
        let cli = TestCli::try_parse_from(["capsim"]).expect("defaults parse");
        assert_eq!(cli.args, default_args_for_api());
    }

    #[test]
    fn build_request_converts_percent_rates_to_fractions() {
        let request = build_request(sample_args()).expect("valid args");
        assert_approx(request.params.mean_return, 0.07);
        assert_approx(request.params.std_dev_return, 0.15);
        assert_approx(request.params.annual_withdrawal, 500.0);
        assert_eq!(request.params.years, 30);
        assert_eq!(request.iterations, 200);
    }

    #[test]
    fn build_request_rejects_zero_iterations() {
        let mut args = sample_args();
        args.iterations = 0;
        let err = build_request(args).expect_err("must reject");
        assert!(err.contains("--iterations"));
    }

    #[test]
    fn build_request_rejects_oversized_requests() {
        let mut args = sample_args();
        args.bucket_count = MAX_BUCKET_COUNT + 1;
        let err = build_request(args).expect_err("must reject bucket count");
        assert!(err.contains("--bucket-count must be <="));

        let mut args = sample_args();
        args.iterations = MAX_ITERATIONS + 1;
        let err = build_request(args).expect_err("must reject iterations");
        assert!(err.contains("--iterations must be <="));

        let mut args = sample_args();
        args.bucket_count = MAX_BUCKET_COUNT;
        args.iterations = MAX_ITERATIONS;
        assert!(build_request(args).is_ok());
    }

    #[test]
    fn build_request_rejects_zero_bucket_count() {
        let mut args = sample_args();
        args.bucket_count = 0;
        let err = build_request(args).expect_err("must reject");
        assert!(err.contains("--bucket-count"));
    }

    #[test]
    fn build_request_rejects_negative_and_non_finite_amounts() {
        let mut args = sample_args();
        args.annual_withdrawal = -1.0;
        let err = build_request(args).expect_err("must reject negative withdrawal");
        assert!(err.contains("--annual-withdrawal"));

        let mut args = sample_args();
        args.initial_capital = f64::INFINITY;
        let err = build_request(args).expect_err("must reject infinite capital");
        assert!(err.contains("--initial-capital"));

        let mut args = sample_args();
        args.mean_return = f64::NAN;
        let err = build_request(args).expect_err("must reject NaN return");
        assert!(err.contains("--mean-return"));
    }

    #[test]
    fn cli_accepts_negative_mean_return() {
        let cli = TestCli::try_parse_from(["capsim", "--mean-return", "-5"]).expect("parses");
        assert_approx(cli.args.mean_return, -5.0);

        let cli = TestCli::try_parse_from(["capsim", "--mean-return", "-100", "--years", "1"])
            .expect("parses");
        let request = build_request(cli.args).expect("valid args");
        assert_approx(request.params.mean_return, -1.0);
    }

    #[test]
    fn cli_rejects_negative_years() {
        assert!(TestCli::try_parse_from(["capsim", "--years", "-3"]).is_err());
    }

    #[test]
    fn api_request_from_json_parses_web_keys() {
        let request = api_request_from_json(
            r#"{
                "initialCapital": 25000,
                "annualContribution": 1200,
                "annualWithdrawal": 0,
                "meanReturn": 6,
                "stdDevReturn": 12,
                "years": 20,
                "iterations": 500,
                "seed": 11,
                "bucketCount": 25,
                "includeSamples": true
            }"#,
        )
        .expect("valid payload");

        assert_approx(request.params.initial_capital, 25_000.0);
        assert_approx(request.params.annual_contribution, 1_200.0);
        assert_approx(request.params.mean_return, 0.06);
        assert_approx(request.params.std_dev_return, 0.12);
        assert_eq!(request.params.years, 20);
        assert_eq!(request.iterations, 500);
        assert_eq!(request.seed, Some(11));
        assert_eq!(request.bucket_count, 25);
        assert!(request.include_samples);
    }

    #[test]
    fn api_request_from_json_fills_missing_keys_with_defaults() {
        let request = api_request_from_json(r#"{"years": 5}"#).expect("valid payload");
        let defaults = build_request(default_args_for_api()).expect("defaults valid");
        assert_eq!(request.params.years, 5);
        assert_eq!(request.iterations, defaults.iterations);
        assert_eq!(request.params.mean_return, defaults.params.mean_return);
        assert_eq!(request.bucket_count, DEFAULT_BUCKET_COUNT);
    }

    #[test]
    fn simulate_response_serialization_contains_expected_fields() {
        let request = build_request(sample_args()).expect("valid args");
        let response = execute(&request).expect("valid run");
        let json = serde_json::to_string(&response).expect("response should serialize");
        assert!(json.contains("\"iterations\":200"));
        assert!(json.contains("\"successRate\""));
        assert!(json.contains("\"percentiles\""));
        assert!(json.contains("\"p10\""));
        assert!(json.contains("\"histogram\""));
        assert!(json.contains("\"bucketSize\""));
        assert!(json.contains("\"rangeStart\""));
        assert!(json.contains("\"rangeEnd\""));
        assert!(!json.contains("\"samples\""));
    }

    #[test]
    fn execute_includes_samples_on_request() {
        let mut args = sample_args();
        args.include_samples = true;
        let request = build_request(args).expect("valid args");
        let response = execute(&request).expect("valid run");
        let samples = response.samples.expect("samples requested");
        assert_eq!(samples.len(), 200);
        assert_eq!(response.summary.histogram.total_count(), 200);
    }

    #[test]
    fn execute_zero_volatility_yields_single_bucket() {
        let mut args = sample_args();
        args.annual_withdrawal = 0.0;
        args.mean_return = 5.0;
        args.std_dev_return = 0.0;
        args.years = 2;
        args.initial_capital = 1_000.0;
        let request = build_request(args).expect("valid args");
        let response = execute(&request).expect("valid run");

        assert_eq!(response.summary.success_rate, 100.0);
        assert_approx(response.summary.percentiles.p50, 1_102.5);
        assert_eq!(response.summary.histogram.buckets.len(), 1);
        assert_eq!(response.summary.histogram.buckets[0].count, 200);
    }

    #[test]
    fn execute_is_reproducible_with_seed() {
        let request = build_request(sample_args()).expect("valid args");
        let a = execute(&request).expect("valid run");
        let b = execute(&request).expect("valid run");
        assert_eq!(a.summary, b.summary);
    }

    #[tokio::test]
    async fn simulate_handler_returns_summary() {
        let payload = SimulatePayload {
            iterations: Some(300),
            seed: Some(5),
            annual_withdrawal: Some(500.0),
            ..SimulatePayload::default()
        };
        let response = simulate_handler_impl(payload).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).expect("header"),
            "no-store"
        );

        let body = body_json(response).await;
        assert_eq!(body["iterations"], 300);
        let rate = body["successRate"].as_f64().expect("success rate");
        assert!((0.0..=100.0).contains(&rate));
        let p10 = body["percentiles"]["p10"].as_f64().expect("p10");
        let p90 = body["percentiles"]["p90"].as_f64().expect("p90");
        assert!(p10 <= p90);
    }

    #[tokio::test]
    async fn simulate_handler_rejects_invalid_payload() {
        let payload = SimulatePayload {
            iterations: Some(0),
            ..SimulatePayload::default()
        };
        let response = simulate_handler_impl(payload).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(
            body["error"]
                .as_str()
                .expect("error message")
                .contains("--iterations")
        );
    }

    #[tokio::test]
    async fn simulate_handler_rejects_huge_bucket_count() {
        let request = api_request_from_json(r#"{"bucketCount": 17592186044416}"#);
        assert!(request.is_err());

        let payload = SimulatePayload {
            bucket_count: Some(1 << 44),
            iterations: Some(10),
            ..SimulatePayload::default()
        };
        let response = simulate_handler_impl(payload).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn simulate_handler_reports_overflow() {
        let payload = SimulatePayload {
            initial_capital: Some(1e300),
            mean_return: Some(1e12),
            std_dev_return: Some(0.0),
            iterations: Some(3),
            seed: Some(1),
            ..SimulatePayload::default()
        };
        let response = simulate_handler_impl(payload).await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_json(response).await;
        assert!(
            body["error"]
                .as_str()
                .expect("error message")
                .contains("overflow")
        );
    }
}
