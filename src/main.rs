use clap::{Parser, Subcommand};
use color_eyre::eyre::eyre;

use capsim::api::{SimulationArgs, build_request, execute, run_http_server};
use capsim::init_logging;

#[derive(Parser, Debug)]
#[command(
    name = "capsim",
    about = "Monte Carlo estimate of how likely a portfolio survives a withdrawal horizon"
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one simulation and print the result as JSON
    Run(SimulationArgs),
    /// Serve the simulation JSON API over HTTP
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    match cli.command {
        Command::Run(args) => {
            let request = build_request(args).map_err(|msg| eyre!(msg))?;
            let response = tokio::task::spawn_blocking(move || execute(&request)).await??;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Serve { port } => {
            run_http_server(port).await?;
        }
    }

    Ok(())
}
