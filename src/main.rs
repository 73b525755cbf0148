mod cli;
mod config;
mod dates;
mod download;
mod error;
mod parquet;
mod reading;
mod spatial;
mod storage;

use std::process::ExitCode;

use clap::Parser;
use cli::{command, Cli};
use config::PipelineConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let result = match PipelineConfig::from_cli(&cli) {
        Ok(config) => command::convert(config).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(summary) => {
            println!(
                "Wrote {} records in {} files to `{}`",
                summary.report.rows, summary.report.files, summary.output
            );
            if summary.verified {
                println!("Verified {} records against the parquet footers", summary.report.rows);
            }
            if summary.files_skipped > 0 {
                println!("Skipped {} missing input files", summary.files_skipped);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
