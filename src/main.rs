//! rampload: ramp-profile HTTP load generator.
//!
//! Every run flag falls back to the environment variable of the same name,
//! and an optional `.env` file is loaded first.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use rampload::loadtest::report::DEFAULT_RESULTS_DIR;

mod commands;

use commands::run::{RunOptions, RunOutcome};
use commands::TargetArgs;

/// Exit status when at least one threshold failed (k6 convention).
const THRESHOLDS_FAILED_EXIT: u8 = 99;

/// Ramp-profile HTTP load generator
#[derive(Parser)]
#[command(name = "rampload")]
#[command(about = "Drive virtual users against an HTTP endpoint with k6-style ramp profiles", long_about = None)]
#[command(version)]
struct Cli {
    /// Debug-level logging (RUST_LOG takes precedence)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a load test
    ///
    /// Follows the selected ramp profile, prints a k6-style summary and
    /// writes a JSON report to results/. Exits 99 when a threshold fails.
    Run {
        #[command(flatten)]
        target: TargetArgs,

        /// Extra threshold as metric:expression, e.g. "http_req_duration:p(90)<300"
        #[arg(long = "threshold", value_name = "METRIC:EXPR")]
        thresholds: Vec<String>,

        /// No live display and no summary
        #[arg(long, short)]
        quiet: bool,

        /// Disable JSON report output
        #[arg(long)]
        no_report: bool,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,

        /// Directory for JSON reports
        #[arg(long, default_value = DEFAULT_RESULTS_DIR)]
        results_dir: PathBuf,
    },

    /// Print the resolved ramp plan and request without sending traffic
    Plan {
        #[command(flatten)]
        target: TargetArgs,

        /// Extra threshold as metric:expression
        #[arg(long = "threshold", value_name = "METRIC:EXPR")]
        thresholds: Vec<String>,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<ExitCode> {
    // Missing .env is fine; every value can come from the real environment
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            target,
            thresholds,
            quiet,
            no_report,
            no_color,
            results_dir,
        } => {
            let options = RunOptions {
                extra_thresholds: thresholds,
                quiet,
                no_report,
                no_color,
                results_dir,
            };
            match commands::run::execute(target.to_config(), options)? {
                RunOutcome::Passed => Ok(ExitCode::SUCCESS),
                RunOutcome::ThresholdsFailed => Ok(ExitCode::from(THRESHOLDS_FAILED_EXIT)),
            }
        }
        Commands::Plan {
            target,
            thresholds,
            json,
        } => {
            commands::plan::execute(target.to_config(), &thresholds, json)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Install the stderr `fmt` subscriber. `RUST_LOG` wins over `--verbose`.
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
