//! `rampload run` command implementation.

use anyhow::{Context, Result};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use rampload::loadtest::client::ReqwestTransport;
use rampload::loadtest::config::RunConfig;
use rampload::loadtest::engine::LoadTestEngine;
use rampload::loadtest::error::LoadTestError;
use rampload::loadtest::profile::RampProfile;
use rampload::loadtest::report::{write_report, LoadTestReport};
use rampload::loadtest::request::build_request_spec;
use rampload::loadtest::summary::render_summary;
use rampload::loadtest::threshold::{all_passed, Threshold, ThresholdSet};

/// How a completed run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Passed,
    ThresholdsFailed,
}

/// Output switches for the `run` command.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub extra_thresholds: Vec<String>,
    pub quiet: bool,
    pub no_report: bool,
    pub no_color: bool,
    pub results_dir: PathBuf,
}

/// Build the threshold set: defaults from `config`, then every
/// `metric:expression` given on the command line.
pub fn build_thresholds(config: &RunConfig, extra: &[String]) -> Result<ThresholdSet, LoadTestError> {
    let mut thresholds = ThresholdSet::from_config(config);
    for raw in extra {
        thresholds.push(raw.parse::<Threshold>()?);
    }
    Ok(thresholds)
}

/// Execute the `run` command.
///
/// Resolves the request, profile and thresholds (any failure here is fatal
/// and happens before a single VU starts), runs the engine, prints the
/// summary and writes the JSON report.
pub async fn execute_run(config: RunConfig, options: RunOptions) -> Result<RunOutcome> {
    super::warn_unparsed(&config);

    let spec = build_request_spec(&config).map_err(LoadTestError::from)?;
    let thresholds = build_thresholds(&config, &options.extra_thresholds)?;
    let profile = RampProfile::build(config.test_type(), config.target_vus(), config.hold_duration());
    let transport = ReqwestTransport::new(profile.peak_target())?;

    tracing::info!(
        url = %spec.url,
        method = %spec.method,
        test_type = %profile.test_type,
        peak_vus = profile.peak_target(),
        "Starting run"
    );

    let live_display = !options.quiet && std::io::stderr().is_terminal();
    let engine = LoadTestEngine::new(profile, spec, Arc::new(transport))
        .with_pacing(config.pacing())
        .with_live_display(live_display)
        .with_no_color(options.no_color)
        .with_signal_handling(true);

    let result = engine.run().await;
    let outcomes = thresholds.evaluate(&result.snapshot);

    if options.no_color || !std::io::stdout().is_terminal() {
        colored::control::set_override(false);
    }
    if !options.quiet {
        println!(
            "{}",
            render_summary(&result, engine.profile(), engine.spec(), &outcomes)
        );
    }

    if !options.no_report {
        let report = LoadTestReport::from_result(
            &result,
            engine.profile(),
            engine.spec(),
            &outcomes,
            config.test_name(),
        );
        match write_report(&report, &options.results_dir) {
            Ok(path) => {
                if !options.quiet {
                    eprintln!();
                    eprintln!("Report written to: {}", path.display());
                }
            }
            // Non-fatal: the run itself completed
            Err(e) => eprintln!("Warning: {e}"),
        }
    }

    if all_passed(&outcomes) {
        Ok(RunOutcome::Passed)
    } else {
        let failed: Vec<String> = outcomes
            .iter()
            .filter(|o| !o.passed)
            .map(|o| format!("{}: {}", o.metric, o.expression))
            .collect();
        tracing::warn!(failed = ?failed, "Thresholds crossed");
        Ok(RunOutcome::ThresholdsFailed)
    }
}

/// Blocking entry point used by `main`.
pub fn execute(config: RunConfig, options: RunOptions) -> Result<RunOutcome> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to start the tokio runtime")?;
    runtime.block_on(execute_run(config, options))
}
