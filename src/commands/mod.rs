//! `rampload` CLI subcommands.
//!
//! Provides `run` (execute a load test) and `plan` (print the resolved plan
//! without sending traffic). Both share [`TargetArgs`], whose flags fall back
//! to the environment variables of the same name.

pub mod plan;
pub mod run;

use clap::Args;

use rampload::loadtest::config::{self, RunConfig};

/// Run configuration flags. Every flag falls back to its environment variable.
#[derive(Debug, Clone, Default, Args)]
pub struct TargetArgs {
    /// Request destination
    #[arg(long = "url", env = "TARGET_URL")]
    pub target_url: Option<String>,

    /// HTTP method (GET, POST, PUT, PATCH, DELETE)
    #[arg(long, env = "METHOD")]
    pub method: Option<String>,

    /// JSON object merged into the base headers
    #[arg(long, env = "HEADERS")]
    pub headers: Option<String>,

    /// Raw request body for POST/PUT/PATCH
    #[arg(long = "payload", env = "PAYLOAD_DATA")]
    pub payload_data: Option<String>,

    /// Status code the status check expects
    #[arg(long, env = "EXPECTED_STATUS")]
    pub expected_status: Option<String>,

    /// Test profile: load, stress, spike or smoke
    #[arg(long = "test-type", env = "TEST_TYPE")]
    pub test_type: Option<String>,

    /// Target concurrency (defaults per test type)
    #[arg(long, env = "MY_VUS")]
    pub vus: Option<String>,

    /// Hold duration, e.g. 30s, 2m30s, 1h or bare seconds
    #[arg(long, env = "MY_DURATION")]
    pub duration: Option<String>,

    /// p95 latency threshold in milliseconds
    #[arg(long = "threshold-p95", env = "THRESHOLD_P95")]
    pub threshold_p95: Option<String>,

    /// p99 latency threshold in milliseconds
    #[arg(long = "threshold-p99", env = "THRESHOLD_P99")]
    pub threshold_p99: Option<String>,

    /// Minimum pause between iterations in milliseconds
    #[arg(long = "pacing-min-ms", env = "PACING_MIN_MS")]
    pub pacing_min_ms: Option<String>,

    /// Maximum pause between iterations in milliseconds
    #[arg(long = "pacing-max-ms", env = "PACING_MAX_MS")]
    pub pacing_max_ms: Option<String>,

    /// Name used for the report file
    #[arg(long = "name", env = "TEST_NAME")]
    pub test_name: Option<String>,
}

impl TargetArgs {
    /// Resolve the flags into a [`RunConfig`] through the same lookup path
    /// the environment uses, so both sources get identical normalisation.
    pub fn to_config(&self) -> RunConfig {
        RunConfig::from_lookup(|key| {
            let value = match key {
                config::TARGET_URL => &self.target_url,
                config::METHOD => &self.method,
                config::HEADERS => &self.headers,
                config::PAYLOAD_DATA => &self.payload_data,
                config::EXPECTED_STATUS => &self.expected_status,
                config::TEST_TYPE => &self.test_type,
                config::MY_VUS => &self.vus,
                config::MY_DURATION => &self.duration,
                config::THRESHOLD_P95 => &self.threshold_p95,
                config::THRESHOLD_P99 => &self.threshold_p99,
                config::PACING_MIN_MS => &self.pacing_min_ms,
                config::PACING_MAX_MS => &self.pacing_max_ms,
                config::TEST_NAME => &self.test_name,
                _ => return None,
            };
            value.clone()
        })
    }
}

/// Warn about lookups that were supplied but could not be used.
pub fn warn_unparsed(config: &RunConfig) {
    if let Some(tag) = config.test_type.as_deref() {
        if !rampload::loadtest::profile::TestType::is_known(tag) {
            tracing::warn!(test_type = tag, "Unknown test type, falling back to load");
        }
    }
    if config.vus.is_some() && config.target_vus().is_none() {
        tracing::warn!(vus = ?config.vus, "VU count must be a positive integer, using the test type default");
    }
    if config.duration.is_some() && config.hold_duration().is_none() {
        tracing::warn!(duration = ?config.duration, "Invalid duration, using the default hold");
    }
}
