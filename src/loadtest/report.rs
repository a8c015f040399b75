//! JSON report serialization for run results.
//!
//! Produces a schema-versioned JSON report containing the ramp plan, the
//! request, latency percentiles, check counts, threshold outcomes, the
//! bucketed timeline and the breaking point. Credential header values are
//! redacted. Designed for CI/CD pipeline consumption.

use chrono::{DateTime, Local, TimeZone};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::loadtest::breaking::{BreakingPointAnalysis, TimelineBucket};
use crate::loadtest::engine::LoadTestResult;
use crate::loadtest::error::LoadTestError;
use crate::loadtest::profile::RampProfile;
use crate::loadtest::request::RequestSpec;
use crate::loadtest::threshold::{all_passed, ThresholdOutcome};

/// Schema version for the JSON report format.
///
/// Increment when making breaking changes to the report structure.
const SCHEMA_VERSION: &str = "1.1";

/// Default directory for report files, relative to the working directory.
pub const DEFAULT_RESULTS_DIR: &str = "results";

/// Top-level JSON report structure.
///
/// Self-contained: anyone reading just the JSON file should understand what
/// was run and what happened.
#[derive(Debug, Serialize)]
pub struct LoadTestReport {
    pub schema_version: String,
    /// RFC 3339 timestamp when the report was generated.
    pub timestamp: String,
    pub test_name: String,
    pub target: RequestSpec,
    pub profile: RampProfile,
    /// Actual run duration in seconds, drain included.
    pub duration_secs: f64,
    pub peak_vus: u32,
    pub interrupted: bool,
    pub metrics: ReportMetrics,
    /// Check counts keyed by check name.
    pub checks: BTreeMap<String, CheckReport>,
    pub thresholds: Vec<ThresholdOutcome>,
    pub thresholds_passed: bool,
    pub breaking_point: BreakingPointReport,
    /// Per-bucket traffic the breaking point analysis ran on.
    pub timeline: Vec<TimelineBucket>,
}

/// Aggregate metrics in the report, keyed by k6 metric names.
#[derive(Debug, Serialize)]
pub struct ReportMetrics {
    pub http_reqs: u64,
    pub http_req_failed: u64,
    /// `http_req_failed / http_reqs` (0.0..=1.0).
    pub http_req_failed_rate: f64,
    pub http_req_duration: LatencyMetrics,
    pub iterations: u64,
    pub iterations_passed: u64,
    pub throughput_rps: f64,
    pub data_received_bytes: u64,
    /// Failure counts by classification.
    pub errors: BTreeMap<String, u64>,
    /// Response counts by HTTP status.
    pub status_codes: BTreeMap<u16, u64>,
}

/// Latency metrics in milliseconds over completed responses.
#[derive(Debug, Serialize)]
pub struct LatencyMetrics {
    pub avg_ms: f64,
    pub min_ms: u64,
    pub med_ms: u64,
    pub max_ms: u64,
    pub p90_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct CheckReport {
    /// Human-readable predicate, e.g. `status is 200`.
    pub label: String,
    pub passes: u64,
    pub fails: u64,
    pub rate: f64,
}

/// Breaking point detection result.
///
/// Always present. `detected` is `true` when the live detector fired or the
/// post-run analysis found an incident. The live fields are omitted when the
/// live detector stayed quiet, `analysis` when no request was recorded.
#[derive(Debug, Serialize)]
pub struct BreakingPointReport {
    pub detected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vus: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Seconds since the run started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_at_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<BreakingPointAnalysis>,
}

impl LoadTestReport {
    /// Build a report from run results.
    pub fn from_result(
        result: &LoadTestResult,
        profile: &RampProfile,
        spec: &RequestSpec,
        outcomes: &[ThresholdOutcome],
        test_name: &str,
    ) -> Self {
        let snap = &result.snapshot;

        let checks = snap
            .checks
            .iter()
            .map(|(name, counts)| {
                (
                    name.as_str().to_string(),
                    CheckReport {
                        label: name.label(spec.expected_status),
                        passes: counts.passes,
                        fails: counts.fails,
                        rate: counts.pass_rate(),
                    },
                )
            })
            .collect();

        let live = result.breaking_point.as_ref();
        let broken = result
            .analysis
            .as_ref()
            .is_some_and(|a| a.incident.is_some());
        let breaking_point = BreakingPointReport {
            detected: live.is_some() || broken,
            vus: live.map(|bp| bp.vus),
            reason: live.map(|bp| bp.reason.to_string()),
            detail: live.map(|bp| bp.detail.clone()),
            detected_at_secs: live.map(|bp| bp.detected_at.as_secs_f64()),
            analysis: result.analysis.clone(),
        };

        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            timestamp: Local::now().to_rfc3339(),
            test_name: test_name.to_string(),
            target: spec.clone(),
            profile: profile.clone(),
            duration_secs: result.elapsed.as_secs_f64(),
            peak_vus: result.peak_active_vus,
            interrupted: result.interrupted,
            metrics: ReportMetrics {
                http_reqs: snap.total_requests,
                http_req_failed: snap.failed_requests,
                http_req_failed_rate: snap.failed_rate,
                http_req_duration: LatencyMetrics {
                    avg_ms: snap.mean,
                    min_ms: snap.min,
                    med_ms: snap.p50,
                    max_ms: snap.max,
                    p90_ms: snap.p90,
                    p95_ms: snap.p95,
                    p99_ms: snap.p99,
                },
                iterations: snap.iterations,
                iterations_passed: snap.iterations_passed,
                throughput_rps: snap.requests_per_second(result.elapsed),
                data_received_bytes: snap.bytes_received,
                errors: snap.error_category_counts.clone(),
                status_codes: snap.status_counts.clone(),
            },
            checks,
            thresholds: outcomes.to_vec(),
            thresholds_passed: all_passed(outcomes),
            breaking_point,
            timeline: result.timeline.clone(),
        }
    }
}

/// Reduce a test name to a filesystem-safe stem.
///
/// Keeps alphanumerics, spaces, `_` and `-`, trims, then turns spaces into
/// underscores. Falls back to `test` when nothing survives.
pub fn sanitize_test_name(name: &str) -> String {
    let kept: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '_' | '-'))
        .collect();
    let safe = kept.trim().replace(' ', "_");
    if safe.is_empty() {
        "test".to_string()
    } else {
        safe
    }
}

/// Report filename for `test_name` at `timestamp`:
/// `<sanitised name>_<YYYYmmdd_HHMMSS>.json`.
pub fn report_filename<Tz: TimeZone>(test_name: &str, timestamp: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "{}_{}.json",
        sanitize_test_name(test_name),
        timestamp.format("%Y%m%d_%H%M%S")
    )
}

/// Write `report` as pretty JSON into `results_dir`, creating it if needed.
///
/// Returns the path to the written report file.
pub fn write_report(report: &LoadTestReport, results_dir: &Path) -> Result<PathBuf, LoadTestError> {
    let io_err = |path: &Path| {
        let path = path.display().to_string();
        move |source| LoadTestError::ReportIo { source, path }
    };

    std::fs::create_dir_all(results_dir).map_err(io_err(results_dir))?;

    let report_path = results_dir.join(report_filename(&report.test_name, &Local::now()));
    let json = serde_json::to_string_pretty(report)
        .map_err(|e| io_err(&report_path)(std::io::Error::other(e)))?;
    std::fs::write(&report_path, json).map_err(io_err(&report_path))?;

    tracing::info!(path = %report_path.display(), "Report written");
    Ok(report_path)
}
