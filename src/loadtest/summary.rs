//! k6-style terminal summary renderer for run results.
//!
//! Produces a colorized, human-readable summary with:
//! - ASCII art header with the target and ramp plan
//! - Check pass rates marked ✓/✗
//! - Dotted-line metric rows (metric.........: value)
//! - Failure classification and threshold outcomes
//! - Breaking point analysis over the bucketed timeline
//! - Automatic analysis lines
//!
//! [`render_summary`] is a pure function: takes structured data and returns a
//! formatted [`String`]. Color coding goes through the `colored` crate, which
//! respects the global override set when `--no-color` is active or stdout is
//! piped.

use colored::Colorize;

use crate::loadtest::breaking::{BreakingPointAnalysis, FailurePattern, RunStatus};
use crate::loadtest::config::format_duration;
use crate::loadtest::engine::LoadTestResult;
use crate::loadtest::metrics::MetricsSnapshot;
use crate::loadtest::profile::{Executor, RampProfile};
use crate::loadtest::request::RequestSpec;
use crate::loadtest::threshold::ThresholdOutcome;

/// Width for dotted metric row padding.
const PAD_WIDTH: usize = 32;

const PASS_MARK: &str = "✓";
const FAIL_MARK: &str = "✗";

/// Severity of one analysis line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Good,
    Warning,
    Critical,
}

/// One line of automatic analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub verdict: Verdict,
    pub message: String,
}

impl Finding {
    fn new(verdict: Verdict, message: impl Into<String>) -> Self {
        Self {
            verdict,
            message: message.into(),
        }
    }
}

/// Interpret a snapshot: one line on failures, one on latency.
///
/// Failure bands: none, below 1%, below 5%, 5% or more. Latency bands on
/// p95: under 300ms is fast, over 1000ms is slow. No latency line when no
/// response completed.
pub fn analyze(snap: &MetricsSnapshot) -> Vec<Finding> {
    let mut findings = Vec::new();
    let failed_pct = snap.failed_rate * 100.0;

    if snap.total_requests == 0 {
        findings.push(Finding::new(Verdict::Critical, "No requests were sent."));
    } else if snap.failed_requests == 0 {
        findings.push(Finding::new(Verdict::Good, "No failed requests."));
    } else if failed_pct <= 1.0 {
        findings.push(Finding::new(
            Verdict::Good,
            format!(
                "{} failed requests ({failed_pct:.2}%), within the 1% budget.",
                snap.failed_requests
            ),
        ));
    } else if failed_pct < 5.0 {
        findings.push(Finding::new(
            Verdict::Warning,
            format!(
                "Elevated failure rate: {} failed requests ({failed_pct:.2}%). Check the server logs.",
                snap.failed_requests
            ),
        ));
    } else {
        findings.push(Finding::new(
            Verdict::Critical,
            format!(
                "High failure rate: {} failed requests ({failed_pct:.2}%). Check the server logs.",
                snap.failed_requests
            ),
        ));
    }

    if snap.has_latency() {
        if snap.p95 > 1000 {
            findings.push(Finding::new(
                Verdict::Warning,
                format!("Slow: p95 {}ms is above 1s.", snap.p95),
            ));
        } else if snap.p95 < 300 {
            findings.push(Finding::new(
                Verdict::Good,
                format!("Fast: p95 {}ms is below 300ms.", snap.p95),
            ));
        } else {
            findings.push(Finding::new(
                Verdict::Good,
                format!("Acceptable: p95 {}ms is below 1s.", snap.p95),
            ));
        }
    }

    findings
}

/// Render a k6-style terminal summary.
///
/// # Layout
///
/// ```text
///           /\      |  rampload
///          /  \     |
///     /\  /    \    |  target:    GET http://localhost:8080/health
///    /  \/      \   |  type:      load (ramping-vus)
///   /    \       \  |  vus:       200 max
///  /      \       \ |  duration:  3m + 30s graceful ramp-down
///
///   ✓ status is 200
///   ✗ response time < 500ms
///     ↳  97% ✓ 970 / ✗ 30
///
///   checks.........................: 98.50% ✓ 2955 ✗ 45
///   http_req_duration..............: avg=120.5ms min=12ms med=95ms max=1804ms p(90)=240ms p(95)=380ms p(99)=910ms
///   http_req_failed................: 0.00% ✓ 0 ✗ 1000
/// ```
pub fn render_summary(
    result: &LoadTestResult,
    profile: &RampProfile,
    spec: &RequestSpec,
    outcomes: &[ThresholdOutcome],
) -> String {
    let snap = &result.snapshot;
    let mut lines = vec![render_header(profile, spec)];

    if !snap.checks.is_empty() {
        for (name, counts) in &snap.checks {
            let label = name.label(spec.expected_status);
            if counts.fails == 0 {
                lines.push(format!("  {} {label}", PASS_MARK.green()));
            } else {
                lines.push(format!("  {} {label}", FAIL_MARK.red()));
                lines.push(format!(
                    "    ↳  {:.0}% {PASS_MARK} {} / {FAIL_MARK} {}",
                    counts.pass_rate() * 100.0,
                    counts.passes,
                    counts.fails
                ));
            }
        }
        lines.push(String::new());

        let (passes, total) = snap
            .checks
            .values()
            .fold((0, 0), |(p, t), c| (p + c.passes, t + c.total()));
        let rate = format!("{:.2}%", snap.checks_rate() * 100.0);
        let rate = if passes == total {
            rate.green().to_string()
        } else {
            rate.red().to_string()
        };
        lines.push(format_metric_row(
            "checks",
            &format!("{rate} {PASS_MARK} {passes} {FAIL_MARK} {}", total - passes),
        ));
    }

    let duration_value = if snap.has_latency() {
        format!(
            "avg={:.1}ms min={}ms med={}ms max={}ms p(90)={}ms p(95)={}ms p(99)={}ms",
            snap.mean, snap.min, snap.p50, snap.max, snap.p90, snap.p95, snap.p99
        )
    } else {
        "no completed responses".to_string()
    };
    let duration_value = if snap.p99 < 1000 {
        duration_value.green().to_string()
    } else {
        duration_value.yellow().to_string()
    };
    lines.push(format_metric_row("http_req_duration", &duration_value));

    let failed_pct = snap.failed_rate * 100.0;
    let failed_str = format!("{failed_pct:.2}%");
    let failed_colored = if failed_pct > 5.0 {
        failed_str.red().to_string()
    } else if failed_pct > 1.0 {
        failed_str.yellow().to_string()
    } else {
        failed_str.green().to_string()
    };
    lines.push(format_metric_row(
        "http_req_failed",
        &format!(
            "{failed_colored} {PASS_MARK} {} {FAIL_MARK} {}",
            snap.failed_requests,
            snap.total_requests.saturating_sub(snap.failed_requests)
        ),
    ));

    let elapsed_secs = result.elapsed.as_secs_f64();
    lines.push(format_metric_row(
        "http_reqs",
        &format!(
            "{} {:.1}/s",
            snap.total_requests,
            snap.requests_per_second(result.elapsed)
        ),
    ));
    let iteration_rate = if elapsed_secs > 0.0 {
        snap.iterations as f64 / elapsed_secs
    } else {
        0.0
    };
    lines.push(format_metric_row(
        "iterations",
        &format!("{} {iteration_rate:.1}/s", snap.iterations),
    ));
    lines.push(format_metric_row(
        "data_received",
        &format_bytes(snap.bytes_received),
    ));
    lines.push(format_metric_row("vus_max", &result.peak_active_vus.to_string()));
    lines.push(format_metric_row("elapsed", &format!("{elapsed_secs:.1}s")));

    if !snap.status_counts.is_empty() {
        lines.push(String::new());
        lines.push("  status codes:".to_string());
        for (status, count) in &snap.status_counts {
            lines.push(format_metric_row(&format!("  {status}"), &count.to_string()));
        }
    }

    if !snap.error_category_counts.is_empty() {
        lines.push(String::new());
        lines.push("  errors:".to_string());
        let mut categories: Vec<_> = snap.error_category_counts.iter().collect();
        categories.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        for (category, count) in categories {
            lines.push(format_metric_row(
                &format!("  {category}"),
                &count.to_string().red().to_string(),
            ));
        }
    }

    if !outcomes.is_empty() {
        lines.push(String::new());
        lines.push("  thresholds:".to_string());
        for outcome in outcomes {
            let mark = if outcome.passed {
                PASS_MARK.green()
            } else {
                FAIL_MARK.red()
            };
            let observed = match outcome.observed {
                Some(value) => format!("observed {value:.4}"),
                None => "no data".to_string(),
            };
            lines.push(format!(
                "    {mark} {}: {} ({observed})",
                outcome.metric, outcome.expression
            ));
        }
    }

    if let Some(bp) = &result.breaking_point {
        lines.push(String::new());
        lines.push(format!(
            "  {} Breaking point at {} VUs after {}s ({}): {}",
            "WARNING:".yellow().bold(),
            bp.vus,
            bp.detected_at.as_secs(),
            bp.reason,
            bp.detail
        ));
    }

    if let Some(analysis) = &result.analysis {
        lines.push(String::new());
        lines.push("  breaking point analysis:".to_string());
        lines.extend(render_breaking_analysis(analysis));
    }

    if result.hard_stopped_vus > 0 {
        lines.push(format!(
            "  {} {} VUs were stopped mid-request after the graceful ramp-down window",
            "NOTE:".yellow(),
            result.hard_stopped_vus
        ));
    }
    if result.interrupted {
        lines.push(format!("  {} run interrupted by Ctrl+C", "NOTE:".yellow()));
    }

    lines.push(String::new());
    lines.push("  analysis:".to_string());
    for finding in analyze(snap) {
        let message = match finding.verdict {
            Verdict::Good => format!("{PASS_MARK} {}", finding.message).green(),
            Verdict::Warning => format!("! {}", finding.message).yellow(),
            Verdict::Critical => format!("{FAIL_MARK} {}", finding.message).red(),
        };
        lines.push(format!("    {message}"));
    }

    lines.join("\n")
}

fn render_breaking_analysis(analysis: &BreakingPointAnalysis) -> Vec<String> {
    let peak = format!(
        "peak {} VUs at {:.1} req/s",
        analysis.peak_vus, analysis.peak_rps
    );
    let Some(incident) = &analysis.incident else {
        let line = match analysis.status {
            RunStatus::MinorErrors => format!(
                "! {} sporadic errors, never more than one per bucket; {peak}",
                analysis.total_errors
            )
            .yellow(),
            _ => format!("{PASS_MARK} Stable throughout, no breaking point; {peak}").green(),
        };
        return vec![format!("    {line}")];
    };

    let advice = match incident.pattern {
        FailurePattern::GradualDegradation => "check for memory leaks or connection pool exhaustion",
        FailurePattern::SuddenFailure => "check rate limiting and max connection settings",
    };
    vec![
        format!(
            "    {}",
            format!(
                "{FAIL_MARK} Broke {}s in at {} VUs ({:.1} req/s)",
                incident.at.as_secs(),
                incident.vus_at_error,
                incident.rps
            )
            .red()
        ),
        format!(
            "    saturation at {} VUs, p95 {:.0}ms -> {:.0}ms",
            incident.vus_at_saturation, incident.stable_p95_ms, incident.degraded_p95_ms
        ),
        format!("    pattern: {} ({advice})", incident.pattern),
        format!("    {} errors in total; {peak}", analysis.total_errors),
    ]
}

/// Render the ASCII art header with the run plan.
fn render_header(profile: &RampProfile, spec: &RequestSpec) -> String {
    let executor = match profile.executor {
        Executor::RampingVus => "ramping-vus",
        Executor::ConstantVus => "constant-vus",
    };
    let graceful = if profile.graceful_ramp_down.is_zero() {
        String::new()
    } else {
        format!(" + {} graceful ramp-down", format_duration(profile.graceful_ramp_down))
    };
    format!(
        r#"
          /\      |  {}
         /  \     |
    /\  /    \    |  target:    {} {}
   /  \/      \   |  type:      {} ({})
  /    \       \  |  vus:       {} max
 /      \       \ |  duration:  {}{}
"#,
        "rampload".bold(),
        spec.method,
        spec.url,
        profile.test_type,
        executor,
        profile.peak_target(),
        format_duration(profile.total_duration()),
        graceful,
    )
}

/// Format a single metric row with dot-padding.
///
/// Produces: `"  metric_name..................: value_string"`
fn format_metric_row(name: &str, value: &str) -> String {
    format!("  {name:.<PAD_WIDTH$}: {value}")
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "kB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
