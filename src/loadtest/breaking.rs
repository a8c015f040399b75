//! Breaking point detection, live and after the run.
//!
//! [`BreakingPointDetector`] watches per-interval metrics (one
//! [`MetricsSnapshot`] covering only the requests of the last aggregator tick)
//! and reports when the target starts degrading as concurrency rises.
//! Detection fires exactly once per run and never stops the run.
//!
//! The window is split in half and the newer half is compared against the
//! older half, so no absolute latency threshold is assumed. Detection
//! triggers when **either** condition holds:
//!
//! 1. **Error rate spike**: recent error rate > 10% AND > 2x baseline.
//! 2. **Latency saturation**: recent p95 > 2x baseline p95.
//!
//! Intervals without any request are skipped.
//!
//! [`analyze_timeline`] runs once the run has finished, over fixed
//! [`ANALYSIS_BUCKET`]-wide [`TimelineBucket`]s. It locates the first bucket
//! with more than one failed request, the VUs and throughput there, and
//! whether p95 had already doubled over the early baseline before it
//! ([`FailurePattern::GradualDegradation`]) or not
//! ([`FailurePattern::SuddenFailure`]).

use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use crate::loadtest::metrics::MetricsSnapshot;

/// Default rolling window size (intervals). At a 2s tick this is 20s of history.
const DEFAULT_WINDOW_SIZE: usize = 10;

const ERROR_RATE_ABSOLUTE_THRESHOLD: f64 = 0.10;

const ERROR_RATE_RELATIVE_MULTIPLIER: f64 = 2.0;

const P95_RELATIVE_MULTIPLIER: u64 = 2;

/// Width of the buckets [`analyze_timeline`] works on.
pub const ANALYSIS_BUCKET: Duration = Duration::from_secs(5);

/// A bucket counts as failing once it holds more than this many failed requests.
const BUCKET_ERROR_TOLERANCE: u64 = 1;

/// Pre-incident buckets needed before a latency baseline is attempted.
const MIN_PRE_INCIDENT_BUCKETS: usize = 3;

const SATURATION_MULTIPLIER: f64 = 2.0;

#[derive(Debug, Clone)]
struct WindowSample {
    error_rate: f64,
    p95_ms: u64,
    active_vus: u32,
}

/// Why a breaking point fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakingReason {
    ErrorRateSpike,
    LatencySaturation,
}

impl fmt::Display for BreakingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ErrorRateSpike => "error_rate_spike",
            Self::LatencySaturation => "latency_saturation",
        })
    }
}

/// A detected breaking point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakingPoint {
    /// Active VUs in the interval that triggered detection.
    pub vus: u32,
    pub reason: BreakingReason,
    /// Human-readable explanation.
    pub detail: String,
    /// Time since the run started.
    #[serde(rename = "detected_at_secs", serialize_with = "serialize_secs")]
    pub detected_at: Duration,
}

/// Rolling-window breaking point detector.
///
/// ```
/// use std::time::Duration;
/// use rampload::loadtest::breaking::BreakingPointDetector;
/// use rampload::loadtest::metrics::MetricsSnapshot;
///
/// let mut detector = BreakingPointDetector::with_default_window();
/// let interval = MetricsSnapshot { total_requests: 10, p95: 40, ..Default::default() };
/// assert!(detector.observe(&interval, 5, Duration::from_secs(2)).is_none());
/// ```
pub struct BreakingPointDetector {
    window: VecDeque<WindowSample>,
    window_size: usize,
    breaking_point: Option<BreakingPoint>,
}

impl BreakingPointDetector {
    /// Creates a detector holding `window_size` intervals (at least 2).
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(2);
        Self {
            window: VecDeque::with_capacity(window_size),
            window_size,
            breaking_point: None,
        }
    }

    pub fn with_default_window() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }

    /// Observe one interval.
    ///
    /// Returns `Some(BreakingPoint)` on first detection and `None` otherwise,
    /// including every call after the first detection. Nothing is evaluated
    /// until the window is full.
    pub fn observe(
        &mut self,
        interval: &MetricsSnapshot,
        active_vus: u32,
        elapsed: Duration,
    ) -> Option<BreakingPoint> {
        if interval.total_requests == 0 {
            return None;
        }

        self.window.push_back(WindowSample {
            error_rate: interval.failed_rate,
            p95_ms: interval.p95,
            active_vus,
        });
        if self.window.len() > self.window_size {
            self.window.pop_front();
        }

        if self.breaking_point.is_some() || self.window.len() < self.window_size {
            return None;
        }

        let half = self.window_size / 2;
        let samples: Vec<&WindowSample> = self.window.iter().collect();
        let (baseline, recent) = samples.split_at(half);

        let baseline_error_rate = mean_f64(baseline.iter().map(|s| s.error_rate));
        let recent_error_rate = mean_f64(recent.iter().map(|s| s.error_rate));
        let baseline_p95 = mean_u64(baseline.iter().map(|s| s.p95_ms));
        let recent_p95 = mean_u64(recent.iter().map(|s| s.p95_ms));
        let current_vus = self.window.back().map_or(0, |s| s.active_vus);

        let detected = if recent_error_rate > ERROR_RATE_ABSOLUTE_THRESHOLD
            && recent_error_rate > baseline_error_rate * ERROR_RATE_RELATIVE_MULTIPLIER
        {
            Some((
                BreakingReason::ErrorRateSpike,
                format!(
                    "Error rate {:.1}% exceeds threshold (>10% and >{}x baseline {:.1}%)",
                    recent_error_rate * 100.0,
                    ERROR_RATE_RELATIVE_MULTIPLIER,
                    baseline_error_rate * 100.0,
                ),
            ))
        } else if baseline_p95 > 0 && recent_p95 > baseline_p95 * P95_RELATIVE_MULTIPLIER {
            Some((
                BreakingReason::LatencySaturation,
                format!(
                    "P95 {recent_p95}ms exceeds {P95_RELATIVE_MULTIPLIER}x baseline {baseline_p95}ms"
                ),
            ))
        } else {
            None
        };

        let (reason, detail) = detected?;
        let bp = BreakingPoint {
            vus: current_vus,
            reason,
            detail,
            detected_at: elapsed,
        };
        tracing::warn!(vus = bp.vus, reason = %bp.reason, "{}", bp.detail);
        self.breaking_point = Some(bp.clone());
        Some(bp)
    }

    pub fn detected(&self) -> bool {
        self.breaking_point.is_some()
    }

    pub fn breaking_point(&self) -> Option<&BreakingPoint> {
        self.breaking_point.as_ref()
    }
}

/// Traffic observed during one fixed-width slice of the run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineBucket {
    /// Offset of the bucket start from the run start.
    #[serde(rename = "start_secs", serialize_with = "serialize_secs")]
    pub start: Duration,
    pub requests: u64,
    /// Failed requests (`http_req_failed`).
    pub errors: u64,
    /// Highest active VU count seen during the bucket.
    pub vus: u32,
    pub p95_ms: u64,
    pub rps: f64,
}

impl TimelineBucket {
    /// Summarise `snapshot`, which covers `width` starting at `start`.
    pub fn from_snapshot(
        start: Duration,
        width: Duration,
        snapshot: &MetricsSnapshot,
        vus: u32,
    ) -> Self {
        let secs = width.as_secs_f64();
        let rps = if secs > 0.0 {
            snapshot.total_requests as f64 / secs
        } else {
            0.0
        };
        Self {
            start,
            requests: snapshot.total_requests,
            errors: snapshot.failed_requests,
            vus,
            p95_ms: snapshot.p95,
            rps,
        }
    }
}

/// Overall verdict of the post-run analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// No failed request at all.
    Perfect,
    /// Failures, but never more than one per bucket.
    MinorErrors,
    Broken,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Perfect => "perfect",
            Self::MinorErrors => "minor_errors",
            Self::Broken => "broken",
        })
    }
}

/// How the target reached its breaking point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePattern {
    /// p95 doubled over the baseline before errors appeared.
    GradualDegradation,
    /// Errors appeared without a latency warning.
    SuddenFailure,
}

impl fmt::Display for FailurePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::GradualDegradation => "gradual degradation",
            Self::SuddenFailure => "sudden failure",
        })
    }
}

/// Where and how the target broke.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Incident {
    /// Offset of the first failing bucket from the first bucket.
    #[serde(rename = "at_secs", serialize_with = "serialize_secs")]
    pub at: Duration,
    pub vus_at_error: u32,
    /// VUs when p95 first doubled, or [`Incident::vus_at_error`] for a sudden failure.
    pub vus_at_saturation: u32,
    /// Throughput of the first failing bucket.
    pub rps: f64,
    /// Mean p95 over the first third of the pre-incident buckets.
    pub stable_p95_ms: f64,
    /// p95 at saturation, or the overall p95 for a sudden failure.
    pub degraded_p95_ms: f64,
    pub pattern: FailurePattern,
}

/// Result of [`analyze_timeline`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakingPointAnalysis {
    pub status: RunStatus,
    pub total_errors: u64,
    pub peak_vus: u32,
    pub peak_rps: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incident: Option<Incident>,
}

/// Analyse the bucketed timeline of a finished run.
///
/// Returns `None` when no request was recorded. `overall_p95_ms` stands in for
/// the degraded latency when errors arrive without prior saturation.
pub fn analyze_timeline(
    buckets: &[TimelineBucket],
    overall_p95_ms: u64,
) -> Option<BreakingPointAnalysis> {
    let first = buckets.first()?;
    if buckets.iter().all(|b| b.requests == 0) {
        return None;
    }

    let total_errors = buckets.iter().map(|b| b.errors).sum();
    let peak_vus = buckets.iter().map(|b| b.vus).max().unwrap_or(0);
    let peak_rps = buckets.iter().map(|b| b.rps).fold(0.0, f64::max);

    let Some(error_index) = buckets
        .iter()
        .position(|b| b.errors > BUCKET_ERROR_TOLERANCE)
    else {
        let status = if total_errors == 0 {
            RunStatus::Perfect
        } else {
            RunStatus::MinorErrors
        };
        return Some(BreakingPointAnalysis {
            status,
            total_errors,
            peak_vus,
            peak_rps,
            incident: None,
        });
    };
    let failing = &buckets[error_index];

    let pre_incident = &buckets[..error_index];
    let mut stable_p95_ms = 0.0;
    let mut saturation = None;
    if pre_incident.len() >= MIN_PRE_INCIDENT_BUCKETS {
        let baseline = &pre_incident[..pre_incident.len() / 3];
        stable_p95_ms =
            baseline.iter().map(|b| b.p95_ms as f64).sum::<f64>() / baseline.len() as f64;
        if stable_p95_ms > 0.0 {
            saturation = pre_incident
                .iter()
                .find(|b| b.p95_ms as f64 > stable_p95_ms * SATURATION_MULTIPLIER);
        }
    }

    let (pattern, vus_at_saturation, degraded_p95_ms) = match saturation {
        Some(bucket) => (
            FailurePattern::GradualDegradation,
            bucket.vus,
            bucket.p95_ms as f64,
        ),
        None => (
            FailurePattern::SuddenFailure,
            failing.vus,
            overall_p95_ms as f64,
        ),
    };

    Some(BreakingPointAnalysis {
        status: RunStatus::Broken,
        total_errors,
        peak_vus,
        peak_rps,
        incident: Some(Incident {
            at: failing.start.saturating_sub(first.start),
            vus_at_error: failing.vus,
            vus_at_saturation,
            rps: failing.rps,
            stable_p95_ms,
            degraded_p95_ms,
            pattern,
        }),
    })
}

fn mean_f64(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0u64), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

fn mean_u64(values: impl Iterator<Item = u64>) -> u64 {
    let (sum, count) = values.fold((0u64, 0u64), |(s, c), v| (s.saturating_add(v), c + 1));
    if count == 0 {
        0
    } else {
        sum / count
    }
}

fn serialize_secs<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}
