//! HdrHistogram-based metrics aggregation using k6 metric names.
//!
//! [`MetricsRecorder`] ingests one [`RequestSample`] per iteration and keeps:
//!
//! - `http_req_duration`: latency histogram over every completed response
//!   (transport failures have no response and are excluded);
//! - `http_req_failed`: transport failures plus responses with status >= 400;
//! - `checks`: pass/fail counts per named predicate;
//! - `iterations`, error categories, status-code counts, bytes received.
//!
//! # Design
//!
//! - **Single-owner**: no locking. The engine's aggregator task owns the
//!   recorder and is fed through an mpsc channel.
//! - **Millisecond resolution**: matches the unit thresholds are written in.
//! - **No coordinated omission correction**: every virtual user sleeps a
//!   pacing delay between iterations, so there is no fixed send schedule to
//!   correct against.

use std::collections::BTreeMap;
use std::time::Duration;

use hdrhistogram::Histogram;
use serde::Serialize;

use crate::loadtest::check::{CheckName, CheckResult};
use crate::loadtest::client::HttpResponse;
use crate::loadtest::error::TransportError;

/// Latency percentiles tracked in every [`MetricsSnapshot`].
pub const PERCENTILES: [u8; 4] = [50, 90, 95, 99];

/// A single iteration's measurement.
///
/// Created via [`RequestSample::completed`] or [`RequestSample::failed`] and
/// passed to [`MetricsRecorder::record`].
#[derive(Debug, Clone)]
pub struct RequestSample {
    /// Wall-clock duration of the request.
    pub duration: Duration,
    /// Response status, or the transport failure that prevented a response.
    pub outcome: Result<u16, TransportError>,
    /// Check outcomes. `None` when the request never completed.
    pub checks: Option<CheckResult>,
    /// Response body size in bytes.
    pub bytes_received: u64,
}

impl RequestSample {
    /// Sample for a request that produced a response.
    pub fn completed(response: &HttpResponse, checks: CheckResult) -> Self {
        Self {
            duration: response.duration,
            outcome: Ok(response.status),
            checks: Some(checks),
            bytes_received: response.body.len() as u64,
        }
    }

    /// Sample for a request abandoned by a transport failure.
    pub fn failed(duration: Duration, err: TransportError) -> Self {
        Self {
            duration,
            outcome: Err(err),
            checks: None,
            bytes_received: 0,
        }
    }

    /// Whether the sample counts toward `http_req_failed`.
    pub fn is_failed_request(&self) -> bool {
        match &self.outcome {
            Ok(status) => *status >= 400,
            Err(_) => true,
        }
    }

    /// Error category, `None` for a response with status < 400.
    pub fn error_category(&self) -> Option<&'static str> {
        match &self.outcome {
            Ok(status) if (400..500).contains(status) => Some("http_4xx"),
            Ok(status) if *status >= 500 => Some("http_5xx"),
            Ok(_) => None,
            Err(err) => Some(err.error_category()),
        }
    }
}

/// Pass/fail counters for one named check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CheckCounts {
    pub passes: u64,
    pub fails: u64,
}

impl CheckCounts {
    pub fn total(&self) -> u64 {
        self.passes + self.fails
    }

    /// Pass rate as a fraction (0.0..=1.0). Returns 1.0 if never evaluated.
    pub fn pass_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 1.0;
        }
        self.passes as f64 / total as f64
    }
}

/// Point-in-time snapshot of all metrics state.
///
/// Latency values are milliseconds over completed responses.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub p50: u64,
    pub p90: u64,
    pub p95: u64,
    pub p99: u64,
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    /// Iterations recorded (one sample per iteration).
    pub iterations: u64,
    /// Requests that produced a response.
    pub completed_requests: u64,
    /// Requests that failed at the transport level.
    pub transport_failures: u64,
    /// Every request sent (completed + transport failures).
    pub total_requests: u64,
    /// Requests counted by `http_req_failed`.
    pub failed_requests: u64,
    /// `failed_requests / total_requests` (0.0..=1.0).
    pub failed_rate: f64,
    /// Iterations in which every check passed.
    pub iterations_passed: u64,
    pub checks: BTreeMap<CheckName, CheckCounts>,
    pub error_category_counts: BTreeMap<String, u64>,
    pub status_counts: BTreeMap<u16, u64>,
    pub bytes_received: u64,
}

impl MetricsSnapshot {
    /// Whether any response latency has been recorded.
    pub fn has_latency(&self) -> bool {
        self.completed_requests > 0
    }

    /// Latency percentile by name (`50`, `90`, `95`, `99`). Unknown percentiles
    /// return `None`.
    pub fn percentile(&self, p: u8) -> Option<u64> {
        match p {
            50 => Some(self.p50),
            90 => Some(self.p90),
            95 => Some(self.p95),
            99 => Some(self.p99),
            _ => None,
        }
    }

    /// Overall `checks` rate: passed predicates over evaluated predicates.
    pub fn checks_rate(&self) -> f64 {
        let (passes, total) = self
            .checks
            .values()
            .fold((0, 0), |(p, t), c| (p + c.passes, t + c.total()));
        if total == 0 {
            return 1.0;
        }
        passes as f64 / total as f64
    }

    /// Requests per second over `elapsed`.
    pub fn requests_per_second(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.total_requests as f64 / secs
    }
}

/// HdrHistogram-backed metrics recorder.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use rampload::loadtest::error::TransportError;
/// use rampload::loadtest::metrics::{MetricsRecorder, RequestSample};
///
/// let mut recorder = MetricsRecorder::new();
/// recorder.record(&RequestSample::failed(Duration::from_secs(5), TransportError::Timeout));
///
/// let snapshot = recorder.snapshot();
/// assert_eq!(snapshot.failed_requests, 1);
/// assert_eq!(snapshot.completed_requests, 0);
/// ```
pub struct MetricsRecorder {
    duration_histogram: Histogram<u64>,
    iterations: u64,
    transport_failures: u64,
    failed_requests: u64,
    iterations_passed: u64,
    checks: BTreeMap<CheckName, CheckCounts>,
    error_category_counts: BTreeMap<String, u64>,
    status_counts: BTreeMap<u16, u64>,
    bytes_received: u64,
}

impl MetricsRecorder {
    /// Create an empty recorder.
    ///
    /// The histogram keeps 3 significant figures and auto-resizes.
    pub fn new() -> Self {
        let mut duration_histogram =
            Histogram::<u64>::new(3).expect("3 sigfigs is always valid");
        duration_histogram.auto(true);

        Self {
            duration_histogram,
            iterations: 0,
            transport_failures: 0,
            failed_requests: 0,
            iterations_passed: 0,
            checks: BTreeMap::new(),
            error_category_counts: BTreeMap::new(),
            status_counts: BTreeMap::new(),
            bytes_received: 0,
        }
    }

    /// Record one iteration.
    pub fn record(&mut self, sample: &RequestSample) {
        self.iterations += 1;

        if sample.is_failed_request() {
            self.failed_requests += 1;
        }
        if let Some(category) = sample.error_category() {
            *self
                .error_category_counts
                .entry(category.to_owned())
                .or_insert(0) += 1;
        }

        match &sample.outcome {
            Ok(status) => {
                let ms = sample.duration.as_millis() as u64;
                let _ = self.duration_histogram.record(ms);
                *self.status_counts.entry(*status).or_insert(0) += 1;
                self.bytes_received += sample.bytes_received;
            }
            Err(_) => {
                self.transport_failures += 1;
            }
        }

        if let Some(checks) = &sample.checks {
            for (name, passed) in &checks.predicates {
                let counts = self.checks.entry(*name).or_default();
                if *passed {
                    counts.passes += 1;
                } else {
                    counts.fails += 1;
                }
            }
            if checks.passed {
                self.iterations_passed += 1;
            }
        }
    }

    /// Number of completed responses recorded.
    pub fn completed_requests(&self) -> u64 {
        self.duration_histogram.len()
    }

    /// Every request recorded (completed + transport failures).
    pub fn total_requests(&self) -> u64 {
        self.completed_requests() + self.transport_failures
    }

    /// `http_req_failed` rate (0.0..=1.0). Returns 0.0 if nothing recorded.
    pub fn failed_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            return 0.0;
        }
        self.failed_requests as f64 / total as f64
    }

    /// Latency at `quantile` in milliseconds. Returns 0 if no responses recorded.
    pub fn quantile(&self, quantile: f64) -> u64 {
        if self.duration_histogram.is_empty() {
            return 0;
        }
        self.duration_histogram.value_at_quantile(quantile)
    }

    /// Capture a point-in-time snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let has_latency = !self.duration_histogram.is_empty();
        MetricsSnapshot {
            p50: self.quantile(0.50),
            p90: self.quantile(0.90),
            p95: self.quantile(0.95),
            p99: self.quantile(0.99),
            min: if has_latency { self.duration_histogram.min() } else { 0 },
            max: if has_latency { self.duration_histogram.max() } else { 0 },
            mean: if has_latency { self.duration_histogram.mean() } else { 0.0 },
            iterations: self.iterations,
            completed_requests: self.completed_requests(),
            transport_failures: self.transport_failures,
            total_requests: self.total_requests(),
            failed_requests: self.failed_requests,
            failed_rate: self.failed_rate(),
            iterations_passed: self.iterations_passed,
            checks: self.checks.clone(),
            error_category_counts: self.error_category_counts.clone(),
            status_counts: self.status_counts.clone(),
            bytes_received: self.bytes_received,
        }
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}
