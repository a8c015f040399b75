//! Run configuration resolved once from named lookups.
//!
//! Every tunable of a run arrives as a named string lookup (logically an
//! environment variable). [`RunConfig`] captures the raw values exactly once
//! at initialisation and offers typed, lenient accessors on top of them, so
//! the builders downstream never touch process-wide state.
//!
//! | Lookup | Accessor | Default |
//! |---|---|---|
//! | `TARGET_URL` | [`RunConfig::target_url`] | none (fatal) |
//! | `METHOD` | [`RunConfig::method`] | `GET` |
//! | `HEADERS` | [`RunConfig::headers`] | base header set |
//! | `PAYLOAD_DATA` | [`RunConfig::payload_data`] | default JSON |
//! | `EXPECTED_STATUS` | [`RunConfig::expected_status`] | `200` |
//! | `TEST_TYPE` | [`RunConfig::test_type`] | `load` |
//! | `MY_VUS` | [`RunConfig::target_vus`] | per test type |
//! | `MY_DURATION` | [`RunConfig::hold_duration`] | per test type |
//! | `THRESHOLD_P95` / `THRESHOLD_P99` | [`RunConfig::threshold_p95_ms`] / [`RunConfig::threshold_p99_ms`] | 500 / 1000 |
//! | `PACING_MIN_MS` / `PACING_MAX_MS` | [`RunConfig::pacing`] | 1000 / 3000 |
//! | `TEST_NAME` | [`RunConfig::test_name`] | `test` |

use rand::prelude::*;
use serde::Serialize;
use std::time::Duration;

use crate::loadtest::profile::TestType;

pub const TARGET_URL: &str = "TARGET_URL";
pub const METHOD: &str = "METHOD";
pub const HEADERS: &str = "HEADERS";
pub const PAYLOAD_DATA: &str = "PAYLOAD_DATA";
pub const EXPECTED_STATUS: &str = "EXPECTED_STATUS";
pub const TEST_TYPE: &str = "TEST_TYPE";
pub const MY_VUS: &str = "MY_VUS";
pub const MY_DURATION: &str = "MY_DURATION";
pub const THRESHOLD_P95: &str = "THRESHOLD_P95";
pub const THRESHOLD_P99: &str = "THRESHOLD_P99";
pub const PACING_MIN_MS: &str = "PACING_MIN_MS";
pub const PACING_MAX_MS: &str = "PACING_MAX_MS";
pub const TEST_NAME: &str = "TEST_NAME";

/// Default p95 latency threshold in milliseconds.
pub const DEFAULT_THRESHOLD_P95_MS: u64 = 500;

/// Default p99 latency threshold in milliseconds.
pub const DEFAULT_THRESHOLD_P99_MS: u64 = 1000;

/// Raw configuration values captured once at initialisation.
///
/// Empty strings are normalised to `None` so that `TARGET_URL=""` behaves
/// exactly like an unset variable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunConfig {
    pub target_url: Option<String>,
    pub method: Option<String>,
    pub headers: Option<String>,
    pub payload_data: Option<String>,
    pub expected_status: Option<String>,
    pub test_type: Option<String>,
    pub vus: Option<String>,
    pub duration: Option<String>,
    pub threshold_p95: Option<String>,
    pub threshold_p99: Option<String>,
    pub pacing_min_ms: Option<String>,
    pub pacing_max_ms: Option<String>,
    pub test_name: Option<String>,
}

impl RunConfig {
    /// Resolve every known key through `lookup`.
    ///
    /// ```
    /// use std::collections::HashMap;
    /// use rampload::loadtest::config::RunConfig;
    ///
    /// let env = HashMap::from([("TARGET_URL", "http://localhost:8080/health")]);
    /// let config = RunConfig::from_lookup(|key| env.get(key).map(|v| v.to_string()));
    /// assert_eq!(config.target_url(), Some("http://localhost:8080/health"));
    /// ```
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| non_empty(lookup(key));
        Self {
            target_url: get(TARGET_URL),
            method: get(METHOD),
            headers: get(HEADERS),
            payload_data: get(PAYLOAD_DATA),
            expected_status: get(EXPECTED_STATUS),
            test_type: get(TEST_TYPE),
            vus: get(MY_VUS),
            duration: get(MY_DURATION),
            threshold_p95: get(THRESHOLD_P95),
            threshold_p99: get(THRESHOLD_P99),
            pacing_min_ms: get(PACING_MIN_MS),
            pacing_max_ms: get(PACING_MAX_MS),
            test_name: get(TEST_NAME),
        }
    }

    pub fn target_url(&self) -> Option<&str> {
        self.target_url.as_deref()
    }

    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    pub fn headers(&self) -> Option<&str> {
        self.headers.as_deref()
    }

    pub fn payload_data(&self) -> Option<&str> {
        self.payload_data.as_deref()
    }

    pub fn expected_status(&self) -> Option<&str> {
        self.expected_status.as_deref()
    }

    /// Test type tag. Unknown or missing tags fall back to [`TestType::Load`].
    pub fn test_type(&self) -> TestType {
        self.test_type
            .as_deref()
            .map(TestType::parse_lenient)
            .unwrap_or_default()
    }

    /// Target concurrency override, `None` when missing, zero, or not an integer.
    pub fn target_vus(&self) -> Option<u32> {
        self.vus
            .as_deref()
            .and_then(|v| v.trim().parse().ok())
            .filter(|&vus| vus > 0)
    }

    /// Hold-stage duration override, `None` when missing, unparsable, or zero.
    pub fn hold_duration(&self) -> Option<Duration> {
        self.duration
            .as_deref()
            .and_then(parse_duration)
            .filter(|d| !d.is_zero())
    }

    pub fn threshold_p95_ms(&self) -> u64 {
        parse_ms(self.threshold_p95.as_deref()).unwrap_or(DEFAULT_THRESHOLD_P95_MS)
    }

    pub fn threshold_p99_ms(&self) -> u64 {
        parse_ms(self.threshold_p99.as_deref()).unwrap_or(DEFAULT_THRESHOLD_P99_MS)
    }

    /// Pacing window between iterations of a single virtual user.
    pub fn pacing(&self) -> Pacing {
        let default = Pacing::default();
        let min = parse_ms(self.pacing_min_ms.as_deref())
            .map(Duration::from_millis)
            .unwrap_or(default.min);
        let max = parse_ms(self.pacing_max_ms.as_deref())
            .map(Duration::from_millis)
            .unwrap_or(default.max);
        Pacing::new(min, max)
    }

    /// Human-readable test name used for report file names.
    pub fn test_name(&self) -> &str {
        self.test_name.as_deref().unwrap_or("test")
    }
}

/// Pacing (think-time) window slept between iterations.
///
/// Each delay is drawn uniformly from `[min, max)` so that virtual users do
/// not fire on a fixed interval. A window with `max <= min` always sleeps
/// exactly `min`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pacing {
    pub min: Duration,
    pub max: Duration,
}

impl Pacing {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    /// No think time at all.
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Draw the next pacing delay.
    pub fn next_delay(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let secs = rand::rng().random_range(self.min.as_secs_f64()..self.max.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(3))
    }
}

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Parse a k6-style duration: `500ms`, `30s`, `1m`, `2m30s`, `1h`, `1.5s`,
/// or a bare number of seconds.
///
/// Returns `None` for anything else (including negative numbers and unknown
/// units) and for anything longer than `u64::MAX` nanoseconds.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if let Ok(secs) = input.parse::<u64>() {
        return secs.checked_mul(NANOS_PER_SEC).map(Duration::from_nanos);
    }

    let mut total = Duration::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return None;
        }
        let value: f64 = rest[..number_len].parse().ok()?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit_nanos = match &rest[..unit_len] {
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return None,
        };
        rest = &rest[unit_len..];

        let nanos = (value * unit_nanos).round();
        if !nanos.is_finite() || nanos >= u64::MAX as f64 {
            return None;
        }
        total = total.checked_add(Duration::from_nanos(nanos as u64))?;
    }
    Some(total)
}

/// Render a duration in the compact k6 notation accepted by [`parse_duration`].
pub fn format_duration(duration: Duration) -> String {
    let total_ms = duration.as_millis();
    if total_ms == 0 {
        return "0s".to_string();
    }
    if total_ms % 1000 != 0 {
        return format!("{total_ms}ms");
    }

    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    if seconds > 0 {
        out.push_str(&format!("{seconds}s"));
    }
    out
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_ms(value: Option<&str>) -> Option<u64> {
    value.and_then(|v| v.trim().parse().ok())
}
