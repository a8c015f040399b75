//! Per-response checks.
//!
//! Every completed response is evaluated against three named predicates:
//! the status matches the expected code, and the latency is under 500ms and
//! under 1000ms. The iteration passes only when all three hold; each
//! predicate is still counted on its own so the summary can show which one
//! failed.

use serde::Serialize;
use std::fmt;
use std::time::Duration;

use crate::loadtest::client::HttpResponse;
use crate::loadtest::request::RequestSpec;

/// Maximum number of body characters kept in a failure diagnostic.
pub const BODY_PREFIX_CHARS: usize = 200;

/// Named predicates evaluated for every response, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckName {
    StatusMatch,
    #[serde(rename = "latency-under-500ms")]
    LatencyUnder500ms,
    #[serde(rename = "latency-under-1000ms")]
    LatencyUnder1000ms,
}

impl CheckName {
    pub const ALL: [CheckName; 3] = [
        CheckName::StatusMatch,
        CheckName::LatencyUnder500ms,
        CheckName::LatencyUnder1000ms,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StatusMatch => "status-match",
            Self::LatencyUnder500ms => "latency-under-500ms",
            Self::LatencyUnder1000ms => "latency-under-1000ms",
        }
    }

    /// Human label used in the terminal summary.
    pub fn label(&self, expected_status: u16) -> String {
        match self {
            Self::StatusMatch => format!("status is {expected_status}"),
            Self::LatencyUnder500ms => "response time < 500ms".to_string(),
            Self::LatencyUnder1000ms => "response time < 1000ms".to_string(),
        }
    }

    fn evaluate(&self, response: &HttpResponse, expected_status: u16) -> bool {
        match self {
            Self::StatusMatch => response.status == expected_status,
            Self::LatencyUnder500ms => response.duration < Duration::from_millis(500),
            Self::LatencyUnder1000ms => response.duration < Duration::from_millis(1000),
        }
    }
}

impl fmt::Display for CheckName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context captured when the status check fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckDiagnostic {
    pub method: String,
    pub url: String,
    pub status: u16,
    /// At most [`BODY_PREFIX_CHARS`] characters of the response body.
    pub body_prefix: String,
}

impl fmt::Display for CheckDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FAILURE: {} {} -> Status: {}",
            self.method, self.url, self.status
        )?;
        if !self.body_prefix.is_empty() {
            write!(f, " Body: {}...", self.body_prefix)?;
        }
        Ok(())
    }
}

/// Outcome of the checks for one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    /// Predicate outcomes in [`CheckName::ALL`] order.
    pub predicates: Vec<(CheckName, bool)>,
    /// True when every predicate passed.
    pub passed: bool,
    /// Present when the status check failed.
    pub diagnostic: Option<CheckDiagnostic>,
}

impl CheckResult {
    /// Outcome of a single predicate.
    pub fn get(&self, name: CheckName) -> Option<bool> {
        self.predicates
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, ok)| *ok)
    }
}

/// Evaluate `response` against `spec`'s expectations.
///
/// A failing status check logs the diagnostic at error level and returns it
/// in the result.
pub fn evaluate(spec: &RequestSpec, response: &HttpResponse) -> CheckResult {
    let predicates: Vec<(CheckName, bool)> = CheckName::ALL
        .iter()
        .map(|name| (*name, name.evaluate(response, spec.expected_status)))
        .collect();
    let passed = predicates.iter().all(|(_, ok)| *ok);

    let diagnostic = (response.status != spec.expected_status).then(|| {
        let diagnostic = CheckDiagnostic {
            method: spec.method.to_string(),
            url: spec.url.clone(),
            status: response.status,
            body_prefix: body_prefix(&response.body),
        };
        tracing::error!(
            method = %diagnostic.method,
            url = %diagnostic.url,
            status = diagnostic.status,
            expected = spec.expected_status,
            body = %diagnostic.body_prefix,
            "Status check failed"
        );
        diagnostic
    });

    CheckResult {
        predicates,
        passed,
        diagnostic,
    }
}

fn body_prefix(body: &[u8]) -> String {
    String::from_utf8_lossy(body)
        .chars()
        .take(BODY_PREFIX_CHARS)
        .collect()
}
