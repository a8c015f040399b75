//! Pass/fail criteria evaluated against aggregated metrics.
//!
//! Thresholds use k6 notation: a metric name and an expression such as
//! `http_req_failed: rate<0.01` or `http_req_duration: p(95)<500`. They are
//! evaluated once, against the final [`MetricsSnapshot`]; individual
//! iterations never consult them.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::loadtest::config::RunConfig;
use crate::loadtest::error::ThresholdError;
use crate::loadtest::metrics::{MetricsSnapshot, PERCENTILES};

/// Metrics a threshold can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Latency trend over completed responses (milliseconds).
    HttpReqDuration,
    /// Rate of failed requests.
    HttpReqFailed,
    /// Rate of passed check predicates.
    Checks,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HttpReqDuration => "http_req_duration",
            Self::HttpReqFailed => "http_req_failed",
            Self::Checks => "checks",
        }
    }

    fn is_rate(&self) -> bool {
        matches!(self, Self::HttpReqFailed | Self::Checks)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = ThresholdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "http_req_duration" => Ok(Self::HttpReqDuration),
            "http_req_failed" => Ok(Self::HttpReqFailed),
            "checks" => Ok(Self::Checks),
            other => Err(ThresholdError::UnknownMetric {
                name: other.to_string(),
            }),
        }
    }
}

/// Aggregation applied to a metric before comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    Rate,
    Percentile(u8),
    Avg,
    Min,
    Max,
    Med,
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rate => f.write_str("rate"),
            Self::Percentile(p) => write!(f, "p({p})"),
            Self::Avg => f.write_str("avg"),
            Self::Min => f.write_str("min"),
            Self::Max => f.write_str("max"),
            Self::Med => f.write_str("med"),
        }
    }
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

impl Comparison {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "==",
        }
    }

    fn holds(&self, observed: f64, limit: f64) -> bool {
        match self {
            Self::Lt => observed < limit,
            Self::Le => observed <= limit,
            Self::Gt => observed > limit,
            Self::Ge => observed >= limit,
            Self::Eq => (observed - limit).abs() < f64::EPSILON,
        }
    }
}

/// Parsed threshold expression such as `p(95)<500`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Expression {
    pub aggregation: Aggregation,
    pub comparison: Comparison,
    pub limit: f64,
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.aggregation,
            self.comparison.as_str(),
            self.limit
        )
    }
}

impl FromStr for Expression {
    type Err = ThresholdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        let parse_err = |reason: &str| ThresholdError::Parse {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let op_start = input
            .find(['<', '>', '='])
            .ok_or_else(|| parse_err("missing comparison operator"))?;
        let (lhs, rest) = input.split_at(op_start);

        // Two-character operators first so "<=" is not read as "<".
        let (comparison, rhs) = [
            ("<=", Comparison::Le),
            (">=", Comparison::Ge),
            ("==", Comparison::Eq),
            ("<", Comparison::Lt),
            (">", Comparison::Gt),
        ]
        .iter()
        .find_map(|(token, cmp)| rest.strip_prefix(token).map(|r| (*cmp, r)))
        .ok_or_else(|| parse_err("unknown comparison operator"))?;

        let aggregation = parse_aggregation(lhs.trim()).ok_or_else(|| {
            parse_err("expected rate, avg, min, max, med or p(N)")
        })?;
        let limit: f64 = rhs
            .trim()
            .parse()
            .map_err(|_| parse_err("limit is not a number"))?;

        Ok(Self {
            aggregation,
            comparison,
            limit,
        })
    }
}

fn parse_aggregation(s: &str) -> Option<Aggregation> {
    match s {
        "rate" => Some(Aggregation::Rate),
        "avg" => Some(Aggregation::Avg),
        "min" => Some(Aggregation::Min),
        "max" => Some(Aggregation::Max),
        "med" => Some(Aggregation::Med),
        _ => s
            .strip_prefix("p(")
            .and_then(|r| r.strip_suffix(')'))
            .and_then(|p| p.trim().parse().ok())
            .map(Aggregation::Percentile),
    }
}

/// A metric paired with an expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub metric: Metric,
    pub expression: Expression,
}

impl Threshold {
    /// Pair `metric` with `expression`, rejecting aggregations the metric
    /// does not support.
    pub fn new(metric: Metric, expression: Expression) -> Result<Self, ThresholdError> {
        let supported = match expression.aggregation {
            Aggregation::Rate => metric.is_rate(),
            Aggregation::Percentile(p) => {
                !metric.is_rate() && PERCENTILES.contains(&p)
            }
            Aggregation::Avg | Aggregation::Min | Aggregation::Max | Aggregation::Med => {
                !metric.is_rate()
            }
        };
        if !supported {
            return Err(ThresholdError::UnsupportedAggregation {
                metric: metric.to_string(),
                aggregation: expression.aggregation.to_string(),
            });
        }
        Ok(Self { metric, expression })
    }

    /// Observed value for this threshold, `None` when the metric has no data.
    pub fn observe(&self, snapshot: &MetricsSnapshot) -> Option<f64> {
        match self.metric {
            Metric::HttpReqFailed => {
                (snapshot.total_requests > 0).then_some(snapshot.failed_rate)
            }
            Metric::Checks => {
                let evaluated: u64 = snapshot.checks.values().map(|c| c.total()).sum();
                (evaluated > 0).then(|| snapshot.checks_rate())
            }
            Metric::HttpReqDuration => {
                if !snapshot.has_latency() {
                    return None;
                }
                let value = match self.expression.aggregation {
                    Aggregation::Percentile(p) => snapshot.percentile(p)? as f64,
                    Aggregation::Avg => snapshot.mean,
                    Aggregation::Min => snapshot.min as f64,
                    Aggregation::Max => snapshot.max as f64,
                    Aggregation::Med => snapshot.p50 as f64,
                    Aggregation::Rate => return None,
                };
                Some(value)
            }
        }
    }

    /// Evaluate against `snapshot`. A metric without data passes.
    pub fn evaluate(&self, snapshot: &MetricsSnapshot) -> ThresholdOutcome {
        let observed = self.observe(snapshot);
        let passed = observed.is_none_or(|value| {
            self.expression
                .comparison
                .holds(value, self.expression.limit)
        });
        ThresholdOutcome {
            metric: self.metric,
            expression: self.expression.to_string(),
            observed,
            passed,
        }
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.metric, self.expression)
    }
}

impl FromStr for Threshold {
    type Err = ThresholdError;

    /// Parse `metric:expression`, e.g. `http_req_duration: p(90)<300`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (metric, expression) = s.split_once(':').ok_or_else(|| ThresholdError::Parse {
            input: s.trim().to_string(),
            reason: "expected metric:expression".to_string(),
        })?;
        Threshold::new(metric.parse()?, expression.parse()?)
    }
}

/// Result of evaluating one threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdOutcome {
    pub metric: Metric,
    pub expression: String,
    /// `None` when the metric had no data.
    pub observed: Option<f64>,
    pub passed: bool,
}

/// Ordered, immutable list of thresholds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThresholdSet {
    thresholds: Vec<Threshold>,
}

impl ThresholdSet {
    pub fn new(thresholds: Vec<Threshold>) -> Self {
        Self { thresholds }
    }

    /// The default set:
    ///
    /// - `http_req_failed: rate<0.01`
    /// - `http_req_duration: p(95)<THRESHOLD_P95` (500 by default)
    /// - `http_req_duration: p(99)<THRESHOLD_P99` (1000 by default)
    pub fn from_config(config: &RunConfig) -> Self {
        let lt = |aggregation, limit| Expression {
            aggregation,
            comparison: Comparison::Lt,
            limit,
        };
        Self::new(vec![
            Threshold {
                metric: Metric::HttpReqFailed,
                expression: lt(Aggregation::Rate, 0.01),
            },
            Threshold {
                metric: Metric::HttpReqDuration,
                expression: lt(Aggregation::Percentile(95), config.threshold_p95_ms() as f64),
            },
            Threshold {
                metric: Metric::HttpReqDuration,
                expression: lt(Aggregation::Percentile(99), config.threshold_p99_ms() as f64),
            },
        ])
    }

    /// Append `threshold`, keeping definition order.
    pub fn push(&mut self, threshold: Threshold) {
        self.thresholds.push(threshold);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Threshold> {
        self.thresholds.iter()
    }

    pub fn len(&self) -> usize {
        self.thresholds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }

    /// Evaluate every threshold in definition order.
    pub fn evaluate(&self, snapshot: &MetricsSnapshot) -> Vec<ThresholdOutcome> {
        self.thresholds
            .iter()
            .map(|t| t.evaluate(snapshot))
            .collect()
    }
}

/// True when every outcome passed.
pub fn all_passed(outcomes: &[ThresholdOutcome]) -> bool {
    outcomes.iter().all(|o| o.passed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loadtest::check::CheckName;
    use crate::loadtest::config::{THRESHOLD_P95, THRESHOLD_P99};
    use crate::loadtest::metrics::CheckCounts;
    use std::collections::BTreeMap;

    fn snapshot(total: u64, failed: u64, p95: u64, p99: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            p95,
            p99,
            total_requests: total,
            completed_requests: total,
            failed_requests: failed,
            failed_rate: if total == 0 {
                0.0
            } else {
                failed as f64 / total as f64
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_default_set_renders_k6_expressions() {
        let set = ThresholdSet::from_config(&RunConfig::default());
        let rendered: Vec<String> = set.iter().map(|t| t.to_string()).collect();
        assert_eq!(
            rendered,
            vec![
                "http_req_failed: rate<0.01",
                "http_req_duration: p(95)<500",
                "http_req_duration: p(99)<1000",
            ]
        );
    }

    #[test]
    fn test_overridden_latency_limits() {
        let config = RunConfig::from_lookup(|key| match key {
            THRESHOLD_P95 => Some("250".to_string()),
            THRESHOLD_P99 => Some("800".to_string()),
            _ => None,
        });
        let rendered: Vec<String> = ThresholdSet::from_config(&config)
            .iter()
            .map(|t| t.expression.to_string())
            .collect();
        assert_eq!(rendered, vec!["rate<0.01", "p(95)<250", "p(99)<800"]);
    }

    #[test]
    fn test_evaluate_passing_run() {
        let set = ThresholdSet::from_config(&RunConfig::default());
        let outcomes = set.evaluate(&snapshot(1000, 5, 120, 300));
        assert!(all_passed(&outcomes));
        assert_eq!(outcomes[0].observed, Some(0.005));
        assert_eq!(outcomes[1].observed, Some(120.0));
    }

    #[test]
    fn test_evaluate_failing_run() {
        let set = ThresholdSet::from_config(&RunConfig::default());
        let outcomes = set.evaluate(&snapshot(100, 2, 600, 900));
        assert!(!outcomes[0].passed, "2% failed should breach rate<0.01");
        assert!(!outcomes[1].passed, "p95 600 should breach p(95)<500");
        assert!(outcomes[2].passed);
        assert!(!all_passed(&outcomes));
    }

    #[test]
    fn test_empty_metric_passes() {
        let set = ThresholdSet::from_config(&RunConfig::default());
        let outcomes = set.evaluate(&MetricsSnapshot::default());
        assert!(all_passed(&outcomes));
        assert!(outcomes.iter().all(|o| o.observed.is_none()));
    }

    #[test]
    fn test_parse_all_operators() {
        for (text, cmp) in [
            ("p(95)<500", Comparison::Lt),
            ("p(95)<=500", Comparison::Le),
            ("avg>10", Comparison::Gt),
            ("min>=1", Comparison::Ge),
            ("max==2000", Comparison::Eq),
        ] {
            let expr: Expression = text.parse().unwrap();
            assert_eq!(expr.comparison, cmp, "{text}");
            assert_eq!(expr.to_string(), text);
        }
    }

    #[test]
    fn test_parse_rejects_malformed_expressions() {
        for text in ["p(95)", "p95<500", "rate<abc", "mean<10", "<10"] {
            assert!(
                text.parse::<Expression>().is_err(),
                "{text} should be rejected"
            );
        }
    }

    #[test]
    fn test_parse_threshold_with_metric() {
        let threshold: Threshold = "http_req_duration: p(90) < 300".parse().unwrap();
        assert_eq!(threshold.metric, Metric::HttpReqDuration);
        assert_eq!(threshold.expression.aggregation, Aggregation::Percentile(90));
        assert_eq!(threshold.to_string(), "http_req_duration: p(90)<300");
    }

    #[test]
    fn test_threshold_rejects_mismatched_aggregation() {
        let err = "http_req_failed: p(95)<500".parse::<Threshold>().unwrap_err();
        assert!(matches!(err, ThresholdError::UnsupportedAggregation { .. }));

        let err = "http_req_duration: rate<0.1".parse::<Threshold>().unwrap_err();
        assert!(matches!(err, ThresholdError::UnsupportedAggregation { .. }));

        let err = "http_req_duration: p(75)<100".parse::<Threshold>().unwrap_err();
        assert!(matches!(err, ThresholdError::UnsupportedAggregation { .. }));
    }

    #[test]
    fn test_threshold_rejects_unknown_metric() {
        let err = "vus_max: max<10".parse::<Threshold>().unwrap_err();
        assert!(matches!(err, ThresholdError::UnknownMetric { .. }));
    }

    #[test]
    fn test_checks_rate_threshold() {
        let threshold: Threshold = "checks: rate>0.9".parse().unwrap();
        let mut checks = BTreeMap::new();
        checks.insert(CheckName::StatusMatch, CheckCounts { passes: 8, fails: 2 });
        let snapshot = MetricsSnapshot {
            checks,
            ..Default::default()
        };
        let outcome = threshold.evaluate(&snapshot);
        assert_eq!(outcome.observed, Some(0.8));
        assert!(!outcome.passed);
    }

    #[test]
    fn test_push_keeps_definition_order() {
        let mut set = ThresholdSet::from_config(&RunConfig::default());
        set.push("http_req_duration: avg<200".parse().unwrap());
        assert_eq!(set.len(), 4);
        assert_eq!(
            set.iter().last().map(|t| t.to_string()),
            Some("http_req_duration: avg<200".to_string())
        );
    }
}
