//! Property-based tests for metrics, thresholds and breaking point invariants.

use proptest::prelude::*;
use std::collections::BTreeMap;
use std::time::Duration;

use rampload::loadtest::breaking::BreakingPointDetector;
use rampload::loadtest::check::{self, CheckName};
use rampload::loadtest::client::HttpResponse;
use rampload::loadtest::error::TransportError;
use rampload::loadtest::metrics::{MetricsRecorder, MetricsSnapshot, RequestSample};
use rampload::loadtest::request::{HttpMethod, RequestSpec};
use rampload::loadtest::threshold::{Expression, Threshold};

fn spec() -> RequestSpec {
    RequestSpec {
        method: HttpMethod::Get,
        url: "http://localhost:8080/health".to_string(),
        headers: BTreeMap::new(),
        body: None,
        timeout: Duration::from_secs(5),
        expected_status: 200,
    }
}

fn completed(status: u16, latency_ms: u64) -> RequestSample {
    let response = HttpResponse {
        status,
        headers: Vec::new(),
        body: b"ok".to_vec(),
        duration: Duration::from_millis(latency_ms),
    };
    let checks = check::evaluate(&spec(), &response);
    RequestSample::completed(&response, checks)
}

fn arb_transport_error() -> impl Strategy<Value = TransportError> {
    prop_oneof![
        Just(TransportError::Timeout),
        "[a-z ]{0,20}".prop_map(|message| TransportError::Connection { message }),
        "[a-z ]{0,20}".prop_map(|message| TransportError::Other { message }),
    ]
}

/// One iteration outcome: a response (status, latency) or a transport failure.
fn arb_sample() -> impl Strategy<Value = RequestSample> {
    prop_oneof![
        3 => (100u16..=599, 0u64..5_000).prop_map(|(status, ms)| completed(status, ms)),
        1 => (arb_transport_error(), 0u64..5_000)
            .prop_map(|(err, ms)| RequestSample::failed(Duration::from_millis(ms), err)),
    ]
}

proptest! {
    /// Totals add up: every sample is an iteration, every request either
    /// completed or failed at the transport level.
    #[test]
    fn prop_counts_are_consistent(samples in prop::collection::vec(arb_sample(), 0..300)) {
        let mut recorder = MetricsRecorder::new();
        for sample in &samples {
            recorder.record(sample);
        }
        let snap = recorder.snapshot();

        prop_assert_eq!(snap.iterations, samples.len() as u64);
        prop_assert_eq!(snap.total_requests, samples.len() as u64);
        prop_assert_eq!(snap.completed_requests + snap.transport_failures, snap.total_requests);
        prop_assert_eq!(snap.status_counts.values().sum::<u64>(), snap.completed_requests);
        prop_assert_eq!(snap.error_category_counts.values().sum::<u64>(), snap.failed_requests);
        prop_assert!(snap.failed_requests >= snap.transport_failures);
        prop_assert!(snap.iterations_passed <= snap.completed_requests);
    }

    /// Rates stay in [0, 1].
    #[test]
    fn prop_rates_bounded(samples in prop::collection::vec(arb_sample(), 0..300)) {
        let mut recorder = MetricsRecorder::new();
        for sample in &samples {
            recorder.record(sample);
        }
        let snap = recorder.snapshot();
        prop_assert!((0.0..=1.0).contains(&snap.failed_rate));
        prop_assert!((0.0..=1.0).contains(&snap.checks_rate()));
        for counts in snap.checks.values() {
            prop_assert!((0.0..=1.0).contains(&counts.pass_rate()));
        }
    }

    /// Checks are only recorded for completed requests, one per predicate.
    #[test]
    fn prop_checks_only_for_completed(samples in prop::collection::vec(arb_sample(), 1..200)) {
        let mut recorder = MetricsRecorder::new();
        for sample in &samples {
            recorder.record(sample);
        }
        let snap = recorder.snapshot();
        for name in CheckName::ALL {
            let total = snap.checks.get(&name).map_or(0, |c| c.total());
            prop_assert_eq!(total, snap.completed_requests);
        }
    }

    /// min <= p50 <= p90 <= p95 <= p99 <= max.
    #[test]
    fn prop_percentiles_monotonic(latencies in prop::collection::vec(0u64..10_000, 1..200)) {
        let mut recorder = MetricsRecorder::new();
        for ms in &latencies {
            recorder.record(&completed(200, *ms));
        }
        let snap = recorder.snapshot();
        prop_assert!(snap.min <= snap.p50);
        prop_assert!(snap.p50 <= snap.p90);
        prop_assert!(snap.p90 <= snap.p95);
        prop_assert!(snap.p95 <= snap.p99);
        prop_assert!(snap.p99 <= snap.max);
    }

    /// A p(95) threshold agrees with the snapshot value it observes.
    #[test]
    fn prop_percentile_threshold_matches_snapshot(
        latencies in prop::collection::vec(0u64..3_000, 1..100),
        limit in 1u64..3_000,
    ) {
        let mut recorder = MetricsRecorder::new();
        for ms in &latencies {
            recorder.record(&completed(200, *ms));
        }
        let snap = recorder.snapshot();
        let threshold: Threshold = format!("http_req_duration:p(95)<{limit}").parse().unwrap();
        let outcome = threshold.evaluate(&snap);
        prop_assert_eq!(outcome.observed, Some(snap.p95 as f64));
        prop_assert_eq!(outcome.passed, snap.p95 < limit);
    }

    /// Thresholds over an empty recorder always pass.
    #[test]
    fn prop_empty_metrics_pass_every_threshold(
        raw in prop_oneof![
            Just("http_req_failed:rate<0.01"),
            Just("http_req_duration:p(99)<1"),
            Just("http_req_duration:avg<1"),
            Just("checks:rate>0.99"),
        ],
    ) {
        let threshold: Threshold = raw.parse().unwrap();
        let outcome = threshold.evaluate(&MetricsSnapshot::default());
        prop_assert!(outcome.passed);
        prop_assert_eq!(outcome.observed, None);
    }

    /// Expressions render back to text that parses to the same expression.
    #[test]
    fn prop_expression_display_parses_back(
        aggregation in prop_oneof![
            Just("rate"), Just("p(90)"), Just("p(99)"), Just("avg"), Just("med"), Just("max")
        ],
        op in prop_oneof![Just("<"), Just("<="), Just(">"), Just(">="), Just("==")],
        limit in 0u32..100_000,
    ) {
        let expr: Expression = format!("{aggregation}{op}{limit}").parse().unwrap();
        let reparsed: Expression = expr.to_string().parse().unwrap();
        prop_assert_eq!(expr, reparsed);
    }

    /// Steady intervals never trigger breaking point detection.
    #[test]
    fn prop_breaking_point_never_fires_on_steady_metrics(
        error_rate in 0.0f64..0.5,
        p95 in 1u64..5_000,
        intervals in 10usize..50,
    ) {
        let mut detector = BreakingPointDetector::with_default_window();
        let interval = MetricsSnapshot {
            total_requests: 100,
            failed_rate: error_rate,
            p95,
            ..Default::default()
        };
        for i in 0..intervals {
            let fired = detector.observe(&interval, 10, Duration::from_secs(2 * i as u64));
            prop_assert!(fired.is_none());
        }
    }

    /// Detection fires at most once however bad things get.
    #[test]
    fn prop_breaking_point_fires_at_most_once(
        rates in prop::collection::vec(0.0f64..1.0, 1..80),
        p95s in prop::collection::vec(1u64..10_000, 80),
    ) {
        let mut detector = BreakingPointDetector::new(6);
        let mut fired = 0;
        for (i, rate) in rates.iter().enumerate() {
            let interval = MetricsSnapshot {
                total_requests: 50,
                failed_rate: *rate,
                p95: p95s[i],
                ..Default::default()
            };
            if detector.observe(&interval, i as u32, Duration::from_secs(i as u64)).is_some() {
                fired += 1;
            }
        }
        prop_assert!(fired <= 1);
        prop_assert_eq!(fired == 1, detector.detected());
    }
}
