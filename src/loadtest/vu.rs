//! Virtual user (VU) task loop.
//!
//! Each VU repeatedly sends the shared [`RequestSpec`], checks the response
//! and sleeps a pacing delay. The loop is an explicit [`VuState`] machine:
//!
//! ```text
//! Idle -> BuildRequest -> Executing -> Checking -> Pacing -> Idle
//!                             |                      |
//!                             +--(transport error)---+
//! Idle | Pacing -> Retired           (retire token cancelled)
//! Executing  -> Retired              (hard-stop token cancelled)
//! ```
//!
//! Retirement never interrupts an in-flight request: the retire token is only
//! observed while idle or pacing. Only the engine's hard-stop token, cancelled
//! after the graceful ramp-down window, abandons a request mid-flight.

use crate::loadtest::check;
use crate::loadtest::client::{HttpResponse, HttpTransport};
use crate::loadtest::config::Pacing;
use crate::loadtest::error::TransportError;
use crate::loadtest::metrics::RequestSample;
use crate::loadtest::request::RequestSpec;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Atomic counter tracking the number of currently active virtual users.
///
/// Lightweight wrapper around `Arc<AtomicU32>` for clone-friendly sharing
/// across VU tasks and the engine orchestrator.
#[derive(Clone, Debug)]
pub struct ActiveVuCounter(Arc<AtomicU32>);

impl ActiveVuCounter {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU32::new(0)))
    }

    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement(&self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for ActiveVuCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle state of a single virtual user.
#[derive(Debug)]
pub enum VuState {
    Idle,
    BuildRequest,
    Executing,
    Checking(HttpResponse),
    Pacing,
    Retired,
}

/// Everything a VU shares with its siblings. Cheap to clone.
#[derive(Clone)]
pub struct VuContext {
    pub spec: Arc<RequestSpec>,
    pub transport: Arc<dyn HttpTransport>,
    pub pacing: Pacing,
    pub sample_tx: mpsc::Sender<RequestSample>,
}

/// Per-VU cancellation handles.
#[derive(Clone, Debug)]
pub struct VuTokens {
    /// Cancelled to retire this VU after its current iteration.
    pub retire: CancellationToken,
    /// Cancelled to abandon any in-flight request immediately.
    pub hard_stop: CancellationToken,
}

/// Main virtual user task.
///
/// The `active_vus` counter is incremented on entry and decremented when the
/// VU reaches [`VuState::Retired`].
pub async fn vu_loop(vu_id: u32, ctx: VuContext, tokens: VuTokens, active_vus: ActiveVuCounter) {
    active_vus.increment();
    tracing::debug!(vu_id, "VU started");

    let mut iterations: u64 = 0;
    let mut state = VuState::Idle;
    loop {
        state = match state {
            VuState::Idle => {
                if tokens.retire.is_cancelled() || tokens.hard_stop.is_cancelled() {
                    VuState::Retired
                } else {
                    VuState::BuildRequest
                }
            }
            // The request spec is immutable and shared; building is a no-op handoff.
            VuState::BuildRequest => VuState::Executing,
            VuState::Executing => {
                tokio::select! {
                    biased;

                    _ = tokens.hard_stop.cancelled() => VuState::Retired,
                    result = execute(&ctx) => {
                        iterations += 1;
                        match result {
                            Ok(response) => VuState::Checking(response),
                            Err(sample) => {
                                if ctx.sample_tx.send(sample).await.is_err() {
                                    VuState::Retired
                                } else {
                                    VuState::Pacing
                                }
                            }
                        }
                    }
                }
            }
            VuState::Checking(response) => {
                let checks = check::evaluate(&ctx.spec, &response);
                let sample = RequestSample::completed(&response, checks);
                if ctx.sample_tx.send(sample).await.is_err() {
                    // Receiver dropped: the aggregator is gone
                    VuState::Retired
                } else {
                    VuState::Pacing
                }
            }
            VuState::Pacing => {
                let delay = ctx.pacing.next_delay();
                tokio::select! {
                    _ = tokio::time::sleep(delay) => VuState::Idle,
                    _ = tokens.retire.cancelled() => VuState::Retired,
                    _ = tokens.hard_stop.cancelled() => VuState::Retired,
                }
            }
            VuState::Retired => break,
        };
    }

    tracing::debug!(vu_id, iterations, "VU retired");
    active_vus.decrement();
}

/// Send the request bounded by the spec timeout.
///
/// A transport failure is logged and returned as a ready-to-send sample.
async fn execute(ctx: &VuContext) -> Result<HttpResponse, RequestSample> {
    let start = Instant::now();
    let result = match tokio::time::timeout(ctx.spec.timeout, ctx.transport.send(&ctx.spec)).await
    {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout),
    };

    result.map_err(|err| {
        tracing::warn!(
            method = %ctx.spec.method,
            url = %ctx.spec.url,
            category = err.error_category(),
            "Request failed: {err}"
        );
        RequestSample::failed(start.elapsed(), err)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loadtest::request::HttpMethod;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicU64;
    use std::time::Duration;

    /// Replies with a fixed status after a fixed delay, or fails every call.
    struct MockTransport {
        status: u16,
        delay: Duration,
        fail: Option<TransportError>,
        calls: AtomicU64,
    }

    impl MockTransport {
        fn ok(status: u16, delay: Duration) -> Self {
            Self {
                status,
                delay,
                fail: None,
                calls: AtomicU64::new(0),
            }
        }

        fn failing(err: TransportError) -> Self {
            Self {
                status: 0,
                delay: Duration::from_millis(5),
                fail: Some(err),
                calls: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl HttpTransport for MockTransport {
        async fn send(&self, _spec: &RequestSpec) -> Result<HttpResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep(self.delay).await;
            if let Some(err) = &self.fail {
                return Err(err.clone());
            }
            Ok(HttpResponse {
                status: self.status,
                headers: Vec::new(),
                body: b"body".to_vec(),
                duration: self.delay,
            })
        }
    }

    fn spec() -> Arc<RequestSpec> {
        Arc::new(RequestSpec {
            method: HttpMethod::Get,
            url: "http://localhost/health".to_string(),
            headers: BTreeMap::new(),
            body: None,
            timeout: Duration::from_secs(5),
            expected_status: 200,
        })
    }

    fn context(
        transport: Arc<dyn HttpTransport>,
        pacing: Pacing,
    ) -> (VuContext, mpsc::Receiver<RequestSample>) {
        let (sample_tx, sample_rx) = mpsc::channel(1024);
        (
            VuContext {
                spec: spec(),
                transport,
                pacing,
                sample_tx,
            },
            sample_rx,
        )
    }

    fn tokens() -> VuTokens {
        VuTokens {
            retire: CancellationToken::new(),
            hard_stop: CancellationToken::new(),
        }
    }

    fn drain(rx: &mut mpsc::Receiver<RequestSample>) -> Vec<RequestSample> {
        let mut out = Vec::new();
        while let Ok(sample) = rx.try_recv() {
            out.push(sample);
        }
        out
    }

    #[test]
    fn test_active_vu_counter_increment_decrement() {
        let counter = ActiveVuCounter::new();
        counter.increment();
        counter.increment();
        counter.increment();
        assert_eq!(counter.get(), 3);
        counter.decrement();
        assert_eq!(counter.get(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_vu_records_checked_samples_until_retired() {
        let transport = Arc::new(MockTransport::ok(200, Duration::from_millis(100)));
        let pacing = Pacing::new(Duration::from_secs(1), Duration::from_secs(1));
        let (ctx, mut rx) = context(transport.clone(), pacing);
        let tokens = tokens();
        let active = ActiveVuCounter::new();

        let handle = tokio::spawn(vu_loop(0, ctx, tokens.clone(), active.clone()));

        // Each iteration takes 100ms + 1s pacing; 3 complete inside 3.2s.
        tokio::time::sleep(Duration::from_millis(3200)).await;
        assert_eq!(active.get(), 1);
        tokens.retire.cancel();
        handle.await.unwrap();

        assert_eq!(active.get(), 0);
        let samples = drain(&mut rx);
        assert_eq!(samples.len(), 3);
        assert!(samples.iter().all(|s| s.outcome == Ok(200)));
        assert!(samples
            .iter()
            .all(|s| s.checks.as_ref().is_some_and(|c| c.passed)));
        assert_eq!(transport.calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retirement_waits_for_in_flight_request() {
        let transport = Arc::new(MockTransport::ok(200, Duration::from_secs(2)));
        let (ctx, mut rx) = context(transport, Pacing::default());
        let tokens = tokens();
        let active = ActiveVuCounter::new();

        let handle = tokio::spawn(vu_loop(0, ctx, tokens.clone(), active.clone()));
        tokio::time::sleep(Duration::from_millis(500)).await;
        tokens.retire.cancel();
        handle.await.unwrap();

        let samples = drain(&mut rx);
        assert_eq!(samples.len(), 1, "in-flight iteration must complete");
        assert_eq!(samples[0].outcome, Ok(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_stop_abandons_in_flight_request() {
        let transport = Arc::new(MockTransport::ok(200, Duration::from_secs(4)));
        let (ctx, mut rx) = context(transport, Pacing::default());
        let tokens = tokens();
        let active = ActiveVuCounter::new();

        let handle = tokio::spawn(vu_loop(0, ctx, tokens.clone(), active.clone()));
        tokio::time::sleep(Duration::from_millis(500)).await;
        tokens.hard_stop.cancel();
        handle.await.unwrap();

        assert!(drain(&mut rx).is_empty());
        assert_eq!(active.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_sends_failed_sample_without_checks() {
        let transport = Arc::new(MockTransport::failing(TransportError::Connection {
            message: "refused".to_string(),
        }));
        let pacing = Pacing::new(Duration::from_secs(1), Duration::from_secs(1));
        let (ctx, mut rx) = context(transport, pacing);
        let tokens = tokens();

        let handle = tokio::spawn(vu_loop(0, ctx, tokens.clone(), ActiveVuCounter::new()));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        tokens.retire.cancel();
        handle.await.unwrap();

        let samples = drain(&mut rx);
        assert_eq!(samples.len(), 2);
        for sample in samples {
            assert!(sample.checks.is_none());
            assert_eq!(
                sample.outcome.unwrap_err().error_category(),
                "connection"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_transport_is_bounded_by_spec_timeout() {
        let transport = Arc::new(MockTransport::ok(200, Duration::from_secs(30)));
        let (ctx, mut rx) = context(transport, Pacing::default());
        let tokens = tokens();

        let handle = tokio::spawn(vu_loop(0, ctx, tokens.clone(), ActiveVuCounter::new()));
        tokio::time::sleep(Duration::from_millis(5500)).await;
        tokens.retire.cancel();
        handle.await.unwrap();

        let samples = drain(&mut rx);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].outcome, Err(TransportError::Timeout));
        assert!(samples[0].duration >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_already_retired_vu_sends_nothing() {
        let transport = Arc::new(MockTransport::ok(200, Duration::ZERO));
        let (ctx, mut rx) = context(transport.clone(), Pacing::none());
        let tokens = tokens();
        tokens.retire.cancel();

        vu_loop(0, ctx, tokens, ActiveVuCounter::new()).await;

        assert!(drain(&mut rx).is_empty());
        assert_eq!(transport.calls.load(Ordering::Relaxed), 0);
    }
}
