//! Ramp scheduler with metrics aggregation and graceful shutdown.
//!
//! [`LoadTestEngine`] is the top-level orchestrator that:
//! - Follows [`RampProfile::target_at`] on a fixed control tick, spawning
//!   virtual users via [`tokio_util::task::TaskTracker`] and retiring them
//!   LIFO through per-VU [`CancellationToken`]s
//! - Collects samples through a bounded mpsc channel into one aggregator task
//! - Publishes [`DisplayState`] through a watch channel for the live display
//! - Slices the run into fixed buckets for the post-run breaking point analysis
//! - Retires everyone after the last stage, then hard-stops whatever is still
//!   running once the graceful ramp-down window elapses

use crate::loadtest::breaking::{
    analyze_timeline, BreakingPoint, BreakingPointAnalysis, BreakingPointDetector, TimelineBucket,
    ANALYSIS_BUCKET,
};
use crate::loadtest::client::HttpTransport;
use crate::loadtest::config::Pacing;
use crate::loadtest::display::display_loop;
use crate::loadtest::metrics::{MetricsRecorder, MetricsSnapshot, RequestSample};
use crate::loadtest::profile::RampProfile;
use crate::loadtest::request::RequestSpec;
use crate::loadtest::vu::{vu_loop, ActiveVuCounter, VuContext, VuTokens};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Interval at which the scheduler re-evaluates the target concurrency.
const CONTROL_TICK: Duration = Duration::from_millis(100);

/// Interval at which the aggregator publishes snapshots.
const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(2);

/// Compile-time Send bounds verification for channel-transported types.
fn _assert_send<T: Send>() {}
#[allow(dead_code)]
fn _check_send_bounds() {
    _assert_send::<RequestSample>();
    _assert_send::<MetricsSnapshot>();
    _assert_send::<DisplayState>();
    _assert_send::<StageStatus>();
}

/// Scheduler position shared with the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageStatus {
    /// e.g. `stage 2/4 ramp-up`.
    pub label: String,
    /// Concurrency the profile currently asks for.
    pub target_vus: u32,
}

/// State published through the watch channel to the live display.
#[derive(Debug, Clone)]
pub struct DisplayState {
    /// Cumulative metrics so far.
    pub snapshot: MetricsSnapshot,
    pub stage: StageStatus,
    /// Breaking point warning, set once when degradation is detected.
    pub breaking_point: Option<String>,
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct LoadTestResult {
    /// Final cumulative metrics.
    pub snapshot: MetricsSnapshot,
    /// Wall time from start until the last VU stopped.
    pub elapsed: Duration,
    /// VUs still running when the run returned. Always 0 unless a task leaked.
    pub final_active_vus: u32,
    /// Highest number of scheduled VUs at any point.
    pub peak_active_vus: u32,
    /// VUs that were still running when the graceful window elapsed.
    pub hard_stopped_vus: u32,
    /// True when the run was stopped early by Ctrl+C.
    pub interrupted: bool,
    /// Live detection, fired at most once while the run was going.
    pub breaking_point: Option<BreakingPoint>,
    /// Per-bucket traffic, oldest first.
    pub timeline: Vec<TimelineBucket>,
    /// Post-run analysis over [`LoadTestResult::timeline`]; `None` without traffic.
    pub analysis: Option<BreakingPointAnalysis>,
}

/// What the aggregator hands back once every sender is gone.
#[derive(Debug)]
struct AggregateOutcome {
    snapshot: MetricsSnapshot,
    breaking_point: Option<BreakingPoint>,
    timeline: Vec<TimelineBucket>,
}

/// Top-level load test engine.
///
/// All inputs are immutable and shared read-only with every virtual user.
pub struct LoadTestEngine {
    profile: Arc<RampProfile>,
    spec: Arc<RequestSpec>,
    transport: Arc<dyn HttpTransport>,
    pacing: Pacing,
    live_display: bool,
    no_color: bool,
    handle_signals: bool,
    control_tick: Duration,
    snapshot_interval: Duration,
    analysis_bucket: Duration,
}

impl LoadTestEngine {
    pub fn new(profile: RampProfile, spec: RequestSpec, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            profile: Arc::new(profile),
            spec: Arc::new(spec),
            transport,
            pacing: Pacing::default(),
            live_display: false,
            no_color: false,
            handle_signals: false,
            control_tick: CONTROL_TICK,
            snapshot_interval: SNAPSHOT_INTERVAL,
            analysis_bucket: ANALYSIS_BUCKET,
        }
    }

    /// Sets the pacing window between iterations.
    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// Enables the live terminal display.
    pub fn with_live_display(mut self, enabled: bool) -> Self {
        self.live_display = enabled;
        self
    }

    /// Disables ANSI colors in the live display.
    pub fn with_no_color(mut self, no_color: bool) -> Self {
        self.no_color = no_color;
        self
    }

    /// Installs the two-phase Ctrl+C handler for the duration of the run.
    pub fn with_signal_handling(mut self, enabled: bool) -> Self {
        self.handle_signals = enabled;
        self
    }

    /// Overrides the scheduler control tick.
    pub fn with_control_tick(mut self, tick: Duration) -> Self {
        self.control_tick = tick.max(Duration::from_millis(1));
        self
    }

    /// Overrides the aggregator publish interval.
    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Overrides the width of the post-run analysis buckets.
    pub fn with_analysis_bucket(mut self, width: Duration) -> Self {
        self.analysis_bucket = width.max(Duration::from_millis(1));
        self
    }

    pub fn profile(&self) -> &RampProfile {
        &self.profile
    }

    pub fn spec(&self) -> &RequestSpec {
        &self.spec
    }

    pub fn pacing(&self) -> Pacing {
        self.pacing
    }

    /// Run the profile to completion.
    ///
    /// Iteration-level failures are recorded as metrics and never abort the
    /// run.
    pub async fn run(&self) -> LoadTestResult {
        let run_token = CancellationToken::new();
        let hard_stop = CancellationToken::new();
        let tracker = TaskTracker::new();
        let active_vus = ActiveVuCounter::new();

        let buffer_size = (self.profile.peak_target().max(1) as usize) * 100;
        let (sample_tx, sample_rx) = mpsc::channel::<RequestSample>(buffer_size);

        let initial_stage = StageStatus {
            label: self.profile.stage_label(0),
            target_vus: self.profile.target_at(Duration::ZERO),
        };
        let (stage_tx, stage_rx) = watch::channel(initial_stage.clone());
        let (display_tx, display_rx) = watch::channel(DisplayState {
            snapshot: MetricsSnapshot::default(),
            stage: initial_stage,
            breaking_point: None,
        });

        let test_start = Instant::now();

        // Aggregator is NOT on the tracker: it must outlive every VU
        let aggregator_handle = tokio::spawn(metrics_aggregator(
            sample_rx,
            display_tx,
            stage_rx,
            active_vus.clone(),
            self.snapshot_interval,
            self.analysis_bucket,
            test_start,
        ));

        let display_stop = CancellationToken::new();
        let display_handle = self.live_display.then(|| {
            tokio::spawn(display_loop(
                display_rx.clone(),
                active_vus.clone(),
                display_stop.clone(),
                test_start,
                self.no_color,
            ))
        });

        let signal_handle = self
            .handle_signals
            .then(|| tokio::spawn(handle_ctrl_c(run_token.clone())));

        let ctx = VuContext {
            spec: self.spec.clone(),
            transport: self.transport.clone(),
            pacing: self.pacing,
            sample_tx,
        };
        let mut pool = VuPool::new(run_token.clone(), hard_stop.clone());

        self.schedule(&mut pool, &tracker, &ctx, &active_vus, &stage_tx, test_start)
            .await;
        let interrupted = run_token.is_cancelled();

        // Retire everyone; in-flight iterations finish inside the graceful window
        let _ = stage_tx.send(StageStatus {
            label: self.profile.stage_label(self.profile.stages.len()),
            target_vus: 0,
        });
        pool.retire_all();
        run_token.cancel();
        drop(ctx);
        tracker.close();

        let mut hard_stopped_vus = 0;
        if tokio::time::timeout(self.profile.graceful_ramp_down, tracker.wait())
            .await
            .is_err()
        {
            hard_stopped_vus = active_vus.get();
            // A zero window (smoke) stops immediately by definition
            if self.profile.graceful_ramp_down.is_zero() {
                tracing::debug!(remaining = hard_stopped_vus, "Stopping remaining VUs");
            } else {
                tracing::warn!(
                    remaining = hard_stopped_vus,
                    window = ?self.profile.graceful_ramp_down,
                    "Graceful ramp-down window elapsed, stopping remaining VUs"
                );
            }
            hard_stop.cancel();
            tracker.wait().await;
        }
        let elapsed = test_start.elapsed();

        let outcome = match aggregator_handle.await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(error = %err, "Metrics aggregator task failed");
                AggregateOutcome {
                    snapshot: display_rx.borrow().snapshot.clone(),
                    breaking_point: None,
                    timeline: Vec::new(),
                }
            }
        };
        let analysis = analyze_timeline(&outcome.timeline, outcome.snapshot.p95);

        display_stop.cancel();
        if let Some(handle) = display_handle {
            let _ = handle.await;
        }
        if let Some(handle) = signal_handle {
            handle.abort();
        }

        LoadTestResult {
            snapshot: outcome.snapshot,
            elapsed,
            final_active_vus: active_vus.get(),
            peak_active_vus: pool.peak(),
            hard_stopped_vus,
            interrupted,
            breaking_point: outcome.breaking_point,
            timeline: outcome.timeline,
            analysis,
        }
    }

    /// Follow the profile until its last stage ends or the run token is cancelled.
    async fn schedule(
        &self,
        pool: &mut VuPool,
        tracker: &TaskTracker,
        ctx: &VuContext,
        active_vus: &ActiveVuCounter,
        stage_tx: &watch::Sender<StageStatus>,
        test_start: Instant,
    ) {
        let total = self.profile.total_duration();
        let mut current_stage: Option<usize> = None;
        let mut tick = tokio::time::interval(self.control_tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = pool.run_token.cancelled() => return,
                _ = tick.tick() => {}
            }

            let elapsed = test_start.elapsed();
            if elapsed >= total {
                return;
            }

            let target = self.profile.target_at(elapsed);
            let stage_index = self.profile.stage_index_at(elapsed);
            if stage_index != current_stage {
                current_stage = stage_index;
                let label = self.profile.stage_label(stage_index.unwrap_or(usize::MAX));
                tracing::info!(stage = %label, target, "Entering stage");
            }
            stage_tx.send_if_modified(|status| {
                let label = self.profile.stage_label(current_stage.unwrap_or(usize::MAX));
                let changed = status.target_vus != target || status.label != label;
                status.target_vus = target;
                status.label = label;
                changed
            });

            pool.resize(target, |vu_id, tokens| {
                tracker.spawn(vu_loop(vu_id, ctx.clone(), tokens, active_vus.clone()));
            });
        }
    }
}

/// Scheduled virtual users, newest last.
///
/// Holds one retire token per scheduled VU. Growing spawns new VUs; shrinking
/// cancels the most recently spawned tokens first (LIFO).
pub struct VuPool {
    run_token: CancellationToken,
    hard_stop: CancellationToken,
    retire_tokens: Vec<CancellationToken>,
    next_vu_id: u32,
    peak: u32,
}

impl VuPool {
    pub fn new(run_token: CancellationToken, hard_stop: CancellationToken) -> Self {
        Self {
            run_token,
            hard_stop,
            retire_tokens: Vec::new(),
            next_vu_id: 0,
            peak: 0,
        }
    }

    /// Number of scheduled (not retired) VUs.
    pub fn len(&self) -> u32 {
        self.retire_tokens.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.retire_tokens.is_empty()
    }

    /// Highest [`VuPool::len`] ever reached.
    pub fn peak(&self) -> u32 {
        self.peak
    }

    /// Grow or shrink to `target`, calling `spawn` for each new VU.
    pub fn resize(&mut self, target: u32, mut spawn: impl FnMut(u32, VuTokens)) {
        let current = self.len();
        if target > current {
            for _ in current..target {
                let retire = self.run_token.child_token();
                self.retire_tokens.push(retire.clone());
                spawn(
                    self.next_vu_id,
                    VuTokens {
                        retire,
                        hard_stop: self.hard_stop.clone(),
                    },
                );
                self.next_vu_id += 1;
            }
            self.peak = self.peak.max(target);
        } else {
            for _ in target..current {
                if let Some(token) = self.retire_tokens.pop() {
                    token.cancel();
                }
            }
        }
    }

    /// Retire every scheduled VU.
    pub fn retire_all(&mut self) {
        self.resize(0, |_, _| {});
    }
}

/// Metrics aggregator task.
///
/// Consumes [`RequestSample`]s, keeps a cumulative recorder for the final
/// result, a per-interval recorder for live breaking point detection and a
/// per-bucket recorder for the timeline, and publishes a [`DisplayState`]
/// every `snapshot_interval`.
///
/// Uses `biased;` select so the tick is checked first, preventing display
/// starvation when the channel is busy. Returns once every sender is gone.
async fn metrics_aggregator(
    mut sample_rx: mpsc::Receiver<RequestSample>,
    display_tx: watch::Sender<DisplayState>,
    stage_rx: watch::Receiver<StageStatus>,
    active_vus: ActiveVuCounter,
    snapshot_interval: Duration,
    bucket_width: Duration,
    test_start: Instant,
) -> AggregateOutcome {
    let mut cumulative = MetricsRecorder::new();
    let mut interval = MetricsRecorder::new();
    let mut bucket = BucketRecorder::new(test_start);
    let mut timeline = Vec::new();
    let mut detector = BreakingPointDetector::with_default_window();
    let mut bp_warning: Option<String> = None;
    let mut tick = tokio::time::interval(snapshot_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut bucket_tick =
        tokio::time::interval_at(test_start + bucket_width, bucket_width);
    bucket_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = tick.tick() => {
                while let Ok(sample) = sample_rx.try_recv() {
                    cumulative.record(&sample);
                    interval.record(&sample);
                    bucket.record(&sample, active_vus.get());
                }
                let interval_snapshot = std::mem::take(&mut interval).snapshot();
                if let Some(bp) = detector.observe(
                    &interval_snapshot,
                    active_vus.get(),
                    test_start.elapsed(),
                ) {
                    bp_warning = Some(format!(
                        "Breaking point detected at {} VUs ({}: {})",
                        bp.vus, bp.reason, bp.detail
                    ));
                }
                let _ = display_tx.send(DisplayState {
                    snapshot: cumulative.snapshot(),
                    stage: stage_rx.borrow().clone(),
                    breaking_point: bp_warning.clone(),
                });
            }
            _ = bucket_tick.tick() => {
                timeline.push(bucket.close(Instant::now(), active_vus.get()));
            }
            result = sample_rx.recv() => {
                match result {
                    Some(sample) => {
                        cumulative.record(&sample);
                        interval.record(&sample);
                        bucket.record(&sample, active_vus.get());
                    }
                    None => break,
                }
            }
        }
    }

    let now = Instant::now();
    if bucket.has_traffic() || now > bucket.start {
        timeline.push(bucket.close(now, active_vus.get()));
    }

    let snapshot = cumulative.snapshot();
    let _ = display_tx.send(DisplayState {
        snapshot: snapshot.clone(),
        stage: stage_rx.borrow().clone(),
        breaking_point: bp_warning,
    });
    AggregateOutcome {
        snapshot,
        breaking_point: detector.breaking_point().cloned(),
        timeline,
    }
}

/// Samples of the timeline bucket currently being filled.
struct BucketRecorder {
    test_start: Instant,
    start: Instant,
    recorder: MetricsRecorder,
    peak_vus: u32,
}

impl BucketRecorder {
    fn new(test_start: Instant) -> Self {
        Self {
            test_start,
            start: test_start,
            recorder: MetricsRecorder::new(),
            peak_vus: 0,
        }
    }

    fn record(&mut self, sample: &RequestSample, active_vus: u32) {
        self.recorder.record(sample);
        self.peak_vus = self.peak_vus.max(active_vus);
    }

    fn has_traffic(&self) -> bool {
        self.recorder.total_requests() > 0
    }

    /// Finish the bucket at `now` and start the next one there.
    fn close(&mut self, now: Instant, active_vus: u32) -> TimelineBucket {
        let snapshot = std::mem::take(&mut self.recorder).snapshot();
        let bucket = TimelineBucket::from_snapshot(
            self.start.duration_since(self.test_start),
            now.duration_since(self.start),
            &snapshot,
            self.peak_vus.max(active_vus),
        );
        self.start = now;
        self.peak_vus = active_vus;
        bucket
    }
}

/// Ctrl+C handler with two-phase shutdown.
///
/// First Ctrl+C stops scheduling and drains gracefully via the run token.
/// Second Ctrl+C aborts the process.
async fn handle_ctrl_c(run_token: CancellationToken) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "Failed to install Ctrl+C handler");
        return;
    }
    eprintln!("\nReceived Ctrl+C, stopping gracefully...");
    run_token.cancel();

    if tokio::signal::ctrl_c().await.is_ok() {
        eprintln!("\nReceived second Ctrl+C, aborting immediately.");
        std::process::exit(1);
    }
}
