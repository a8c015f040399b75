//! k6-style live terminal display for run progress.
//!
//! Renders one in-place updating line showing the scheduler stage, active
//! VU count, requests per second, P95 latency, failed request count/rate and
//! elapsed time. Updates from a watch channel on each aggregator publish,
//! not per request.

use crate::loadtest::config::format_duration;
use crate::loadtest::engine::DisplayState;
use crate::loadtest::metrics::MetricsSnapshot;
use crate::loadtest::vu::ActiveVuCounter;

use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::io::IsTerminal;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// P95 above this is highlighted.
const SLOW_P95_MS: u64 = 1000;

/// Single-line spinner display on stderr.
pub struct LiveDisplay {
    _multi: MultiProgress,
    status_bar: ProgressBar,
    colors: bool,
}

impl LiveDisplay {
    /// Create a new live display.
    ///
    /// Color output is disabled when `no_color` is set or stderr is not a
    /// terminal.
    pub fn new(no_color: bool) -> Self {
        let colors = !no_color && std::io::stderr().is_terminal();
        if !colors {
            colored::control::set_override(false);
        }

        let multi = MultiProgress::new();
        let status_bar = multi.add(ProgressBar::new_spinner());
        let style = ProgressStyle::with_template("{spinner:.cyan} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
        status_bar.set_style(style);
        status_bar.enable_steady_tick(Duration::from_millis(100));

        Self {
            _multi: multi,
            status_bar,
            colors,
        }
    }

    /// Whether this display emits ANSI colors.
    pub fn colors_enabled(&self) -> bool {
        self.colors
    }

    /// Format a single line of live status from a snapshot.
    ///
    /// Color coding: red for failed requests, yellow for P95 above 1s,
    /// green otherwise.
    pub fn format_status(
        snap: &MetricsSnapshot,
        elapsed: Duration,
        active_vus: u32,
        target_vus: u32,
        stage_label: Option<&str>,
    ) -> String {
        let vu_str = format!("{active_vus}/{target_vus}");
        let rps_str = format!("{:.1}", snap.requests_per_second(elapsed));
        let p95_str = format!("{}ms", snap.p95);
        let failed_str = snap.failed_requests.to_string();
        let rate_str = format!("{:.1}%", snap.failed_rate * 100.0);

        let p95_display = if snap.p95 > SLOW_P95_MS {
            p95_str.yellow().to_string()
        } else {
            p95_str.green().to_string()
        };
        let failed_display = if snap.failed_requests > 0 {
            format!("{} ({})", failed_str.red(), rate_str.red())
        } else {
            format!("{failed_str} ({rate_str})")
        };

        let metrics_line = format!(
            "vus: {}  |  rps: {}  |  p95: {}  |  failed: {}  |  elapsed: {}",
            vu_str.green(),
            rps_str.green(),
            p95_display,
            failed_display,
            format_duration(Duration::from_secs(elapsed.as_secs())),
        );

        match stage_label {
            Some(label) => format!("  [{label}]  {metrics_line}"),
            None => format!("  {metrics_line}"),
        }
    }

    /// Update the display with the latest state.
    pub fn update(&self, state: &DisplayState, elapsed: Duration, active_vus: u32) {
        let msg = Self::format_status(
            &state.snapshot,
            elapsed,
            active_vus,
            state.stage.target_vus,
            Some(&state.stage.label),
        );
        self.status_bar.set_message(msg);
    }

    /// Stop the display and clear the spinner.
    pub fn finish(&self) {
        self.status_bar.finish_and_clear();
    }
}

impl Default for LiveDisplay {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Run the live display loop.
///
/// Stops when `cancel` fires or the watch sender is dropped. A breaking point
/// warning is printed to stderr once.
pub async fn display_loop(
    mut display_rx: watch::Receiver<DisplayState>,
    active_vus: ActiveVuCounter,
    cancel: CancellationToken,
    test_start: Instant,
    no_color: bool,
) {
    let display = LiveDisplay::new(no_color);
    let mut bp_shown = false;

    eprintln!();
    eprintln!("  Running load test...");
    eprintln!();

    loop {
        tokio::select! {
            result = display_rx.changed() => {
                if result.is_err() {
                    break;
                }
                let state = display_rx.borrow_and_update().clone();
                display.update(&state, test_start.elapsed(), active_vus.get());
                if !bp_shown {
                    if let Some(warning) = &state.breaking_point {
                        display.status_bar.suspend(|| {
                            eprintln!("  {} {}", "WARNING:".yellow().bold(), warning);
                        });
                        bp_shown = true;
                    }
                }
            }
            _ = cancel.cancelled() => {
                let state = display_rx.borrow().clone();
                display.update(&state, test_start.elapsed(), active_vus.get());
                break;
            }
        }
    }

    display.finish();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_status_zero_state() {
        let snap = MetricsSnapshot::default();
        let status = LiveDisplay::format_status(&snap, Duration::ZERO, 0, 10, None);

        assert!(status.contains("0/10"), "Should contain VU count 0/10, got: {status}");
        assert!(status.contains("rps: "), "got: {status}");
        assert!(status.contains("0.0"), "Should contain rps 0.0, got: {status}");
        assert!(status.contains("failed:"), "got: {status}");
        assert!(status.contains("elapsed: 0s"), "got: {status}");
    }

    #[test]
    fn test_format_status_with_failures() {
        let snap = MetricsSnapshot {
            p95: 42,
            total_requests: 50,
            failed_requests: 5,
            failed_rate: 0.1,
            ..Default::default()
        };
        let status = LiveDisplay::format_status(&snap, Duration::from_secs(25), 10, 10, None);

        assert!(status.contains("42ms"), "Should contain p95=42ms, got: {status}");
        assert!(status.contains("10.0%"), "Should contain failed rate, got: {status}");
        assert!(status.contains("2.0"), "50 requests over 25s is 2.0 rps, got: {status}");
    }

    #[test]
    fn test_format_status_high_p95() {
        let snap = MetricsSnapshot {
            p95: 1500,
            ..Default::default()
        };
        let status = LiveDisplay::format_status(&snap, Duration::from_secs(90), 5, 10, None);
        assert!(status.contains("1500ms"), "got: {status}");
        assert!(status.contains("1m30s"), "got: {status}");
    }

    #[test]
    fn test_format_status_with_stage_label() {
        let snap = MetricsSnapshot::default();
        let status = LiveDisplay::format_status(
            &snap,
            Duration::from_secs(10),
            5,
            10,
            Some("stage 2/3 ramp-up"),
        );
        assert!(status.contains("[stage 2/3 ramp-up]"), "got: {status}");
        assert!(status.contains("vus:"), "got: {status}");
    }

    #[test]
    fn test_format_status_without_stage_label() {
        let snap = MetricsSnapshot::default();
        let status = LiveDisplay::format_status(&snap, Duration::from_secs(10), 5, 10, None);
        assert!(!status.contains('['), "got: {status}");
    }

    #[test]
    fn test_live_display_new_does_not_panic() {
        let display = LiveDisplay::new(false);
        display.finish();
    }

    #[test]
    fn test_no_color_disables_live_colors() {
        let display = LiveDisplay::new(true);
        assert!(!display.colors_enabled());
        assert!(!colored::control::SHOULD_COLORIZE.should_colorize());
        display.finish();
    }
}
