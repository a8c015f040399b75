//! Ramp profiles: named test types translated into staged concurrency plans.
//!
//! [`RampProfile::build`] is a pure function from a test type, an optional
//! target override and an optional hold-duration override to an ordered list
//! of [`Stage`]s. The scheduler in [`crate::loadtest::engine`] is test-type
//! agnostic and only ever consults [`RampProfile::target_at`].
//!
//! | Type | Stages | Graceful ramp-down |
//! |---|---|---|
//! | `load` | 30s to 20% target, 1m to target, hold, 30s to 0 | 30s |
//! | `stress` | 30s to 50% target, 1m to target, hold, 1m to 0 | 1m |
//! | `spike` | 10s at 0, 10s to target, hold, 10s to 0 | 1m |
//! | `smoke` | constant 1 VU for hold (10s default) | none |

use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Default hold duration for every ramping profile.
pub const DEFAULT_HOLD: Duration = Duration::from_secs(60);

/// Default hold duration for the smoke profile.
pub const DEFAULT_SMOKE_HOLD: Duration = Duration::from_secs(10);

/// Named test type selecting a stage table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TestType {
    #[default]
    Load,
    Stress,
    Spike,
    Smoke,
}

impl TestType {
    pub const ALL: [TestType; 4] = [
        TestType::Load,
        TestType::Stress,
        TestType::Spike,
        TestType::Smoke,
    ];

    /// Parse a test-type tag case-insensitively. Unknown tags map to [`TestType::Load`].
    pub fn parse_lenient(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "stress" => Self::Stress,
            "spike" => Self::Spike,
            "smoke" => Self::Smoke,
            _ => Self::Load,
        }
    }

    /// True when `tag` names one of the known test types.
    pub fn is_known(tag: &str) -> bool {
        Self::ALL
            .iter()
            .any(|t| t.as_str().eq_ignore_ascii_case(tag.trim()))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Stress => "stress",
            Self::Spike => "spike",
            Self::Smoke => "smoke",
        }
    }

    /// Target concurrency used when no override is supplied.
    pub fn default_target(&self) -> u32 {
        match self {
            Self::Load => 200,
            Self::Stress => 500,
            Self::Spike => 1000,
            Self::Smoke => 1,
        }
    }

    /// Window granted to in-flight iterations after the last stage ends.
    pub fn graceful_ramp_down(&self) -> Duration {
        match self {
            Self::Load => Duration::from_secs(30),
            Self::Stress | Self::Spike => Duration::from_secs(60),
            Self::Smoke => Duration::ZERO,
        }
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the scheduler moves concurrency through the stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Executor {
    /// Linear interpolation from the previous target to each stage's target.
    RampingVus,
    /// Fixed concurrency for the whole run; no interpolation.
    ConstantVus,
}

/// One phase of a ramp profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stage {
    /// Length of the stage. Always greater than zero.
    #[serde(serialize_with = "serialize_duration")]
    pub duration: Duration,
    /// Concurrency reached at the end of the stage.
    pub target: u32,
}

impl Stage {
    pub fn new(duration: Duration, target: u32) -> Self {
        Self { duration, target }
    }
}

/// Immutable, time-phased concurrency plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RampProfile {
    pub test_type: TestType,
    pub executor: Executor,
    /// Concurrency at time zero; the first stage ramps from here.
    pub start_vus: u32,
    pub stages: Vec<Stage>,
    #[serde(serialize_with = "serialize_duration")]
    pub graceful_ramp_down: Duration,
}

impl RampProfile {
    /// Build the profile for `test_type`.
    ///
    /// `target_vus` overrides the type's default target (ignored for smoke,
    /// which is always one VU). `hold` overrides the hold-stage length; a
    /// zero hold is treated as absent so every stage keeps a positive
    /// duration.
    pub fn build(test_type: TestType, target_vus: Option<u32>, hold: Option<Duration>) -> Self {
        let hold = hold.filter(|d| !d.is_zero());
        let target = target_vus.unwrap_or_else(|| test_type.default_target());
        let ramp_hold = hold.unwrap_or(DEFAULT_HOLD);
        let secs = Duration::from_secs;

        let stages = match test_type {
            TestType::Load => vec![
                Stage::new(secs(30), ceil_percent(target, 20)),
                Stage::new(secs(60), target),
                Stage::new(ramp_hold, target),
                Stage::new(secs(30), 0),
            ],
            TestType::Stress => vec![
                Stage::new(secs(30), ceil_percent(target, 50)),
                Stage::new(secs(60), target),
                Stage::new(ramp_hold, target),
                Stage::new(secs(60), 0),
            ],
            TestType::Spike => vec![
                Stage::new(secs(10), 0),
                Stage::new(secs(10), target),
                Stage::new(ramp_hold, target),
                Stage::new(secs(10), 0),
            ],
            TestType::Smoke => {
                return Self {
                    test_type,
                    executor: Executor::ConstantVus,
                    start_vus: 1,
                    stages: vec![Stage::new(hold.unwrap_or(DEFAULT_SMOKE_HOLD), 1)],
                    graceful_ramp_down: test_type.graceful_ramp_down(),
                };
            }
        };

        Self {
            test_type,
            executor: Executor::RampingVus,
            start_vus: 0,
            stages,
            graceful_ramp_down: test_type.graceful_ramp_down(),
        }
    }

    /// Sum of all stage durations (excludes the graceful window), saturating
    /// at [`Duration::MAX`].
    pub fn total_duration(&self) -> Duration {
        self.stages
            .iter()
            .fold(Duration::ZERO, |acc, s| acc.saturating_add(s.duration))
    }

    /// Highest concurrency the profile ever asks for.
    pub fn peak_target(&self) -> u32 {
        self.stages
            .iter()
            .map(|s| s.target)
            .chain(std::iter::once(self.start_vus))
            .max()
            .unwrap_or(0)
    }

    /// Index of the stage active at `elapsed`, or `None` once every stage has ended.
    pub fn stage_index_at(&self, elapsed: Duration) -> Option<usize> {
        let mut stage_start = Duration::ZERO;
        for (index, stage) in self.stages.iter().enumerate() {
            let stage_end = stage_start.saturating_add(stage.duration);
            if elapsed < stage_end {
                return Some(index);
            }
            stage_start = stage_end;
        }
        None
    }

    /// Display label for the stage at `index`, e.g. `stage 2/4 ramp-up`.
    pub fn stage_label(&self, index: usize) -> String {
        let total = self.stages.len();
        let Some(stage) = self.stages.get(index) else {
            return "graceful ramp-down".to_string();
        };
        let from = match index {
            0 => self.start_vus,
            _ => self.stages[index - 1].target,
        };
        let phase = if self.executor == Executor::ConstantVus || stage.target == from {
            "hold"
        } else if stage.target > from {
            "ramp-up"
        } else {
            "ramp-down"
        };
        format!("stage {}/{total} {phase}", index + 1)
    }

    /// Desired concurrency at `elapsed` since the run started.
    ///
    /// Within a ramping stage the value moves linearly from the previous
    /// target, rounded toward the stage's starting value (floor while rising,
    /// ceil while falling). Returns 0 once every stage has ended.
    pub fn target_at(&self, elapsed: Duration) -> u32 {
        let mut from = self.start_vus;
        let mut stage_start = Duration::ZERO;

        for stage in &self.stages {
            let stage_end = stage_start.saturating_add(stage.duration);
            if elapsed < stage_end {
                if self.executor == Executor::ConstantVus {
                    return stage.target;
                }
                let progress = (elapsed - stage_start).as_secs_f64() / stage.duration.as_secs_f64();
                return interpolate(from, stage.target, progress);
            }
            from = stage.target;
            stage_start = stage_end;
        }
        0
    }
}

fn interpolate(from: u32, to: u32, progress: f64) -> u32 {
    let progress = progress.clamp(0.0, 1.0);
    let value = f64::from(from) + (f64::from(to) - f64::from(from)) * progress;
    if to >= from {
        value.floor() as u32
    } else {
        value.ceil() as u32
    }
}

fn ceil_percent(target: u32, percent: u32) -> u32 {
    let scaled = u64::from(target) * u64::from(percent);
    scaled.div_ceil(100) as u32
}

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&crate::loadtest::config::format_duration(*duration))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_load_defaults() {
        let profile = RampProfile::build(TestType::Load, None, None);
        assert_eq!(profile.executor, Executor::RampingVus);
        assert_eq!(
            profile.stages,
            vec![
                Stage::new(secs(30), 40),
                Stage::new(secs(60), 200),
                Stage::new(secs(60), 200),
                Stage::new(secs(30), 0),
            ]
        );
        assert_eq!(profile.graceful_ramp_down, secs(30));
    }

    #[test]
    fn test_stress_with_overrides() {
        let profile = RampProfile::build(TestType::Stress, Some(100), Some(secs(120)));
        assert_eq!(
            profile.stages,
            vec![
                Stage::new(secs(30), 50),
                Stage::new(secs(60), 100),
                Stage::new(secs(120), 100),
                Stage::new(secs(60), 0),
            ]
        );
        assert_eq!(profile.graceful_ramp_down, secs(60));
    }

    #[test]
    fn test_spike_defaults() {
        let profile = RampProfile::build(TestType::Spike, None, None);
        assert_eq!(
            profile.stages,
            vec![
                Stage::new(secs(10), 0),
                Stage::new(secs(10), 1000),
                Stage::new(secs(60), 1000),
                Stage::new(secs(10), 0),
            ]
        );
        assert_eq!(profile.graceful_ramp_down, secs(60));
    }

    #[test]
    fn test_smoke_is_constant_single_vu() {
        let profile = RampProfile::build(TestType::Smoke, Some(50), None);
        assert_eq!(profile.executor, Executor::ConstantVus);
        assert_eq!(profile.start_vus, 1);
        assert_eq!(profile.stages, vec![Stage::new(secs(10), 1)]);
        assert_eq!(profile.graceful_ramp_down, Duration::ZERO);
        assert_eq!(profile.target_at(secs(0)), 1);
        assert_eq!(profile.target_at(secs(9)), 1);
        assert_eq!(profile.target_at(secs(10)), 0);
    }

    #[test]
    fn test_smoke_honours_explicit_hold() {
        let profile = RampProfile::build(TestType::Smoke, None, Some(secs(60)));
        assert_eq!(profile.stages, vec![Stage::new(secs(60), 1)]);
    }

    #[test]
    fn test_warm_up_rounds_up() {
        let profile = RampProfile::build(TestType::Load, Some(21), None);
        assert_eq!(profile.stages[0].target, 5);

        let profile = RampProfile::build(TestType::Stress, Some(3), None);
        assert_eq!(profile.stages[0].target, 2);
    }

    #[test]
    fn test_zero_hold_is_treated_as_absent() {
        let profile = RampProfile::build(TestType::Load, None, Some(Duration::ZERO));
        assert_eq!(profile.stages[2].duration, DEFAULT_HOLD);
    }

    #[test]
    fn test_parse_lenient_falls_back_to_load() {
        assert_eq!(TestType::parse_lenient("STRESS"), TestType::Stress);
        assert_eq!(TestType::parse_lenient(" spike "), TestType::Spike);
        assert_eq!(TestType::parse_lenient("smoke"), TestType::Smoke);
        assert_eq!(TestType::parse_lenient("soak"), TestType::Load);
        assert_eq!(TestType::parse_lenient(""), TestType::Load);
        assert!(TestType::is_known("Spike"));
        assert!(!TestType::is_known("soak"));
    }

    #[test]
    fn test_target_at_interpolates_linearly() {
        let profile = RampProfile::build(TestType::Load, Some(100), None);
        // Stage 1: 0 -> 20 over 30s
        assert_eq!(profile.target_at(secs(0)), 0);
        assert_eq!(profile.target_at(secs(15)), 10);
        // Stage 2: 20 -> 100 over 60s
        assert_eq!(profile.target_at(secs(30)), 20);
        assert_eq!(profile.target_at(secs(60)), 60);
        // Hold
        assert_eq!(profile.target_at(secs(100)), 100);
        // Ramp down: 100 -> 0 over 30s, rounded up while falling
        assert_eq!(profile.target_at(secs(150) + Duration::from_millis(1)), 100);
        assert_eq!(profile.target_at(secs(165)), 50);
        // Past the end
        assert_eq!(profile.target_at(secs(180)), 0);
        assert_eq!(profile.target_at(secs(1000)), 0);
    }

    #[test]
    fn test_spike_holds_zero_then_jumps() {
        let profile = RampProfile::build(TestType::Spike, Some(100), None);
        assert_eq!(profile.target_at(secs(5)), 0);
        assert_eq!(profile.target_at(secs(15)), 50);
        assert_eq!(profile.target_at(secs(20)), 100);
    }

    #[test]
    fn test_total_duration_and_peak() {
        let profile = RampProfile::build(TestType::Stress, Some(100), Some(secs(120)));
        assert_eq!(profile.total_duration(), secs(270));
        assert_eq!(profile.peak_target(), 100);
    }

    #[test]
    fn test_stage_index_at() {
        let profile = RampProfile::build(TestType::Spike, Some(10), None);
        assert_eq!(profile.stage_index_at(secs(0)), Some(0));
        assert_eq!(profile.stage_index_at(secs(10)), Some(1));
        assert_eq!(profile.stage_index_at(secs(25)), Some(2));
        assert_eq!(profile.stage_index_at(secs(85)), Some(3));
        assert_eq!(profile.stage_index_at(secs(90)), None);
    }

    #[test]
    fn test_stage_labels() {
        let profile = RampProfile::build(TestType::Spike, Some(10), None);
        assert_eq!(profile.stage_label(0), "stage 1/4 hold");
        assert_eq!(profile.stage_label(1), "stage 2/4 ramp-up");
        assert_eq!(profile.stage_label(2), "stage 3/4 hold");
        assert_eq!(profile.stage_label(3), "stage 4/4 ramp-down");
        assert_eq!(profile.stage_label(4), "graceful ramp-down");

        let smoke = RampProfile::build(TestType::Smoke, None, None);
        assert_eq!(smoke.stage_label(0), "stage 1/1 hold");
    }

    #[test]
    fn test_profile_serializes_durations_in_k6_notation() {
        let profile = RampProfile::build(TestType::Stress, Some(100), Some(secs(150)));
        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["test_type"], "stress");
        assert_eq!(json["executor"], "ramping-vus");
        assert_eq!(json["stages"][2]["duration"], "2m30s");
        assert_eq!(json["graceful_ramp_down"], "1m");
    }

    #[test]
    fn test_maximal_hold_saturates_instead_of_overflowing() {
        let profile = RampProfile::build(TestType::Load, Some(10), Some(Duration::MAX));
        assert_eq!(profile.total_duration(), Duration::MAX);
        assert_eq!(profile.stage_index_at(secs(200)), Some(2));
        assert_eq!(profile.target_at(secs(200)), 10);
        assert_eq!(profile.stage_index_at(Duration::MAX), None);
    }
}
