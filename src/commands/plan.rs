//! `rampload plan` command implementation.
//!
//! Resolves the configuration exactly like `run` and prints the ramp plan,
//! the request and the thresholds. Sends no traffic.

use anyhow::Result;
use serde::Serialize;
use std::time::Duration;

use rampload::loadtest::config::{format_duration, Pacing, RunConfig};
use rampload::loadtest::error::LoadTestError;
use rampload::loadtest::profile::RampProfile;
use rampload::loadtest::request::{build_request_spec, RequestSpec};
use rampload::loadtest::threshold::ThresholdSet;

use super::run::build_thresholds;

/// Everything a run would use, resolved.
#[derive(Debug, Serialize)]
pub struct Plan {
    pub test_name: String,
    pub request: RequestSpec,
    pub body_bytes: usize,
    pub profile: RampProfile,
    #[serde(serialize_with = "serialize_pacing")]
    pub pacing: Pacing,
    pub thresholds: Vec<String>,
}

impl Plan {
    pub fn resolve(config: &RunConfig, extra_thresholds: &[String]) -> Result<Self, LoadTestError> {
        let request = build_request_spec(config)?;
        let thresholds: ThresholdSet = build_thresholds(config, extra_thresholds)?;
        let profile =
            RampProfile::build(config.test_type(), config.target_vus(), config.hold_duration());
        Ok(Self {
            test_name: config.test_name().to_string(),
            body_bytes: request.body_len(),
            request,
            profile,
            pacing: config.pacing(),
            thresholds: thresholds.iter().map(ToString::to_string).collect(),
        })
    }

    /// Human-readable rendering.
    pub fn render(&self) -> String {
        let mut lines = vec![
            format!("test:      {}", self.test_name),
            format!("request:   {} {}", self.request.method, self.request.url),
            format!("expects:   status {}", self.request.expected_status),
        ];
        if self.body_bytes > 0 {
            lines.push(format!("body:      {} bytes", self.body_bytes));
        }
        lines.push("headers:".to_string());
        for (name, value) in self.request.display_headers() {
            lines.push(format!("  {name}: {value}"));
        }

        lines.push(String::new());
        lines.push(format!(
            "profile:   {} (peak {} VUs)",
            self.profile.test_type,
            self.profile.peak_target()
        ));
        let mut offset = Duration::ZERO;
        for (index, stage) in self.profile.stages.iter().enumerate() {
            lines.push(format!(
                "  {:>8} +{:<8} {:<24} -> {} VUs",
                format_duration(offset),
                format_duration(stage.duration),
                self.profile.stage_label(index),
                stage.target
            ));
            offset += stage.duration;
        }
        lines.push(format!(
            "  total {}, graceful ramp-down {}",
            format_duration(self.profile.total_duration()),
            format_duration(self.profile.graceful_ramp_down)
        ));
        lines.push(format!(
            "pacing:    {}..{}",
            format_duration(self.pacing.min),
            format_duration(self.pacing.max)
        ));

        lines.push(String::new());
        lines.push("thresholds:".to_string());
        for threshold in &self.thresholds {
            lines.push(format!("  {threshold}"));
        }
        lines.join("\n")
    }
}

fn serialize_pacing<S>(pacing: &Pacing, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    use serde::ser::SerializeStruct;
    let mut state = serializer.serialize_struct("Pacing", 2)?;
    state.serialize_field("min", &format_duration(pacing.min))?;
    state.serialize_field("max", &format_duration(pacing.max))?;
    state.end()
}

/// Execute the `plan` command.
pub fn execute(config: RunConfig, extra_thresholds: &[String], json: bool) -> Result<()> {
    super::warn_unparsed(&config);
    let plan = Plan::resolve(&config, extra_thresholds)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        println!("{}", plan.render());
    }
    Ok(())
}
