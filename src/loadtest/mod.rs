//! Ramp-profile HTTP load generation.
//!
//! Resolves run configuration, builds a staged concurrency plan, drives
//! virtual users against one fixed request, checks every response, and
//! aggregates HdrHistogram-based metrics for thresholds, a terminal summary
//! and a JSON report.

pub mod breaking;
pub mod check;
pub mod client;
pub mod config;
pub mod display;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod profile;
pub mod report;
pub mod request;
pub mod summary;
pub mod threshold;
pub mod vu;
