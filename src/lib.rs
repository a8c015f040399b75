//! rampload: ramp-profile HTTP load generator.
//!
//! Drives a configurable number of virtual users against a single HTTP
//! endpoint following named test profiles (load, stress, spike, smoke),
//! checks every response, and reports k6-style metrics and thresholds.

pub mod loadtest;
