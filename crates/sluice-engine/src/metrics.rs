//! Observability metrics for the processing engine.
//!
//! Exposed through the `metrics` crate facade; a deployment installs
//! whichever recorder it wants.

use std::time::Duration;

use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: claim attempts by outcome (`claimed`, `empty`, `error`).
    pub const CLAIMS_TOTAL: &str = "sluice_claims_total";
    /// Counter: finalized events by outcome (`processed`, `failed`, `timeout`).
    pub const EVENTS_PROCESSED_TOTAL: &str = "sluice_events_processed_total";
    /// Counter: rule executions by result.
    pub const RULE_EXECUTIONS_TOTAL: &str = "sluice_rule_executions_total";
    /// Counter: events returned to pending by the recovery sweep.
    pub const STUCK_RECOVERED_TOTAL: &str = "sluice_stuck_events_recovered_total";
    /// Histogram: wall-clock seconds per engine pass.
    pub const PROCESSING_DURATION_SECONDS: &str = "sluice_event_processing_duration_seconds";
}

/// Thin wrapper recording engine metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineMetrics;

impl EngineMetrics {
    /// Creates the metrics handle.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Records one claim attempt.
    pub fn record_claim(self, outcome: &'static str) {
        counter!(names::CLAIMS_TOTAL, "outcome" => outcome).increment(1);
    }

    /// Records one finalized event.
    pub fn record_event_processed(self, outcome: &'static str) {
        counter!(names::EVENTS_PROCESSED_TOTAL, "outcome" => outcome).increment(1);
    }

    /// Records one rule execution result.
    pub fn record_rule_execution(self, result: &'static str) {
        counter!(names::RULE_EXECUTIONS_TOTAL, "result" => result).increment(1);
    }

    /// Records events recovered by a stuck sweep.
    pub fn record_stuck_recovered(self, count: u64) {
        counter!(names::STUCK_RECOVERED_TOTAL).increment(count);
    }

    /// Observes one engine pass duration.
    pub fn observe_processing_duration(self, elapsed: Duration) {
        histogram!(names::PROCESSING_DURATION_SECONDS).record(elapsed.as_secs_f64());
    }
}
