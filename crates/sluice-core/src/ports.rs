//! Port traits between the processing engine and persistence.
//!
//! The engine only sees [`EngineStore`]; the Postgres adapter lives in
//! `sluice-store` and tests supply an in-memory implementation.

use async_trait::async_trait;

use crate::error::Result;
use crate::event::{AttemptOutcome, Event};
use crate::rule::{ActiveRule, ExecutionResult};

/// An event handed to the engine together with its in-flight attempt.
#[derive(Debug, Clone)]
pub struct ClaimedEvent {
    /// The event, already moved to `processing`.
    pub event: Event,
    /// The attempt row created by the claim.
    pub attempt_id: i64,
}

/// Persistence operations the processing engine and worker depend on.
#[async_trait]
pub trait EngineStore: Send + Sync {
    /// Atomically reserves the oldest pending event, marks it
    /// processing, and creates an attempt row. Returns `None` when no
    /// work is available.
    async fn claim_next(&self) -> Result<Option<ClaimedEvent>>;

    /// Loads active rules for an event type, each joined with its
    /// current version, ordered by rule id ascending.
    async fn active_rules_for(&self, event_type: &str) -> Result<Vec<ActiveRule>>;

    /// The replay dedup predicate: whether any prior execution for
    /// this event and rule version completed an action
    /// (`applied` or `deduped`).
    async fn has_completed_execution(&self, event_id: i64, rule_version_id: i64) -> Result<bool>;

    /// Records the outcome of one rule considered during one attempt.
    async fn record_execution(
        &self,
        attempt_id: i64,
        rule_id: i64,
        rule_version_id: i64,
        result: ExecutionResult,
        error: Option<&str>,
    ) -> Result<()>;

    /// Finalizes the attempt and advances the event to
    /// `processed`/`failed` in a single transaction.
    async fn finalize(&self, event_id: i64, attempt_id: i64, outcome: &AttemptOutcome)
        -> Result<()>;

    /// Marks the attempt failed with the given error and returns the
    /// event to `pending` so a fresh claim can retry it.
    async fn release_timed_out(&self, event_id: i64, attempt_id: i64, error: &str) -> Result<()>;

    /// Returns events stuck in `processing` past the threshold to
    /// `pending`, finalizing their orphaned attempts as failed.
    async fn requeue_stuck(&self, older_than_seconds: i64) -> Result<Vec<Event>>;
}
