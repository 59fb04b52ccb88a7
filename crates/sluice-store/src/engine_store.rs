//! [`EngineStore`] port implementation backed by Postgres.

use async_trait::async_trait;

use sluice_core::event::{AttemptOutcome, Event};
use sluice_core::ports::{ClaimedEvent, EngineStore};
use sluice_core::rule::{ActiveRule, ExecutionResult};
use sluice_core::Result;

use crate::events::EventStore;

#[async_trait]
impl EngineStore for EventStore {
    async fn claim_next(&self) -> Result<Option<ClaimedEvent>> {
        Self::claim_next(self).await
    }

    async fn active_rules_for(&self, event_type: &str) -> Result<Vec<ActiveRule>> {
        Self::active_rules_for(self, event_type).await
    }

    async fn has_completed_execution(&self, event_id: i64, rule_version_id: i64) -> Result<bool> {
        Self::has_completed_execution(self, event_id, rule_version_id).await
    }

    async fn record_execution(
        &self,
        attempt_id: i64,
        rule_id: i64,
        rule_version_id: i64,
        result: ExecutionResult,
        error: Option<&str>,
    ) -> Result<()> {
        Self::record_execution(self, attempt_id, rule_id, rule_version_id, result, error).await
    }

    async fn finalize(
        &self,
        event_id: i64,
        attempt_id: i64,
        outcome: &AttemptOutcome,
    ) -> Result<()> {
        Self::finalize(self, event_id, attempt_id, outcome).await
    }

    async fn release_timed_out(&self, event_id: i64, attempt_id: i64, error: &str) -> Result<()> {
        Self::release_timed_out(self, event_id, attempt_id, error).await
    }

    async fn requeue_stuck(&self, older_than_seconds: i64) -> Result<Vec<Event>> {
        Self::requeue_stuck(self, older_than_seconds).await
    }
}
