//! The rule engine: one pass over one claimed event.
//!
//! Each rule yields an explicit `(result, error)` pair and never
//! unwinds the loop; a failure in one rule must not prevent its
//! siblings from being evaluated. Store faults abort the attempt as a
//! whole, leaving the event `failed` and visible rather than stuck in
//! `processing`.

use std::sync::Arc;

use tracing::Instrument;

use sluice_core::condition;
use sluice_core::event::AttemptOutcome;
use sluice_core::observability::processing_span;
use sluice_core::ports::{ClaimedEvent, EngineStore};
use sluice_core::rule::{ActiveRule, ExecutionResult};
use sluice_core::{Action, Result};

use crate::broadcast::EventBroadcaster;
use crate::dispatch::ActionDispatcher;
use crate::metrics::EngineMetrics;

/// Evaluates active rules against a claimed event, dispatches matched
/// actions, records per-rule outcomes, and finalizes the attempt.
pub struct RuleEngine {
    store: Arc<dyn EngineStore>,
    dispatcher: ActionDispatcher,
    broadcaster: EventBroadcaster,
    metrics: EngineMetrics,
}

impl RuleEngine {
    /// Creates an engine over the given store and dispatcher.
    #[must_use]
    pub fn new(
        store: Arc<dyn EngineStore>,
        dispatcher: ActionDispatcher,
        broadcaster: EventBroadcaster,
    ) -> Self {
        Self {
            store,
            dispatcher,
            broadcaster,
            metrics: EngineMetrics::new(),
        }
    }

    /// Processes one claimed event to finalization.
    ///
    /// # Errors
    ///
    /// Returns the underlying fault when the store fails
    /// mid-processing; the attempt is finalized as failed first so the
    /// event stays visible.
    pub async fn process(&self, claimed: &ClaimedEvent) -> Result<()> {
        let span = processing_span("process", claimed.event.id, claimed.attempt_id);
        self.process_inner(claimed).instrument(span).await
    }

    async fn process_inner(&self, claimed: &ClaimedEvent) -> Result<()> {
        match self.run(claimed).await {
            Ok(outcome) => {
                self.metrics.record_event_processed(match outcome {
                    AttemptOutcome::Success => "processed",
                    AttemptOutcome::Failed { .. } => "failed",
                });
                self.broadcaster
                    .publish(claimed.event.id, outcome.event_state());
                Ok(())
            }
            Err(fault) => {
                tracing::error!(
                    event_id = claimed.event.id,
                    attempt_id = claimed.attempt_id,
                    error = %fault,
                    "engine fault; marking attempt failed"
                );
                let outcome = AttemptOutcome::Failed {
                    error: format!("engine fault: {fault}"),
                };
                if let Err(finalize_err) = self
                    .store
                    .finalize(claimed.event.id, claimed.attempt_id, &outcome)
                    .await
                {
                    tracing::error!(
                        event_id = claimed.event.id,
                        error = %finalize_err,
                        "failed to finalize faulted attempt; stuck recovery will reclaim it"
                    );
                } else {
                    self.broadcaster
                        .publish(claimed.event.id, outcome.event_state());
                }
                self.metrics.record_event_processed("failed");
                Err(fault)
            }
        }
    }

    async fn run(&self, claimed: &ClaimedEvent) -> Result<AttemptOutcome> {
        let event = &claimed.event;
        let rules = self.store.active_rules_for(&event.event_type).await?;
        tracing::debug!(
            event_id = event.id,
            attempt_id = claimed.attempt_id,
            event_type = %event.event_type,
            rules = rules.len(),
            "evaluating rules"
        );

        let mut errors: Vec<String> = Vec::new();
        for rule in &rules {
            let (result, error) = self.consider(claimed, rule).await?;
            self.store
                .record_execution(
                    claimed.attempt_id,
                    rule.rule_id,
                    rule.version_id,
                    result,
                    error.as_deref(),
                )
                .await?;
            self.metrics.record_rule_execution(result.as_str());

            if result == ExecutionResult::Failed {
                let message = error.unwrap_or_else(|| "unknown error".to_string());
                tracing::warn!(
                    event_id = event.id,
                    rule_id = rule.rule_id,
                    rule = %rule.name,
                    error = %message,
                    "rule execution failed"
                );
                errors.push(format!("{}: {message}", rule.name));
            }
        }

        let outcome = if errors.is_empty() {
            AttemptOutcome::Success
        } else {
            AttemptOutcome::Failed {
                error: errors.join("\n"),
            }
        };
        self.store
            .finalize(event.id, claimed.attempt_id, &outcome)
            .await?;
        tracing::info!(
            event_id = event.id,
            attempt_id = claimed.attempt_id,
            state = %outcome.event_state(),
            "attempt finalized"
        );
        Ok(outcome)
    }

    /// Considers one rule. Only store faults propagate; evaluation and
    /// dispatch failures become the rule's recorded outcome.
    async fn consider(
        &self,
        claimed: &ClaimedEvent,
        rule: &ActiveRule,
    ) -> Result<(ExecutionResult, Option<String>)> {
        let action = match Action::from_value(&rule.action) {
            Ok(action) => action,
            Err(e) => return Ok((ExecutionResult::Failed, Some(e.to_string()))),
        };

        let matched = match condition::evaluate(&rule.condition, &claimed.event.payload) {
            Ok(matched) => matched,
            Err(e) => return Ok((ExecutionResult::Failed, Some(e.to_string()))),
        };
        if !matched {
            return Ok((ExecutionResult::Skipped, None));
        }

        // Replay dedup: a prior completed execution of this same rule
        // version skips the side effect. Idempotent tags always run so
        // the audit log reflects every pass.
        if !action.is_idempotent()
            && self
                .store
                .has_completed_execution(claimed.event.id, rule.version_id)
                .await?
        {
            tracing::debug!(
                event_id = claimed.event.id,
                rule_id = rule.rule_id,
                rule_version_id = rule.version_id,
                "action deduplicated on replay"
            );
            return Ok((ExecutionResult::Deduped, None));
        }

        match self.dispatcher.dispatch(&action).await {
            Ok(()) => Ok((ExecutionResult::Applied, None)),
            Err(e) => Ok((ExecutionResult::Failed, Some(e.to_string()))),
        }
    }
}
