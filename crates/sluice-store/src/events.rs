//! Event persistence: ingest, claim/lease, finalize, replay, recovery,
//! and audit reads.
//!
//! All SQL is runtime-checked (`sqlx::query`, not the compile-time
//! macros) so builds do not require a live database.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder};

use sluice_core::event::{AttemptOutcome, Event, EventAttempt, EventState};
use sluice_core::ports::ClaimedEvent;
use sluice_core::rule::{ActiveRule, ExecutionResult, RuleExecution};
use sluice_core::{Error, Result};

use crate::rows::{
    ActiveRuleRow, AttemptRow, EventRow, ExecutionRow, EVENT_COLUMNS,
};

/// Filters shared by event listing and stats.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Restrict to one lifecycle state.
    pub state: Option<EventState>,
    /// Restrict to one event type.
    pub event_type: Option<String>,
    /// Creation date range start (inclusive).
    pub start_date: Option<DateTime<Utc>>,
    /// Creation date range end (inclusive).
    pub end_date: Option<DateTime<Utc>>,
}

/// Pagination window.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    /// Maximum rows returned.
    pub limit: i64,
    /// Rows skipped.
    pub offset: i64,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

/// Aggregate event counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventStats {
    /// All events matching the filter.
    pub total: i64,
    /// Events in `pending`.
    pub pending: i64,
    /// Events in `processing`.
    pub processing: i64,
    /// Events in `processed`.
    pub processed: i64,
    /// Events in `failed`.
    pub failed: i64,
    /// Failures in the last 24 hours, over
    /// `COALESCE(processed_at, created_at)` so failures that never
    /// finalized still surface.
    pub failed_last_24h: i64,
}

/// One recorded rule execution joined with display fields.
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    /// The immutable execution row.
    pub execution: RuleExecution,
    /// Rule name at read time; `None` when the rule was deleted.
    pub rule_name: Option<String>,
    /// Version sequence number; `None` when history outlived the rule.
    pub rule_version: Option<i32>,
}

/// An attempt joined with its rule executions.
#[derive(Debug, Clone)]
pub struct AttemptWithExecutions {
    /// The attempt.
    pub attempt: EventAttempt,
    /// Executions recorded during this attempt, in consideration order.
    pub executions: Vec<ExecutionRecord>,
}

/// Postgres-backed event store.
#[derive(Debug, Clone)]
pub struct EventStore {
    pool: PgPool,
}

impl EventStore {
    /// Creates a store over the shared pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Idempotent intake by `external_id`.
    ///
    /// New ids insert a `pending` row; duplicates leave every field
    /// unchanged except `received_count`, which increments. The caller
    /// infers duplication from `received_count > 1`.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the upsert fails.
    pub async fn ingest(
        &self,
        external_id: &str,
        event_type: &str,
        payload: &Value,
    ) -> Result<Event> {
        let sql = format!(
            "INSERT INTO events (external_id, event_type, payload) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (external_id) \
             DO UPDATE SET received_count = events.received_count + 1 \
             RETURNING {EVENT_COLUMNS}"
        );
        let row: EventRow = sqlx::query_as(&sql)
            .bind(external_id)
            .bind(event_type)
            .bind(payload)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::storage_with_source("event ingest failed", e))?;
        row.try_into()
    }

    /// Fetches one event by id.
    ///
    /// # Errors
    ///
    /// Returns not-found when the id does not exist.
    pub async fn get(&self, id: i64) -> Result<Event> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1");
        let row: Option<EventRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::storage_with_source("event lookup failed", e))?;
        row.ok_or_else(|| Error::not_found("event", id))?.try_into()
    }

    /// Lists events matching the filter, newest first.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the query fails.
    pub async fn list(&self, filter: &EventFilter, page: Page) -> Result<Vec<Event>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {EVENT_COLUMNS} FROM events"
        ));
        push_filters(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ");
        qb.push_bind(page.limit);
        qb.push(" OFFSET ");
        qb.push_bind(page.offset);

        let rows: Vec<EventRow> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::storage_with_source("event listing failed", e))?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Aggregate counts for the filter, plus failures in the last 24
    /// hours.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the query fails.
    pub async fn stats(&self, filter: &EventFilter) -> Result<EventStats> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT COUNT(*) AS total, \
             COUNT(*) FILTER (WHERE state = 'pending') AS pending, \
             COUNT(*) FILTER (WHERE state = 'processing') AS processing, \
             COUNT(*) FILTER (WHERE state = 'processed') AS processed, \
             COUNT(*) FILTER (WHERE state = 'failed') AS failed, \
             COUNT(*) FILTER (WHERE state = 'failed' \
                 AND COALESCE(processed_at, created_at) > now() - interval '24 hours') \
                 AS failed_last_24h \
             FROM events",
        );
        push_filters(&mut qb, filter);

        let (total, pending, processing, processed, failed, failed_last_24h): (
            i64,
            i64,
            i64,
            i64,
            i64,
            i64,
        ) = qb
            .build_query_as()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::storage_with_source("event stats failed", e))?;

        Ok(EventStats {
            total,
            pending,
            processing,
            processed,
            failed,
            failed_last_24h,
        })
    }

    /// Attempt history for one event, each attempt joined with its
    /// rule executions (including rule name and version for display).
    ///
    /// # Errors
    ///
    /// Returns not-found when the event does not exist.
    pub async fn attempts(&self, event_id: i64) -> Result<Vec<AttemptWithExecutions>> {
        // Existence check first so an empty history is distinguishable
        // from a missing event.
        self.get(event_id).await?;

        let attempt_rows: Vec<AttemptRow> = sqlx::query_as(
            "SELECT id, event_id, status, error, started_at, finished_at, duration_ms \
             FROM event_attempts WHERE event_id = $1 ORDER BY started_at ASC, id ASC",
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::storage_with_source("attempt listing failed", e))?;

        let attempt_ids: Vec<i64> = attempt_rows.iter().map(|a| a.id).collect();
        let execution_rows: Vec<ExecutionRow> = if attempt_ids.is_empty() {
            Vec::new()
        } else {
            sqlx::query_as(
                "SELECT x.id, x.attempt_id, x.rule_id, x.rule_version_id, x.result, \
                        x.error, x.executed_at, \
                        r.name AS rule_name, v.version AS rule_version \
                 FROM rule_executions x \
                 LEFT JOIN rules r ON r.id = x.rule_id \
                 LEFT JOIN rule_versions v ON v.id = x.rule_version_id \
                 WHERE x.attempt_id = ANY($1) ORDER BY x.id ASC",
            )
            .bind(&attempt_ids)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::storage_with_source("execution listing failed", e))?
        };

        let mut attempts = Vec::with_capacity(attempt_rows.len());
        for row in attempt_rows {
            attempts.push(AttemptWithExecutions {
                attempt: row.try_into()?,
                executions: Vec::new(),
            });
        }
        for row in execution_rows {
            let (execution, rule_name, rule_version) = row.into_parts()?;
            if let Some(slot) = attempts
                .iter_mut()
                .find(|a| a.attempt.id == execution.attempt_id)
            {
                slot.executions.push(ExecutionRecord {
                    execution,
                    rule_name,
                    rule_version,
                });
            }
        }
        Ok(attempts)
    }

    /// Returns one terminal event to `pending` for reprocessing.
    ///
    /// # Errors
    ///
    /// Returns not-found when the id does not exist and conflict when
    /// the event is not in a replayable state.
    pub async fn replay(&self, id: i64) -> Result<Event> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::storage_with_source("replay begin failed", e))?;

        let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1 FOR UPDATE");
        let row: Option<EventRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| Error::storage_with_source("replay lookup failed", e))?;
        let row = row.ok_or_else(|| Error::not_found("event", id))?;

        let state = EventState::parse(&row.state)?;
        if !state.is_replayable() {
            return Err(Error::conflict(format!(
                "event {id} is {state}; only processed or failed events can be replayed"
            )));
        }

        let sql = format!(
            "UPDATE events \
             SET state = 'pending', replayed_at = now(), processing_started_at = NULL \
             WHERE id = $1 RETURNING {EVENT_COLUMNS}"
        );
        let row: EventRow = sqlx::query_as(&sql)
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| Error::storage_with_source("replay update failed", e))?;

        tx.commit()
            .await
            .map_err(|e| Error::storage_with_source("replay commit failed", e))?;
        row.try_into()
    }

    /// Returns the terminal subset of the given events to `pending`.
    /// Ids that are absent or non-terminal are silently excluded.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the update fails.
    pub async fn replay_batch(&self, ids: &[i64]) -> Result<Vec<Event>> {
        let sql = format!(
            "UPDATE events \
             SET state = 'pending', replayed_at = now(), processing_started_at = NULL \
             WHERE id = ANY($1) AND state IN ('processed', 'failed') \
             RETURNING {EVENT_COLUMNS}"
        );
        let rows: Vec<EventRow> = sqlx::query_as(&sql)
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::storage_with_source("batch replay failed", e))?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Atomically reserves the oldest pending event.
    ///
    /// The inner select locks the row and skips rows already locked by
    /// other sessions, which is the whole multi-worker safety story:
    /// at most one worker ever observes a given event in `processing`.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the claim transaction fails.
    pub async fn claim_next(&self) -> Result<Option<ClaimedEvent>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::storage_with_source("claim begin failed", e))?;

        let sql = format!(
            "UPDATE events \
             SET state = 'processing', processing_started_at = now() \
             WHERE id = (\
                 SELECT id FROM events WHERE state = 'pending' \
                 ORDER BY created_at ASC LIMIT 1 \
                 FOR UPDATE SKIP LOCKED\
             ) \
             RETURNING {EVENT_COLUMNS}"
        );
        let row: Option<EventRow> = sqlx::query_as(&sql)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| Error::storage_with_source("claim update failed", e))?;

        let Some(row) = row else {
            tx.commit()
                .await
                .map_err(|e| Error::storage_with_source("claim commit failed", e))?;
            return Ok(None);
        };

        let attempt_id: i64 = sqlx::query_scalar(
            "INSERT INTO event_attempts (event_id, started_at) VALUES ($1, now()) RETURNING id",
        )
        .bind(row.id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| Error::storage_with_source("attempt insert failed", e))?;

        tx.commit()
            .await
            .map_err(|e| Error::storage_with_source("claim commit failed", e))?;

        Ok(Some(ClaimedEvent {
            event: row.try_into()?,
            attempt_id,
        }))
    }

    /// Records the outcome of one rule considered during one attempt.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the insert fails.
    pub async fn record_execution(
        &self,
        attempt_id: i64,
        rule_id: i64,
        rule_version_id: i64,
        result: ExecutionResult,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO rule_executions \
             (attempt_id, rule_id, rule_version_id, result, error) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(attempt_id)
        .bind(rule_id)
        .bind(rule_version_id)
        .bind(result.as_str())
        .bind(error)
        .execute(&self.pool)
        .await
        .map(|_| ())
        .map_err(|e| Error::storage_with_source("execution insert failed", e))
    }

    /// The replay dedup predicate (§ rule engine): whether any prior
    /// execution for this event and rule version completed an action.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the query fails.
    pub async fn has_completed_execution(
        &self,
        event_id: i64,
        rule_version_id: i64,
    ) -> Result<bool> {
        sqlx::query_scalar(
            "SELECT EXISTS (\
                 SELECT 1 FROM rule_executions x \
                 JOIN event_attempts a ON a.id = x.attempt_id \
                 WHERE a.event_id = $1 AND x.rule_version_id = $2 \
                   AND x.result IN ('applied', 'deduped')\
             )",
        )
        .bind(event_id)
        .bind(rule_version_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::storage_with_source("dedup lookup failed", e))
    }

    /// Loads active rules for an event type, each joined with its
    /// current version, ordered by rule id ascending for deterministic
    /// evaluation.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the query fails.
    pub async fn active_rules_for(&self, event_type: &str) -> Result<Vec<ActiveRule>> {
        let rows: Vec<ActiveRuleRow> = sqlx::query_as(
            "SELECT r.id AS rule_id, r.name, v.id AS version_id, v.version, \
                    v.condition, v.action \
             FROM rules r \
             JOIN rule_versions v ON v.id = r.current_version_id \
             WHERE r.active AND r.event_type = $1 \
             ORDER BY r.id ASC",
        )
        .bind(event_type)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::storage_with_source("active rule load failed", e))?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Finalizes the attempt and advances the event in one transaction.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the transaction fails.
    pub async fn finalize(
        &self,
        event_id: i64,
        attempt_id: i64,
        outcome: &AttemptOutcome,
    ) -> Result<()> {
        let (status, error) = match outcome {
            AttemptOutcome::Success => ("success", None),
            AttemptOutcome::Failed { error } => ("failed", Some(error.as_str())),
        };

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::storage_with_source("finalize begin failed", e))?;

        sqlx::query(
            "UPDATE event_attempts \
             SET status = $1, error = $2, finished_at = now(), \
                 duration_ms = (EXTRACT(EPOCH FROM (now() - started_at)) * 1000)::BIGINT \
             WHERE id = $3",
        )
        .bind(status)
        .bind(error)
        .bind(attempt_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::storage_with_source("attempt finalize failed", e))?;

        sqlx::query(
            "UPDATE events \
             SET state = $1, processed_at = now(), processing_started_at = NULL \
             WHERE id = $2",
        )
        .bind(outcome.event_state().as_str())
        .bind(event_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::storage_with_source("event finalize failed", e))?;

        tx.commit()
            .await
            .map_err(|e| Error::storage_with_source("finalize commit failed", e))
    }

    /// Timeout unwind: the attempt is finalized as failed and the
    /// event returns to `pending` so a fresh claim can retry it.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the transaction fails.
    pub async fn release_timed_out(
        &self,
        event_id: i64,
        attempt_id: i64,
        error: &str,
    ) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::storage_with_source("release begin failed", e))?;

        sqlx::query(
            "UPDATE event_attempts \
             SET status = 'failed', error = $1, finished_at = now(), \
                 duration_ms = (EXTRACT(EPOCH FROM (now() - started_at)) * 1000)::BIGINT \
             WHERE id = $2",
        )
        .bind(error)
        .bind(attempt_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::storage_with_source("attempt release failed", e))?;

        sqlx::query(
            "UPDATE events \
             SET state = 'pending', processing_started_at = NULL \
             WHERE id = $1",
        )
        .bind(event_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::storage_with_source("event release failed", e))?;

        tx.commit()
            .await
            .map_err(|e| Error::storage_with_source("release commit failed", e))
    }

    /// Stuck-event recovery: every `processing` row whose lease is
    /// older than the threshold returns to `pending`, and its orphaned
    /// in-flight attempts are finalized as failed.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the transaction fails.
    pub async fn requeue_stuck(&self, older_than_seconds: i64) -> Result<Vec<Event>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::storage_with_source("requeue begin failed", e))?;

        let sql = format!(
            "UPDATE events \
             SET state = 'pending', processing_started_at = NULL \
             WHERE state = 'processing' \
               AND processing_started_at IS NOT NULL \
               AND processing_started_at < now() - ($1 * interval '1 second') \
             RETURNING {EVENT_COLUMNS}"
        );
        let rows: Vec<EventRow> = sqlx::query_as(&sql)
            .bind(older_than_seconds)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| Error::storage_with_source("requeue update failed", e))?;

        if !rows.is_empty() {
            let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
            sqlx::query(
                "UPDATE event_attempts \
                 SET status = 'failed', error = 'exceeded timeout', finished_at = now(), \
                     duration_ms = (EXTRACT(EPOCH FROM (now() - started_at)) * 1000)::BIGINT \
                 WHERE event_id = ANY($1) AND status IS NULL",
            )
            .bind(&ids)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::storage_with_source("orphan attempt finalize failed", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| Error::storage_with_source("requeue commit failed", e))?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

/// Appends `WHERE`/`AND` clauses for the shared event filters.
fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &EventFilter) {
    let mut sep = " WHERE ";
    if let Some(state) = filter.state {
        qb.push(sep).push("state = ").push_bind(state.as_str());
        sep = " AND ";
    }
    if let Some(event_type) = filter.event_type.clone() {
        qb.push(sep).push("event_type = ").push_bind(event_type);
        sep = " AND ";
    }
    if let Some(start) = filter.start_date {
        qb.push(sep).push("created_at >= ").push_bind(start);
        sep = " AND ";
    }
    if let Some(end) = filter.end_date {
        qb.push(sep).push("created_at <= ").push_bind(end);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_compose_into_sql() {
        let filter = EventFilter {
            state: Some(EventState::Failed),
            event_type: Some("order.created".to_string()),
            start_date: None,
            end_date: None,
        };
        let mut qb = QueryBuilder::<Postgres>::new("SELECT id FROM events");
        push_filters(&mut qb, &filter);
        let sql = qb.sql();
        assert!(sql.contains("WHERE state = "));
        assert!(sql.contains("AND event_type = "));
    }

    #[test]
    fn empty_filter_adds_no_clauses() {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT id FROM events");
        push_filters(&mut qb, &EventFilter::default());
        assert_eq!(qb.sql(), "SELECT id FROM events");
    }

    #[test]
    fn default_page_is_first_fifty() {
        let page = Page::default();
        assert_eq!(page.limit, 50);
        assert_eq!(page.offset, 0);
    }
}
