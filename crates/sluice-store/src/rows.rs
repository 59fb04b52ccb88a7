//! Row structs bridging sqlx and the domain model.
//!
//! States and results travel as text columns; `TryFrom` re-validates
//! them on the way out so a hand-edited row fails loudly instead of
//! silently misbehaving.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::FromRow;

use sluice_core::event::{AttemptStatus, Event, EventAttempt, EventState};
use sluice_core::rule::{ActiveRule, Rule, RuleExecution, RuleVersion};
use sluice_core::{Error, ExecutionResult};

#[derive(Debug, FromRow)]
pub(crate) struct EventRow {
    pub id: i64,
    pub external_id: String,
    pub event_type: String,
    pub payload: Value,
    pub state: String,
    pub received_count: i32,
    pub created_at: DateTime<Utc>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub replayed_at: Option<DateTime<Utc>>,
}

/// Column list matching [`EventRow`], for `SELECT` and `RETURNING`.
pub(crate) const EVENT_COLUMNS: &str = "id, external_id, event_type, payload, state, \
     received_count, created_at, processing_started_at, processed_at, replayed_at";

impl TryFrom<EventRow> for Event {
    type Error = Error;

    fn try_from(row: EventRow) -> Result<Self, Error> {
        Ok(Self {
            id: row.id,
            external_id: row.external_id,
            event_type: row.event_type,
            payload: row.payload,
            state: EventState::parse(&row.state)?,
            received_count: row.received_count,
            created_at: row.created_at,
            processing_started_at: row.processing_started_at,
            processed_at: row.processed_at,
            replayed_at: row.replayed_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct AttemptRow {
    pub id: i64,
    pub event_id: i64,
    pub status: Option<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

impl TryFrom<AttemptRow> for EventAttempt {
    type Error = Error;

    fn try_from(row: AttemptRow) -> Result<Self, Error> {
        Ok(Self {
            id: row.id,
            event_id: row.event_id,
            status: row.status.as_deref().map(AttemptStatus::parse).transpose()?,
            error: row.error,
            started_at: row.started_at,
            finished_at: row.finished_at,
            duration_ms: row.duration_ms,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct RuleRow {
    pub id: i64,
    pub name: String,
    pub event_type: String,
    pub active: bool,
    pub current_version_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Column list matching [`RuleRow`].
pub(crate) const RULE_COLUMNS: &str =
    "id, name, event_type, active, current_version_id, created_at, updated_at";

impl From<RuleRow> for Rule {
    fn from(row: RuleRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            event_type: row.event_type,
            active: row.active,
            current_version_id: row.current_version_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct RuleVersionRow {
    pub id: i64,
    pub rule_id: i64,
    pub condition: Value,
    pub action: Value,
    pub version: i32,
    pub created_at: DateTime<Utc>,
}

/// Column list matching [`RuleVersionRow`].
pub(crate) const RULE_VERSION_COLUMNS: &str =
    "id, rule_id, condition, action, version, created_at";

impl From<RuleVersionRow> for RuleVersion {
    fn from(row: RuleVersionRow) -> Self {
        Self {
            id: row.id,
            rule_id: row.rule_id,
            condition: row.condition,
            action: row.action,
            version: row.version,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct ActiveRuleRow {
    pub rule_id: i64,
    pub name: String,
    pub version_id: i64,
    pub version: i32,
    pub condition: Value,
    pub action: Value,
}

impl From<ActiveRuleRow> for ActiveRule {
    fn from(row: ActiveRuleRow) -> Self {
        Self {
            rule_id: row.rule_id,
            name: row.name,
            version_id: row.version_id,
            version: row.version,
            condition: row.condition,
            action: row.action,
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct ExecutionRow {
    pub id: i64,
    pub attempt_id: i64,
    pub rule_id: i64,
    pub rule_version_id: i64,
    pub result: String,
    pub error: Option<String>,
    pub executed_at: DateTime<Utc>,
    /// Joined display fields; null when the rule has been deleted.
    pub rule_name: Option<String>,
    pub rule_version: Option<i32>,
}

impl ExecutionRow {
    pub(crate) fn into_parts(self) -> Result<(RuleExecution, Option<String>, Option<i32>), Error> {
        let execution = RuleExecution {
            id: self.id,
            attempt_id: self.attempt_id,
            rule_id: self.rule_id,
            rule_version_id: self.rule_version_id,
            result: ExecutionResult::parse(&self.result)?,
            error: self.error,
            executed_at: self.executed_at,
        };
        Ok((execution, self.rule_name, self.rule_version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_row_maps_to_domain() {
        let row = EventRow {
            id: 1,
            external_id: "evt-1".to_string(),
            event_type: "order.created".to_string(),
            payload: json!({"status": "paid"}),
            state: "pending".to_string(),
            received_count: 1,
            created_at: Utc::now(),
            processing_started_at: None,
            processed_at: None,
            replayed_at: None,
        };
        let event = Event::try_from(row).unwrap();
        assert_eq!(event.state, EventState::Pending);
        assert_eq!(event.payload["status"], "paid");
    }

    #[test]
    fn corrupt_state_fails_loudly() {
        let row = EventRow {
            id: 1,
            external_id: "evt-1".to_string(),
            event_type: "t".to_string(),
            payload: json!({}),
            state: "limbo".to_string(),
            received_count: 1,
            created_at: Utc::now(),
            processing_started_at: None,
            processed_at: None,
            replayed_at: None,
        };
        assert!(Event::try_from(row).is_err());
    }

    #[test]
    fn in_flight_attempt_has_no_status() {
        let row = AttemptRow {
            id: 5,
            event_id: 1,
            status: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: None,
        };
        let attempt = EventAttempt::try_from(row).unwrap();
        assert!(attempt.status.is_none());
    }
}
