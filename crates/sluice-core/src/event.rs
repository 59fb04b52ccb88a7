//! Events, attempts, and the event state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Lifecycle state of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventState {
    /// Waiting to be claimed by a worker.
    Pending,
    /// Claimed and currently being evaluated.
    Processing,
    /// Finalized with every rule outcome recorded and no errors.
    Processed,
    /// Finalized with at least one recorded error.
    Failed,
}

impl EventState {
    /// All states, in lifecycle order.
    pub const ALL: [Self; 4] = [
        Self::Pending,
        Self::Processing,
        Self::Processed,
        Self::Failed,
    ];

    /// Returns the lowercase storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }

    /// Parses the lowercase storage representation.
    ///
    /// # Errors
    ///
    /// Returns a validation error for unknown states.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "processed" => Ok(Self::Processed),
            "failed" => Ok(Self::Failed),
            other => Err(Error::validation(format!("unknown event state: {other}"))),
        }
    }

    /// Returns true when the state is terminal for automatic flow.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Processed | Self::Failed)
    }

    /// Returns true when an operator may replay an event in this state.
    #[must_use]
    pub const fn is_replayable(self) -> bool {
        self.is_terminal()
    }

    /// Returns true when `self -> to` is a legal transition.
    ///
    /// Legal transitions: claim (`pending -> processing`), finalize
    /// (`processing -> processed | failed`), replay
    /// (`processed | failed -> pending`), and lease recovery
    /// (`processing -> pending`).
    #[must_use]
    pub const fn can_transition(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Processed)
                | (Self::Processing, Self::Failed)
                | (Self::Processing, Self::Pending)
                | (Self::Processed, Self::Pending)
                | (Self::Failed, Self::Pending)
        )
    }
}

impl std::fmt::Display for EventState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ingested event.
///
/// `external_id` is caller-supplied and globally unique; `payload` and
/// `event_type` are immutable after the first insert. Duplicate ingests
/// only increment `received_count`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Store-assigned identifier.
    pub id: i64,
    /// Caller-supplied deduplication key, unique across all events.
    pub external_id: String,
    /// Event type used to select matching rules.
    pub event_type: String,
    /// Arbitrary JSON payload conditions evaluate against.
    pub payload: Value,
    /// Current lifecycle state.
    pub state: EventState,
    /// Number of successful ingest calls for this `external_id`.
    pub received_count: i32,
    /// First-insert timestamp.
    pub created_at: DateTime<Utc>,
    /// Set while the event is claimed; null otherwise.
    pub processing_started_at: Option<DateTime<Utc>>,
    /// Last finalization timestamp.
    pub processed_at: Option<DateTime<Utc>>,
    /// Last replay timestamp.
    pub replayed_at: Option<DateTime<Utc>>,
}

/// Final status of an attempt. In-flight attempts have no status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    /// Every rule outcome recorded without errors.
    Success,
    /// At least one error recorded, or the engine faulted.
    Failed,
}

impl AttemptStatus {
    /// Returns the lowercase storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    /// Parses the lowercase storage representation.
    ///
    /// # Errors
    ///
    /// Returns a validation error for unknown statuses.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(Error::validation(format!("unknown attempt status: {other}"))),
        }
    }
}

/// One pass of the engine over one claim of one event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventAttempt {
    /// Store-assigned identifier.
    pub id: i64,
    /// The claimed event.
    pub event_id: i64,
    /// Final status; `None` while in flight.
    pub status: Option<AttemptStatus>,
    /// Newline-joined rule errors, or the engine fault.
    pub error: Option<String>,
    /// Claim timestamp.
    pub started_at: DateTime<Utc>,
    /// Finalization timestamp.
    pub finished_at: Option<DateTime<Utc>>,
    /// `finished_at - started_at` in milliseconds.
    pub duration_ms: Option<i64>,
}

/// Outcome the engine hands to the store when finalizing an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// All rules recorded without errors; event becomes `processed`.
    Success,
    /// One or more errors recorded; event becomes `failed`.
    Failed {
        /// Newline-joined error list.
        error: String,
    },
}

impl AttemptOutcome {
    /// The event state this outcome finalizes to.
    #[must_use]
    pub const fn event_state(&self) -> EventState {
        match self {
            Self::Success => EventState::Processed,
            Self::Failed { .. } => EventState::Failed,
        }
    }

    /// The attempt status this outcome finalizes to.
    #[must_use]
    pub const fn attempt_status(&self) -> AttemptStatus {
        match self {
            Self::Success => AttemptStatus::Success,
            Self::Failed { .. } => AttemptStatus::Failed,
        }
    }
}
