//! Rules, immutable rule versions, and per-rule execution records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Mutable rule header.
///
/// `current_version_id` is nullable so the header can be inserted
/// before its first version exists; every later write maintains the
/// invariant that it points at a version with the matching `rule_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// Store-assigned identifier.
    pub id: i64,
    /// Human-readable name.
    pub name: String,
    /// Event type this rule applies to.
    pub event_type: String,
    /// Inactive rules are excluded from evaluation.
    pub active: bool,
    /// Pointer to the current version.
    pub current_version_id: Option<i64>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last header or version change.
    pub updated_at: DateTime<Utc>,
}

/// The immutable (condition, action) pair a rule had at a point in time.
///
/// A new version is created whenever `condition` or `action` changes;
/// metadata edits do not version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleVersion {
    /// Store-assigned identifier.
    pub id: i64,
    /// Owning rule.
    pub rule_id: i64,
    /// Whitelisted condition expression.
    pub condition: Value,
    /// Typed action record.
    pub action: Value,
    /// Per-rule monotonic sequence starting at 1.
    pub version: i32,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Outcome of considering one rule during one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionResult {
    /// Condition held and the action ran to completion.
    Applied,
    /// Condition evaluated to false.
    Skipped,
    /// Evaluation or dispatch raised.
    Failed,
    /// Condition held but this rule version already completed an
    /// action for this event on a prior attempt.
    Deduped,
}

impl ExecutionResult {
    /// Returns the lowercase storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
            Self::Deduped => "deduped",
        }
    }

    /// Parses the lowercase storage representation.
    ///
    /// # Errors
    ///
    /// Returns a validation error for unknown results.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "applied" => Ok(Self::Applied),
            "skipped" => Ok(Self::Skipped),
            "failed" => Ok(Self::Failed),
            "deduped" => Ok(Self::Deduped),
            other => Err(Error::validation(format!(
                "unknown execution result: {other}"
            ))),
        }
    }

    /// Returns true when this result counts as a completed action for
    /// the replay dedup predicate.
    #[must_use]
    pub const fn completed_action(self) -> bool {
        matches!(self, Self::Applied | Self::Deduped)
    }
}

impl std::fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of one rule considered during one attempt. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleExecution {
    /// Store-assigned identifier.
    pub id: i64,
    /// Owning attempt.
    pub attempt_id: i64,
    /// The rule considered. Not a foreign key; history survives rule
    /// deletion.
    pub rule_id: i64,
    /// The exact version evaluated.
    pub rule_version_id: i64,
    /// Outcome of this rule.
    pub result: ExecutionResult,
    /// Rendered error for `failed` results.
    pub error: Option<String>,
    /// Recording timestamp.
    pub executed_at: DateTime<Utc>,
}

/// A rule joined with its current version, as loaded for evaluation.
///
/// `condition` and `action` stay as raw JSON here: each is parsed per
/// rule during evaluation so one corrupt row cannot abort its siblings.
#[derive(Debug, Clone)]
pub struct ActiveRule {
    /// Rule header id.
    pub rule_id: i64,
    /// Rule name, for error rendering and audit display.
    pub name: String,
    /// Current version id (the dedup key).
    pub version_id: i64,
    /// Current version sequence number.
    pub version: i32,
    /// Condition of the current version.
    pub condition: Value,
    /// Action of the current version.
    pub action: Value,
}
