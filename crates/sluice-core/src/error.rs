//! Error types and result aliases for Sluice.
//!
//! One enum carries the whole failure taxonomy: per-rule failures
//! (`Eval`, `ActionFailed`, `Timeout`) are recorded on rule executions
//! and never abort sibling rules, while boundary failures
//! (`Validation`, `NotFound`, `Conflict`) surface synchronously to API
//! callers.

use std::fmt;

/// The result type used throughout Sluice.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Sluice operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed input: bad JSON shape, unknown operator, limits exceeded.
    #[error("validation error: {message}")]
    Validation {
        /// Description of what made the input invalid.
        message: String,
    },

    /// The requested entity does not exist.
    #[error("not found: {resource_type} with id {id}")]
    NotFound {
        /// The type of resource that was not found.
        resource_type: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// A state machine violation, e.g. replay of a non-terminal event.
    #[error("conflict: {message}")]
    Conflict {
        /// Description of the conflicting state.
        message: String,
    },

    /// Expression evaluation raised.
    #[error("evaluation error: {message}")]
    Eval {
        /// Description of the evaluation failure.
        message: String,
    },

    /// A webhook or email side effect failed.
    #[error("action failed: {message}")]
    ActionFailed {
        /// Description of the failed side effect.
        message: String,
    },

    /// A per-event or per-webhook budget was exceeded.
    #[error("timeout: {message}")]
    Timeout {
        /// Description of the exceeded budget.
        message: String,
    },

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// An internal error that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a new validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a new not-found error.
    #[must_use]
    pub fn not_found(resource_type: &'static str, id: impl fmt::Display) -> Self {
        Self::NotFound {
            resource_type,
            id: id.to_string(),
        }
    }

    /// Creates a new conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a new evaluation error.
    #[must_use]
    pub fn eval(message: impl Into<String>) -> Self {
        Self::Eval {
            message: message.into(),
        }
    }

    /// Creates a new action-failed error.
    #[must_use]
    pub fn action_failed(message: impl Into<String>) -> Self {
        Self::ActionFailed {
            message: message.into(),
        }
    }

    /// Creates a new timeout error.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Creates a new storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source cause.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns the stable machine-readable kind for the error envelope.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::NotFound { .. } => "not-found",
            Self::Conflict { .. } => "conflict",
            Self::Eval { .. } => "eval-error",
            Self::ActionFailed { .. } => "action-failed",
            Self::Timeout { .. } => "timeout",
            Self::Storage { .. } | Self::Serialization { .. } | Self::Internal { .. } => {
                "internal"
            }
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            message: value.to_string(),
        }
    }
}
