//! The typed action model.
//!
//! Actions serialize as `{"type": "...", "params": {...}}`. Unknown
//! tags are rejected by serde at the boundary; rows that fail to parse
//! at evaluation time are recorded as failed executions by the engine.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Severity of a `log` action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Informational.
    Info,
    /// Warning.
    Warn,
    /// Error.
    Error,
}

/// HTTP method allowed for webhook actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WebhookMethod {
    /// HTTP POST.
    Post,
    /// HTTP PUT.
    Put,
    /// HTTP PATCH.
    Patch,
}

impl WebhookMethod {
    /// Returns the HTTP method name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
        }
    }
}

/// What a matched rule does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params", rename_all = "snake_case")]
pub enum Action {
    /// Emits a structured log line. Idempotent.
    Log {
        /// Severity.
        level: LogLevel,
        /// Message to log.
        message: String,
    },
    /// Does nothing. Idempotent.
    Noop,
    /// Issues one HTTP request with a bounded timeout. Not idempotent.
    CallWebhook {
        /// Target URL.
        url: String,
        /// HTTP method.
        method: WebhookMethod,
        /// Extra request headers.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        headers: Option<BTreeMap<String, String>>,
        /// JSON request body.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<Value>,
    },
    /// Sends (or, in log mode, records) an email. Not idempotent in
    /// real mode.
    SendEmail {
        /// Recipient address.
        to: String,
        /// Subject line.
        subject: String,
        /// Template name.
        template: String,
        /// Template data.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
}

impl Action {
    /// Returns the action tag.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Log { .. } => "log",
            Self::Noop => "noop",
            Self::CallWebhook { .. } => "call_webhook",
            Self::SendEmail { .. } => "send_email",
        }
    }

    /// Returns true for action tags defined to always run on replay.
    ///
    /// The replay dedup predicate is short-circuited to false for
    /// these so the audit log reflects every pass.
    #[must_use]
    pub const fn is_idempotent(&self) -> bool {
        matches!(self, Self::Log { .. } | Self::Noop)
    }

    /// Parses a stored action value.
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the unrecognized or malformed
    /// action.
    pub fn from_value(value: &Value) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| Error::validation(format!("unknown or invalid action: {e}")))
    }

    /// Validates fields serde cannot check.
    ///
    /// # Errors
    ///
    /// Returns a validation error for empty or non-HTTP webhook URLs
    /// and empty email recipients.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Log { .. } | Self::Noop => Ok(()),
            Self::CallWebhook { url, .. } => {
                if url.starts_with("http://") || url.starts_with("https://") {
                    Ok(())
                } else {
                    Err(Error::validation(format!(
                        "webhook url must be http(s): {url}"
                    )))
                }
            }
            Self::SendEmail { to, .. } => {
                if to.trim().is_empty() {
                    Err(Error::validation("email recipient must not be empty"))
                } else {
                    Ok(())
                }
            }
        }
    }
}
