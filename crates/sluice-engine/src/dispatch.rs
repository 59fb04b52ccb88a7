//! Action dispatch with bounded time.
//!
//! The dispatcher owns no persistence; it returns an outcome the
//! engine records. Webhook calls are the main wall-clock hazard and
//! carry a per-request timeout.

use std::time::Duration;

use sluice_core::action::{Action, LogLevel};
use sluice_core::{Error, Result};

/// Behavior of the `send_email` action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmailMode {
    /// Fail email actions with a not-implemented error.
    #[default]
    Disabled,
    /// Log the intent and report success.
    Log,
}

impl EmailMode {
    /// Parses the configuration value.
    ///
    /// # Errors
    ///
    /// Returns a validation error for values other than `disabled` and
    /// `log`.
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "disabled" => Ok(Self::Disabled),
            "log" => Ok(Self::Log),
            other => Err(Error::validation(format!(
                "email-mode must be one of: disabled, log (got {other})"
            ))),
        }
    }
}

/// Executes typed actions, classifying success vs. failure.
#[derive(Debug, Clone)]
pub struct ActionDispatcher {
    client: reqwest::Client,
    webhook_timeout: Duration,
    email_mode: EmailMode,
}

impl ActionDispatcher {
    /// Creates a dispatcher with the given webhook budget and email
    /// mode.
    #[must_use]
    pub fn new(webhook_timeout: Duration, email_mode: EmailMode) -> Self {
        let client = reqwest::Client::builder()
            .timeout(webhook_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            webhook_timeout,
            email_mode,
        }
    }

    /// Executes one action.
    ///
    /// # Errors
    ///
    /// Returns an action-failed error for non-2xx webhook responses,
    /// transport failures, and email actions while email is disabled;
    /// returns a timeout error when the webhook budget elapses.
    pub async fn dispatch(&self, action: &Action) -> Result<()> {
        match action {
            Action::Log { level, message } => {
                match level {
                    LogLevel::Info => tracing::info!(action = "log", "{message}"),
                    LogLevel::Warn => tracing::warn!(action = "log", "{message}"),
                    LogLevel::Error => tracing::error!(action = "log", "{message}"),
                }
                Ok(())
            }
            Action::Noop => Ok(()),
            Action::CallWebhook {
                url,
                method,
                headers,
                body,
            } => self.call_webhook(url, *method, headers.as_ref(), body.as_ref()).await,
            Action::SendEmail {
                to,
                subject,
                template,
                ..
            } => match self.email_mode {
                EmailMode::Log => {
                    tracing::info!(
                        to = %to,
                        subject = %subject,
                        template = %template,
                        "email action in log mode"
                    );
                    Ok(())
                }
                EmailMode::Disabled => Err(Error::action_failed(
                    "email sending not implemented (email-mode is disabled)",
                )),
            },
        }
    }

    async fn call_webhook(
        &self,
        url: &str,
        method: sluice_core::WebhookMethod,
        headers: Option<&std::collections::BTreeMap<String, String>>,
        body: Option<&serde_json::Value>,
    ) -> Result<()> {
        use sluice_core::WebhookMethod;

        let mut request = match method {
            WebhookMethod::Post => self.client.post(url),
            WebhookMethod::Put => self.client.put(url),
            WebhookMethod::Patch => self.client.patch(url),
        };
        if let Some(headers) = headers {
            for (name, value) in headers {
                request = request.header(name.as_str(), value.as_str());
            }
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::timeout(format!(
                    "Webhook timed out after {}s",
                    self.webhook_timeout.as_secs()
                ))
            } else {
                Error::action_failed(format!("Webhook request failed: {e}"))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::action_failed(format!(
                "Webhook failed with status {}",
                status.as_u16()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_mode_parses_known_values() {
        assert_eq!(EmailMode::parse("disabled").unwrap(), EmailMode::Disabled);
        assert_eq!(EmailMode::parse("log").unwrap(), EmailMode::Log);
        assert_eq!(EmailMode::parse(" LOG ").unwrap(), EmailMode::Log);
        assert!(EmailMode::parse("smtp").is_err());
    }
}
