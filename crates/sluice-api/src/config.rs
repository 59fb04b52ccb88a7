//! Service configuration.
//!
//! Loaded from `SLUICE_*` environment variables, the canonical runtime
//! configuration path for container deployments.

use std::time::Duration;

use sluice_core::{Error, Result};
use sluice_engine::{EmailMode, WorkerConfig};

/// CORS configuration for browser-based access.
#[derive(Debug, Clone)]
pub struct CorsConfig {
    /// Allowed origins. `["*"]` allows all origins (development only).
    /// Empty list disables CORS entirely.
    pub allowed_origins: Vec<String>,
    /// Max age for preflight cache (seconds).
    pub max_age_seconds: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            // Disabled by default; set explicit origins (or `*` for
            // local development) to enable.
            allowed_origins: Vec::new(),
            max_age_seconds: 3600,
        }
    }
}

/// Configuration for the Sluice service (API surface + workers).
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port.
    pub http_port: u16,
    /// Postgres connection string.
    pub database_url: String,
    /// Connection pool cap, shared between the API and the workers.
    pub max_connections: u32,
    /// Worker sleep between empty polls, in milliseconds.
    pub poll_interval_ms: u64,
    /// Per-event wall-clock budget, in seconds.
    pub processing_timeout_secs: u64,
    /// Per-webhook-call wall-clock budget, in seconds.
    pub webhook_timeout_secs: u64,
    /// `send_email` action behavior.
    pub email_mode: EmailMode,
    /// CORS configuration.
    pub cors: CorsConfig,
    /// Number of parallel claim loops.
    pub worker_count: usize,
    /// Stuck-recovery sweep period in seconds; 0 disables the sweep.
    pub stuck_sweep_interval_secs: u64,
    /// Default lease expiry for stuck recovery, in seconds.
    pub stuck_threshold_secs: i64,
    /// Pretty logs and stack details in error responses.
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 8080,
            database_url: String::new(),
            max_connections: 20,
            poll_interval_ms: 1000,
            processing_timeout_secs: 60,
            webhook_timeout_secs: 5,
            email_mode: EmailMode::Disabled,
            cors: CorsConfig::default(),
            worker_count: 1,
            stuck_sweep_interval_secs: 60,
            stuck_threshold_secs: 300,
            debug: false,
        }
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// Supported env vars:
    /// - `SLUICE_DATABASE_URL` (required)
    /// - `SLUICE_HTTP_PORT`
    /// - `SLUICE_MAX_CONNECTIONS`
    /// - `SLUICE_POLL_INTERVAL_MS`
    /// - `SLUICE_PROCESSING_TIMEOUT_SECS`
    /// - `SLUICE_WEBHOOK_TIMEOUT_SECS`
    /// - `SLUICE_EMAIL_MODE` (`disabled` | `log`)
    /// - `SLUICE_CORS_ORIGINS` (comma-separated, or `*`)
    /// - `SLUICE_CORS_MAX_AGE_SECONDS`
    /// - `SLUICE_WORKER_COUNT`
    /// - `SLUICE_STUCK_SWEEP_INTERVAL_SECS` (0 disables the sweep)
    /// - `SLUICE_STUCK_THRESHOLD_SECS`
    /// - `SLUICE_DEBUG`
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but cannot be parsed,
    /// or if `SLUICE_DATABASE_URL` is missing.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        config.database_url = env_string("SLUICE_DATABASE_URL").ok_or_else(|| {
            Error::validation("SLUICE_DATABASE_URL is required".to_string())
        })?;

        if let Some(port) = env_u16("SLUICE_HTTP_PORT")? {
            config.http_port = port;
        }
        if let Some(max) = env_u32("SLUICE_MAX_CONNECTIONS")? {
            if max == 0 {
                return Err(Error::validation(
                    "SLUICE_MAX_CONNECTIONS must be greater than 0",
                ));
            }
            config.max_connections = max;
        }
        if let Some(interval) = env_u64("SLUICE_POLL_INTERVAL_MS")? {
            config.poll_interval_ms = interval;
        }
        if let Some(timeout) = env_u64("SLUICE_PROCESSING_TIMEOUT_SECS")? {
            if timeout == 0 {
                return Err(Error::validation(
                    "SLUICE_PROCESSING_TIMEOUT_SECS must be greater than 0",
                ));
            }
            config.processing_timeout_secs = timeout;
        }
        if let Some(timeout) = env_u64("SLUICE_WEBHOOK_TIMEOUT_SECS")? {
            if timeout == 0 {
                return Err(Error::validation(
                    "SLUICE_WEBHOOK_TIMEOUT_SECS must be greater than 0",
                ));
            }
            config.webhook_timeout_secs = timeout;
        }
        if let Some(mode) = env_string("SLUICE_EMAIL_MODE") {
            config.email_mode = EmailMode::parse(&mode)?;
        }
        if let Some(origins) = env_string("SLUICE_CORS_ORIGINS") {
            config.cors.allowed_origins = parse_cors_allowed_origins(&origins);
        }
        if let Some(max_age) = env_u64("SLUICE_CORS_MAX_AGE_SECONDS")? {
            config.cors.max_age_seconds = max_age;
        }
        if let Some(count) = env_usize("SLUICE_WORKER_COUNT")? {
            if count == 0 {
                return Err(Error::validation(
                    "SLUICE_WORKER_COUNT must be greater than 0",
                ));
            }
            config.worker_count = count;
        }
        if let Some(interval) = env_u64("SLUICE_STUCK_SWEEP_INTERVAL_SECS")? {
            config.stuck_sweep_interval_secs = interval;
        }
        if let Some(threshold) = env_i64("SLUICE_STUCK_THRESHOLD_SECS")? {
            if threshold <= 0 {
                return Err(Error::validation(
                    "SLUICE_STUCK_THRESHOLD_SECS must be greater than 0",
                ));
            }
            config.stuck_threshold_secs = threshold;
        }
        if let Some(debug) = env_bool("SLUICE_DEBUG")? {
            config.debug = debug;
        }

        Ok(config)
    }

    /// Worker sleep between empty polls.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Per-event wall-clock budget.
    #[must_use]
    pub const fn processing_timeout(&self) -> Duration {
        Duration::from_secs(self.processing_timeout_secs)
    }

    /// Per-webhook-call wall-clock budget.
    #[must_use]
    pub const fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }

    /// Timing knobs handed to each worker loop.
    #[must_use]
    pub const fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            poll_interval: self.poll_interval(),
            processing_timeout: self.processing_timeout(),
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_u16(name: &str) -> Result<Option<u16>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u16>()
        .map(Some)
        .map_err(|e| Error::validation(format!("{name} must be a u16: {e}")))
}

fn env_u32(name: &str) -> Result<Option<u32>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u32>()
        .map(Some)
        .map_err(|e| Error::validation(format!("{name} must be a u32: {e}")))
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u64>()
        .map(Some)
        .map_err(|e| Error::validation(format!("{name} must be a u64: {e}")))
}

fn env_i64(name: &str) -> Result<Option<i64>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<i64>()
        .map(Some)
        .map_err(|e| Error::validation(format!("{name} must be an i64: {e}")))
}

fn env_usize(name: &str) -> Result<Option<usize>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<usize>()
        .map(Some)
        .map_err(|e| Error::validation(format!("{name} must be a usize: {e}")))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        _ => Err(Error::validation(format!(
            "{name} must be a boolean (true/false/1/0)"
        ))),
    }
}

fn env_bool(name: &str) -> Result<Option<bool>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    parse_bool(name, &v).map(Some)
}

fn parse_cors_allowed_origins(value: &str) -> Vec<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if trimmed == "*" {
        return vec!["*".to_string()];
    }
    trimmed
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_deployment_contract() {
        let config = Config::default();
        assert_eq!(config.max_connections, 20);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.processing_timeout(), Duration::from_secs(60));
        assert_eq!(config.webhook_timeout(), Duration::from_secs(5));
        assert_eq!(config.stuck_threshold_secs, 300);
        assert_eq!(config.email_mode, EmailMode::Disabled);
        assert_eq!(config.worker_count, 1);
    }

    #[test]
    fn parse_bool_accepts_common_forms() {
        assert!(parse_bool("TEST", "true").unwrap());
        assert!(parse_bool("TEST", "1").unwrap());
        assert!(!parse_bool("TEST", "FALSE").unwrap());
        assert!(parse_bool("TEST", "maybe").is_err());
    }

    #[test]
    fn cors_origins_split_and_trim() {
        assert_eq!(parse_cors_allowed_origins("*"), vec!["*"]);
        assert_eq!(
            parse_cors_allowed_origins("http://a.test, http://b.test"),
            vec!["http://a.test", "http://b.test"]
        );
        assert!(parse_cors_allowed_origins("  ").is_empty());
    }
}
