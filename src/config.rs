//! Push client configuration.
//!
//! Values come from a JSON file or from the environment (a `.env` file is
//! honored). Every field except the two URLs has a default.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default cap on the recent activity buffer.
pub const DEFAULT_ACTIVITY_BUFFER_SIZE: usize = 50;

/// Default REST request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Backoff policy the SSE transport applies to non-auth failures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Base delay for exponential backoff (milliseconds).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Maximum delay for exponential backoff (milliseconds).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Give up after this many consecutive failures. `None` retries forever.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Exponential backoff delay for the given attempt, without jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay_ms = self
            .base_delay_ms
            .saturating_mul(2_u64.saturating_pow(attempt.min(16)));
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt >= max)
    }
}

/// Configuration for a [`crate::push::NotificationCenter`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    /// Base URL of the REST API (notifications and auth routes hang off it).
    pub api_base_url: String,
    /// Full URL of the `/notifications` event stream.
    pub push_url: String,
    /// REST request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Extra case-insensitive markers that classify a transport error as
    /// an auth failure, on top of the built-in ones.
    #[serde(default)]
    pub auth_error_markers: Vec<String>,
    /// Size of the recent activity window.
    #[serde(default = "default_activity_buffer_size")]
    pub activity_buffer_size: usize,
    /// Optional cap on stored notifications. Oldest entries are dropped first.
    #[serde(default)]
    pub max_notifications: Option<usize>,
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_activity_buffer_size() -> usize {
    DEFAULT_ACTIVITY_BUFFER_SIZE
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    10_000
}

impl PushConfig {
    /// Create a config with defaults for everything but the endpoints.
    pub fn new(api_base_url: impl Into<String>, push_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            push_url: push_url.into(),
            request_timeout_secs: default_request_timeout(),
            auth_error_markers: Vec::new(),
            activity_buffer_size: default_activity_buffer_size(),
            max_notifications: None,
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Load from `SALON_*` environment variables, reading `.env` first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_base_url = non_empty("SALON_API_URL").ok_or(ConfigError::Missing("SALON_API_URL"))?;
        let push_url = match non_empty("SALON_PUSH_URL") {
            Some(url) => url,
            None => format!("{}/notifications", api_base_url.trim_end_matches('/')),
        };

        let mut config = Self::new(api_base_url, push_url);

        if let Some(raw) = non_empty("SALON_REQUEST_TIMEOUT_SECS") {
            config.request_timeout_secs =
                raw.trim().parse().map_err(|e| ConfigError::Invalid {
                    field: "SALON_REQUEST_TIMEOUT_SECS",
                    reason: format!("{e}"),
                })?;
        }

        if let Some(raw) = non_empty("SALON_MAX_NOTIFICATIONS") {
            let cap: usize = raw.trim().parse().map_err(|e| ConfigError::Invalid {
                field: "SALON_MAX_NOTIFICATIONS",
                reason: format!("{e}"),
            })?;
            config.max_notifications = Some(cap);
        }

        if let Some(raw) = non_empty("SALON_AUTH_ERROR_MARKERS") {
            config.auth_error_markers = raw
                .split(',')
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect();
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject endpoints that cannot be used.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_url("api_base_url", &self.api_base_url)?;
        validate_url("push_url", &self.push_url)?;
        if self.activity_buffer_size == 0 {
            return Err(ConfigError::Invalid {
                field: "activity_buffer_size",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// API base with any trailing slash removed.
    pub fn api_base(&self) -> &str {
        self.api_base_url.trim_end_matches('/')
    }
}

fn validate_url(field: &'static str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid {
            field,
            reason: "must not be empty".to_string(),
        });
    }
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("'{trimmed}' is not an http(s) URL"),
        });
    }
    Ok(())
}
