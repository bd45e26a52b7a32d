//! Error types shared across the push client.
//!
//! Exposed operations on [`crate::push::NotificationCenter`] never surface these
//! to callers; they are logged where they happen. Internal layers return them so
//! the failure paths stay testable.

/// Errors from the notification and auth REST endpoints.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("request timeout: {0}")]
    Timeout(String),
    #[error("HTTP error {status}: {message}")]
    Status { status: u16, message: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("not signed in")]
    Unauthenticated,
}

impl From<reqwest::Error> for ApiError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            return Self::Timeout(value.to_string());
        }
        if value.is_decode() {
            return Self::InvalidResponse(value.to_string());
        }
        Self::Request(value.to_string())
    }
}

/// Errors from a token refresh attempt.
///
/// `Clone` because one result is handed to every caller that joined the
/// in-flight refresh.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RefreshError {
    #[error("no refresh token available")]
    MissingRefreshToken,
    /// The session the refresh was started for is no longer current.
    #[error("session changed while refreshing")]
    SessionChanged,
    #[error("refresh request failed: {0}")]
    Api(#[from] ApiError),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing config value: {0}")]
    Missing(&'static str),
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors building a [`crate::push::NotificationCenter`].
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("{0}")]
    Api(#[from] ApiError),
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Transport(#[from] crate::push::transport::TransportError),
}
