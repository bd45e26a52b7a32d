//! Real-time notification client for a salon management backend.
//!
//! Keeps the signed-in user's notification list and activity feed in sync
//! with the server over a push connection, refreshing the access token when
//! the connection is rejected.
//!
//! # Architecture
//!
//! - `session`: session source port and an in-memory implementation
//! - `api`: REST client for notifications and token refresh
//! - `push`: transport, connection manager, store, dispatcher, and ports
//! - `config`: configuration from the environment or a JSON file
//! - `error`: shared error types

pub mod api;
pub mod config;
pub mod error;
pub mod push;
pub mod session;

pub use config::{PushConfig, ReconnectPolicy};
pub use error::{ApiError, ConfigError, NotifyError, RefreshError};
pub use push::{ConnectionState, NotificationCenter, Ports};
pub use session::{Session, SessionSource, SessionStore, TokenPair};

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_filter` applies. Calling this
/// twice is harmless.
pub fn init_tracing(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
