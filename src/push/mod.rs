//! Real-time notification client for the salon management API.
//!
//! This module provides:
//! - `transport`: the push transport abstraction and its SSE implementation
//! - `connection`: connection lifecycle, resync on connect, reauthentication
//! - `refresh`: single-flight access token refresh
//! - `store`: the per-session notification list
//! - `dispatcher`: routing of pushed events to the store and the host ports
//! - `ports`: host surfaces (cache invalidation, toasts, OS notifications)
//! - `center`: the `NotificationCenter` that wires it all together

pub mod center;
pub mod connection;
pub mod dispatcher;
pub mod ports;
pub mod refresh;
pub mod store;
pub mod transport;
pub mod types;

pub use center::{NotificationCenter, Ports};
pub use connection::{AuthErrorClassifier, ConnectionManager, ConnectionState};
pub use dispatcher::EventDispatcher;
pub use ports::{
    CacheInvalidationPort, ClickHandler, LoggingPorts, Notifier, PageVisibility, PermissionState,
    SystemNotifier, UnsupportedSystemNotifier,
};
pub use refresh::TokenRefreshCoordinator;
pub use store::{InsertOutcome, NotificationStore};
pub use transport::{
    HandshakeAuth, PushTransport, SseTransport, SseTransportFactory, TransportError,
    TransportEvent, TransportFactory,
};
pub use types::{ActivityEvent, CacheDomain, Notification, PushEvent, ToastVariant};
