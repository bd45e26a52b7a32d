//! Outbound ports the dispatcher calls: cache invalidation, toasts, and OS
//! level notifications.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::types::{CacheDomain, ToastVariant};

/// Marks cached query results for a domain/scope as stale.
///
/// Called on the event pump. Implementations should return quickly; calling
/// `NotificationCenter::shutdown` from here is allowed and takes effect after
/// the current event.
pub trait CacheInvalidationPort: Send + Sync {
    fn invalidate(&self, domain: CacheDomain, scope_id: &str);
}

/// In-app toast surface. Called on the event pump, like
/// [`CacheInvalidationPort`].
pub trait Notifier: Send + Sync {
    fn show(&self, title: &str, message: &str, variant: ToastVariant);
}

/// Permission to show OS-level notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    /// The user has not been asked yet.
    #[default]
    Default,
    Granted,
    Denied,
}

impl fmt::Display for PermissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionState::Default => write!(f, "default"),
            PermissionState::Granted => write!(f, "granted"),
            PermissionState::Denied => write!(f, "denied"),
        }
    }
}

/// Whether the application window is on screen and has input focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageVisibility {
    pub visible: bool,
    pub focused: bool,
}

impl PageVisibility {
    pub fn foreground() -> Self {
        Self {
            visible: true,
            focused: true,
        }
    }

    pub fn background() -> Self {
        Self {
            visible: false,
            focused: false,
        }
    }
}

/// Called when the user clicks an OS notification.
pub type ClickHandler = Box<dyn FnOnce() + Send + 'static>;

/// OS-level notification capability.
#[async_trait]
pub trait SystemNotifier: Send + Sync {
    fn is_supported(&self) -> bool;

    fn permission_state(&self) -> PermissionState;

    /// Ask the user for permission. Returns the resulting state.
    async fn request_permission(&self) -> PermissionState;

    fn page_visibility(&self) -> PageVisibility;

    fn show(&self, title: &str, body: &str, on_click: ClickHandler);

    /// Bring the application window to the front.
    fn focus_app(&self) {}
}

/// OS notifications are shown only when supported, permitted, and the page is
/// not both visible and focused.
pub fn should_show_system_notification(
    supported: bool,
    permission: PermissionState,
    page: PageVisibility,
) -> bool {
    if !supported || permission != PermissionState::Granted {
        return false;
    }
    !(page.visible && page.focused)
}

// ============================================================================
// Logging implementations
// ============================================================================

/// Port implementations that only log. Used by the tail CLI and as a default
/// when the host has no UI surface.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingPorts;

impl CacheInvalidationPort for LoggingPorts {
    fn invalidate(&self, domain: CacheDomain, scope_id: &str) {
        info!("Invalidate {} for store {}", domain, scope_id);
    }
}

impl Notifier for LoggingPorts {
    fn show(&self, title: &str, message: &str, variant: ToastVariant) {
        info!("[{}] {}: {}", variant, title, message);
    }
}

/// A system notifier for hosts without OS notification support.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedSystemNotifier;

#[async_trait]
impl SystemNotifier for UnsupportedSystemNotifier {
    fn is_supported(&self) -> bool {
        false
    }

    fn permission_state(&self) -> PermissionState {
        PermissionState::Denied
    }

    async fn request_permission(&self) -> PermissionState {
        PermissionState::Denied
    }

    fn page_visibility(&self) -> PageVisibility {
        PageVisibility::foreground()
    }

    fn show(&self, _title: &str, _body: &str, _on_click: ClickHandler) {}
}
