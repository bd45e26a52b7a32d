//! Scripted REST API and recording ports.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use salon_push::api::{AuthApi, NotificationApi};
use salon_push::push::{
    CacheDomain, CacheInvalidationPort, ClickHandler, Notification, Notifier, PageVisibility,
    PermissionState, Ports, SystemNotifier, ToastVariant,
};
use salon_push::{ApiError, TokenPair};

/// Notification and auth API answering from in-memory state.
pub struct ScriptedApi {
    pub server_list: Mutex<Vec<Notification>>,
    pub fetches: AtomicUsize,
    pub mark_read_ids: Mutex<Vec<String>>,
    pub mark_all_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub refresh_tokens_seen: Mutex<Vec<String>>,
    pub fail_refresh: AtomicBool,
    refresh_gate: Semaphore,
}

impl ScriptedApi {
    pub fn new(server_list: Vec<Notification>) -> Arc<Self> {
        let api = Self::gated(server_list);
        api.release_refresh();
        api
    }

    /// Refresh requests block until [`ScriptedApi::release_refresh`].
    pub fn gated(server_list: Vec<Notification>) -> Arc<Self> {
        Arc::new(Self {
            server_list: Mutex::new(server_list),
            fetches: AtomicUsize::new(0),
            mark_read_ids: Mutex::new(Vec::new()),
            mark_all_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            refresh_tokens_seen: Mutex::new(Vec::new()),
            fail_refresh: AtomicBool::new(false),
            refresh_gate: Semaphore::new(0),
        })
    }

    pub fn release_refresh(&self) {
        self.refresh_gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }
}

#[async_trait]
impl NotificationApi for ScriptedApi {
    async fn fetch_notifications(&self) -> Result<Vec<Notification>, ApiError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.server_list.lock().unwrap().clone())
    }

    async fn mark_read(&self, id: &str) -> Result<(), ApiError> {
        self.mark_read_ids.lock().unwrap().push(id.to_string());
        Ok(())
    }

    async fn mark_all_read(&self) -> Result<(), ApiError> {
        self.mark_all_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl AuthApi for ScriptedApi {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, ApiError> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.refresh_tokens_seen
            .lock()
            .unwrap()
            .push(refresh_token.to_string());
        let _permit = self.refresh_gate.acquire().await.expect("gate closed");

        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(ApiError::Status {
                status: 401,
                message: "refresh token revoked".to_string(),
            });
        }
        Ok(TokenPair {
            access_token: format!("access-{n}"),
            refresh_token: format!("refresh-{n}"),
        })
    }
}

/// Records every cache invalidation and toast.
#[derive(Default)]
pub struct RecordingPorts {
    pub invalidations: Mutex<Vec<(CacheDomain, String)>>,
    pub toasts: Mutex<Vec<(String, ToastVariant)>>,
}

impl RecordingPorts {
    pub fn invalidations(&self) -> Vec<(CacheDomain, String)> {
        self.invalidations.lock().unwrap().clone()
    }

    pub fn toast_count(&self) -> usize {
        self.toasts.lock().unwrap().len()
    }
}

impl CacheInvalidationPort for RecordingPorts {
    fn invalidate(&self, domain: CacheDomain, scope_id: &str) {
        self.invalidations
            .lock()
            .unwrap()
            .push((domain, scope_id.to_string()));
    }
}

impl Notifier for RecordingPorts {
    fn show(&self, title: &str, _message: &str, variant: ToastVariant) {
        self.toasts.lock().unwrap().push((title.to_string(), variant));
    }
}

/// A system notifier with scriptable permission and page visibility.
pub struct FakeSystemNotifier {
    pub permission: Mutex<PermissionState>,
    pub page: Mutex<PageVisibility>,
    pub permission_requests: AtomicUsize,
    pub shown: Mutex<Vec<String>>,
}

impl FakeSystemNotifier {
    pub fn new(permission: PermissionState, page: PageVisibility) -> Arc<Self> {
        Arc::new(Self {
            permission: Mutex::new(permission),
            page: Mutex::new(page),
            permission_requests: AtomicUsize::new(0),
            shown: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl SystemNotifier for FakeSystemNotifier {
    fn is_supported(&self) -> bool {
        true
    }

    fn permission_state(&self) -> PermissionState {
        *self.permission.lock().unwrap()
    }

    async fn request_permission(&self) -> PermissionState {
        self.permission_requests.fetch_add(1, Ordering::SeqCst);
        *self.permission.lock().unwrap() = PermissionState::Granted;
        PermissionState::Granted
    }

    fn page_visibility(&self) -> PageVisibility {
        *self.page.lock().unwrap()
    }

    fn show(&self, title: &str, _body: &str, _on_click: ClickHandler) {
        self.shown.lock().unwrap().push(title.to_string());
    }
}

pub fn recording_ports(
    recorder: &Arc<RecordingPorts>,
    system: &Arc<FakeSystemNotifier>,
) -> Ports {
    Ports {
        cache: recorder.clone(),
        notifier: recorder.clone(),
        system: system.clone(),
    }
}
