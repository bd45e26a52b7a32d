//! Top-level entry point that wires the push client together.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::connection::{AuthErrorClassifier, ConnectionManager, ConnectionState};
use super::dispatcher::EventDispatcher;
use super::ports::{
    CacheInvalidationPort, LoggingPorts, Notifier, PermissionState, SystemNotifier,
    UnsupportedSystemNotifier,
};
use super::refresh::TokenRefreshCoordinator;
use super::store::NotificationStore;
use super::transport::{SseTransportFactory, TransportFactory};
use super::types::{ActivityEvent, Notification};
use crate::api::{AuthApi, HttpApiClient, NotificationApi};
use crate::config::PushConfig;
use crate::error::NotifyError;
use crate::session::SessionSource;

/// Host-provided surfaces the push client reports to.
#[derive(Clone)]
pub struct Ports {
    pub cache: Arc<dyn CacheInvalidationPort>,
    pub notifier: Arc<dyn Notifier>,
    pub system: Arc<dyn SystemNotifier>,
}

impl Ports {
    /// Ports that only log, for hosts without a UI.
    pub fn logging() -> Self {
        Self {
            cache: Arc::new(LoggingPorts),
            notifier: Arc::new(LoggingPorts),
            system: Arc::new(UnsupportedSystemNotifier),
        }
    }
}

/// Keeps the notification list and activity feed of the signed-in user live.
///
/// Follows the session source: connects on sign-in, switches connection on a
/// user or token change, and clears everything on sign-out.
pub struct NotificationCenter {
    session: Arc<dyn SessionSource>,
    store: Arc<NotificationStore>,
    dispatcher: Arc<EventDispatcher>,
    manager: ConnectionManager,
    system: Arc<dyn SystemNotifier>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationCenter {
    /// Build a center talking to the configured REST API and event stream.
    pub fn new(
        config: &PushConfig,
        session: Arc<dyn SessionSource>,
        ports: Ports,
    ) -> Result<Self, NotifyError> {
        config.validate()?;
        let client = Arc::new(HttpApiClient::new(config, Arc::clone(&session))?);
        let factory = Arc::new(SseTransportFactory::new(config)?);
        Ok(Self::with_components(
            config,
            session,
            client.clone(),
            client,
            factory,
            ports,
        ))
    }

    /// Build a center from explicit collaborators.
    pub fn with_components(
        config: &PushConfig,
        session: Arc<dyn SessionSource>,
        notification_api: Arc<dyn NotificationApi>,
        auth_api: Arc<dyn AuthApi>,
        factory: Arc<dyn TransportFactory>,
        ports: Ports,
    ) -> Self {
        let store = Arc::new(NotificationStore::new(
            Arc::clone(&notification_api),
            config.max_notifications,
        ));
        let dispatcher = Arc::new(
            EventDispatcher::new(
                Arc::clone(&store),
                ports.cache,
                ports.notifier,
                Arc::clone(&ports.system),
            )
            .with_activity_cap(config.activity_buffer_size),
        );
        let refresher = Arc::new(TokenRefreshCoordinator::new(Arc::clone(&session), auth_api));
        let manager = ConnectionManager::new(
            factory,
            Arc::clone(&dispatcher),
            Arc::clone(&store),
            notification_api,
            refresher,
            AuthErrorClassifier::with_extra_markers(&config.auth_error_markers),
        );

        Self {
            session,
            store,
            dispatcher,
            manager,
            system: ports.system,
            supervisor: Mutex::new(None),
        }
    }

    /// Start following the session source. Calling it again is a no-op.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut supervisor = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if supervisor.is_some() {
            debug!("Notification center already started");
            return;
        }

        let mut sessions = self.session.subscribe();
        let initial = sessions.borrow_and_update().clone();
        self.manager.apply_session(initial);

        let manager = self.manager.clone();
        *supervisor = Some(tokio::spawn(async move {
            while sessions.changed().await.is_ok() {
                let next = sessions.borrow_and_update().clone();
                manager.apply_session(next);
            }
            debug!("Session source closed, stopping push connection");
            manager.stop();
        }));

        if self.system.is_supported() && self.system.permission_state() == PermissionState::Default
        {
            let system = Arc::clone(&self.system);
            tokio::spawn(async move {
                let state = system.request_permission().await;
                info!("System notification permission: {}", state);
            });
        }
    }

    /// Stop following the session and close the connection.
    pub fn shutdown(&self) {
        if let Some(handle) = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        self.manager.stop();
        info!("Notification center shut down");
    }

    /// Notifications, most recent first.
    pub fn notifications(&self) -> Vec<Notification> {
        self.store.snapshot()
    }

    pub fn unread_count(&self) -> usize {
        self.store.unread_count()
    }

    pub fn latest_notification(&self) -> Option<Notification> {
        self.dispatcher.latest_notification()
    }

    pub fn latest_activity(&self) -> Option<ActivityEvent> {
        self.dispatcher.latest_activity()
    }

    pub fn recent_activities(&self) -> Vec<ActivityEvent> {
        self.dispatcher.recent_activities()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.manager.watch_state()
    }

    /// Mark one notification read once the server confirms it.
    pub async fn mark_as_read(&self, id: &str) {
        self.store.mark_as_read(id).await;
    }

    /// Mark every notification read once the server confirms it.
    pub async fn mark_all_as_read(&self) {
        self.store.mark_all_as_read().await;
    }
}

impl Drop for NotificationCenter {
    fn drop(&mut self) {
        if let Some(handle) = self
            .supervisor
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
            self.manager.stop();
        }
    }
}
