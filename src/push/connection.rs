//! Lifecycle of the push connection for the active session.
//!
//! This module provides:
//! - `ConnectionManager`: opens and tears down the transport on session
//!   transitions, drives the event pump, resyncs on connect, and runs
//!   refresh-and-reconnect on auth-class errors
//! - `ConnectionState`: the observable state machine
//! - `AuthErrorClassifier`: decides which transport errors are auth failures

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::dispatcher::EventDispatcher;
use super::refresh::{SharedRefresh, TokenRefreshCoordinator};
use super::store::NotificationStore;
use super::transport::{Disposer, HandshakeAuth, PushTransport, TransportEvent, TransportFactory};
use super::types::PushEvent;
use crate::api::NotificationApi;
use crate::session::Session;

/// Markers that always classify a transport error as an auth failure.
pub const DEFAULT_AUTH_ERROR_MARKERS: &[&str] = &["jwt", "unauthorized"];

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No session, no transport.
    #[default]
    Idle,
    /// Transport opened or reconnecting, not yet confirmed.
    Connecting,
    Connected,
    /// An auth-class error was seen and a token refresh is running.
    Reauthenticating,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "idle"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reauthenticating => write!(f, "reauthenticating"),
        }
    }
}

// ============================================================================
// Auth error classification
// ============================================================================

/// Case-insensitive substring match against known auth-failure markers.
#[derive(Debug, Clone)]
pub struct AuthErrorClassifier {
    markers: Vec<String>,
}

impl Default for AuthErrorClassifier {
    fn default() -> Self {
        Self {
            markers: DEFAULT_AUTH_ERROR_MARKERS
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }
}

impl AuthErrorClassifier {
    /// Built-in markers plus `extra`.
    pub fn with_extra_markers<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut classifier = Self::default();
        for marker in extra {
            let marker = marker.as_ref().trim().to_lowercase();
            if !marker.is_empty() && !classifier.markers.contains(&marker) {
                classifier.markers.push(marker);
            }
        }
        classifier
    }

    pub fn is_auth_error(&self, message: &str) -> bool {
        let message = message.to_lowercase();
        self.markers.iter().any(|m| message.contains(m.as_str()))
    }
}

// ============================================================================
// Active connection
// ============================================================================

/// Admission gate for work done on behalf of one connection.
///
/// Closing waits for a running callback to finish, except when it is called
/// from inside that callback (a port shutting the center down), where it only
/// flips the flag.
#[derive(Default)]
struct Gate {
    open: AtomicBool,
    running: Mutex<()>,
    runner: Mutex<Option<ThreadId>>,
}

impl Gate {
    fn opened() -> Self {
        Self {
            open: AtomicBool::new(true),
            ..Self::default()
        }
    }

    fn run<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let _running = lock(&self.running);
        if !self.open.load(Ordering::SeqCst) {
            return None;
        }
        *lock(&self.runner) = Some(thread::current().id());
        let result = f();
        *lock(&self.runner) = None;
        Some(result)
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        if *lock(&self.runner) == Some(thread::current().id()) {
            return;
        }
        drop(lock(&self.running));
    }
}

/// Shared by the pump and the tasks it spawns. Work on behalf of a connection
/// only happens through [`ConnectionLink::with_open`].
struct ConnectionLink {
    id: Uuid,
    user_id: String,
    access_token: Mutex<String>,
    transport: Arc<dyn PushTransport>,
    gate: Gate,
}

impl ConnectionLink {
    /// Run `f` if the connection has not been torn down. Teardown waits for a
    /// running `f` to finish, and no `f` starts after it.
    fn with_open<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        self.gate.run(f)
    }

    fn close(&self) {
        self.gate.close();
    }

    fn access_token(&self) -> String {
        lock(&self.access_token).clone()
    }
}

struct ActiveConnection {
    link: Arc<ConnectionLink>,
    disposer: Disposer,
    pump: JoinHandle<()>,
}

impl ActiveConnection {
    fn teardown(self) {
        let ActiveConnection {
            link,
            disposer,
            pump,
        } = self;

        link.close();
        disposer.dispose();
        pump.abort();
        link.transport.close();
        info!("Tore down push connection {} for user {}", link.id, link.user_id);
    }
}

// ============================================================================
// Manager
// ============================================================================

struct ManagerInner {
    factory: Arc<dyn TransportFactory>,
    dispatcher: Arc<EventDispatcher>,
    store: Arc<NotificationStore>,
    api: Arc<dyn NotificationApi>,
    refresher: Arc<TokenRefreshCoordinator>,
    classifier: AuthErrorClassifier,
    state: watch::Sender<ConnectionState>,
    active: Mutex<Option<ActiveConnection>>,
}

/// Owns the one push connection of the current session.
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        dispatcher: Arc<EventDispatcher>,
        store: Arc<NotificationStore>,
        api: Arc<dyn NotificationApi>,
        refresher: Arc<TokenRefreshCoordinator>,
        classifier: AuthErrorClassifier,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            inner: Arc::new(ManagerInner {
                factory,
                dispatcher,
                store,
                api,
                refresher,
                classifier,
                state,
                active: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Replace the current connection with one for `session`.
    ///
    /// Any existing connection is torn down first. Unless the new session
    /// belongs to the same user, the notification store is cleared and any
    /// refresh started for the previous user is detached. With no session the
    /// manager goes idle.
    pub fn start(&self, session: Option<Session>) {
        let mut active = lock(&self.inner.active);
        let previous_user = active.take().map(|previous| {
            let user_id = previous.link.user_id.clone();
            previous.teardown();
            user_id
        });

        let same_user = matches!(
            (&previous_user, &session),
            (Some(prev), Some(next)) if *prev == next.user_id
        );
        if !same_user {
            self.inner.refresher.reset();
            self.inner.store.clear();
            self.inner.dispatcher.reset();
        }

        let Some(session) = session else {
            self.inner.set_state(ConnectionState::Idle);
            return;
        };

        let transport = self
            .inner
            .factory
            .create(HandshakeAuth::bearer(&session.access_token));
        let subscription = transport.subscribe();

        let link = Arc::new(ConnectionLink {
            id: Uuid::new_v4(),
            user_id: session.user_id.clone(),
            access_token: Mutex::new(session.access_token.clone()),
            transport: Arc::clone(&transport),
            gate: Gate::opened(),
        });

        self.inner.set_state(ConnectionState::Connecting);
        let pump = tokio::spawn(pump(
            Arc::clone(&self.inner),
            Arc::clone(&link),
            subscription.events,
        ));
        transport.open();

        info!("Opened push connection {} for user {}", link.id, link.user_id);
        *active = Some(ActiveConnection {
            link,
            disposer: subscription.disposer,
            pump,
        });
    }

    /// Tear down the current connection, if any. Idempotent.
    pub fn stop(&self) {
        if let Some(previous) = lock(&self.inner.active).take() {
            previous.teardown();
        }
        self.inner.set_state(ConnectionState::Idle);
    }

    /// React to a session change from the session source.
    ///
    /// Restarts on sign-in, sign-out, user change, or a foreign access token.
    /// Tokens this manager's own refresh produced are already being applied
    /// to the live connection and do not restart it.
    pub fn apply_session(&self, session: Option<Session>) {
        {
            let active = lock(&self.inner.active);
            if let (Some(current), Some(next)) = (active.as_ref(), session.as_ref()) {
                let same_user = current.link.user_id == next.user_id;
                let known_token = current.link.access_token() == next.access_token
                    || self.inner.refresher.issued(&next.access_token);
                if same_user && known_token {
                    trace!("Session update carries current credentials, keeping connection");
                    return;
                }
            }
            if active.is_none() && session.is_none() && self.state() == ConnectionState::Idle {
                self.inner.store.clear();
                return;
            }
        }
        self.start(session);
    }
}

impl ManagerInner {
    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            debug!("Push connection state {} -> {}", current, next);
            *current = next;
            true
        });
    }
}

async fn pump(
    inner: Arc<ManagerInner>,
    link: Arc<ConnectionLink>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        if link.with_open(|| handle_event(&inner, &link, event)).is_none() {
            break;
        }
    }
    trace!("Event pump for connection {} finished", link.id);
}

fn handle_event(inner: &Arc<ManagerInner>, link: &Arc<ConnectionLink>, event: TransportEvent) {
    match event {
        TransportEvent::Connected => {
            inner.set_state(ConnectionState::Connected);
            spawn_resync(inner, link);
        }
        TransportEvent::Disconnected { reason } => {
            debug!("Push connection {} dropped: {}", link.id, reason);
            inner.set_state(ConnectionState::Connecting);
        }
        TransportEvent::Error { message } => {
            if !inner.classifier.is_auth_error(&message) {
                warn!("Push connection error: {}", message);
                return;
            }
            if inner.refresher.is_in_flight() {
                debug!("Auth error while a refresh is in flight: {}", message);
                return;
            }
            info!("Push connection rejected credentials ({}), refreshing", message);
            inner.set_state(ConnectionState::Reauthenticating);
            let refresh = inner.refresher.refresh();
            spawn_reconnect_after_refresh(inner, link, refresh);
        }
        TransportEvent::Message { event, data } => match PushEvent::decode(&event, &data) {
            Ok(Some(push)) => inner.dispatcher.handle(push),
            Ok(None) => trace!("Ignoring push event '{}'", event),
            Err(e) => warn!("Malformed '{}' push payload: {}", event, e),
        },
    }
}

fn spawn_resync(inner: &Arc<ManagerInner>, link: &Arc<ConnectionLink>) {
    let marker = inner.store.begin_resync();
    let inner = Arc::clone(inner);
    let link = Arc::clone(link);

    tokio::spawn(async move {
        match inner.api.fetch_notifications().await {
            Ok(list) => {
                let count = list.len();
                if link
                    .with_open(|| inner.store.replace_with_snapshot(marker, list))
                    .is_some()
                {
                    debug!("Resynced {} notifications", count);
                }
            }
            Err(e) => warn!("Failed to resync notifications: {}", e),
        }
    });
}

fn spawn_reconnect_after_refresh(
    inner: &Arc<ManagerInner>,
    link: &Arc<ConnectionLink>,
    refresh: SharedRefresh,
) {
    let inner = Arc::clone(inner);
    let link = Arc::clone(link);

    tokio::spawn(async move {
        let outcome = refresh.await;
        link.with_open(|| match outcome {
            Ok(pair) => {
                *lock(&link.access_token) = pair.access_token.clone();
                link.transport
                    .set_auth(HandshakeAuth::bearer(&pair.access_token));
                inner.set_state(ConnectionState::Connecting);
                link.transport.reconnect();
                info!("Reconnecting push connection {} with refreshed token", link.id);
            }
            Err(e) => {
                warn!("Push connection stays on stale credentials: {}", e);
                inner.set_state(ConnectionState::Connected);
            }
        });
    });
}
