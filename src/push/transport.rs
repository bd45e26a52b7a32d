//! Push transport: the persistent event stream and its listener plumbing.
//!
//! This module provides:
//! - `PushTransport` / `TransportFactory`: the seam the connection manager
//!   drives (open, subscribe, set auth, reconnect, close)
//! - `Listeners` / `Subscription` / `Disposer`: listener registration that
//!   returns an explicit disposer
//! - `SseDecoder`: incremental Server-Sent Events parsing across chunks
//! - `SseTransport`: reqwest implementation with its own reconnection policy

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::StreamExt;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, trace, warn};

use crate::config::{PushConfig, ReconnectPolicy};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Errors
// ============================================================================

/// Errors produced while establishing or reading the event stream.
#[derive(Debug, Clone)]
pub enum TransportError {
    /// The server rejected the handshake credentials.
    Unauthorized { status: u16, message: String },
    /// Non-auth HTTP failure.
    Http { status: u16, message: String },
    /// Could not reach the server.
    Connection(String),
    /// The stream broke after it was established.
    Stream(String),
    /// Configuration could not produce a client.
    Config(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Unauthorized { status, message } => {
                write!(f, "Unauthorized ({}): {}", status, message)
            }
            TransportError::Http { status, message } => {
                write!(f, "HTTP error {}: {}", status, message)
            }
            TransportError::Connection(msg) => write!(f, "Connection error: {}", msg),
            TransportError::Stream(msg) => write!(f, "Stream error: {}", msg),
            TransportError::Config(msg) => write!(f, "Transport config error: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

impl TransportError {
    /// Create a connection error from any error type.
    pub fn connection<E: fmt::Display>(err: E) -> Self {
        TransportError::Connection(err.to_string())
    }

    /// The transport stops reconnecting on its own after one of these.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, TransportError::Unauthorized { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Connection(_) | TransportError::Stream(_) | TransportError::Http { .. }
        )
    }
}

// ============================================================================
// Handshake and events
// ============================================================================

/// Authentication payload sent when the stream is opened.
#[derive(Clone, PartialEq, Eq)]
pub struct HandshakeAuth {
    /// Full header value, `Bearer <access token>`.
    pub token: String,
}

impl HandshakeAuth {
    pub fn bearer(access_token: &str) -> Self {
        Self {
            token: format!("Bearer {}", access_token),
        }
    }
}

impl fmt::Debug for HandshakeAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeAuth").field("token", &"<redacted>").finish()
    }
}

/// What a transport reports to its listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Disconnected { reason: String },
    /// A connection attempt failed. The message is what auth classification
    /// looks at.
    Error { message: String },
    /// A named server-to-client message.
    Message { event: String, data: String },
}

// ============================================================================
// Listener registration
// ============================================================================

type ListenerMap = Mutex<HashMap<u64, mpsc::UnboundedSender<TransportEvent>>>;

/// Registered listeners of one transport.
#[derive(Default)]
pub struct Listeners {
    map: Arc<ListenerMap>,
    next_id: AtomicU64,
}

/// A listener registration: the event receiver plus the disposer that
/// detaches it.
pub struct Subscription {
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
    pub disposer: Disposer,
}

/// Detaches a listener on `dispose()` or drop.
pub struct Disposer {
    id: u64,
    map: Weak<ListenerMap>,
}

impl Disposer {
    pub fn dispose(self) {}
}

impl Drop for Disposer {
    fn drop(&mut self) {
        if let Some(map) = self.map.upgrade() {
            lock(&map).remove(&self.id);
        }
    }
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.map).insert(id, tx);
        Subscription {
            events: rx,
            disposer: Disposer {
                id,
                map: Arc::downgrade(&self.map),
            },
        }
    }

    /// Deliver to every listener, pruning ones whose receiver is gone.
    pub fn emit(&self, event: TransportEvent) {
        let mut map = lock(&self.map);
        map.retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    pub fn clear(&self) {
        lock(&self.map).clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.map).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Transport trait
// ============================================================================

/// A persistent, authenticated event stream.
///
/// All methods are synchronous: they start or stop background work and
/// return. Outcomes are reported to subscribers as [`TransportEvent`]s.
pub trait PushTransport: Send + Sync {
    /// Start connecting. No-op if already running.
    fn open(&self);

    /// Register a listener.
    fn subscribe(&self) -> Subscription;

    /// Replace the handshake payload used for subsequent connection attempts.
    fn set_auth(&self, auth: HandshakeAuth);

    /// Drop any current connection or parked state and connect again.
    fn reconnect(&self);

    /// Stop all activity and detach every listener. Idempotent.
    fn close(&self);
}

/// Creates a transport bound to a handshake payload.
pub trait TransportFactory: Send + Sync {
    fn create(&self, auth: HandshakeAuth) -> Arc<dyn PushTransport>;
}

// ============================================================================
// SSE decoding
// ============================================================================

/// One decoded Server-Sent Event.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    /// Event name (`message` when the server sends none).
    pub event_type: String,
    pub data: String,
    pub id: Option<String>,
    /// Reconnection delay hint from the server, in milliseconds.
    pub retry: Option<u64>,
}

impl SseEvent {
    /// Parse one event block. Returns `None` for blocks without data, such
    /// as keepalive comments.
    pub fn parse(block: &str) -> Option<Self> {
        let mut event_type = "message".to_string();
        let mut data: Option<String> = None;
        let mut id = None;
        let mut retry = None;

        for line in block.lines() {
            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            let (key, value) = match line.split_once(':') {
                Some((key, value)) => (key, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };

            match key {
                "event" => event_type = value.to_string(),
                "data" => match data.as_mut() {
                    Some(existing) => {
                        existing.push('\n');
                        existing.push_str(value);
                    }
                    None => data = Some(value.to_string()),
                },
                "id" => id = Some(value.to_string()),
                "retry" => retry = value.parse::<u64>().ok(),
                _ => trace!("Unknown SSE field: {}", key),
            }
        }

        data.map(|data| Self {
            event_type,
            data,
            id,
            retry,
        })
    }
}

/// Incremental decoder: feed raw chunks, get complete events back.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some((end, next)) = find_block_end(&self.buffer) {
            let block = String::from_utf8_lossy(&self.buffer[..end]).into_owned();
            self.buffer.drain(..next);
            if let Some(event) = SseEvent::parse(&block) {
                events.push(event);
            }
        }
        events
    }
}

/// Position of the first blank line: (end of block, start of the next one).
fn find_block_end(buf: &[u8]) -> Option<(usize, usize)> {
    (0..buf.len()).find_map(|i| {
        let rest = &buf[i..];
        if rest.starts_with(b"\r\n\r\n") {
            Some((i, i + 4))
        } else if rest.starts_with(b"\n\n") || rest.starts_with(b"\r\r") {
            Some((i, i + 2))
        } else {
            None
        }
    })
}

// ============================================================================
// SSE transport
// ============================================================================

struct SseShared {
    client: reqwest::Client,
    url: String,
    auth: Mutex<HandshakeAuth>,
    listeners: Listeners,
    policy: ReconnectPolicy,
    last_event_id: Mutex<Option<String>>,
    server_retry: Mutex<Option<Duration>>,
}

/// Event stream over HTTP Server-Sent Events.
///
/// Non-auth failures are retried with exponential backoff and jitter. After an
/// auth rejection the driver stops until [`PushTransport::reconnect`] is
/// called, typically with fresh credentials.
pub struct SseTransport {
    shared: Arc<SseShared>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl SseTransport {
    pub fn new(
        client: reqwest::Client,
        url: impl Into<String>,
        auth: HandshakeAuth,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            shared: Arc::new(SseShared {
                client,
                url: url.into(),
                auth: Mutex::new(auth),
                listeners: Listeners::new(),
                policy,
                last_event_id: Mutex::new(None),
                server_retry: Mutex::new(None),
            }),
            driver: Mutex::new(None),
        }
    }

    fn spawn_driver(&self) {
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move { shared.drive().await });
        if let Some(previous) = lock(&self.driver).replace(handle) {
            previous.abort();
        }
    }
}

impl PushTransport for SseTransport {
    fn open(&self) {
        let running = lock(&self.driver)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished());
        if running {
            return;
        }
        info!("Opening event stream at {}", self.shared.url);
        self.spawn_driver();
    }

    fn subscribe(&self) -> Subscription {
        self.shared.listeners.subscribe()
    }

    fn set_auth(&self, auth: HandshakeAuth) {
        *lock(&self.shared.auth) = auth;
    }

    fn reconnect(&self) {
        debug!("Reconnect requested for {}", self.shared.url);
        self.spawn_driver();
    }

    fn close(&self) {
        if let Some(handle) = lock(&self.driver).take() {
            handle.abort();
            info!("Closed event stream at {}", self.shared.url);
        }
        self.shared.listeners.clear();
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.driver).take() {
            handle.abort();
        }
    }
}

impl SseShared {
    async fn drive(&self) {
        let mut attempt: u32 = 0;

        loop {
            match self.connect().await {
                Ok(response) => {
                    attempt = 0;
                    info!("Connected to event stream at {}", self.url);
                    self.listeners.emit(TransportEvent::Connected);

                    let reason = self.read_stream(response).await;
                    debug!("Event stream ended: {}", reason);
                    self.listeners.emit(TransportEvent::Disconnected { reason });
                }
                Err(e) if e.is_auth_rejection() => {
                    warn!("Event stream rejected credentials: {}", e);
                    self.listeners.emit(TransportEvent::Error {
                        message: e.to_string(),
                    });
                    return;
                }
                Err(e) => {
                    warn!("Event stream connection failed: {}", e);
                    self.listeners.emit(TransportEvent::Error {
                        message: e.to_string(),
                    });
                    if !e.is_retryable() {
                        return;
                    }
                }
            }

            if self.policy.exhausted(attempt) {
                warn!(
                    "Giving up on event stream after {} reconnection attempts",
                    attempt
                );
                return;
            }

            let delay = self.next_delay(attempt);
            debug!("Reconnecting in {:?} (attempt {})", delay, attempt + 1);
            sleep(delay).await;
            attempt += 1;
        }
    }

    fn next_delay(&self, attempt: u32) -> Duration {
        let base = self.policy.delay_for(attempt);
        let base = match *lock(&self.server_retry) {
            Some(hint) if hint > base => hint,
            _ => base,
        };
        with_jitter(base)
    }

    async fn connect(&self) -> Result<reqwest::Response, TransportError> {
        let token = lock(&self.auth).token.clone();
        let mut request = self
            .client
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .header(reqwest::header::AUTHORIZATION, token);

        let last_event_id = lock(&self.last_event_id).clone();
        if let Some(last_id) = last_event_id {
            request = request.header("Last-Event-ID", last_id);
        }

        let response = request.send().await.map_err(TransportError::connection)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(TransportError::Unauthorized {
                status: status.as_u16(),
                message,
            });
        }
        Err(TransportError::Http {
            status: status.as_u16(),
            message,
        })
    }

    /// Forward events until the stream ends. Returns the reason it ended.
    async fn read_stream(&self, response: reqwest::Response) -> String {
        let mut decoder = SseDecoder::new();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => return TransportError::Stream(e.to_string()).to_string(),
            };

            for event in decoder.push(&bytes) {
                if let Some(id) = &event.id {
                    *lock(&self.last_event_id) = Some(id.clone());
                }
                if let Some(ms) = event.retry {
                    *lock(&self.server_retry) = Some(Duration::from_millis(ms));
                }
                trace!("SSE event '{}' ({} bytes)", event.event_type, event.data.len());
                self.listeners.emit(TransportEvent::Message {
                    event: event.event_type,
                    data: event.data,
                });
            }
        }

        "server closed the stream".to_string()
    }
}

fn with_jitter(base: Duration) -> Duration {
    let max_jitter = (base.as_millis() as u64) / 4;
    if max_jitter == 0 {
        return base;
    }
    base + Duration::from_millis(rand::thread_rng().gen_range(0..=max_jitter))
}

/// Builds [`SseTransport`]s that share one HTTP client.
pub struct SseTransportFactory {
    client: reqwest::Client,
    url: String,
    policy: ReconnectPolicy,
}

impl SseTransportFactory {
    pub fn new(config: &PushConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.request_timeout())
            .pool_max_idle_per_host(1)
            .build()
            .map_err(|e| TransportError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: config.push_url.clone(),
            policy: config.reconnect.clone(),
        })
    }
}

impl TransportFactory for SseTransportFactory {
    fn create(&self, auth: HandshakeAuth) -> Arc<dyn PushTransport> {
        Arc::new(SseTransport::new(
            self.client.clone(),
            self.url.clone(),
            auth,
            self.policy.clone(),
        ))
    }
}

// ============================================================================
// Tests
// ============================================================================
