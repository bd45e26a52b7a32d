//! Mock push transport for driving the connection manager by hand.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use salon_push::push::transport::{Listeners, Subscription};
use salon_push::push::{HandshakeAuth, PushTransport, TransportEvent, TransportFactory};

/// A transport whose events are emitted by the test.
pub struct MockTransport {
    listeners: Listeners,
    auth: Mutex<String>,
    auto_connect: bool,
    pub opens: AtomicUsize,
    pub reconnects: AtomicUsize,
    pub closes: AtomicUsize,
    closed: AtomicBool,
}

impl MockTransport {
    fn new(auth: HandshakeAuth, auto_connect: bool) -> Self {
        Self {
            listeners: Listeners::new(),
            auth: Mutex::new(auth.token),
            auto_connect,
            opens: AtomicUsize::new(0),
            reconnects: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Deliver an event to every attached listener.
    pub fn emit(&self, event: TransportEvent) {
        self.listeners.emit(event);
    }

    pub fn emit_error(&self, message: &str) {
        self.emit(TransportEvent::Error {
            message: message.to_string(),
        });
    }

    pub fn emit_message(&self, event: &str, data: impl Into<String>) {
        self.emit(TransportEvent::Message {
            event: event.to_string(),
            data: data.into(),
        });
    }

    /// The current handshake token, e.g. `"Bearer abc"`.
    pub fn auth_token(&self) -> String {
        self.auth.lock().unwrap().clone()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl PushTransport for MockTransport {
    fn open(&self) {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.auto_connect {
            self.emit(TransportEvent::Connected);
        }
    }

    fn subscribe(&self) -> Subscription {
        self.listeners.subscribe()
    }

    fn set_auth(&self, auth: HandshakeAuth) {
        *self.auth.lock().unwrap() = auth.token;
    }

    fn reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        if self.auto_connect {
            self.emit(TransportEvent::Connected);
        }
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        self.listeners.clear();
    }
}

/// Creates [`MockTransport`]s and keeps every one it created.
pub struct MockTransportFactory {
    created: Mutex<Vec<Arc<MockTransport>>>,
    auto_connect: bool,
}

impl MockTransportFactory {
    /// Transports confirm the connection as soon as they are opened.
    pub fn new() -> Self {
        Self {
            created: Mutex::new(Vec::new()),
            auto_connect: true,
        }
    }

    /// Transports stay silent until the test emits `Connected`.
    pub fn manual() -> Self {
        Self {
            created: Mutex::new(Vec::new()),
            auto_connect: false,
        }
    }

    pub fn created(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn latest(&self) -> Arc<MockTransport> {
        self.created
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no transport created yet")
    }

    pub fn nth(&self, index: usize) -> Arc<MockTransport> {
        self.created.lock().unwrap()[index].clone()
    }
}

impl TransportFactory for MockTransportFactory {
    fn create(&self, auth: HandshakeAuth) -> Arc<dyn PushTransport> {
        let transport = Arc::new(MockTransport::new(auth, self.auto_connect));
        self.created.lock().unwrap().push(transport.clone());
        transport
    }
}
