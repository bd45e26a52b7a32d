//! Session source: who is signed in and with which tokens.
//!
//! The push client only reads the session and reacts to its transitions. The
//! one write it performs is persisting a refreshed token pair.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

/// A signed-in user and their credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
}

impl Session {
    pub fn new(
        user_id: impl Into<String>,
        access_token: impl Into<String>,
        refresh_token: Option<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            access_token: access_token.into(),
            refresh_token,
        }
    }
}

/// Access/refresh token pair returned by the auth refresh endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Port to whatever owns the session (login screen, keychain, app state).
pub trait SessionSource: Send + Sync {
    /// The current session, if any.
    fn current(&self) -> Option<Session>;

    /// Persist a refreshed token pair if `user_id` is still the signed-in
    /// user. Returns whether the session was updated.
    fn store_tokens(&self, user_id: &str, tokens: &TokenPair) -> bool;

    /// Receiver that observes every session change.
    fn subscribe(&self) -> watch::Receiver<Option<Session>>;
}

/// In-memory session source backed by a `watch` channel.
pub struct SessionStore {
    tx: watch::Sender<Option<Session>>,
}

impl SessionStore {
    pub fn new(initial: Option<Session>) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    pub fn sign_in(&self, session: Session) {
        debug!("Session signed in for user {}", session.user_id);
        self.tx.send_replace(Some(session));
    }

    pub fn sign_out(&self) {
        debug!("Session signed out");
        self.tx.send_replace(None);
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(None)
    }
}

impl SessionSource for SessionStore {
    fn current(&self) -> Option<Session> {
        self.tx.borrow().clone()
    }

    fn store_tokens(&self, user_id: &str, tokens: &TokenPair) -> bool {
        self.tx.send_if_modified(|session| match session {
            Some(session) if session.user_id == user_id => {
                session.access_token = tokens.access_token.clone();
                session.refresh_token = Some(tokens.refresh_token.clone());
                true
            }
            // Signed out or switched user while the refresh was running.
            _ => false,
        })
    }

    fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.tx.subscribe()
    }
}
