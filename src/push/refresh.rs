//! Single-flight token refresh.
//!
//! The first caller starts the refresh; callers arriving while it runs get a
//! clone of the same shared future. The operation is driven on its own task,
//! so it runs to completion even if every caller drops its handle, and the
//! slot is cleared only once it has finished.
//!
//! A refresh belongs to the session it was started for. [`TokenRefreshCoordinator::reset`]
//! detaches it when the session changes; its result is then discarded instead
//! of being written to whoever is signed in by the time it completes.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tracing::{debug, info, warn};

use crate::api::AuthApi;
use crate::error::RefreshError;
use crate::session::{Session, SessionSource, TokenPair};

pub type RefreshOutcome = Result<TokenPair, RefreshError>;

/// Handle to an in-flight refresh. Await it for the outcome.
pub type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

#[derive(Default)]
struct RefreshSlot {
    in_flight: Option<SharedRefresh>,
    generation: u64,
    last_issued: Option<String>,
}

pub struct TokenRefreshCoordinator {
    session: Arc<dyn SessionSource>,
    auth: Arc<dyn AuthApi>,
    slot: Arc<Mutex<RefreshSlot>>,
}

fn lock(slot: &Mutex<RefreshSlot>) -> MutexGuard<'_, RefreshSlot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TokenRefreshCoordinator {
    pub fn new(session: Arc<dyn SessionSource>, auth: Arc<dyn AuthApi>) -> Self {
        Self {
            session,
            auth,
            slot: Arc::new(Mutex::new(RefreshSlot::default())),
        }
    }

    pub fn is_in_flight(&self) -> bool {
        lock(&self.slot).in_flight.is_some()
    }

    /// Whether `access_token` came from a refresh this coordinator performed.
    pub fn issued(&self, access_token: &str) -> bool {
        lock(&self.slot).last_issued.as_deref() == Some(access_token)
    }

    /// Forget the in-flight refresh and the last issued token.
    ///
    /// A refresh still running keeps going but its result is not persisted,
    /// and the next [`refresh`](Self::refresh) starts a new request.
    pub fn reset(&self) {
        let mut slot = lock(&self.slot);
        slot.generation += 1;
        if slot.in_flight.take().is_some() {
            debug!("Detached in-flight token refresh from the previous session");
        }
        slot.last_issued = None;
    }

    /// Join the in-flight refresh or start a new one for the current session.
    ///
    /// Must be called from within a tokio runtime.
    pub fn refresh(&self) -> SharedRefresh {
        let mut slot = lock(&self.slot);
        if let Some(existing) = &slot.in_flight {
            debug!("Token refresh already in flight, joining it");
            return existing.clone();
        }

        slot.generation += 1;
        let generation = slot.generation;

        let origin = self.session.current();
        let session = Arc::clone(&self.session);
        let auth = Arc::clone(&self.auth);
        let shared_slot = Arc::clone(&self.slot);

        let operation = async move {
            let outcome = match run_refresh(origin.as_ref(), auth.as_ref()).await {
                Ok((user_id, pair)) => {
                    persist(session.as_ref(), &shared_slot, generation, &user_id, pair)
                }
                Err(e) => Err(e),
            };

            match &outcome {
                Ok(_) => info!("Access token refreshed"),
                Err(e) => warn!("Token refresh failed: {}", e),
            }

            let mut slot = lock(&shared_slot);
            if slot.generation == generation {
                slot.in_flight = None;
            }
            outcome
        }
        .boxed()
        .shared();

        slot.in_flight = Some(operation.clone());
        drop(slot);

        tokio::spawn(operation.clone());
        operation
    }
}

/// Exchange the refresh token of `origin`. Returns the user it belongs to.
async fn run_refresh(
    origin: Option<&Session>,
    auth: &dyn AuthApi,
) -> Result<(String, TokenPair), RefreshError> {
    let (user_id, refresh_token) = origin
        .and_then(|s| {
            s.refresh_token
                .as_deref()
                .filter(|t| !t.is_empty())
                .map(|t| (s.user_id.clone(), t.to_string()))
        })
        .ok_or(RefreshError::MissingRefreshToken)?;

    debug!("Requesting token refresh for user {}", user_id);
    let pair = auth.refresh(&refresh_token).await?;
    Ok((user_id, pair))
}

/// Write `pair` back if the refresh still belongs to the signed-in session.
fn persist(
    session: &dyn SessionSource,
    slot: &Mutex<RefreshSlot>,
    generation: u64,
    user_id: &str,
    pair: TokenPair,
) -> RefreshOutcome {
    {
        let mut slot = lock(slot);
        if slot.generation != generation {
            return Err(RefreshError::SessionChanged);
        }
        // Record before persisting so the session echo is recognized.
        slot.last_issued = Some(pair.access_token.clone());
    }

    if !session.store_tokens(user_id, &pair) {
        let mut slot = lock(slot);
        if slot.last_issued.as_deref() == Some(pair.access_token.as_str()) {
            slot.last_issued = None;
        }
        return Err(RefreshError::SessionChanged);
    }
    Ok(pair)
}
