//! REST collaborators of the push client.
//!
//! - `NotificationApi`: list notifications and persist read state
//! - `AuthApi`: exchange a refresh token for a new token pair
//!
//! [`HttpApiClient`] implements both over reqwest.

use async_trait::async_trait;

use crate::error::ApiError;
use crate::push::types::Notification;
use crate::session::TokenPair;

mod http;


pub use http::HttpApiClient;

/// Notification endpoints of the REST API.
#[async_trait]
pub trait NotificationApi: Send + Sync {
    /// `GET notifications`: full list, most recent first.
    async fn fetch_notifications(&self) -> Result<Vec<Notification>, ApiError>;

    /// `PATCH notifications/{id}/read`.
    async fn mark_read(&self, id: &str) -> Result<(), ApiError>;

    /// `PATCH notifications/read-all`.
    async fn mark_all_read(&self) -> Result<(), ApiError>;
}

/// Token refresh endpoint.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// `POST auth/refresh { refreshToken }`.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, ApiError>;
}
