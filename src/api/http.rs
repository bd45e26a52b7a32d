use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{AuthApi, NotificationApi};
use crate::config::PushConfig;
use crate::error::ApiError;
use crate::push::types::Notification;
use crate::session::{SessionSource, TokenPair};

/// reqwest client for the notification and auth REST routes.
///
/// Every notification call carries the session's current access token, read at
/// request time so a refreshed token is picked up without rebuilding the
/// client.
pub struct HttpApiClient {
    client: reqwest::Client,
    base_url: String,
    session: Arc<dyn SessionSource>,
}

/// `GET notifications` is served either as a bare array or wrapped in `data`.
#[derive(Deserialize)]
#[serde(untagged)]
enum NotificationListBody {
    Bare(Vec<Notification>),
    Wrapped { data: Vec<Notification> },
}

impl From<NotificationListBody> for Vec<Notification> {
    fn from(value: NotificationListBody) -> Self {
        match value {
            NotificationListBody::Bare(list) | NotificationListBody::Wrapped { data: list } => list,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

impl HttpApiClient {
    pub fn new(config: &PushConfig, session: Arc<dyn SessionSource>) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ApiError::Request(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.api_base().to_string(),
            session,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn bearer(&self) -> Result<String, ApiError> {
        self.session
            .current()
            .map(|s| format!("Bearer {}", s.access_token))
            .ok_or(ApiError::Unauthenticated)
    }

    async fn send_authorized(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ApiError> {
        let response = request
            .header(reqwest::header::AUTHORIZATION, self.bearer()?)
            .send()
            .await?;
        check_status(response).await
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    Err(ApiError::Status { status, message })
}

#[async_trait]
impl NotificationApi for HttpApiClient {
    async fn fetch_notifications(&self) -> Result<Vec<Notification>, ApiError> {
        let url = self.url("notifications");
        trace!("GET {}", url);

        let response = self.send_authorized(self.client.get(&url)).await?;
        let body: NotificationListBody = response.json().await?;
        let list: Vec<Notification> = body.into();

        debug!("Fetched {} notifications", list.len());
        Ok(list)
    }

    async fn mark_read(&self, id: &str) -> Result<(), ApiError> {
        let url = self.url(&format!("notifications/{}/read", urlencoding::encode(id)));
        trace!("PATCH {}", url);

        self.send_authorized(self.client.patch(&url)).await?;
        Ok(())
    }

    async fn mark_all_read(&self) -> Result<(), ApiError> {
        let url = self.url("notifications/read-all");
        trace!("PATCH {}", url);

        self.send_authorized(self.client.patch(&url)).await?;
        Ok(())
    }
}

#[async_trait]
impl AuthApi for HttpApiClient {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, ApiError> {
        let url = self.url("auth/refresh");
        trace!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;
        let response = check_status(response).await?;

        let pair: TokenPair = response.json().await?;
        Ok(pair)
    }
}
