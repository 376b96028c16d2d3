//! Helix API calls used by the EventSub session
//!
//! Only two calls are needed: resolving the channel login to its numeric id
//! and creating the redemption subscription for a WebSocket session.

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::Credentials;

pub const HELIX_BASE_URL: &str = "https://api.twitch.tv/helix";

/// Subscription type for channel-point reward redemptions
pub const REDEMPTION_SUBSCRIPTION: &str = "channel.channel_points_custom_reward_redemption.add";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ApiError {
    /// 401/403: the token or client id is no longer accepted
    #[error("Authorization rejected ({status}): {body}")]
    Unauthorized { status: StatusCode, body: String },

    #[error("Unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("Channel '{0}' not found")]
    ChannelNotFound(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl ApiError {
    pub fn is_authorization(&self) -> bool {
        matches!(self, ApiError::Unauthorized { .. })
    }
}

/// Body of `POST /eventsub/subscriptions`
#[derive(Debug, Serialize)]
struct CreateSubscriptionRequest<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    version: &'a str,
    condition: Condition<'a>,
    transport: Transport<'a>,
}

#[derive(Debug, Serialize)]
struct Condition<'a> {
    broadcaster_user_id: &'a str,
}

#[derive(Debug, Serialize)]
struct Transport<'a> {
    method: &'a str,
    session_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct UsersResponse {
    data: Vec<User>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: String,
}

/// Helix client bound to one set of credentials
#[derive(Clone)]
pub struct HelixClient {
    client: Client,
    base_url: String,
    client_id: String,
    token: String,
}

impl HelixClient {
    pub fn with_base_url(credentials: &Credentials, base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id: credentials.client_id.clone(),
            token: credentials.oauth_token.clone(),
        }
    }

    /// Resolve a channel login name to its numeric broadcaster id
    pub async fn broadcaster_id(&self, login: &str) -> Result<String, ApiError> {
        let response = self
            .client
            .get(format!("{}/users", self.base_url))
            .query(&[("login", login)])
            .header("Client-ID", &self.client_id)
            .bearer_auth(&self.token)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let response = check_status(response, StatusCode::OK).await?;
        let users: UsersResponse = response.json().await?;
        let id = users
            .data
            .into_iter()
            .next()
            .map(|user| user.id)
            .ok_or_else(|| ApiError::ChannelNotFound(login.to_string()))?;

        info!("Got broadcaster id {} for channel '{}'", id, login);
        Ok(id)
    }

    /// Subscribe the WebSocket session to reward redemptions on a channel
    pub async fn subscribe_redemptions(
        &self,
        broadcaster_id: &str,
        session_id: &str,
    ) -> Result<(), ApiError> {
        let body = redemption_subscription(broadcaster_id, session_id);

        let response = self
            .client
            .post(format!("{}/eventsub/subscriptions", self.base_url))
            .header("Client-ID", &self.client_id)
            .bearer_auth(&self.token)
            .json(&body)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        check_status(response, StatusCode::ACCEPTED).await?;
        debug!("Subscription accepted for session {}", session_id);
        Ok(())
    }
}

fn redemption_subscription<'a>(
    broadcaster_id: &'a str,
    session_id: &'a str,
) -> CreateSubscriptionRequest<'a> {
    CreateSubscriptionRequest {
        kind: REDEMPTION_SUBSCRIPTION,
        version: "1",
        condition: Condition {
            broadcaster_user_id: broadcaster_id,
        },
        transport: Transport {
            method: "websocket",
            session_id,
        },
    }
}

async fn check_status(
    response: reqwest::Response,
    expected: StatusCode,
) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status == expected {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        Err(ApiError::Unauthorized { status, body })
    } else {
        Err(ApiError::Status { status, body })
    }
}
