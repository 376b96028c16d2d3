//! EventSub WebSocket message decoding
//!
//! Every frame is an envelope `{metadata, payload}`. The `message_type` tag in
//! the metadata selects how the payload is decoded into [`ServerMessage`].

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Malformed message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed '{message_type}' payload: {source}")]
    Payload {
        message_type: String,
        source: serde_json::Error,
    },
}

/// Envelope metadata shared by all message kinds
#[derive(Debug, Clone, Deserialize)]
pub struct Metadata {
    pub message_id: String,
    pub message_type: String,
    #[serde(default)]
    pub message_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    metadata: Metadata,
    #[serde(default)]
    payload: Value,
}

/// Session description carried by welcome and reconnect messages
#[derive(Debug, Clone, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub keepalive_timeout_seconds: Option<u64>,
    #[serde(default)]
    pub reconnect_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionPayload {
    session: SessionInfo,
}

/// A subscription as echoed back by notification and revocation payloads
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionInfo {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub status: String,
}

/// The reward that was redeemed
#[derive(Debug, Clone, Deserialize)]
pub struct Reward {
    #[serde(default)]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub cost: u64,
}

/// `channel.channel_points_custom_reward_redemption.add` event body
#[derive(Debug, Clone, Deserialize)]
pub struct RedemptionEvent {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub user_input: String,
    pub reward: Reward,
}

#[derive(Debug, Deserialize)]
struct NotificationPayload {
    subscription: SubscriptionInfo,
    event: Value,
}

#[derive(Debug, Deserialize)]
struct RevocationPayload {
    subscription: SubscriptionInfo,
}

/// One decoded inbound message
#[derive(Debug, Clone)]
pub enum ServerMessage {
    Welcome(SessionInfo),
    Keepalive,
    Notification {
        subscription: SubscriptionInfo,
        event: Value,
    },
    Reconnect(SessionInfo),
    Revocation(SubscriptionInfo),
    /// A message type this client does not know about
    Unknown(String),
}

/// A decoded message together with its envelope metadata
#[derive(Debug, Clone)]
pub struct Frame {
    pub metadata: Metadata,
    pub message: ServerMessage,
}

impl Frame {
    /// Decode one text frame
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let Envelope { metadata, payload } = serde_json::from_str(text)?;

        let payload_err = |source: serde_json::Error| DecodeError::Payload {
            message_type: metadata.message_type.clone(),
            source,
        };

        let message = match metadata.message_type.as_str() {
            "session_welcome" => {
                let p: SessionPayload = serde_json::from_value(payload).map_err(payload_err)?;
                ServerMessage::Welcome(p.session)
            }
            "session_keepalive" => ServerMessage::Keepalive,
            "notification" => {
                let p: NotificationPayload =
                    serde_json::from_value(payload).map_err(payload_err)?;
                ServerMessage::Notification {
                    subscription: p.subscription,
                    event: p.event,
                }
            }
            "session_reconnect" => {
                let p: SessionPayload = serde_json::from_value(payload).map_err(payload_err)?;
                ServerMessage::Reconnect(p.session)
            }
            "revocation" => {
                let p: RevocationPayload = serde_json::from_value(payload).map_err(payload_err)?;
                ServerMessage::Revocation(p.subscription)
            }
            other => ServerMessage::Unknown(other.to_string()),
        };

        Ok(Self { metadata, message })
    }
}

impl SubscriptionInfo {
    /// Revocation statuses that mean the credential itself is no longer valid
    pub fn is_authorization_revoked(&self) -> bool {
        matches!(self.status.as_str(), "authorization_revoked" | "user_removed")
    }
}
