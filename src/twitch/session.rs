//! EventSub WebSocket session driver
//!
//! One call to [`Connector::serve`] is one connection: wait for the welcome,
//! subscribe that session to reward redemptions, then hand every redemption
//! notification to the event handler until the connection ends.

use futures::{SinkExt, StreamExt};
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::Credentials;

use super::api::{ApiError, HelixClient, REDEMPTION_SUBSCRIPTION};
use super::messages::{DecodeError, Frame, RedemptionEvent, ServerMessage, SubscriptionInfo};

pub const EVENTSUB_URL: &str = "wss://eventsub.wss.twitch.tv/ws";

/// Close codes after which reconnecting with the same token is pointless
const AUTH_CLOSE_CODES: &[u16] = &[4001, 4003];

/// How long to wait for the welcome before the server told us its keepalive
const WELCOME_TIMEOUT: Duration = Duration::from_secs(10);

/// Slack on top of the advertised keepalive window
const KEEPALIVE_GRACE: Duration = Duration::from_secs(5);

/// How many message ids to remember for duplicate suppression
const RECENT_ID_CAPACITY: usize = 256;

/// Outcome of the subscription request for the current session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SubscriptionStatus {
    #[default]
    Pending,
    Confirmed,
    Failed,
}

/// Per-connection state, discarded when the connection ends
#[derive(Debug, Default)]
pub struct SessionState {
    pub session_id: Option<String>,
    pub subscription: SubscriptionStatus,
}

/// Ways a connection ends without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The cancellation token fired
    Cancelled,
    /// The server asked us to move to a new connection
    ReconnectRequested,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to connect: {0}")]
    Connect(#[source] tungstenite::Error),

    #[error("WebSocket error: {0}")]
    Transport(#[source] tungstenite::Error),

    #[error("Connection lost")]
    ConnectionLost,

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("No message within {0:?}")]
    KeepaliveTimeout(Duration),

    #[error("Subscription failed: {0}")]
    Subscription(#[source] ApiError),

    #[error("Connection closed by server ({code}): {reason}")]
    ClosedByRemote { code: u16, reason: String },

    #[error("Authorization failed ({code}): {reason}")]
    Unauthorized { code: u16, reason: String },

    #[error("Subscription {} revoked: {}", .0.kind, .0.status)]
    Revoked(SubscriptionInfo),
}

impl SessionError {
    /// Faults that mean the credential itself was rejected
    pub fn is_authorization(&self) -> bool {
        match self {
            SessionError::Unauthorized { .. } => true,
            SessionError::Subscription(e) => e.is_authorization(),
            SessionError::Revoked(subscription) => subscription.is_authorization_revoked(),
            _ => false,
        }
    }
}

/// Something that can run one connection attempt
pub trait Connector: Send {
    fn serve(
        &mut self,
        state: &mut SessionState,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<SessionEnd, SessionError>> + Send;
}

/// Bounded set of recently seen message ids
#[derive(Debug)]
struct RecentIds {
    seen: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl RecentIds {
    fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns false if `id` was already seen
    fn insert(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        self.seen.insert(id.to_string());
        self.order.push_back(id.to_string());
        if self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
        true
    }
}

/// Live EventSub connection for one channel
pub struct EventSubSession<H> {
    url: String,
    channel_name: String,
    api: HelixClient,
    handler: H,
    broadcaster_id: Option<String>,
    recent_ids: RecentIds,
}

impl<H> EventSubSession<H>
where
    H: FnMut(RedemptionEvent) + Send,
{
    pub fn with_endpoints(
        credentials: &Credentials,
        url: &str,
        api: HelixClient,
        handler: H,
    ) -> Self {
        Self {
            url: url.to_string(),
            channel_name: credentials.channel_name.clone(),
            api,
            handler,
            broadcaster_id: None,
            // Kept across connections: duplicates show up right after reconnects
            recent_ids: RecentIds::new(RECENT_ID_CAPACITY),
        }
    }

    async fn subscribe(&mut self, session_id: &str) -> Result<(), ApiError> {
        let broadcaster_id = match &self.broadcaster_id {
            Some(id) => id.clone(),
            None => {
                let id = self.api.broadcaster_id(&self.channel_name).await?;
                self.broadcaster_id = Some(id.clone());
                id
            }
        };
        self.api.subscribe_redemptions(&broadcaster_id, session_id).await
    }

    fn notify(&mut self, kind: &str, event: serde_json::Value) {
        if kind != REDEMPTION_SUBSCRIPTION {
            debug!("Ignoring notification for subscription type '{}'", kind);
            return;
        }
        match serde_json::from_value::<RedemptionEvent>(event) {
            Ok(event) => (self.handler)(event),
            Err(e) => warn!("Could not read redemption event: {}", e),
        }
    }
}

impl<H> Connector for EventSubSession<H>
where
    H: FnMut(RedemptionEvent) + Send,
{
    async fn serve(
        &mut self,
        state: &mut SessionState,
        cancel: &CancellationToken,
    ) -> Result<SessionEnd, SessionError> {
        let (mut socket, _response) = tokio::select! {
            _ = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
            connected = tokio_tungstenite::connect_async(self.url.as_str()) => {
                connected.map_err(SessionError::Connect)?
            }
        };
        info!("Connected to EventSub WebSocket.");

        let mut read_timeout = WELCOME_TIMEOUT;

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = socket.close(None).await;
                    info!("EventSub listener cancelled.");
                    return Ok(SessionEnd::Cancelled);
                }
                next = tokio::time::timeout(read_timeout, socket.next()) => next,
            };

            let message = match next {
                Err(_) => return Err(SessionError::KeepaliveTimeout(read_timeout)),
                Ok(None) => return Err(SessionError::ConnectionLost),
                Ok(Some(Err(e))) => return Err(SessionError::Transport(e)),
                Ok(Some(Ok(message))) => message,
            };

            let text = match message {
                Message::Text(text) => text,
                Message::Close(frame) => return Err(close_error(frame)),
                _ => continue,
            };

            let frame = Frame::decode(&text)?;
            if !self.recent_ids.insert(&frame.metadata.message_id) {
                debug!("Dropping duplicate message {}", frame.metadata.message_id);
                continue;
            }

            match frame.message {
                ServerMessage::Welcome(session) => {
                    if state.session_id.is_some() {
                        warn!("Ignoring second welcome on the same connection");
                        continue;
                    }
                    info!("Session established: {}", session.id);
                    if let Some(secs) = session.keepalive_timeout_seconds {
                        read_timeout = Duration::from_secs(secs) + KEEPALIVE_GRACE;
                    }
                    state.session_id = Some(session.id.clone());

                    let subscribed = tokio::select! {
                        _ = cancel.cancelled() => {
                            let _ = socket.close(None).await;
                            return Ok(SessionEnd::Cancelled);
                        }
                        subscribed = self.subscribe(&session.id) => subscribed,
                    };
                    if let Err(e) = subscribed {
                        state.subscription = SubscriptionStatus::Failed;
                        error!("Failed to create EventSub subscription: {}", e);
                        let _ = socket.close(None).await;
                        return Err(SessionError::Subscription(e));
                    }
                    state.subscription = SubscriptionStatus::Confirmed;
                    info!("Successfully created EventSub subscription.");
                }
                ServerMessage::Keepalive => trace!("Keepalive"),
                ServerMessage::Notification { subscription, event } => {
                    self.notify(&subscription.kind, event);
                }
                ServerMessage::Reconnect(session) => {
                    warn!(
                        "Reconnect message received (new url: {}). Restarting connection...",
                        session.reconnect_url.as_deref().unwrap_or("none")
                    );
                    let _ = socket.close(None).await;
                    return Ok(SessionEnd::ReconnectRequested);
                }
                ServerMessage::Revocation(subscription) => {
                    warn!(
                        "Subscription {} revoked: {}",
                        subscription.kind, subscription.status
                    );
                    let _ = socket.close(None).await;
                    return Err(SessionError::Revoked(subscription));
                }
                ServerMessage::Unknown(message_type) => {
                    warn!("Ignoring unknown message type '{}'", message_type);
                }
            }
        }
    }
}

fn close_error(frame: Option<CloseFrame<'_>>) -> SessionError {
    let Some(frame) = frame else {
        return SessionError::ConnectionLost;
    };
    let code = u16::from(frame.code);
    let reason = frame.reason.to_string();
    if AUTH_CLOSE_CODES.contains(&code) {
        SessionError::Unauthorized { code, reason }
    } else {
        SessionError::ClosedByRemote { code, reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::twitch::api::HELIX_BASE_URL;
    use futures::{SinkExt, StreamExt};
    use reqwest::StatusCode;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::Message;

    fn close(code: u16, reason: &'static str) -> Option<CloseFrame<'static>> {
        Some(CloseFrame {
            code: CloseCode::from(code),
            reason: reason.into(),
        })
    }

    #[test]
    fn test_auth_close_codes_are_fatal() {
        assert!(close_error(close(4001, "Client sent inbound traffic")).is_authorization());
        assert!(close_error(close(4003, "Connection unused")).is_authorization());
    }

    #[test]
    fn test_other_close_codes_are_transient() {
        let err = close_error(close(4007, "Invalid reconnect"));
        assert!(matches!(err, SessionError::ClosedByRemote { code: 4007, .. }));
        assert!(!err.is_authorization());
        assert!(!close_error(None).is_authorization());
    }

    #[test]
    fn test_subscription_errors_classified() {
        let rejected = SessionError::Subscription(ApiError::Status {
            status: StatusCode::BAD_REQUEST,
            body: String::new(),
        });
        let unauthorized = SessionError::Subscription(ApiError::Unauthorized {
            status: StatusCode::UNAUTHORIZED,
            body: String::new(),
        });
        assert!(!rejected.is_authorization());
        assert!(unauthorized.is_authorization());
    }

    #[test]
    fn test_revocation_classified() {
        let revoked = |status: &str| {
            SessionError::Revoked(SubscriptionInfo {
                id: "sub-1".into(),
                kind: REDEMPTION_SUBSCRIPTION.into(),
                status: status.into(),
            })
        };
        assert!(revoked("authorization_revoked").is_authorization());
        assert!(revoked("user_removed").is_authorization());
        assert!(!revoked("version_removed").is_authorization());
    }

    #[test]
    fn test_recent_ids_window() {
        let mut ids = RecentIds::new(2);
        assert!(ids.insert("a"));
        assert!(!ids.insert("a"));
        assert!(ids.insert("b"));
        assert!(ids.insert("c"));
        // "a" fell out of the window
        assert!(ids.insert("a"));
        assert!(!ids.insert("c"));
    }

    #[test]
    fn test_notify_filters_and_decodes() {
        let mut seen = Vec::new();
        {
            let credentials = Credentials::default();
            let mut session = EventSubSession::with_endpoints(
                &credentials,
                EVENTSUB_URL,
                HelixClient::with_base_url(&credentials, HELIX_BASE_URL),
                |event: RedemptionEvent| seen.push(event.reward.title),
            );
            session.notify(
                REDEMPTION_SUBSCRIPTION,
                serde_json::json!({"user_name": "viewer", "reward": {"title": "Run"}}),
            );
            session.notify("channel.follow", serde_json::json!({"user_name": "x"}));
            session.notify(REDEMPTION_SUBSCRIPTION, serde_json::json!({"reward": 5}));
        }
        assert_eq!(seen, vec!["Run".to_string()]);
    }

    fn credentials() -> Credentials {
        Credentials {
            channel_name: "somechannel".into(),
            client_id: "abcdefghij0123456789".into(),
            oauth_token: "abcdefghij0123456789xyz".into(),
        }
    }

    fn envelope(id: &str, message_type: &str, payload: serde_json::Value) -> String {
        json!({
            "metadata": {
                "message_id": id,
                "message_type": message_type,
                "message_timestamp": "2023-07-19T14:56:51.634234626Z"
            },
            "payload": payload
        })
        .to_string()
    }

    fn welcome(id: &str, keepalive_seconds: u64) -> String {
        envelope(
            id,
            "session_welcome",
            json!({"session": {
                "id": "session-1",
                "status": "connected",
                "keepalive_timeout_seconds": keepalive_seconds,
                "reconnect_url": null
            }}),
        )
    }

    fn redemption(id: &str, title: &str) -> String {
        envelope(
            id,
            "notification",
            json!({
                "subscription": {"id": "sub-1", "type": REDEMPTION_SUBSCRIPTION, "status": "enabled"},
                "event": {"id": id, "user_name": "viewer", "reward": {"id": "r", "title": title, "cost": 10}}
            }),
        )
    }

    fn reconnect(id: &str) -> String {
        envelope(
            id,
            "session_reconnect",
            json!({"session": {
                "id": "session-1",
                "status": "reconnecting",
                "reconnect_url": "wss://eventsub.wss.twitch.tv/ws?id=next"
            }}),
        )
    }

    /// Sends `frames` to the first client, then keeps the socket open until it leaves
    async fn eventsub_server(frames: Vec<String>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            for frame in frames {
                if ws.send(Message::Text(frame)).await.is_err() {
                    return;
                }
            }
            while let Some(Ok(_)) = ws.next().await {}
        });
        format!("ws://{}", addr)
    }

    /// Answers the user lookup with 200 and subscription requests with `subscribe_status`
    async fn helix_server(subscribe_status: u16) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let subscriptions = Arc::new(AtomicUsize::new(0));
        let counter = subscriptions.clone();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let counter = counter.clone();
                tokio::spawn(async move {
                    let Some(request_line) = read_request(&mut stream).await else {
                        return;
                    };
                    let (status, body) = if request_line.starts_with("GET /users") {
                        (200, r#"{"data":[{"id":"1337","login":"somechannel"}]}"#)
                    } else {
                        counter.fetch_add(1, Ordering::SeqCst);
                        (subscribe_status, r#"{"data":[]}"#)
                    };
                    let response = format!(
                        "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\n\
                         Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status,
                        body.len(),
                        body
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });
        (format!("http://{}", addr), subscriptions)
    }

    /// Reads one HTTP request and returns its request line
    async fn read_request(stream: &mut TcpStream) -> Option<String> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        let header_end = loop {
            let n = stream.read(&mut chunk).await.ok()?;
            if n == 0 {
                return None;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos;
            }
        };

        let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
        let content_length = head
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        while buf.len() < header_end + 4 + content_length {
            let n = stream.read(&mut chunk).await.ok()?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        head.lines().next().map(str::to_string)
    }

    type Titles = Arc<Mutex<Vec<String>>>;

    fn session_for(
        ws_url: &str,
        helix_url: &str,
    ) -> (EventSubSession<impl FnMut(RedemptionEvent) + Send>, Titles) {
        let titles = Titles::default();
        let sink = titles.clone();
        let credentials = credentials();
        let session = EventSubSession::with_endpoints(
            &credentials,
            ws_url,
            HelixClient::with_base_url(&credentials, helix_url),
            move |event: RedemptionEvent| sink.lock().unwrap().push(event.reward.title),
        );
        (session, titles)
    }

    #[tokio::test]
    async fn test_welcome_subscribes_then_delivers_until_reconnect() {
        let ws_url = eventsub_server(vec![
            welcome("m1", 10),
            redemption("m2", "Run"),
            envelope("m3", "session_keepalive", json!({})),
            envelope("m4", "channel.future_thing", json!({})),
            redemption("m5", "Jump"),
            reconnect("m6"),
            redemption("m7", "Never read"),
        ])
        .await;
        let (helix_url, subscriptions) = helix_server(202).await;
        let (mut session, titles) = session_for(&ws_url, &helix_url);

        let mut state = SessionState::default();
        let result = session.serve(&mut state, &CancellationToken::new()).await;

        assert!(matches!(result, Ok(SessionEnd::ReconnectRequested)));
        assert_eq!(state.session_id.as_deref(), Some("session-1"));
        assert_eq!(state.subscription, SubscriptionStatus::Confirmed);
        assert_eq!(subscriptions.load(Ordering::SeqCst), 1);
        assert_eq!(*titles.lock().unwrap(), vec!["Run", "Jump"]);
    }

    #[tokio::test]
    async fn test_duplicate_message_id_is_delivered_once() {
        let ws_url = eventsub_server(vec![
            welcome("m1", 10),
            redemption("m2", "Run"),
            redemption("m2", "Run"),
            redemption("m3", "Run"),
            reconnect("m4"),
        ])
        .await;
        let (helix_url, _) = helix_server(202).await;
        let (mut session, titles) = session_for(&ws_url, &helix_url);

        let mut state = SessionState::default();
        let result = session.serve(&mut state, &CancellationToken::new()).await;

        assert!(matches!(result, Ok(SessionEnd::ReconnectRequested)));
        assert_eq!(titles.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rejected_subscription_is_transient() {
        let ws_url = eventsub_server(vec![welcome("m1", 10), redemption("m2", "Run")]).await;
        let (helix_url, subscriptions) = helix_server(400).await;
        let (mut session, titles) = session_for(&ws_url, &helix_url);

        let mut state = SessionState::default();
        let result = session.serve(&mut state, &CancellationToken::new()).await;

        let Err(err) = result else {
            panic!("expected a subscription failure");
        };
        assert!(matches!(
            err,
            SessionError::Subscription(ApiError::Status { status, .. }) if status == StatusCode::BAD_REQUEST
        ));
        assert!(!err.is_authorization());
        assert_eq!(state.subscription, SubscriptionStatus::Failed);
        assert_eq!(subscriptions.load(Ordering::SeqCst), 1);
        assert!(titles.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_silent_connection_hits_keepalive_timeout() {
        let ws_url = eventsub_server(vec![welcome("m1", 1)]).await;
        let (helix_url, _) = helix_server(202).await;
        let (mut session, _) = session_for(&ws_url, &helix_url);

        let mut state = SessionState::default();
        let result = session.serve(&mut state, &CancellationToken::new()).await;

        assert!(matches!(
            result,
            Err(SessionError::KeepaliveTimeout(window)) if window == Duration::from_secs(1) + KEEPALIVE_GRACE
        ));
        assert_eq!(state.subscription, SubscriptionStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_cancel_ends_open_session() {
        let ws_url = eventsub_server(vec![welcome("m1", 10)]).await;
        let (helix_url, subscriptions) = helix_server(202).await;
        let (mut session, _) = session_for(&ws_url, &helix_url);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            while subscriptions.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            trigger.cancel();
        });

        let mut state = SessionState::default();
        let result = tokio::time::timeout(Duration::from_secs(5), session.serve(&mut state, &cancel))
            .await
            .unwrap();
        assert!(matches!(result, Ok(SessionEnd::Cancelled)));
    }
}
