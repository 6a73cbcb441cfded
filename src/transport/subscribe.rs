//! Subscribe gateways.
//!
//! - `GET /sub/<channel>[/<channel>...]`: chunked response, frames written
//!   back to back as they are delivered.
//! - `GET /ws/<channel>[/<channel>...]`: WebSocket, one binary message per
//!   frame. Anything the client sends besides a close is ignored.
//!
//! Both keep the connection open until the client goes away, the broker drops
//! the subscriber, or the configured TTL runs out. Teardown always goes
//! through `SubscriberSession`'s `Drop`, which removes the connection from
//! every channel.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::broker::{Broker, Message};
use crate::client::{OutboundReceiver, SubscriberConnection};
use crate::transport::{AppState, frame};
use crate::utils::{RelayError, Result};

pub const STREAM_CONTENT_TYPE: &str = "application/octet-stream";
pub const CONNECTION_ID_HEADER: &str = "x-connection-id";

/// One subscriber's side of the relay: its connection and the queue the
/// broker fills.
pub struct SubscriberSession {
    broker: Arc<Broker>,
    conn: Arc<SubscriberConnection>,
    rx: OutboundReceiver,
    deadline: Option<Instant>,
}

impl SubscriberSession {
    /// Opens a connection and subscribes it to every channel in `channels`.
    pub fn open(
        broker: Arc<Broker>,
        channels: &[String],
        ttl: Option<Duration>,
    ) -> Result<Self> {
        let (conn, rx) = broker.connect()?;
        let session = Self {
            broker,
            conn,
            rx,
            deadline: ttl.map(|ttl| Instant::now() + ttl),
        };

        // on error the session is dropped, which disconnects it
        for channel in channels {
            session.broker.subscribe(channel, &session.conn)?;
        }
        Ok(session)
    }

    /// Waits for the next delivered message. `None` means the session is
    /// over: the broker closed the connection or the TTL ran out.
    pub async fn next_message(&mut self) -> Option<Arc<Message>> {
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, self.rx.recv())
                .await
                .ok()
                .flatten(),
            None => self.rx.recv().await,
        }
    }
}

impl Drop for SubscriberSession {
    fn drop(&mut self) {
        self.broker.disconnect(&self.conn);
        debug!(connection_id = %self.conn.id, "Subscriber session ended");
    }
}

/// Splits the wildcard path into channel names and validates each one.
pub fn parse_channels(broker: &Broker, raw: &str) -> Result<Vec<String>> {
    let mut channels: Vec<String> = Vec::new();
    for name in raw.split('/').filter(|s| !s.is_empty()) {
        broker.validate_channel_name(name)?;
        if !channels.iter().any(|c| c == name) {
            channels.push(name.to_string());
        }
    }

    if channels.is_empty() {
        return Err(RelayError::InvalidChannelName {
            name: raw.to_string(),
            reason: "no channel given",
        });
    }
    Ok(channels)
}

/// GET /sub/{*channels}
pub async fn stream_handler(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Response> {
    let channels = parse_channels(&state.broker, &raw)?;
    let session = SubscriberSession::open(state.broker.clone(), &channels, state.subscriber_ttl)?;
    let conn_id = session.conn.id.clone();
    info!(connection_id = %conn_id, ?channels, "Stream subscriber connected");

    let frames = futures::stream::unfold(session, |mut session| async move {
        let message = session.next_message().await?;
        Some((Ok::<_, Infallible>(frame::encode(&message)), session))
    });

    let mut response = (
        [(CONTENT_TYPE, STREAM_CONTENT_TYPE), (CACHE_CONTROL, "no-cache")],
        Body::from_stream(frames),
    )
        .into_response();
    if let Ok(value) = HeaderValue::from_str(&conn_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(CONNECTION_ID_HEADER), value);
    }
    Ok(response)
}

/// GET /ws/{*channels}
///
/// The connection is opened before the upgrade so that limit and validation
/// errors still come back as plain HTTP errors.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Response> {
    let channels = parse_channels(&state.broker, &raw)?;
    let session = SubscriberSession::open(state.broker.clone(), &channels, state.subscriber_ttl)?;
    info!(connection_id = %session.conn.id, ?channels, "WebSocket subscriber connected");

    Ok(ws.on_upgrade(move |socket| run_websocket(socket, session)))
}

async fn run_websocket(socket: WebSocket, mut session: SubscriberSession) {
    let conn_id = session.conn.id.clone();
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            delivered = session.next_message() => {
                let Some(message) = delivered else {
                    let _ = sender.send(WsMessage::Close(None)).await;
                    break;
                };
                if let Err(e) = sender.send(WsMessage::Binary(frame::encode(&message))).await {
                    debug!(connection_id = %conn_id, "WebSocket send failed: {e}");
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(connection_id = %conn_id, "WebSocket error: {e}");
                    break;
                }
            }
        }
    }

    info!(connection_id = %conn_id, "WebSocket subscriber disconnected");
}
