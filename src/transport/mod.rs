//! The `transport` module is the HTTP face of the relay.
//!
//! It builds the axum router that carries the publish gateway, the
//! subscribe gateways (chunked stream and WebSocket) and the stats
//! endpoints, and defines the frame encoding subscribers receive.

pub mod frame;
pub mod publish;
pub mod stats;
pub mod subscribe;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tracing::info;

use crate::broker::Broker;

pub use publish::PublishAck;

/// Shared state handed to every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub broker: Arc<Broker>,
    /// Subscriber connections are closed after this long, if set.
    pub subscriber_ttl: Option<Duration>,
}

impl AppState {
    pub fn new(broker: Arc<Broker>) -> Self {
        let ttl_secs = broker.settings().subscriber_ttl_secs;
        Self {
            broker,
            subscriber_ttl: (ttl_secs > 0).then(|| Duration::from_secs(ttl_secs)),
        }
    }
}

/// Builds the application router with all endpoints.
pub fn build_router(state: AppState) -> Router {
    // one byte over the limit so oversized bodies reach the broker's own check
    let body_limit = state.broker.settings().max_payload_bytes.saturating_add(1);

    Router::new()
        .route("/pub", post(publish::publish_by_query))
        .route("/pub/{channel}", post(publish::publish_by_path))
        .route("/sub/{*channels}", get(subscribe::stream_handler))
        .route("/ws/{*channels}", get(subscribe::websocket_handler))
        .route("/channels-stats", get(stats::channel_stats))
        .route("/health", get(stats::health))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Serves the relay on an already bound listener until the task is dropped.
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    info!("Relay listening on http://{addr}");
    axum::serve(listener, build_router(state)).await
}

/// Binds `addr` and serves the relay on it.
pub async fn start_server(addr: &str, state: AppState) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve(listener, state).await
}
