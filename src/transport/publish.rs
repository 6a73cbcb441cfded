//! Publish gateway: `POST /pub?id=<channel>` and `POST /pub/<channel>`.
//!
//! The request body is relayed as-is; its encoding is a matter between
//! publishers and subscribers.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::transport::AppState;
use crate::utils::Result;

#[derive(Debug, Deserialize)]
pub struct PublishParams {
    pub id: Option<String>,
}

/// Body of a successful publish response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishAck {
    pub channel: String,
    pub message_id: u64,
}

pub async fn publish_by_query(
    State(state): State<AppState>,
    Query(params): Query<PublishParams>,
    body: Bytes,
) -> Result<Json<PublishAck>> {
    let channel = params.id.unwrap_or_default();
    publish(&state, &channel, body)
}

pub async fn publish_by_path(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    body: Bytes,
) -> Result<Json<PublishAck>> {
    publish(&state, &channel, body)
}

fn publish(state: &AppState, channel: &str, body: Bytes) -> Result<Json<PublishAck>> {
    let message = state.broker.publish(channel, body)?;
    info!(
        channel = %message.channel,
        message_id = message.id,
        bytes = message.payload.len(),
        "Published"
    );
    Ok(Json(PublishAck {
        channel: message.channel.clone(),
        message_id: message.id,
    }))
}
