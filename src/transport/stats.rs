use axum::Json;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::transport::AppState;
use crate::utils::Result;

#[derive(Debug, Deserialize)]
pub struct StatsParams {
    pub id: Option<String>,
}

/// GET /channels-stats - one channel with `?id=`, broker summary without.
pub async fn channel_stats(
    State(state): State<AppState>,
    Query(params): Query<StatsParams>,
) -> Result<Response> {
    match params.id {
        Some(id) => {
            let stats = state.broker.registry().channel_stats(&id)?;
            Ok(Json(stats).into_response())
        }
        None => Ok(Json(state.broker.stats()).into_response()),
    }
}

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
