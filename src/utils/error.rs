//! The `error` module defines the error type shared by the whole relay.
//!
//! Validation errors (`InvalidChannelName`, `PayloadTooLarge`) travel back to
//! the HTTP caller. Delivery errors (`ConnectionClosed`, `QueueFull`) stay
//! inside the broker's fan-out loop and only ever cost the one subscriber.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid channel name {name:?}: {reason}")]
    InvalidChannelName { name: String, reason: &'static str },

    #[error("payload of {size} bytes exceeds the limit of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("channel not found: {0}")]
    ChannelNotFound(String),

    #[error("channel limit reached: max {0} channels")]
    ChannelLimitExceeded(usize),

    #[error("connection limit reached: max {0} connections")]
    ConnectionLimitExceeded(usize),

    #[error("connection {0} is closed")]
    ConnectionClosed(String),

    #[error("outbound queue full for connection {0}")]
    QueueFull(String),

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("invalid relay url {0}")]
    InvalidUrl(String),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected response status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    /// Machine-readable code used in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidChannelName { .. } => "InvalidChannelName",
            Self::PayloadTooLarge { .. } => "PayloadTooLarge",
            Self::ChannelNotFound(_) => "ChannelNotFound",
            Self::ChannelLimitExceeded(_) => "ChannelLimitExceeded",
            Self::ConnectionLimitExceeded(_) => "ConnectionLimitExceeded",
            Self::ConnectionClosed(_) => "ConnectionClosed",
            Self::QueueFull(_) => "QueueFull",
            Self::TransportError(_) => "TransportError",
            Self::MalformedFrame(_) => "MalformedFrame",
            Self::InvalidUrl(_) => "InvalidUrl",
            Self::Http(_) => "HttpError",
            Self::UnexpectedStatus { .. } => "UnexpectedStatus",
            Self::Serialization(_) => "SerializationError",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidChannelName { .. } => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::ChannelNotFound(_) => StatusCode::NOT_FOUND,
            Self::ConnectionLimitExceeded(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = self.code(), "request failed: {self}");
        } else {
            warn!(code = self.code(), "request rejected: {self}");
        }

        let body = ErrorResponse {
            error: ErrorBody {
                code: self.code(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}
