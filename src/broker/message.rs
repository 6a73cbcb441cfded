//! Message definitions for the broker
//!
//! A `Message` is created once per publish and is immutable afterwards. The
//! broker wraps it in an `Arc` and hands the same allocation to every
//! subscriber's outbound queue.
//!
//! Notes on fields:
//! - `channel`: channel name used for routing
//! - `id`: per-channel sequence number, starting at 1
//! - `payload`: opaque bytes; the relay never looks inside
//! - `published_at`: set by the broker when the id is assigned

use bytes::Bytes;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub channel: String,
    pub id: u64,
    pub payload: Bytes,
    pub published_at: DateTime<Utc>,
}

impl Message {
    pub fn new(channel: impl Into<String>, id: u64, payload: Bytes) -> Self {
        Self {
            channel: channel.into(),
            id,
            payload,
            published_at: Utc::now(),
        }
    }
}
