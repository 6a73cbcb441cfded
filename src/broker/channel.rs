//! Channel state
//!
//! A `Channel` holds the ordered subscriber list of one channel name and its
//! message id counter. Each channel lives behind its own mutex inside the
//! registry; callers must hold that lock for every method here.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use crate::client::SubscriberConnection;
use crate::utils::{RelayError, Result};

#[derive(Debug)]
pub struct Channel {
    pub name: String,
    pub created_at: DateTime<Utc>,
    subscribers: Vec<Arc<SubscriberConnection>>,
    next_message_id: u64,
    published: u64,
    last_activity: Instant,
    evicted: bool,
}

/// Point-in-time view of a channel, as served by the stats endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStats {
    pub channel: String,
    pub subscribers: usize,
    pub published_messages: u64,
    pub last_message_id: u64,
    pub created_at: DateTime<Utc>,
}

impl Channel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            created_at: Utc::now(),
            subscribers: Vec::new(),
            next_message_id: 1,
            published: 0,
            last_activity: Instant::now(),
            evicted: false,
        }
    }

    /// Appends `conn` to the subscriber list. Duplicate adds are ignored.
    pub fn subscribe(&mut self, conn: &Arc<SubscriberConnection>) -> bool {
        self.last_activity = Instant::now();
        if self.subscribers.iter().any(|s| s.id == conn.id) {
            return false;
        }
        self.subscribers.push(Arc::clone(conn));
        true
    }

    /// Removes the subscriber with `id`, keeping the order of the others.
    pub fn unsubscribe(&mut self, id: &str) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.id != id);
        self.last_activity = Instant::now();
        self.subscribers.len() != before
    }

    pub fn subscribers(&self) -> &[Arc<SubscriberConnection>] {
        &self.subscribers
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Takes the next message id.
    pub fn next_id(&mut self) -> u64 {
        let id = self.next_message_id;
        self.next_message_id += 1;
        self.published += 1;
        self.last_activity = Instant::now();
        id
    }

    /// The id the next publish will receive.
    pub fn peek_next_id(&self) -> u64 {
        self.next_message_id
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    pub(crate) fn mark_evicted(&mut self) {
        self.evicted = true;
    }

    /// An evicted channel is detached from the registry; anyone still holding
    /// its handle must look the name up again.
    pub fn is_evicted(&self) -> bool {
        self.evicted
    }

    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            channel: self.name.clone(),
            subscribers: self.subscribers.len(),
            published_messages: self.published,
            last_message_id: self.next_message_id - 1,
            created_at: self.created_at,
        }
    }
}

/// Checks `name` against the channel naming rule.
///
/// A name is 1..=`max_len` bytes and contains no whitespace, control
/// characters, `/` (path separator of the subscribe routes) or `|` (frame
/// field separator).
pub fn validate_channel_name(name: &str, max_len: usize) -> Result<()> {
    let reason = if name.is_empty() {
        Some("channel name is empty")
    } else if name.len() > max_len {
        Some("channel name is too long")
    } else if name
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || c == '/' || c == '|')
    {
        Some("channel name contains a forbidden character")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(RelayError::InvalidChannelName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}
