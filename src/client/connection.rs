use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::broker::message::Message;
use crate::utils::{RelayError, Result};

/// Opaque identifier of one subscriber connection.
pub type ConnectionId = String;

/// Receiving half of a connection's outbound queue, drained by the transport.
pub type OutboundReceiver = mpsc::Receiver<Arc<Message>>;

/// Why a sink refused a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The transport side is gone.
    Closed,
    /// The subscriber is not keeping up.
    Full,
}

/// Outbound capability of a connection.
///
/// Implementations must never block: the broker calls `try_deliver` while
/// holding a channel lock.
pub trait MessageSink: Send + Sync {
    fn try_deliver(&self, message: Arc<Message>) -> std::result::Result<(), DeliveryError>;
}

impl MessageSink for mpsc::Sender<Arc<Message>> {
    fn try_deliver(&self, message: Arc<Message>) -> std::result::Result<(), DeliveryError> {
        self.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

/// Creates a bounded outbound queue of `capacity` messages.
pub fn outbound_queue(capacity: usize) -> (mpsc::Sender<Arc<Message>>, OutboundReceiver) {
    mpsc::channel(capacity.max(1))
}

/// Lifecycle of a subscriber connection. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// One long-lived delivery stream to one client.
///
/// State, joined channels and the sink share a single lock so that joining a
/// channel and closing the connection can never interleave: a connection that
/// has started closing cannot join anything, and every channel it joined
/// before that is visible to whoever closes it.
pub struct SubscriberConnection {
    pub id: ConnectionId,
    pub connected_at: DateTime<Utc>,
    inner: Mutex<ConnectionInner>,
}

struct ConnectionInner {
    state: ConnectionState,
    channels: BTreeSet<String>,
    sink: Option<Box<dyn MessageSink>>,
}

impl SubscriberConnection {
    pub fn new(sink: impl MessageSink + 'static) -> Self {
        Self {
            id: format!("client-{}", uuid::Uuid::new_v4()),
            connected_at: Utc::now(),
            inner: Mutex::new(ConnectionInner {
                state: ConnectionState::Connecting,
                channels: BTreeSet::new(),
                sink: Some(Box::new(sink)),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// True once closing has started.
    pub fn is_closed(&self) -> bool {
        self.state() >= ConnectionState::Closing
    }

    /// Channels this connection is currently joined to, sorted by name.
    pub fn channels(&self) -> Vec<String> {
        self.inner.lock().channels.iter().cloned().collect()
    }

    /// Records membership of `channel` and moves Connecting to Active.
    ///
    /// Returns false when the connection is already closing.
    pub(crate) fn join(&self, channel: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.state >= ConnectionState::Closing {
            return false;
        }
        inner.state = ConnectionState::Active;
        inner.channels.insert(channel.to_string());
        true
    }

    /// Drops membership of `channel`, returning how many channels remain.
    pub(crate) fn leave(&self, channel: &str) -> usize {
        let mut inner = self.inner.lock();
        inner.channels.remove(channel);
        inner.channels.len()
    }

    /// Hands `message` to the sink without blocking.
    pub fn deliver(&self, message: &Arc<Message>) -> Result<()> {
        let inner = self.inner.lock();
        let sink = match (&inner.state, &inner.sink) {
            (ConnectionState::Active, Some(sink)) => sink,
            _ => return Err(RelayError::ConnectionClosed(self.id.clone())),
        };

        sink.try_deliver(Arc::clone(message)).map_err(|e| match e {
            DeliveryError::Closed => RelayError::ConnectionClosed(self.id.clone()),
            DeliveryError::Full => RelayError::QueueFull(self.id.clone()),
        })
    }

    /// Starts closing: drops the sink and returns the joined channels.
    ///
    /// Only the first caller gets `Some`; later calls are no-ops.
    pub(crate) fn begin_close(&self) -> Option<Vec<String>> {
        let mut inner = self.inner.lock();
        if inner.state >= ConnectionState::Closing {
            return None;
        }
        inner.state = ConnectionState::Closing;
        inner.sink = None;
        Some(std::mem::take(&mut inner.channels).into_iter().collect())
    }

    pub(crate) fn finish_close(&self) {
        self.inner.lock().state = ConnectionState::Closed;
    }
}

impl fmt::Debug for SubscriberConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SubscriberConnection")
            .field("id", &self.id)
            .field("state", &inner.state)
            .field("channels", &inner.channels)
            .field("connected_at", &self.connected_at)
            .finish()
    }
}
