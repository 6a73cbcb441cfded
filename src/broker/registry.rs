//! Channel registry
//!
//! Owns every channel and every open subscriber connection.
//!
//! Locking:
//! - the channel map sits behind a `RwLock` that is only held to look up,
//!   insert or evict an entry, never while a channel is being worked on;
//! - each channel has its own `Mutex`, so traffic on unrelated channels never
//!   contends;
//! - lock order is map, then channel, then connection. Code holding a channel
//!   lock never touches the map.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::broker::channel::{Channel, ChannelStats};
use crate::client::{ConnectionId, MessageSink, SubscriberConnection};
use crate::config::{BrokerSettings, DEFAULT_IDLE_CHANNEL_SECS};
use crate::utils::{RelayError, Result};

pub type ChannelHandle = Arc<Mutex<Channel>>;

#[derive(Debug)]
pub struct ChannelRegistry {
    channels: RwLock<HashMap<String, ChannelHandle>>,
    connections: RwLock<HashMap<ConnectionId, Arc<SubscriberConnection>>>,
    max_channels: usize,
    max_connections: usize,
    retention: Duration,
    idle_channel_timeout: Duration,
}

impl ChannelRegistry {
    pub fn new(max_channels: usize, max_connections: usize, retention: Duration) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            connections: RwLock::new(HashMap::new()),
            max_channels,
            max_connections,
            retention,
            idle_channel_timeout: Duration::from_secs(DEFAULT_IDLE_CHANNEL_SECS),
        }
    }

    /// How long a channel that never had a subscriber is kept when no
    /// retention window is configured.
    pub fn with_idle_channel_timeout(mut self, timeout: Duration) -> Self {
        self.idle_channel_timeout = timeout;
        self
    }

    pub fn from_settings(settings: &BrokerSettings) -> Self {
        Self::new(
            settings.max_channels,
            settings.max_connections,
            Duration::from_secs(settings.channel_retention_secs),
        )
        .with_idle_channel_timeout(Duration::from_secs(settings.idle_channel_secs))
    }

    /// Looks up `name`, creating the channel if it does not exist yet.
    pub fn get_or_create(&self, name: &str) -> Result<ChannelHandle> {
        if let Some(handle) = self.channels.read().get(name) {
            return Ok(Arc::clone(handle));
        }

        let mut channels = self.channels.write();
        if let Some(handle) = channels.get(name) {
            return Ok(Arc::clone(handle));
        }
        if channels.len() >= self.max_channels {
            let reclaimed = evict_idle_locked(&mut channels, self.idle_window());
            if reclaimed > 0 {
                debug!(reclaimed, "Reclaimed idle channels at the channel cap");
            }
        }
        if channels.len() >= self.max_channels {
            return Err(RelayError::ChannelLimitExceeded(self.max_channels));
        }

        let handle = Arc::new(Mutex::new(Channel::new(name)));
        channels.insert(name.to_string(), Arc::clone(&handle));
        debug!(channel = %name, total = channels.len(), "Channel created");
        Ok(handle)
    }

    pub fn get(&self, name: &str) -> Option<ChannelHandle> {
        self.channels.read().get(name).cloned()
    }

    /// Runs `f` on the live channel `name` with its lock held.
    ///
    /// Retries the lookup when the handle it got was evicted before the lock
    /// was taken, so `f` never sees a detached channel.
    pub fn with_channel<T>(&self, name: &str, f: impl FnOnce(&mut Channel) -> T) -> Result<T> {
        loop {
            let handle = self.get_or_create(name)?;
            let mut channel = handle.lock();
            if channel.is_evicted() {
                continue;
            }
            return Ok(f(&mut channel));
        }
    }

    /// Registers a new connection in the Connecting state.
    pub fn connect(&self, sink: impl MessageSink + 'static) -> Result<Arc<SubscriberConnection>> {
        let mut connections = self.connections.write();
        if connections.len() >= self.max_connections {
            return Err(RelayError::ConnectionLimitExceeded(self.max_connections));
        }

        let conn = Arc::new(SubscriberConnection::new(sink));
        connections.insert(conn.id.clone(), Arc::clone(&conn));
        info!(
            connection_id = %conn.id,
            total = connections.len(),
            "Connection registered"
        );
        Ok(conn)
    }

    /// Adds `conn` to channel `name`.
    ///
    /// Subscribing twice is a no-op, as is subscribing a connection that has
    /// started closing. Returns whether the connection was newly added.
    pub fn subscribe(&self, name: &str, conn: &Arc<SubscriberConnection>) -> Result<bool> {
        let added = self.with_channel(name, |channel| {
            if !conn.join(name) {
                return false;
            }
            channel.subscribe(conn)
        })?;

        if added {
            debug!(connection_id = %conn.id, channel = %name, "Subscribed");
        }
        Ok(added)
    }

    /// Removes `conn` from channel `name`; a no-op for non-members.
    ///
    /// Leaving the last joined channel closes the connection.
    pub fn unsubscribe(&self, name: &str, conn: &Arc<SubscriberConnection>) {
        let Some(handle) = self.get(name) else {
            return;
        };

        let (removed, now_empty) = {
            let mut channel = handle.lock();
            let removed = channel.unsubscribe(&conn.id);
            (removed, channel.is_empty())
        };
        if !removed {
            return;
        }

        debug!(connection_id = %conn.id, channel = %name, "Unsubscribed");
        let remaining = conn.leave(name);
        if now_empty {
            self.evict_if_unused(name);
        }
        if remaining == 0 {
            self.remove_connection(conn);
        }
    }

    /// Closes `conn` and removes it from every channel it joined.
    ///
    /// Safe to call from any thread and more than once; only the first call
    /// does anything and returns true.
    pub fn remove_connection(&self, conn: &SubscriberConnection) -> bool {
        let Some(joined) = conn.begin_close() else {
            return false;
        };

        for name in &joined {
            let Some(handle) = self.get(name) else {
                continue;
            };
            let now_empty = {
                let mut channel = handle.lock();
                channel.unsubscribe(&conn.id);
                channel.is_empty()
            };
            if now_empty {
                self.evict_if_unused(name);
            }
        }

        conn.finish_close();
        let remaining = {
            let mut connections = self.connections.write();
            connections.remove(&conn.id);
            connections.len()
        };
        info!(
            connection_id = %conn.id,
            channels = joined.len(),
            remaining,
            "Connection removed"
        );
        true
    }

    /// Evicts `name` right away when it has no subscribers and no retention
    /// window is configured.
    fn evict_if_unused(&self, name: &str) {
        if !self.retention.is_zero() {
            return;
        }

        let mut channels = self.channels.write();
        let evict = match channels.get(name) {
            Some(handle) => {
                let mut channel = handle.lock();
                if channel.is_empty() {
                    channel.mark_evicted();
                    true
                } else {
                    false
                }
            }
            None => false,
        };
        if evict {
            channels.remove(name);
            debug!(channel = %name, "Channel evicted");
        }
    }

    /// Evicts every channel without subscribers that has been idle for at
    /// least `retention`. Returns how many were evicted.
    pub fn evict_idle(&self, retention: Duration) -> usize {
        evict_idle_locked(&mut self.channels.write(), retention)
    }

    /// Current subscribers of `name`, in subscription order.
    pub fn list_subscribers(&self, name: &str) -> Vec<Arc<SubscriberConnection>> {
        self.get(name)
            .map(|handle| handle.lock().subscribers().to_vec())
            .unwrap_or_default()
    }

    pub fn channel_stats(&self, name: &str) -> Result<ChannelStats> {
        self.get(name)
            .map(|handle| handle.lock().stats())
            .ok_or_else(|| RelayError::ChannelNotFound(name.to_string()))
    }

    pub fn contains_channel(&self, name: &str) -> bool {
        self.channels.read().contains_key(name)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// How long an empty channel may sit idle before the sweeper takes it:
    /// the retention window, or the idle-channel timeout when retention is
    /// zero.
    pub fn idle_window(&self) -> Duration {
        if self.retention.is_zero() {
            self.idle_channel_timeout
        } else {
            self.retention
        }
    }
}

fn evict_idle_locked(channels: &mut HashMap<String, ChannelHandle>, idle: Duration) -> usize {
    let before = channels.len();
    channels.retain(|name, handle| {
        let mut channel = handle.lock();
        if channel.is_empty() && channel.idle_for() >= idle {
            channel.mark_evicted();
            debug!(channel = %name, "Idle channel evicted");
            false
        } else {
            true
        }
    });
    before - channels.len()
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::from_settings(&BrokerSettings::default())
    }
}
