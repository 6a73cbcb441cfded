//! Broker engine
//!
//! This module contains the in-memory broker responsible for:
//! - validating publishes (channel name rule, payload size)
//! - assigning monotonic per-channel message ids
//! - fanning messages out to the channel's current subscribers
//!
//! Concurrency and usage notes:
//! - The broker is shared as `Arc<Broker>`; every method takes `&self`.
//! - Fan-out runs under the channel lock so that subscribers see messages in
//!   id order, but it only ever pushes into bounded queues with `try_send`.
//!   A subscriber whose queue is full or closed is dropped after the lock is
//!   released; the publish itself still succeeds.
//! - The retention loop runs as a background task and reclaims channels
//!   nobody is subscribed to, including ones only ever published to.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::broker::channel::validate_channel_name;
use crate::broker::message::Message;
use crate::broker::registry::ChannelRegistry;
use crate::client::{OutboundReceiver, SubscriberConnection, outbound_queue};
use crate::config::BrokerSettings;
use crate::utils::{RelayError, Result};

#[derive(Debug)]
pub struct Broker {
    registry: ChannelRegistry,
    settings: BrokerSettings,
    published: AtomicU64,
    dropped_subscribers: AtomicU64,
}

/// Broker-wide counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerStats {
    pub channels: usize,
    pub connections: usize,
    pub published_messages: u64,
    pub dropped_subscribers: u64,
}

impl Broker {
    /// How often the retention loop looks for idle channels.
    pub const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

    pub fn new(settings: BrokerSettings) -> Self {
        Self {
            registry: ChannelRegistry::from_settings(&settings),
            settings,
            published: AtomicU64::new(0),
            dropped_subscribers: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    pub fn validate_channel_name(&self, name: &str) -> Result<()> {
        validate_channel_name(name, self.settings.max_channel_name_len)
    }

    /// Publishes `payload` to `channel` and returns the stored message.
    ///
    /// Fails only on an invalid channel name, an oversized payload or when a
    /// new channel would exceed the channel cap. In all three cases no id is
    /// consumed.
    pub fn publish(&self, channel: &str, payload: impl Into<Bytes>) -> Result<Arc<Message>> {
        let payload = payload.into();
        self.validate_channel_name(channel)?;
        if payload.len() > self.settings.max_payload_bytes {
            return Err(RelayError::PayloadTooLarge {
                size: payload.len(),
                max: self.settings.max_payload_bytes,
            });
        }

        let (message, delivered, failed) = self.registry.with_channel(channel, |ch| {
            let message = Arc::new(Message::new(channel, ch.next_id(), payload));
            let mut delivered = 0usize;
            let mut failed = Vec::new();

            for sub in ch.subscribers() {
                match sub.deliver(&message) {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        warn!(
                            connection_id = %sub.id,
                            channel = %channel,
                            "Dropping subscriber: {e}"
                        );
                        failed.push(Arc::clone(sub));
                    }
                }
            }
            (message, delivered, failed)
        })?;

        for conn in &failed {
            if self.registry.remove_connection(conn) {
                self.dropped_subscribers.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.published.fetch_add(1, Ordering::Relaxed);

        debug!(
            channel = %channel,
            message_id = message.id,
            bytes = message.payload.len(),
            recipients = delivered,
            dropped = failed.len(),
            "Message published"
        );
        Ok(message)
    }

    /// Opens a new connection with its own bounded outbound queue.
    pub fn connect(&self) -> Result<(Arc<SubscriberConnection>, OutboundReceiver)> {
        let (tx, rx) = outbound_queue(self.settings.outbound_queue_capacity);
        let conn = self.registry.connect(tx)?;
        Ok((conn, rx))
    }

    /// Validates `channel` and adds `conn` to it.
    pub fn subscribe(&self, channel: &str, conn: &Arc<SubscriberConnection>) -> Result<bool> {
        self.validate_channel_name(channel)?;
        self.registry.subscribe(channel, conn)
    }

    pub fn unsubscribe(&self, channel: &str, conn: &Arc<SubscriberConnection>) {
        self.registry.unsubscribe(channel, conn);
    }

    /// Tears down `conn`; safe to call repeatedly.
    pub fn disconnect(&self, conn: &SubscriberConnection) {
        self.registry.remove_connection(conn);
    }

    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            channels: self.registry.channel_count(),
            connections: self.registry.connection_count(),
            published_messages: self.published.load(Ordering::Relaxed),
            dropped_subscribers: self.dropped_subscribers.load(Ordering::Relaxed),
        }
    }

    /// Periodically evicts channels that have had no subscribers for longer
    /// than the registry's idle window. Runs until the task is dropped.
    pub async fn start_retention_loop(broker: Arc<Broker>) {
        let window = broker.registry.idle_window();
        info!(idle_window_secs = window.as_secs(), "Channel sweeper started");

        let mut ticker = tokio::time::interval(Self::RETENTION_SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            let evicted = broker.registry.evict_idle(window);
            if evicted > 0 {
                debug!(evicted, "Evicted idle channels");
            }
        }
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(BrokerSettings::default())
    }
}
