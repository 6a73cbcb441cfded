use serde::Deserialize;

/// Default for `BrokerSettings::idle_channel_secs`.
pub const DEFAULT_IDLE_CHANNEL_SECS: u64 = 5;

/// Top-level configuration settings for the relay.
///
/// Includes settings for the HTTP server, the broker and logging.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub logging: LoggingSettings,
}

/// Configuration settings for the server.
///
/// Defines the host and port the server will bind to.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl ServerSettings {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration settings for the broker.
///
/// Limits on connections, channels and payloads, the per-connection queue
/// size, and the timers for channel retention and subscriber lifetime.
/// A zero `channel_retention_secs` evicts a channel as soon as its last
/// subscriber leaves, and a channel that never had one after
/// `idle_channel_secs`. A zero `subscriber_ttl_secs` keeps subscribers open
/// until they disconnect.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    pub max_connections: usize,
    pub max_channels: usize,
    pub max_payload_bytes: usize,
    pub max_channel_name_len: usize,
    pub outbound_queue_capacity: usize,
    pub channel_retention_secs: u64,
    pub idle_channel_secs: u64,
    pub subscriber_ttl_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub max_connections: Option<usize>,
    pub max_channels: Option<usize>,
    pub max_payload_bytes: Option<usize>,
    pub max_channel_name_len: Option<usize>,
    pub outbound_queue_capacity: Option<usize>,
    pub channel_retention_secs: Option<u64>,
    pub idle_channel_secs: Option<u64>,
    pub subscriber_ttl_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl PartialSettings {
    /// Fills every missing value from `default`.
    pub fn merge(self, default: Settings) -> Settings {
        let server = self.server;
        let broker = self.broker;
        let logging = self.logging;

        Settings {
            server: ServerSettings {
                host: server
                    .as_ref()
                    .and_then(|s| s.host.clone())
                    .unwrap_or(default.server.host),
                port: server
                    .as_ref()
                    .and_then(|s| s.port)
                    .unwrap_or(default.server.port),
            },
            broker: BrokerSettings {
                max_connections: broker
                    .as_ref()
                    .and_then(|b| b.max_connections)
                    .unwrap_or(default.broker.max_connections),
                max_channels: broker
                    .as_ref()
                    .and_then(|b| b.max_channels)
                    .unwrap_or(default.broker.max_channels),
                max_payload_bytes: broker
                    .as_ref()
                    .and_then(|b| b.max_payload_bytes)
                    .unwrap_or(default.broker.max_payload_bytes),
                max_channel_name_len: broker
                    .as_ref()
                    .and_then(|b| b.max_channel_name_len)
                    .unwrap_or(default.broker.max_channel_name_len),
                outbound_queue_capacity: broker
                    .as_ref()
                    .and_then(|b| b.outbound_queue_capacity)
                    .unwrap_or(default.broker.outbound_queue_capacity),
                channel_retention_secs: broker
                    .as_ref()
                    .and_then(|b| b.channel_retention_secs)
                    .unwrap_or(default.broker.channel_retention_secs),
                idle_channel_secs: broker
                    .as_ref()
                    .and_then(|b| b.idle_channel_secs)
                    .unwrap_or(default.broker.idle_channel_secs),
                subscriber_ttl_secs: broker
                    .as_ref()
                    .and_then(|b| b.subscriber_ttl_secs)
                    .unwrap_or(default.broker.subscriber_ttl_secs),
            },
            logging: LoggingSettings {
                level: logging
                    .and_then(|l| l.level)
                    .unwrap_or(default.logging.level),
            },
        }
    }
}

/// Provides default values for `Settings`.
///
/// Port 9080 is the port push-stream clients expect.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 9080,
            },
            broker: BrokerSettings::default(),
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            max_connections: 1000,
            max_channels: 10_000,
            max_payload_bytes: 64 * 1024,
            max_channel_name_len: 128,
            outbound_queue_capacity: 256,
            channel_retention_secs: 0,
            idle_channel_secs: DEFAULT_IDLE_CHANNEL_SECS,
            subscriber_ttl_secs: 0,
        }
    }
}
