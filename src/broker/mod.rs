pub mod channel;
pub mod engine;
pub mod message;
pub mod registry;

pub use channel::{Channel, ChannelStats};
pub use engine::{Broker, BrokerStats};
pub use message::Message;
pub use registry::ChannelRegistry;

#[cfg(test)]
mod tests;
