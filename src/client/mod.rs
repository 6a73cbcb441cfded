//! The `client` module covers both ends of a subscription.
//!
//! A `SubscriberConnection` is the relay's view of a subscriber: its identity,
//! the channels it joined, its lifecycle state and the sink the broker pushes
//! messages into. Transports own the receiving half of that sink.
//!
//! `Publisher` and `subscribe` are the remote side: HTTP clients that talk to
//! a running relay.

pub mod connection;
pub mod publisher;
pub mod stream;

pub use connection::{
    ConnectionId, ConnectionState, DeliveryError, MessageSink, OutboundReceiver,
    SubscriberConnection, outbound_queue,
};
pub use publisher::Publisher;
pub use stream::{FrameStream, subscribe};
