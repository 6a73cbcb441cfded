//! # PushRelay
//!
//! `pushrelay` is an in-memory HTTP publish/subscribe relay. Publishers POST
//! opaque payloads to a named channel; every subscriber currently attached to
//! that channel receives the message, tagged with a per-channel id, over a
//! long-lived chunked HTTP response or a WebSocket. Nothing is stored: a
//! message published while nobody listens is gone.
//!
//! ## Core Modules
//!
//! - `broker`: channels, id assignment and fan-out.
//! - `client`: a subscriber's connection as the relay sees it, plus HTTP
//!   clients for publishing to and subscribing from a running relay.
//! - `config`: loads settings from an optional file and the environment.
//! - `transport`: the axum router, gateways and the subscriber frame format.
//! - `utils`: the shared error type and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod transport;
pub mod utils;
