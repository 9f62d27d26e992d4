//! # chatbridge
//!
//! `chatbridge` is a WebSocket gateway in front of a partitioned log broker.
//! Each connection subscribes to one topic: text frames from the client are
//! appended to the topic, and the topic's history followed by live records
//! is pushed back to the client.
//!
//! ## Core Modules
//!
//! - `broker`: the log broker seam, with a Kafka backend and an in-memory one.
//! - `chat`: topic management, publishing and subscribing of chat messages.
//! - `client`: a WebSocket client for the gateway.
//! - `config`: loads the gateway configuration.
//! - `transport`: the WebSocket accept loop and the per-connection session.
//! - `utils`: the error taxonomy and logging setup.

pub mod broker;
pub mod chat;
pub mod client;
pub mod config;
pub mod transport;
pub mod utils;
