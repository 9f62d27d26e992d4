//! The `client` module is a small WebSocket client for the gateway, used by
//! the `client` subcommand and by tests.

pub mod chat_client;
pub use chat_client::{ChatClient, ClientEvent, subscribe_url};

#[cfg(test)]
mod tests;
