//! The `transport` module owns the client side of the gateway: the WebSocket
//! accept loop and handshake, and one [`session::Session`] per connection
//! that bridges the socket to a topic.

pub mod message;
pub mod session;
pub mod websocket;

pub use message::{EMPTY_TOPIC, ErrorPayload};
pub use session::{CloseReason, Session, SessionConfig, SessionEnd, SessionState};
pub use websocket::{Gateway, serve, start_websocket_server};
