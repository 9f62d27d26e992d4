//! Frames the gateway sends besides chat messages.
//!
//! Close frames carry a JSON body `{"message": "..."}`. The WebSocket
//! protocol caps a close reason at 123 bytes, so long messages are cut at a
//! character boundary until the encoded body fits.

use serde::{Deserialize, Serialize};
use tungstenite::protocol::CloseFrame;
use tungstenite::protocol::frame::coding::CloseCode;

pub const EMPTY_TOPIC: &str = "topic can't be empty";

/// Maximum close reason length allowed by RFC 6455.
pub const MAX_CLOSE_REASON: usize = 123;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

impl ErrorPayload {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Encodes the payload, shortening the message until it fits a close
    /// reason.
    pub fn to_close_reason(&self) -> String {
        let mut message: String = self.message.chars().take(MAX_CLOSE_REASON).collect();
        loop {
            let encoded = serde_json::json!({ "message": message }).to_string();
            if encoded.len() <= MAX_CLOSE_REASON || message.is_empty() {
                return encoded;
            }
            message.pop();
        }
    }
}

pub fn close_with_error(code: CloseCode, message: impl Into<String>) -> CloseFrame {
    CloseFrame {
        code,
        reason: ErrorPayload::new(message).to_close_reason().into(),
    }
}
