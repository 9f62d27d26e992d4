//! The `error` module defines the error taxonomy of the gateway.
//!
//! Broker-side failures arrive as [`BrokerError`] and are folded into
//! [`Error`] at the chat layer, so callers only ever match on one type.

use thiserror::Error as ThisError;

use crate::broker::BrokerError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, ThisError)]
pub enum Error {
    /// Connection or transport failure talking to the broker.
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("topic not found: {0}")]
    TopicNotFound(String),

    #[error("topic '{topic}' could not be created: {reason}")]
    CreateRejected { topic: String, reason: String },

    #[error("topic '{topic}' could not be deleted: {reason}")]
    DeleteRejected { topic: String, reason: String },

    #[error("topic '{0}' has no partitions")]
    NoPartitions(String),

    /// Local randomness failure while generating a message key.
    #[error("failed to generate message key: {0}")]
    IdGenerationFailed(String),

    /// The client side of the connection is gone.
    #[error("connection closed")]
    ConnectionClosed,

    #[error("malformed record payload: {0}")]
    Decode(#[from] serde_json::Error),

    /// Neither the record nor its payload carries the named field.
    #[error("record has no {0}")]
    IncompleteRecord(&'static str),

    #[error("failed to encode message: {0}")]
    Encode(serde_json::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<BrokerError> for Error {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::UnknownTopic(topic) => Error::TopicNotFound(topic),
            other => Error::BrokerUnavailable(other.to_string()),
        }
    }
}

impl From<tungstenite::Error> for Error {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                Error::ConnectionClosed
            }
            tungstenite::Error::Io(e) => Error::Io(e),
            other => Error::Io(std::io::Error::other(other)),
        }
    }
}
