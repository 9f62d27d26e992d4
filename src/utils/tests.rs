use super::error::Error;
use super::logging::{self, LogFormat};
use crate::broker::BrokerError;

#[test]
fn logging_init_accepts_levels() {
    // Should not panic
    logging::init("info", LogFormat::Pretty);
    logging::init("debug", LogFormat::Json);
    logging::init("warn", LogFormat::Pretty);
}

#[test]
fn log_format_parse_defaults_to_pretty() {
    assert_eq!(LogFormat::parse("json"), LogFormat::Json);
    assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
    assert_eq!(LogFormat::parse("anything"), LogFormat::Pretty);
}

#[test]
fn broker_errors_map_onto_taxonomy() {
    let err: Error = BrokerError::UnknownTopic("abc".into()).into();
    assert!(matches!(err, Error::TopicNotFound(t) if t == "abc"));

    let err: Error = BrokerError::Transport("connection refused".into()).into();
    assert!(matches!(err, Error::BrokerUnavailable(_)));
}

#[test]
fn closed_socket_maps_to_connection_closed() {
    let err: Error = tungstenite::Error::ConnectionClosed.into();
    assert!(matches!(err, Error::ConnectionClosed));
}

#[test]
fn encode_failures_are_not_reported_as_decode() {
    let cause = serde_json::from_str::<u8>("x").unwrap_err();
    let err = Error::Encode(cause);
    assert!(err.to_string().starts_with("failed to encode message"));
}
