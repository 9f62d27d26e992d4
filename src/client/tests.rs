use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::time::timeout;

use super::{ChatClient, ClientEvent, subscribe_url};
use crate::broker::MemoryBroker;
use crate::config::Settings;
use crate::transport::{Gateway, serve};

async fn start_gateway() -> String {
    let gateway = Arc::new(Gateway::new(
        Arc::new(MemoryBroker::new()),
        &Settings::default(),
    ));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, gateway));
    format!("ws://{addr}/chat/subscribe")
}

async fn next_event(client: &mut ChatClient) -> ClientEvent {
    timeout(Duration::from_secs(5), client.next_event())
        .await
        .expect("timed out")
        .unwrap()
        .expect("connection ended")
}

#[test]
fn test_subscribe_url_sets_topic() {
    let url = subscribe_url("ws://127.0.0.1:8080/chat/subscribe", "my room").unwrap();
    assert_eq!(url.as_str(), "ws://127.0.0.1:8080/chat/subscribe?topic=my+room");
}

#[test]
fn test_subscribe_url_replaces_existing_topic() {
    let url = subscribe_url("ws://host/chat/subscribe?topic=old&x=1", "new").unwrap();
    assert_eq!(url.query(), Some("x=1&topic=new"));
}

#[test]
fn test_subscribe_url_rejects_garbage() {
    assert!(subscribe_url("not a url", "t").is_err());
}

#[tokio::test]
async fn test_client_round_trip() {
    let base = start_gateway().await;
    let mut client = ChatClient::connect(&base, "cli").await.unwrap();

    client.send("hello from cli").await.unwrap();

    match next_event(&mut client).await {
        ClientEvent::Message(message) => assert_eq!(message.text, "hello from cli"),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_client_reports_close_payload() {
    let base = start_gateway().await;
    let mut client = ChatClient::connect(&base, "").await.unwrap();

    match next_event(&mut client).await {
        ClientEvent::Closed(Some(payload)) => assert_eq!(payload.message, "topic can't be empty"),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_run_sends_input_lines() {
    let base = start_gateway().await;
    let sender = ChatClient::connect(&base, "piped").await.unwrap();
    let mut watcher = ChatClient::connect(&base, "piped").await.unwrap();

    let input: &[u8] = b"first\n\nsecond\n";
    let run = tokio::spawn(sender.run(input));

    let mut texts = Vec::new();
    while texts.len() < 2 {
        if let ClientEvent::Message(message) = next_event(&mut watcher).await {
            texts.push(message.text);
        }
    }
    assert_eq!(texts, ["first", "second"]);
    assert!(timeout(Duration::from_secs(5), run).await.is_ok());
}
