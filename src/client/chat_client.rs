//! Gateway client
//!
//! Connects to the subscribe route for one topic. Every line sent becomes a
//! chat message; everything the gateway pushes back is a decoded
//! [`Message`], until the gateway closes the connection.

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;
use url::Url;

use crate::chat::Message;
use crate::transport::ErrorPayload;
use crate::utils::Result;

/// Something the gateway sent.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Message(Message),
    /// The gateway closed the connection, with its error payload if any.
    Closed(Option<ErrorPayload>),
}

/// Builds the subscribe URL for `topic`, replacing any `topic` already in
/// `base`.
pub fn subscribe_url(base: &str, topic: &str) -> Result<Url> {
    let mut url = Url::parse(base)?;
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "topic")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair("topic", topic);
    Ok(url)
}

pub struct ChatClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl ChatClient {
    pub async fn connect(base: &str, topic: &str) -> Result<Self> {
        let url = subscribe_url(base, topic)?;
        let (ws, _) = connect_async(url.as_str()).await?;
        info!(%url, "connected");
        Ok(Self { ws })
    }

    pub async fn send(&mut self, text: &str) -> Result<()> {
        self.ws.send(WsMessage::text(text)).await?;
        Ok(())
    }

    /// Waits for the next chat message or the close. Returns `None` once the
    /// connection is gone.
    pub async fn next_event(&mut self) -> Result<Option<ClientEvent>> {
        while let Some(frame) = self.ws.next().await {
            match frame? {
                WsMessage::Text(text) => match serde_json::from_str(text.as_str()) {
                    Ok(message) => return Ok(Some(ClientEvent::Message(message))),
                    Err(e) => warn!(error = %e, "ignoring undecodable frame"),
                },
                WsMessage::Close(frame) => {
                    let payload = frame.and_then(|f| serde_json::from_str(f.reason.as_str()).ok());
                    return Ok(Some(ClientEvent::Closed(payload)));
                }
                other => debug!(frame = ?other, "control frame"),
            }
        }
        Ok(None)
    }

    pub async fn close(&mut self) -> Result<()> {
        self.ws.close(None).await?;
        Ok(())
    }

    /// Sends every line of `input` and prints what comes back until either
    /// side is done.
    pub async fn run<R>(mut self, input: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        let mut input_open = true;
        loop {
            tokio::select! {
                line = lines.next_line(), if input_open => match line? {
                    Some(line) if !line.trim().is_empty() => self.send(&line).await?,
                    Some(_) => {}
                    None => {
                        input_open = false;
                        self.close().await?;
                    }
                },
                event = self.next_event() => match event? {
                    Some(ClientEvent::Message(message)) => {
                        let short_key = message.key.get(..8).unwrap_or(&message.key);
                        println!(
                            "[{}] {short_key}: {}",
                            message.created_at.format("%H:%M:%S"),
                            message.text
                        );
                    }
                    Some(ClientEvent::Closed(payload)) => {
                        match payload {
                            Some(payload) => println!("connection closed: {}", payload.message),
                            None => println!("connection closed"),
                        }
                        return Ok(());
                    }
                    None => return Ok(()),
                },
            }
        }
    }
}
