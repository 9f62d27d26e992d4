//! Connection session
//!
//! A session bridges one client connection to one topic. It runs three
//! activities on their own tasks, all children of one cancellation token:
//!
//! ```text
//!              ┌──────────── cancel ─────────────┐
//!              ▼                ▼                ▼
//!   client ─► reader ─► Publisher      writer ◄─ Subscription ◄─ broker
//!                                         │
//!                         heartbeat ──────┴──► client (shared sink)
//! ```
//!
//! - reader: every text frame becomes one published message. Publish errors
//!   are logged; a close frame or read error ends the session.
//! - writer: forwards subscription messages, ends on the idle timer, on a
//!   subscription error (after sending an error close frame) or on a write
//!   failure.
//! - heartbeat: pings the client on a fixed interval; a failed ping ends the
//!   session.
//!
//! Whichever activity returns first decides the [`CloseReason`]. The session
//! then moves to `Closing`: it gives up its topic lease, cancels the token,
//! sends the close frame (once, whoever sends it first), waits for every
//! activity and the subscription's read loop to return, and only then
//! reports `Closed`.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::protocol::{CloseFrame, Message as WsMessage};
use uuid::Uuid;

use super::message::close_with_error;
use crate::broker::BrokerError;
use crate::chat::{ChatServices, Message, Publisher, Subscription, TopicLease};
use crate::config::{IdleDelete, SessionSettings};
use crate::utils::{Error, Result};

/// How long a closing session keeps reading for the client's close reply.
const LINGER: Duration = Duration::from_secs(1);

type WsSink<S> = SplitSink<WebSocketStream<S>, WsMessage>;
type WsStream<S> = SplitStream<WebSocketStream<S>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Fixed wall-clock lifetime of a subscription, regardless of traffic.
    pub idle_timeout: Duration,
    pub ping_interval: Duration,
    /// Upper bound on every write to the client, pings included.
    pub write_deadline: Duration,
    pub idle_delete: IdleDelete,
}

impl From<&SessionSettings> for SessionConfig {
    fn from(settings: &SessionSettings) -> Self {
        Self {
            idle_timeout: Duration::from_secs(settings.idle_timeout_secs),
            ping_interval: Duration::from_secs(settings.ping_interval_secs.max(1)),
            write_deadline: Duration::from_secs(settings.write_deadline_secs.max(1)),
            idle_delete: settings.idle_delete,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Active,
    Closing,
    Closed,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The client sent a close frame or hung up.
    ClientClosed,
    ReadFailed(String),
    WriteFailed(String),
    /// The subscription failed or could not be opened.
    Broker(String),
    IdleTimeout,
    PingFailed(String),
    /// The gateway is shutting down.
    Shutdown,
    Internal(String),
}

impl CloseReason {
    /// Frame sent to the client when the session closes. A clean client
    /// close gets a plain close reply.
    pub fn close_frame(&self) -> Option<CloseFrame> {
        match self {
            CloseReason::ClientClosed => None,
            CloseReason::IdleTimeout => Some(close_with_error(CloseCode::Normal, "idle timeout")),
            CloseReason::Shutdown => {
                Some(close_with_error(CloseCode::Away, "server shutting down"))
            }
            CloseReason::ReadFailed(e)
            | CloseReason::WriteFailed(e)
            | CloseReason::Broker(e)
            | CloseReason::PingFailed(e)
            | CloseReason::Internal(e) => Some(close_with_error(CloseCode::Error, e.as_str())),
        }
    }

    pub fn is_error(&self) -> bool {
        !matches!(
            self,
            CloseReason::ClientClosed | CloseReason::IdleTimeout | CloseReason::Shutdown
        )
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::ClientClosed => write!(f, "client closed"),
            CloseReason::ReadFailed(e) => write!(f, "read failed: {e}"),
            CloseReason::WriteFailed(e) => write!(f, "write failed: {e}"),
            CloseReason::Broker(e) => write!(f, "broker error: {e}"),
            CloseReason::IdleTimeout => write!(f, "idle timeout"),
            CloseReason::PingFailed(e) => write!(f, "ping failed: {e}"),
            CloseReason::Shutdown => write!(f, "shutdown"),
            CloseReason::Internal(e) => write!(f, "internal error: {e}"),
        }
    }
}

/// Final state of a session and why it got there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEnd {
    pub state: SessionState,
    pub reason: CloseReason,
}

/// How an activity returned.
enum Exit {
    Cancelled,
    Terminal(CloseReason),
}

/// The reader hands its half of the socket back so the session can linger
/// on it while closing.
type Outcome<S> = (Exit, Option<WsStream<S>>);

/// Write half of the client connection, shared by the writer and the
/// heartbeat.
struct ClientSink<S> {
    sink: Mutex<WsSink<S>>,
    closed: AtomicBool,
    write_deadline: Duration,
}

impl<S> ClientSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn new(sink: WsSink<S>, write_deadline: Duration) -> Self {
        Self {
            sink: Mutex::new(sink),
            closed: AtomicBool::new(false),
            write_deadline,
        }
    }

    async fn send(&self, frame: WsMessage) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ConnectionClosed);
        }
        let mut sink = self.sink.lock().await;
        match time::timeout(self.write_deadline, sink.send(frame)).await {
            Ok(sent) => Ok(sent?),
            Err(_) => Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "write deadline exceeded",
            ))),
        }
    }

    /// Sends the close frame. Only the first call on a connection does
    /// anything; it returns whether this call was the one.
    async fn close(&self, frame: Option<CloseFrame>) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let mut sink = self.sink.lock().await;
        let closing = time::timeout(self.write_deadline, async {
            sink.send(WsMessage::Close(frame)).await?;
            sink.close().await
        })
        .await;

        match closing {
            Ok(Ok(())) => debug!("connection closed"),
            Ok(Err(e)) => debug!(error = %e, "close frame not delivered"),
            Err(_) => debug!("close frame timed out"),
        }
        true
    }
}

pub struct Session {
    topic: String,
    lease: Option<TopicLease>,
    services: ChatServices,
    config: SessionConfig,
    cancel: CancellationToken,
    state: SessionState,
    span: Span,
}

impl Session {
    /// Builds a session for a topic whose existence was already confirmed.
    /// Cancelling `shutdown` ends the session.
    pub fn new(
        lease: TopicLease,
        services: ChatServices,
        config: SessionConfig,
        shutdown: &CancellationToken,
    ) -> Self {
        let topic = lease.topic().to_string();
        let span = info_span!("session", id = %Uuid::new_v4().simple(), topic = %topic);
        Self {
            topic,
            lease: Some(lease),
            services,
            config,
            cancel: shutdown.child_token(),
            state: SessionState::Active,
            span,
        }
    }

    /// Runs the session until it is `Closed`.
    pub async fn run<S>(mut self, ws: WebSocketStream<S>) -> SessionEnd
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let span = self.span.clone();
        let reason = self.drive(ws).instrument(span).await;
        SessionEnd {
            state: self.state,
            reason,
        }
    }

    async fn drive<S>(&mut self, ws: WebSocketStream<S>) -> CloseReason
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = ws.split();
        let sink = Arc::new(ClientSink::new(sink, self.config.write_deadline));

        let subscription = self
            .services
            .subscriber
            .subscribe(&self.topic, &self.cancel)
            .await;
        let Subscription {
            messages,
            errors,
            reader,
            ..
        } = match subscription {
            Ok(subscription) => subscription,
            Err(e) => {
                error!(error = %e, "failed to subscribe");
                let reason = CloseReason::Broker(e.to_string());
                self.begin_closing();
                sink.close(reason.close_frame()).await;
                linger(stream).await;
                self.transition(SessionState::Closed);
                return reason;
            }
        };

        let mut activities: JoinSet<Outcome<S>> = JoinSet::new();
        activities.spawn(
            read_client(
                stream,
                self.services.publisher.clone(),
                self.topic.clone(),
                self.cancel.clone(),
            )
            .in_current_span(),
        );
        activities.spawn(
            write_client(
                sink.clone(),
                messages,
                errors,
                self.config.idle_timeout,
                self.cancel.clone(),
            )
            .in_current_span(),
        );
        activities.spawn(
            heartbeat(sink.clone(), self.config.ping_interval, self.cancel.clone())
                .in_current_span(),
        );
        info!("session active");

        let mut returned_stream = None;
        let reason = match activities.join_next().await {
            Some(Ok((exit, stream))) => {
                returned_stream = stream;
                match exit {
                    Exit::Terminal(reason) => reason,
                    Exit::Cancelled => CloseReason::Shutdown,
                }
            }
            Some(Err(e)) => CloseReason::Internal(e.to_string()),
            None => CloseReason::Internal("no session activities".to_string()),
        };

        let last_holder = self.begin_closing();
        sink.close(reason.close_frame()).await;

        while let Some(joined) = activities.join_next().await {
            if let Ok((_, Some(stream))) = joined {
                returned_stream = Some(stream);
            }
        }
        reader.join().await;

        if reason == CloseReason::IdleTimeout {
            self.delete_idle_topic(last_holder).await;
        }
        if let Some(stream) = returned_stream {
            linger(stream).await;
        }

        self.transition(SessionState::Closed);
        if reason.is_error() {
            warn!(%reason, "session closed");
        } else {
            info!(%reason, "session closed");
        }
        reason
    }

    /// Enters `Closing`: releases the topic lease and cancels the
    /// activities. Returns whether this was the topic's last session here.
    fn begin_closing(&mut self) -> bool {
        self.transition(SessionState::Closing);
        let last_holder = self.lease.take().is_some_and(TopicLease::release);
        self.cancel.cancel();
        last_holder
    }

    fn transition(&mut self, next: SessionState) {
        debug_assert!(next > self.state, "session state must move forward");
        debug!(from = ?self.state, to = ?next, "session state changed");
        self.state = next;
    }

    async fn delete_idle_topic(&self, last_holder: bool) {
        let delete = match self.config.idle_delete {
            IdleDelete::Always => true,
            IdleDelete::LastSession => last_holder,
            IdleDelete::Never => false,
        };
        if !delete {
            info!("idle timeout reached, keeping shared topic");
            return;
        }

        info!("idle timeout reached, deleting topic");
        if let Err(e) = self.services.directory.delete(&self.topic).await {
            error!(error = %e, "failed to delete idle topic");
        }
    }
}

async fn read_client<S>(
    mut stream: WsStream<S>,
    publisher: Publisher,
    topic: String,
    cancel: CancellationToken,
) -> Outcome<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let exit = loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break Exit::Cancelled,
            frame = stream.next() => frame,
        };

        match frame {
            Some(Ok(WsMessage::Text(text))) => {
                let published = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break Exit::Cancelled,
                    published = publisher.publish(&topic, text.as_str()) => published,
                };
                match published {
                    Ok(message) => debug!(key = %message.key, "client message published"),
                    Err(e) => warn!(error = %e, "failed to publish client message"),
                }
            }
            Some(Ok(WsMessage::Close(_))) | None => {
                break Exit::Terminal(CloseReason::ClientClosed);
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                break match Error::from(e) {
                    Error::ConnectionClosed => Exit::Terminal(CloseReason::ClientClosed),
                    other => Exit::Terminal(CloseReason::ReadFailed(other.to_string())),
                };
            }
        }
    };
    (exit, Some(stream))
}

async fn write_client<S>(
    sink: Arc<ClientSink<S>>,
    mut messages: mpsc::Receiver<Message>,
    mut errors: mpsc::Receiver<BrokerError>,
    idle_timeout: Duration,
    cancel: CancellationToken,
) -> Outcome<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let idle = time::sleep(idle_timeout);
    tokio::pin!(idle);

    let exit = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break Exit::Cancelled,
            _ = &mut idle => break Exit::Terminal(CloseReason::IdleTimeout),
            message = messages.recv() => {
                let Some(message) = message else {
                    break Exit::Terminal(CloseReason::Broker("subscription ended".to_string()));
                };
                let frame = match message.to_json() {
                    Ok(json) => WsMessage::text(json),
                    Err(e) => {
                        warn!(key = %message.key, error = %e, "failed to encode message");
                        continue;
                    }
                };
                if let Err(e) = sink.send(frame).await {
                    break Exit::Terminal(CloseReason::WriteFailed(e.to_string()));
                }
            }
            error = errors.recv() => {
                let reason = error.map_or_else(|| "subscription ended".to_string(), |e| e.to_string());
                warn!(error = %reason, "subscription failed");
                sink.close(Some(close_with_error(CloseCode::Error, reason.as_str()))).await;
                break Exit::Terminal(CloseReason::Broker(reason));
            }
        }
    };
    (exit, None)
}

async fn heartbeat<S>(
    sink: Arc<ClientSink<S>>,
    interval: Duration,
    cancel: CancellationToken,
) -> Outcome<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let interval = interval.max(Duration::from_millis(1));
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let exit = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break Exit::Cancelled,
            _ = ticker.tick() => {
                if let Err(e) = sink.send(WsMessage::Ping(Default::default())).await {
                    break Exit::Terminal(CloseReason::PingFailed(e.to_string()));
                }
            }
        }
    };
    (exit, None)
}

/// Reads until the client's close reply (or EOF) so the close frame is not
/// lost to a reset when the socket drops.
async fn linger<S>(mut stream: WsStream<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let _ = time::timeout(LINGER, async {
        while let Some(Ok(frame)) = stream.next().await {
            if frame.is_close() {
                break;
            }
        }
    })
    .await;
}
