use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio::time;
use tokio_tungstenite::{WebSocketStream, accept_hdr_async};
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, error, info, info_span, warn};
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::http::StatusCode;
use tungstenite::protocol::frame::coding::CloseCode;

use super::message::{EMPTY_TOPIC, close_with_error};
use super::session::{Session, SessionConfig};
use crate::broker::LogBroker;
use crate::chat::{ChatServices, TopicLeases};
use crate::config::Settings;
use crate::utils::Result;

/// How long a rejected connection waits for the client's close reply.
const REJECT_LINGER: Duration = Duration::from_secs(1);

/// Accepts client connections and starts one session per connection.
pub struct Gateway {
    services: ChatServices,
    leases: TopicLeases,
    session: SessionConfig,
    route: String,
    shutdown: CancellationToken,
    span: Span,
}

impl Gateway {
    pub fn new(broker: Arc<dyn LogBroker>, settings: &Settings) -> Self {
        Self {
            services: ChatServices::new(broker, settings.session.channel_capacity),
            leases: TopicLeases::new(),
            session: SessionConfig::from(&settings.session),
            route: settings.server.route.clone(),
            shutdown: CancellationToken::new(),
            span: info_span!("gateway"),
        }
    }

    pub fn with_session_config(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    pub fn leases(&self) -> &TopicLeases {
        &self.leases
    }

    pub fn services(&self) -> &ChatServices {
        &self.services
    }

    /// Stops accepting connections and closes every live session. Sessions
    /// run on children of the gateway's token.
    pub fn shutdown(&self) {
        info!(parent: &self.span, "shutdown requested");
        self.shutdown.cancel();
    }

    /// Performs the upgrade handshake on `stream` and runs the session until
    /// it is closed.
    pub async fn handle_connection<S>(&self, stream: S, peer: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut query = None;
        let route = self.route.as_str();
        let callback = |request: &Request, response: Response| {
            if request.uri().path() != route {
                let mut rejection = ErrorResponse::new(Some("not found".to_string()));
                *rejection.status_mut() = StatusCode::NOT_FOUND;
                return Err(rejection);
            }
            query = request.uri().query().map(str::to_string);
            Ok(response)
        };

        let ws = match accept_hdr_async(stream, callback).await {
            Ok(ws) => ws,
            Err(e) => {
                debug!(parent: &self.span, %peer, error = %e, "handshake failed");
                return;
            }
        };

        let topic = topic_param(query.as_deref());
        debug!(parent: &self.span, %peer, topic = %topic, "connection upgraded");
        self.accept(ws, topic).await;
    }

    async fn accept<S>(&self, ws: WebSocketStream<S>, topic: String)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        if topic.is_empty() {
            warn!(parent: &self.span, "rejecting connection without topic");
            reject(ws, EMPTY_TOPIC).await;
            return;
        }

        if let Err(e) = self.services.directory.ensure(&topic).await {
            error!(parent: &self.span, topic = %topic, error = %e, "failed to prepare topic");
            reject(ws, e.to_string()).await;
            return;
        }

        let lease = self.leases.acquire(&topic);
        let session = Session::new(lease, self.services.clone(), self.session, &self.shutdown);
        let end = session.run(ws).await;
        debug!(
            parent: &self.span,
            topic = %topic,
            state = ?end.state,
            reason = %end.reason,
            "session finished"
        );
    }
}

/// First `topic` value of the query string, or empty when absent.
fn topic_param(query: Option<&str>) -> String {
    query
        .and_then(|query| {
            url::form_urlencoded::parse(query.as_bytes())
                .find(|(key, _)| key == "topic")
                .map(|(_, value)| value.into_owned())
        })
        .unwrap_or_default()
}

async fn reject<S>(mut ws: WebSocketStream<S>, message: impl Into<String>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if let Err(e) = ws
        .close(Some(close_with_error(CloseCode::Normal, message)))
        .await
    {
        debug!(error = %e, "failed to send close frame");
        return;
    }
    let _ = time::timeout(REJECT_LINGER, async {
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;
}

/// Accept loop. Returns once the gateway is shut down and every session has
/// closed.
pub async fn serve(listener: TcpListener, gateway: Arc<Gateway>) -> Result<()> {
    let span = gateway.span.clone();
    info!(parent: &span, addr = %listener.local_addr()?, "gateway listening");

    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = gateway.shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let gateway = gateway.clone();
                    connections.spawn(async move {
                        gateway.handle_connection(stream, peer).await;
                    });
                }
                Err(e) => warn!(parent: &span, error = %e, "failed to accept connection"),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    info!(parent: &span, sessions = connections.len(), "waiting for sessions to close");
    while connections.join_next().await.is_some() {}
    info!(parent: &span, "gateway stopped");
    Ok(())
}

/// Binds `addr` and runs the accept loop until shutdown.
pub async fn start_websocket_server(addr: &str, gateway: Arc<Gateway>) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve(listener, gateway).await
}

#[cfg(test)]
mod topic_param_tests {
    use super::topic_param;

    #[test]
    fn reads_topic_from_query() {
        assert_eq!(topic_param(Some("topic=lobby")), "lobby");
        assert_eq!(topic_param(Some("x=1&topic=a%20b&topic=c")), "a b");
    }

    #[test]
    fn missing_or_empty_topic_is_empty() {
        assert_eq!(topic_param(None), "");
        assert_eq!(topic_param(Some("x=1")), "");
        assert_eq!(topic_param(Some("topic=")), "");
    }
}
