//! # Stream Server
//!
//! WebSocket front end of the update stream service. Each connection
//! carries at most one session at a time; a pending `stream_next` is served
//! while the socket keeps being read, so a disconnect cancels the wait and
//! drops the session with its cursor.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};

use super::errors::{DispatchError, DispatchResult};
use super::protocol::{codes, ClientMessage, ServerMessage};
use crate::observability::{log_event_with_fields, Event as LogEvent, Logger};
use crate::updatestream::{Event, StreamSession, UpdateStreamResult, UpdateStreamService};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Stream server configuration
#[derive(Debug, Clone)]
pub struct StreamServerConfig {
    /// Bind address
    pub bind_addr: String,

    /// Heartbeat interval in seconds
    pub heartbeat_interval_secs: u64,
}

impl Default for StreamServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:4000".to_string(),
            heartbeat_interval_secs: 30,
        }
    }
}

/// WebSocket server for update stream sessions
pub struct StreamServer {
    config: StreamServerConfig,
    service: UpdateStreamService,
    listener: TcpListener,
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    connections: Arc<AtomicUsize>,
}

impl StreamServer {
    /// Binds the listening socket.
    pub async fn bind(
        config: StreamServerConfig,
        service: UpdateStreamService,
    ) -> DispatchResult<Self> {
        let addr: SocketAddr = config
            .bind_addr
            .parse()
            .map_err(|e| DispatchError::ConfigError(format!("Invalid bind address: {}", e)))?;
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| DispatchError::ConfigError(format!("Failed to bind: {}", e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| DispatchError::ConnectionError(e.to_string()))?;
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            service,
            listener,
            local_addr,
            shutdown_tx,
            connections: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// `ws://` URL of this server.
    pub fn url(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    /// Accepts connections until `shutdown` is called.
    pub async fn run(&self) -> DispatchResult<()> {
        let addr = self.local_addr.to_string();
        log_event_with_fields(LogEvent::DispatcherListening, &[("addr", addr.as_str())]);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            let service = self.service.clone();
                            let config = self.config.clone();
                            let connections = Arc::clone(&self.connections);
                            let shutdown = self.shutdown_tx.subscribe();

                            tokio::spawn(async move {
                                connections.fetch_add(1, Ordering::Relaxed);
                                let served =
                                    handle_connection(stream, peer_addr, service, config, shutdown);
                                if let Err(e) = served.await {
                                    Logger::warn(
                                        "CONNECTION_ERROR",
                                        &[
                                            ("error", e.to_string().as_str()),
                                            ("peer", peer_addr.to_string().as_str()),
                                        ],
                                    );
                                }
                                connections.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            Logger::error("ACCEPT_FAILED", &[("error", e.to_string().as_str())]);
                        }
                    }
                }

                _ = shutdown_rx.recv() => break,
            }
        }

        Ok(())
    }

    /// Stops the accept loop and every connection.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }
}

/// Serves one connection.
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    service: UpdateStreamService,
    config: StreamServerConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> DispatchResult<()> {
    let ws_stream = accept_async(stream).await.map_err(|e| {
        DispatchError::ConnectionError(format!("WebSocket handshake failed: {}", e))
    })?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let peer = peer_addr.to_string();
    log_event_with_fields(LogEvent::ClientConnected, &[("peer", peer.as_str())]);

    let mut session = SessionSlot::Empty;
    let mut pending_next = false;

    let heartbeat_interval = Duration::from_secs(config.heartbeat_interval_secs.max(1));
    let mut heartbeat_timer = tokio::time::interval_at(
        tokio::time::Instant::now() + heartbeat_interval,
        heartbeat_interval,
    );

    let result = loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                let reply = match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => process_client_message(
                                client_msg,
                                &service,
                                &mut session,
                                &mut pending_next,
                            ),
                            Err(e) => Some(ServerMessage::error(
                                codes::INVALID_MESSAGE,
                                format!("Invalid message format: {}", e),
                            )),
                        }
                    }
                    Some(Ok(Message::Binary(_))) => Some(ServerMessage::error(
                        codes::UNSUPPORTED,
                        "Binary messages not supported",
                    )),
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_sender.send(Message::Pong(data)).await {
                            break Err(DispatchError::ConnectionError(e.to_string()));
                        }
                        None
                    }
                    Some(Ok(Message::Close(_))) | None => break Ok(()),
                    Some(Err(e)) => break Err(DispatchError::ConnectionError(e.to_string())),
                    Some(Ok(_)) => None,
                };
                if let Some(reply) = reply {
                    if let Err(e) = send(&mut ws_sender, &reply).await {
                        break Err(e);
                    }
                }
            }

            result = next_event(&mut session), if pending_next => {
                pending_next = false;
                let reply = match result {
                    Ok(event) => {
                        if event.is_terminal() {
                            session.close();
                        }
                        ServerMessage::Event { event }
                    }
                    Err(e) => {
                        session.close();
                        ServerMessage::from(&e)
                    }
                };
                if let Err(e) = send(&mut ws_sender, &reply).await {
                    break Err(e);
                }
            }

            _ = heartbeat_timer.tick() => {
                if let Err(e) = send(&mut ws_sender, &ServerMessage::heartbeat(None)).await {
                    break Err(e);
                }
            }

            _ = shutdown.recv() => {
                let _ = ws_sender.send(Message::Close(None)).await;
                break Ok(());
            }
        }
    };

    // Releases the cursor before the connection is reported gone
    drop(session);
    log_event_with_fields(LogEvent::ClientDisconnected, &[("peer", peer.as_str())]);
    result
}

/// The stream session of one connection.
#[derive(Debug)]
enum SessionSlot {
    /// No `stream_start` has succeeded yet
    Empty,
    Open(StreamSession),
    /// The session delivered its terminal event and was released
    Closed,
}

impl SessionSlot {
    /// Drops the open session, releasing its cursor.
    fn close(&mut self) {
        if matches!(self, SessionSlot::Open(_)) {
            *self = SessionSlot::Closed;
        }
    }

    #[cfg(test)]
    fn session(&self) -> Option<&StreamSession> {
        match self {
            SessionSlot::Open(session) => Some(session),
            _ => None,
        }
    }
}

/// Applies one client request. Returns the immediate reply, if any; a
/// started or continued stream answers later through `pending_next`.
fn process_client_message(
    message: ClientMessage,
    service: &UpdateStreamService,
    session: &mut SessionSlot,
    pending_next: &mut bool,
) -> Option<ServerMessage> {
    match message {
        ClientMessage::StreamStart { position } => {
            // Never two sessions on one connection
            *session = SessionSlot::Empty;
            *pending_next = false;
            match service.open_session(&position) {
                Ok(opened) => {
                    *session = SessionSlot::Open(opened);
                    *pending_next = true;
                    None
                }
                Err(e) => Some(ServerMessage::from(&e)),
            }
        }

        ClientMessage::StreamNext => match session {
            SessionSlot::Empty => Some(ServerMessage::error(
                codes::NO_SESSION,
                "no stream session is open on this connection",
            )),
            SessionSlot::Closed => Some(ServerMessage::error(
                codes::SESSION_CLOSED,
                "stream session is closed",
            )),
            SessionSlot::Open(_) if *pending_next => Some(ServerMessage::error(
                codes::INVALID_MESSAGE,
                "stream_next already pending",
            )),
            SessionSlot::Open(_) => {
                *pending_next = true;
                None
            }
        },

        ClientMessage::Heartbeat { ref_id } => Some(ServerMessage::heartbeat(ref_id)),
    }
}

async fn next_event(session: &mut SessionSlot) -> UpdateStreamResult<Event> {
    match session {
        SessionSlot::Open(session) => session.next_event().await,
        _ => std::future::pending().await,
    }
}

async fn send(ws_sender: &mut WsSink, message: &ServerMessage) -> DispatchResult<()> {
    let json = serde_json::to_string(message)
        .map_err(|e| DispatchError::InvalidMessage(format!("Failed to serialize message: {}", e)))?;
    ws_sender
        .send(Message::Text(json))
        .await
        .map_err(|e| DispatchError::ConnectionError(format!("Failed to send message: {}", e)))
}
