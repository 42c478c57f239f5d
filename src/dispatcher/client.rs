//! # Update Stream Client
//!
//! Consumer side of the stream protocol: one connection, one session,
//! request/response with heartbeats skipped.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use super::errors::{DispatchError, DispatchResult};
use super::protocol::{ClientMessage, ServerMessage};
use crate::updatestream::Event;

/// Client connection to a stream server.
pub struct UpdateStreamConnection {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    session_open: bool,
}

impl UpdateStreamConnection {
    /// Connects to a `ws://` URL.
    pub async fn dial(url: &str) -> DispatchResult<Self> {
        let (ws, _) = connect_async(url).await.map_err(|e| {
            DispatchError::ConnectionError(format!("Failed to connect to {}: {}", url, e))
        })?;
        Ok(Self {
            ws,
            session_open: false,
        })
    }

    /// Starts a stream after `position` and returns its first event.
    ///
    /// # Errors
    ///
    /// `DispatchError::Server` carrying the server's message, e.g.
    /// "update stream service is not enabled".
    pub async fn stream_start(&mut self, position: &str) -> DispatchResult<Event> {
        self.session_open = false;
        self.send(&ClientMessage::StreamStart {
            position: position.to_string(),
        })
        .await?;
        let event = self.read_event().await?;
        self.session_open = !event.is_terminal();
        Ok(event)
    }

    /// Returns the next event of the open stream.
    pub async fn stream_next(&mut self) -> DispatchResult<Event> {
        if !self.session_open {
            return Err(DispatchError::SessionClosed);
        }
        self.send(&ClientMessage::StreamNext).await?;
        let event = self.read_event().await;
        if !matches!(event, Ok(ref e) if !e.is_terminal()) {
            self.session_open = false;
        }
        event
    }

    /// Closes the connection.
    pub async fn close(mut self) -> DispatchResult<()> {
        self.ws
            .close(None)
            .await
            .map_err(|e| DispatchError::ConnectionError(e.to_string()))
    }

    async fn send(&mut self, message: &ClientMessage) -> DispatchResult<()> {
        let json = serde_json::to_string(message)
            .map_err(|e| DispatchError::InvalidMessage(e.to_string()))?;
        self.ws
            .send(Message::Text(json))
            .await
            .map_err(|e| DispatchError::ConnectionError(format!("Failed to send message: {}", e)))
    }

    async fn read_event(&mut self) -> DispatchResult<Event> {
        loop {
            let text = match self.ws.next().await {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(_))) | None => return Err(DispatchError::ConnectionClosed),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(DispatchError::ConnectionError(e.to_string())),
            };

            match serde_json::from_str::<ServerMessage>(&text) {
                Ok(ServerMessage::Event { event }) => return Ok(event),
                Ok(ServerMessage::Error { code, message }) => {
                    return Err(DispatchError::Server { code, message })
                }
                Ok(ServerMessage::Heartbeat { .. }) => continue,
                Err(e) => return Err(DispatchError::InvalidMessage(e.to_string())),
            }
        }
    }
}
