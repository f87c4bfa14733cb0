// crates/scheduler/src/communication.rs

use crate::error::TransportError;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// A bidirectional text-message channel to the simulation server.
///
/// The protocol loop only ever needs whole text messages, so control frames
/// and framing details stay below this seam.
#[async_trait]
pub trait Connection: Send {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Waits for the next text message. A closed peer is `TransportError::Closed`.
    async fn receive_text(&mut self) -> Result<String, TransportError>;
}

pub struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsConnection {
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let (stream, response) = connect_async(url).await.map_err(|source| TransportError::Connect {
            url: url.to_owned(),
            source,
        })?;
        tracing::info!(url, status = %response.status(), "Websocket connected");
        Ok(Self { stream })
    }

    /// Sends a close frame. Failures are only logged; the session is over
    /// either way.
    pub async fn close(mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(error = %e, "Websocket close handshake failed");
        }
    }
}

#[async_trait]
impl Connection for WsConnection {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.stream.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn receive_text(&mut self) -> Result<String, TransportError> {
        while let Some(frame) = self.stream.next().await {
            match frame? {
                Message::Text(text) => return Ok(text),
                Message::Binary(bytes) => {
                    return String::from_utf8(bytes).map_err(|_| TransportError::NonUtf8Frame)
                }
                Message::Close(frame) => {
                    tracing::debug!(frame = ?frame, "Websocket close frame received");
                    return Err(TransportError::Closed);
                }
                // tungstenite answers pings itself.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
        Err(TransportError::Closed)
    }
}
