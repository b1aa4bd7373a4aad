//! WebSocket transport backed by tokio-tungstenite

use super::{Connector, Inbound, Transport};
use crate::core::{LinkError, Result};
use futures_util::{SinkExt, StreamExt};
use std::borrow::Cow;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens `ws://` / `wss://` connections
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WsConnector {
    type Transport = WsTransport;

    async fn connect(&self, endpoint: &str) -> Result<WsTransport> {
        let (stream, response) = connect_async(endpoint).await?;
        debug!(
            "WebSocket handshake with {} complete (status {})",
            endpoint,
            response.status()
        );
        Ok(WsTransport { stream })
    }
}

/// An open WebSocket
pub struct WsTransport {
    stream: WsStream,
}

impl Transport for WsTransport {
    async fn send(&mut self, text: String) -> Result<()> {
        self.stream.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<Inbound>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(LinkError::from(e))),
            };

            match message {
                Message::Text(text) => return Some(Ok(Inbound::Text(text))),
                Message::Binary(bytes) => {
                    return Some(
                        String::from_utf8(bytes)
                            .map(Inbound::Text)
                            .map_err(|_| LinkError::malformed("binary frame is not UTF-8")),
                    );
                }
                Message::Pong(_) => return Some(Ok(Inbound::Pong)),
                Message::Close(frame) => {
                    let (code, reason) = match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.into_owned()),
                        None => (None, String::new()),
                    };
                    return Some(Ok(Inbound::Closed { code, reason }));
                }
                // tungstenite queues the pong reply itself
                Message::Ping(_) | Message::Frame(_) => {
                    trace!("Ignoring control frame");
                }
            }
        }
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: Cow::Owned(reason.to_string()),
        };
        match self.stream.close(Some(frame)).await {
            Ok(()) => Ok(()),
            // Closing an already-closed socket is not a failure
            Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed)
            | Err(tokio_tungstenite::tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
