/// WebSocket transport backed by tokio-tungstenite
use std::fmt::Debug;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info};

use crate::protocol::endpoints::redact_url;
use crate::protocol::{
    ConnectionError, ConnectionResult, Connector, Transport, TransportMessage, TransportSink,
    TransportStream,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens WebSocket connections
#[derive(Debug, Default, Clone)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> ConnectionResult<Transport> {
        let safe_url = redact_url(url);
        info!("Connecting to WebSocket endpoint: {}", safe_url);

        let request = url
            .into_client_request()
            .map_err(|e| ConnectionError::InvalidUrl(e.to_string()))?;

        let (stream, response) = connect_async(request)
            .await
            .map_err(|e| ConnectionError::WebSocket(e.to_string()))?;

        debug!("Connected to {}, response status: {:?}", safe_url, response.status());

        let (write, read) = stream.split();
        Ok(Transport {
            sink: Box::new(WebSocketSink { inner: write }),
            stream: Box::new(WebSocketSource { inner: read }),
        })
    }
}

struct WebSocketSink {
    inner: SplitSink<WsStream, Message>,
}

impl Debug for WebSocketSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketSink").finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl TransportSink for WebSocketSink {
    async fn send(&mut self, message: TransportMessage) -> ConnectionResult<()> {
        let message = match message {
            TransportMessage::Text(text) => Message::Text(text),
            TransportMessage::Binary(bin) => Message::Binary(bin),
            TransportMessage::Close => Message::Close(None),
        };
        self.inner
            .send(message)
            .await
            .map_err(|e| ConnectionError::WebSocket(e.to_string()))
    }

    async fn close(&mut self) -> ConnectionResult<()> {
        self.inner
            .close()
            .await
            .map_err(|e| ConnectionError::WebSocket(e.to_string()))
    }
}

struct WebSocketSource {
    inner: SplitStream<WsStream>,
}

impl Debug for WebSocketSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketSource").finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl TransportStream for WebSocketSource {
    async fn receive(&mut self) -> Option<ConnectionResult<TransportMessage>> {
        loop {
            let message = match self.inner.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(ConnectionError::WebSocket(e.to_string()))),
            };
            match message {
                Message::Text(text) => return Some(Ok(TransportMessage::Text(text))),
                Message::Binary(bin) => return Some(Ok(TransportMessage::Binary(bin))),
                Message::Close(frame) => {
                    if let Some(frame) = frame {
                        debug!("Received close frame: code={}, reason={}", frame.code, frame.reason);
                    }
                    return Some(Ok(TransportMessage::Close));
                }
                // tungstenite answers pings itself
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }
}
