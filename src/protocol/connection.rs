/// Transport abstraction shared by control and data channels
use std::fmt::Debug;

use thiserror::Error;

/// 连接错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// WebSocket 错误
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Endpoint URL could not be built or parsed
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// 连接已关闭
    #[error("Connection closed")]
    ConnectionClosed,

    /// 超时错误
    #[error("Connection attempt timed out")]
    Timeout,

    /// The owning manager was closed while the attempt was pending
    #[error("Connection attempt cancelled")]
    Cancelled,
}

/// 连接结果类型
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Messages carried by a transport in either direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportMessage {
    /// Text message
    Text(String),
    /// Binary message
    Binary(Vec<u8>),
    /// Close message
    Close,
}

impl TransportMessage {
    /// Payload bytes of a data message, `None` for `Close`
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            TransportMessage::Text(text) => Some(text.into_bytes()),
            TransportMessage::Binary(bin) => Some(bin),
            TransportMessage::Close => None,
        }
    }
}

/// Outbound half of an open transport
#[async_trait::async_trait]
pub trait TransportSink: Send + Debug {
    /// Send a message over the connection
    async fn send(&mut self, message: TransportMessage) -> ConnectionResult<()>;

    /// Close the connection
    async fn close(&mut self) -> ConnectionResult<()>;
}

/// Inbound half of an open transport
#[async_trait::async_trait]
pub trait TransportStream: Send + Debug {
    /// Receive the next message from the connection.
    /// Returns None when the connection is closed
    async fn receive(&mut self) -> Option<ConnectionResult<TransportMessage>>;
}

/// An open transport, split so reads and writes can run on separate tasks
#[derive(Debug)]
pub struct Transport {
    pub sink: Box<dyn TransportSink>,
    pub stream: Box<dyn TransportStream>,
}

/// Opens transports. Resolving `connect` is the "opened" event; an error is
/// a failure before open.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + Debug {
    async fn connect(&self, url: &str) -> ConnectionResult<Transport>;
}
