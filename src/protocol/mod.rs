/// Protocol layer: wire codec, endpoint URLs and transport implementations
mod codec;
mod connection;
pub mod endpoints;
mod mock_connection;
mod websocket_connection;

pub use codec::{
    ControlMessage, ControlMessageType, OpenTerminalRequest, ProtocolError, RESIZE_FRAME_LEN,
    RESIZE_OPCODE, ResizeFrame,
};
pub use connection::{
    ConnectionError, ConnectionResult, Connector, Transport, TransportMessage, TransportSink,
    TransportStream,
};
pub use endpoints::Endpoints;
pub use mock_connection::{MockConnector, MockPeer};
pub use websocket_connection::WebSocketConnector;
