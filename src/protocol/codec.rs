//! Wire formats: the JSON control envelope and the binary resize frame.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Leading byte that marks a resize frame on the data channel
pub const RESIZE_OPCODE: u8 = 0x37;

/// Fixed size of a resize frame in bytes
pub const RESIZE_FRAME_LEN: usize = 5;

/// Errors raised while decoding an inbound control envelope
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed control envelope: {0}")]
    Malformed(String),

    #[error("unknown control message type: {0}")]
    UnknownMessageType(u16),

    #[error("control envelope is not valid UTF-8")]
    NotUtf8,
}

/// Control message type codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum ControlMessageType {
    OpenTerminalReq,
    OpenTerminalOk,
    OpenTerminalErr,
    ChildExitNormally,
    ChildExitWithError,
    GeneralError,
}

impl ControlMessageType {
    pub const ALL: [ControlMessageType; 6] = [
        ControlMessageType::OpenTerminalReq,
        ControlMessageType::OpenTerminalOk,
        ControlMessageType::OpenTerminalErr,
        ControlMessageType::ChildExitNormally,
        ControlMessageType::ChildExitWithError,
        ControlMessageType::GeneralError,
    ];

    pub fn code(self) -> u16 {
        match self {
            ControlMessageType::OpenTerminalReq => 100,
            ControlMessageType::OpenTerminalOk => 101,
            ControlMessageType::OpenTerminalErr => 102,
            ControlMessageType::ChildExitNormally => 120,
            ControlMessageType::ChildExitWithError => 121,
            ControlMessageType::GeneralError => 130,
        }
    }

    /// Listener event name, `message-<code>`
    pub fn event_name(self) -> String {
        format!("message-{}", self.code())
    }
}

impl TryFrom<u16> for ControlMessageType {
    type Error = ProtocolError;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|t| t.code() == code)
            .ok_or(ProtocolError::UnknownMessageType(code))
    }
}

impl From<ControlMessageType> for u16 {
    fn from(t: ControlMessageType) -> Self {
        t.code()
    }
}

/// JSON envelope exchanged over a control channel
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlMessage {
    pub recipient: String,
    pub context_id: String,
    #[serde(rename = "type")]
    pub msg_type: ControlMessageType,
    pub content: Value,
}

/// Inbound shape; the type code is validated after parsing so unknown codes
/// are reported as such rather than as a generic serde error
#[derive(Deserialize)]
struct RawControlMessage {
    #[serde(default)]
    recipient: String,
    #[serde(default)]
    context_id: String,
    #[serde(rename = "type", alias = "msg_type")]
    msg_type: u16,
    #[serde(default)]
    content: Value,
}

/// Content of an `OPEN_TERMINAL_REQ`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenTerminalRequest {
    pub channel_id: String,
    pub cols: u16,
    pub rows: u16,
}

impl ControlMessage {
    /// Build the open request addressed to `host`
    pub fn open_terminal(host: &str, context_id: &str, request: &OpenTerminalRequest) -> Self {
        Self {
            recipient: format!("Host-{host}"),
            context_id: context_id.to_string(),
            msg_type: ControlMessageType::OpenTerminalReq,
            content: serde_json::json!({
                "channel_id": request.channel_id,
                "cols": request.cols,
                "rows": request.rows,
            }),
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let raw: RawControlMessage =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        Ok(Self {
            recipient: raw.recipient,
            context_id: raw.context_id,
            msg_type: ControlMessageType::try_from(raw.msg_type)?,
            content: raw.content,
        })
    }

    pub fn decode_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(bytes).map_err(|_| ProtocolError::NotUtf8)?;
        Self::decode(text)
    }

    /// Name of the event this message is dispatched under
    pub fn event_name(&self) -> String {
        self.msg_type.event_name()
    }
}

/// Terminal resize request: `[0x37][rows u16 BE][cols u16 BE]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeFrame {
    pub cols: u16,
    pub rows: u16,
}

impl ResizeFrame {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    pub fn encode(&self) -> [u8; RESIZE_FRAME_LEN] {
        let rows = self.rows.to_be_bytes();
        let cols = self.cols.to_be_bytes();
        [RESIZE_OPCODE, rows[0], rows[1], cols[0], cols[1]]
    }

    /// Recognize a resize frame by its opcode and exact length
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [RESIZE_OPCODE, r0, r1, c0, c1] => Some(Self {
                rows: u16::from_be_bytes([*r0, *r1]),
                cols: u16::from_be_bytes([*c0, *c1]),
            }),
            _ => None,
        }
    }
}
