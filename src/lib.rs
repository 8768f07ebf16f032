//! Client for remote terminal bridges.
//!
//! A [`BridgeClient`] keeps one shared control channel per host, carrying
//! JSON envelopes, and one data channel per terminal session, carrying raw
//! terminal bytes and binary resize frames.

pub mod config;
pub mod error;
pub mod logger;
pub mod protocol;
pub mod service;

pub use config::{BridgeConfig, ConfigLoader};
pub use error::{Error, Result};
pub use protocol::{ConnectionError, ControlMessage, ControlMessageType, ResizeFrame};
pub use service::{BridgeClient, ChannelHandle, ChannelState, DataChannel, TerminalSession};
