/// Service layer: channel managers, event dispatch and session orchestration
mod bridge_client;
mod channel;
mod control_channel;
mod data_channel;
mod event_bus;

pub use bridge_client::{BridgeClient, TerminalSession};
pub use channel::{ChannelHandle, ChannelKind, ChannelState};
pub use control_channel::ControlChannelManager;
pub use data_channel::{DataChannel, DataChannelManager, send_resize};
pub use event_bus::{EventBus, Listener, listener};
