/// Terminal session orchestration over control and data channels
use std::sync::Arc;

use tracing::{error, info};
use uuid::Uuid;

use crate::config::BridgeConfig;
use crate::error::Result;
use crate::protocol::{
    ConnectionResult, Connector, ControlMessage, ControlMessageType, Endpoints,
    OpenTerminalRequest, WebSocketConnector,
};
use crate::service::channel::ChannelHandle;
use crate::service::control_channel::ControlChannelManager;
use crate::service::data_channel::{DataChannel, DataChannelManager, send_resize};
use crate::service::event_bus::{EventBus, Listener};

/// A terminal opened on a remote host. The remote side reports the outcome
/// asynchronously as `OPEN_TERMINAL_OK`/`OPEN_TERMINAL_ERR` carrying
/// `context_id`.
#[derive(Debug)]
pub struct TerminalSession {
    pub context_id: String,
    pub channel_id: String,
    pub host: String,
    pub cols: u16,
    pub rows: u16,
    pub data: DataChannel,
}

/// Bridge client owning its listener registry and channel managers.
/// Independent clients share nothing.
#[derive(Debug)]
pub struct BridgeClient {
    events: Arc<EventBus>,
    control: ControlChannelManager,
    data: DataChannelManager,
}

impl BridgeClient {
    /// Client speaking WebSocket to the configured bridge
    pub fn new(config: &BridgeConfig) -> Result<Self> {
        Self::with_connector(config, Arc::new(WebSocketConnector::new()))
    }

    pub fn with_connector(config: &BridgeConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        let endpoints = Endpoints::new(&config.server.base_url)?;
        let timeout = config.connection.connect_timeout();
        let events = Arc::new(EventBus::new());

        info!("Creating bridge client for {}", endpoints.base());
        Ok(Self {
            control: ControlChannelManager::new(
                connector.clone(),
                endpoints.clone(),
                events.clone(),
                timeout,
            ),
            data: DataChannelManager::new(connector, endpoints, timeout),
            events,
        })
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn subscribe(&self, msg_type: ControlMessageType, listener: Listener) {
        self.events.subscribe(msg_type, listener);
    }

    pub fn unsubscribe(&self, msg_type: ControlMessageType, listener: &Listener) -> usize {
        self.events.unsubscribe(msg_type, listener)
    }

    pub fn control_channels(&self) -> &ControlChannelManager {
        &self.control
    }

    pub fn data_channels(&self) -> &DataChannelManager {
        &self.data
    }

    /// Shared control channel for `host`
    pub async fn acquire_control_channel(
        &self,
        host: &str,
        token: &str,
    ) -> ConnectionResult<ChannelHandle> {
        self.control.acquire(host, token).await
    }

    /// Open a terminal on `host`.
    ///
    /// The data channel is opened first; the open request goes out on the
    /// host's control channel only once it is up. Returns right after the
    /// request is written.
    pub async fn open_terminal(
        &self,
        host: &str,
        token: &str,
        cols: u16,
        rows: u16,
    ) -> Result<TerminalSession> {
        let context_id = Uuid::new_v4().to_string();
        let channel_id = Uuid::new_v4().to_string();
        info!(
            "Opening terminal on host {} (context {}, channel {}, {}x{})",
            host, context_id, channel_id, cols, rows
        );

        let data = self.data.open(host, &channel_id, token).await.inspect_err(|e| {
            error!("Failed to open web terminal on host {}: {}", host, e);
        })?;

        let request = OpenTerminalRequest {
            channel_id: channel_id.clone(),
            cols,
            rows,
        };
        if let Err(e) = self.send_open_request(host, token, &context_id, &request).await {
            error!("Failed to open web terminal on host {}: {}", host, e);
            data.close();
            return Err(e);
        }

        Ok(TerminalSession {
            context_id,
            channel_id,
            host: host.to_string(),
            cols,
            rows,
            data,
        })
    }

    async fn send_open_request(
        &self,
        host: &str,
        token: &str,
        context_id: &str,
        request: &OpenTerminalRequest,
    ) -> Result<()> {
        let control = self.control.acquire(host, token).await?;
        let message = ControlMessage::open_terminal(host, context_id, request).encode()?;
        control.send_text(message)?;
        Ok(())
    }

    /// Send a resize frame on `channel` if it is open; otherwise do nothing
    pub fn resize(&self, channel: &ChannelHandle, cols: u16, rows: u16) -> bool {
        send_resize(channel, cols, rows)
    }

    /// Close every data and control channel. Safe to call repeatedly.
    pub fn close(&self) {
        self.data.close_all();
        self.control.close_all();
    }
}

impl TerminalSession {
    pub fn resize(&mut self, cols: u16, rows: u16) -> bool {
        let sent = self.data.resize(cols, rows);
        if sent {
            self.cols = cols;
            self.rows = rows;
        }
        sent
    }

    pub fn close(&self) {
        self.data.close();
    }
}
