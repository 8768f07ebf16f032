/// Control channel manager: one shared signaling connection per host
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::protocol::endpoints::redact_url;
use crate::protocol::{
    ConnectionError, ConnectionResult, Connector, ControlMessage, Endpoints, TransportMessage,
};
use crate::service::channel::{
    ChannelHandle, ChannelKind, ChannelState, connect_transport, lock, next_serial, spawn_channel,
};
use crate::service::event_bus::EventBus;

type PendingChannel = Shared<BoxFuture<'static, ConnectionResult<ChannelHandle>>>;

/// Per-host connection state. A host with no slot is idle.
enum HostSlot {
    Connecting { serial: u64, pending: PendingChannel },
    Open(ChannelHandle),
}

impl HostSlot {
    fn serial(&self) -> u64 {
        match self {
            HostSlot::Connecting { serial, .. } => *serial,
            HostSlot::Open(handle) => handle.serial(),
        }
    }
}

type Slots = Arc<Mutex<HashMap<String, HostSlot>>>;

/// Owns the control channels of a client. Concurrent acquisitions for the
/// same host share a single connection attempt.
pub struct ControlChannelManager {
    connector: Arc<dyn Connector>,
    endpoints: Endpoints,
    events: Arc<EventBus>,
    connect_timeout: Duration,
    slots: Slots,
    shutdown: Mutex<CancellationToken>,
}

impl std::fmt::Debug for ControlChannelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hosts: Vec<String> = lock(&self.slots).keys().cloned().collect();
        f.debug_struct("ControlChannelManager")
            .field("base", &self.endpoints.base().as_str())
            .field("hosts", &hosts)
            .finish()
    }
}

impl ControlChannelManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        endpoints: Endpoints,
        events: Arc<EventBus>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            connector,
            endpoints,
            events,
            connect_timeout,
            slots: Arc::new(Mutex::new(HashMap::new())),
            shutdown: Mutex::new(CancellationToken::new()),
        }
    }

    /// Return the host's open control channel, join the attempt in flight,
    /// or start a new one
    pub async fn acquire(&self, host: &str, token: &str) -> ConnectionResult<ChannelHandle> {
        let pending = {
            let mut slots = lock(&self.slots);
            match slots.get(host) {
                Some(HostSlot::Open(handle)) if handle.is_open() => {
                    debug!("Reusing control channel for host {}", host);
                    return Ok(handle.clone());
                }
                Some(HostSlot::Connecting { pending, .. }) => {
                    debug!("Joining pending control channel attempt for host {}", host);
                    pending.clone()
                }
                _ => {
                    let serial = next_serial();
                    let pending = self.spawn_connect(host, token, serial);
                    slots.insert(
                        host.to_string(),
                        HostSlot::Connecting {
                            serial,
                            pending: pending.clone(),
                        },
                    );
                    pending
                }
            }
        };
        pending.await
    }

    /// Current state of the host's control channel
    pub fn state(&self, host: &str) -> ChannelState {
        match lock(&self.slots).get(host) {
            None => ChannelState::Idle,
            Some(HostSlot::Connecting { .. }) => ChannelState::Connecting,
            Some(HostSlot::Open(handle)) => handle.state(),
        }
    }

    /// Close every control channel and fail pending attempts. The manager
    /// stays usable; later acquisitions reconnect.
    pub fn close_all(&self) {
        let previous = std::mem::replace(&mut *lock(&self.shutdown), CancellationToken::new());
        previous.cancel();

        let drained: Vec<HostSlot> = lock(&self.slots).drain().map(|(_, slot)| slot).collect();
        for slot in drained {
            if let HostSlot::Open(handle) = slot {
                handle.close();
            }
        }
    }

    /// Run the attempt on its own task so it completes and settles the slot
    /// even when every caller waiting on it has been dropped
    fn spawn_connect(&self, host: &str, token: &str, serial: u64) -> PendingChannel {
        let attempt = tokio::spawn(self.connect(host, token, serial));
        let slots = self.slots.clone();
        let host = host.to_string();

        async move {
            attempt.await.unwrap_or_else(|e| {
                error!("Control channel attempt for host {} aborted: {}", host, e);
                let mut slots = lock(&slots);
                if slots.get(&host).map(HostSlot::serial) == Some(serial) {
                    slots.remove(&host);
                }
                Err(ConnectionError::Cancelled)
            })
        }
        .boxed()
        .shared()
    }

    fn connect(
        &self,
        host: &str,
        token: &str,
        serial: u64,
    ) -> BoxFuture<'static, ConnectionResult<ChannelHandle>> {
        let connector = self.connector.clone();
        let events = self.events.clone();
        let slots = self.slots.clone();
        let timeout = self.connect_timeout;
        let cancel = lock(&self.shutdown).clone();
        let url = self.endpoints.control(host, token);
        let host = host.to_string();

        async move {
            let result = async {
                let url = url?;
                info!("Opening control channel for host {}: {}", host, redact_url(&url));
                let transport = connect_transport(connector.as_ref(), &url, timeout, &cancel).await?;
                Ok::<_, ConnectionError>(spawn_channel(
                    serial,
                    ChannelKind::Control,
                    redact_url(&url),
                    transport,
                    dispatch_inbound(host.clone(), events),
                    reset_on_close(slots.clone(), host.clone(), serial),
                ))
            }
            .await;

            let mut slots = lock(&slots);
            let current = slots.get(&host).map(HostSlot::serial) == Some(serial);
            match result {
                Ok(handle) if cancel.is_cancelled() => {
                    handle.close();
                    Err(ConnectionError::Cancelled)
                }
                Ok(handle) => {
                    if current && handle.is_open() {
                        slots.insert(host.clone(), HostSlot::Open(handle.clone()));
                        info!("Control channel for host {} open", host);
                    } else if current {
                        slots.remove(&host);
                    }
                    Ok(handle)
                }
                Err(e) => {
                    error!("Failed to open control channel for host {}: {}", host, e);
                    if current {
                        slots.remove(&host);
                    }
                    Err(e)
                }
            }
        }
        .boxed()
    }
}

/// Decode inbound envelopes and hand them to the event bus. Undecodable
/// messages are dropped; the channel stays open.
fn dispatch_inbound(
    host: String,
    events: Arc<EventBus>,
) -> impl FnMut(TransportMessage) + Send + 'static {
    move |message| {
        let decoded = match message {
            TransportMessage::Text(text) => ControlMessage::decode(&text),
            TransportMessage::Binary(bin) => ControlMessage::decode_bytes(&bin),
            TransportMessage::Close => return,
        };
        match decoded {
            Ok(message) => {
                debug!(
                    "Control message {} for context {} from host {}",
                    message.event_name(),
                    message.context_id,
                    host
                );
                events.dispatch(&message);
            }
            Err(e) => warn!("Dropping control message from host {}: {}", host, e),
        }
    }
}

/// Return the host to idle, unless a newer attempt already replaced the slot
fn reset_on_close(slots: Slots, host: String, serial: u64) -> impl FnOnce() + Send + 'static {
    move || {
        let mut slots = lock(&slots);
        if slots.get(&host).map(HostSlot::serial) == Some(serial) {
            slots.remove(&host);
            info!("Control channel for host {} closed, state reset", host);
        }
    }
}
