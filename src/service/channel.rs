/// Channel runtime: one writer task and one reader task per open transport,
/// fronted by a cloneable handle
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::protocol::{ConnectionError, ConnectionResult, Connector, Transport, TransportMessage};

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Process-unique serial for a connection attempt and the channel it opens
pub(crate) fn next_serial() -> u64 {
    NEXT_SERIAL.fetch_add(1, Ordering::Relaxed)
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Connection state of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Control,
    Data,
}

/// Handle to an open channel. Clones share the same connection; equality is
/// identity of the underlying connection.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    serial: u64,
    kind: ChannelKind,
    label: Arc<str>,
    outbound: mpsc::UnboundedSender<TransportMessage>,
    state: Arc<watch::Sender<ChannelState>>,
    shutdown: CancellationToken,
}

impl PartialEq for ChannelHandle {
    fn eq(&self, other: &Self) -> bool {
        self.serial == other.serial
    }
}

impl Eq for ChannelHandle {}

impl ChannelHandle {
    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Endpoint with the auth token masked
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// Queue a message; fails once the channel is closed
    pub fn send(&self, message: TransportMessage) -> ConnectionResult<()> {
        if !self.is_open() {
            return Err(ConnectionError::ConnectionClosed);
        }
        self.outbound
            .send(message)
            .map_err(|_| ConnectionError::ConnectionClosed)
    }

    pub fn send_text(&self, text: String) -> ConnectionResult<()> {
        self.send(TransportMessage::Text(text))
    }

    pub fn send_binary(&self, data: Vec<u8>) -> ConnectionResult<()> {
        self.send(TransportMessage::Binary(data))
    }

    /// Close the channel. Messages queued before the call are still written.
    /// Calling it again is a no-op.
    pub fn close(&self) {
        let previous = self.state.send_replace(ChannelState::Closed);
        if previous != ChannelState::Closed {
            info!("Closing {:?} channel {}", self.kind, self.label);
        }
        self.shutdown.cancel();
    }

    /// Resolves once the channel is closed by either side
    pub async fn closed(&self) {
        let mut state = self.state.subscribe();
        let _ = state.wait_for(|s| *s == ChannelState::Closed).await;
    }
}

/// Run `connector.connect` bounded by `timeout` and abandoned on `cancel`
pub(crate) async fn connect_transport(
    connector: &dyn Connector,
    url: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> ConnectionResult<Transport> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ConnectionError::Cancelled),
        result = tokio::time::timeout(timeout, connector.connect(url)) => {
            result.unwrap_or(Err(ConnectionError::Timeout))
        }
    }
}

/// Start the tasks for an open transport.
///
/// `on_message` sees every inbound message in receipt order. `on_close` runs
/// once, after the state has become `Closed`, whichever side closed.
pub(crate) fn spawn_channel<M, C>(
    serial: u64,
    kind: ChannelKind,
    label: String,
    transport: Transport,
    mut on_message: M,
    on_close: C,
) -> ChannelHandle
where
    M: FnMut(TransportMessage) + Send + 'static,
    C: FnOnce() + Send + 'static,
{
    let Transport { mut sink, mut stream } = transport;
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<TransportMessage>();
    let (state, _) = watch::channel(ChannelState::Open);
    let state = Arc::new(state);
    let shutdown = CancellationToken::new();
    let label: Arc<str> = Arc::from(label);

    let writer_shutdown = shutdown.clone();
    let writer_label = label.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                message = outbound_rx.recv() => {
                    let Some(message) = message else { break };
                    if let Err(e) = sink.send(message).await {
                        warn!("Write to {:?} channel {} failed: {}", kind, writer_label, e);
                        writer_shutdown.cancel();
                        break;
                    }
                }
                _ = writer_shutdown.cancelled() => break,
            }
        }
        if let Err(e) = sink.close().await {
            debug!("Closing sink of {} failed: {}", writer_label, e);
        }
    });

    let reader_shutdown = shutdown.clone();
    let reader_state = state.clone();
    let reader_label = label.clone();
    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                received = stream.receive() => received,
                _ = reader_shutdown.cancelled() => break,
            };
            match received {
                Some(Ok(TransportMessage::Close)) => {
                    info!("{:?} channel {} closed by peer", kind, reader_label);
                    break;
                }
                Some(Ok(message)) => on_message(message),
                Some(Err(e)) => {
                    warn!("{:?} channel {} failed: {}", kind, reader_label, e);
                    break;
                }
                None => {
                    info!("{:?} channel {} ended", kind, reader_label);
                    break;
                }
            }
        }
        reader_shutdown.cancel();
        reader_state.send_replace(ChannelState::Closed);
        on_close();
    });

    ChannelHandle {
        serial,
        kind,
        label,
        outbound,
        state,
        shutdown,
    }
}
