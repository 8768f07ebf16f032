/// Data channel manager: one exclusive transport per terminal session
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::protocol::endpoints::redact_url;
use crate::protocol::{ConnectionError, ConnectionResult, Connector, Endpoints, ResizeFrame};
use crate::service::channel::{
    ChannelHandle, ChannelKind, connect_transport, lock, next_serial, spawn_channel,
};

/// Write a resize frame if the channel is open. A closed channel drops the
/// request silently; returns whether the frame was queued.
pub fn send_resize(channel: &ChannelHandle, cols: u16, rows: u16) -> bool {
    let frame = ResizeFrame::new(cols, rows);
    match channel.send_binary(frame.encode().to_vec()) {
        Ok(()) => {
            debug!("Resize {}x{} sent on {}", cols, rows, channel.label());
            true
        }
        Err(_) => {
            debug!("Dropping resize {}x{}: channel {} not open", cols, rows, channel.label());
            false
        }
    }
}

/// A session's data channel: raw terminal bytes in both directions
#[derive(Debug)]
pub struct DataChannel {
    host: String,
    channel_id: String,
    handle: ChannelHandle,
    output: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl DataChannel {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn handle(&self) -> &ChannelHandle {
        &self.handle
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_open()
    }

    /// Write terminal input bytes
    pub fn send_input(&self, data: &[u8]) -> ConnectionResult<()> {
        self.handle.send_binary(data.to_vec())
    }

    pub fn resize(&self, cols: u16, rows: u16) -> bool {
        send_resize(&self.handle, cols, rows)
    }

    /// Next chunk of terminal output; `None` once the channel is closed and drained.
    ///
    /// Output is buffered without a bound until it is read, so a session
    /// that is held open must be drained by its owner.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.output.recv().await
    }

    pub fn close(&self) {
        self.handle.close();
    }
}

/// Opens data channels and tracks the live ones so they can be closed together
pub struct DataChannelManager {
    connector: Arc<dyn Connector>,
    endpoints: Endpoints,
    connect_timeout: Duration,
    live: Arc<Mutex<HashMap<String, ChannelHandle>>>,
    shutdown: Mutex<CancellationToken>,
}

impl std::fmt::Debug for DataChannelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataChannelManager")
            .field("base", &self.endpoints.base().as_str())
            .field("live", &self.live_count())
            .finish()
    }
}

impl DataChannelManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        endpoints: Endpoints,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            connector,
            endpoints,
            connect_timeout,
            live: Arc::new(Mutex::new(HashMap::new())),
            shutdown: Mutex::new(CancellationToken::new()),
        }
    }

    /// Open the data channel for `channel_id` on `host`. Not retried on failure.
    pub async fn open(
        &self,
        host: &str,
        channel_id: &str,
        token: &str,
    ) -> ConnectionResult<DataChannel> {
        let url = self.endpoints.data(host, channel_id, token)?;
        let label = redact_url(&url);
        let cancel = lock(&self.shutdown).clone();
        info!("Opening data channel {} for host {}: {}", channel_id, host, label);

        let transport =
            connect_transport(self.connector.as_ref(), &url, self.connect_timeout, &cancel)
                .await
                .inspect_err(|e| error!("Failed to open data channel {}: {}", channel_id, e))?;

        let (output_tx, output) = mpsc::unbounded_channel();
        let live = self.live.clone();
        let key = channel_id.to_string();
        let handle = spawn_channel(
            next_serial(),
            ChannelKind::Data,
            label,
            transport,
            move |message| {
                if let Some(bytes) = message.into_bytes() {
                    let _ = output_tx.send(bytes);
                }
            },
            move || {
                lock(&live).remove(&key);
            },
        );

        self.track(&cancel, channel_id, &handle)?;

        Ok(DataChannel {
            host: host.to_string(),
            channel_id: channel_id.to_string(),
            handle,
            output,
        })
    }

    /// Register an open channel with the live set. The cancellation check
    /// runs under the lock `close_all` drains, so an open that races a
    /// `close_all` is either drained by it or fails here.
    fn track(
        &self,
        cancel: &CancellationToken,
        channel_id: &str,
        handle: &ChannelHandle,
    ) -> ConnectionResult<()> {
        let mut live = lock(&self.live);
        if cancel.is_cancelled() {
            handle.close();
            return Err(ConnectionError::Cancelled);
        }
        // The close hook takes the same lock, so a channel that closed
        // already is never left behind in the map
        if handle.is_open() {
            live.insert(channel_id.to_string(), handle.clone());
        }
        Ok(())
    }

    pub fn live_count(&self) -> usize {
        lock(&self.live).len()
    }

    /// Close every live data channel and fail pending opens
    pub fn close_all(&self) {
        let previous = std::mem::replace(&mut *lock(&self.shutdown), CancellationToken::new());
        previous.cancel();

        let drained: Vec<ChannelHandle> = lock(&self.live).drain().map(|(_, h)| h).collect();
        for handle in drained {
            handle.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MockConnector, MockPeer, TransportMessage};

    async fn wait_closed_by_client(peer: &MockPeer) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while !peer.is_closed_by_client() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    fn manager(connector: &MockConnector) -> DataChannelManager {
        DataChannelManager::new(
            Arc::new(connector.clone()),
            Endpoints::new("ws://bridge.test/api").unwrap(),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn opens_exclusive_channel_per_session() {
        let connector = MockConnector::new();
        let manager = manager(&connector);

        let a = manager.open("h1", "c1", "t").await.unwrap();
        let b = manager.open("h1", "c2", "t").await.unwrap();
        assert_ne!(a.handle(), b.handle());
        assert_eq!(
            connector.attempts(),
            vec![
                "ws://bridge.test/api/bridge/data/h1/c1?auth=t",
                "ws://bridge.test/api/bridge/data/h1/c2?auth=t",
            ]
        );
        assert_eq!(manager.live_count(), 2);
    }

    #[tokio::test]
    async fn terminal_bytes_pass_through() {
        let connector = MockConnector::new();
        let manager = manager(&connector);
        let mut channel = manager.open("h1", "c1", "t").await.unwrap();
        let peer = connector.peers()[0].clone();

        peer.push_binary(b"\x1b[1mbold");
        peer.push_text("plain");
        assert_eq!(channel.recv().await.unwrap(), b"\x1b[1mbold".to_vec());
        assert_eq!(channel.recv().await.unwrap(), b"plain".to_vec());

        channel.send_input(b"ls\r").unwrap();
        channel.close();
        assert_eq!(channel.recv().await, None);
        wait_closed_by_client(&peer).await;
        assert_eq!(peer.sent(), vec![TransportMessage::Binary(b"ls\r".to_vec())]);
    }

    #[tokio::test]
    async fn resize_only_when_open() {
        let connector = MockConnector::new();
        let manager = manager(&connector);
        let channel = manager.open("h1", "c1", "t").await.unwrap();
        let peer = connector.peers()[0].clone();

        assert!(channel.resize(80, 24));
        assert!(channel.resize(132, 43));

        channel.close();
        assert!(!channel.resize(100, 30));
        wait_closed_by_client(&peer).await;

        assert_eq!(
            peer.sent(),
            vec![
                TransportMessage::Binary(vec![0x37, 0x00, 0x18, 0x00, 0x50]),
                TransportMessage::Binary(vec![0x37, 0x00, 0x2B, 0x00, 0x84]),
            ]
        );
    }

    #[tokio::test]
    async fn failed_open_is_reported_and_not_tracked() {
        let connector = MockConnector::new();
        let manager = manager(&connector);
        connector.refuse("/bridge/data/");

        let err = manager.open("h1", "c1", "t").await.unwrap_err();
        assert!(matches!(err, ConnectionError::WebSocket(_)));
        assert_eq!(manager.live_count(), 0);
        assert_eq!(connector.attempts().len(), 1);
    }

    #[tokio::test]
    async fn peer_close_removes_channel() {
        let connector = MockConnector::new();
        let manager = manager(&connector);
        let channel = manager.open("h1", "c1", "t").await.unwrap();

        connector.peers()[0].close();
        channel.handle().closed().await;
        tokio::time::timeout(Duration::from_secs(1), async {
            while manager.live_count() > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(!channel.resize(80, 24));
    }

    #[tokio::test]
    async fn open_racing_close_all_is_cancelled_and_untracked() {
        let connector = MockConnector::new();
        let manager = manager(&connector);
        let cancel = lock(&manager.shutdown).clone();
        let transport = connector
            .connect("ws://bridge.test/api/bridge/data/h1/c1?auth=t")
            .await
            .unwrap();
        let handle = spawn_channel(
            next_serial(),
            ChannelKind::Data,
            "c1".to_string(),
            transport,
            |_| {},
            || {},
        );

        manager.close_all();
        assert_eq!(manager.track(&cancel, "c1", &handle), Err(ConnectionError::Cancelled));
        assert!(!handle.is_open());
        assert_eq!(manager.live_count(), 0);
        wait_closed_by_client(&connector.peers()[0]).await;
    }

    #[tokio::test]
    async fn open_before_close_all_is_drained() {
        let connector = MockConnector::new();
        let manager = manager(&connector);
        let channel = manager.open("h1", "c1", "t").await.unwrap();
        assert_eq!(manager.live_count(), 1);

        manager.close_all();
        assert!(!channel.is_open());
        assert_eq!(manager.live_count(), 0);
    }

    #[tokio::test]
    async fn close_all_fails_pending_open() {
        let connector = MockConnector::new();
        let manager = manager(&connector);
        connector.hold();

        let (pending, _) = tokio::join!(manager.open("h1", "c1", "t"), async {
            tokio::task::yield_now().await;
            manager.close_all();
        });

        assert_eq!(pending.unwrap_err(), ConnectionError::Cancelled);
        assert_eq!(manager.live_count(), 0);
        assert!(connector.peers().is_empty());
    }
}
