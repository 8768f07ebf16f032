/// In-memory transport for exercising channel managers without a server.
/// Every connection is recorded and exposed as a [`MockPeer`] that plays the
/// server side.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::protocol::{
    ConnectionError, ConnectionResult, Connector, Transport, TransportMessage, TransportSink,
    TransportStream,
};

#[derive(Debug, Default)]
struct MockState {
    attempts: Vec<String>,
    peers: Vec<MockPeer>,
    refused: Vec<String>,
}

/// Connector whose connections terminate in [`MockPeer`]s
#[derive(Debug, Clone)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
    held: Arc<watch::Sender<bool>>,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector {
    pub fn new() -> Self {
        let (held, _) = watch::channel(false);
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            held: Arc::new(held),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail every future attempt whose URL contains `pattern`
    pub fn refuse(&self, pattern: &str) {
        self.lock().refused.push(pattern.to_string());
    }

    /// Stop refusing all patterns
    pub fn accept_all(&self) {
        self.lock().refused.clear();
    }

    /// Park connection attempts until [`MockConnector::release`]
    pub fn hold(&self) {
        self.held.send_replace(true);
    }

    pub fn release(&self) {
        self.held.send_replace(false);
    }

    /// URLs of every attempt made so far, in order
    pub fn attempts(&self) -> Vec<String> {
        self.lock().attempts.clone()
    }

    pub fn attempts_matching(&self, pattern: &str) -> usize {
        self.lock()
            .attempts
            .iter()
            .filter(|url| url.contains(pattern))
            .count()
    }

    /// Server ends of every established connection
    pub fn peers(&self) -> Vec<MockPeer> {
        self.lock().peers.clone()
    }

    pub fn peers_matching(&self, pattern: &str) -> Vec<MockPeer> {
        self.lock()
            .peers
            .iter()
            .filter(|peer| peer.url.contains(pattern))
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &str) -> ConnectionResult<Transport> {
        self.lock().attempts.push(url.to_string());

        let mut held = self.held.subscribe();
        // The sender lives in self, so this only fails if it is dropped mid-wait
        let _ = held.wait_for(|held| !*held).await;

        let mut state = self.lock();
        if state.refused.iter().any(|pattern| url.contains(pattern.as_str())) {
            debug!("Mock connector refusing {}", url);
            return Err(ConnectionError::WebSocket("connection refused".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let peer = MockPeer {
            url: url.to_string(),
            sent: Arc::new(Mutex::new(Vec::new())),
            inbound: Arc::new(Mutex::new(Some(tx))),
            client_closed: Arc::new(AtomicBool::new(false)),
        };
        state.peers.push(peer.clone());

        Ok(Transport {
            sink: Box::new(MockSink { peer }),
            stream: Box::new(MockSource { rx }),
        })
    }
}

/// Server side of a mock connection
#[derive(Debug, Clone)]
pub struct MockPeer {
    url: String,
    sent: Arc<Mutex<Vec<TransportMessage>>>,
    inbound: Arc<Mutex<Option<mpsc::UnboundedSender<TransportMessage>>>>,
    client_closed: Arc<AtomicBool>,
}

impl MockPeer {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Deliver a message to the client; false once the connection is closed
    pub fn push(&self, message: TransportMessage) -> bool {
        let inbound = self.inbound.lock().unwrap_or_else(PoisonError::into_inner);
        inbound
            .as_ref()
            .is_some_and(|tx| tx.send(message).is_ok())
    }

    pub fn push_text(&self, text: &str) -> bool {
        self.push(TransportMessage::Text(text.to_string()))
    }

    pub fn push_binary(&self, bytes: &[u8]) -> bool {
        self.push(TransportMessage::Binary(bytes.to_vec()))
    }

    /// Close from the server side; the client's stream ends
    pub fn close(&self) {
        self.inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Messages the client has written, in order
    pub fn sent(&self) -> Vec<TransportMessage> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether the client closed its end
    pub fn is_closed_by_client(&self) -> bool {
        self.client_closed.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct MockSink {
    peer: MockPeer,
}

#[async_trait::async_trait]
impl TransportSink for MockSink {
    async fn send(&mut self, message: TransportMessage) -> ConnectionResult<()> {
        if self.peer.client_closed.load(Ordering::SeqCst) {
            return Err(ConnectionError::ConnectionClosed);
        }
        if message == TransportMessage::Close {
            return self.close().await;
        }
        self.peer
            .sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
        Ok(())
    }

    async fn close(&mut self) -> ConnectionResult<()> {
        // A real server acknowledges the close, which ends the inbound stream
        self.peer.client_closed.store(true, Ordering::SeqCst);
        self.peer.close();
        Ok(())
    }
}

#[derive(Debug)]
struct MockSource {
    rx: mpsc::UnboundedReceiver<TransportMessage>,
}

#[async_trait::async_trait]
impl TransportStream for MockSource {
    async fn receive(&mut self) -> Option<ConnectionResult<TransportMessage>> {
        self.rx.recv().await.map(Ok)
    }
}
