use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bridge_terminal::protocol::{MockConnector, MockPeer, TransportMessage};
use bridge_terminal::service::listener;
use bridge_terminal::{
    BridgeClient, BridgeConfig, ChannelState, ConnectionError, ControlMessageType, Error,
};
use serde_json::Value;

fn client(connector: &MockConnector) -> BridgeClient {
    let mut config = BridgeConfig::default();
    config.server.base_url = "ws://bridge.test/api".to_string();
    BridgeClient::with_connector(&config, Arc::new(connector.clone())).unwrap()
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn control_peer(connector: &MockConnector) -> MockPeer {
    connector.peers_matching("/bridge/ctrl/").remove(0)
}

fn sent_json(peer: &MockPeer) -> Vec<Value> {
    peer.sent()
        .into_iter()
        .map(|m| match m {
            TransportMessage::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("unexpected control frame {other:?}"),
        })
        .collect()
}

#[tokio::test]
async fn open_terminal_opens_data_then_control_and_sends_request() {
    let connector = MockConnector::new();
    let client = client(&connector);

    let session = client.open_terminal("node-1", "secret", 120, 40).await.unwrap();

    let attempts = connector.attempts();
    assert_eq!(attempts.len(), 2);
    assert_eq!(
        attempts[0],
        format!("ws://bridge.test/api/bridge/data/node-1/{}?auth=secret", session.channel_id)
    );
    assert_eq!(attempts[1], "ws://bridge.test/api/bridge/ctrl/node-1?auth=secret");

    let peer = control_peer(&connector);
    eventually(|| peer.sent().len() == 1).await;
    let request = &sent_json(&peer)[0];
    assert_eq!(request["recipient"], "Host-node-1");
    assert_eq!(request["type"], 100);
    assert_eq!(request["context_id"], session.context_id.as_str());
    assert_eq!(request["content"]["channel_id"], session.channel_id.as_str());
    assert_eq!(request["content"]["cols"], 120);
    assert_eq!(request["content"]["rows"], 40);

    assert_eq!((session.cols, session.rows), (120, 40));
    assert!(session.data.is_open());
}

#[tokio::test]
async fn sessions_on_one_host_share_the_control_channel() {
    let connector = MockConnector::new();
    let client = client(&connector);

    let a = client.open_terminal("node-1", "t", 80, 24).await.unwrap();
    let b = client.open_terminal("node-1", "t", 80, 24).await.unwrap();
    let c = client.open_terminal("node-2", "t", 80, 24).await.unwrap();

    assert_eq!(connector.attempts_matching("/bridge/ctrl/node-1"), 1);
    assert_eq!(connector.attempts_matching("/bridge/ctrl/node-2"), 1);
    assert_eq!(connector.attempts_matching("/bridge/data/"), 3);
    assert_ne!(a.data.handle(), b.data.handle());
    assert_ne!(b.data.handle(), c.data.handle());

    let peer = connector.peers_matching("/bridge/ctrl/node-1").remove(0);
    eventually(|| peer.sent().len() == 2).await;
    let contexts: Vec<Value> = sent_json(&peer).iter().map(|r| r["context_id"].clone()).collect();
    assert_eq!(contexts, vec![Value::from(a.context_id.clone()), Value::from(b.context_id.clone())]);
}

#[tokio::test]
async fn session_identifiers_are_unique() {
    let connector = MockConnector::new();
    let client = client(&connector);
    let mut pairs = HashSet::new();
    let mut ids = HashSet::new();

    for _ in 0..10_000 {
        let session = client.open_terminal("node-1", "t", 80, 24).await.unwrap();
        assert!(ids.insert(session.context_id.clone()));
        assert!(ids.insert(session.channel_id.clone()));
        pairs.insert((session.context_id.clone(), session.channel_id.clone()));
        session.close();
    }

    assert_eq!(pairs.len(), 10_000);
    assert_eq!(connector.attempts_matching("/bridge/ctrl/"), 1);
}

#[tokio::test]
async fn resize_writes_one_frame_per_call_only_while_open() {
    let connector = MockConnector::new();
    let client = client(&connector);
    let session = client.open_terminal("node-1", "t", 80, 24).await.unwrap();
    let data_peer = connector.peers_matching("/bridge/data/").remove(0);

    assert!(client.resize(session.data.handle(), 80, 24));
    assert!(client.resize(session.data.handle(), 100, 50));

    session.close();
    assert!(!client.resize(session.data.handle(), 90, 30));

    eventually(|| data_peer.is_closed_by_client()).await;
    assert_eq!(
        data_peer.sent(),
        vec![
            TransportMessage::Binary(vec![0x37, 0x00, 0x18, 0x00, 0x50]),
            TransportMessage::Binary(vec![0x37, 0x00, 0x32, 0x00, 0x64]),
        ]
    );
}

#[tokio::test]
async fn open_result_fans_out_to_listeners_in_order() {
    let connector = MockConnector::new();
    let client = client(&connector);
    let calls = Arc::new(Mutex::new(Vec::new()));

    for name in ["first", "second"] {
        let calls = calls.clone();
        client.subscribe(
            ControlMessageType::OpenTerminalOk,
            listener(move |m| calls.lock().unwrap().push((name, m.context_id.clone()))),
        );
    }
    let err_calls = calls.clone();
    client.subscribe(
        ControlMessageType::OpenTerminalErr,
        listener(move |m| err_calls.lock().unwrap().push(("err", m.context_id.clone()))),
    );

    let session = client.open_terminal("node-1", "t", 80, 24).await.unwrap();
    let reply = serde_json::json!({
        "recipient": "Frontend",
        "context_id": session.context_id,
        "type": 101,
        "content": { "channel_id": session.channel_id },
    });
    control_peer(&connector).push_text(&reply.to_string());

    eventually(|| calls.lock().unwrap().len() == 2).await;
    let calls = calls.lock().unwrap().clone();
    assert_eq!(
        calls,
        vec![("first", session.context_id.clone()), ("second", session.context_id.clone())]
    );
}

#[tokio::test]
async fn data_channel_failure_sends_nothing_on_control() {
    let connector = MockConnector::new();
    let client = client(&connector);
    connector.refuse("/bridge/data/");

    let err = client.open_terminal("node-1", "t", 80, 24).await.unwrap_err();
    assert!(err.is_connection());
    assert_eq!(connector.attempts_matching("/bridge/ctrl/"), 0);
    assert!(connector.peers_matching("/bridge/ctrl/").is_empty());
    assert_eq!(client.control_channels().state("node-1"), ChannelState::Idle);
}

#[tokio::test]
async fn close_fails_a_pending_data_channel_open() {
    let connector = MockConnector::new();
    let client = client(&connector);
    connector.hold();

    let (result, _) = tokio::join!(client.open_terminal("node-1", "t", 80, 24), async {
        eventually(|| connector.attempts_matching("/bridge/data/") == 1).await;
        client.close();
    });

    assert!(matches!(result, Err(Error::Connection(ConnectionError::Cancelled))));
    assert_eq!(connector.attempts_matching("/bridge/ctrl/"), 0);
    assert_eq!(client.data_channels().live_count(), 0);
    assert_eq!(client.control_channels().state("node-1"), ChannelState::Idle);

    connector.release();
    client.open_terminal("node-1", "t", 80, 24).await.unwrap();
}

#[tokio::test]
async fn control_channel_failure_closes_the_new_data_channel() {
    let connector = MockConnector::new();
    let client = client(&connector);
    connector.refuse("/bridge/ctrl/");

    let err = client.open_terminal("node-1", "t", 80, 24).await.unwrap_err();
    assert!(err.is_connection());

    let data_peer = connector.peers_matching("/bridge/data/").remove(0);
    eventually(|| data_peer.is_closed_by_client()).await;
    assert!(data_peer.sent().is_empty());
    eventually(|| client.data_channels().live_count() == 0).await;
    assert_eq!(client.control_channels().state("node-1"), ChannelState::Idle);

    connector.accept_all();
    client.open_terminal("node-1", "t", 80, 24).await.unwrap();
    assert_eq!(connector.attempts_matching("/bridge/ctrl/"), 2);
}

#[tokio::test]
async fn control_channel_reconnects_after_transport_close() {
    let connector = MockConnector::new();
    let client = client(&connector);
    client.open_terminal("node-1", "t", 80, 24).await.unwrap();
    let first = client.acquire_control_channel("node-1", "t").await.unwrap();

    control_peer(&connector).close();
    first.closed().await;

    client.open_terminal("node-1", "t", 80, 24).await.unwrap();
    assert_eq!(connector.attempts_matching("/bridge/ctrl/"), 2);
    let second = client.acquire_control_channel("node-1", "t").await.unwrap();
    assert_ne!(first, second);
}

#[tokio::test]
async fn close_is_idempotent_and_client_stays_usable() {
    let connector = MockConnector::new();
    let client = client(&connector);
    let session = client.open_terminal("node-1", "t", 80, 24).await.unwrap();

    client.close();
    client.close();

    assert!(!session.data.is_open());
    assert_eq!(client.control_channels().state("node-1"), ChannelState::Idle);
    assert_eq!(client.data_channels().live_count(), 0);
    assert!(!client.resize(session.data.handle(), 80, 24));

    let fresh = client.open_terminal("node-1", "t", 80, 24).await.unwrap();
    assert!(fresh.data.is_open());
    assert_eq!(connector.attempts_matching("/bridge/ctrl/"), 2);
}

#[tokio::test]
async fn independent_clients_share_nothing() {
    let connector = MockConnector::new();
    let a = client(&connector);
    let b = client(&connector);

    a.open_terminal("node-1", "t", 80, 24).await.unwrap();
    b.open_terminal("node-1", "t", 80, 24).await.unwrap();

    assert_eq!(connector.attempts_matching("/bridge/ctrl/"), 2);
    a.close();
    assert_eq!(b.control_channels().state("node-1"), ChannelState::Open);
}
