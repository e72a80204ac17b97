use std::time::Duration;

use tokio::sync::Notify;

use super::*;
use crate::fake::FakeRelay;

fn url() -> Url {
    Url::parse("wss://cable.ua5v.com/cable/new/00112233445566778899AABBCCDDEEFF").unwrap()
}

fn tunnel(
    role: TunnelRole,
    relay: &Arc<FakeRelay>,
) -> (TunnelWebsocket, mpsc::UnboundedReceiver<TunnelEvent>) {
    TunnelWebsocket::new(url(), role, relay.clone())
}

async fn next(events: &mut mpsc::UnboundedReceiver<TunnelEvent>) -> TunnelEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("no tunnel event")
        .expect("event channel closed")
}

#[tokio::test]
async fn new_tunnels_learn_their_routing_id() {
    let relay = Arc::new(FakeRelay::new().with_routing_id("aabbccdd"));
    let (websocket, mut events) = tunnel(TunnelRole::New, &relay);
    assert_eq!(websocket.phase().await, Phase::None);

    websocket.connect().await.unwrap();
    assert!(matches!(
        next(&mut events).await,
        TunnelEvent::Connected {
            routing_id: Some([0xaa, 0xbb, 0xcc])
        }
    ));
    assert_eq!(websocket.phase().await, Phase::Connected);
    assert_eq!(relay.requests(), vec![(url(), "fido.cable".to_owned())]);
}

#[tokio::test]
async fn frames_flow_both_ways() {
    let relay = Arc::new(FakeRelay::new());
    let (websocket, mut events) = tunnel(TunnelRole::Connect, &relay);
    websocket.connect().await.unwrap();
    assert!(matches!(
        next(&mut events).await,
        TunnelEvent::Connected { routing_id: None }
    ));

    websocket.send(vec![1, 2, 3]).await.unwrap();
    assert_eq!(relay.sent(), vec![vec![1, 2, 3]]);

    relay.push(vec![4, 5]);
    assert!(matches!(next(&mut events).await, TunnelEvent::Message(data) if data == [4, 5]));
}

#[tokio::test]
async fn connecting_twice_closes_the_tunnel() {
    let gate = Arc::new(Notify::new());
    let relay = Arc::new(FakeRelay::new().gated(gate.clone()));
    let (websocket, mut events) = tunnel(TunnelRole::Connect, &relay);

    websocket.connect().await.unwrap();
    assert_eq!(websocket.phase().await, Phase::Connecting);
    assert!(matches!(
        websocket.connect().await,
        Err(TunnelError::AlreadyConnected)
    ));
    assert_eq!(websocket.phase().await, Phase::Disconnected);
    assert!(matches!(next(&mut events).await, TunnelEvent::Closed));

    // the pending connection attempt was abandoned
    gate.notify_one();
    tokio::task::yield_now().await;
    assert_eq!(websocket.phase().await, Phase::Disconnected);
    assert!(events.try_recv().is_err());
    assert_eq!(relay.closed(), 0);
}

#[tokio::test]
async fn connecting_after_close_fails() {
    let relay = Arc::new(FakeRelay::new());
    let (websocket, _events) = tunnel(TunnelRole::Connect, &relay);
    websocket.close().await;
    assert!(matches!(
        websocket.connect().await,
        Err(TunnelError::AlreadyConnected)
    ));
    assert!(relay.requests().is_empty());
}

#[tokio::test]
async fn closing_an_unused_tunnel() {
    let relay = Arc::new(FakeRelay::new());
    let (websocket, mut events) = tunnel(TunnelRole::Connect, &relay);

    websocket.close().await;
    assert_eq!(websocket.phase().await, Phase::Disconnected);
    assert!(matches!(next(&mut events).await, TunnelEvent::Closed));

    websocket.close_websocket().await;
    assert!(events.try_recv().is_err());
    assert!(relay.requests().is_empty());
}

#[tokio::test]
async fn closing_twice_closes_the_socket_once() {
    let relay = Arc::new(FakeRelay::new());
    let (websocket, mut events) = tunnel(TunnelRole::Connect, &relay);
    websocket.connect().await.unwrap();
    assert!(matches!(
        next(&mut events).await,
        TunnelEvent::Connected { .. }
    ));

    websocket.close().await;
    websocket.clone().close().await;
    assert_eq!(relay.closed(), 1);
    assert!(matches!(next(&mut events).await, TunnelEvent::Closed));
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn closing_while_connecting_abandons_the_socket() {
    let gate = Arc::new(Notify::new());
    let relay = Arc::new(FakeRelay::new().gated(gate.clone()));
    let (websocket, mut events) = tunnel(TunnelRole::Connect, &relay);
    websocket.connect().await.unwrap();
    tokio::task::yield_now().await;

    websocket.close().await;
    gate.notify_one();
    tokio::task::yield_now().await;

    assert!(matches!(next(&mut events).await, TunnelEvent::Closed));
    assert!(events.try_recv().is_err());
    assert_eq!(websocket.phase().await, Phase::Disconnected);
}

#[tokio::test]
async fn new_tunnels_need_a_routing_id() {
    for relay in [
        FakeRelay::new(),
        FakeRelay::new().with_routing_id("aabb"),
        FakeRelay::new().with_routing_id("not hex"),
    ] {
        let relay = Arc::new(relay);
        let (websocket, mut events) = tunnel(TunnelRole::New, &relay);
        websocket.connect().await.unwrap();
        assert!(matches!(
            next(&mut events).await,
            TunnelEvent::Error(TunnelError::MissingRoutingId)
        ));
        assert!(matches!(next(&mut events).await, TunnelEvent::Closed));
        assert_eq!(websocket.phase().await, Phase::Disconnected);
        assert_eq!(relay.closed(), 1);
    }
}

#[tokio::test]
async fn refused_connections_are_reported() {
    let relay = Arc::new(FakeRelay::new().refusing());
    let (websocket, mut events) = tunnel(TunnelRole::Connect, &relay);
    websocket.connect().await.unwrap();
    assert!(matches!(
        next(&mut events).await,
        TunnelEvent::Error(TunnelError::Socket(Some(_)))
    ));
    assert!(matches!(next(&mut events).await, TunnelEvent::Closed));
}

#[tokio::test]
async fn sending_needs_a_connection() {
    let relay = Arc::new(FakeRelay::new());
    let (websocket, mut events) = tunnel(TunnelRole::Connect, &relay);
    assert!(matches!(
        websocket.send(vec![1]).await,
        Err(TunnelError::NotConnected)
    ));
    assert_eq!(websocket.phase().await, Phase::Disconnected);
    assert!(matches!(next(&mut events).await, TunnelEvent::Closed));
}

#[tokio::test]
async fn failed_writes_close_the_tunnel() {
    let relay = Arc::new(FakeRelay::new().with_broken_sink());
    let (websocket, mut events) = tunnel(TunnelRole::Connect, &relay);
    websocket.connect().await.unwrap();
    next(&mut events).await;

    assert!(matches!(
        websocket.send(vec![1]).await,
        Err(TunnelError::Socket(Some(_)))
    ));
    assert_eq!(websocket.phase().await, Phase::Disconnected);
    assert!(matches!(next(&mut events).await, TunnelEvent::Closed));
    assert_eq!(relay.closed(), 1);
}

#[tokio::test]
async fn the_relay_hanging_up_closes_the_tunnel() {
    let relay = Arc::new(FakeRelay::new());
    let (websocket, mut events) = tunnel(TunnelRole::Connect, &relay);
    websocket.connect().await.unwrap();
    next(&mut events).await;

    relay.hang_up();
    assert!(matches!(next(&mut events).await, TunnelEvent::Closed));
    assert_eq!(websocket.phase().await, Phase::Disconnected);
    assert!(matches!(
        websocket.send(vec![1]).await,
        Err(TunnelError::NotConnected)
    ));
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn read_errors_close_the_tunnel() {
    let relay = Arc::new(FakeRelay::new());
    let (websocket, mut events) = tunnel(TunnelRole::Connect, &relay);
    websocket.connect().await.unwrap();
    next(&mut events).await;

    relay.push(vec![9]);
    relay.break_stream();
    assert!(matches!(next(&mut events).await, TunnelEvent::Message(_)));
    assert!(matches!(
        next(&mut events).await,
        TunnelEvent::Error(TunnelError::Socket(Some(reason))) if reason == "connection reset"
    ));
    assert!(matches!(next(&mut events).await, TunnelEvent::Closed));
    assert_eq!(websocket.phase().await, Phase::Disconnected);
    assert_eq!(relay.closed(), 1);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn closing_does_not_wait_for_a_stalled_write() {
    let stall = Arc::new(Notify::new());
    let relay = Arc::new(FakeRelay::new().with_stalled_writes(stall.clone()));
    let (websocket, mut events) = tunnel(TunnelRole::Connect, &relay);
    websocket.connect().await.unwrap();
    next(&mut events).await;

    let writing = tokio::spawn({
        let websocket = websocket.clone();
        async move { websocket.send(vec![1]).await }
    });
    tokio::task::yield_now().await;

    tokio::time::timeout(Duration::from_secs(1), websocket.close())
        .await
        .expect("close waited for the write");
    assert_eq!(websocket.phase().await, Phase::Disconnected);
    assert!(matches!(next(&mut events).await, TunnelEvent::Closed));
    assert_eq!(relay.closed(), 0);

    // the writer closes the socket once its frame is out
    stall.notify_one();
    assert!(writing.await.unwrap().is_ok());
    assert_eq!(relay.sent(), vec![vec![1]]);
    assert_eq!(relay.closed(), 1);
    assert!(matches!(
        websocket.send(vec![2]).await,
        Err(TunnelError::NotConnected)
    ));
}

#[test]
fn routing_id_header() {
    assert_eq!(parse_routing_id("AABBCC"), Some([0xaa, 0xbb, 0xcc]));
    assert_eq!(parse_routing_id("aabbccdd"), Some([0xaa, 0xbb, 0xcc]));
    assert_eq!(parse_routing_id("aabb"), None);
    assert_eq!(parse_routing_id(""), None);
}
