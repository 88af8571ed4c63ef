//! End-to-end tests over real sockets.
//!
//! Each hub is fed by a channel the test controls, so frames arrive exactly
//! when a test sends them.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use arcade::links::JoinLinks;
use arcade::metrics::ServerMetrics;
use arcade::{AppState, HubHandle, Room, SessionRegistry, router};
use emu_session::{Frame, PatternLoader, SessionHandle};

type Viewer = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    feeds: HashMap<String, broadcast::Sender<Frame>>,
    registry: Arc<SessionRegistry>,
    metrics: Arc<ServerMetrics>,
}

impl TestServer {
    async fn start(ids: &[&str]) -> Self {
        let mut feeds = HashMap::new();
        let mut rooms = Vec::new();
        for id in ids {
            let session = SessionHandle::cold_start(id, &PatternLoader, id.as_bytes()).unwrap();
            let (feed_tx, feed_rx) = broadcast::channel(16);
            let hub = HubHandle::spawn_with_feed(session.clone(), feed_rx, None);
            rooms.push(Room { session, hub });
            feeds.insert(id.to_string(), feed_tx);
        }

        let registry = Arc::new(SessionRegistry::from_rooms(rooms));
        let metrics = Arc::new(ServerMetrics::new());
        let state = AppState {
            registry: registry.clone(),
            metrics: metrics.clone(),
            links: Arc::new(JoinLinks::new("http", "arcade.test").unwrap()),
            queue_capacity: 8,
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });

        Self {
            addr,
            feeds,
            registry,
            metrics,
        }
    }

    async fn join(&self, game: &str) -> Viewer {
        let (ws, _) = connect_async(format!("ws://{}/?game={}", self.addr, game))
            .await
            .unwrap();
        ws
    }

    fn produce(&self, game: &str, seq: u64, data: &'static [u8]) {
        self.feeds[game]
            .send(Frame {
                seq,
                data: Bytes::from_static(data),
            })
            .unwrap();
    }
}

async fn recv(ws: &mut Viewer) -> Message {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for message")
            .expect("connection ended")
            .unwrap();
        if !matches!(msg, Message::Ping(_) | Message::Pong(_)) {
            return msg;
        }
    }
}

async fn expect_frame(ws: &mut Viewer, data: &[u8]) {
    match recv(ws).await {
        Message::Binary(got) => assert_eq!(got.as_ref(), data),
        other => panic!("expected binary frame, got {other:?}"),
    }
}

async fn expect_count(ws: &mut Viewer, count: usize) {
    match recv(ws).await {
        Message::Text(text) => assert_eq!(text.as_str(), count.to_string()),
        other => panic!("expected viewer count, got {other:?}"),
    }
}

async fn expect_quiet(ws: &mut Viewer) {
    let got = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(got.is_err(), "unexpected message: {got:?}");
}

#[tokio::test]
async fn frames_stay_within_their_session() {
    let server = TestServer::start(&["a", "b"]).await;
    let mut v1 = server.join("a").await;
    let mut v2 = server.join("b").await;
    expect_count(&mut v1, 1).await;
    expect_count(&mut v2, 1).await;

    server.produce("a", 1, b"frame-from-a");
    expect_frame(&mut v1, b"frame-from-a").await;
    expect_quiet(&mut v2).await;

    server.produce("b", 1, b"frame-from-b");
    expect_frame(&mut v2, b"frame-from-b").await;
    expect_quiet(&mut v1).await;
}

#[tokio::test]
async fn unknown_session_is_rejected() {
    let server = TestServer::start(&["a"]).await;

    let err = connect_async(format!("ws://{}/?game=nope", server.addr))
        .await
        .unwrap_err();
    match err {
        tungstenite::Error::Http(response) => assert_eq!(response.status(), 404),
        other => panic!("expected HTTP rejection, got {other:?}"),
    }

    let err = connect_async(format!("ws://{}/ws", server.addr))
        .await
        .unwrap_err();
    match err {
        tungstenite::Error::Http(response) => assert_eq!(response.status(), 400),
        other => panic!("expected HTTP rejection, got {other:?}"),
    }

    let room = server.registry.resolve("a").unwrap();
    assert_eq!(room.hub.viewer_count().await.unwrap(), 0);
    assert_eq!(server.metrics.snapshot().connections.rejected, 2);
}

#[tokio::test]
async fn late_joiner_gets_last_frame_then_count() {
    let server = TestServer::start(&["a"]).await;
    let mut first = server.join("a").await;
    expect_count(&mut first, 1).await;

    server.produce("a", 1, b"one");
    server.produce("a", 2, b"two");
    expect_frame(&mut first, b"one").await;
    expect_frame(&mut first, b"two").await;

    let mut late = server.join("a").await;
    expect_frame(&mut late, b"two").await;
    expect_count(&mut late, 2).await;
    expect_count(&mut first, 2).await;

    server.produce("a", 3, b"three");
    expect_frame(&mut late, b"three").await;
    expect_frame(&mut first, b"three").await;
}

#[tokio::test]
async fn first_viewer_gets_count_without_frame() {
    let server = TestServer::start(&["a"]).await;
    let mut viewer = server.join("a").await;
    expect_count(&mut viewer, 1).await;
    expect_quiet(&mut viewer).await;
}

#[tokio::test]
async fn input_reaches_only_its_session() {
    let server = TestServer::start(&["a", "b"]).await;
    let mut v1 = server.join("a").await;
    expect_count(&mut v1, 1).await;

    v1.send(Message::Text("4".into())).await.unwrap();
    v1.send(Message::Text("not-a-button".into())).await.unwrap();

    let a = &server.registry.resolve("a").unwrap().session;
    let b = &server.registry.resolve("b").unwrap().session;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while a.state().await.unwrap().inputs_applied == 0 {
        assert!(tokio::time::Instant::now() < deadline, "input never applied");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let snapshot = a.snapshot().await.unwrap().unwrap();
    let state: serde_json::Value = serde_json::from_slice(&snapshot).unwrap();
    assert_eq!(state["presses"][4], 1);
    assert_eq!(state["last_button"], "A");

    assert_eq!(a.state().await.unwrap().inputs_applied, 1);
    assert_eq!(b.state().await.unwrap().inputs_applied, 0);
}

#[tokio::test]
async fn disconnect_updates_remaining_viewers() {
    let server = TestServer::start(&["a"]).await;
    let mut stays = server.join("a").await;
    expect_count(&mut stays, 1).await;

    let mut leaves = server.join("a").await;
    expect_count(&mut leaves, 2).await;
    expect_count(&mut stays, 2).await;

    leaves.close(None).await.unwrap();
    expect_count(&mut stays, 1).await;

    let room = server.registry.resolve("a").unwrap();
    assert_eq!(room.hub.viewer_count().await.unwrap(), 1);
}
