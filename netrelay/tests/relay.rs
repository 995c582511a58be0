//! End-to-end tests against a real relay server on an ephemeral port.

use std::net::SocketAddr;
use std::path::Path;

use futures::{SinkExt, StreamExt};
use netrelay::config::{RelayConfig, RelayConfigCli};
use netrelay::server::RelayServer;
use netrelay::websocket::ConnectionRegistry;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestRelay {
    addr: SocketAddr,
    registry: ConnectionRegistry,
    cancel_token: CancellationToken,
    handle: JoinHandle<netrelay::error::Result<()>>,
}

async fn start_relay(static_dir: &Path, firebase_config: Option<&str>) -> TestRelay {
    let cli = RelayConfigCli {
        bind: Some("127.0.0.1:0".to_string()),
        static_dir: Some(static_dir.display().to_string()),
        firebase_config: firebase_config.map(str::to_string),
        ..Default::default()
    };
    let config = RelayConfig::new(&cli).unwrap();
    let server = RelayServer::setup(config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let registry = server.registry();
    let cancel_token = server.cancel_token();
    let handle = tokio::spawn(server.run());
    TestRelay {
        addr,
        registry,
        cancel_token,
        handle,
    }
}

async fn connect(relay: &TestRelay) -> Client {
    let (client, _) = connect_async(format!("ws://{}/ws", relay.addr))
        .await
        .unwrap();
    client
}

async fn wait_for_peers(registry: &ConnectionRegistry, expected: usize) {
    timeout(Duration::from_secs(5), async {
        while registry.count().await != expected {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("registry never reached {expected} peers"));
}

async fn next_text(client: &mut Client) -> String {
    loop {
        let msg = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for a message")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = msg {
            return text.as_str().to_string();
        }
    }
}

async fn assert_silent(client: &mut Client) {
    let res = timeout(Duration::from_millis(200), client.next()).await;
    assert!(res.is_err(), "expected no message, got {res:?}");
}

#[tokio::test]
async fn test_relays_to_every_other_peer() {
    let dir = tempfile::tempdir().unwrap();
    let relay = start_relay(dir.path(), None).await;
    let mut a = connect(&relay).await;
    let mut b = connect(&relay).await;
    let mut c = connect(&relay).await;
    wait_for_peers(&relay.registry, 3).await;

    let offer = r#"{"type":"offer","sdp":"v=0"}"#;
    a.send(Message::Text(offer.into())).await.unwrap();

    assert_eq!(next_text(&mut b).await, offer);
    assert_eq!(next_text(&mut c).await, offer);
    assert_silent(&mut a).await;

    relay.cancel_token.cancel();
}

#[tokio::test]
async fn test_preserves_order_from_one_sender() {
    let dir = tempfile::tempdir().unwrap();
    let relay = start_relay(dir.path(), None).await;
    let mut a = connect(&relay).await;
    let mut b = connect(&relay).await;
    wait_for_peers(&relay.registry, 2).await;

    for i in 0..20 {
        a.send(Message::Text(format!("candidate-{i}").into()))
            .await
            .unwrap();
    }
    for i in 0..20 {
        assert_eq!(next_text(&mut b).await, format!("candidate-{i}"));
    }

    relay.cancel_token.cancel();
}

#[tokio::test]
async fn test_departed_peer_is_unregistered() {
    let dir = tempfile::tempdir().unwrap();
    let relay = start_relay(dir.path(), None).await;
    let mut a = connect(&relay).await;
    let mut b = connect(&relay).await;
    let mut c = connect(&relay).await;
    wait_for_peers(&relay.registry, 3).await;

    b.close(None).await.unwrap();
    wait_for_peers(&relay.registry, 2).await;

    a.send(Message::Text("after-leave".into())).await.unwrap();
    assert_eq!(next_text(&mut c).await, "after-leave");

    // A reconnecting peer joins as a new connection.
    let mut b = connect(&relay).await;
    wait_for_peers(&relay.registry, 3).await;
    c.send(Message::Text("welcome-back".into())).await.unwrap();
    assert_eq!(next_text(&mut a).await, "welcome-back");
    assert_eq!(next_text(&mut b).await, "welcome-back");

    relay.cancel_token.cancel();
}

#[tokio::test]
async fn test_dropped_socket_is_unregistered() {
    let dir = tempfile::tempdir().unwrap();
    let relay = start_relay(dir.path(), None).await;
    let mut a = connect(&relay).await;
    let b = connect(&relay).await;
    wait_for_peers(&relay.registry, 2).await;

    drop(b);
    wait_for_peers(&relay.registry, 1).await;

    a.send(Message::Text("solo".into())).await.unwrap();
    assert_silent(&mut a).await;

    relay.cancel_token.cancel();
}

#[tokio::test]
async fn test_ping_is_answered() {
    let dir = tempfile::tempdir().unwrap();
    let relay = start_relay(dir.path(), None).await;
    let mut a = connect(&relay).await;
    wait_for_peers(&relay.registry, 1).await;

    a.send(Message::Ping(b"are-you-there".to_vec().into()))
        .await
        .unwrap();
    let pong = timeout(Duration::from_secs(5), a.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(pong, Message::Pong(b"are-you-there".to_vec().into()));

    relay.cancel_token.cancel();
}

#[tokio::test]
async fn test_plain_request_to_ws_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let relay = start_relay(dir.path(), None).await;

    let resp = reqwest::get(format!("http://{}/ws", relay.addr))
        .await
        .unwrap();
    assert!(resp.status().is_client_error());
    assert_eq!(relay.registry.count().await, 0);

    // The relay keeps accepting real peers afterwards.
    let _a = connect(&relay).await;
    wait_for_peers(&relay.registry, 1).await;

    relay.cancel_token.cancel();
}

#[tokio::test]
async fn test_page_routes() {
    let dir = tempfile::tempdir().unwrap();
    let relay = start_relay(dir.path(), Some(r#"{"projectId":"demo"}"#)).await;
    let base = format!("http://{}", relay.addr);

    let resp = reqwest::get(format!("{base}/")).await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    assert_eq!(resp.text().await.unwrap(), "<h1>Index file not found</h1>");

    std::fs::write(dir.path().join("index.html"), "<h1>Call</h1>").unwrap();
    std::fs::write(dir.path().join("script.js"), "console.log(1);").unwrap();
    let resp = reqwest::get(format!("{base}/")).await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "<h1>Call</h1>");

    let resp = reqwest::get(format!("{base}/static/script.js")).await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "console.log(1);");

    let resp = reqwest::get(format!("{base}/favicon.ico")).await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NO_CONTENT);

    let resp = reqwest::get(format!("{base}/firebase-config")).await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["projectId"], "demo");

    relay.cancel_token.cancel();
}

#[tokio::test]
async fn test_firebase_config_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let relay = start_relay(dir.path(), Some("{broken")).await;

    let resp = reqwest::get(format!("http://{}/firebase-config", relay.addr))
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"]
        .as_str()
        .unwrap()
        .starts_with("Failed to load Firebase config:"));

    relay.cancel_token.cancel();
}

#[tokio::test]
async fn test_health_reports_connections() {
    let dir = tempfile::tempdir().unwrap();
    let relay = start_relay(dir.path(), None).await;
    let _a = connect(&relay).await;
    let _b = connect(&relay).await;
    wait_for_peers(&relay.registry, 2).await;

    let body: serde_json::Value = reqwest::get(format!("http://{}/health", relay.addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 2);

    relay.cancel_token.cancel();
}

#[tokio::test]
async fn test_shutdown_closes_peers() {
    let dir = tempfile::tempdir().unwrap();
    let relay = start_relay(dir.path(), None).await;
    let mut a = connect(&relay).await;
    wait_for_peers(&relay.registry, 1).await;

    relay.cancel_token.cancel();
    timeout(Duration::from_secs(5), relay.handle)
        .await
        .expect("server did not shut down")
        .unwrap()
        .unwrap();
    wait_for_peers(&relay.registry, 0).await;

    // The peer observes the end of the stream.
    let end = timeout(Duration::from_secs(5), async {
        loop {
            match a.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(end.is_ok());
}
