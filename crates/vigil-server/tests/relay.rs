//! End-to-end tests against a real server and WebSocket clients.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{COOKIE, USER_AGENT};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

use vigil_core::{BroadcastBus, EventBus, LevelPolicy, SessionToken, SubmissionEvent, SUBMISSIONS_TOPIC};
use vigil_server::{start, RelayContext, ServerHandle};
use vigil_settings::VigilSettings;
use vigil_store::{MemorySessionStore, MemoryUserStore, SessionRecord, UserRecord};

const TIMEOUT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(200);
const UA: &str = "vigil-test/1.0";
const NS: &str = "/submissions";

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct TestRelay {
    handle: ServerHandle,
    bus: Arc<BroadcastBus>,
    sessions: Arc<MemorySessionStore>,
    users: Arc<MemoryUserStore>,
}

async fn boot(configure: impl FnOnce(&mut VigilSettings)) -> TestRelay {
    let mut settings = VigilSettings::default();
    settings.server.host = "127.0.0.1".into();
    settings.server.port = 0;
    configure(&mut settings);

    let bus = Arc::new(BroadcastBus::new(64));
    let sessions = Arc::new(MemorySessionStore::new());
    let users = Arc::new(MemoryUserStore::new());
    let ctx = RelayContext {
        sessions: sessions.clone(),
        users: users.clone(),
        policy: Arc::new(LevelPolicy::tlp()),
        bus: bus.clone(),
    };
    let handle = start(settings, ctx).await.unwrap();
    TestRelay {
        handle,
        bus,
        sessions,
        users,
    }
}

impl TestRelay {
    fn addr(&self) -> SocketAddr {
        self.handle.local_addr()
    }

    /// Create a user and a login session bound to the loopback address.
    fn login(&self, username: &str, level: &str) -> SessionToken {
        self.users.insert(UserRecord::new(username, level));
        let token = SessionToken::new();
        self.sessions
            .insert(token.clone(), SessionRecord::new(username, "127.0.0.1", UA));
        token
    }

    fn publish(&self, kind: &str, sid: &str, classification: &str) -> usize {
        self.bus
            .publish(
                SUBMISSIONS_TOPIC,
                SubmissionEvent::new(kind, json!({"sid": sid, "classification": classification})),
            )
            .unwrap()
    }

    async fn wait_until(&self, check: impl Fn(&ServerHandle) -> bool) {
        timeout(TIMEOUT, async {
            while !check(&self.handle) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached");
    }
}

async fn connect(addr: SocketAddr, token: Option<&SessionToken>) -> WsStream {
    let mut request = format!("ws://{addr}/socket.io/").into_client_request().unwrap();
    let headers = request.headers_mut();
    headers.insert(USER_AGENT, HeaderValue::from_static(UA));
    if let Some(token) = token {
        let cookie = format!("session_id={token}");
        headers.insert(COOKIE, HeaderValue::from_str(&cookie).unwrap());
    }
    let (ws, _) = connect_async(request).await.unwrap();
    ws
}

/// Connect and consume the `connect` frame.
async fn connect_authenticated(relay: &TestRelay, token: &SessionToken) -> WsStream {
    let mut ws = connect(relay.addr(), Some(token)).await;
    let hello = read_json(&mut ws).await;
    assert_eq!(hello["event"], "connect");
    assert_eq!(hello["namespace"], NS);
    assert!(hello["data"]["sid"].as_str().is_some_and(|s| !s.is_empty()));
    ws
}

/// Read the next text message as JSON.
async fn read_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream closed")
            .expect("ws error");
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Close(frame) => panic!("unexpected close: {frame:?}"),
            _ => {}
        }
    }
}

/// Read until the server's close frame and return its code.
async fn read_close_code(ws: &mut WsStream) -> u16 {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for close")
            .expect("stream ended without close frame")
            .expect("ws error");
        match msg {
            Message::Close(Some(frame)) => return u16::from(frame.code),
            Message::Text(text) => panic!("unexpected text before close: {text}"),
            _ => {}
        }
    }
}

async fn assert_silent(ws: &mut WsStream) {
    if let Ok(Some(Ok(Message::Text(text)))) = timeout(QUIET, ws.next()).await {
        panic!("unexpected message: {text}");
    }
}

async fn start_monitoring(ws: &mut WsStream, payload: Value) -> Value {
    let frame = json!({"event": "start-monitoring", "namespace": NS, "data": payload});
    ws.send(Message::text(frame.to_string())).await.unwrap();
    read_json(ws).await
}

#[tokio::test]
async fn ack_echoes_start_payload() {
    let relay = boot(|_| {}).await;
    let token = relay.login("alice", "TLP:WHITE");
    let mut ws = connect_authenticated(&relay, &token).await;

    let payload = json!({"filter": "mine", "n": 3});
    let ack = start_monitoring(&mut ws, payload.clone()).await;
    assert_eq!(ack["event"], "monitoring");
    assert_eq!(ack["namespace"], NS);
    assert_eq!(ack["data"], payload);
}

#[tokio::test]
async fn events_are_filtered_by_clearance() {
    let relay = boot(|_| {}).await;
    let white_token = relay.login("walter", "TLP:WHITE");
    let red_token = relay.login("rita", "TLP:RED");
    let mut white = connect_authenticated(&relay, &white_token).await;
    let mut red = connect_authenticated(&relay, &red_token).await;
    let _ = start_monitoring(&mut white, Value::Null).await;
    let _ = start_monitoring(&mut red, Value::Null).await;

    assert_eq!(relay.publish("SubmissionStarted", "restricted", "TLP:RED"), 2);
    relay.publish("SubmissionCompleted", "open", "TLP:WHITE");

    let first = read_json(&mut red).await;
    assert_eq!(first["event"], "SubmissionStarted");
    assert_eq!(first["namespace"], NS);
    assert_eq!(first["data"]["sid"], "restricted");
    assert_eq!(read_json(&mut red).await["data"]["sid"], "open");

    let only = read_json(&mut white).await;
    assert_eq!(only["event"], "SubmissionCompleted");
    assert_eq!(only["data"]["sid"], "open");
    assert_silent(&mut white).await;
}

#[tokio::test]
async fn missing_cookie_is_closed_with_policy_violation() {
    let relay = boot(|_| {}).await;
    let mut ws = connect(relay.addr(), None).await;

    assert_eq!(read_close_code(&mut ws).await, 1008);
    assert_eq!(relay.handle.state().gate.registry().len(), 0);
}

#[tokio::test]
async fn mismatched_user_agent_is_rejected() {
    let relay = boot(|_| {}).await;
    relay.users.insert(UserRecord::new("alice", "TLP:RED"));
    let token = SessionToken::new();
    relay
        .sessions
        .insert(token.clone(), SessionRecord::new("alice", "127.0.0.1", "another-browser"));

    let mut ws = connect(relay.addr(), Some(&token)).await;
    assert_eq!(read_close_code(&mut ws).await, 1008);
}

#[tokio::test]
async fn forwarded_for_address_is_checked() {
    let relay = boot(|_| {}).await;
    relay.users.insert(UserRecord::new("alice", "TLP:RED"));
    let token = SessionToken::new();
    relay
        .sessions
        .insert(token.clone(), SessionRecord::new("alice", "203.0.113.7", UA));

    let mut request = format!("ws://{}/socket.io/", relay.addr())
        .into_client_request()
        .unwrap();
    let headers = request.headers_mut();
    headers.insert(USER_AGENT, HeaderValue::from_static(UA));
    headers.insert(COOKIE, HeaderValue::from_str(&format!("session_id={token}")).unwrap());
    headers.insert("X-Forwarded-For", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
    let (mut ws, _) = connect_async(request).await.unwrap();

    assert_eq!(read_json(&mut ws).await["event"], "connect");
}

#[tokio::test]
async fn disconnect_while_idle_releases_listener() {
    let relay = boot(|_| {}).await;
    let token = relay.login("alice", "TLP:RED");
    let mut ws = connect_authenticated(&relay, &token).await;
    let _ = start_monitoring(&mut ws, Value::Null).await;
    assert_eq!(relay.handle.state().monitor.active(), 1);

    ws.close(None).await.unwrap();
    drop(ws);

    // Nothing is published: the listener must still go away.
    relay
        .wait_until(|h| h.state().monitor.active() == 0 && h.state().gate.registry().is_empty())
        .await;
    assert_eq!(relay.bus.subscriber_count(SUBMISSIONS_TOPIC), 0);
    assert_eq!(relay.publish("SubmissionStarted", "late", "TLP:WHITE"), 0);

    let health: Value = reqwest::get(format!("http://{}/health", relay.addr()))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["connections"], 0);
}

#[tokio::test]
async fn repeated_start_keeps_single_delivery() {
    let relay = boot(|_| {}).await;
    let token = relay.login("alice", "TLP:RED");
    let mut ws = connect_authenticated(&relay, &token).await;

    assert_eq!(start_monitoring(&mut ws, json!("first")).await["data"], "first");
    assert_eq!(start_monitoring(&mut ws, json!("second")).await["data"], "second");

    relay.publish("SubmissionIngested", "s1", "TLP:GREEN");
    assert_eq!(read_json(&mut ws).await["data"]["sid"], "s1");
    assert_silent(&mut ws).await;
}

#[tokio::test]
async fn frames_for_other_namespaces_are_ignored() {
    let relay = boot(|_| {}).await;
    let token = relay.login("alice", "TLP:RED");
    let mut ws = connect_authenticated(&relay, &token).await;

    let stray = json!({"event": "start-monitoring", "namespace": "/alerts", "data": "stray"});
    ws.send(Message::text(stray.to_string())).await.unwrap();
    ws.send(Message::text("not json")).await.unwrap();

    let ack = start_monitoring(&mut ws, json!("real")).await;
    assert_eq!(ack["data"], "real");
    assert_eq!(relay.handle.state().monitor.active(), 1);
}

#[tokio::test]
async fn legacy_start_event_name_is_accepted() {
    let relay = boot(|_| {}).await;
    let token = relay.login("alice", "TLP:RED");
    let mut ws = connect_authenticated(&relay, &token).await;

    let frame = json!({"event": "submission", "namespace": NS, "data": {"x": 1}});
    ws.send(Message::text(frame.to_string())).await.unwrap();
    let ack = read_json(&mut ws).await;
    assert_eq!(ack["event"], "monitoring");
    assert_eq!(ack["data"]["x"], 1);
}

#[tokio::test]
async fn http_publish_reaches_monitoring_clients() {
    let relay = boot(|s| s.server.ingest_token = Some("ingest-secret".into())).await;
    let token = relay.login("alice", "TLP:AMBER");
    let mut ws = connect_authenticated(&relay, &token).await;
    let _ = start_monitoring(&mut ws, Value::Null).await;

    let client = reqwest::Client::new();
    let url = format!("http://{}/internal/publish/{SUBMISSIONS_TOPIC}", relay.addr());

    let denied = client
        .post(&url)
        .body(r#"{"msg_type":"SubmissionStarted","msg":{"sid":"x"}}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), 401);

    let resp = client
        .post(&url)
        .bearer_auth("ingest-secret")
        .body(r#"{"msg_type":"SubmissionStarted","msg":{"sid":"via-http","classification":"TLP:GREEN"}}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["delivered"], 1);

    let event = read_json(&mut ws).await;
    assert_eq!(event["event"], "SubmissionStarted");
    assert_eq!(event["data"]["sid"], "via-http");
}

#[tokio::test]
async fn shutdown_closes_clients() {
    let relay = boot(|_| {}).await;
    let token = relay.login("alice", "TLP:RED");
    let mut ws = connect_authenticated(&relay, &token).await;
    let _ = start_monitoring(&mut ws, Value::Null).await;

    let bus = relay.bus.clone();
    relay.handle.shutdown(Some(Duration::from_secs(2))).await;

    assert_eq!(read_close_code(&mut ws).await, 1001);
    timeout(TIMEOUT, async {
        while bus.subscriber_count(SUBMISSIONS_TOPIC) > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("listener survived shutdown");
}
