use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use vigil_core::{AccessPolicy, EventBus, SubmissionEvent};
use vigil_settings::VigilSettings;
use vigil_store::{SessionStore, UserStore};

use crate::client::ClientHub;
use crate::connection;
use crate::gate::ConnectionGate;
use crate::health::{self, HealthResponse};
use crate::monitor::{MonitorConfig, SubmissionMonitor};
use crate::registry::ConnectionRegistry;
use crate::session::{Handshake, SessionResolver};
use crate::shutdown::ShutdownCoordinator;

/// External collaborators the relay is wired to.
#[derive(Clone)]
pub struct RelayContext {
    pub sessions: Arc<dyn SessionStore>,
    pub users: Arc<dyn UserStore>,
    pub policy: Arc<dyn AccessPolicy>,
    pub bus: Arc<dyn EventBus>,
}

/// Shared state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<VigilSettings>,
    pub gate: Arc<ConnectionGate>,
    pub monitor: Arc<SubmissionMonitor>,
    pub clients: Arc<ClientHub>,
    pub bus: Arc<dyn EventBus>,
    pub start_time: Instant,
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wire gate, registry and monitor together. The monitor is registered
    /// as a disconnect hook on the gate.
    pub fn new(settings: VigilSettings, ctx: RelayContext, shutdown: CancellationToken) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let clients = Arc::new(ClientHub::new(settings.server.max_send_queue));

        let resolver = SessionResolver::new(ctx.sessions, ctx.users, Arc::clone(&ctx.policy));
        let gate = Arc::new(ConnectionGate::new(
            resolver,
            Arc::clone(&registry),
            settings.server.namespace.clone(),
        ));

        let monitor = Arc::new(SubmissionMonitor::new(
            Arc::clone(&ctx.bus),
            ctx.policy,
            registry,
            Arc::clone(&clients),
            shutdown.clone(),
            MonitorConfig {
                topic: settings.bus.submissions_topic.clone(),
                namespace: settings.server.namespace.clone(),
                audit: settings.audit.enabled,
            },
        ));
        gate.add_hook(monitor.clone());

        Self {
            settings: Arc::new(settings),
            gate,
            monitor,
            clients,
            bus: ctx.bus,
            start_time: Instant::now(),
            shutdown,
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let socket_path = state.settings.server.socket_path.clone();
    Router::new()
        .route("/health", get(health_handler))
        .route(&socket_path, get(ws_handler))
        .route("/internal/publish/{topic}", post(publish_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind, serve and return a handle. Port `0` picks a free port.
pub async fn start(settings: VigilSettings, ctx: RelayContext) -> Result<ServerHandle, std::io::Error> {
    let coordinator = ShutdownCoordinator::new();
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let state = AppState::new(settings, ctx, coordinator.token());

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    let router = build_router(state.clone());
    let token = coordinator.token();
    coordinator.track(tokio::spawn(async move {
        let served = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await;
        if let Err(e) = served {
            tracing::error!(error = %e, "server exited with error");
        }
    }));

    tracing::info!(
        addr = %local_addr,
        namespace = %state.settings.server.namespace,
        socket_path = %state.settings.server.socket_path,
        "vigil relay started"
    );

    Ok(ServerHandle {
        addr: local_addr,
        state,
        coordinator,
    })
}

/// Handle returned by [`start`]. Dropping it leaves the server running;
/// call [`ServerHandle::shutdown`] to stop.
pub struct ServerHandle {
    addr: SocketAddr,
    state: AppState,
    coordinator: ShutdownCoordinator,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Close every socket, end every listener and stop accepting.
    pub async fn shutdown(self, timeout: Option<Duration>) {
        tracing::info!("vigil relay shutting down");
        self.coordinator.graceful_shutdown(timeout).await;
    }
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.shutdown.is_cancelled(),
        state.gate.registry().len(),
        state.monitor.active(),
    ))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let handshake = Handshake::from_headers(&headers, Some(peer), &state.settings.session);
    ws.on_upgrade(move |socket| connection::handle_socket(socket, state, handshake))
}

/// POST /internal/publish/{topic}: the dispatcher's way into the in-process
/// bus. Disabled unless an ingest token is configured.
async fn publish_handler(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let Some(expected) = state.settings.server.ingest_token.as_deref() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if presented != Some(expected) {
        tracing::warn!(%topic, "publish rejected: bad ingest token");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let event = match SubmissionEvent::from_json(&body) {
        Ok(event) => event,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))).into_response();
        }
    };

    match state.bus.publish(&topic, event) {
        Ok(delivered) => {
            tracing::debug!(%topic, delivered, "event published");
            (
                StatusCode::ACCEPTED,
                Json(json!({ "topic": topic, "delivered": delivered })),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!(%topic, error = %e, "publish failed");
            (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;
    use vigil_core::{BroadcastBus, LevelPolicy, Subscription, SUBMISSIONS_TOPIC};
    use vigil_store::{MemorySessionStore, MemoryUserStore};

    fn state(ingest_token: Option<&str>) -> (AppState, Arc<BroadcastBus>) {
        let bus = Arc::new(BroadcastBus::new(16));
        let mut settings = VigilSettings::default();
        settings.server.ingest_token = ingest_token.map(String::from);
        let ctx = RelayContext {
            sessions: Arc::new(MemorySessionStore::new()),
            users: Arc::new(MemoryUserStore::new()),
            policy: Arc::new(LevelPolicy::tlp()),
            bus: bus.clone(),
        };
        (AppState::new(settings, ctx, CancellationToken::new()), bus)
    }

    fn publish_request(token: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/internal/publish/submissions");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_owned())).unwrap()
    }

    const EVENT: &str = r#"{"msg_type":"SubmissionStarted","msg":{"sid":"s1"}}"#;

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let (state, _) = state(None);
        let resp = build_router(state)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert_eq!(parsed["active_monitors"], 0);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let (state, _) = state(None);
        let resp = build_router(state)
            .oneshot(Request::builder().uri("/nonexistent").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn publish_disabled_without_token() {
        let (state, _) = state(None);
        let resp = build_router(state)
            .oneshot(publish_request(Some("anything"), EVENT))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn publish_requires_matching_token() {
        let (state, _) = state(Some("s3cret"));
        let router = build_router(state);

        let missing = router.clone().oneshot(publish_request(None, EVENT)).await.unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let wrong = router.oneshot(publish_request(Some("nope"), EVENT)).await.unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn publish_reaches_subscribers() {
        let (state, bus) = state(Some("s3cret"));
        let mut sub = bus.subscribe(SUBMISSIONS_TOPIC).unwrap();

        let resp = build_router(state)
            .oneshot(publish_request(Some("s3cret"), EVENT))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let event = sub.next().await.unwrap().unwrap();
        assert_eq!(event.submission_id(), Some("s1"));
    }

    #[tokio::test]
    async fn publish_rejects_malformed_event() {
        let (state, _) = state(Some("s3cret"));
        let resp = build_router(state)
            .oneshot(publish_request(Some("s3cret"), r#"{"msg": {}}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
