//! Lifecycle of one relay socket: admission, frame dispatch, heartbeat and
//! teardown.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::Instrument;

use vigil_core::ConnectionId;

use crate::client::{ClientHub, Outbound};
use crate::protocol::{Frame, CLOSE_GOING_AWAY, CLOSE_POLICY_VIOLATION};
use crate::server::AppState;
use crate::session::Handshake;

/// How long a closing socket gets to flush its close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

pub async fn handle_socket(socket: WebSocket, state: AppState, handshake: Handshake) {
    let connection_id = ConnectionId::new();
    let span = tracing::info_span!("connection", connection_id = %connection_id);
    serve(socket, state, handshake, connection_id)
        .instrument(span)
        .await;
}

async fn serve(socket: WebSocket, state: AppState, handshake: Handshake, connection_id: ConnectionId) {
    let (ws_tx, mut ws_rx) = socket.split();
    let rx = state.clients.register(&connection_id);

    let server = &state.settings.server;
    let mut writer = tokio::spawn(
        write_loop(
            ws_tx,
            rx,
            Arc::clone(&state.clients),
            connection_id.clone(),
            Duration::from_secs(server.heartbeat_interval_secs.max(1)),
            Duration::from_secs(server.client_timeout_secs),
        )
        .in_current_span(),
    );

    if let Err(e) = state.gate.connect(&connection_id, &handshake).await {
        tracing::debug!(error_kind = e.error_kind(), "closing unauthenticated socket");
        let _ = state.clients.send_to(
            &connection_id,
            Outbound::Close {
                code: CLOSE_POLICY_VIOLATION,
                reason: "authentication required".into(),
            },
        );
        let _ = state.clients.unregister(&connection_id);
        let _ = tokio::time::timeout(CLOSE_GRACE, writer).await;
        return;
    }

    let _ = state
        .clients
        .emit_to(&connection_id, &Frame::connect(&server.namespace, &connection_id));

    let mut writer_done = false;
    loop {
        tokio::select! {
            msg = ws_rx.next() => match msg {
                Some(Ok(WsMessage::Text(text))) => {
                    touch(&state.clients, &connection_id);
                    if handle_text(&state, &connection_id, text.as_str()) == Flow::Close {
                        break;
                    }
                }
                Some(Ok(WsMessage::Pong(_) | WsMessage::Ping(_))) => {
                    touch(&state.clients, &connection_id);
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(WsMessage::Binary(_))) => {
                    tracing::debug!("ignoring binary frame");
                }
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "socket read failed");
                    break;
                }
            },
            _ = &mut writer => {
                writer_done = true;
                break;
            }
            () = state.shutdown.cancelled() => {
                let _ = state.clients.send_to(
                    &connection_id,
                    Outbound::Close {
                        code: CLOSE_GOING_AWAY,
                        reason: "server shutting down".into(),
                    },
                );
                break;
            }
        }
    }

    let _ = state.gate.disconnect(&connection_id);
    // Dropping the queue lets the writer drain what is left and stop.
    let _ = state.clients.unregister(&connection_id);
    if !writer_done {
        let _ = tokio::time::timeout(CLOSE_GRACE, writer).await;
    }
}

fn touch(clients: &ClientHub, connection_id: &ConnectionId) {
    if let Some(client) = clients.get(connection_id) {
        client.touch();
    }
}

fn handle_text(state: &AppState, connection_id: &ConnectionId, text: &str) -> Flow {
    let frame = match Frame::decode(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(error = %e, "ignoring malformed frame");
            return Flow::Continue;
        }
    };

    if frame.namespace != state.settings.server.namespace {
        tracing::debug!(namespace = %frame.namespace, event = %frame.event, "frame for another namespace ignored");
        return Flow::Continue;
    }

    if !frame.is_start_request() {
        tracing::debug!(event = %frame.event, "unhandled event");
        return Flow::Continue;
    }

    match state.gate.require(connection_id) {
        Ok(identity) => {
            let _ = state.monitor.start_monitoring(&identity, frame.data);
            Flow::Continue
        }
        Err(e) if e.disconnects() => {
            tracing::info!(error = %e, "forcing disconnect of unregistered connection");
            let _ = state.clients.send_to(
                connection_id,
                Outbound::Close {
                    code: CLOSE_POLICY_VIOLATION,
                    reason: "not authenticated".into(),
                },
            );
            Flow::Close
        }
        Err(e) => {
            tracing::debug!(error = %e, "start request refused");
            Flow::Continue
        }
    }
}

/// Drain the send queue into the socket and ping on an interval. Ends when
/// the queue closes, a close is requested, a write fails or the client stops
/// answering pings.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, WsMessage>,
    mut rx: mpsc::Receiver<Outbound>,
    clients: Arc<ClientHub>,
    connection_id: ConnectionId,
    heartbeat: Duration,
    client_timeout: Duration,
) {
    let mut ping_interval = tokio::time::interval(heartbeat);
    ping_interval.tick().await;

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(Outbound::Text(text)) => {
                    if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    let frame = CloseFrame { code, reason: reason.into() };
                    let _ = ws_tx.send(WsMessage::Close(Some(frame))).await;
                    break;
                }
                None => {
                    let _ = ws_tx.close().await;
                    break;
                }
            },
            _ = ping_interval.tick() => {
                let alive = clients
                    .get(&connection_id)
                    .is_some_and(|c| c.is_alive(client_timeout));
                if !alive {
                    tracing::warn!("client heartbeat timed out");
                    break;
                }
                if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                tracing::trace!("sent ping");
            }
        }
    }
}
