//! Per-connection submission relay.
//!
//! Each accepted start request gets one background listener that owns a bus
//! subscription, checks the viewer is still connected and cleared for each
//! event, and pushes permitted events to the connection's room. A listener
//! stops when its connection leaves the registry, when its cancellation token
//! fires (disconnect or server shutdown), or when the subscription ends.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use vigil_core::{
    authorize, AccessPolicy, ClassificationLabel, ConnectionId, ConnectionIdentity, EventBus,
    RelayError, SubmissionEvent, Subscription,
};
use vigil_telemetry::AUDIT_TARGET;

use crate::client::ClientHub;
use crate::gate::Disconnectable;
use crate::protocol::{Frame, MONITORING};
use crate::registry::ConnectionRegistry;

/// Audit record, emitted only when auditing is on.
macro_rules! audit {
    ($enabled:expr, $($arg:tt)+) => {
        if $enabled {
            tracing::info!(target: AUDIT_TARGET, $($arg)+);
        }
    };
}

#[derive(Clone, Debug)]
pub struct MonitorConfig {
    /// Bus topic carrying submission events.
    pub topic: String,
    /// Namespace stamped on outgoing frames.
    pub namespace: String,
    pub audit: bool,
}

/// Result of a start request. The request is acknowledged in every case.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MonitorStart {
    Started,
    /// A listener is already running for this connection.
    AlreadyMonitoring,
    /// The bus refused the subscription; nothing will be relayed.
    Unavailable,
}

struct Listener {
    cancel: CancellationToken,
    generation: u64,
}

pub struct SubmissionMonitor {
    bus: Arc<dyn EventBus>,
    policy: Arc<dyn AccessPolicy>,
    registry: Arc<ConnectionRegistry>,
    clients: Arc<ClientHub>,
    listeners: Mutex<HashMap<ConnectionId, Listener>>,
    generation: AtomicU64,
    shutdown: CancellationToken,
    config: MonitorConfig,
}

impl SubmissionMonitor {
    pub fn new(
        bus: Arc<dyn EventBus>,
        policy: Arc<dyn AccessPolicy>,
        registry: Arc<ConnectionRegistry>,
        clients: Arc<ClientHub>,
        shutdown: CancellationToken,
        config: MonitorConfig,
    ) -> Self {
        Self {
            bus,
            policy,
            registry,
            clients,
            listeners: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            shutdown,
            config,
        }
    }

    /// Number of running listeners.
    pub fn active(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Join the connection's room, start its listener and acknowledge with
    /// `payload` echoed back.
    ///
    /// The subscription is taken before this returns, so anything published
    /// after the acknowledgement is seen by the listener.
    pub fn start_monitoring(
        self: &Arc<Self>,
        identity: &ConnectionIdentity,
        payload: Value,
    ) -> MonitorStart {
        let connection_id = identity.connection_id();
        let room = connection_id.as_str();

        tracing::info!(
            namespace = %self.config.namespace,
            display = identity.display(),
            "user started monitoring submissions"
        );
        audit!(
            self.config.audit,
            username = identity.username(),
            classification = label(identity.classification()),
            action = "start",
            "submission monitoring"
        );

        self.clients.join(room, connection_id);
        let outcome = self.spawn_listener(identity);

        let ack = Frame::new(MONITORING, self.config.namespace.clone(), payload);
        let _ = self.clients.emit_to_room(room, &ack);
        outcome
    }

    fn spawn_listener(self: &Arc<Self>, identity: &ConnectionIdentity) -> MonitorStart {
        let connection_id = identity.connection_id();
        let mut listeners = self.listeners.lock();
        if listeners.contains_key(connection_id) {
            tracing::debug!(display = identity.display(), "listener already running");
            return MonitorStart::AlreadyMonitoring;
        }

        let subscription = match self.bus.subscribe(&self.config.topic) {
            Ok(subscription) => subscription,
            Err(e) => {
                drop(listeners);
                tracing::error!(
                    namespace = %self.config.namespace,
                    display = identity.display(),
                    topic = %self.config.topic,
                    error = %e,
                    "bus subscription failed"
                );
                self.finish(identity);
                return MonitorStart::Unavailable;
            }
        };

        let cancel = self.shutdown.child_token();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let _ = listeners.insert(
            connection_id.clone(),
            Listener {
                cancel: cancel.clone(),
                generation,
            },
        );
        drop(listeners);

        let monitor = Arc::clone(self);
        let identity = identity.clone();
        let _ = tokio::spawn(
            async move {
                monitor.relay(identity, subscription, cancel, generation).await;
            }
            .in_current_span(),
        );
        MonitorStart::Started
    }

    async fn relay(
        self: Arc<Self>,
        identity: ConnectionIdentity,
        mut subscription: Box<dyn Subscription>,
        cancel: CancellationToken,
        generation: u64,
    ) {
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                next = subscription.next() => next,
            };

            match next {
                Ok(Some(event)) => {
                    if !self.registry.contains(identity.connection_id()) {
                        break;
                    }
                    self.forward(&identity, &event);
                }
                Ok(None) => {
                    tracing::info!(topic = %self.config.topic, display = identity.display(), "bus topic closed");
                    break;
                }
                Err(e) => {
                    let err = RelayError::from(e);
                    tracing::error!(
                        namespace = %self.config.namespace,
                        display = identity.display(),
                        username = identity.username(),
                        topic = %self.config.topic,
                        error = %err,
                        error_kind = err.error_kind(),
                        "submission relay failed"
                    );
                    break;
                }
            }
        }

        self.finish(&identity);
        let mut listeners = self.listeners.lock();
        if listeners
            .get(identity.connection_id())
            .is_some_and(|l| l.generation == generation)
        {
            let _ = listeners.remove(identity.connection_id());
        }
    }

    /// Push one event to the viewer if their clearance allows it.
    fn forward(&self, identity: &ConnectionIdentity, event: &SubmissionEvent) {
        let object = event.classification(&self.policy.unrestricted());
        if let Err(e) = authorize(self.policy.as_ref(), identity.classification(), &object) {
            tracing::trace!(display = identity.display(), kind = event.kind(), reason = %e, "event withheld");
            return;
        }

        let sid = event.submission_id().unwrap_or_default();
        let frame = Frame::new(event.kind(), self.config.namespace.clone(), event.msg.clone());
        let delivered = self
            .clients
            .emit_to_room(identity.connection_id().as_str(), &frame);
        if delivered == 0 {
            tracing::warn!(
                namespace = %self.config.namespace,
                display = identity.display(),
                kind = event.kind(),
                sid,
                "event dropped, viewer queue unavailable"
            );
            return;
        }

        tracing::info!(
            namespace = %self.config.namespace,
            display = identity.display(),
            kind = event.kind(),
            sid,
            "sending event for submission"
        );
        audit!(
            self.config.audit,
            username = identity.username(),
            classification = label(identity.classification()),
            action = "get_submission",
            sid,
            "submission relayed"
        );
    }

    fn finish(&self, identity: &ConnectionIdentity) {
        tracing::info!(
            namespace = %self.config.namespace,
            display = identity.display(),
            "connection to client was terminated"
        );
        audit!(
            self.config.audit,
            username = identity.username(),
            classification = label(identity.classification()),
            action = "stop",
            "submission monitoring"
        );
    }
}

impl Disconnectable for SubmissionMonitor {
    fn on_disconnect(&self, connection_id: &ConnectionId) {
        if let Some(listener) = self.listeners.lock().remove(connection_id) {
            listener.cancel.cancel();
        }
        self.clients.leave(connection_id.as_str(), connection_id);
    }
}

fn label(classification: Option<&ClassificationLabel>) -> &str {
    classification.map_or("<none>", ClassificationLabel::as_str)
}
