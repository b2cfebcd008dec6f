//! Admission and teardown of relay connections.
//!
//! ```text
//! Pending ──connect──▶ Authenticated ──disconnect──▶ Disconnected
//!    └─────fallback identity──▶ Rejected
//! ```

use std::sync::Arc;

use parking_lot::RwLock;

use vigil_core::{ConnectionId, ConnectionIdentity, RelayError};

use crate::registry::ConnectionRegistry;
use crate::session::{Handshake, SessionResolver};

/// Cleanup run for every disconnect, after the registry entry is gone.
pub trait Disconnectable: Send + Sync {
    fn on_disconnect(&self, connection_id: &ConnectionId);
}

pub struct ConnectionGate {
    resolver: SessionResolver,
    registry: Arc<ConnectionRegistry>,
    hooks: RwLock<Vec<Arc<dyn Disconnectable>>>,
    namespace: String,
}

impl ConnectionGate {
    pub fn new(
        resolver: SessionResolver,
        registry: Arc<ConnectionRegistry>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            resolver,
            registry,
            hooks: RwLock::new(Vec::new()),
            namespace: namespace.into(),
        }
    }

    pub fn add_hook(&self, hook: Arc<dyn Disconnectable>) {
        self.hooks.write().push(hook);
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Resolve and admit a connection. The fallback identity is refused and
    /// never reaches the registry.
    pub async fn connect(
        &self,
        connection_id: &ConnectionId,
        handshake: &Handshake,
    ) -> Result<ConnectionIdentity, RelayError> {
        let identity = self.resolver.resolve(connection_id, handshake).await;

        if !identity.is_authenticated() {
            tracing::info!(
                namespace = %self.namespace,
                connection_id = %connection_id,
                source_ip = identity.source_ip(),
                "rejected connection without a valid session"
            );
            return Err(RelayError::AuthenticationAbsent(connection_id.clone()));
        }

        if !self.registry.insert(identity.clone()) {
            return Err(RelayError::RegistryRace(connection_id.clone()));
        }

        tracing::info!(
            namespace = %self.namespace,
            connection_id = %connection_id,
            username = identity.username(),
            display = identity.display(),
            source_ip = identity.source_ip(),
            "new connection established"
        );
        Ok(identity)
    }

    /// Identity of a connection an authenticated handler is acting for.
    /// Absence means the caller must force-disconnect.
    pub fn require(&self, connection_id: &ConnectionId) -> Result<ConnectionIdentity, RelayError> {
        self.registry
            .get(connection_id)
            .ok_or_else(|| RelayError::RegistryRace(connection_id.clone()))
    }

    /// Remove the connection and run every cleanup hook exactly once.
    /// Returns whether a registry entry existed. Hooks run either way.
    pub fn disconnect(&self, connection_id: &ConnectionId) -> bool {
        let removed = self.registry.remove(connection_id);
        if let Some(identity) = &removed {
            tracing::info!(
                namespace = %self.namespace,
                connection_id = %connection_id,
                display = identity.display(),
                source_ip = identity.source_ip(),
                "user disconnected"
            );
        }

        let hooks: Vec<Arc<dyn Disconnectable>> = self.hooks.read().clone();
        for hook in hooks {
            hook.on_disconnect(connection_id);
        }
        removed.is_some()
    }
}
