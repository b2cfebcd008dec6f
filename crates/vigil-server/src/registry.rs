use std::collections::HashMap;

use parking_lot::Mutex;

use vigil_core::{ConnectionId, ConnectionIdentity};

/// Authenticated connections, keyed by connection id.
///
/// A single lock guards the map. Callers get clones back and never hold the
/// lock across an await.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, ConnectionIdentity>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit an identity. Returns false if its connection id is already live.
    pub fn insert(&self, identity: ConnectionIdentity) -> bool {
        let mut connections = self.connections.lock();
        if connections.contains_key(identity.connection_id()) {
            return false;
        }
        let _ = connections.insert(identity.connection_id().clone(), identity);
        true
    }

    pub fn get(&self, id: &ConnectionId) -> Option<ConnectionIdentity> {
        self.connections.lock().get(id).cloned()
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.lock().contains_key(id)
    }

    /// Remove an entry. Removing an absent id is a no-op.
    pub fn remove(&self, id: &ConnectionId) -> Option<ConnectionIdentity> {
        self.connections.lock().remove(id)
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
