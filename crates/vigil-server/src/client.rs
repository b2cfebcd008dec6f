use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;

use vigil_core::ConnectionId;

use crate::protocol::Frame;

/// What the writer half of a socket should do next.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    /// Send a close frame, then stop writing.
    Close { code: u16, reason: String },
}

/// Transport side of one live socket: its send queue and last activity.
pub struct Client {
    pub id: ConnectionId,
    tx: mpsc::Sender<Outbound>,
    last_seen: AtomicU64,
}

impl Client {
    fn new(id: ConnectionId, tx: mpsc::Sender<Outbound>) -> Self {
        Self {
            id,
            tx,
            last_seen: AtomicU64::new(now_secs()),
        }
    }

    pub fn touch(&self) {
        self.last_seen.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self, timeout: Duration) -> bool {
        let last = self.last_seen.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < timeout.as_secs()
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Every open socket and the broadcast groups (rooms) they joined.
///
/// A socket may be here without being authenticated; the identity side
/// lives in [`crate::registry::ConnectionRegistry`].
pub struct ClientHub {
    clients: DashMap<ConnectionId, Arc<Client>>,
    rooms: DashMap<String, HashSet<ConnectionId>>,
    max_send_queue: usize,
}

impl ClientHub {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            clients: DashMap::new(),
            rooms: DashMap::new(),
            max_send_queue: max_send_queue.max(1),
        }
    }

    /// Register a socket and return the receiving end of its send queue.
    pub fn register(&self, id: &ConnectionId) -> mpsc::Receiver<Outbound> {
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let _ = self
            .clients
            .insert(id.clone(), Arc::new(Client::new(id.clone(), tx)));
        rx
    }

    /// Remove a socket and drop it from every room. Idempotent.
    pub fn unregister(&self, id: &ConnectionId) -> bool {
        self.rooms.retain(|_, members| {
            let _ = members.remove(id);
            !members.is_empty()
        });
        self.clients.remove(id).is_some()
    }

    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Client>> {
        self.clients.get(id).map(|c| Arc::clone(c.value()))
    }

    /// Queue a message for one socket. Drops it if the queue is full.
    pub fn send_to(&self, id: &ConnectionId, message: Outbound) -> bool {
        let Some(client) = self.get(id) else {
            return false;
        };
        match client.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(connection_id = %id, "send queue full, dropping message");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn emit_to(&self, id: &ConnectionId, frame: &Frame) -> bool {
        match frame.encode() {
            Ok(text) => self.send_to(id, Outbound::Text(text)),
            Err(e) => {
                tracing::error!(connection_id = %id, error = %e, "failed to encode frame");
                false
            }
        }
    }

    pub fn join(&self, room: &str, id: &ConnectionId) {
        let _ = self
            .rooms
            .entry(room.to_owned())
            .or_default()
            .insert(id.clone());
    }

    pub fn leave(&self, room: &str, id: &ConnectionId) {
        let empty = match self.rooms.get_mut(room) {
            Some(mut members) => {
                let _ = members.remove(id);
                members.is_empty()
            }
            None => false,
        };
        if empty {
            let _ = self.rooms.remove_if(room, |_, members| members.is_empty());
        }
    }

    /// Send a frame to every member of a room. Returns how many were queued.
    pub fn emit_to_room(&self, room: &str, frame: &Frame) -> usize {
        let members: Vec<ConnectionId> = match self.rooms.get(room) {
            Some(members) => members.iter().cloned().collect(),
            None => return 0,
        };
        let text = match frame.encode() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(room, error = %e, "failed to encode frame");
                return 0;
            }
        };
        members
            .iter()
            .filter(|id| self.send_to(id, Outbound::Text(text.clone())))
            .count()
    }

    pub fn room_size(&self, room: &str) -> usize {
        self.rooms.get(room).map_or(0, |members| members.len())
    }

    pub fn count(&self) -> usize {
        self.clients.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(event: &str) -> Frame {
        Frame::new(event, "/submissions", json!({"sid": "s1"}))
    }

    #[test]
    fn register_and_unregister() {
        let hub = ClientHub::new(32);
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        let _rx_a = hub.register(&a);
        let _rx_b = hub.register(&b);
        assert_eq!(hub.count(), 2);

        assert!(hub.unregister(&a));
        assert!(!hub.unregister(&a));
        assert_eq!(hub.count(), 1);
    }

    #[tokio::test]
    async fn send_to_specific_client() {
        let hub = ClientHub::new(32);
        let id = ConnectionId::new();
        let mut rx = hub.register(&id);

        assert!(hub.send_to(&id, Outbound::Text("hello".into())));
        assert_eq!(rx.recv().await, Some(Outbound::Text("hello".into())));
    }

    #[test]
    fn send_to_unknown_client() {
        let hub = ClientHub::new(32);
        assert!(!hub.send_to(&ConnectionId::new(), Outbound::Text("x".into())));
    }

    #[test]
    fn full_queue_drops() {
        let hub = ClientHub::new(2);
        let id = ConnectionId::new();
        let _rx = hub.register(&id);

        assert!(hub.send_to(&id, Outbound::Text("1".into())));
        assert!(hub.send_to(&id, Outbound::Text("2".into())));
        assert!(!hub.send_to(&id, Outbound::Text("3".into())));
    }

    #[test]
    fn room_emit_reaches_members_only() {
        let hub = ClientHub::new(32);
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        let mut rx_a = hub.register(&a);
        let mut rx_b = hub.register(&b);

        hub.join(a.as_str(), &a);
        assert_eq!(hub.emit_to_room(a.as_str(), &frame("SubmissionStarted")), 1);

        assert!(matches!(rx_a.try_recv(), Ok(Outbound::Text(t)) if t.contains("SubmissionStarted")));
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn leave_and_unregister_empty_rooms() {
        let hub = ClientHub::new(32);
        let a = ConnectionId::new();
        let _rx = hub.register(&a);

        hub.join("room", &a);
        assert_eq!(hub.room_size("room"), 1);
        hub.leave("room", &a);
        assert_eq!(hub.room_size("room"), 0);
        assert_eq!(hub.emit_to_room("room", &frame("x")), 0);

        hub.join("room", &a);
        hub.unregister(&a);
        assert_eq!(hub.room_size("room"), 0);
    }

    #[test]
    fn liveness_tracking() {
        let hub = ClientHub::new(1);
        let id = ConnectionId::new();
        let _rx = hub.register(&id);
        let client = hub.get(&id).unwrap();
        assert!(client.is_alive(Duration::from_secs(60)));

        client.last_seen.store(0, Ordering::Relaxed);
        assert!(!client.is_alive(Duration::from_secs(60)));

        client.touch();
        assert!(client.is_alive(Duration::from_secs(60)));
    }
}
