//! Wire frames exchanged over the relay WebSocket.
//!
//! Every text message is one JSON object:
//! `{"event": <name>, "namespace": <ns>, "data": <value>}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use vigil_core::{ConnectionId, RelayError};

/// Sent once after the connection is authenticated.
pub const CONNECT: &str = "connect";
/// Client request to start receiving submission events.
pub const START_MONITORING: &str = "start-monitoring";
/// Older name of [`START_MONITORING`], still accepted.
pub const START_MONITORING_LEGACY: &str = "submission";
/// Acknowledgement of a start request, echoing its payload.
pub const MONITORING: &str = "monitoring";

/// Namespace assumed when a client frame omits one.
pub const DEFAULT_NAMESPACE: &str = "/";

/// Close code for connections without a valid session.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// Close code sent to clients when the server stops.
pub const CLOSE_GOING_AWAY: u16 = 1001;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub data: Value,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

impl Frame {
    pub fn new(event: impl Into<String>, namespace: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            namespace: namespace.into(),
            data,
        }
    }

    /// The `connect` frame carrying the server-assigned connection id.
    pub fn connect(namespace: &str, connection_id: &ConnectionId) -> Self {
        Self::new(
            CONNECT,
            namespace,
            serde_json::json!({ "sid": connection_id.as_str() }),
        )
    }

    pub fn decode(raw: &str) -> Result<Self, RelayError> {
        let frame: Self =
            serde_json::from_str(raw).map_err(|e| RelayError::Protocol(e.to_string()))?;
        if frame.event.is_empty() {
            return Err(RelayError::Protocol("empty event name".into()));
        }
        Ok(frame)
    }

    pub fn encode(&self) -> Result<String, RelayError> {
        serde_json::to_string(self).map_err(|e| RelayError::Protocol(e.to_string()))
    }

    pub fn is_start_request(&self) -> bool {
        self.event == START_MONITORING || self.event == START_MONITORING_LEGACY
    }
}
