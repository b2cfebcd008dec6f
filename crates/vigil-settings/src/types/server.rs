//! Network-facing settings: the listener, the relay namespace, and how the
//! session cookie is read.

use serde::{Deserialize, Serialize};

/// Server network and connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port (`0` picks a free port).
    pub port: u16,
    /// HTTP path of the WebSocket endpoint.
    pub socket_path: String,
    /// Namespace the submission relay answers on.
    pub namespace: String,
    /// Outbound frames buffered per connection before new ones are dropped.
    pub max_send_queue: usize,
    /// Interval between server pings, in seconds.
    pub heartbeat_interval_secs: u64,
    /// Connections silent for longer than this are dropped, in seconds.
    pub client_timeout_secs: u64,
    /// Bearer token the dispatcher presents on the publish endpoint.
    /// Publishing over HTTP is disabled when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingest_token: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5002,
            socket_path: "/socket.io/".to_string(),
            namespace: "/submissions".to_string(),
            max_send_queue: 256,
            heartbeat_interval_secs: 25,
            client_timeout_secs: 60,
            ingest_token: None,
        }
    }
}

/// How the login session is located on an inbound connection.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Cookie holding the session token.
    pub cookie_name: String,
    /// Header carrying the client address when behind a proxy.
    pub forwarded_for_header: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            cookie_name: "session_id".to_string(),
            forwarded_for_header: "X-Forwarded-For".to_string(),
        }
    }
}
