//! Settings type definitions.
//!
//! JSON field names are camelCase. Every section implements [`Default`] and
//! is marked `#[serde(default)]`, so a settings file only needs the keys it
//! changes.

mod server;

pub use server::*;

use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 5002, "ingestToken": "..." },
///   "classification": { "levels": ["TLP:WHITE", "TLP:RED"] },
///   "audit": { "enabled": true }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VigilSettings {
    pub server: ServerSettings,
    pub session: SessionSettings,
    pub classification: ClassificationSettings,
    pub bus: BusSettings,
    pub store: StoreSettings,
    pub audit: AuditSettings,
    pub logging: LoggingSettings,
}

/// Ordered classification levels, least restrictive first.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClassificationSettings {
    pub levels: Vec<String>,
}

impl Default for ClassificationSettings {
    fn default() -> Self {
        Self {
            levels: ["TLP:WHITE", "TLP:GREEN", "TLP:AMBER", "TLP:RED"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BusSettings {
    /// Topic carrying submission notifications.
    pub submissions_topic: String,
    /// Messages buffered per topic before slow subscribers skip ahead.
    pub channel_capacity: usize,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            submissions_topic: "submissions".to_string(),
            channel_capacity: 1024,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// SQLite file holding the `users` and `sessions` tables
    /// (relative paths resolve under `~/.vigil`).
    pub db_path: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            db_path: "database/vigil.db".to_string(),
        }
    }
}

/// Audit trail of who watched which submission.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuditSettings {
    pub enabled: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive. `RUST_LOG` wins when set.
    pub level: String,
    /// JSON lines on stdout instead of compact text.
    pub json: bool,
    /// Persist WARN+ and audit records to SQLite.
    pub persist: bool,
    /// Log database path (relative paths resolve under `~/.vigil`).
    pub db_path: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
            persist: true,
            db_path: "database/vigil-logs.db".to_string(),
        }
    }
}
