//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`VigilSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `VIGIL_*` environment overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::VigilSettings;

/// Base directory for settings and relative data paths (`~/.vigil`).
pub fn vigil_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".vigil")
}

/// Default settings file (`~/.vigil/settings.json`).
pub fn settings_path() -> PathBuf {
    vigil_home().join("settings.json")
}

/// Resolve a configured path: absolute paths as-is, others under `~/.vigil`.
pub fn resolve_data_path(configured: &str) -> PathBuf {
    let path = Path::new(configured);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        vigil_home().join(path)
    }
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<VigilSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or a file that does not fit
/// the schema is an error.
pub fn load_settings_from_path(path: &Path) -> Result<VigilSettings> {
    let defaults = serde_json::to_value(VigilSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: VigilSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are ignored with a warning (file/default value kept).
pub fn apply_env_overrides(settings: &mut VigilSettings) {
    if let Some(v) = read_env_string("VIGIL_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("VIGIL_PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_string("VIGIL_NAMESPACE") {
        settings.server.namespace = v;
    }
    if let Some(v) = read_env_usize("VIGIL_MAX_SEND_QUEUE", 1, 65_536) {
        settings.server.max_send_queue = v;
    }
    if let Some(v) = read_env_u64("VIGIL_HEARTBEAT_INTERVAL_SECS", 1, 3600) {
        settings.server.heartbeat_interval_secs = v;
    }
    if let Some(v) = read_env_string("VIGIL_INGEST_TOKEN") {
        settings.server.ingest_token = Some(v);
    }
    if let Some(v) = read_env_string("VIGIL_SESSION_COOKIE") {
        settings.session.cookie_name = v;
    }
    if let Some(v) = read_env_list("VIGIL_CLASSIFICATION_LEVELS") {
        settings.classification.levels = v;
    }
    if let Some(v) = read_env_string("VIGIL_SUBMISSIONS_TOPIC") {
        settings.bus.submissions_topic = v;
    }
    if let Some(v) = read_env_string("VIGIL_DB") {
        settings.store.db_path = v;
    }
    if let Some(v) = read_env_bool("VIGIL_AUDIT") {
        settings.audit.enabled = v;
    }
    if let Some(v) = read_env_string("VIGIL_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("VIGIL_LOG_JSON") {
        settings.logging.json = v;
    }
}

/// Reject settings the server cannot run with.
pub fn validate(settings: &VigilSettings) -> Result<()> {
    if settings.classification.levels.is_empty() {
        return Err(SettingsError::InvalidValue(
            "classification.levels must not be empty".into(),
        ));
    }
    if !settings.server.namespace.starts_with('/') {
        return Err(SettingsError::InvalidValue(format!(
            "server.namespace must start with '/': {}",
            settings.server.namespace
        )));
    }
    if !settings.server.socket_path.starts_with('/') {
        return Err(SettingsError::InvalidValue(format!(
            "server.socketPath must start with '/': {}",
            settings.server.socket_path
        )));
    }
    if settings.server.client_timeout_secs <= settings.server.heartbeat_interval_secs {
        return Err(SettingsError::InvalidValue(
            "server.clientTimeoutSecs must exceed server.heartbeatIntervalSecs".into(),
        ));
    }
    Ok(())
}

// ── Parsers ─────────────────────────────────────────────────────────────────

/// Parse a boolean: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Comma-separated list; blank entries are skipped, an all-blank list is `None`.
pub fn parse_list(val: &str) -> Option<Vec<String>> {
    let items: Vec<String> = val
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    (!items.is_empty()).then_some(items)
}

// ── Env var readers ─────────────────────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

fn read_env_list(name: &str) -> Option<Vec<String>> {
    let val = std::env::var(name).ok()?;
    let result = parse_list(&val);
    if result.is_none() {
        tracing::warn!(key = name, "empty list env var, ignoring");
    }
    result
}
