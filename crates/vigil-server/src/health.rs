//! `/health` endpoint body.

use std::time::Instant;

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"`, or `"shutting_down"` once shutdown has begun.
    pub status: &'static str,
    pub uptime_secs: u64,
    /// Authenticated connections.
    pub connections: usize,
    /// Running submission listeners.
    pub active_monitors: usize,
}

pub fn health_check(
    start_time: Instant,
    shutting_down: bool,
    connections: usize,
    active_monitors: usize,
) -> HealthResponse {
    HealthResponse {
        status: if shutting_down { "shutting_down" } else { "ok" },
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        active_monitors,
    }
}
