//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

use crate::registry::LifetimeRegistry;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"`, or `"draining"` once shutdown has started.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Live hub connections.
    pub connections: usize,
    /// Groups with at least one member.
    pub groups: usize,
}

/// Build a health response from the registry.
pub fn health_check(start_time: Instant, registry: &LifetimeRegistry, draining: bool) -> HealthResponse {
    HealthResponse {
        status: if draining { "draining" } else { "ok" }.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections: registry.connection_count(),
        groups: registry.group_count(),
    }
}
