//! Health endpoint payload.

use serde::Serialize;

/// Snapshot returned by the healthcheck route.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall status string; always `ok` while the process serves.
    pub status: String,
    /// Number of active rooms.
    pub rooms: usize,
    /// Number of connected client sockets.
    pub connections: usize,
}
