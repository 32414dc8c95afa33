/// Health check service.
pub mod health_service;
/// Question lifecycle: timers, barriers, advancement, series progression.
pub mod orchestrator;
/// Room operations: create, join, rejoin, answers, host actions.
pub mod room_service;
/// WebSocket connection lifecycle and event dispatch.
pub mod socket_service;
/// Grace-period eviction of stale rooms and participants.
pub mod sweeper;

#[cfg(test)]
pub(crate) mod test_support;
