use crate::{dto::health::HealthResponse, state::SharedState};

/// Respond with a snapshot of the coordinator's registries.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        rooms: state.rooms().len(),
        connections: state.clients().len(),
    }
}
