//! Error taxonomy for the session coordinator.

use thiserror::Error;
use validator::ValidationErrors;

use crate::provider::ProviderError;
use crate::state::phase::InvalidTransition;

/// Errors surfaced to clients by coordinator operations.
///
/// Internal timer/barrier mismatches (a callback firing for a question the
/// room already left) never become errors; they are expected races and
/// resolve as silent no-ops.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// No active room carries the given code.
    #[error("room `{0}` not found")]
    RoomNotFound(String),
    /// A host-only action came from a connection that is not the host.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// An action came from an identity outside the room's roster.
    #[error("you are not in this game")]
    NotInRoom,
    /// A second answer arrived for the same question; the original stands.
    #[error("you have already answered this question")]
    DuplicateAnswer,
    /// An answer arrived after voting closed; it is discarded.
    #[error("voting has ended for this question")]
    VotingClosed,
    /// The track/decoy provider failed; the game does not start.
    #[error("catalog provider failed: {0}")]
    Provider(#[from] ProviderError),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl From<ValidationErrors> for ServiceError {
    fn from(err: ValidationErrors) -> Self {
        ServiceError::InvalidInput(format!("validation failed: {err}"))
    }
}

impl From<InvalidTransition> for ServiceError {
    fn from(err: InvalidTransition) -> Self {
        ServiceError::InvalidState(err.to_string())
    }
}
