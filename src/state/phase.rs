//! Per-room round phase machine driving the question lifecycle.

use thiserror::Error;

/// Fine-grained phase of the current question cycle within a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    /// No question in flight; the room is in its lobby or between games.
    Idle,
    /// A question has been sent and voting is open.
    QuestionOpen,
    /// Voting closed; the correct answer is being revealed.
    VotingClosed,
    /// Intermediate standings are on the host screen.
    StandingsShown,
    /// Transient hop between one question and the next.
    Advancing,
    /// The current game finished but more games remain in the series.
    GameOver,
    /// The whole series finished; final standings are out.
    SeriesOver,
}

/// Events that can be applied to the round phase machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundEvent {
    /// A question was dispatched to host and participants.
    QuestionSent,
    /// Voting closed, by timeout or because everyone connected answered.
    VotingClose,
    /// Intermediate standings were sent to the host.
    StandingsSent,
    /// Move on to the next question (barrier release or host force-advance).
    AdvanceRequested,
    /// The last question of a non-final game completed.
    GameFinished,
    /// The last question of the final game completed.
    SeriesFinished,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the machine was in when the invalid event was received.
    pub from: RoundPhase,
    /// The event that cannot be applied from this phase.
    pub event: RoundEvent,
}

impl RoundPhase {
    /// Compute the phase reached by applying `event`, if the transition is valid.
    ///
    /// The host force-advance path means [`RoundEvent::AdvanceRequested`] and
    /// the two finish events are accepted from any mid-question phase, not
    /// only from [`RoundPhase::StandingsShown`].
    pub fn transition(self, event: RoundEvent) -> Result<RoundPhase, InvalidTransition> {
        use RoundEvent::*;
        use RoundPhase::*;

        let next = match (self, event) {
            (Idle | Advancing | GameOver, QuestionSent) => QuestionOpen,
            (QuestionOpen, VotingClose) => VotingClosed,
            (VotingClosed, StandingsSent) => StandingsShown,
            (QuestionOpen | VotingClosed | StandingsShown, AdvanceRequested) => Advancing,
            (QuestionOpen | VotingClosed | StandingsShown, GameFinished) => GameOver,
            (QuestionOpen | VotingClosed | StandingsShown, SeriesFinished) => SeriesOver,
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}
