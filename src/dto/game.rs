//! Projections of room state sent to clients.

use serde::Serialize;
use uuid::Uuid;

use crate::state::room::{Participant, ParticipantId, RoomState, SeriesStanding, StandingDelta};

/// Public projection of one roster entry.
#[derive(Debug, Clone, Serialize)]
pub struct ParticipantSummary {
    /// Participant identity.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Score in the current game.
    pub score: i64,
    /// Whether the participant's connection is currently gone.
    pub disconnected: bool,
}

/// One line of the intermediate standings view with its per-question delta.
#[derive(Debug, Clone, Serialize)]
pub struct StandingEntry {
    /// Participant identity.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Total score after the question.
    pub score: i64,
    /// Points gained on the question that just closed.
    pub points_gained: i64,
}

/// One line of the merged per-game / series scoreboard.
#[derive(Debug, Clone, Serialize)]
pub struct SeriesScoreEntry {
    /// Participant identity.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Cumulative score across completed games.
    pub series_score: i64,
    /// Score in the current (or just-finished) game.
    pub game_score: i64,
}

/// Full question payload, host screen only: the host sees the options and
/// which of them is correct; participants never receive artist names.
#[derive(Debug, Clone, Serialize)]
pub struct HostQuestion {
    /// 1-indexed question number within the current game.
    pub question_number: usize,
    /// Questions in the current game.
    pub total_questions: usize,
    /// Track title.
    pub track_name: String,
    /// Opaque playable reference for the host player.
    pub playable_ref: String,
    /// The four artist options in display order.
    pub options: Vec<String>,
    /// Index of the correct option, for the host display.
    pub correct_answer: usize,
    /// Palette mapped positionally to the options.
    pub colors: Vec<String>,
    /// Progression multiplier in effect for this question.
    pub multiplier: i64,
}

/// Stripped question payload for participants: colors only, no artist names.
#[derive(Debug, Clone, Serialize)]
pub struct ParticipantQuestion {
    /// 1-indexed question number within the current game.
    pub question_number: usize,
    /// Questions in the current game.
    pub total_questions: usize,
    /// Palette mapped positionally to the answer buttons.
    pub colors: Vec<String>,
}

/// Extra context handed to a participant joining a game already in progress.
#[derive(Debug, Clone, Serialize)]
pub struct MidGameInfo {
    /// 1-indexed number of the question in flight.
    pub current_question: usize,
    /// Questions in the current game.
    pub total_questions: usize,
    /// Current game scoreboard.
    pub current_scores: Vec<ParticipantSummary>,
}

impl From<(ParticipantId, Participant)> for ParticipantSummary {
    fn from((id, participant): (ParticipantId, Participant)) -> Self {
        Self {
            id,
            name: participant.name,
            score: participant.score,
            disconnected: participant.disconnected,
        }
    }
}

impl From<StandingDelta> for StandingEntry {
    fn from(delta: StandingDelta) -> Self {
        Self {
            id: delta.id,
            name: delta.name,
            score: delta.score,
            points_gained: delta.points_gained,
        }
    }
}

impl From<SeriesStanding> for SeriesScoreEntry {
    fn from(standing: SeriesStanding) -> Self {
        Self {
            id: standing.id,
            name: standing.name,
            series_score: standing.series_score,
            game_score: standing.game_score,
        }
    }
}

/// Roster in join order, for roster-update broadcasts.
pub fn roster(state: &RoomState) -> Vec<ParticipantSummary> {
    state
        .participants
        .iter()
        .map(|(id, p)| (*id, p.clone()).into())
        .collect()
}

/// Game scoreboard, descending by score with stable ties.
pub fn scoreboard(state: &RoomState) -> Vec<ParticipantSummary> {
    state.scores_ordered().into_iter().map(Into::into).collect()
}

/// Merged per-game / series scoreboard, descending by series score.
pub fn series_scoreboard(state: &RoomState) -> Vec<SeriesScoreEntry> {
    state
        .series_scores_ordered()
        .into_iter()
        .map(Into::into)
        .collect()
}

/// Intermediate standings with per-question deltas.
pub fn standings(state: &RoomState) -> Vec<StandingEntry> {
    state
        .standings_with_gains()
        .into_iter()
        .map(Into::into)
        .collect()
}

impl HostQuestion {
    /// Build the host payload for the question in flight.
    pub fn from_room(state: &RoomState) -> Option<Self> {
        let question = state.current_question()?;
        Some(Self {
            question_number: state.current_question_index + 1,
            total_questions: state.questions.len(),
            track_name: question.track_name.clone(),
            playable_ref: question.playable_ref.clone(),
            options: question.options.clone(),
            correct_answer: question.correct_option,
            colors: question.colors.clone(),
            multiplier: state.multiplier(),
        })
    }
}

impl ParticipantQuestion {
    /// Build the participant payload for the question in flight.
    pub fn from_room(state: &RoomState) -> Option<Self> {
        let question = state.current_question()?;
        Some(Self {
            question_number: state.current_question_index + 1,
            total_questions: state.questions.len(),
            colors: question.colors.clone(),
        })
    }
}

impl MidGameInfo {
    /// Snapshot handed to late joiners while a game is running.
    pub fn from_room(state: &RoomState) -> Self {
        Self {
            current_question: state.current_question_index + 1,
            total_questions: state.questions.len(),
            current_scores: scoreboard(state),
        }
    }
}
