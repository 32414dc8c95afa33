//! The closed set of tagged message variants exchanged over the WebSocket.
//!
//! One variant per event; each carries its own fixed, validated field set.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use validator::ValidationErrors;

use crate::dto::game::{
    HostQuestion, MidGameInfo, ParticipantQuestion, ParticipantSummary, SeriesScoreEntry,
    StandingEntry,
};
use crate::dto::validation::{validate_display_name, validate_option_index, validate_room_code};

/// Messages accepted from client sockets.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Open a new room for the given catalog list; the sender becomes host.
    CreateRoom {
        /// Catalog list the questions will be drawn from.
        playlist_id: String,
    },
    /// Join an existing room as a participant.
    JoinRoom {
        /// Room code.
        code: String,
        /// Display name, also the reconnection key.
        name: String,
    },
    /// Reclaim an identity after a disconnect.
    RejoinRoom {
        /// Room code.
        code: String,
        /// Display name used before the disconnect.
        name: String,
        /// Whether the caller was the room's host.
        #[serde(default)]
        was_host: bool,
    },
    /// Host starts the game series.
    StartGame {
        /// Room code.
        code: String,
        /// Songs per game; clamped server-side.
        #[serde(default = "default_song_count")]
        song_count: usize,
        /// Games in the series; clamped server-side.
        #[serde(default = "default_games_count")]
        games_count: u32,
    },
    /// Host reports that local playback actually began; arms the timer.
    PlaybackStarted {
        /// Room code.
        code: String,
    },
    /// Participant submits an answer for the question in flight.
    SubmitAnswer {
        /// Room code.
        code: String,
        /// Index of the selected option (0-3).
        answer: usize,
        /// Optional RFC 3339 client timestamp for ordering fairness.
        #[serde(default)]
        client_timestamp: Option<String>,
        /// Optional client-side response time in milliseconds.
        #[serde(default)]
        client_response_time_ms: Option<f64>,
    },
    /// Participant confirms the revealed answer is on screen.
    CorrectAnswerDisplayed {
        /// Room code.
        code: String,
    },
    /// Participant is ready to leave the standings view.
    ReadyForNext {
        /// Room code.
        code: String,
    },
    /// Host force-advances to the next question.
    NextQuestion {
        /// Room code.
        code: String,
    },
    /// Host starts the next game of the series.
    StartNextGame {
        /// Room code.
        code: String,
    },
    /// Host ends the game; the room is torn down.
    EndGame {
        /// Room code.
        code: String,
    },
}

fn default_song_count() -> usize {
    10
}

fn default_games_count() -> u32 {
    1
}

/// Error produced while parsing or validating an inbound frame.
#[derive(Debug, Error)]
pub enum MessageParseError {
    /// The frame was not valid JSON for any known variant.
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
    /// The frame decoded but carried invalid field values.
    #[error("invalid message: {0}")]
    Validation(#[from] ValidationErrors),
}

impl ClientMessage {
    /// Parse and validate an inbound text frame.
    pub fn from_json_str(raw: &str) -> Result<Self, MessageParseError> {
        let message: Self = serde_json::from_str(raw)?;
        message.validate()?;
        Ok(message)
    }

    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        match self {
            ClientMessage::CreateRoom { .. } => {}
            ClientMessage::JoinRoom { code, name }
            | ClientMessage::RejoinRoom { code, name, .. } => {
                collect(&mut errors, "code", validate_room_code(code));
                collect(&mut errors, "name", validate_display_name(name));
            }
            ClientMessage::StartGame { code, .. }
            | ClientMessage::PlaybackStarted { code }
            | ClientMessage::CorrectAnswerDisplayed { code }
            | ClientMessage::ReadyForNext { code }
            | ClientMessage::NextQuestion { code }
            | ClientMessage::StartNextGame { code }
            | ClientMessage::EndGame { code } => {
                collect(&mut errors, "code", validate_room_code(code));
            }
            ClientMessage::SubmitAnswer { code, answer, .. } => {
                collect(&mut errors, "code", validate_room_code(code));
                collect(&mut errors, "answer", validate_option_index(*answer));
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

fn collect(
    errors: &mut ValidationErrors,
    field: &'static str,
    result: Result<(), validator::ValidationError>,
) {
    if let Err(err) = result {
        errors.add(field, err);
    }
}

/// Messages pushed to client sockets.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First frame on every connection, carrying the connection identity.
    Welcome {
        /// Identity the server will know this socket by.
        connection_id: Uuid,
    },
    /// Reply to `create_room`.
    RoomCreated {
        /// Code of the freshly created room.
        code: String,
        /// Catalog list bound to the room.
        playlist_id: String,
    },
    /// Reply to `join_room`.
    RoomJoined {
        /// Room code.
        code: String,
        /// Confirmed display name.
        name: String,
        /// Roster at join time.
        participants: Vec<ParticipantSummary>,
        /// Present when joining a game already in progress.
        #[serde(skip_serializing_if = "Option::is_none")]
        mid_game: Option<MidGameInfo>,
    },
    /// Roster update after someone joined.
    ParticipantJoined {
        /// Updated roster.
        participants: Vec<ParticipantSummary>,
        /// The newcomer.
        new_participant: ParticipantSummary,
    },
    /// Reply to a successful `rejoin_room`.
    RejoinSuccess {
        /// Room lifecycle (`waiting`, `playing`, `ended`).
        state: String,
        /// Roster snapshot (host rejoin only).
        #[serde(skip_serializing_if = "Option::is_none")]
        participants: Option<Vec<ParticipantSummary>>,
        /// Preserved game score (participant rejoin only).
        #[serde(skip_serializing_if = "Option::is_none")]
        current_score: Option<i64>,
        /// Question in flight (host rejoin mid-game only).
        #[serde(skip_serializing_if = "Option::is_none")]
        question: Option<HostQuestion>,
        /// Whether voting already closed for the question in flight.
        #[serde(skip_serializing_if = "Option::is_none")]
        voting_closed: Option<bool>,
        /// Whether the ready barrier is already satisfied, so the rejoining
        /// host does not re-block a barrier that completed.
        #[serde(skip_serializing_if = "Option::is_none")]
        should_advance: Option<bool>,
    },
    /// Reply to a failed `rejoin_room`; the caller should join as new.
    RejoinFailed {
        /// Human-readable reason.
        message: String,
    },
    /// A game of the series is starting.
    GameStarted {
        /// Questions in this game.
        total_songs: usize,
        /// Games in the series.
        games_in_series: u32,
        /// 1-indexed number of the starting game.
        current_game: u32,
    },
    /// Full question payload; host screen only.
    NewQuestion {
        /// The question in flight.
        question: HostQuestion,
    },
    /// Stripped question payload for participants.
    NewQuestionParticipant {
        /// The question in flight, colors only.
        question: ParticipantQuestion,
    },
    /// Playback began; clients start their local countdowns.
    StartQuestionTimer,
    /// The answer window elapsed before everyone answered.
    QuestionTimeout,
    /// Private feedback after an answer submission.
    AnswerFeedback {
        /// Whether the answer was correct.
        correct: bool,
        /// The submitter's score after the answer.
        your_score: i64,
    },
    /// Someone answered the question in flight.
    PlayerAnswered {
        /// Display name of the responder.
        player_name: String,
        /// Response latency when measurable.
        #[serde(skip_serializing_if = "Option::is_none")]
        response_time_ms: Option<i64>,
    },
    /// Scoreboard refresh.
    ScoresUpdated {
        /// Game scoreboard, descending.
        scores: Vec<ParticipantSummary>,
    },
    /// Every connected participant has answered; voting is closing.
    AllAnswered,
    /// Voting closed; the correct answer is revealed.
    ShowCorrectAnswer {
        /// Index of the correct option.
        correct_answer: usize,
        /// The correct artist name.
        correct_artist: String,
    },
    /// Intermediate standings; host screen only.
    ShowIntermediateScores {
        /// Standings with per-question deltas, descending.
        scores: Vec<StandingEntry>,
        /// Whether the question just shown was the game's last.
        is_last_question: bool,
    },
    /// A non-final game of the series finished.
    GameEnded {
        /// Final scoreboard of the finished game.
        game_scores: Vec<ParticipantSummary>,
        /// Cumulative series scoreboard.
        series_scores: Vec<SeriesScoreEntry>,
        /// 1-indexed number of the finished game.
        current_game: u32,
        /// Games in the series.
        total_games: u32,
    },
    /// The whole series finished.
    SeriesEnded {
        /// Final series scoreboard.
        final_scores: Vec<SeriesScoreEntry>,
        /// Number of games played.
        games_played: u32,
    },
    /// The room was torn down.
    RoomClosed {
        /// Human-readable reason.
        message: String,
    },
    /// The host connection dropped; the room waits for it to return.
    HostDisconnected {
        /// Human-readable notice.
        message: String,
    },
    /// The host connection is back.
    HostReconnected,
    /// A participant's connection dropped; grace period running.
    ParticipantDisconnected {
        /// Display name of the participant.
        name: String,
        /// Updated roster.
        participants: Vec<ParticipantSummary>,
    },
    /// A participant reclaimed their identity.
    ParticipantReconnected {
        /// Display name of the participant.
        name: String,
        /// Updated roster.
        participants: Vec<ParticipantSummary>,
    },
    /// A participant was evicted after the grace period.
    ParticipantLeft {
        /// Updated roster.
        participants: Vec<ParticipantSummary>,
        /// Updated scoreboard.
        scores: Vec<ParticipantSummary>,
    },
    /// An operation failed; the offending socket gets the reason.
    Error {
        /// Human-readable reason.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_submit_answer() {
        let raw = r#"{"type":"submit_answer","code":"0421","answer":2,"client_timestamp":"2030-05-01T12:00:00Z"}"#;
        let message = ClientMessage::from_json_str(raw).unwrap();
        match message {
            ClientMessage::SubmitAnswer {
                code,
                answer,
                client_timestamp,
                client_response_time_ms,
            } => {
                assert_eq!(code, "0421");
                assert_eq!(answer, 2);
                assert_eq!(client_timestamp.as_deref(), Some("2030-05-01T12:00:00Z"));
                assert!(client_response_time_ms.is_none());
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn start_game_defaults_apply() {
        let raw = r#"{"type":"start_game","code":"0421"}"#;
        let message = ClientMessage::from_json_str(raw).unwrap();
        match message {
            ClientMessage::StartGame {
                song_count,
                games_count,
                ..
            } => {
                assert_eq!(song_count, 10);
                assert_eq!(games_count, 1);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn bad_room_code_is_rejected() {
        let raw = r#"{"type":"join_room","code":"42","name":"Ana"}"#;
        assert!(matches!(
            ClientMessage::from_json_str(raw),
            Err(MessageParseError::Validation(_))
        ));
    }

    #[test]
    fn blank_name_is_rejected() {
        let raw = r#"{"type":"join_room","code":"0421","name":"   "}"#;
        assert!(ClientMessage::from_json_str(raw).is_err());
    }

    #[test]
    fn out_of_range_answer_is_rejected() {
        let raw = r#"{"type":"submit_answer","code":"0421","answer":7}"#;
        assert!(ClientMessage::from_json_str(raw).is_err());
    }

    #[test]
    fn unknown_type_is_a_parse_error() {
        let raw = r#"{"type":"fire_the_lasers","code":"0421"}"#;
        assert!(matches!(
            ClientMessage::from_json_str(raw),
            Err(MessageParseError::Json(_))
        ));
    }

    #[test]
    fn unit_variants_serialize_with_tag_only() {
        let payload = serde_json::to_string(&ServerMessage::StartQuestionTimer).unwrap();
        assert_eq!(payload, r#"{"type":"start_question_timer"}"#);
    }
}
