//! Authoritative in-memory record of one live session.
//!
//! A [`Room`] owns every nested entity (roster, question pools, answer
//! ledger, acknowledgment sets) exclusively; nothing here is shared across
//! rooms. All mutation goes through [`RoomState`] behind the room's single
//! mutex, so inbound event handlers and the orchestrator's background tasks
//! serialize naturally.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use indexmap::IndexMap;
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, PrimitiveDateTime};
use tokio::sync::{Mutex, MutexGuard, Notify};
use tokio::time::Instant;
use uuid::Uuid;

use crate::state::phase::{InvalidTransition, RoundEvent, RoundPhase};
use crate::state::scoring;

/// Opaque per-connection identity of a participant or host.
pub type ParticipantId = Uuid;

/// Coarse lifecycle of a room as shown on lobby and recap screens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomLifecycle {
    /// Room created, waiting for the host to start the first game.
    Waiting,
    /// A game of the series is in progress.
    Playing,
    /// The series finished (or the host ended the game).
    Ended,
}

impl RoomLifecycle {
    /// Wire representation used in client payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            RoomLifecycle::Waiting => "waiting",
            RoomLifecycle::Playing => "playing",
            RoomLifecycle::Ended => "ended",
        }
    }
}

/// Roster entry tracked for the duration of a session.
#[derive(Debug, Clone)]
pub struct Participant {
    /// Display name chosen at join time; the reconnection lookup key.
    pub name: String,
    /// Score for the current game; resets to 0 when a new game starts.
    pub score: i64,
    /// Whether the underlying connection is currently gone.
    pub disconnected: bool,
    /// When the connection dropped, for grace-period accounting.
    pub disconnected_at: Option<Instant>,
}

/// One generated question. Immutable once built.
#[derive(Debug, Clone)]
pub struct Question {
    /// Track title shown on the host screen.
    pub track_name: String,
    /// Opaque playable reference (preview URL or player URI).
    pub playable_ref: String,
    /// Exactly four artist names in display order.
    pub options: Vec<String>,
    /// Index into `options` of the correct artist.
    pub correct_option: usize,
    /// The correct artist, revealed when voting closes.
    pub correct_artist: String,
    /// Fixed palette mapped positionally to `options`.
    pub colors: Vec<String>,
}

/// A recorded answer; created once per participant and question, never mutated.
#[derive(Debug, Clone)]
pub struct Answer {
    /// Index of the chosen option.
    pub option: usize,
    /// Timestamp used for speed ranking (client clock when parseable).
    pub accepted_at: PrimitiveDateTime,
    /// Server receipt time, always kept for diagnostics.
    pub server_received_at: PrimitiveDateTime,
    /// Whether `accepted_at` came from the client clock.
    pub used_client_time: bool,
}

/// Per-participant line of the merged per-game / series scoreboard.
#[derive(Debug, Clone)]
pub struct SeriesStanding {
    /// Identity of the participant.
    pub id: ParticipantId,
    /// Display name.
    pub name: String,
    /// Cumulative score across completed games.
    pub series_score: i64,
    /// Score in the current (or just-finished) game.
    pub game_score: i64,
}

/// Per-participant line of the intermediate standings view.
#[derive(Debug, Clone)]
pub struct StandingDelta {
    /// Identity of the participant.
    pub id: ParticipantId,
    /// Display name.
    pub name: String,
    /// Total score after the question.
    pub score: i64,
    /// Points gained on the question that just closed.
    pub points_gained: i64,
}

/// One live session: the mutex-guarded state plus the acknowledgment latch.
pub struct Room {
    /// Short numeric code identifying the session.
    pub code: String,
    state: Mutex<RoomState>,
    acks: Notify,
}

impl Room {
    /// Create a room in the waiting state, owned by the given connection.
    pub fn new(code: String, host: ParticipantId, catalog_list_id: String) -> Self {
        Self {
            code,
            state: Mutex::new(RoomState::new(host, catalog_list_id)),
            acks: Notify::new(),
        }
    }

    /// Lock the room state. Every mutation and consistent read goes through here.
    pub async fn lock(&self) -> MutexGuard<'_, RoomState> {
        self.state.lock().await
    }

    /// Wake every barrier currently waiting on this room's acknowledgments.
    pub fn notify_acks(&self) {
        self.acks.notify_waiters();
    }

    /// Bounded wait until `satisfied` holds, released early by [`Room::notify_acks`].
    ///
    /// Returns whether the predicate held when the wait ended. The deadline
    /// always releases the barrier; a room must never stall on one absent
    /// client.
    pub async fn wait_until<F>(&self, bound: Duration, satisfied: F) -> bool
    where
        F: Fn(&RoomState) -> bool,
    {
        let deadline = Instant::now() + bound;
        loop {
            let notified = self.acks.notified();
            tokio::pin!(notified);
            // Register before checking so a notification between the check
            // and the await is not lost.
            notified.as_mut().enable();

            if satisfied(&*self.state.lock().await) {
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            if tokio::time::timeout(deadline - now, notified).await.is_err() {
                return satisfied(&*self.state.lock().await);
            }
        }
    }
}

/// Mutable state of one session, guarded by the room mutex.
pub struct RoomState {
    /// Connection currently acting as host.
    pub host_connection_id: ParticipantId,
    /// Catalog list the questions are drawn from.
    pub catalog_list_id: String,
    /// Coarse lifecycle (waiting / playing / ended).
    pub lifecycle: RoomLifecycle,
    /// Fine-grained phase of the current question cycle.
    pub phase: RoundPhase,
    /// Roster, in join order. Join order is the scoreboard tie-break.
    pub participants: IndexMap<ParticipantId, Participant>,
    /// Every question generated for the series, in play order.
    pub all_questions: Vec<Question>,
    /// Game number (1-indexed) to indices into `all_questions`.
    pub game_index_map: BTreeMap<u32, Vec<usize>>,
    /// Questions of the current game.
    pub questions: Vec<Question>,
    /// Index into `questions` of the question in flight.
    pub current_question_index: usize,
    /// Whether voting closed for the current question.
    pub voting_closed: bool,
    /// Answer ledger: question index -> participant -> answer.
    pub answers: HashMap<usize, HashMap<ParticipantId, Answer>>,
    /// Participants that confirmed seeing the revealed answer.
    pub correct_answer_acks: HashSet<ParticipantId>,
    /// Participants ready to move past the standings view.
    pub standings_ready_acks: HashSet<ParticipantId>,
    /// Scores snapshotted when the current question opened.
    pub question_start_scores: HashMap<ParticipantId, i64>,
    /// Set when the host reports playback actually began, not at send time.
    pub question_start_time: Option<PrimitiveDateTime>,
    /// Cumulative score per participant across completed games.
    pub series_scores: HashMap<ParticipantId, i64>,
    /// Total games in the series.
    pub games_in_series: u32,
    /// Current game number, 1-indexed.
    pub current_game_number: u32,
    /// Whether the host connection is currently gone.
    pub host_disconnected: bool,
    /// When the host connection dropped.
    pub host_disconnected_at: Option<Instant>,
    /// Generation counter bumped on every question transition. Timer and
    /// barrier continuations capture it and no-op on mismatch.
    pub epoch: u64,
}

impl RoomState {
    fn new(host: ParticipantId, catalog_list_id: String) -> Self {
        Self {
            host_connection_id: host,
            catalog_list_id,
            lifecycle: RoomLifecycle::Waiting,
            phase: RoundPhase::Idle,
            participants: IndexMap::new(),
            all_questions: Vec::new(),
            game_index_map: BTreeMap::new(),
            questions: Vec::new(),
            current_question_index: 0,
            voting_closed: false,
            answers: HashMap::new(),
            correct_answer_acks: HashSet::new(),
            standings_ready_acks: HashSet::new(),
            question_start_scores: HashMap::new(),
            question_start_time: None,
            series_scores: HashMap::new(),
            games_in_series: 1,
            current_game_number: 1,
            host_disconnected: false,
            host_disconnected_at: None,
            epoch: 0,
        }
    }

    /// Insert a participant with a zero score, seeding the series score on
    /// first sight of this identity.
    pub fn add_participant(&mut self, id: ParticipantId, name: String) {
        self.participants.insert(
            id,
            Participant {
                name,
                score: 0,
                disconnected: false,
                disconnected_at: None,
            },
        );
        self.series_scores.entry(id).or_insert(0);
    }

    /// Remove a participant; no-op if absent. Series scores are kept so a
    /// finished game's history stays intact.
    pub fn remove_participant(&mut self, id: ParticipantId) {
        self.participants.shift_remove(&id);
    }

    /// Look up a participant identity by display name (the reconnect key).
    pub fn find_participant_by_name(&self, name: &str) -> Option<ParticipantId> {
        self.participants
            .iter()
            .find(|(_, p)| p.name == name)
            .map(|(id, _)| *id)
    }

    /// Re-key a participant to a new connection, preserving roster position,
    /// score, series score, and any answer already recorded for the question
    /// in flight. Returns the preserved game score.
    pub fn migrate_participant(
        &mut self,
        old: ParticipantId,
        new: ParticipantId,
    ) -> Option<i64> {
        let (index, _, mut participant) = self.participants.shift_remove_full(&old)?;
        participant.disconnected = false;
        participant.disconnected_at = None;
        let score = participant.score;
        self.participants.shift_insert(index, new, participant);

        if let Some(series) = self.series_scores.remove(&old) {
            self.series_scores.insert(new, series);
        }
        if let Some(ledger) = self.answers.get_mut(&self.current_question_index) {
            if let Some(answer) = ledger.remove(&old) {
                ledger.insert(new, answer);
            }
        }
        if self.correct_answer_acks.remove(&old) {
            self.correct_answer_acks.insert(new);
        }
        if self.standings_ready_acks.remove(&old) {
            self.standings_ready_acks.insert(new);
        }

        Some(score)
    }

    /// The question currently in flight, when one is loaded.
    pub fn current_question(&self) -> Option<&Question> {
        self.questions.get(self.current_question_index)
    }

    /// Whether the question in flight is the last of the current game.
    pub fn is_last_question(&self) -> bool {
        self.current_question_index + 1 >= self.questions.len()
    }

    /// Progression multiplier for the question in flight.
    pub fn multiplier(&self) -> i64 {
        scoring::progression_multiplier(self.questions.len(), self.current_question_index + 1)
    }

    /// Whether an answer is already on file for this identity and the current
    /// question.
    pub fn has_answered(&self, id: ParticipantId) -> bool {
        self.answers
            .get(&self.current_question_index)
            .is_some_and(|ledger| ledger.contains_key(&id))
    }

    /// Record an answer for the current question. Refuses to overwrite an
    /// existing entry; callers pre-check with [`RoomState::has_answered`] to
    /// surface the duplicate to the client.
    pub fn record_answer(
        &mut self,
        id: ParticipantId,
        option: usize,
        client_timestamp: Option<&str>,
    ) {
        let ledger = self.answers.entry(self.current_question_index).or_default();
        if ledger.contains_key(&id) {
            return;
        }

        let server_received_at = now_naive();
        let (accepted_at, used_client_time) = match client_timestamp.and_then(parse_client_instant)
        {
            Some(instant) => (instant, true),
            None => (server_received_at, false),
        };

        ledger.insert(
            id,
            Answer {
                option,
                accepted_at,
                server_received_at,
                used_client_time,
            },
        );
    }

    /// Check an answer against the current question; on a match, award
    /// speed-ranked points times the progression multiplier. This is the only
    /// score-mutating path.
    pub fn check_answer(&mut self, id: ParticipantId, option: usize) -> bool {
        let Some(question) = self.current_question() else {
            return false;
        };
        if option != question.correct_option {
            return false;
        }

        let correct_option = question.correct_option;
        let ledger = self
            .answers
            .get(&self.current_question_index)
            .cloned()
            .unwrap_or_default();

        // Rank all correct responders by resolved timestamp; ties break
        // deterministically on identity.
        let mut correct: Vec<(ParticipantId, PrimitiveDateTime)> = ledger
            .iter()
            .filter(|(_, answer)| answer.option == correct_option)
            .map(|(pid, answer)| (*pid, answer.accepted_at))
            .collect();
        correct.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));

        let rank = correct
            .iter()
            .position(|(pid, _)| *pid == id)
            .map(|position| position + 1)
            .unwrap_or(1);
        let fastest = correct.first().map(|(_, at)| *at);
        let mine = correct
            .iter()
            .find(|(pid, _)| *pid == id)
            .map(|(_, at)| *at);
        let delta_seconds = match (mine, fastest) {
            (Some(mine), Some(fastest)) => (mine - fastest).as_seconds_f64().max(0.0),
            _ => 0.0,
        };

        let points = scoring::speed_points(rank, delta_seconds) * self.multiplier();
        if let Some(participant) = self.participants.get_mut(&id) {
            participant.score += points;
        }

        true
    }

    /// Roster ordered by game score descending; ties keep join order.
    pub fn scores_ordered(&self) -> Vec<(ParticipantId, Participant)> {
        let mut entries: Vec<(ParticipantId, Participant)> = self
            .participants
            .iter()
            .map(|(id, p)| (*id, p.clone()))
            .collect();
        entries.sort_by(|a, b| b.1.score.cmp(&a.1.score));
        entries
    }

    /// Merged per-game and cumulative view, ordered by series score descending.
    pub fn series_scores_ordered(&self) -> Vec<SeriesStanding> {
        let mut entries: Vec<SeriesStanding> = self
            .participants
            .iter()
            .map(|(id, p)| SeriesStanding {
                id: *id,
                name: p.name.clone(),
                series_score: self.series_scores.get(id).copied().unwrap_or(0),
                game_score: p.score,
            })
            .collect();
        entries.sort_by(|a, b| b.series_score.cmp(&a.series_score));
        entries
    }

    /// Per-participant deltas since the question-start snapshot, ordered by
    /// total score descending.
    pub fn standings_with_gains(&self) -> Vec<StandingDelta> {
        let mut entries: Vec<StandingDelta> = self
            .participants
            .iter()
            .map(|(id, p)| StandingDelta {
                id: *id,
                name: p.name.clone(),
                score: p.score,
                points_gained: p.score - self.question_start_scores.get(id).copied().unwrap_or(0),
            })
            .collect();
        entries.sort_by(|a, b| b.score.cmp(&a.score));
        entries
    }

    /// Identities of everyone the room broadcasts to: host plus roster.
    pub fn broadcast_targets(&self) -> Vec<ParticipantId> {
        let mut targets = Vec::with_capacity(self.participants.len() + 1);
        targets.push(self.host_connection_id);
        targets.extend(self.participants.keys().copied());
        targets
    }

    /// Identities of participants whose connection is currently live.
    pub fn connected_participants(&self) -> Vec<ParticipantId> {
        self.participants
            .iter()
            .filter(|(_, p)| !p.disconnected)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Whether every currently-connected participant answered the question in
    /// flight. False when nobody is connected, so the timer stays the only
    /// close path for an empty room.
    pub fn all_connected_answered(&self) -> bool {
        let connected = self.connected_participants();
        if connected.is_empty() {
            return false;
        }
        connected.iter().all(|id| self.has_answered(*id))
    }

    /// Whether every connected participant confirmed seeing the reveal.
    pub fn reveal_acks_satisfied(&self) -> bool {
        self.connected_participants()
            .iter()
            .all(|id| self.correct_answer_acks.contains(id))
    }

    /// Whether every connected participant is ready to leave the standings
    /// view. Also the `should_advance` hint handed to a rejoining host.
    pub fn ready_barrier_satisfied(&self) -> bool {
        self.voting_closed
            && self
                .connected_participants()
                .iter()
                .all(|id| self.standings_ready_acks.contains(id))
    }

    /// Reset per-question tracking when a question opens: snapshot scores,
    /// clear flags and acknowledgment sets, invalidate outstanding timers.
    pub fn begin_question(&mut self) {
        self.question_start_scores = self
            .participants
            .iter()
            .map(|(id, p)| (*id, p.score))
            .collect();
        self.question_start_time = None;
        self.voting_closed = false;
        self.correct_answer_acks.clear();
        self.standings_ready_acks.clear();
        self.epoch += 1;
    }

    /// Install the generated question pool and arm game 1 of the series.
    pub fn install_series(&mut self, all_questions: Vec<Question>, songs_per_game: usize, games: u32) {
        self.all_questions = all_questions;
        self.game_index_map = (1..=games)
            .map(|game| {
                let start = (game as usize - 1) * songs_per_game;
                (game, (start..start + songs_per_game).collect())
            })
            .collect();
        self.games_in_series = games;
        self.current_game_number = 1;
        self.load_game(1);
        self.lifecycle = RoomLifecycle::Playing;
    }

    /// Fold every participant's game score into their series total.
    pub fn fold_series_scores(&mut self) {
        for (id, participant) in &self.participants {
            *self.series_scores.entry(*id).or_insert(0) += participant.score;
        }
    }

    /// Reset per-game state and load the next pre-generated question slice.
    /// Series scores persist; game scores restart at zero.
    pub fn start_next_game(&mut self) {
        self.current_game_number += 1;
        self.answers.clear();
        self.voting_closed = false;
        self.correct_answer_acks.clear();
        self.standings_ready_acks.clear();
        self.question_start_scores.clear();
        self.question_start_time = None;
        for participant in self.participants.values_mut() {
            participant.score = 0;
        }
        self.load_game(self.current_game_number);
        self.lifecycle = RoomLifecycle::Playing;
    }

    fn load_game(&mut self, game: u32) {
        let indices = self.game_index_map.get(&game).cloned().unwrap_or_default();
        self.questions = indices
            .iter()
            .filter_map(|&i| self.all_questions.get(i).cloned())
            .collect();
        self.current_question_index = 0;
    }

    /// Apply a round-phase event, returning the new phase.
    pub fn apply_phase(&mut self, event: RoundEvent) -> Result<RoundPhase, InvalidTransition> {
        self.phase = self.phase.transition(event)?;
        Ok(self.phase)
    }

    /// Response latency in milliseconds for the `player_answered` broadcast:
    /// server-side elapsed time, or the client-reported figure when it is a
    /// positive number and smaller (favors the player by excluding network
    /// latency).
    pub fn response_time_ms(
        &self,
        id: ParticipantId,
        client_response_time_ms: Option<f64>,
    ) -> Option<i64> {
        let started = self.question_start_time?;
        let answer = self.answers.get(&self.current_question_index)?.get(&id)?;
        let server_ms = (answer.server_received_at - started).whole_milliseconds() as i64;

        match client_response_time_ms {
            Some(client_ms) if client_ms > 0.0 => Some(server_ms.min(client_ms as i64)),
            _ => Some(server_ms),
        }
    }
}

/// Current wall-clock time with the offset stripped, matching how client
/// timestamps are normalized.
pub fn now_naive() -> PrimitiveDateTime {
    let now = OffsetDateTime::now_utc();
    PrimitiveDateTime::new(now.date(), now.time())
}

/// Parse an RFC 3339 client timestamp, keeping the literal clock reading and
/// discarding the zone offset. Returns `None` on anything unparseable so the
/// caller falls back to server receipt time.
fn parse_client_instant(raw: &str) -> Option<PrimitiveDateTime> {
    OffsetDateTime::parse(raw, &Rfc3339)
        .ok()
        .map(|instant| PrimitiveDateTime::new(instant.date(), instant.time()))
}
