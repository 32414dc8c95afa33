//! Question lifecycle orchestration.
//!
//! Drives a room through send question, collect answers, close voting,
//! reveal, standings, and advance-or-end. Timers and acknowledgment barriers
//! run as independent tasks per room; every continuation captures the room
//! epoch it was scheduled for and no-ops when the room has moved on.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dto::{
        game::{self, HostQuestion, ParticipantQuestion},
        ws::ServerMessage,
    },
    error::ServiceError,
    state::{
        SharedState,
        phase::{RoundEvent, RoundPhase},
        room::{Room, RoomLifecycle, now_naive},
    },
};

use crate::services::socket_service::{broadcast, send_to};

/// Send the question in flight: full payload to the host, colors only to
/// participants. The answer window is not armed here; it starts when the
/// host reports playback actually began.
pub async fn open_question(state: &SharedState, room: &Arc<Room>) {
    let (host, host_payload, participant_payload, participant_targets) = {
        let mut st = room.lock().await;
        if let Err(err) = st.apply_phase(RoundEvent::QuestionSent) {
            warn!(code = %room.code, error = %err, "cannot open question");
            return;
        }
        st.begin_question();

        let host_payload = HostQuestion::from_room(&st)
            .map(|question| ServerMessage::NewQuestion { question });
        let participant_payload = ParticipantQuestion::from_room(&st)
            .map(|question| ServerMessage::NewQuestionParticipant { question });
        let targets: Vec<Uuid> = st.participants.keys().copied().collect();
        (st.host_connection_id, host_payload, participant_payload, targets)
    };

    if let Some(payload) = host_payload {
        send_to(state, host, &payload);
    }
    if let Some(payload) = participant_payload {
        broadcast(state, &participant_targets, &payload);
    }
    info!(code = %room.code, "question opened");
}

/// The host's player actually started the excerpt: stamp the question start
/// time and arm the answer-window timer. Decoupling this from question send
/// keeps the window comparable for everyone regardless of host buffering.
pub async fn playback_started(state: &SharedState, code: &str) -> Result<(), ServiceError> {
    let Ok(room) = state.room(code) else {
        return Ok(());
    };

    let (epoch, targets) = {
        let mut st = room.lock().await;
        if st.lifecycle != RoomLifecycle::Playing
            || st.phase != RoundPhase::QuestionOpen
            || st.voting_closed
        {
            // Late or repeated playback signal for a question the room has
            // moved past; nothing to arm.
            return Ok(());
        }
        st.question_start_time = Some(now_naive());
        (st.epoch, st.broadcast_targets())
    };

    broadcast(state, &targets, &ServerMessage::StartQuestionTimer);
    info!(code = %room.code, "playback started; answer window armed");

    let window = state.config().question_window;
    let state = state.clone();
    let room = room.clone();
    tokio::spawn(async move {
        tokio::time::sleep(window).await;
        question_timeout(&state, &room, epoch).await;
    });
    Ok(())
}

/// Window timer continuation. A stale fire (the room advanced past the
/// question this was armed for) is an expected race and no-ops.
async fn question_timeout(state: &SharedState, room: &Arc<Room>, epoch: u64) {
    let targets = {
        let st = room.lock().await;
        if st.epoch != epoch || st.voting_closed {
            return;
        }
        st.broadcast_targets()
    };

    info!(code = %room.code, "question window elapsed");
    broadcast(state, &targets, &ServerMessage::QuestionTimeout);
    close_voting(state, room, epoch).await;
}

/// Close voting and walk the rest of the question cycle: reveal, bounded
/// reveal-acknowledgment barrier, standings to the host, bounded ready
/// barrier with a minimum display time, then advance or end.
///
/// Idempotent: closing an already-closed question (or one the room moved
/// past) is a no-op, so the timeout and the everyone-answered paths can race
/// freely.
pub async fn close_voting(state: &SharedState, room: &Arc<Room>, epoch: u64) {
    let (reveal, targets) = {
        let mut st = room.lock().await;
        if st.epoch != epoch || st.voting_closed {
            return;
        }
        if let Err(err) = st.apply_phase(RoundEvent::VotingClose) {
            warn!(code = %room.code, error = %err, "cannot close voting");
            return;
        }
        st.voting_closed = true;
        st.correct_answer_acks.clear();
        let Some(question) = st.current_question() else {
            return;
        };
        (
            ServerMessage::ShowCorrectAnswer {
                correct_answer: question.correct_option,
                correct_artist: question.correct_artist.clone(),
            },
            st.broadcast_targets(),
        )
    };

    info!(code = %room.code, "voting closed; revealing answer");
    broadcast(state, &targets, &reveal);

    // Bounded wait for every connected participant to confirm the reveal;
    // a dropped client must not hold the room hostage.
    room.wait_until(state.config().reveal_ack_wait, |st| {
        st.reveal_acks_satisfied()
    })
    .await;

    let (host, standings) = {
        let mut st = room.lock().await;
        if st.epoch != epoch {
            return;
        }
        if let Err(err) = st.apply_phase(RoundEvent::StandingsSent) {
            warn!(code = %room.code, error = %err, "cannot show standings");
            return;
        }
        st.standings_ready_acks.clear();
        (
            st.host_connection_id,
            ServerMessage::ShowIntermediateScores {
                scores: game::standings(&st),
                is_last_question: st.is_last_question(),
            },
        )
    };
    send_to(state, host, &standings);

    // Ready barrier, bounded above and below: guarantee a minimum view time
    // even when everyone acknowledges instantly, and never stall past the
    // bound when some never do.
    let shown_at = Instant::now();
    room.wait_until(state.config().standings_max_wait, |st| {
        st.ready_barrier_satisfied()
    })
    .await;
    let elapsed = shown_at.elapsed();
    let min_display = state.config().standings_min_display;
    if elapsed < min_display {
        tokio::time::sleep(min_display - elapsed).await;
    }

    advance_or_finish(state, room, epoch).await;
}

/// Move past the question in flight: open the next question, or fold the
/// game into the series and emit the game/series recap. Stale callers (the
/// epoch moved) no-op, which is what makes host force-advance and the
/// barrier-released auto-advance safe to race.
pub async fn advance_or_finish(state: &SharedState, room: &Arc<Room>, epoch: u64) {
    enum Outcome {
        Open,
        Recap(ServerMessage, Vec<Uuid>),
    }

    let outcome = {
        let mut st = room.lock().await;
        if st.epoch != epoch || st.lifecycle != RoomLifecycle::Playing {
            return;
        }

        if st.is_last_question() {
            st.fold_series_scores();
            st.epoch += 1;
            if st.current_game_number >= st.games_in_series {
                if let Err(err) = st.apply_phase(RoundEvent::SeriesFinished) {
                    warn!(code = %room.code, error = %err, "cannot finish series");
                    return;
                }
                st.lifecycle = RoomLifecycle::Ended;
                info!(code = %room.code, games = st.games_in_series, "series finished");
                Outcome::Recap(
                    ServerMessage::SeriesEnded {
                        final_scores: game::series_scoreboard(&st),
                        games_played: st.games_in_series,
                    },
                    st.broadcast_targets(),
                )
            } else {
                if let Err(err) = st.apply_phase(RoundEvent::GameFinished) {
                    warn!(code = %room.code, error = %err, "cannot finish game");
                    return;
                }
                info!(
                    code = %room.code,
                    game = st.current_game_number,
                    of = st.games_in_series,
                    "game finished; awaiting next"
                );
                Outcome::Recap(
                    ServerMessage::GameEnded {
                        game_scores: game::scoreboard(&st),
                        series_scores: game::series_scoreboard(&st),
                        current_game: st.current_game_number,
                        total_games: st.games_in_series,
                    },
                    st.broadcast_targets(),
                )
            }
        } else {
            if let Err(err) = st.apply_phase(RoundEvent::AdvanceRequested) {
                warn!(code = %room.code, error = %err, "cannot advance");
                return;
            }
            st.current_question_index += 1;
            st.voting_closed = false;
            st.epoch += 1;
            Outcome::Open
        }
    };

    match outcome {
        Outcome::Open => open_question(state, room).await,
        Outcome::Recap(payload, targets) => broadcast(state, &targets, &payload),
    }
}

/// Host-only force-advance past the question in flight, available from any
/// mid-question phase. Any pending barrier continuation for the superseded
/// question dies on the epoch check.
pub async fn force_advance(
    state: &SharedState,
    connection_id: Uuid,
    code: &str,
) -> Result<(), ServiceError> {
    let room = state.room(code)?;

    let epoch = {
        let st = room.lock().await;
        if st.host_connection_id != connection_id {
            return Err(ServiceError::Unauthorized(
                "only the host can advance questions".into(),
            ));
        }
        if st.lifecycle != RoomLifecycle::Playing {
            return Err(ServiceError::InvalidState("no game in progress".into()));
        }
        if !matches!(
            st.phase,
            RoundPhase::QuestionOpen | RoundPhase::VotingClosed | RoundPhase::StandingsShown
        ) {
            return Err(ServiceError::InvalidState(
                "no question to advance past".into(),
            ));
        }
        st.epoch
    };

    info!(code = %room.code, "host force-advance");
    advance_or_finish(state, &room, epoch).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::Value;

    use super::*;
    use crate::services::room_service;
    use crate::services::test_support::{attach_client, drain_types, test_state_with_tracks};
    use crate::state::phase::RoundPhase;

    /// Virtual-time sleep long enough to let a full close cycle (reveal
    /// barrier + ready barrier + minimum display) run to completion.
    async fn settle() {
        tokio::time::sleep(Duration::from_secs(60)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_closes_voting_and_auto_advances() {
        let state = test_state_with_tracks(8);
        let (host, mut host_rx) = attach_client(&state);
        let (player, mut player_rx) = attach_client(&state);

        room_service::create_room(&state, host, "test-list".into())
            .await
            .unwrap();
        let code = state.rooms().iter().next().unwrap().key().clone();
        room_service::join_room(&state, player, &code, "Ana".into())
            .await
            .unwrap();
        room_service::start_game(&state, host, &code, 2, 1)
            .await
            .unwrap();
        playback_started(&state, &code).await.unwrap();

        // Nobody answers; the 15s window closes voting on its own and the
        // barriers release on their bounds.
        settle().await;

        let room = state.room(&code).unwrap();
        let st = room.lock().await;
        assert_eq!(st.current_question_index, 1, "room should auto-advance");
        assert!(!st.voting_closed, "next question starts with voting open");
        drop(st);

        let host_types = drain_types(&mut host_rx);
        assert!(host_types.iter().any(|t| t == "question_timeout"));
        assert!(host_types.iter().any(|t| t == "show_correct_answer"));
        assert!(host_types.iter().any(|t| t == "show_intermediate_scores"));
        assert_eq!(
            host_types.iter().filter(|t| *t == "new_question").count(),
            2
        );

        let player_types = drain_types(&mut player_rx);
        assert!(
            player_types
                .iter()
                .any(|t| t == "new_question_participant")
        );
        assert!(
            !player_types.iter().any(|t| t == "show_intermediate_scores"),
            "standings go to the host only"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn everyone_answering_closes_voting_early() {
        let state = test_state_with_tracks(8);
        let (host, _host_rx) = attach_client(&state);
        let (player, mut player_rx) = attach_client(&state);

        room_service::create_room(&state, host, "test-list".into())
            .await
            .unwrap();
        let code = state.rooms().iter().next().unwrap().key().clone();
        room_service::join_room(&state, player, &code, "Ana".into())
            .await
            .unwrap();
        room_service::start_game(&state, host, &code, 2, 1)
            .await
            .unwrap();
        playback_started(&state, &code).await.unwrap();

        room_service::submit_answer(&state, player, &code, 0, None, None)
            .await
            .unwrap();

        // Give the spawned close task a moment; well under the 15s window.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let room = state.room(&code).unwrap();
        {
            let st = room.lock().await;
            assert!(
                st.voting_closed || st.current_question_index == 1,
                "voting must close before the window elapses"
            );
        }

        let player_types = drain_types(&mut player_rx);
        assert!(player_types.iter().any(|t| t == "all_answered"));
        assert!(player_types.iter().any(|t| t == "show_correct_answer"));
        assert!(
            !player_types.iter().any(|t| t == "question_timeout"),
            "the early close wins over the timer"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stale_timer_is_a_no_op_after_force_advance() {
        let state = test_state_with_tracks(8);
        let (host, _host_rx) = attach_client(&state);
        let (player, _player_rx) = attach_client(&state);

        room_service::create_room(&state, host, "test-list".into())
            .await
            .unwrap();
        let code = state.rooms().iter().next().unwrap().key().clone();
        room_service::join_room(&state, player, &code, "Ana".into())
            .await
            .unwrap();
        room_service::start_game(&state, host, &code, 3, 1)
            .await
            .unwrap();
        playback_started(&state, &code).await.unwrap();

        // Host skips ahead before the window elapses.
        force_advance(&state, host, &code).await.unwrap();

        let room = state.room(&code).unwrap();
        {
            let st = room.lock().await;
            assert_eq!(st.current_question_index, 1);
        }

        // The original question's timer fires into the new question and must
        // not close it.
        tokio::time::advance(Duration::from_secs(16)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let st = room.lock().await;
        assert_eq!(st.current_question_index, 1);
        assert!(
            !st.voting_closed,
            "stale timer must not close the next question"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn force_advance_is_host_only() {
        let state = test_state_with_tracks(8);
        let (host, _host_rx) = attach_client(&state);
        let (player, _player_rx) = attach_client(&state);

        room_service::create_room(&state, host, "test-list".into())
            .await
            .unwrap();
        let code = state.rooms().iter().next().unwrap().key().clone();
        room_service::join_room(&state, player, &code, "Ana".into())
            .await
            .unwrap();
        room_service::start_game(&state, host, &code, 2, 1)
            .await
            .unwrap();

        let err = force_advance(&state, player, &code).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn series_folds_scores_and_resets_between_games() {
        let state = test_state_with_tracks(10);
        let (host, mut host_rx) = attach_client(&state);
        let (player, mut player_rx) = attach_client(&state);

        room_service::create_room(&state, host, "test-list".into())
            .await
            .unwrap();
        let code = state.rooms().iter().next().unwrap().key().clone();
        room_service::join_room(&state, player, &code, "Ana".into())
            .await
            .unwrap();
        // 2-game series, 1 song per game.
        room_service::start_game(&state, host, &code, 1, 2)
            .await
            .unwrap();
        playback_started(&state, &code).await.unwrap();

        let room = state.room(&code).unwrap();
        let correct = {
            let st = room.lock().await;
            st.current_question().unwrap().correct_option
        };
        room_service::submit_answer(&state, player, &code, correct, None, None)
            .await
            .unwrap();
        settle().await;

        {
            let st = room.lock().await;
            assert_eq!(st.phase, RoundPhase::GameOver);
            // 1 question per game plays in the 4x band: 100 * 4.
            assert_eq!(st.series_scores[&player], 400);
        }
        let host_types = drain_types(&mut host_rx);
        assert!(host_types.iter().any(|t| t == "game_ended"));

        room_service::start_next_game(&state, host, &code)
            .await
            .unwrap();
        {
            let st = room.lock().await;
            assert_eq!(st.current_game_number, 2);
            assert_eq!(st.participants[&player].score, 0);
            assert_eq!(st.series_scores[&player], 400);
        }

        playback_started(&state, &code).await.unwrap();
        let correct = {
            let st = room.lock().await;
            st.current_question().unwrap().correct_option
        };
        room_service::submit_answer(&state, player, &code, correct, None, None)
            .await
            .unwrap();
        settle().await;

        {
            let st = room.lock().await;
            assert_eq!(st.phase, RoundPhase::SeriesOver);
            assert_eq!(st.series_scores[&player], 800);
        }
        let player_types = drain_types(&mut player_rx);
        assert!(player_types.iter().any(|t| t == "series_ended"));
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_and_late_answers_are_rejected() {
        let state = test_state_with_tracks(8);
        let (host, _host_rx) = attach_client(&state);
        let (ana, _ana_rx) = attach_client(&state);
        let (ben, _ben_rx) = attach_client(&state);

        room_service::create_room(&state, host, "test-list".into())
            .await
            .unwrap();
        let code = state.rooms().iter().next().unwrap().key().clone();
        room_service::join_room(&state, ana, &code, "Ana".into())
            .await
            .unwrap();
        room_service::join_room(&state, ben, &code, "Ben".into())
            .await
            .unwrap();
        room_service::start_game(&state, host, &code, 2, 1)
            .await
            .unwrap();
        playback_started(&state, &code).await.unwrap();
        // Let the spawned window-timer task register its 15s deadline against
        // the current (t=0) clock before we advance time below; otherwise it
        // first polls after the advance and arms for t=16s+15s, never firing.
        tokio::task::yield_now().await;

        room_service::submit_answer(&state, ana, &code, 0, None, None)
            .await
            .unwrap();
        let err = room_service::submit_answer(&state, ana, &code, 1, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::DuplicateAnswer));

        // Close the question by timeout, then a late answer bounces.
        tokio::time::advance(Duration::from_secs(16)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        let err = room_service::submit_answer(&state, ben, &code, 0, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::VotingClosed));
    }

    #[tokio::test(start_paused = true)]
    async fn host_question_payload_hides_nothing_and_participant_payload_hides_artists() {
        let state = test_state_with_tracks(8);
        let (host, mut host_rx) = attach_client(&state);
        let (player, mut player_rx) = attach_client(&state);

        room_service::create_room(&state, host, "test-list".into())
            .await
            .unwrap();
        let code = state.rooms().iter().next().unwrap().key().clone();
        room_service::join_room(&state, player, &code, "Ana".into())
            .await
            .unwrap();
        room_service::start_game(&state, host, &code, 2, 1)
            .await
            .unwrap();

        let host_question = crate::services::test_support::drain(&mut host_rx)
            .into_iter()
            .find(|value| value["type"] == "new_question")
            .expect("host must receive the full question");
        assert_eq!(host_question["question"]["options"].as_array().unwrap().len(), 4);
        assert!(host_question["question"]["correct_answer"].is_u64());

        let player_question = crate::services::test_support::drain(&mut player_rx)
            .into_iter()
            .find(|value| value["type"] == "new_question_participant")
            .expect("participants must receive the stripped question");
        assert_eq!(
            player_question["question"]["colors"].as_array().unwrap().len(),
            4
        );
        assert!(
            player_question["question"].get("options").is_none(),
            "participants never see artist names"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn ready_acks_release_the_standings_barrier_before_its_bound() {
        let state = test_state_with_tracks(8);
        let (host, _host_rx) = attach_client(&state);
        let (player, _player_rx) = attach_client(&state);

        room_service::create_room(&state, host, "test-list".into())
            .await
            .unwrap();
        let code = state.rooms().iter().next().unwrap().key().clone();
        room_service::join_room(&state, player, &code, "Ana".into())
            .await
            .unwrap();
        room_service::start_game(&state, host, &code, 2, 1)
            .await
            .unwrap();
        playback_started(&state, &code).await.unwrap();

        room_service::submit_answer(&state, player, &code, 0, None, None)
            .await
            .unwrap();
        // Ack the reveal and the standings as soon as they can matter.
        room_service::acknowledge_reveal(&state, player, &code)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        room_service::acknowledge_ready(&state, player, &code)
            .await
            .unwrap();

        // The minimum display time still applies, so the advance lands
        // between the 6s floor and the 14s bound.
        tokio::time::sleep(Duration::from_secs(8)).await;

        let room = state.room(&code).unwrap();
        let st = room.lock().await;
        assert_eq!(
            st.current_question_index, 1,
            "acks plus minimum display should have advanced the room"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn standings_carry_points_gained() {
        let state = test_state_with_tracks(8);
        let (host, mut host_rx) = attach_client(&state);
        let (player, _player_rx) = attach_client(&state);

        room_service::create_room(&state, host, "test-list".into())
            .await
            .unwrap();
        let code = state.rooms().iter().next().unwrap().key().clone();
        room_service::join_room(&state, player, &code, "Ana".into())
            .await
            .unwrap();
        room_service::start_game(&state, host, &code, 2, 1)
            .await
            .unwrap();
        playback_started(&state, &code).await.unwrap();

        let room = state.room(&code).unwrap();
        let correct = {
            let st = room.lock().await;
            st.current_question().unwrap().correct_option
        };
        room_service::submit_answer(&state, player, &code, correct, None, None)
            .await
            .unwrap();
        settle().await;

        let standings: Vec<Value> = crate::services::test_support::drain(&mut host_rx)
            .into_iter()
            .filter(|value| value["type"] == "show_intermediate_scores")
            .collect();
        assert_eq!(standings.len(), 1);
        let entry = &standings[0]["scores"][0];
        assert_eq!(entry["name"], "Ana");
        assert_eq!(entry["points_gained"], 100);
    }
}
