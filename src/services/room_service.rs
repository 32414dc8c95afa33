//! Room operations driven by inbound client events: creation, joining,
//! reconnection, answer collection, and the host-only series actions.

use std::sync::Arc;

use rand::seq::SliceRandom;
use tokio::time::Instant;
use tracing::info;
use uuid::Uuid;

use crate::{
    dto::{
        game::{self, HostQuestion, MidGameInfo, ParticipantSummary},
        ws::ServerMessage,
    },
    error::ServiceError,
    provider::CatalogTrack,
    state::{
        SharedState,
        phase::RoundPhase,
        room::{Question, Room, RoomLifecycle},
    },
};

use crate::services::{orchestrator, socket_service};

/// Placeholder option used when the provider cannot supply enough decoys.
const FALLBACK_ARTIST: &str = "Unknown Artist";

/// Open a new room bound to a catalog list; the calling socket becomes host.
pub async fn create_room(
    state: &SharedState,
    connection_id: Uuid,
    playlist_id: String,
) -> Result<(), ServiceError> {
    let room = state.create_room(connection_id, playlist_id.clone());
    info!(code = %room.code, host = %connection_id, "room created");

    socket_service::send_to(
        state,
        connection_id,
        &ServerMessage::RoomCreated {
            code: room.code.clone(),
            playlist_id,
        },
    );
    Ok(())
}

/// Join an existing room as a participant. Joining mid-game is allowed; the
/// newcomer plays from the next question and receives the current standings.
pub async fn join_room(
    state: &SharedState,
    connection_id: Uuid,
    code: &str,
    name: String,
) -> Result<(), ServiceError> {
    let room = state.room(code)?;

    let (joined, notice, others) = {
        let mut st = room.lock().await;
        st.add_participant(connection_id, name.clone());
        let mid_game =
            (st.lifecycle == RoomLifecycle::Playing).then(|| MidGameInfo::from_room(&st));

        let roster = game::roster(&st);
        let new_participant = ParticipantSummary {
            id: connection_id,
            name: name.clone(),
            score: 0,
            disconnected: false,
        };
        let mut others = st.broadcast_targets();
        others.retain(|target| *target != connection_id);

        (
            ServerMessage::RoomJoined {
                code: room.code.clone(),
                name: name.clone(),
                participants: roster.clone(),
                mid_game,
            },
            ServerMessage::ParticipantJoined {
                participants: roster,
                new_participant,
            },
            others,
        )
    };

    info!(code = %room.code, %name, "participant joined");
    socket_service::send_to(state, connection_id, &joined);
    socket_service::broadcast(state, &others, &notice);
    Ok(())
}

/// Reclaim an identity after a disconnect. Hosts are re-pointed by
/// connection; participants are matched by display name and their score,
/// series score, and in-flight answer migrate to the new connection.
pub async fn rejoin_room(
    state: &SharedState,
    connection_id: Uuid,
    code: &str,
    name: &str,
    was_host: bool,
) -> Result<(), ServiceError> {
    let Ok(room) = state.room(code) else {
        socket_service::send_to(
            state,
            connection_id,
            &ServerMessage::RejoinFailed {
                message: "Room no longer exists".into(),
            },
        );
        return Ok(());
    };

    if was_host {
        rejoin_as_host(state, &room, connection_id).await
    } else {
        rejoin_as_participant(state, &room, connection_id, name).await
    }
}

async fn rejoin_as_host(
    state: &SharedState,
    room: &Arc<Room>,
    connection_id: Uuid,
) -> Result<(), ServiceError> {
    let (payload, others) = {
        let mut st = room.lock().await;
        st.host_connection_id = connection_id;
        st.host_disconnected = false;
        st.host_disconnected_at = None;

        let mid_game = st.lifecycle == RoomLifecycle::Playing;
        let payload = ServerMessage::RejoinSuccess {
            state: st.lifecycle.as_str().into(),
            participants: Some(game::roster(&st)),
            current_score: None,
            question: mid_game.then(|| HostQuestion::from_room(&st)).flatten(),
            voting_closed: mid_game.then_some(st.voting_closed),
            should_advance: mid_game.then(|| st.ready_barrier_satisfied()),
        };
        let mut others = st.broadcast_targets();
        others.retain(|target| *target != connection_id);
        (payload, others)
    };

    info!(code = %room.code, id = %connection_id, "host rejoined");
    socket_service::send_to(state, connection_id, &payload);
    socket_service::broadcast(state, &others, &ServerMessage::HostReconnected);
    Ok(())
}

async fn rejoin_as_participant(
    state: &SharedState,
    room: &Arc<Room>,
    connection_id: Uuid,
    name: &str,
) -> Result<(), ServiceError> {
    let outcome = {
        let mut st = room.lock().await;
        match st.find_participant_by_name(name) {
            Some(old_id) => {
                let score = st.migrate_participant(old_id, connection_id).unwrap_or(0);
                let payload = ServerMessage::RejoinSuccess {
                    state: st.lifecycle.as_str().into(),
                    participants: None,
                    current_score: Some(score),
                    question: None,
                    voting_closed: None,
                    should_advance: None,
                };
                let notice = ServerMessage::ParticipantReconnected {
                    name: name.to_string(),
                    participants: game::roster(&st),
                };
                let mut others = st.broadcast_targets();
                others.retain(|target| *target != connection_id);
                Some((payload, notice, others))
            }
            None => None,
        }
    };

    match outcome {
        Some((payload, notice, others)) => {
            info!(code = %room.code, %name, "participant rejoined");
            socket_service::send_to(state, connection_id, &payload);
            socket_service::broadcast(state, &others, &notice);
            // The connected set changed; a barrier may now be satisfied
            // differently than before.
            room.notify_acks();
        }
        None => {
            socket_service::send_to(
                state,
                connection_id,
                &ServerMessage::RejoinFailed {
                    message: "Participant not found in room. Please join as new player.".into(),
                },
            );
        }
    }
    Ok(())
}

/// Host-only: fetch tracks, generate the full question pool for the series,
/// and open the first question. Provider calls run outside the room lock.
pub async fn start_game(
    state: &SharedState,
    connection_id: Uuid,
    code: &str,
    song_count: usize,
    games_count: u32,
) -> Result<(), ServiceError> {
    let room = state.room(code)?;

    let playlist_id = {
        let st = room.lock().await;
        if st.host_connection_id != connection_id {
            return Err(ServiceError::Unauthorized(
                "only the host can start the game".into(),
            ));
        }
        if st.lifecycle != RoomLifecycle::Waiting {
            return Err(ServiceError::InvalidState("game already started".into()));
        }
        st.catalog_list_id.clone()
    };

    let song_count = song_count.clamp(1, state.config().max_songs_per_game);
    let games_count = games_count.clamp(1, state.config().max_games_in_series);
    let needed = song_count * games_count as usize;

    let mut tracks = state.provider().playlist_tracks(&playlist_id).await?;
    if tracks.len() < needed {
        return Err(ServiceError::InvalidState(format!(
            "not enough tracks in playlist: need {needed}, found {}",
            tracks.len()
        )));
    }
    tracks.shuffle(&mut rand::rng());
    tracks.truncate(needed);

    let questions = generate_questions(state, tracks).await?;

    let (started, targets) = {
        let mut st = room.lock().await;
        // Re-check: a concurrent start may have won while the provider ran.
        if st.lifecycle != RoomLifecycle::Waiting {
            return Err(ServiceError::InvalidState("game already started".into()));
        }
        st.install_series(questions, song_count, games_count);
        (
            ServerMessage::GameStarted {
                total_songs: song_count,
                games_in_series: games_count,
                current_game: 1,
            },
            st.broadcast_targets(),
        )
    };

    info!(code = %room.code, songs = song_count, games = games_count, "game started");
    socket_service::broadcast(state, &targets, &started);
    orchestrator::open_question(state, &room).await;
    Ok(())
}

/// Build one question per track: the correct artist plus up to three decoys
/// from the provider, shuffled, with the palette mapped positionally.
async fn generate_questions(
    state: &SharedState,
    tracks: Vec<CatalogTrack>,
) -> Result<Vec<Question>, ServiceError> {
    let provider = state.provider();
    let colors = state.config().option_colors.clone();
    let mut used: Vec<String> = Vec::new();
    let mut questions = Vec::with_capacity(tracks.len());

    for track in tracks {
        let mut decoys = provider
            .decoy_artists(&track.artist, used.clone(), 3)
            .await?;
        decoys.truncate(3);
        used.extend(decoys.iter().cloned());
        while decoys.len() < 3 {
            decoys.push(FALLBACK_ARTIST.to_string());
        }

        let mut options = Vec::with_capacity(4);
        options.push(track.artist.clone());
        options.extend(decoys);
        options.shuffle(&mut rand::rng());
        let correct_option = options
            .iter()
            .position(|option| *option == track.artist)
            .unwrap_or(0);

        questions.push(Question {
            track_name: track.title,
            playable_ref: track.playable_ref,
            options,
            correct_option,
            correct_artist: track.artist,
            colors: colors.clone(),
        });
    }

    Ok(questions)
}

/// Record and score an answer for the question in flight. The first answer
/// per participant and question wins; later ones are rejected with the
/// original retained.
pub async fn submit_answer(
    state: &SharedState,
    connection_id: Uuid,
    code: &str,
    answer: usize,
    client_timestamp: Option<String>,
    client_response_time_ms: Option<f64>,
) -> Result<(), ServiceError> {
    let room = state.room(code)?;

    let (feedback, answered, scores, targets, close_epoch) = {
        let mut st = room.lock().await;
        if !st.participants.contains_key(&connection_id) {
            return Err(ServiceError::NotInRoom);
        }
        if st.lifecycle != RoomLifecycle::Playing || st.current_question().is_none() {
            return Err(ServiceError::InvalidState("no question in flight".into()));
        }
        if st.voting_closed {
            return Err(ServiceError::VotingClosed);
        }
        if st.has_answered(connection_id) {
            return Err(ServiceError::DuplicateAnswer);
        }

        st.record_answer(connection_id, answer, client_timestamp.as_deref());
        let correct = st.check_answer(connection_id, answer);

        let participant = &st.participants[&connection_id];
        let feedback = ServerMessage::AnswerFeedback {
            correct,
            your_score: participant.score,
        };
        let answered = ServerMessage::PlayerAnswered {
            player_name: participant.name.clone(),
            response_time_ms: st.response_time_ms(connection_id, client_response_time_ms),
        };
        let scores = ServerMessage::ScoresUpdated {
            scores: game::scoreboard(&st),
        };
        let targets = st.broadcast_targets();
        let close_epoch = st.all_connected_answered().then_some(st.epoch);

        (feedback, answered, scores, targets, close_epoch)
    };

    socket_service::send_to(state, connection_id, &feedback);
    socket_service::broadcast(state, &targets, &answered);
    socket_service::broadcast(state, &targets, &scores);

    // Whichever of this check and the window timer fires first wins; both
    // funnel into the same idempotent close routine.
    if let Some(epoch) = close_epoch {
        socket_service::broadcast(state, &targets, &ServerMessage::AllAnswered);
        let state = state.clone();
        let room = room.clone();
        tokio::spawn(async move {
            orchestrator::close_voting(&state, &room, epoch).await;
        });
    }
    Ok(())
}

/// A participant confirms the revealed answer reached their screen.
/// Silently ignored outside a reveal cycle, matching a late or duplicate ack.
pub async fn acknowledge_reveal(
    state: &SharedState,
    connection_id: Uuid,
    code: &str,
) -> Result<(), ServiceError> {
    let Ok(room) = state.room(code) else {
        return Ok(());
    };
    {
        let mut st = room.lock().await;
        if st.participants.contains_key(&connection_id) {
            st.correct_answer_acks.insert(connection_id);
        }
    }
    room.notify_acks();
    Ok(())
}

/// A participant is ready to leave the standings view.
pub async fn acknowledge_ready(
    state: &SharedState,
    connection_id: Uuid,
    code: &str,
) -> Result<(), ServiceError> {
    let Ok(room) = state.room(code) else {
        return Ok(());
    };
    {
        let mut st = room.lock().await;
        if st.participants.contains_key(&connection_id) {
            st.standings_ready_acks.insert(connection_id);
        }
    }
    room.notify_acks();
    Ok(())
}

/// Host-only: reset per-game state, load the next pre-generated question
/// slice, and open its first question. Series scores persist.
pub async fn start_next_game(
    state: &SharedState,
    connection_id: Uuid,
    code: &str,
) -> Result<(), ServiceError> {
    let room = state.room(code)?;

    let (started, targets) = {
        let mut st = room.lock().await;
        if st.host_connection_id != connection_id {
            return Err(ServiceError::Unauthorized(
                "only the host can start the next game".into(),
            ));
        }
        if st.phase != RoundPhase::GameOver {
            return Err(ServiceError::InvalidState(
                "no finished game awaiting the next one".into(),
            ));
        }
        if st.current_game_number >= st.games_in_series {
            return Err(ServiceError::InvalidState("series already finished".into()));
        }

        st.start_next_game();
        (
            ServerMessage::GameStarted {
                total_songs: st.questions.len(),
                games_in_series: st.games_in_series,
                current_game: st.current_game_number,
            },
            st.broadcast_targets(),
        )
    };

    info!(code = %room.code, "next game of the series started");
    socket_service::broadcast(state, &targets, &started);
    orchestrator::open_question(state, &room).await;
    Ok(())
}

/// Host-only explicit teardown: broadcast final standings and delete the
/// room. The sweeper is the only other deletion path.
pub async fn end_game(
    state: &SharedState,
    connection_id: Uuid,
    code: &str,
) -> Result<(), ServiceError> {
    let room = state.room(code)?;

    let (payload, targets) = {
        let mut st = room.lock().await;
        if st.host_connection_id != connection_id {
            return Err(ServiceError::Unauthorized(
                "only the host can end the game".into(),
            ));
        }
        st.lifecycle = RoomLifecycle::Ended;
        // Invalidate any in-flight timer or barrier continuation.
        st.epoch += 1;
        (
            ServerMessage::GameEnded {
                game_scores: game::scoreboard(&st),
                series_scores: game::series_scoreboard(&st),
                current_game: st.current_game_number,
                total_games: st.games_in_series,
            },
            st.broadcast_targets(),
        )
    };

    socket_service::broadcast(state, &targets, &payload);
    state.remove_room(&room.code);
    info!(code = %room.code, "room ended by host");
    Ok(())
}

/// Mark the disconnecting identity and start its grace period. Nothing is
/// removed here; the sweeper owns eviction.
pub async fn handle_disconnect(state: &SharedState, connection_id: Uuid) {
    let rooms: Vec<Arc<Room>> = state
        .rooms()
        .iter()
        .map(|entry| entry.value().clone())
        .collect();

    for room in rooms {
        enum Notice {
            Host(Vec<Uuid>),
            Participant(String, ServerMessage, Vec<Uuid>),
        }

        let notice = {
            let mut st = room.lock().await;
            if st.host_connection_id == connection_id && !st.host_disconnected {
                st.host_disconnected = true;
                st.host_disconnected_at = Some(Instant::now());
                let mut others = st.broadcast_targets();
                others.retain(|target| *target != connection_id);
                Some(Notice::Host(others))
            } else if let Some(participant) = st.participants.get_mut(&connection_id) {
                participant.disconnected = true;
                participant.disconnected_at = Some(Instant::now());
                let name = participant.name.clone();
                let update = ServerMessage::ParticipantDisconnected {
                    name: name.clone(),
                    participants: game::roster(&st),
                };
                let mut others = st.broadcast_targets();
                others.retain(|target| *target != connection_id);
                Some(Notice::Participant(name, update, others))
            } else {
                None
            }
        };

        match notice {
            Some(Notice::Host(targets)) => {
                info!(code = %room.code, "host disconnected; grace period running");
                socket_service::broadcast(
                    state,
                    &targets,
                    &ServerMessage::HostDisconnected {
                        message: "Host disconnected. Waiting for reconnection...".into(),
                    },
                );
                return;
            }
            Some(Notice::Participant(name, update, targets)) => {
                info!(code = %room.code, %name, "participant disconnected; grace period running");
                socket_service::broadcast(state, &targets, &update);
                // The connected set shrank; a pending barrier may now be
                // satisfied.
                room.notify_acks();
                return;
            }
            None => {}
        }
    }
}
