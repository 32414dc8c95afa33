//! Periodic eviction of rooms and participants whose reconnection grace
//! period elapsed. The only path that permanently deletes state outside the
//! host's explicit end-game action.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::{
    dto::{game, ws::ServerMessage},
    state::{
        SharedState,
        room::{Room, RoomLifecycle},
    },
};

use crate::services::socket_service::broadcast;

/// Background loop: sweep the registry on a fixed short interval.
pub async fn run(state: SharedState) {
    let mut ticker = tokio::time::interval(state.config().sweep_interval);
    loop {
        ticker.tick().await;
        sweep_once(&state).await;
    }
}

/// One pass over every room. A host gone past the grace period tears the
/// whole room down (participant cleanup is moot then); otherwise each
/// participant past the grace period is evicted individually.
pub async fn sweep_once(state: &SharedState) {
    let grace = state.config().disconnect_grace;
    let rooms: Vec<Arc<Room>> = state
        .rooms()
        .iter()
        .map(|entry| entry.value().clone())
        .collect();

    for room in rooms {
        enum Action {
            CloseRoom(Vec<Uuid>),
            Evict(Vec<String>, ServerMessage, Vec<Uuid>),
            Nothing,
        }

        let action = {
            let mut st = room.lock().await;
            let host_expired = st.host_disconnected
                && st
                    .host_disconnected_at
                    .is_some_and(|at| at.elapsed() > grace);

            if host_expired {
                // Kill outstanding timers/barriers along with the room.
                st.lifecycle = RoomLifecycle::Ended;
                st.epoch += 1;
                Action::CloseRoom(st.broadcast_targets())
            } else {
                let expired: Vec<Uuid> = st
                    .participants
                    .iter()
                    .filter(|(_, p)| {
                        p.disconnected && p.disconnected_at.is_some_and(|at| at.elapsed() > grace)
                    })
                    .map(|(id, _)| *id)
                    .collect();

                if expired.is_empty() {
                    Action::Nothing
                } else {
                    let names: Vec<String> = expired
                        .iter()
                        .filter_map(|id| st.participants.get(id).map(|p| p.name.clone()))
                        .collect();
                    for id in &expired {
                        st.remove_participant(*id);
                    }
                    let update = ServerMessage::ParticipantLeft {
                        participants: game::roster(&st),
                        scores: game::scoreboard(&st),
                    };
                    Action::Evict(names, update, st.broadcast_targets())
                }
            }
        };

        match action {
            Action::CloseRoom(targets) => {
                info!(code = %room.code, "removing room: host grace period expired");
                broadcast(
                    state,
                    &targets,
                    &ServerMessage::RoomClosed {
                        message: "Host did not reconnect. Room closed.".into(),
                    },
                );
                state.remove_room(&room.code);
            }
            Action::Evict(names, update, targets) => {
                for name in names {
                    info!(code = %room.code, %name, "removing participant: grace period expired");
                }
                broadcast(state, &targets, &update);
                // The connected set shrank; wake any barrier so it can
                // re-evaluate.
                room.notify_acks();
            }
            Action::Nothing => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::advance;

    use super::*;
    use crate::services::room_service;
    use crate::services::test_support::{attach_client, drain_types, test_state_with_tracks};

    #[tokio::test(start_paused = true)]
    async fn host_grace_period_deletes_the_room_at_31s_not_29s() {
        let state = test_state_with_tracks(4);
        let (host, _host_rx) = attach_client(&state);
        let (player, mut player_rx) = attach_client(&state);

        room_service::create_room(&state, host, "test-list".into())
            .await
            .unwrap();
        let code = state.rooms().iter().next().unwrap().key().clone();
        room_service::join_room(&state, player, &code, "Ana".into())
            .await
            .unwrap();

        room_service::handle_disconnect(&state, host).await;

        advance(Duration::from_secs(29)).await;
        sweep_once(&state).await;
        assert!(state.room(&code).is_ok(), "room survives inside the grace period");

        advance(Duration::from_secs(2)).await;
        sweep_once(&state).await;
        assert!(state.room(&code).is_err(), "room deleted past the grace period");

        let types = drain_types(&mut player_rx);
        assert!(types.iter().any(|t| t == "host_disconnected"));
        assert!(types.iter().any(|t| t == "room_closed"));
    }

    #[tokio::test(start_paused = true)]
    async fn host_rejoin_inside_the_grace_period_keeps_the_room() {
        let state = test_state_with_tracks(4);
        let (host, _host_rx) = attach_client(&state);
        let (player, _player_rx) = attach_client(&state);

        room_service::create_room(&state, host, "test-list".into())
            .await
            .unwrap();
        let code = state.rooms().iter().next().unwrap().key().clone();
        room_service::join_room(&state, player, &code, "Ana".into())
            .await
            .unwrap();

        room_service::handle_disconnect(&state, host).await;
        advance(Duration::from_secs(29)).await;

        let (new_host, mut new_host_rx) = attach_client(&state);
        room_service::rejoin_room(&state, new_host, &code, "Host", true)
            .await
            .unwrap();

        // Well past the original deadline: the cleared flag protects the room.
        advance(Duration::from_secs(60)).await;
        sweep_once(&state).await;
        assert!(state.room(&code).is_ok());

        let room = state.room(&code).unwrap();
        let st = room.lock().await;
        assert_eq!(st.host_connection_id, new_host);
        assert!(!st.host_disconnected);
        drop(st);

        let types = drain_types(&mut new_host_rx);
        assert!(types.iter().any(|t| t == "rejoin_success"));
    }

    #[tokio::test(start_paused = true)]
    async fn participant_grace_period_evicts_and_broadcasts_roster() {
        let state = test_state_with_tracks(4);
        let (host, mut host_rx) = attach_client(&state);
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

        room_service::handle_disconnect(&state, ana).await;

        advance(Duration::from_secs(29)).await;
        sweep_once(&state).await;
        {
            let room = state.room(&code).unwrap();
            let st = room.lock().await;
            assert!(st.participants.contains_key(&ana), "still inside the grace period");
        }

        advance(Duration::from_secs(2)).await;
        sweep_once(&state).await;
        {
            let room = state.room(&code).unwrap();
            let st = room.lock().await;
            assert!(!st.participants.contains_key(&ana));
            assert!(st.participants.contains_key(&ben));
            assert!(
                st.series_scores.contains_key(&ana),
                "series history outlives the roster entry"
            );
        }

        let types = drain_types(&mut host_rx);
        assert!(types.iter().any(|t| t == "participant_disconnected"));
        assert!(types.iter().any(|t| t == "participant_left"));
    }

    #[tokio::test(start_paused = true)]
    async fn participant_rejoin_preserves_scores() {
        let state = test_state_with_tracks(4);
        let (host, _host_rx) = attach_client(&state);
        let (ana, _ana_rx) = attach_client(&state);

        room_service::create_room(&state, host, "test-list".into())
            .await
            .unwrap();
        let code = state.rooms().iter().next().unwrap().key().clone();
        room_service::join_room(&state, ana, &code, "Ana".into())
            .await
            .unwrap();

        let room = state.room(&code).unwrap();
        {
            let mut st = room.lock().await;
            st.participants[&ana].score = 250;
            st.series_scores.insert(ana, 600);
        }

        room_service::handle_disconnect(&state, ana).await;
        advance(Duration::from_secs(10)).await;

        let (ana_back, mut ana_back_rx) = attach_client(&state);
        room_service::rejoin_room(&state, ana_back, &code, "Ana", false)
            .await
            .unwrap();

        {
            let st = room.lock().await;
            assert!(!st.participants.contains_key(&ana));
            assert_eq!(st.participants[&ana_back].score, 250);
            assert_eq!(st.series_scores[&ana_back], 600);
        }

        let frames = crate::services::test_support::drain(&mut ana_back_rx);
        let success = frames
            .iter()
            .find(|value| value["type"] == "rejoin_success")
            .expect("participant rejoin must succeed");
        assert_eq!(success["current_score"], 250);

        // Long after the old identity's grace period, nothing gets evicted.
        advance(Duration::from_secs(60)).await;
        sweep_once(&state).await;
        let st = room.lock().await;
        assert!(st.participants.contains_key(&ana_back));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_name_rejoin_fails() {
        let state = test_state_with_tracks(4);
        let (host, _host_rx) = attach_client(&state);

        room_service::create_room(&state, host, "test-list".into())
            .await
            .unwrap();
        let code = state.rooms().iter().next().unwrap().key().clone();

        let (ghost, mut ghost_rx) = attach_client(&state);
        room_service::rejoin_room(&state, ghost, &code, "Nobody", false)
            .await
            .unwrap();

        let types = drain_types(&mut ghost_rx);
        assert!(types.iter().any(|t| t == "rejoin_failed"));
    }
}
