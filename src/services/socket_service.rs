//! WebSocket connection lifecycle and inbound event dispatch.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dto::ws::{ClientMessage, ServerMessage},
    services::{orchestrator, room_service},
    state::{ClientConnection, SharedState},
};

/// Handle the full lifecycle for an individual client WebSocket connection.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we
    // await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let connection_id = Uuid::new_v4();
    state.clients().insert(
        connection_id,
        ClientConnection {
            id: connection_id,
            tx: outbound_tx.clone(),
        },
    );
    info!(id = %connection_id, "client connected");

    send_to(&state, connection_id, &ServerMessage::Welcome { connection_id });

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                dispatch(&state, connection_id, text.as_str()).await;
            }
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                info!(id = %connection_id, "client closed");
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) => {}
            Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(id = %connection_id, error = %err, "websocket error");
                break;
            }
        }
    }

    state.clients().remove(&connection_id);
    room_service::handle_disconnect(&state, connection_id).await;
    info!(id = %connection_id, "client disconnected");

    finalize(writer_task, outbound_tx).await;
}

/// Parse one inbound frame and route it to the matching coordinator
/// operation. Operation errors go back to the offending socket only.
async fn dispatch(state: &SharedState, connection_id: Uuid, raw: &str) {
    let message = match ClientMessage::from_json_str(raw) {
        Ok(message) => message,
        Err(err) => {
            warn!(id = %connection_id, error = %err, "failed to parse or validate client message");
            send_error(state, connection_id, &err.to_string());
            return;
        }
    };

    let result = match message {
        ClientMessage::CreateRoom { playlist_id } => {
            room_service::create_room(state, connection_id, playlist_id).await
        }
        ClientMessage::JoinRoom { code, name } => {
            room_service::join_room(state, connection_id, &code, name).await
        }
        ClientMessage::RejoinRoom {
            code,
            name,
            was_host,
        } => room_service::rejoin_room(state, connection_id, &code, &name, was_host).await,
        ClientMessage::StartGame {
            code,
            song_count,
            games_count,
        } => room_service::start_game(state, connection_id, &code, song_count, games_count).await,
        ClientMessage::PlaybackStarted { code } => {
            orchestrator::playback_started(state, &code).await
        }
        ClientMessage::SubmitAnswer {
            code,
            answer,
            client_timestamp,
            client_response_time_ms,
        } => {
            room_service::submit_answer(
                state,
                connection_id,
                &code,
                answer,
                client_timestamp,
                client_response_time_ms,
            )
            .await
        }
        ClientMessage::CorrectAnswerDisplayed { code } => {
            room_service::acknowledge_reveal(state, connection_id, &code).await
        }
        ClientMessage::ReadyForNext { code } => {
            room_service::acknowledge_ready(state, connection_id, &code).await
        }
        ClientMessage::NextQuestion { code } => {
            orchestrator::force_advance(state, connection_id, &code).await
        }
        ClientMessage::StartNextGame { code } => {
            room_service::start_next_game(state, connection_id, &code).await
        }
        ClientMessage::EndGame { code } => {
            room_service::end_game(state, connection_id, &code).await
        }
    };

    if let Err(err) = result {
        info!(id = %connection_id, error = %err, "client operation rejected");
        send_error(state, connection_id, &err.to_string());
    }
}

/// Push a message to a single connection. Unknown targets (already gone) are
/// silently skipped.
pub fn send_to(state: &SharedState, target: Uuid, message: &ServerMessage) {
    let Some(connection) = state.clients().get(&target) else {
        return;
    };
    let tx = connection.tx.clone();
    drop(connection);

    send_message_to_websocket(&tx, message);
}

/// Push a message to every listed connection, serializing once. Targets whose
/// socket is gone are skipped; delivery is best-effort by design.
pub fn broadcast(state: &SharedState, targets: &[Uuid], message: &ServerMessage) {
    let payload = match serde_json::to_string(message) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "failed to serialize broadcast payload");
            return;
        }
    };

    for target in targets {
        if let Some(connection) = state.clients().get(target) {
            let _ = connection.tx.send(Message::Text(payload.clone().into()));
        }
    }
}

fn send_error(state: &SharedState, target: Uuid, message: &str) {
    send_to(
        state,
        target,
        &ServerMessage::Error {
            message: message.to_string(),
        },
    );
}

/// Serialize a payload and push it onto the provided WebSocket sender.
/// Serialization failure is a bug in the payload type; it is logged and the
/// frame dropped rather than tearing the connection down.
fn send_message_to_websocket(tx: &mpsc::UnboundedSender<Message>, value: &ServerMessage) {
    match serde_json::to_string(value) {
        Ok(payload) => {
            let _ = tx.send(Message::Text(payload.into()));
        }
        Err(err) => {
            warn!(error = %err, "failed to serialize message `{value:?}`");
        }
    }
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
