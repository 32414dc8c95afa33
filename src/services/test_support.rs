//! Shared fixtures for service-level tests: an in-memory catalog, fake
//! client sockets, and message-drain helpers.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::Message;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::provider::{CatalogTrack, file_catalog::FileCatalog};
use crate::state::{AppState, ClientConnection, SharedState};

/// Application state backed by a `test-list` catalog of `track_count` tracks.
pub(crate) fn test_state_with_tracks(track_count: usize) -> SharedState {
    let tracks: Vec<CatalogTrack> = (1..=track_count)
        .map(|n| CatalogTrack {
            title: format!("Track {n}"),
            artist: format!("Artist {n}"),
            playable_ref: format!("https://example.com/{n}"),
        })
        .collect();
    let catalog = FileCatalog::from_lists(HashMap::from([("test-list".to_string(), tracks)]));
    AppState::new(AppConfig::default(), Arc::new(catalog))
}

/// Register a fake client socket and hand back its identity and receiver.
pub(crate) fn attach_client(state: &SharedState) -> (Uuid, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let id = Uuid::new_v4();
    state.clients().insert(id, ClientConnection { id, tx });
    (id, rx)
}

/// Drain every pending frame as parsed JSON.
pub(crate) fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Value> {
    let mut values = Vec::new();
    while let Ok(message) = rx.try_recv() {
        if let Message::Text(text) = message {
            if let Ok(value) = serde_json::from_str(text.as_str()) {
                values.push(value);
            }
        }
    }
    values
}

/// Drain every pending frame and keep only its `type` tag.
pub(crate) fn drain_types(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<String> {
    drain(rx)
        .into_iter()
        .filter_map(|value| value["type"].as_str().map(str::to_string))
        .collect()
}
