//! Shared application state: the room registry and the live-connection
//! registry.

pub mod phase;
pub mod room;
pub mod scoring;

use std::sync::Arc;

use axum::extract::ws::Message;
use dashmap::DashMap;
use rand::Rng;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::ServiceError;
use crate::provider::CatalogProvider;
use crate::state::room::Room;

/// Cheaply cloneable handle on the application state.
pub type SharedState = Arc<AppState>;

/// Handle used to push messages to a connected client socket.
#[derive(Clone)]
pub struct ClientConnection {
    /// Connection identity; doubles as the participant identity inside rooms.
    pub id: Uuid,
    /// Writer-task channel of the socket.
    pub tx: mpsc::UnboundedSender<Message>,
}

/// Central application state owning every live room and socket handle.
///
/// The registry is the sole place rooms are created or destroyed; everything
/// inside a room goes through that room's own mutex.
pub struct AppState {
    config: AppConfig,
    provider: Arc<dyn CatalogProvider>,
    rooms: DashMap<String, Arc<Room>>,
    clients: DashMap<Uuid, ClientConnection>,
}

impl AppState {
    /// Construct the shared state wrapped in an [`Arc`] so it clones cheaply.
    pub fn new(config: AppConfig, provider: Arc<dyn CatalogProvider>) -> SharedState {
        Arc::new(Self {
            config,
            provider,
            rooms: DashMap::new(),
            clients: DashMap::new(),
        })
    }

    /// Immutable runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Handle on the catalog provider.
    pub fn provider(&self) -> Arc<dyn CatalogProvider> {
        self.provider.clone()
    }

    /// Registry of active client sockets keyed by connection identity.
    pub fn clients(&self) -> &DashMap<Uuid, ClientConnection> {
        &self.clients
    }

    /// Registry of active rooms keyed by session code.
    pub fn rooms(&self) -> &DashMap<String, Arc<Room>> {
        &self.rooms
    }

    /// Look up a room by code.
    pub fn room(&self, code: &str) -> Result<Arc<Room>, ServiceError> {
        self.rooms
            .get(code)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ServiceError::RoomNotFound(code.to_string()))
    }

    /// Create a room under a fresh code and register it.
    pub fn create_room(&self, host: Uuid, catalog_list_id: String) -> Arc<Room> {
        let code = self.generate_room_code();
        let room = Arc::new(Room::new(code.clone(), host, catalog_list_id));
        self.rooms.insert(code, room.clone());
        room
    }

    /// Remove a room from the registry. The registry and the host's explicit
    /// end-game action are the only teardown paths.
    pub fn remove_room(&self, code: &str) {
        self.rooms.remove(code);
    }

    /// Generate a 4-digit code unique among active rooms.
    fn generate_room_code(&self) -> String {
        let mut rng = rand::rng();
        loop {
            let code = format!("{:04}", rng.random_range(0..10_000));
            if !self.rooms.contains_key(&code) {
                return code;
            }
        }
    }
}
