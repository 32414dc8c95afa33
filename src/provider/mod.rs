//! External catalog collaborators: track listing and decoy-artist generation.
//!
//! The coordinator treats these as opaque, possibly slow calls and never
//! invokes them while holding a room lock.

pub mod file_catalog;

use futures::future::BoxFuture;
use thiserror::Error;

/// One playable track handed to the coordinator by a provider.
#[derive(Debug, Clone)]
pub struct CatalogTrack {
    /// Display title of the track.
    pub title: String,
    /// The artist to guess.
    pub artist: String,
    /// Opaque playable reference (preview URL or player URI).
    pub playable_ref: String,
}

/// Errors produced by catalog providers.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The requested catalog list does not exist.
    #[error("catalog list `{0}` not found")]
    UnknownList(String),
    /// The requested catalog list exists but has no playable tracks.
    #[error("catalog list `{0}` has no playable tracks")]
    EmptyList(String),
    /// The provider could not be reached or answered garbage.
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

/// Result alias for provider calls.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Abstraction over the music catalog and decoy generation.
///
/// Implementations must be callable from any task; the returned futures may
/// take arbitrarily long and must not assume any room lock is held.
pub trait CatalogProvider: Send + Sync {
    /// Ordered tracks of the given catalog list.
    fn playlist_tracks(&self, list_id: &str) -> BoxFuture<'static, ProviderResult<Vec<CatalogTrack>>>;

    /// Up to `count` validated decoy artist names for a track: never the
    /// correct artist, never a name from `exclude`, no duplicates.
    fn decoy_artists(
        &self,
        correct_artist: &str,
        exclude: Vec<String>,
        count: usize,
    ) -> BoxFuture<'static, ProviderResult<Vec<String>>>;
}
