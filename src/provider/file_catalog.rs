//! File-backed catalog provider for local play.
//!
//! Serves catalog lists from a JSON file and draws decoy artists from the
//! pool of every other artist in the catalog, so wrong options stay
//! stylistically coherent with the material being played.

use std::collections::HashMap;
use std::path::Path;
use std::{fs, io::ErrorKind};

use futures::future::BoxFuture;
use rand::seq::SliceRandom;
use serde::Deserialize;
use tracing::{info, warn};

use crate::provider::{CatalogProvider, CatalogTrack, ProviderError, ProviderResult};

/// In-memory catalog loaded once at startup.
pub struct FileCatalog {
    lists: HashMap<String, Vec<CatalogTrack>>,
    artist_pool: Vec<String>,
}

/// JSON shape of the catalog file: list id to its tracks.
#[derive(Debug, Deserialize)]
struct RawCatalog {
    lists: HashMap<String, Vec<RawTrack>>,
}

#[derive(Debug, Deserialize)]
struct RawTrack {
    title: String,
    artist: String,
    url: String,
}

impl FileCatalog {
    /// Load the catalog from disk. A missing or unreadable file yields an
    /// empty catalog so the server still starts; games then fail with a
    /// provider error until a catalog is supplied.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<RawCatalog>(&contents) {
                Ok(raw) => {
                    let catalog = Self::from_lists(
                        raw.lists
                            .into_iter()
                            .map(|(id, tracks)| {
                                let tracks = tracks
                                    .into_iter()
                                    .map(|t| CatalogTrack {
                                        title: t.title,
                                        artist: t.artist,
                                        playable_ref: t.url,
                                    })
                                    .collect();
                                (id, tracks)
                            })
                            .collect(),
                    );
                    info!(
                        path = %path.display(),
                        lists = catalog.lists.len(),
                        artists = catalog.artist_pool.len(),
                        "loaded catalog"
                    );
                    catalog
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to parse catalog; starting empty");
                    Self::from_lists(HashMap::new())
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(path = %path.display(), "catalog file not found; starting empty");
                Self::from_lists(HashMap::new())
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to read catalog; starting empty");
                Self::from_lists(HashMap::new())
            }
        }
    }

    /// Build a catalog from already-parsed lists. Used by tests and by
    /// [`FileCatalog::load`].
    pub fn from_lists(lists: HashMap<String, Vec<CatalogTrack>>) -> Self {
        let mut artist_pool: Vec<String> = Vec::new();
        for track in lists.values().flatten() {
            if !artist_pool
                .iter()
                .any(|known| normalize(known) == normalize(&track.artist))
            {
                artist_pool.push(track.artist.clone());
            }
        }
        Self { lists, artist_pool }
    }
}

impl CatalogProvider for FileCatalog {
    fn playlist_tracks(&self, list_id: &str) -> BoxFuture<'static, ProviderResult<Vec<CatalogTrack>>> {
        let result = match self.lists.get(list_id) {
            Some(tracks) if tracks.is_empty() => Err(ProviderError::EmptyList(list_id.to_string())),
            Some(tracks) => Ok(tracks.clone()),
            None => Err(ProviderError::UnknownList(list_id.to_string())),
        };
        Box::pin(std::future::ready(result))
    }

    fn decoy_artists(
        &self,
        correct_artist: &str,
        exclude: Vec<String>,
        count: usize,
    ) -> BoxFuture<'static, ProviderResult<Vec<String>>> {
        let correct = normalize(correct_artist);
        let banned: Vec<String> = exclude.iter().map(|name| normalize(name)).collect();

        let mut candidates: Vec<String> = self
            .artist_pool
            .iter()
            .filter(|name| {
                let norm = normalize(name);
                norm != correct && !banned.contains(&norm)
            })
            .cloned()
            .collect();
        candidates.shuffle(&mut rand::rng());
        candidates.truncate(count);

        Box::pin(std::future::ready(Ok(candidates)))
    }
}

/// Collapse whitespace and case so near-identical artist names dedupe.
fn normalize(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> FileCatalog {
        let tracks = vec![
            CatalogTrack {
                title: "Song 2".into(),
                artist: "Blur".into(),
                playable_ref: "https://example.com/1".into(),
            },
            CatalogTrack {
                title: "Wonderwall".into(),
                artist: "Oasis".into(),
                playable_ref: "https://example.com/2".into(),
            },
            CatalogTrack {
                title: "Common People".into(),
                artist: "Pulp".into(),
                playable_ref: "https://example.com/3".into(),
            },
            CatalogTrack {
                title: "Disco 2000".into(),
                artist: "pulp".into(),
                playable_ref: "https://example.com/4".into(),
            },
        ];
        FileCatalog::from_lists(HashMap::from([("britpop".to_string(), tracks)]))
    }

    #[tokio::test]
    async fn unknown_list_is_an_error() {
        let err = catalog().playlist_tracks("nope").await.unwrap_err();
        assert!(matches!(err, ProviderError::UnknownList(_)));
    }

    #[tokio::test]
    async fn tracks_come_back_in_catalog_order() {
        let tracks = catalog().playlist_tracks("britpop").await.unwrap();
        assert_eq!(tracks.len(), 4);
        assert_eq!(tracks[0].title, "Song 2");
    }

    #[tokio::test]
    async fn decoys_exclude_the_correct_artist_and_dedupe() {
        let decoys = catalog().decoy_artists("Pulp", Vec::new(), 3).await.unwrap();
        assert_eq!(decoys.len(), 2, "pool holds Blur and Oasis only");
        assert!(!decoys.iter().any(|d| d.eq_ignore_ascii_case("pulp")));
    }

    #[tokio::test]
    async fn exclusions_are_honored() {
        let decoys = catalog()
            .decoy_artists("Blur", vec!["Oasis".into()], 3)
            .await
            .unwrap();
        assert_eq!(decoys, vec!["Pulp".to_string()]);
    }
}
