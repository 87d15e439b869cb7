//! JSON-file playlist catalog.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use playbridge_core::{CatalogService, PlaybackError, PlaybackResult, PlaylistSummary, Track};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct CatalogFile {
    playlists: Vec<PlaylistEntry>,
}

#[derive(Debug, Deserialize)]
struct PlaylistEntry {
    id: String,
    name: String,
    #[serde(default)]
    tracks: Vec<Track>,
}

/// Catalog read once from a JSON file of the form
/// `{ "playlists": [{ "id", "name", "tracks": [Track, ...] }] }`.
pub struct JsonFileCatalog {
    playlists: Vec<PlaylistEntry>,
}

impl JsonFileCatalog {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog: {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("Failed to parse catalog: {}", path.display()))
    }

    fn from_json(content: &str) -> Result<Self> {
        let file: CatalogFile = serde_json::from_str(content)?;
        Ok(Self {
            playlists: file.playlists,
        })
    }

    /// Id of the first playlist, used when none is given on the command line.
    pub fn first_playlist_id(&self) -> Option<&str> {
        self.playlists.first().map(|p| p.id.as_str())
    }
}

#[async_trait]
impl CatalogService for JsonFileCatalog {
    async fn list_playlists(&self) -> PlaybackResult<Vec<PlaylistSummary>> {
        Ok(self
            .playlists
            .iter()
            .map(|p| PlaylistSummary {
                id: p.id.clone(),
                name: p.name.clone(),
                track_count: p.tracks.len(),
            })
            .collect())
    }

    async fn playlist_tracks(&self, playlist_id: &str) -> PlaybackResult<Vec<Track>> {
        self.playlists
            .iter()
            .find(|p| p.id == playlist_id)
            .map(|p| p.tracks.clone())
            .ok_or_else(|| PlaybackError::Unknown(format!("unknown playlist: {}", playlist_id)))
    }
}
