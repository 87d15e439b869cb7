//! Read-only catalog access.
//!
//! The core never browses the catalog itself; hosts fetch playlists through a
//! [`CatalogService`] and hand the resulting [`Track`]s to the façade.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PlaybackResult;
use crate::types::{Classifier, Track};

/// A playlist as listed by the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistSummary {
    pub id: String,
    pub name: String,
    pub track_count: usize,
}

/// Read-only playlist source.
#[async_trait]
pub trait CatalogService: Send + Sync {
    async fn list_playlists(&self) -> PlaybackResult<Vec<PlaylistSummary>>;

    /// Returns the tracks of `playlist_id` in playlist order.
    async fn playlist_tracks(&self, playlist_id: &str) -> PlaybackResult<Vec<Track>>;
}

/// Fetches a playlist and tags every track with `classifier`.
pub async fn classified_tracks(
    catalog: &dyn CatalogService,
    classifier: &dyn Classifier,
    playlist_id: &str,
) -> PlaybackResult<Vec<Track>> {
    let tracks = catalog.playlist_tracks(playlist_id).await?;
    Ok(tracks.into_iter().map(|t| t.with_tags(classifier)).collect())
}
