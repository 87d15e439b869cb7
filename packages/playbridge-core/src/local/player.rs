use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::error::{PlaybackError, PlaybackResult};
use crate::local::output::{AudioOutput, OutputError, OutputEvent};
use crate::services::PlaybackStateStore;
use crate::types::{PlaybackSource, Track};

/// What the caller should do after an output event was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalSignal {
    /// Nothing beyond the state update.
    None,
    /// The preview finished; the queue may advance.
    Ended,
    /// The output failed mid-clip.
    Failed(String),
}

/// Plays preview clips when the remote device is unavailable.
///
/// Owns a single [`AudioOutput`]. Starting a new clip always stops the previous
/// one first, so at most one clip is loaded at a time.
pub struct LocalFallbackPlayer {
    output: Arc<dyn AudioOutput>,
    store: Arc<PlaybackStateStore>,
    current: Mutex<Option<Track>>,
}

impl LocalFallbackPlayer {
    pub fn new(output: Arc<dyn AudioOutput>, store: Arc<PlaybackStateStore>) -> Self {
        Self {
            output,
            store,
            current: Mutex::new(None),
        }
    }

    /// Plays the preview clip of `track`.
    ///
    /// Fails with [`PlaybackError::NoPreviewAvailable`] when the track has no
    /// preview, and [`PlaybackError::AutoplayBlocked`] when the platform
    /// requires a user gesture first.
    pub async fn play(&self, track: &Track) -> PlaybackResult<()> {
        let uri = track
            .preview()
            .ok_or_else(|| PlaybackError::NoPreviewAvailable(track.id.clone()))?;

        self.stop();
        self.output.start(uri).await.map_err(map_output_error)?;
        *self.current.lock() = Some(track.clone());

        let clip_ms = self
            .output
            .clip_length_ms()
            .map_or(track.duration_ms, |len| len.min(track.duration_ms));
        self.store.begin(track, PlaybackSource::Local, clip_ms);
        log::info!("[LocalPlayer] Playing preview of '{}' by {}", track.title, track.artist);
        Ok(())
    }

    pub fn pause(&self) {
        self.output.pause();
        self.store.set_playing(PlaybackSource::Local, false);
    }

    pub fn resume(&self) -> PlaybackResult<()> {
        self.output.resume().map_err(map_output_error)?;
        self.store.set_playing(PlaybackSource::Local, true);
        Ok(())
    }

    pub fn seek(&self, position_ms: u64) {
        self.output.seek(position_ms);
        self.store.set_position(PlaybackSource::Local, position_ms);
    }

    /// Stops and unloads the current clip.
    pub fn stop(&self) {
        if self.current.lock().take().is_some() {
            log::debug!("[LocalPlayer] Stopping preview");
        }
        self.output.stop();
        self.store.set_playing(PlaybackSource::Local, false);
    }

    pub fn is_sounding(&self) -> bool {
        self.output.is_sounding()
    }

    pub fn current_track(&self) -> Option<Track> {
        self.current.lock().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutputEvent> {
        self.output.subscribe()
    }

    /// Applies an output event to the playback state.
    pub fn handle_event(&self, event: OutputEvent) -> LocalSignal {
        if self.current.lock().is_none() {
            return LocalSignal::None;
        }
        match event {
            OutputEvent::TimeUpdate { position_ms } => {
                self.store.set_position(PlaybackSource::Local, position_ms);
                LocalSignal::None
            }
            OutputEvent::Ended => {
                self.store.set_playing(PlaybackSource::Local, false);
                LocalSignal::Ended
            }
            OutputEvent::Error(message) => {
                log::warn!("[LocalPlayer] Output error: {}", message);
                self.store.set_playing(PlaybackSource::Local, false);
                LocalSignal::Failed(message)
            }
        }
    }
}

fn map_output_error(err: OutputError) -> PlaybackError {
    match err {
        OutputError::AutoplayBlocked(msg) => PlaybackError::AutoplayBlocked(msg),
        other => PlaybackError::Unknown(other.to_string()),
    }
}
