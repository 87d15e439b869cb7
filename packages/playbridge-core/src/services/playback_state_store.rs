//! Shared playback state with source-guarded writers.
//!
//! The store holds the single [`PlaybackState`] the UI reads. Writers name the
//! backend they speak for; updates from a backend that is not currently
//! authoritative are ignored, so a late remote poll cannot overwrite a local
//! preview (and vice versa).

use parking_lot::RwLock;
use tokio::time::Instant;

use crate::events::{EventEmitter, PlaybackEvent};
use crate::types::{PlaybackSource, PlaybackState, Progress, Track};
use crate::utils::now_millis;

use std::sync::Arc;

#[derive(Debug, Clone)]
struct Entry {
    state: PlaybackState,
    /// When `state.position_ms` was last known exactly.
    updated_at: Instant,
}

/// Holder of the current [`PlaybackState`].
pub struct PlaybackStateStore {
    inner: RwLock<Option<Entry>>,
    emitter: Arc<dyn EventEmitter>,
}

impl PlaybackStateStore {
    pub fn new(emitter: Arc<dyn EventEmitter>) -> Self {
        Self {
            inner: RwLock::new(None),
            emitter,
        }
    }

    /// Returns a copy of the current state.
    pub fn snapshot(&self) -> Option<PlaybackState> {
        self.inner.read().as_ref().map(|e| e.state.clone())
    }

    /// Returns the backend that produced the current state.
    pub fn source(&self) -> Option<PlaybackSource> {
        self.inner.read().as_ref().map(|e| e.state.source)
    }

    /// Returns true if `source` is authoritative and playing.
    pub fn is_playing_on(&self, source: PlaybackSource) -> bool {
        self.inner
            .read()
            .as_ref()
            .is_some_and(|e| e.state.source == source && e.state.is_playing)
    }

    /// Replaces the state with a freshly started track.
    ///
    /// This is the only write that may switch the source.
    pub fn begin(&self, track: &Track, source: PlaybackSource, duration_ms: u64) {
        let state = PlaybackState {
            track_id: track.id.clone(),
            position_ms: 0,
            duration_ms,
            is_playing: true,
            source,
        };
        *self.inner.write() = Some(Entry {
            state: state.clone(),
            updated_at: Instant::now(),
        });
        self.emit(state);
    }

    /// Applies a state polled from the remote device.
    ///
    /// Ignored while local preview is authoritative.
    pub fn apply_remote(&self, remote: PlaybackState) {
        let changed = {
            let mut inner = self.inner.write();
            match inner.as_ref() {
                Some(entry) if entry.state.source == PlaybackSource::Local => None,
                _ => {
                    let state = PlaybackState {
                        source: PlaybackSource::Remote,
                        ..remote
                    };
                    *inner = Some(Entry {
                        state: state.clone(),
                        updated_at: Instant::now(),
                    });
                    Some(state)
                }
            }
        };
        if let Some(state) = changed {
            self.emit(state);
        }
    }

    /// Sets the playhead of the authoritative `source`.
    pub fn set_position(&self, source: PlaybackSource, position_ms: u64) {
        self.update(source, |state| {
            state.position_ms = if state.duration_ms > 0 {
                position_ms.min(state.duration_ms)
            } else {
                position_ms
            };
        });
    }

    /// Sets the playing flag of the authoritative `source`.
    pub fn set_playing(&self, source: PlaybackSource, playing: bool) {
        self.update(source, |state| state.is_playing = playing);
    }

    /// Clears the state entirely (logout).
    pub fn clear(&self) {
        let had_state = self.inner.write().take().is_some();
        if had_state {
            self.emitter.emit_playback(PlaybackEvent::Cleared {
                timestamp: now_millis(),
            });
        }
    }

    /// Returns current progress, interpolating remote playback between polls.
    pub fn progress(&self) -> Option<Progress> {
        let inner = self.inner.read();
        let entry = inner.as_ref()?;
        let state = &entry.state;

        let mut position_ms = state.position_ms;
        if state.is_playing && state.source == PlaybackSource::Remote {
            position_ms += entry.updated_at.elapsed().as_millis() as u64;
        }
        if state.duration_ms > 0 {
            position_ms = position_ms.min(state.duration_ms);
        }

        Some(Progress {
            position_ms,
            duration_ms: state.duration_ms,
            is_playing: state.is_playing,
            source: state.source,
        })
    }

    fn update(&self, source: PlaybackSource, apply: impl FnOnce(&mut PlaybackState)) {
        let changed = {
            let mut inner = self.inner.write();
            match inner.as_mut() {
                Some(entry) if entry.state.source == source => {
                    // Freeze interpolated progress before changing anything.
                    if entry.state.is_playing && source == PlaybackSource::Remote {
                        entry.state.position_ms +=
                            entry.updated_at.elapsed().as_millis() as u64;
                    }
                    apply(&mut entry.state);
                    entry.updated_at = Instant::now();
                    Some(entry.state.clone())
                }
                _ => None,
            }
        };
        if let Some(state) = changed {
            self.emit(state);
        }
    }

    fn emit(&self, state: PlaybackState) {
        self.emitter.emit_playback(PlaybackEvent::StateChanged {
            state,
            timestamp: now_millis(),
        });
    }
}
