//! Manual queue tracking and next/previous resolution.
//!
//! When the application drives track changes itself (local previews, or remote
//! single-track plays), the navigator owns the ordered list and the current
//! index. When the device holds the context (a multi-track remote play), the
//! navigator only remembers the list and delegates skips to the device.

use parking_lot::Mutex;
use serde::Serialize;

use crate::types::Track;

/// Who advances through the current queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum QueueOrigin {
    /// The application plays each track explicitly.
    Manual,
    /// The remote device was handed the whole context and skips natively.
    Device,
}

/// An ordered track list with a cursor.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Queue {
    pub tracks: Vec<Track>,
    pub current_index: usize,
    pub origin: QueueOrigin,
}

/// Result of resolving a next/previous request.
#[derive(Debug, Clone, PartialEq)]
pub enum Navigation {
    /// Play this track explicitly.
    Track { index: usize, track: Track },
    /// The manual queue has no track in that direction. Do nothing.
    EndOfQueue,
    /// No manual context; let the remote device skip natively.
    Delegate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Previous,
}

/// Tracks the current queue and resolves skips against it.
#[derive(Debug, Default)]
pub struct QueueNavigator {
    queue: Mutex<Option<Queue>>,
}

impl QueueNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the queue wholesale.
    ///
    /// An empty list clears it. `start_index` is clamped to the last track.
    pub fn set_context(&self, tracks: Vec<Track>, start_index: usize, origin: QueueOrigin) {
        let mut queue = self.queue.lock();
        if tracks.is_empty() {
            *queue = None;
            return;
        }
        let current_index = start_index.min(tracks.len() - 1);
        log::debug!(
            "[Queue] New {:?} queue of {} tracks at index {}",
            origin,
            tracks.len(),
            current_index
        );
        *queue = Some(Queue {
            tracks,
            current_index,
            origin,
        });
    }

    /// Switches who advances through the existing queue.
    pub fn set_origin(&self, origin: QueueOrigin) {
        if let Some(queue) = self.queue.lock().as_mut() {
            queue.origin = origin;
        }
    }

    pub fn clear(&self) {
        *self.queue.lock() = None;
    }

    /// Moves the cursor to `track_id` if it is in the queue.
    ///
    /// Returns false (and leaves the queue untouched) otherwise.
    pub fn select(&self, track_id: &str) -> bool {
        let mut queue = self.queue.lock();
        match queue.as_mut() {
            Some(q) => match q.tracks.iter().position(|t| t.id == track_id) {
                Some(index) => {
                    q.current_index = index;
                    true
                }
                None => false,
            },
            None => false,
        }
    }

    /// Resolves where a skip in `direction` should go, without moving the cursor.
    pub fn resolve(&self, direction: Direction) -> Navigation {
        let queue = self.queue.lock();
        let Some(q) = queue.as_ref() else {
            return Navigation::Delegate;
        };
        if q.origin == QueueOrigin::Device || q.current_index >= q.tracks.len() {
            return Navigation::Delegate;
        }

        let target = match direction {
            Direction::Next => q.current_index.checked_add(1).filter(|i| *i < q.tracks.len()),
            Direction::Previous => q.current_index.checked_sub(1),
        };
        match target {
            Some(index) => Navigation::Track {
                index,
                track: q.tracks[index].clone(),
            },
            None => Navigation::EndOfQueue,
        }
    }

    /// Commits the cursor to `index`. Ignored if out of range.
    pub fn advance_to(&self, index: usize) {
        if let Some(q) = self.queue.lock().as_mut() {
            if index < q.tracks.len() {
                q.current_index = index;
            }
        }
    }

    /// Returns true if the application advances the queue itself.
    pub fn has_manual_context(&self) -> bool {
        self.queue
            .lock()
            .as_ref()
            .is_some_and(|q| q.origin == QueueOrigin::Manual)
    }

    pub fn current(&self) -> Option<Track> {
        self.queue
            .lock()
            .as_ref()
            .and_then(|q| q.tracks.get(q.current_index).cloned())
    }

    pub fn snapshot(&self) -> Option<Queue> {
        self.queue.lock().clone()
    }
}
