//! Domain types shared by every playback component.

use serde::{Deserialize, Serialize};

use crate::utils::now_millis;

// ─────────────────────────────────────────────────────────────────────────────
// Credentials
// ─────────────────────────────────────────────────────────────────────────────

/// Bearer token plus its absolute expiry.
///
/// Owned by the credential provider; the core only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    /// Opaque bearer token value.
    pub value: String,
    /// Absolute expiry as a Unix timestamp in milliseconds.
    pub expires_at: u64,
}

impl Credential {
    /// Creates a credential valid until `expires_at` (Unix millis).
    pub fn new(value: impl Into<String>, expires_at: u64) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    /// Returns true if the credential expired at or before `now_ms`.
    #[must_use]
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        self.expires_at <= now_ms
    }

    /// Returns true if the credential has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Devices
// ─────────────────────────────────────────────────────────────────────────────

/// Where a device produces sound relative to this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// The device registered by this application.
    Local,
    /// Any other endpoint on the account (speaker, phone, desktop app).
    Remote,
}

/// A playback endpoint as enumerated by the backend.
///
/// Ephemeral: a device may disappear server-side without notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub kind: DeviceKind,
    /// Whether the backend currently routes playback to this device.
    pub active: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tracks
// ─────────────────────────────────────────────────────────────────────────────

/// Heuristic tags attached by a [`Classifier`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TrackTags {
    pub genre: Option<String>,
    pub language: Option<String>,
    /// Perceived energy, 0.0 (calm) to 1.0 (intense).
    pub energy: Option<f32>,
    /// Estimated tempo in beats per minute.
    pub tempo: Option<f32>,
}

/// A catalog track. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: String,
    /// URI the remote device plays (e.g. `service:track:<id>`).
    pub uri: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub duration_ms: u64,
    /// Short preview clip for local playback. Absence is expected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_uri: Option<String>,
    /// Tags attached by the classifier, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<TrackTags>,
}

impl Track {
    /// Returns a copy of this track carrying the classifier's tags.
    #[must_use]
    pub fn with_tags(mut self, classifier: &dyn Classifier) -> Self {
        self.tags = Some(classifier.classify(&self));
        self
    }

    /// Preview clip the local fallback player can load. Empty URIs count as absent.
    #[must_use]
    pub fn preview(&self) -> Option<&str> {
        self.preview_uri.as_deref().filter(|uri| !uri.is_empty())
    }
}

/// Pure track classifier (genre, language, energy, tempo).
///
/// Implementations live outside the core; tracks reaching the queue simply
/// carry whatever tags were attached.
pub trait Classifier: Send + Sync {
    fn classify(&self, track: &Track) -> TrackTags;
}

// ─────────────────────────────────────────────────────────────────────────────
// Playback State
// ─────────────────────────────────────────────────────────────────────────────

/// Which backend produced the current [`PlaybackState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackSource {
    Remote,
    Local,
}

/// Snapshot of what is playing. Read-only outside the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    pub track_id: String,
    pub position_ms: u64,
    pub duration_ms: u64,
    pub is_playing: bool,
    pub source: PlaybackSource,
}

/// Playback progress reported by the façade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub position_ms: u64,
    pub duration_ms: u64,
    pub is_playing: bool,
    pub source: PlaybackSource,
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle of the remote device registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No registered device.
    #[default]
    Disconnected,
    /// Connect handshake in flight.
    Connecting,
    /// Device registered and enumerated, not yet carrying our audio.
    Ready,
    /// Device is the target of the current playback context.
    Active,
    /// Device vanished or stopped responding; recovery pending.
    Lost,
    /// Re-running the connect/transfer cycle.
    Reconnecting,
}

impl SessionState {
    /// Returns true if `next` is a legal successor of `self`.
    ///
    /// `Lost` is reachable from every connected state because any remote call
    /// can report device loss. `Disconnected` is reachable from everywhere
    /// (logout, handshake failure, permanent failure).
    #[must_use]
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (_, Disconnected) => true,
            (Disconnected, Connecting) => true,
            (Connecting, Ready) | (Connecting, Lost) => true,
            (Ready, Active) | (Ready, Lost) => true,
            (Active, Lost) => true,
            (Lost, Reconnecting) => true,
            (Reconnecting, Ready) | (Reconnecting, Lost) => true,
            _ => false,
        }
    }

    /// Returns true while a device is registered and enumerated.
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, SessionState::Ready | SessionState::Active)
    }
}

/// The manager's view of "our" registered device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub device_id: Option<String>,
    pub state: SessionState,
    /// Unix millis of the last successful liveness check.
    pub last_healthy_at: Option<u64>,
    pub consecutive_failures: u32,
    /// Reconnect cycles run in the current loss episode.
    pub reconnect_attempts: u32,
    /// Set once recovery exhausts its budget; remote stays off until reset.
    pub demoted: bool,
}
