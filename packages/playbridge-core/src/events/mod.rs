//! Event system for surfacing playback state to UI layers.
//!
//! This module provides:
//! - [`EventEmitter`] trait for domain services to emit events
//! - [`BroadcastEventBridge`] for subscribers (UI surfaces, the player binary)
//! - Event types for session lifecycle, playback state and advisories
//!
//! UI surfaces subscribe here instead of re-deriving device status themselves.

mod bridge;
mod emitter;

pub use bridge::BroadcastEventBridge;
pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;

use crate::types::{PlaybackState, SessionState};

/// Events broadcast to subscribers.
///
/// This enum categorizes all events that can be sent to connected
/// subscribers. Each category has its own inner event type.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum BroadcastEvent {
    /// Remote device session lifecycle.
    Session(SessionEvent),

    /// Playback state changes from either backend.
    Playback(PlaybackEvent),

    /// User-facing notices (reconnecting, fallback, credential problems).
    Advisory(AdvisoryEvent),
}

/// Events related to the remote device session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    /// The session state machine moved between states.
    StateChanged {
        from: SessionState,
        to: SessionState,
        /// The registered device, if any.
        #[serde(rename = "deviceId", skip_serializing_if = "Option::is_none")]
        device_id: Option<String>,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

/// Events related to playback state.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PlaybackEvent {
    /// The playback state was replaced or updated.
    StateChanged {
        state: PlaybackState,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// Playback state was cleared (logout or end of queue).
    Cleared {
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

/// Kinds of advisory notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AdvisoryKind {
    /// Transient device loss; reconnect in progress.
    Reconnecting,
    /// The device came back after a loss.
    Recovered,
    /// Recovery exhausted; preview mode for the rest of the session (persistent).
    PermanentFallback,
    /// The credential was rejected and must be refreshed.
    CredentialStale,
    /// The backend is rate limiting us.
    RateLimited,
    /// Remote unavailable for this play; a preview clip is playing instead.
    PreviewOnly,
    /// A single play attempt failed (no preview, autoplay blocked, output error).
    PlaybackFailed,
}

impl AdvisoryKind {
    /// Returns true if the UI should keep the notice until the session resets.
    #[must_use]
    pub fn is_persistent(self) -> bool {
        matches!(self, AdvisoryKind::PermanentFallback)
    }
}

/// A user-facing notice.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvisoryEvent {
    pub kind: AdvisoryKind,
    pub message: String,
    pub persistent: bool,
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
}

impl AdvisoryEvent {
    /// Creates an advisory stamped with the current time.
    pub fn new(kind: AdvisoryKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            persistent: kind.is_persistent(),
            timestamp: crate::utils::now_millis(),
        }
    }
}

// From implementations for converting inner events to BroadcastEvent
impl From<SessionEvent> for BroadcastEvent {
    fn from(event: SessionEvent) -> Self {
        BroadcastEvent::Session(event)
    }
}

impl From<PlaybackEvent> for BroadcastEvent {
    fn from(event: PlaybackEvent) -> Self {
        BroadcastEvent::Playback(event)
    }
}

impl From<AdvisoryEvent> for BroadcastEvent {
    fn from(event: AdvisoryEvent) -> Self {
        BroadcastEvent::Advisory(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_permanent_fallback_is_persistent() {
        assert!(AdvisoryEvent::new(AdvisoryKind::PermanentFallback, "x").persistent);
        assert!(!AdvisoryEvent::new(AdvisoryKind::Reconnecting, "x").persistent);
    }

    #[test]
    fn session_event_serializes_with_category() {
        let event: BroadcastEvent = SessionEvent::StateChanged {
            from: SessionState::Ready,
            to: SessionState::Active,
            device_id: Some("dev-1".into()),
            timestamp: 42,
        }
        .into();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["category"], "session");
        assert_eq!(json["type"], "stateChanged");
        assert_eq!(json["to"], "active");
        assert_eq!(json["deviceId"], "dev-1");
    }
}
