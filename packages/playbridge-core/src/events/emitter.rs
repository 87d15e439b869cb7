//! Event emitter abstraction for decoupling services from transport.
//!
//! Services depend on the [`EventEmitter`] trait rather than concrete broadcast
//! channels, enabling testing and alternative delivery mechanisms.

use super::{AdvisoryEvent, PlaybackEvent, SessionEvent};

/// Trait for emitting domain events without knowledge of transport.
///
/// # Example
///
/// ```ignore
/// struct MyService {
///     emitter: Arc<dyn EventEmitter>,
/// }
///
/// impl MyService {
///     fn warn_user(&self) {
///         self.emitter
///             .emit_advisory(AdvisoryEvent::new(AdvisoryKind::Reconnecting, "..."));
///     }
/// }
/// ```
pub trait EventEmitter: Send + Sync {
    /// Emits a session lifecycle event.
    fn emit_session(&self, event: SessionEvent);

    /// Emits a playback state event.
    fn emit_playback(&self, event: PlaybackEvent);

    /// Emits a user-facing advisory.
    fn emit_advisory(&self, event: AdvisoryEvent);
}

/// No-op emitter for embedding or testing.
///
/// Events are silently discarded.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_session(&self, _event: SessionEvent) {}

    fn emit_playback(&self, _event: PlaybackEvent) {}

    fn emit_advisory(&self, _event: AdvisoryEvent) {}
}

/// Logging emitter for debugging and development.
///
/// Logs all events at debug level.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_session(&self, event: SessionEvent) {
        tracing::debug!(?event, "session_event");
    }

    fn emit_playback(&self, event: PlaybackEvent) {
        tracing::debug!(?event, "playback_event");
    }

    fn emit_advisory(&self, event: AdvisoryEvent) {
        tracing::debug!(?event, "advisory_event");
    }
}
