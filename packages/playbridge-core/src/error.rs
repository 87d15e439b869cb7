//! Centralized error types for the playback core.
//!
//! This module provides a unified error handling system that:
//! - Defines the playback error taxonomy using `thiserror`
//! - Converts transport-level [`RemoteError`]s into that taxonomy
//! - Classifies errors for the recovery policy (device loss vs. credential loss)

use serde::Serialize;
use thiserror::Error;

use crate::remote::RemoteError;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code for event payloads and logs.
    fn code(&self) -> &'static str;
}

/// Application-wide playback error.
///
/// Every operation of the playback façade resolves to one of these variants.
/// The enum is `Clone` so a single in-flight result can be shared between
/// coalesced callers.
#[derive(Debug, Clone, Error, Serialize, PartialEq, Eq)]
#[serde(tag = "type", content = "details")]
pub enum PlaybackError {
    /// The registered remote device is not (or no longer) enumerated.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// The remote device exists but is not accepting commands for us.
    #[error("Device inactive: {0}")]
    DeviceInactive(String),

    /// Credential is stale or the account lacks the required tier.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The backend rejected the call due to rate limiting.
    #[error("Rate limited{}", retry_after_suffix(.retry_after_secs))]
    RateLimited {
        /// Seconds the backend asked us to wait, if it said.
        retry_after_secs: Option<u64>,
    },

    /// The track has no preview clip for local playback.
    #[error("No preview available for track {0}")]
    NoPreviewAvailable(String),

    /// The local audio output refused to start without a user gesture.
    #[error("Autoplay blocked: {0}")]
    AutoplayBlocked(String),

    /// Anything else, including blocking "nothing can play this" failures.
    #[error("Playback failed: {0}")]
    Unknown(String),
}

fn retry_after_suffix(retry_after_secs: &Option<u64>) -> String {
    retry_after_secs
        .map(|secs| format!(" (retry after {}s)", secs))
        .unwrap_or_default()
}

impl PlaybackError {
    /// Returns true for errors the session state machine recovers from by
    /// reconnecting (the device vanished or stopped listening).
    #[must_use]
    pub fn is_device_loss(&self) -> bool {
        matches!(self, Self::DeviceNotFound(_) | Self::DeviceInactive(_))
    }

    /// Returns true when the credential provider must refresh before retrying.
    #[must_use]
    pub fn is_credential_stale(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

impl ErrorCode for PlaybackError {
    fn code(&self) -> &'static str {
        match self {
            Self::DeviceNotFound(_) => "device_not_found",
            Self::DeviceInactive(_) => "device_inactive",
            Self::Unauthorized(_) => "unauthorized",
            Self::RateLimited { .. } => "rate_limited",
            Self::NoPreviewAvailable(_) => "no_preview_available",
            Self::AutoplayBlocked(_) => "autoplay_blocked",
            Self::Unknown(_) => "unknown",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Result Type Aliases
// ─────────────────────────────────────────────────────────────────────────────

// Re-export Result type alias from its defining module
pub use crate::remote::RemoteResult;

/// Convenient Result alias for playback operations.
pub type PlaybackResult<T> = Result<T, PlaybackError>;

impl From<RemoteError> for PlaybackError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::DeviceNotFound(msg) => Self::DeviceNotFound(msg),
            RemoteError::DeviceInactive(msg) => Self::DeviceInactive(msg),
            RemoteError::Unauthorized(msg) => Self::Unauthorized(msg),
            RemoteError::RateLimited(retry_after_secs) => Self::RateLimited { retry_after_secs },
            other => Self::Unknown(other.to_string()),
        }
    }
}
