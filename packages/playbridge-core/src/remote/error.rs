//! Errors returned by the remote control plane.

use reqwest::StatusCode;
use thiserror::Error;

/// Errors that can occur while talking to the remote playback backend.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// HTTP request to the backend failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend returned a non-success status we have no specific mapping for.
    #[error("HTTP error {0}: {1}")]
    HttpStatus(u16, String),

    /// The target device is unknown to the backend (expired or evicted).
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// The device exists but is not the active playback target.
    #[error("Device inactive: {0}")]
    DeviceInactive(String),

    /// Credential rejected or account tier insufficient.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Backend is rate limiting; carries `Retry-After` seconds if sent.
    #[error("Rate limited")]
    RateLimited(Option<u64>),

    /// Response body did not match the expected shape.
    #[error("Failed to parse response: {0}")]
    Parse(String),
}

/// Convenient Result alias for remote operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Backend reason string for "no device is currently active".
const NO_ACTIVE_DEVICE_REASON: &str = "NO_ACTIVE_DEVICE";

impl RemoteError {
    /// Maps an unsuccessful HTTP status to a typed error.
    ///
    /// # Arguments
    /// * `status` - The response status code
    /// * `retry_after` - Parsed `Retry-After` header, if present
    /// * `body` - Response body (used for diagnostics and reason detection)
    pub fn from_status(status: StatusCode, retry_after: Option<u64>, body: String) -> Self {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::Unauthorized(body),
            StatusCode::NOT_FOUND if body.contains(NO_ACTIVE_DEVICE_REASON) => {
                Self::DeviceInactive(body)
            }
            StatusCode::NOT_FOUND => Self::DeviceNotFound(body),
            StatusCode::TOO_MANY_REQUESTS => Self::RateLimited(retry_after),
            other => Self::HttpStatus(other.as_u16(), body),
        }
    }
}
