//! Trait abstractions for remote device operations.
//!
//! These traits enable dependency injection for testability and modularity.
//! The session state machine depends on traits rather than the HTTP client.

use async_trait::async_trait;

use crate::remote::RemoteResult;
use crate::types::{Device, PlaybackState};

/// Trait for device registration and liveness operations.
///
/// Used by the session state machine during connect/reconnect and by the
/// health monitor.
#[async_trait]
pub trait RemoteDiscovery: Send + Sync {
    /// Runs the connect handshake for this application's device.
    ///
    /// Returns `false` if the backend refused the registration without a
    /// typed error.
    async fn connect(&self) -> RemoteResult<bool>;

    /// Enumerates the devices currently known to the backend.
    async fn list_devices(&self) -> RemoteResult<Vec<Device>>;

    /// Polls the playback state as seen by this application's device.
    ///
    /// Returns `None` when this device is not the one carrying playback.
    async fn get_current_state(&self) -> RemoteResult<Option<PlaybackState>>;
}

/// Trait for playback control operations on a specific device.
#[async_trait]
pub trait RemotePlayback: Send + Sync {
    /// Makes `device_id` the backend's active playback target.
    async fn transfer_playback(&self, device_id: &str) -> RemoteResult<()>;

    /// Starts playing `uris` on `device_id`, beginning at `offset`.
    ///
    /// # Arguments
    /// * `device_id` - Target device
    /// * `uris` - Track URIs forming the device-side context
    /// * `offset` - Index into `uris` to start from
    async fn play_uris(&self, device_id: &str, uris: &[String], offset: usize)
        -> RemoteResult<()>;

    /// Pauses playback on `device_id`.
    async fn pause(&self, device_id: &str) -> RemoteResult<()>;

    /// Resumes playback on `device_id` without changing the context.
    async fn resume(&self, device_id: &str) -> RemoteResult<()>;

    /// Seeks the current track on `device_id` to `position_ms`.
    async fn seek(&self, device_id: &str, position_ms: u64) -> RemoteResult<()>;

    /// Native skip forward within the device's own queue.
    async fn next(&self, device_id: &str) -> RemoteResult<()>;

    /// Native skip backward within the device's own queue.
    async fn previous(&self, device_id: &str) -> RemoteResult<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Combined Traits (for trait objects)
// ─────────────────────────────────────────────────────────────────────────────

/// Combined trait for all remote device operations.
///
/// Used by the session state machine and health monitor as a single trait object.
#[async_trait]
pub trait RemoteDeviceClient: RemoteDiscovery + RemotePlayback {}

/// Blanket implementation for any type implementing both traits.
impl<T: RemoteDiscovery + RemotePlayback> RemoteDeviceClient for T {}
