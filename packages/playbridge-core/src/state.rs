//! Core configuration types.
//!
//! [`Config`] holds every tunable the session manager reads. The binary
//! builds one from YAML/env/CLI and hands it to
//! [`bootstrap_player`](crate::bootstrap::bootstrap_player).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol_constants::{
    DEFAULT_DEVICE_NAME, DEFAULT_PREVIEW_LENGTH_MS, DEVICE_DISCOVERY_ATTEMPTS,
    DEVICE_SCAN_INTERVAL_SECS, EVENT_CHANNEL_CAPACITY, HEALTH_POLL_INTERVAL_MS,
    MAX_RECONNECT_ATTEMPTS, MIN_DEVICE_SCAN_INTERVAL_SECS, PREVIEW_TICK_MS,
    REQUEST_TIMEOUT_SECS, TRANSFER_SETTLE_DELAY,
};

/// Configuration for the playback core.
///
/// All fields have sensible defaults.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    // Remote backend
    /// Base URL of the playback control plane (no trailing slash).
    pub api_base_url: String,

    /// Name this application's device registers under.
    pub device_name: String,

    /// Timeout for control-plane requests (seconds).
    pub request_timeout_secs: u64,

    // Health monitoring
    /// Interval between liveness polls (milliseconds).
    pub health_poll_interval_ms: u64,

    /// Interval between device enumeration checks (seconds, >= 45).
    pub device_scan_interval_secs: u64,

    // Recovery
    /// Pause after each transfer before treating the device as active (ms).
    pub transfer_settle_delay_ms: u64,

    /// Consecutive reconnect cycles before permanent fallback.
    pub max_reconnect_attempts: u32,

    /// Enumeration polls while waiting for a connected device to appear.
    pub device_discovery_attempts: u32,

    // Local preview
    /// Assumed preview clip length when the output cannot report one (ms).
    pub preview_length_ms: u64,

    /// Interval between local `TimeUpdate` events (ms).
    pub preview_tick_ms: u64,

    /// Play previews on the virtual clock instead of the sound device.
    pub headless_audio: bool,

    // Events
    /// Capacity of the event broadcast channel.
    pub event_channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.example-music.invalid/v1".to_string(),
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            request_timeout_secs: REQUEST_TIMEOUT_SECS,
            health_poll_interval_ms: HEALTH_POLL_INTERVAL_MS,
            device_scan_interval_secs: DEVICE_SCAN_INTERVAL_SECS,
            transfer_settle_delay_ms: TRANSFER_SETTLE_DELAY.as_millis() as u64,
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
            device_discovery_attempts: DEVICE_DISCOVERY_ATTEMPTS,
            preview_length_ms: DEFAULT_PREVIEW_LENGTH_MS,
            preview_tick_ms: PREVIEW_TICK_MS,
            headless_audio: false,
            event_channel_capacity: EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl Config {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.device_name.trim().is_empty() {
            return Err("device_name must not be empty".to_string());
        }
        if self.health_poll_interval_ms == 0 {
            return Err("health_poll_interval_ms must be >= 1".to_string());
        }
        if self.device_scan_interval_secs < MIN_DEVICE_SCAN_INTERVAL_SECS {
            return Err(format!(
                "device_scan_interval_secs must be >= {} (enumeration is rate-limited)",
                MIN_DEVICE_SCAN_INTERVAL_SECS
            ));
        }
        if self.max_reconnect_attempts == 0 {
            return Err("max_reconnect_attempts must be >= 1".to_string());
        }
        if self.device_discovery_attempts == 0 {
            return Err("device_discovery_attempts must be >= 1".to_string());
        }
        if self.preview_tick_ms == 0 {
            return Err("preview_tick_ms must be >= 1 (interval panics on 0)".to_string());
        }
        if self.event_channel_capacity == 0 {
            return Err(
                "event_channel_capacity must be >= 1 (broadcast::channel panics on 0)".to_string(),
            );
        }
        Ok(())
    }

    /// Interval between liveness polls.
    pub fn health_poll_interval(&self) -> Duration {
        Duration::from_millis(self.health_poll_interval_ms)
    }

    /// Interval between device enumeration checks.
    pub fn device_scan_interval(&self) -> Duration {
        Duration::from_secs(self.device_scan_interval_secs)
    }

    /// Pause inserted after every transfer.
    pub fn transfer_settle_delay(&self) -> Duration {
        Duration::from_millis(self.transfer_settle_delay_ms)
    }

    /// Control-plane request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
