//! Timing constants tuned against the remote playback backend.
//!
//! The defaults in [`Config`](crate::state::Config) are taken from here.
//! They were measured against real backend latency and are configurable,
//! but changing them changes how quickly a lost device is noticed and how
//! hard the backend gets polled.

use std::time::Duration;

// ─────────────────────────────────────────────────────────────────────────────
// Health Monitoring
// ─────────────────────────────────────────────────────────────────────────────

/// Interval between local liveness polls (`get_current_state`).
pub const HEALTH_POLL_INTERVAL_MS: u64 = 3_000;

/// Interval between device enumeration checks.
///
/// Enumeration is rate-limited far more aggressively than state polling,
/// so it runs on its own slow clock.
pub const DEVICE_SCAN_INTERVAL_SECS: u64 = 45;

/// Lower bound accepted for [`DEVICE_SCAN_INTERVAL_SECS`] overrides.
pub const MIN_DEVICE_SCAN_INTERVAL_SECS: u64 = 45;

// ─────────────────────────────────────────────────────────────────────────────
// Session Recovery
// ─────────────────────────────────────────────────────────────────────────────

/// Pause after every `transfer_playback` before treating the device as active.
///
/// The backend acknowledges a transfer before the device registration has
/// propagated to its playback routing. Commands sent inside this window are
/// rejected with device-not-found.
pub const TRANSFER_SETTLE_DELAY: Duration = Duration::from_millis(1_200);

/// Consecutive reconnect cycles attempted before permanent fallback.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 2;

/// Device enumeration polls after a successful connect handshake.
///
/// A freshly connected device can take a moment to appear in the device list.
pub const DEVICE_DISCOVERY_ATTEMPTS: u32 = 3;

// ─────────────────────────────────────────────────────────────────────────────
// HTTP
// ─────────────────────────────────────────────────────────────────────────────

/// Timeout for control-plane HTTP requests (seconds).
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

// ─────────────────────────────────────────────────────────────────────────────
// Local Preview
// ─────────────────────────────────────────────────────────────────────────────

/// Length of a preview clip when the output cannot determine it.
pub const DEFAULT_PREVIEW_LENGTH_MS: u64 = 30_000;

/// Interval between `TimeUpdate` events from the local output.
pub const PREVIEW_TICK_MS: u64 = 250;

/// Largest preview clip the device output will download.
pub const MAX_PREVIEW_BYTES: usize = 8 * 1024 * 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Application Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Default name the player registers its device under.
pub const DEFAULT_DEVICE_NAME: &str = "Playbridge Player";

/// Capacity of the event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 100;
