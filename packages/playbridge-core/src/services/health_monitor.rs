//! Periodic health supervision of the remote session.
//!
//! Two decoupled checks run on their own intervals:
//! - a fast liveness poll of the device's playback state
//! - a slow enumeration check that detects silent eviction
//!
//! Enumeration is rate-limited far more aggressively by the backend, so it
//! never runs on the fast interval. Neither check surfaces errors to callers;
//! they only move the session and emit advisories.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::runtime::TaskSpawner;
use crate::services::session_machine::{HealthVerdict, SessionStateMachine};
use crate::state::Config;

/// Background supervisor for the remote session.
pub struct HealthMonitor {
    session: Arc<SessionStateMachine>,
    poll_interval: Duration,
    scan_interval: Duration,
    cancel: CancellationToken,
}

impl HealthMonitor {
    /// Creates a new monitor.
    ///
    /// Note: Call `start()` to spawn the background task.
    pub fn new(
        session: Arc<SessionStateMachine>,
        config: &Config,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session,
            poll_interval: config.health_poll_interval(),
            scan_interval: config.device_scan_interval(),
            cancel,
        }
    }

    /// Spawns the monitoring loop.
    pub fn start(self: &Arc<Self>, spawner: &impl TaskSpawner) {
        let monitor = Arc::clone(self);
        spawner.spawn(async move { monitor.run().await });
    }

    async fn run(&self) {
        log::info!(
            "[HealthMonitor] Monitor started (poll {:?}, scan {:?})",
            self.poll_interval,
            self.scan_interval
        );

        // Neither check fires immediately; the first play drives the session.
        let mut poll = tokio::time::interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut scan = tokio::time::interval_at(Instant::now() + self.scan_interval, self.scan_interval);
        scan.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    log::info!("[HealthMonitor] Shutting down");
                    break;
                }
                _ = poll.tick() => {
                    self.tick_liveness().await;
                }
                _ = scan.tick() => {
                    self.tick_enumeration().await;
                }
            }
        }
    }

    /// Runs one liveness check, reconnecting if the session was lost.
    pub async fn tick_liveness(&self) -> HealthVerdict {
        let verdict = self.session.check_liveness(self.poll_interval).await;
        if verdict == HealthVerdict::Lost {
            self.recover().await;
        }
        verdict
    }

    /// Runs one enumeration check, reconnecting if the device was evicted.
    pub async fn tick_enumeration(&self) -> HealthVerdict {
        let verdict = self.session.check_enumeration().await;
        if verdict == HealthVerdict::Lost {
            self.recover().await;
        }
        verdict
    }

    async fn recover(&self) {
        match self.session.reconnect().await {
            Ok(()) => log::info!("[HealthMonitor] Session state after recovery: {:?}", self.session.state()),
            Err(e) => log::warn!("[HealthMonitor] Recovery failed: {}", e),
        }
    }
}
