//! Remote device session lifecycle.
//!
//! The [`SessionStateMachine`] owns the device registration and every
//! transition between [`SessionState`]s. All transitions are applied under one
//! lock together with a generation counter: each play request (and each
//! health-triggered reconnect) takes a new generation, and results that come
//! back for an older generation are discarded instead of being applied.
//!
//! Lock discipline: the lock is never held across an `.await`, and events are
//! emitted only after it has been released.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{PlaybackError, PlaybackResult};
use crate::events::{AdvisoryEvent, AdvisoryKind, EventEmitter, SessionEvent};
use crate::remote::{RemoteDeviceClient, RemoteError};
use crate::services::PlaybackStateStore;
use crate::state::Config;
use crate::types::{PlaybackSource, Session, SessionState, Track};
use crate::utils::now_millis;

/// A request to start remote playback.
#[derive(Debug, Clone)]
pub struct PlayRequest {
    /// The track that will be sounding once the request lands.
    pub track: Track,
    /// The device-side context.
    pub uris: Vec<String>,
    /// Index into `uris` to start from.
    pub offset: usize,
}

impl PlayRequest {
    /// A single-track play.
    pub fn single(track: Track) -> Self {
        Self {
            uris: vec![track.uri.clone()],
            track,
            offset: 0,
        }
    }

    /// A multi-track play handed to the device as its own context.
    ///
    /// Returns `None` if `offset` is out of range.
    pub fn context(tracks: &[Track], offset: usize) -> Option<Self> {
        let track = tracks.get(offset)?.clone();
        Some(Self {
            track,
            uris: tracks.iter().map(|t| t.uri.clone()).collect(),
            offset,
        })
    }
}

/// How a play request ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PlayOutcome {
    /// The device accepted the play.
    Started,
    /// A newer request took over before this one completed.
    Superseded,
}

/// Transport commands for an already-playing remote device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteCommand {
    Pause,
    Resume,
    Seek(u64),
    Next,
    Previous,
}

/// Result of a single health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthVerdict {
    /// The device answered and is carrying playback.
    Healthy,
    /// Ready but not carrying playback, which is expected before the first play.
    Idle,
    /// The check failed but the session was not declared lost.
    Degraded,
    /// The session was moved to `Lost`; the caller should reconnect.
    Lost,
    /// Nothing to check (not connected, or a play owns the session right now).
    Skipped,
}

/// Internal failure type for session steps.
///
/// `Superseded` is not an error: a newer request owns the session now and
/// this one must stop without touching state.
#[derive(Debug)]
enum SessionFailure {
    Superseded,
    Failed(PlaybackError),
}

impl From<PlaybackError> for SessionFailure {
    fn from(err: PlaybackError) -> Self {
        Self::Failed(err)
    }
}

impl From<RemoteError> for SessionFailure {
    fn from(err: RemoteError) -> Self {
        Self::Failed(err.into())
    }
}

type Step<T> = Result<T, SessionFailure>;

#[derive(Debug, Default)]
struct Inner {
    session: Session,
    generation: u64,
}

/// Decrements the in-flight play counter on drop.
struct PlayGuard<'a>(&'a AtomicUsize);

impl<'a> PlayGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for PlayGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Owns the remote device session.
pub struct SessionStateMachine {
    client: Arc<dyn RemoteDeviceClient>,
    store: Arc<PlaybackStateStore>,
    emitter: Arc<dyn EventEmitter>,
    device_name: String,
    settle_delay: Duration,
    max_reconnect_attempts: u32,
    device_discovery_attempts: u32,
    inner: Mutex<Inner>,
    plays_in_flight: AtomicUsize,
}

impl SessionStateMachine {
    pub fn new(
        client: Arc<dyn RemoteDeviceClient>,
        store: Arc<PlaybackStateStore>,
        emitter: Arc<dyn EventEmitter>,
        config: &Config,
    ) -> Self {
        Self {
            client,
            store,
            emitter,
            device_name: config.device_name.clone(),
            settle_delay: config.transfer_settle_delay(),
            max_reconnect_attempts: config.max_reconnect_attempts,
            device_discovery_attempts: config.device_discovery_attempts.max(1),
            inner: Mutex::new(Inner::default()),
            plays_in_flight: AtomicUsize::new(0),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> Session {
        self.inner.lock().session.clone()
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().session.state
    }

    /// Returns true once recovery was exhausted for this session.
    pub fn is_demoted(&self) -> bool {
        self.inner.lock().session.demoted
    }

    /// Returns true while a play request owns the session.
    pub fn is_busy(&self) -> bool {
        self.plays_in_flight.load(Ordering::SeqCst) > 0
    }

    /// Returns the device id if the session is `Active`.
    pub fn active_device(&self) -> Option<String> {
        let inner = self.inner.lock();
        match inner.session.state {
            SessionState::Active => inner.session.device_id.clone(),
            _ => None,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Play
    // ─────────────────────────────────────────────────────────────────────────

    /// Drives the session to `Active` and starts `request` on the device.
    ///
    /// The most recent request wins: an older request that completes after a
    /// newer one started reports [`PlayOutcome::Superseded`] and changes
    /// nothing. On device loss one reconnect pass is made and the play is
    /// retried once.
    pub async fn request_play(&self, request: PlayRequest) -> PlaybackResult<PlayOutcome> {
        let _guard = PlayGuard::new(&self.plays_in_flight);
        let generation = self.begin_cycle()?;
        log::info!(
            "[Session] Play request #{} for '{}' ({} uris, offset {})",
            generation,
            request.track.title,
            request.uris.len(),
            request.offset
        );

        match self.play_with_recovery(&request, generation).await {
            Ok(()) => Ok(PlayOutcome::Started),
            Err(SessionFailure::Superseded) => {
                log::debug!("[Session] Play request #{} superseded", generation);
                Ok(PlayOutcome::Superseded)
            }
            Err(SessionFailure::Failed(e)) => {
                log::warn!("[Session] Play request #{} failed: {}", generation, e);
                self.advise_failure(&e);
                Err(e)
            }
        }
    }

    async fn play_with_recovery(&self, request: &PlayRequest, generation: u64) -> Step<()> {
        match self.attempt_play(request, generation).await {
            Err(SessionFailure::Failed(e)) if e.is_device_loss() => {
                log::warn!("[Session] Device lost during play: {}", e);
                self.mark_lost(generation)?;
                self.recover(generation).await?;

                match self.attempt_play(request, generation).await {
                    Err(SessionFailure::Failed(e)) if e.is_device_loss() => {
                        self.mark_lost(generation)?;
                        Err(self.abandon(generation, e))
                    }
                    other => other,
                }
            }
            other => other,
        }
    }

    async fn attempt_play(&self, request: &PlayRequest, generation: u64) -> Step<()> {
        let device_id = self.ensure_active(generation).await?;
        self.client
            .play_uris(&device_id, &request.uris, request.offset)
            .await?;

        {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                return Err(SessionFailure::Superseded);
            }
            mark_healthy(&mut inner.session);
        }
        self.store
            .begin(&request.track, PlaybackSource::Remote, request.track.duration_ms);
        Ok(())
    }

    /// Brings the session to `Active` and returns the device id.
    async fn ensure_active(&self, generation: u64) -> Step<String> {
        loop {
            let (state, device_id) = {
                let inner = self.inner.lock();
                (inner.session.state, inner.session.device_id.clone())
            };

            match (state, device_id) {
                (SessionState::Active, Some(device_id)) => return Ok(device_id),
                (SessionState::Ready, Some(device_id)) => {
                    return self.activate(generation, &device_id).await;
                }
                (SessionState::Lost | SessionState::Reconnecting, _) => {
                    return self.recover(generation).await;
                }
                (SessionState::Disconnected | SessionState::Connecting, _) => {
                    self.transition(generation, SessionState::Connecting, "connect")?;
                    if let Err(failure) = self.register(generation).await {
                        if let SessionFailure::Failed(ref e) = failure {
                            // Device loss goes through Lost so the caller's
                            // recovery pass applies; anything else ends the attempt.
                            let to = if e.is_device_loss() {
                                SessionState::Lost
                            } else {
                                SessionState::Disconnected
                            };
                            self.transition(generation, to, "connect failed")?;
                        }
                        return Err(failure);
                    }
                }
                (state, None) => {
                    log::warn!("[Session] {:?} without a device id, resetting", state);
                    self.transition(generation, SessionState::Disconnected, "missing device")?;
                }
            }
        }
    }

    /// Runs the connect handshake and locates our device. Ends in `Ready`.
    async fn register(&self, generation: u64) -> Step<String> {
        let accepted = self.client.connect().await?;
        self.ensure_current(generation)?;
        if !accepted {
            return Err(PlaybackError::DeviceInactive(
                "connect handshake was refused".to_string(),
            )
            .into());
        }

        let device_id = self.locate_device(generation).await?;
        {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                return Err(SessionFailure::Superseded);
            }
            inner.session.device_id = Some(device_id.clone());
        }
        self.transition(generation, SessionState::Ready, "device registered")?;
        Ok(device_id)
    }

    /// Finds our device by name, allowing for registration lag.
    async fn locate_device(&self, generation: u64) -> Step<String> {
        for attempt in 1..=self.device_discovery_attempts {
            let devices = self.client.list_devices().await?;
            self.ensure_current(generation)?;

            if let Some(device) = devices.into_iter().find(|d| d.name == self.device_name) {
                log::debug!("[Session] Found device '{}' ({})", device.name, device.id);
                return Ok(device.id);
            }
            if attempt < self.device_discovery_attempts {
                log::debug!(
                    "[Session] Device '{}' not listed yet (attempt {}/{})",
                    self.device_name,
                    attempt,
                    self.device_discovery_attempts
                );
                tokio::time::sleep(self.settle_delay).await;
                self.ensure_current(generation)?;
            }
        }
        Err(PlaybackError::DeviceNotFound(format!(
            "device '{}' was not listed after connecting",
            self.device_name
        ))
        .into())
    }

    /// Transfers playback to `device_id` and waits for it to settle. Ends in `Active`.
    async fn activate(&self, generation: u64, device_id: &str) -> Step<String> {
        self.client.transfer_playback(device_id).await?;
        // The backend acks the transfer before routing knows about it.
        tokio::time::sleep(self.settle_delay).await;
        self.transition(generation, SessionState::Active, "playback transferred")?;
        Ok(device_id.to_string())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Recovery
    // ─────────────────────────────────────────────────────────────────────────

    /// Public reconnect path used by the health monitor.
    ///
    /// Takes a new generation, so any recovery already running is superseded.
    pub async fn reconnect(&self) -> PlaybackResult<()> {
        let generation = self.begin_cycle()?;
        match self.recover(generation).await {
            Ok(_) | Err(SessionFailure::Superseded) => Ok(()),
            Err(SessionFailure::Failed(e)) => {
                self.advise_failure(&e);
                Err(e)
            }
        }
    }

    /// Runs bounded reconnect cycles from `Lost` until `Active`.
    ///
    /// The budget counts consecutive cycles and is only refilled by a healthy
    /// signal (a successful play or poll). Exhausting it demotes the session.
    async fn recover(&self, generation: u64) -> Step<String> {
        loop {
            let attempt = {
                let mut inner = self.inner.lock();
                if inner.generation != generation {
                    return Err(SessionFailure::Superseded);
                }
                if inner.session.reconnect_attempts >= self.max_reconnect_attempts {
                    None
                } else {
                    inner.session.reconnect_attempts += 1;
                    Some(inner.session.reconnect_attempts)
                }
            };
            let Some(attempt) = attempt else {
                return Err(self.give_up(generation));
            };

            log::info!(
                "[Session] Reconnect attempt {}/{}",
                attempt,
                self.max_reconnect_attempts
            );
            self.emitter.emit_advisory(AdvisoryEvent::new(
                AdvisoryKind::Reconnecting,
                format!(
                    "Connection to the playback device was lost. Reconnecting ({}/{})",
                    attempt, self.max_reconnect_attempts
                ),
            ));

            match self.reconnect_cycle(generation).await {
                Ok(device_id) => {
                    log::info!("[Session] Reconnected to {}", device_id);
                    self.emitter.emit_advisory(AdvisoryEvent::new(
                        AdvisoryKind::Recovered,
                        "Playback device reconnected",
                    ));
                    return Ok(device_id);
                }
                Err(SessionFailure::Superseded) => return Err(SessionFailure::Superseded),
                Err(SessionFailure::Failed(e)) if !e.is_device_loss() => {
                    // Credential and rate-limit failures are not retried here.
                    self.transition(generation, SessionState::Disconnected, "reconnect aborted")?;
                    return Err(e.into());
                }
                Err(SessionFailure::Failed(e)) => {
                    log::warn!("[Session] Reconnect attempt {} failed: {}", attempt, e);
                    self.transition(generation, SessionState::Lost, "reconnect failed")?;
                    if attempt < self.max_reconnect_attempts {
                        tokio::time::sleep(self.settle_delay).await;
                        self.ensure_current(generation)?;
                    }
                }
            }
        }
    }

    async fn reconnect_cycle(&self, generation: u64) -> Step<String> {
        self.transition(generation, SessionState::Reconnecting, "reconnect")?;
        let device_id = self.register(generation).await?;
        self.activate(generation, &device_id).await
    }

    /// Ends a play whose post-recovery retry also lost the device.
    fn abandon(&self, generation: u64, err: PlaybackError) -> SessionFailure {
        let exhausted = {
            let inner = self.inner.lock();
            if inner.generation != generation {
                return SessionFailure::Superseded;
            }
            inner.session.reconnect_attempts >= self.max_reconnect_attempts
        };
        if exhausted {
            return self.give_up(generation);
        }
        if let Err(failure) = self.transition(generation, SessionState::Disconnected, "retry failed")
        {
            return failure;
        }
        SessionFailure::Failed(err)
    }

    /// Demotes the session permanently to local fallback.
    fn give_up(&self, generation: u64) -> SessionFailure {
        let event = {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                return SessionFailure::Superseded;
            }
            let from = inner.session.state;
            inner.session.demoted = true;
            inner.session.device_id = None;
            inner.session.reconnect_attempts = 0;
            inner.session.state = SessionState::Disconnected;
            (from != SessionState::Disconnected).then(|| SessionEvent::StateChanged {
                from,
                to: SessionState::Disconnected,
                device_id: None,
                timestamp: now_millis(),
            })
        };

        log::warn!(
            "[Session] Giving up after {} reconnect attempts; remote playback disabled",
            self.max_reconnect_attempts
        );
        if let Some(event) = event {
            self.emitter.emit_session(event);
        }
        self.store.set_playing(PlaybackSource::Remote, false);
        self.emitter.emit_advisory(AdvisoryEvent::new(
            AdvisoryKind::PermanentFallback,
            "The playback device could not be reached. Previews will play locally for the rest of this session",
        ));

        SessionFailure::Failed(PlaybackError::DeviceNotFound(format!(
            "device unreachable after {} reconnect attempts",
            self.max_reconnect_attempts
        )))
    }

    fn mark_lost(&self, generation: u64) -> Step<()> {
        {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                return Err(SessionFailure::Superseded);
            }
            inner.session.consecutive_failures += 1;
        }
        self.transition(generation, SessionState::Lost, "device lost")
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transport Controls
    // ─────────────────────────────────────────────────────────────────────────

    /// Sends `command` to the active device.
    ///
    /// On device loss one recovery pass is made and the command retried once.
    pub async fn control(&self, command: RemoteCommand) -> PlaybackResult<()> {
        let device_id = self.active_device().ok_or_else(|| {
            PlaybackError::DeviceInactive("no active remote session".to_string())
        })?;

        let result = match self.send_command(&device_id, command).await {
            Err(e) if e.is_device_loss() => {
                log::warn!("[Session] Device lost during {:?}: {}", command, e);
                self.recover_for_command(command).await
            }
            other => other,
        };

        match result {
            Ok(()) => {
                self.apply_command(command);
                Ok(())
            }
            Err(e) => {
                self.advise_failure(&e);
                Err(e)
            }
        }
    }

    /// Pauses the active device without any recovery.
    ///
    /// Used when local playback is about to take over; failures are logged
    /// and otherwise ignored.
    pub async fn silence(&self) {
        let Some(device_id) = self.active_device() else {
            return;
        };
        match self.client.pause(&device_id).await {
            Ok(()) => self.store.set_playing(PlaybackSource::Remote, false),
            Err(e) => log::debug!("[Session] Could not pause device before handover: {}", e),
        }
    }

    async fn recover_for_command(&self, command: RemoteCommand) -> PlaybackResult<()> {
        let generation = self.begin_cycle()?;
        let recovered = match self.mark_lost(generation) {
            Ok(()) => self.recover(generation).await,
            Err(failure) => Err(failure),
        };
        match recovered {
            Ok(device_id) => self.send_command(&device_id, command).await,
            Err(SessionFailure::Superseded) => Ok(()),
            Err(SessionFailure::Failed(e)) => Err(e),
        }
    }

    async fn send_command(&self, device_id: &str, command: RemoteCommand) -> PlaybackResult<()> {
        let result = match command {
            RemoteCommand::Pause => self.client.pause(device_id).await,
            RemoteCommand::Resume => self.client.resume(device_id).await,
            RemoteCommand::Seek(position_ms) => self.client.seek(device_id, position_ms).await,
            RemoteCommand::Next => self.client.next(device_id).await,
            RemoteCommand::Previous => self.client.previous(device_id).await,
        };
        result.map_err(PlaybackError::from)
    }

    fn apply_command(&self, command: RemoteCommand) {
        match command {
            RemoteCommand::Pause => self.store.set_playing(PlaybackSource::Remote, false),
            RemoteCommand::Resume => self.store.set_playing(PlaybackSource::Remote, true),
            RemoteCommand::Seek(position_ms) => {
                self.store.set_position(PlaybackSource::Remote, position_ms)
            }
            // The next poll reports the new track.
            RemoteCommand::Next | RemoteCommand::Previous => {}
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Health Checks
    // ─────────────────────────────────────────────────────────────────────────

    /// Fast liveness check: polls the playback state.
    ///
    /// A poll that does not resolve within `timeout` counts as a failure. In
    /// `Active`, any failure (including an empty state) marks the session
    /// `Lost` immediately.
    ///
    /// In `Ready` an empty state is *not* a failure: it returns
    /// [`HealthVerdict::Idle`] and leaves `consecutive_failures` untouched,
    /// since a device we have not transferred to has no playback to report.
    /// Loss in `Ready` is detected by two consecutive transport failures or
    /// timeouts, or by the enumeration check.
    pub async fn check_liveness(&self, timeout: Duration) -> HealthVerdict {
        let Some((generation, state)) = self.health_target() else {
            return HealthVerdict::Skipped;
        };

        let failure = match tokio::time::timeout(timeout, self.client.get_current_state()).await {
            Ok(Ok(Some(remote))) => {
                {
                    let mut inner = self.inner.lock();
                    if inner.generation != generation {
                        return HealthVerdict::Skipped;
                    }
                    mark_healthy(&mut inner.session);
                }
                self.store.apply_remote(remote);
                return HealthVerdict::Healthy;
            }
            Ok(Ok(None)) if state == SessionState::Ready => return HealthVerdict::Idle,
            Ok(Ok(None)) => "device stopped reporting playback".to_string(),
            Ok(Err(e)) => {
                let e = PlaybackError::from(e);
                if !e.is_device_loss() && !matches!(e, PlaybackError::Unknown(_)) {
                    self.advise_failure(&e);
                    return HealthVerdict::Degraded;
                }
                e.to_string()
            }
            Err(_) => format!("poll did not resolve within {:?}", timeout),
        };

        let lost = {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                return HealthVerdict::Skipped;
            }
            inner.session.consecutive_failures += 1;
            state == SessionState::Active || inner.session.consecutive_failures >= 2
        };
        log::warn!("[HealthMonitor] Liveness check failed in {:?}: {}", state, failure);

        if lost && self.transition(generation, SessionState::Lost, "liveness").is_ok() {
            HealthVerdict::Lost
        } else {
            HealthVerdict::Degraded
        }
    }

    /// Slow eviction check: confirms our device is still enumerated.
    pub async fn check_enumeration(&self) -> HealthVerdict {
        let Some((generation, _)) = self.health_target() else {
            return HealthVerdict::Skipped;
        };
        let device_id = self.inner.lock().session.device_id.clone();

        let devices = match self.client.list_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                let e = PlaybackError::from(e);
                log::debug!("[HealthMonitor] Device enumeration failed: {}", e);
                self.advise_failure(&e);
                return HealthVerdict::Degraded;
            }
        };

        if self.inner.lock().generation != generation {
            return HealthVerdict::Skipped;
        }
        let listed = device_id
            .as_ref()
            .is_some_and(|id| devices.iter().any(|d| &d.id == id));
        if listed {
            return HealthVerdict::Healthy;
        }

        log::warn!("[HealthMonitor] Device {:?} no longer enumerated", device_id);
        match self.transition(generation, SessionState::Lost, "evicted") {
            Ok(()) => HealthVerdict::Lost,
            Err(_) => HealthVerdict::Skipped,
        }
    }

    /// Returns the generation and state to check, or `None` to skip this tick.
    fn health_target(&self) -> Option<(u64, SessionState)> {
        if self.is_busy() {
            return None;
        }
        let inner = self.inner.lock();
        inner
            .session
            .state
            .is_connected()
            .then_some((inner.generation, inner.session.state))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reset
    // ─────────────────────────────────────────────────────────────────────────

    /// Drops the session entirely (logout). Any in-flight work is superseded.
    pub fn reset(&self) {
        let event = {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            let from = inner.session.state;
            inner.session = Session::default();
            (from != SessionState::Disconnected).then(|| SessionEvent::StateChanged {
                from,
                to: SessionState::Disconnected,
                device_id: None,
                timestamp: now_millis(),
            })
        };
        log::info!("[Session] Reset");
        if let Some(event) = event {
            self.emitter.emit_session(event);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────

    /// Takes a new generation, superseding everything in flight.
    fn begin_cycle(&self) -> PlaybackResult<u64> {
        let mut inner = self.inner.lock();
        if inner.session.demoted {
            return Err(PlaybackError::DeviceNotFound(
                "remote playback is disabled for this session".to_string(),
            ));
        }
        inner.generation += 1;
        Ok(inner.generation)
    }

    fn ensure_current(&self, generation: u64) -> Step<()> {
        if self.inner.lock().generation == generation {
            Ok(())
        } else {
            Err(SessionFailure::Superseded)
        }
    }

    /// Applies `to` if `generation` still owns the session.
    ///
    /// Same-state transitions are no-ops. Illegal transitions are logged and
    /// ignored.
    fn transition(&self, generation: u64, to: SessionState, reason: &str) -> Step<()> {
        let event = {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                return Err(SessionFailure::Superseded);
            }
            let from = inner.session.state;
            if from == to {
                return Ok(());
            }
            if !from.can_transition_to(to) {
                log::warn!("[Session] Ignoring illegal transition {:?} -> {:?}", from, to);
                return Ok(());
            }
            inner.session.state = to;
            if to == SessionState::Disconnected {
                inner.session.device_id = None;
            }
            SessionEvent::StateChanged {
                from,
                to,
                device_id: inner.session.device_id.clone(),
                timestamp: now_millis(),
            }
        };

        log::info!("[Session] {:?} -> {:?} ({})", event_from(&event), to, reason);
        self.emitter.emit_session(event);
        Ok(())
    }

    fn advise_failure(&self, err: &PlaybackError) {
        let advisory = match err {
            PlaybackError::Unauthorized(_) => AdvisoryEvent::new(
                AdvisoryKind::CredentialStale,
                "Your sign-in has expired. Sign in again to keep playing",
            ),
            PlaybackError::RateLimited { .. } => {
                AdvisoryEvent::new(AdvisoryKind::RateLimited, err.to_string())
            }
            _ => return,
        };
        self.emitter.emit_advisory(advisory);
    }
}

fn mark_healthy(session: &mut Session) {
    session.last_healthy_at = Some(now_millis());
    session.consecutive_failures = 0;
    session.reconnect_attempts = 0;
}

fn event_from(event: &SessionEvent) -> SessionState {
    match event {
        SessionEvent::StateChanged { from, .. } => *from,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{BroadcastEvent, BroadcastEventBridge};
    use crate::services::test_support::{track, MockRemote};
    use crate::types::PlaybackState;
    use tokio::sync::broadcast;

    fn config() -> Config {
        Config {
            device_name: "Playbridge Player".into(),
            ..Config::default()
        }
    }

    fn machine(remote: Arc<MockRemote>) -> (Arc<SessionStateMachine>, BroadcastEventBridge) {
        let bridge = BroadcastEventBridge::new(256);
        let emitter: Arc<dyn EventEmitter> = Arc::new(bridge.clone());
        let store = Arc::new(PlaybackStateStore::new(emitter.clone()));
        let machine = SessionStateMachine::new(remote, store, emitter, &config());
        (Arc::new(machine), bridge)
    }

    fn advisories(rx: &mut broadcast::Receiver<BroadcastEvent>) -> Vec<AdvisoryKind> {
        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let BroadcastEvent::Advisory(a) = event {
                kinds.push(a.kind);
            }
        }
        kinds
    }

    #[tokio::test(start_paused = true)]
    async fn first_play_connects_transfers_then_plays() {
        let remote = Arc::new(MockRemote::with_device());
        let (machine, _) = machine(remote.clone());

        let outcome = machine.request_play(PlayRequest::single(track("t1"))).await.unwrap();

        assert_eq!(outcome, PlayOutcome::Started);
        assert_eq!(machine.state(), SessionState::Active);
        assert_eq!(remote.calls(), vec!["connect", "list_devices", "transfer", "play"]);
        assert_eq!(remote.played_uris(), vec![vec!["service:track:t1".to_string()]]);
    }

    #[tokio::test(start_paused = true)]
    async fn active_session_plays_without_transfer() {
        let remote = Arc::new(MockRemote::with_device());
        let (machine, _) = machine(remote.clone());
        machine.request_play(PlayRequest::single(track("t1"))).await.unwrap();
        remote.clear_calls();

        machine.request_play(PlayRequest::single(track("t2"))).await.unwrap();

        assert_eq!(remote.calls(), vec!["play"]);
    }

    #[tokio::test(start_paused = true)]
    async fn device_listed_late_is_found_on_retry() {
        let remote = Arc::new(MockRemote::new());
        remote.list_device_after(2);
        let (machine, _) = machine(remote.clone());

        machine.request_play(PlayRequest::single(track("t1"))).await.unwrap();

        assert_eq!(machine.state(), SessionState::Active);
        assert_eq!(remote.count("list_devices"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn newer_play_supersedes_older_in_flight() {
        let remote = Arc::new(MockRemote::with_device());
        let (machine, _) = machine(remote.clone());
        machine.request_play(PlayRequest::single(track("warmup"))).await.unwrap();
        remote.set_play_delay(Duration::from_millis(500));

        let first = {
            let machine = machine.clone();
            tokio::spawn(async move { machine.request_play(PlayRequest::single(track("t1"))).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        remote.set_play_delay(Duration::ZERO);
        let second = machine.request_play(PlayRequest::single(track("t2"))).await.unwrap();
        let first = first.await.unwrap().unwrap();

        assert_eq!(second, PlayOutcome::Started);
        assert_eq!(first, PlayOutcome::Superseded);
        assert_eq!(machine.store.snapshot().unwrap().track_id, "t2");
    }

    #[tokio::test(start_paused = true)]
    async fn device_loss_during_play_recovers_and_retries_once() {
        let remote = Arc::new(MockRemote::with_device());
        let (machine, bridge) = machine(remote.clone());
        let mut rx = bridge.subscribe();
        machine.request_play(PlayRequest::single(track("t1"))).await.unwrap();
        remote.clear_calls();

        remote.fail_next_play(RemoteError::DeviceNotFound("evicted".into()));
        let outcome = machine.request_play(PlayRequest::single(track("t2"))).await.unwrap();

        assert_eq!(outcome, PlayOutcome::Started);
        assert_eq!(machine.state(), SessionState::Active);
        assert_eq!(
            remote.calls(),
            vec!["play", "connect", "list_devices", "transfer", "play"]
        );
        let kinds = advisories(&mut rx);
        assert!(kinds.contains(&AdvisoryKind::Reconnecting));
        assert!(kinds.contains(&AdvisoryKind::Recovered));
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_is_bounded_and_demotes_session() {
        let remote = Arc::new(MockRemote::with_device());
        let (machine, bridge) = machine(remote.clone());
        let mut rx = bridge.subscribe();
        machine.request_play(PlayRequest::single(track("t1"))).await.unwrap();
        remote.clear_calls();

        remote.fail_plays(RemoteError::DeviceNotFound("gone".into()));
        remote.remove_device();
        let err = machine
            .request_play(PlayRequest::single(track("t2")))
            .await
            .unwrap_err();

        assert!(err.is_device_loss());
        assert_eq!(remote.count("connect"), 2);
        let session = machine.snapshot();
        assert!(session.demoted);
        assert_eq!(session.state, SessionState::Disconnected);
        assert!(session.device_id.is_none());

        let kinds = advisories(&mut rx);
        assert_eq!(
            kinds.iter().filter(|k| **k == AdvisoryKind::PermanentFallback).count(),
            1
        );

        // Demoted sessions refuse further remote plays without touching the device.
        remote.clear_calls();
        assert!(machine.request_play(PlayRequest::single(track("t3"))).await.is_err());
        assert!(remote.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unauthorized_is_never_retried() {
        let remote = Arc::new(MockRemote::with_device());
        remote.fail_next_play(RemoteError::Unauthorized("expired".into()));
        let (machine, bridge) = machine(remote.clone());
        let mut rx = bridge.subscribe();

        let err = machine
            .request_play(PlayRequest::single(track("t1")))
            .await
            .unwrap_err();

        assert!(err.is_credential_stale());
        assert_eq!(remote.count("play"), 1);
        assert_eq!(remote.count("connect"), 1);
        assert!(!machine.is_demoted());
        assert!(advisories(&mut rx).contains(&AdvisoryKind::CredentialStale));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_poll_in_active_marks_lost() {
        let remote = Arc::new(MockRemote::with_device());
        let (machine, _) = machine(remote.clone());
        machine.request_play(PlayRequest::single(track("t1"))).await.unwrap();

        remote.set_current_state(None);
        let verdict = machine.check_liveness(Duration::from_secs(3)).await;

        assert_eq!(verdict, HealthVerdict::Lost);
        assert_eq!(machine.state(), SessionState::Lost);
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_poll_refreshes_store() {
        let remote = Arc::new(MockRemote::with_device());
        let (machine, _) = machine(remote.clone());
        machine.request_play(PlayRequest::single(track("t1"))).await.unwrap();

        remote.set_current_state(Some(PlaybackState {
            track_id: "t1".into(),
            position_ms: 42_000,
            duration_ms: 200_000,
            is_playing: true,
            source: PlaybackSource::Remote,
        }));
        let verdict = machine.check_liveness(Duration::from_secs(3)).await;

        assert_eq!(verdict, HealthVerdict::Healthy);
        assert_eq!(machine.store.snapshot().unwrap().position_ms, 42_000);
        assert!(machine.snapshot().last_healthy_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_play_is_advised_and_not_retried() {
        let remote = Arc::new(MockRemote::with_device());
        let (machine, bridge) = machine(remote.clone());
        let mut rx = bridge.subscribe();
        machine.request_play(PlayRequest::single(track("t1"))).await.unwrap();
        remote.clear_calls();
        advisories(&mut rx);

        remote.fail_next_play(RemoteError::RateLimited(Some(30)));
        let err = machine
            .request_play(PlayRequest::single(track("t2")))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            PlaybackError::RateLimited {
                retry_after_secs: Some(30)
            }
        );
        assert_eq!(remote.calls(), vec!["play"]);
        assert_eq!(machine.state(), SessionState::Active);
        assert!(!machine.is_demoted());
        assert_eq!(advisories(&mut rx), vec![AdvisoryKind::RateLimited]);
        assert_eq!(machine.store.snapshot().unwrap().track_id, "t1");
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_poll_is_degraded_not_lost() {
        let remote = Arc::new(MockRemote::with_device());
        let (machine, bridge) = machine(remote.clone());
        let mut rx = bridge.subscribe();
        machine.request_play(PlayRequest::single(track("t1"))).await.unwrap();
        advisories(&mut rx);

        remote.fail_next_poll(RemoteError::RateLimited(None));
        let verdict = machine.check_liveness(Duration::from_secs(3)).await;

        assert_eq!(verdict, HealthVerdict::Degraded);
        assert_eq!(machine.state(), SessionState::Active);
        assert_eq!(machine.snapshot().consecutive_failures, 0);
        assert_eq!(advisories(&mut rx), vec![AdvisoryKind::RateLimited]);
        assert_eq!(remote.count("poll"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_poll_counts_as_failure() {
        let remote = Arc::new(MockRemote::with_device());
        let (machine, _) = machine(remote.clone());
        machine.request_play(PlayRequest::single(track("t1"))).await.unwrap();

        remote.set_poll_delay(Duration::from_secs(10));
        let verdict = machine.check_liveness(Duration::from_secs(3)).await;

        assert_eq!(verdict, HealthVerdict::Lost);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_poll_in_ready_is_idle() {
        let remote = Arc::new(MockRemote::with_device());
        let (machine, _) = machine(remote.clone());
        let generation = machine.begin_cycle().unwrap();
        machine
            .transition(generation, SessionState::Connecting, "test")
            .unwrap();
        machine.register(generation).await.unwrap();
        assert_eq!(machine.state(), SessionState::Ready);

        remote.set_current_state(None);
        assert_eq!(
            machine.check_liveness(Duration::from_secs(3)).await,
            HealthVerdict::Idle
        );
        assert_eq!(machine.state(), SessionState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn eviction_is_detected_by_enumeration() {
        let remote = Arc::new(MockRemote::with_device());
        let (machine, _) = machine(remote.clone());
        machine.request_play(PlayRequest::single(track("t1"))).await.unwrap();

        assert_eq!(machine.check_enumeration().await, HealthVerdict::Healthy);
        remote.remove_device();
        assert_eq!(machine.check_enumeration().await, HealthVerdict::Lost);
        assert_eq!(machine.state(), SessionState::Lost);
    }

    #[tokio::test(start_paused = true)]
    async fn health_checks_skip_while_play_in_flight() {
        let remote = Arc::new(MockRemote::with_device());
        let (machine, _) = machine(remote.clone());
        machine.request_play(PlayRequest::single(track("t1"))).await.unwrap();
        remote.set_play_delay(Duration::from_secs(1));

        let play = {
            let machine = machine.clone();
            tokio::spawn(async move { machine.request_play(PlayRequest::single(track("t2"))).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            machine.check_liveness(Duration::from_secs(3)).await,
            HealthVerdict::Skipped
        );
        play.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn control_requires_active_session() {
        let remote = Arc::new(MockRemote::with_device());
        let (machine, _) = machine(remote.clone());

        let err = machine.control(RemoteCommand::Pause).await.unwrap_err();
        assert!(matches!(err, PlaybackError::DeviceInactive(_)));
        assert!(remote.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn pause_updates_store() {
        let remote = Arc::new(MockRemote::with_device());
        let (machine, _) = machine(remote.clone());
        machine.request_play(PlayRequest::single(track("t1"))).await.unwrap();

        machine.control(RemoteCommand::Pause).await.unwrap();

        assert_eq!(remote.count("pause"), 1);
        assert!(!machine.store.snapshot().unwrap().is_playing);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_returns_to_disconnected() {
        let remote = Arc::new(MockRemote::with_device());
        let (machine, _) = machine(remote.clone());
        machine.request_play(PlayRequest::single(track("t1"))).await.unwrap();

        machine.reset();

        let session = machine.snapshot();
        assert_eq!(session.state, SessionState::Disconnected);
        assert!(session.device_id.is_none());
    }

    #[test]
    fn context_request_carries_all_uris() {
        let tracks = vec![track("a"), track("b"), track("c")];
        let request = PlayRequest::context(&tracks, 1).unwrap();
        assert_eq!(request.track.id, "b");
        assert_eq!(request.uris.len(), 3);
        assert_eq!(request.offset, 1);
        assert!(PlayRequest::context(&tracks, 3).is_none());
    }
}
