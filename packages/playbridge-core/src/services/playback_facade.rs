//! Public playback surface.
//!
//! The [`PlaybackFacade`] is the only thing UI layers talk to. It decides
//! which backend is authoritative, keeps the two backends mutually exclusive,
//! resolves next/previous through the [`QueueNavigator`], and coalesces
//! identical calls that arrive while the first one is still in flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;

use crate::error::{PlaybackError, PlaybackResult};
use crate::events::{AdvisoryEvent, AdvisoryKind, BroadcastEvent, BroadcastEventBridge, EventEmitter};
use crate::local::{AudioOutput, LocalFallbackPlayer, LocalSignal, OutputEvent};
use crate::remote::RemoteDeviceClient;
use crate::runtime::TaskSpawner;
use crate::services::coalesce::Coalescer;
use crate::services::health_monitor::HealthMonitor;
use crate::services::queue_navigator::{Direction, Navigation, Queue, QueueNavigator, QueueOrigin};
use crate::services::session_machine::{PlayOutcome, PlayRequest, RemoteCommand, SessionStateMachine};
use crate::services::PlaybackStateStore;
use crate::state::Config;
use crate::types::{PlaybackSource, PlaybackState, Progress, Session, Track};

/// Identity of a coalescable operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum OpKey {
    /// Track id plus the ids of the queue context, if one was given.
    PlayTrack(String, Option<Vec<String>>),
    PlayContext(Vec<String>, usize),
    Next,
    Previous,
    TogglePlayPause,
    Pause,
    Resume,
    Seek(u64),
}

/// What a play or skip call ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Outcome {
    /// A track started on the given backend.
    Playing(PlaybackSource),
    /// A newer request took over before this one completed.
    Superseded,
    /// The remote device was asked to skip within its own queue.
    NativeSkip,
    /// The manual queue has nothing in that direction.
    EndOfQueue,
    /// Nothing is playing and there is nowhere to skip to.
    Idle,
}

/// Single entry point for playback.
pub struct PlaybackFacade {
    session: Arc<SessionStateMachine>,
    health_monitor: Arc<HealthMonitor>,
    local: LocalFallbackPlayer,
    navigator: QueueNavigator,
    store: Arc<PlaybackStateStore>,
    bridge: BroadcastEventBridge,
    premium_eligible: AtomicBool,
    plays: Coalescer<OpKey, Outcome>,
    controls: Coalescer<OpKey, ()>,
    cancel: CancellationToken,
}

impl PlaybackFacade {
    /// Wires the façade and every service behind it.
    ///
    /// Note: Call `start()` to spawn the health monitor and the local output
    /// event pump.
    pub fn new(
        config: &Config,
        remote: Arc<dyn RemoteDeviceClient>,
        output: Arc<dyn AudioOutput>,
        bridge: BroadcastEventBridge,
        premium_eligible: bool,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let emitter: Arc<dyn EventEmitter> = Arc::new(bridge.clone());
        let store = Arc::new(PlaybackStateStore::new(Arc::clone(&emitter)));
        let session = Arc::new(SessionStateMachine::new(
            remote,
            Arc::clone(&store),
            emitter,
            config,
        ));
        let health_monitor = Arc::new(HealthMonitor::new(
            Arc::clone(&session),
            config,
            cancel.child_token(),
        ));

        Arc::new(Self {
            session,
            health_monitor,
            local: LocalFallbackPlayer::new(output, Arc::clone(&store)),
            navigator: QueueNavigator::new(),
            store,
            bridge,
            premium_eligible: AtomicBool::new(premium_eligible),
            plays: Coalescer::new(),
            controls: Coalescer::new(),
            cancel,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Spawns the health monitor and the local output event pump.
    pub fn start(self: &Arc<Self>, spawner: &impl TaskSpawner) {
        self.health_monitor.start(spawner);

        let mut events = self.local.subscribe();
        let weak = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        spawner.spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => event,
                };
                let Some(facade) = weak.upgrade() else {
                    break;
                };
                match event {
                    Ok(event) => facade.on_output_event(event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("[Facade] Output event pump lagged by {} events", skipped)
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            log::debug!("[Facade] Output event pump stopped");
        });
    }

    /// Drops the session, the queue and the playback state.
    pub async fn logout(&self) {
        log::info!("[Facade] Logging out");
        self.local.stop();
        if self.store.is_playing_on(PlaybackSource::Remote) {
            self.session.silence().await;
        }
        self.session.reset();
        self.navigator.clear();
        self.store.clear();
    }

    /// Stops background tasks and local audio.
    pub fn shutdown(&self) {
        log::info!("[Facade] Shutting down");
        self.cancel.cancel();
        self.local.stop();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    pub fn set_premium_eligible(&self, eligible: bool) {
        self.premium_eligible.store(eligible, Ordering::SeqCst);
    }

    pub fn is_premium_eligible(&self) -> bool {
        self.premium_eligible.load(Ordering::SeqCst)
    }

    pub fn session_snapshot(&self) -> Session {
        self.session.snapshot()
    }

    pub fn playback_state(&self) -> Option<PlaybackState> {
        self.store.snapshot()
    }

    pub fn queue(&self) -> Option<Queue> {
        self.navigator.snapshot()
    }

    /// Current progress, interpolated for remote playback.
    pub fn get_progress(&self) -> Option<Progress> {
        self.store.progress()
    }

    /// Event feed for UI layers.
    pub fn subscribe(&self) -> impl Stream<Item = BroadcastEvent> + Send + 'static {
        self.bridge.stream()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Play
    // ─────────────────────────────────────────────────────────────────────────

    /// Plays `track`, optionally replacing the manual queue with `queue_context`.
    pub async fn play_track(
        self: &Arc<Self>,
        track: Track,
        queue_context: Option<Vec<Track>>,
    ) -> PlaybackResult<Outcome> {
        let key = OpKey::PlayTrack(
            track.id.clone(),
            queue_context
                .as_ref()
                .map(|tracks| tracks.iter().map(|t| t.id.clone()).collect()),
        );
        let this = Arc::clone(self);
        self.plays
            .run(key, move || async move {
                this.install_context(&track, queue_context);
                this.dispatch(PlayRequest::single(track)).await
            })
            .await
    }

    /// Plays `tracks` as one context starting at `start_index`.
    ///
    /// On the remote device the whole list is handed over so the device can
    /// skip natively. With local fallback it becomes a manual queue.
    pub async fn play_context(
        self: &Arc<Self>,
        tracks: Vec<Track>,
        start_index: usize,
    ) -> PlaybackResult<Outcome> {
        if tracks.is_empty() {
            return Err(PlaybackError::Unknown("cannot play an empty context".to_string()));
        }
        let start_index = start_index.min(tracks.len() - 1);
        let key = OpKey::PlayContext(tracks.iter().map(|t| t.id.clone()).collect(), start_index);

        let this = Arc::clone(self);
        self.plays
            .run(key, move || async move {
                let origin = if this.remote_eligible() {
                    QueueOrigin::Device
                } else {
                    QueueOrigin::Manual
                };
                let request = PlayRequest::context(&tracks, start_index).ok_or_else(|| {
                    PlaybackError::Unknown("context start index out of range".to_string())
                })?;
                this.navigator.set_context(tracks, start_index, origin);

                let outcome = this.dispatch(request).await?;
                if outcome == Outcome::Playing(PlaybackSource::Local) {
                    this.navigator.set_origin(QueueOrigin::Manual);
                }
                Ok(outcome)
            })
            .await
    }

    pub async fn next(self: &Arc<Self>) -> PlaybackResult<Outcome> {
        let this = Arc::clone(self);
        self.plays
            .run(OpKey::Next, move || async move { this.skip(Direction::Next).await })
            .await
    }

    pub async fn previous(self: &Arc<Self>) -> PlaybackResult<Outcome> {
        let this = Arc::clone(self);
        self.plays
            .run(OpKey::Previous, move || async move {
                this.skip(Direction::Previous).await
            })
            .await
    }

    fn install_context(&self, track: &Track, queue_context: Option<Vec<Track>>) {
        match queue_context {
            Some(mut tracks) => {
                let index = match tracks.iter().position(|t| t.id == track.id) {
                    Some(index) => index,
                    None => {
                        log::debug!("[Facade] '{}' not in its queue context, prepending", track.id);
                        tracks.insert(0, track.clone());
                        0
                    }
                };
                self.navigator.set_context(tracks, index, QueueOrigin::Manual);
            }
            None => {
                // A one-off play outside the current queue ends that queue.
                if !self.navigator.select(&track.id) {
                    self.navigator.clear();
                }
            }
        }
    }

    async fn skip(&self, direction: Direction) -> PlaybackResult<Outcome> {
        match self.navigator.resolve(direction) {
            Navigation::Track { index, track } => {
                log::debug!("[Facade] {:?} resolves to queue index {}", direction, index);
                self.navigator.advance_to(index);
                self.dispatch(PlayRequest::single(track)).await
            }
            Navigation::EndOfQueue => {
                log::debug!("[Facade] {:?}: end of queue", direction);
                Ok(Outcome::EndOfQueue)
            }
            Navigation::Delegate => {
                // Native skip would start the device; only allowed while it owns playback.
                let remote_owns_playback = self.remote_eligible()
                    && self.store.source() == Some(PlaybackSource::Remote)
                    && self.session.active_device().is_some();
                if !remote_owns_playback {
                    log::debug!("[Facade] {:?}: no queue and remote is not playing", direction);
                    return Ok(Outcome::Idle);
                }
                let command = match direction {
                    Direction::Next => RemoteCommand::Next,
                    Direction::Previous => RemoteCommand::Previous,
                };
                self.session.control(command).await?;
                Ok(Outcome::NativeSkip)
            }
        }
    }

    /// Routes a play to the right backend, quiescing the other one first.
    async fn dispatch(&self, request: PlayRequest) -> PlaybackResult<Outcome> {
        if !self.remote_eligible() {
            self.quiesce_remote().await;
            return self.play_local(&request.track).await;
        }

        self.local.stop();
        let track = request.track.clone();
        match self.session.request_play(request).await {
            Ok(PlayOutcome::Started) => Ok(Outcome::Playing(PlaybackSource::Remote)),
            Ok(PlayOutcome::Superseded) => Ok(Outcome::Superseded),
            Err(e) if e.is_device_loss() => self.fall_back(&track, &e).await,
            Err(e) => Err(e),
        }
    }

    async fn play_local(&self, track: &Track) -> PlaybackResult<Outcome> {
        match self.local.play(track).await {
            Ok(()) => Ok(Outcome::Playing(PlaybackSource::Local)),
            Err(e) => {
                let message = match e {
                    PlaybackError::NoPreviewAvailable(_) => format!(
                        "'{}' has no preview. A premium account is required to play it",
                        track.title
                    ),
                    ref other => other.to_string(),
                };
                self.advise(AdvisoryKind::PlaybackFailed, message);
                Err(e)
            }
        }
    }

    /// Plays the preview after remote playback failed with device loss.
    async fn fall_back(&self, track: &Track, cause: &PlaybackError) -> PlaybackResult<Outcome> {
        log::warn!("[Facade] Remote play failed ({}), falling back to preview", cause);
        match self.local.play(track).await {
            Ok(()) => {
                // A demoted session already carries a persistent notice.
                if !self.session.is_demoted() {
                    self.advise(
                        AdvisoryKind::PreviewOnly,
                        "The playback device is unavailable. Playing a preview instead",
                    );
                }
                Ok(Outcome::Playing(PlaybackSource::Local))
            }
            Err(PlaybackError::NoPreviewAvailable(_)) => {
                let err = PlaybackError::Unknown(format!(
                    "'{}' cannot be played: the playback device is unavailable and the track has no preview",
                    track.title
                ));
                self.advise(AdvisoryKind::PlaybackFailed, err.to_string());
                Err(err)
            }
            Err(e) => {
                self.advise(AdvisoryKind::PlaybackFailed, e.to_string());
                Err(e)
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transport Controls
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn toggle_play_pause(self: &Arc<Self>) -> PlaybackResult<()> {
        let this = Arc::clone(self);
        self.controls
            .run(OpKey::TogglePlayPause, move || async move {
                match this.store.snapshot() {
                    Some(state) if state.is_playing => this.pause_current().await,
                    Some(_) => this.resume_current().await,
                    None => Ok(()),
                }
            })
            .await
    }

    pub async fn pause(self: &Arc<Self>) -> PlaybackResult<()> {
        let this = Arc::clone(self);
        self.controls
            .run(OpKey::Pause, move || async move { this.pause_current().await })
            .await
    }

    pub async fn resume(self: &Arc<Self>) -> PlaybackResult<()> {
        let this = Arc::clone(self);
        self.controls
            .run(OpKey::Resume, move || async move { this.resume_current().await })
            .await
    }

    pub async fn seek(self: &Arc<Self>, position_ms: u64) -> PlaybackResult<()> {
        let this = Arc::clone(self);
        self.controls
            .run(OpKey::Seek(position_ms), move || async move {
                match this.store.source() {
                    Some(PlaybackSource::Remote) => {
                        this.session.control(RemoteCommand::Seek(position_ms)).await
                    }
                    Some(PlaybackSource::Local) => {
                        this.local.seek(position_ms);
                        Ok(())
                    }
                    None => Ok(()),
                }
            })
            .await
    }

    async fn pause_current(&self) -> PlaybackResult<()> {
        match self.store.source() {
            Some(PlaybackSource::Remote) => self.session.control(RemoteCommand::Pause).await,
            Some(PlaybackSource::Local) => {
                self.local.pause();
                Ok(())
            }
            None => Ok(()),
        }
    }

    async fn resume_current(&self) -> PlaybackResult<()> {
        match self.store.source() {
            Some(PlaybackSource::Remote) => self.session.control(RemoteCommand::Resume).await,
            Some(PlaybackSource::Local) => self.local.resume().inspect_err(|e| {
                self.advise(AdvisoryKind::PlaybackFailed, e.to_string());
            }),
            None => Ok(()),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────

    fn remote_eligible(&self) -> bool {
        self.is_premium_eligible() && !self.session.is_demoted()
    }

    async fn quiesce_remote(&self) {
        if self.store.is_playing_on(PlaybackSource::Remote) {
            log::debug!("[Facade] Pausing remote device before local playback");
            self.session.silence().await;
        }
    }

    async fn on_output_event(self: &Arc<Self>, event: OutputEvent) {
        match self.local.handle_event(event) {
            LocalSignal::None => {}
            LocalSignal::Ended => {
                if !self.navigator.has_manual_context() {
                    return;
                }
                match self.next().await {
                    Ok(Outcome::EndOfQueue) => log::info!("[Facade] Reached end of queue"),
                    Ok(outcome) => log::debug!("[Facade] Auto-advanced: {:?}", outcome),
                    Err(e) => log::warn!("[Facade] Auto-advance failed: {}", e),
                }
            }
            LocalSignal::Failed(message) => {
                self.advise(
                    AdvisoryKind::PlaybackFailed,
                    format!("Preview playback failed: {}", message),
                );
            }
        }
    }

    fn advise(&self, kind: AdvisoryKind, message: impl Into<String>) {
        self.bridge.emit_advisory(AdvisoryEvent::new(kind, message));
    }
}
