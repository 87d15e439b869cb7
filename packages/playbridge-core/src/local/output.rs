//! Audio output abstraction for local preview playback.
//!
//! [`AudioOutput`] is the seam between the fallback player and whatever
//! actually produces sound. [`ClockedOutput`] is the headless implementation:
//! it runs a virtual playhead on the tokio clock and reports time updates and
//! end-of-clip exactly like a media element would. With the `device-audio`
//! feature, [`DeviceOutput`](super::DeviceOutput) plays the clips on the
//! sound card instead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

/// Errors reported by an [`AudioOutput`] when starting or resuming.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OutputError {
    /// The platform refused to start audio without a user gesture.
    #[error("autoplay blocked: {0}")]
    AutoplayBlocked(String),

    /// The clip could not be loaded.
    #[error("failed to load clip: {0}")]
    Load(String),

    /// Nothing is loaded to resume.
    #[error("no clip loaded")]
    NothingLoaded,

    /// A stop or a newer start replaced the clip while it was loading.
    #[error("clip load was interrupted")]
    Interrupted,
}

/// Notifications from a running output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    /// The playhead moved.
    TimeUpdate { position_ms: u64 },
    /// The clip played to its end.
    Ended,
    /// Playback failed after starting.
    Error(String),
}

/// A single-clip audio sink.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Loads `uri` and starts playing from the beginning, replacing any
    /// previous clip.
    async fn start(&self, uri: &str) -> Result<(), OutputError>;

    fn pause(&self);

    fn resume(&self) -> Result<(), OutputError>;

    fn seek(&self, position_ms: u64);

    /// Stops and unloads the current clip. No events follow for it.
    fn stop(&self);

    /// Returns true while a clip is loaded and not paused.
    fn is_sounding(&self) -> bool;

    /// Length of the loaded clip, if known.
    fn clip_length_ms(&self) -> Option<u64>;

    fn subscribe(&self) -> broadcast::Receiver<OutputEvent>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Clocked Output
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Playhead {
    /// Incremented on every start/stop; ticker tasks exit when it moves on.
    epoch: u64,
    uri: Option<String>,
    position_ms: u64,
    playing: bool,
}

/// Headless output driven by the tokio clock.
pub struct ClockedOutput {
    playhead: Arc<Mutex<Playhead>>,
    tx: broadcast::Sender<OutputEvent>,
    clip_length_ms: u64,
    tick: Duration,
    autoplay_allowed: AtomicBool,
}

impl ClockedOutput {
    /// Creates an output whose clips last `clip_length_ms` and which reports
    /// time updates every `tick_ms`.
    pub fn new(clip_length_ms: u64, tick_ms: u64) -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            playhead: Arc::new(Mutex::new(Playhead::default())),
            tx,
            clip_length_ms,
            tick: Duration::from_millis(tick_ms.max(1)),
            autoplay_allowed: AtomicBool::new(true),
        }
    }

    /// Simulates a platform autoplay policy.
    pub fn set_autoplay_allowed(&self, allowed: bool) {
        self.autoplay_allowed.store(allowed, Ordering::SeqCst);
    }

    /// Returns the URI of the loaded clip.
    pub fn loaded_uri(&self) -> Option<String> {
        self.playhead.lock().uri.clone()
    }

    fn spawn_ticker(&self, epoch: u64) {
        let playhead = Arc::clone(&self.playhead);
        let tx = self.tx.clone();
        let tick = self.tick;
        let tick_ms = tick.as_millis() as u64;
        let clip_length_ms = self.clip_length_ms;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;

            loop {
                interval.tick().await;
                let mut head = playhead.lock();
                if head.epoch != epoch {
                    return;
                }
                if !head.playing {
                    continue;
                }

                head.position_ms = (head.position_ms + tick_ms).min(clip_length_ms);
                let _ = tx.send(OutputEvent::TimeUpdate {
                    position_ms: head.position_ms,
                });

                if head.position_ms >= clip_length_ms {
                    head.playing = false;
                    let _ = tx.send(OutputEvent::Ended);
                    return;
                }
            }
        });
    }
}

#[async_trait]
impl AudioOutput for ClockedOutput {
    async fn start(&self, uri: &str) -> Result<(), OutputError> {
        if uri.is_empty() {
            return Err(OutputError::Load("empty clip uri".to_string()));
        }
        if !self.autoplay_allowed.load(Ordering::SeqCst) {
            return Err(OutputError::AutoplayBlocked(
                "user gesture required before audio can start".to_string(),
            ));
        }

        let epoch = {
            let mut head = self.playhead.lock();
            head.epoch += 1;
            head.uri = Some(uri.to_string());
            head.position_ms = 0;
            head.playing = true;
            head.epoch
        };
        log::debug!("[Output] Started clip {}", uri);
        self.spawn_ticker(epoch);
        Ok(())
    }

    fn pause(&self) {
        self.playhead.lock().playing = false;
    }

    fn resume(&self) -> Result<(), OutputError> {
        if !self.autoplay_allowed.load(Ordering::SeqCst) {
            return Err(OutputError::AutoplayBlocked(
                "user gesture required before audio can resume".to_string(),
            ));
        }
        let epoch = {
            let mut head = self.playhead.lock();
            if head.uri.is_none() {
                return Err(OutputError::NothingLoaded);
            }
            if head.position_ms < self.clip_length_ms {
                head.playing = true;
                return Ok(());
            }
            // Resuming a finished clip restarts it with a fresh ticker.
            head.epoch += 1;
            head.position_ms = 0;
            head.playing = true;
            head.epoch
        };
        self.spawn_ticker(epoch);
        Ok(())
    }

    fn seek(&self, position_ms: u64) {
        let mut head = self.playhead.lock();
        if head.uri.is_some() {
            head.position_ms = position_ms.min(self.clip_length_ms);
        }
    }

    fn stop(&self) {
        let mut head = self.playhead.lock();
        if head.uri.take().is_some() {
            log::debug!("[Output] Stopped");
        }
        head.epoch += 1;
        head.position_ms = 0;
        head.playing = false;
    }

    fn is_sounding(&self) -> bool {
        let head = self.playhead.lock();
        head.uri.is_some() && head.playing
    }

    fn clip_length_ms(&self) -> Option<u64> {
        Some(self.clip_length_ms)
    }

    fn subscribe(&self) -> broadcast::Receiver<OutputEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn clip_reports_progress_then_ends() {
        let output = ClockedOutput::new(1_000, 250);
        let mut rx = output.subscribe();

        output.start("https://cdn.example/preview.mp3").await.unwrap();
        assert!(output.is_sounding());

        let mut positions = Vec::new();
        loop {
            match rx.recv().await.unwrap() {
                OutputEvent::TimeUpdate { position_ms } => positions.push(position_ms),
                OutputEvent::Ended => break,
                OutputEvent::Error(e) => panic!("unexpected error: {}", e),
            }
        }

        assert_eq!(positions, vec![250, 500, 750, 1_000]);
        assert!(!output.is_sounding());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_silences_stale_ticker() {
        let output = ClockedOutput::new(1_000, 250);
        let mut rx = output.subscribe();

        output.start("a.mp3").await.unwrap();
        output.stop();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(rx.try_recv().is_err());
        assert!(output.loaded_uri().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn paused_clip_does_not_advance() {
        let output = ClockedOutput::new(1_000, 250);
        let mut rx = output.subscribe();

        output.start("a.mp3").await.unwrap();
        output.pause();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_err());

        output.resume().unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            OutputEvent::TimeUpdate { position_ms: 250 }
        );
    }

    #[tokio::test]
    async fn blocked_autoplay_is_reported() {
        let output = ClockedOutput::new(1_000, 250);
        output.set_autoplay_allowed(false);

        let err = output.start("a.mp3").await.unwrap_err();
        assert!(matches!(err, OutputError::AutoplayBlocked(_)));
        assert!(!output.is_sounding());
    }

    #[test]
    fn resume_without_clip_fails() {
        let output = ClockedOutput::new(1_000, 250);
        assert_eq!(output.resume(), Err(OutputError::NothingLoaded));
    }
}
