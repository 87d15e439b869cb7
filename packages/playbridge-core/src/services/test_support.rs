//! Hand-written mocks shared by the service tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::protocol_constants::DEFAULT_DEVICE_NAME;
use crate::remote::{RemoteDiscovery, RemoteError, RemotePlayback, RemoteResult};
use crate::types::{Device, DeviceKind, PlaybackSource, PlaybackState, Track};

pub const DEVICE_ID: &str = "dev-1";

pub fn track(id: &str) -> Track {
    Track {
        id: id.into(),
        uri: format!("service:track:{}", id),
        title: format!("Title {}", id),
        artist: "Artist".into(),
        album: "Album".into(),
        duration_ms: 200_000,
        preview_uri: Some(format!("https://cdn.example/{}.mp3", id)),
        tags: None,
    }
}

pub fn track_without_preview(id: &str) -> Track {
    Track {
        preview_uri: None,
        ..track(id)
    }
}

/// RemoteError is not `Clone` (it can wrap a transport error), so persistent
/// failures are rebuilt from their kind.
fn rebuild(err: &RemoteError) -> RemoteError {
    match err {
        RemoteError::DeviceNotFound(m) => RemoteError::DeviceNotFound(m.clone()),
        RemoteError::DeviceInactive(m) => RemoteError::DeviceInactive(m.clone()),
        RemoteError::Unauthorized(m) => RemoteError::Unauthorized(m.clone()),
        RemoteError::RateLimited(s) => RemoteError::RateLimited(*s),
        RemoteError::Parse(m) => RemoteError::Parse(m.clone()),
        RemoteError::HttpStatus(c, m) => RemoteError::HttpStatus(*c, m.clone()),
        RemoteError::Http(e) => RemoteError::HttpStatus(0, e.to_string()),
    }
}

/// Scriptable remote device.
///
/// Tracks every call by name, whether the device is currently sounding, and
/// lets tests inject failures and latency.
pub struct MockRemote {
    calls: Mutex<Vec<&'static str>>,
    played: Mutex<Vec<Vec<String>>>,
    device_listed: AtomicBool,
    /// Number of list calls before the device appears.
    list_after: AtomicUsize,
    list_calls: AtomicUsize,
    connect_accepted: AtomicBool,
    next_play_failures: Mutex<VecDeque<RemoteError>>,
    persistent_play_failure: Mutex<Option<RemoteError>>,
    next_connect_failure: Mutex<Option<RemoteError>>,
    next_poll_failure: Mutex<Option<RemoteError>>,
    play_delay: Mutex<Duration>,
    poll_delay: Mutex<Duration>,
    current_state: Mutex<Option<PlaybackState>>,
    sounding: AtomicBool,
}

impl MockRemote {
    /// A backend where our device is not listed.
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            played: Mutex::new(Vec::new()),
            device_listed: AtomicBool::new(false),
            list_after: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            connect_accepted: AtomicBool::new(true),
            next_play_failures: Mutex::new(VecDeque::new()),
            persistent_play_failure: Mutex::new(None),
            next_connect_failure: Mutex::new(None),
            next_poll_failure: Mutex::new(None),
            play_delay: Mutex::new(Duration::ZERO),
            poll_delay: Mutex::new(Duration::ZERO),
            current_state: Mutex::new(Some(PlaybackState {
                track_id: "t".into(),
                position_ms: 0,
                duration_ms: 200_000,
                is_playing: true,
                source: PlaybackSource::Remote,
            })),
            sounding: AtomicBool::new(false),
        }
    }

    /// A backend where our device is listed immediately.
    pub fn with_device() -> Self {
        let mock = Self::new();
        mock.device_listed.store(true, Ordering::SeqCst);
        mock
    }

    /// Lists the device starting from the `n`th enumeration.
    pub fn list_device_after(&self, n: usize) {
        self.device_listed.store(true, Ordering::SeqCst);
        self.list_after.store(n.saturating_sub(1), Ordering::SeqCst);
    }

    pub fn remove_device(&self) {
        self.device_listed.store(false, Ordering::SeqCst);
    }

    pub fn set_connect_accepted(&self, accepted: bool) {
        self.connect_accepted.store(accepted, Ordering::SeqCst);
    }

    pub fn fail_next_connect(&self, err: RemoteError) {
        *self.next_connect_failure.lock() = Some(err);
    }

    pub fn fail_next_play(&self, err: RemoteError) {
        self.next_play_failures.lock().push_back(err);
    }

    pub fn fail_plays(&self, err: RemoteError) {
        *self.persistent_play_failure.lock() = Some(err);
    }

    pub fn fail_next_poll(&self, err: RemoteError) {
        *self.next_poll_failure.lock() = Some(err);
    }

    pub fn set_play_delay(&self, delay: Duration) {
        *self.play_delay.lock() = delay;
    }

    pub fn set_poll_delay(&self, delay: Duration) {
        *self.poll_delay.lock() = delay;
    }

    pub fn set_current_state(&self, state: Option<PlaybackState>) {
        *self.current_state.lock() = state;
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
        self.played.lock().clear();
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls.lock().iter().filter(|c| **c == name).count()
    }

    pub fn played_uris(&self) -> Vec<Vec<String>> {
        self.played.lock().clone()
    }

    pub fn is_sounding(&self) -> bool {
        self.sounding.load(Ordering::SeqCst)
    }

    fn record(&self, name: &'static str) {
        self.calls.lock().push(name);
    }
}

#[async_trait]
impl RemoteDiscovery for MockRemote {
    async fn connect(&self) -> RemoteResult<bool> {
        self.record("connect");
        if let Some(err) = self.next_connect_failure.lock().take() {
            return Err(err);
        }
        Ok(self.connect_accepted.load(Ordering::SeqCst))
    }

    async fn list_devices(&self) -> RemoteResult<Vec<Device>> {
        self.record("list_devices");
        let call = self.list_calls.fetch_add(1, Ordering::SeqCst);
        let listed = self.device_listed.load(Ordering::SeqCst)
            && call >= self.list_after.load(Ordering::SeqCst);

        let mut devices = vec![Device {
            id: "other".into(),
            name: "Kitchen Speaker".into(),
            kind: DeviceKind::Remote,
            active: false,
        }];
        if listed {
            devices.push(Device {
                id: DEVICE_ID.into(),
                name: DEFAULT_DEVICE_NAME.into(),
                kind: DeviceKind::Local,
                active: true,
            });
        }
        Ok(devices)
    }

    async fn get_current_state(&self) -> RemoteResult<Option<PlaybackState>> {
        self.record("poll");
        let delay = *self.poll_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.next_poll_failure.lock().take() {
            return Err(err);
        }
        Ok(self.current_state.lock().clone())
    }
}

#[async_trait]
impl RemotePlayback for MockRemote {
    async fn transfer_playback(&self, _device_id: &str) -> RemoteResult<()> {
        self.record("transfer");
        Ok(())
    }

    async fn play_uris(&self, _device_id: &str, uris: &[String], _offset: usize) -> RemoteResult<()> {
        self.record("play");
        let delay = *self.play_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.next_play_failures.lock().pop_front() {
            return Err(err);
        }
        if let Some(err) = self.persistent_play_failure.lock().as_ref() {
            return Err(rebuild(err));
        }
        self.played.lock().push(uris.to_vec());
        self.sounding.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn pause(&self, _device_id: &str) -> RemoteResult<()> {
        self.record("pause");
        self.sounding.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn resume(&self, _device_id: &str) -> RemoteResult<()> {
        self.record("resume");
        self.sounding.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn seek(&self, _device_id: &str, _position_ms: u64) -> RemoteResult<()> {
        self.record("seek");
        Ok(())
    }

    async fn next(&self, _device_id: &str) -> RemoteResult<()> {
        self.record("next");
        Ok(())
    }

    async fn previous(&self, _device_id: &str) -> RemoteResult<()> {
        self.record("previous");
        Ok(())
    }
}
