//! Audio output on the system's default sound device.
//!
//! Preview clips are fetched over HTTP, decoded by rodio and played on a
//! dedicated audio thread that owns the output stream. The thread polls the
//! sink on every tick to report `TimeUpdate` and `Ended`, the same events
//! [`ClockedOutput`](super::ClockedOutput) produces headlessly.

use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use rodio::{Decoder, OutputStream, OutputStreamBuilder, Sink, Source};
use tokio::sync::{broadcast, oneshot};

use super::output::{AudioOutput, OutputError, OutputEvent};
use crate::protocol_constants::MAX_PREVIEW_BYTES;

enum SinkCommand {
    Load {
        bytes: Vec<u8>,
        reply: oneshot::Sender<Result<Option<u64>, OutputError>>,
    },
    Pause,
    Resume,
    Seek(u64),
    Stop,
}

/// What the async side knows about the clip on the audio thread.
#[derive(Debug, Default)]
struct SinkStatus {
    uri: Option<String>,
    playing: bool,
    /// Decoded length, when the container reports one.
    length_ms: Option<u64>,
}

/// Plays preview clips on the default output device.
pub struct DeviceOutput {
    http: Client,
    commands: mpsc::Sender<SinkCommand>,
    status: Arc<Mutex<SinkStatus>>,
    events: broadcast::Sender<OutputEvent>,
    /// Bumped by every start/stop so a slow fetch cannot resurrect a stopped clip.
    generation: AtomicU64,
    default_clip_ms: u64,
}

impl DeviceOutput {
    /// Spawns the audio thread. The device itself is opened on first play.
    ///
    /// `default_clip_ms` is reported as the clip length when the decoder
    /// cannot tell; `tick_ms` paces `TimeUpdate` events.
    pub fn new(http: Client, default_clip_ms: u64, tick_ms: u64) -> std::io::Result<Self> {
        let (commands, rx) = mpsc::channel();
        let (events, _) = broadcast::channel(64);
        let status = Arc::new(Mutex::new(SinkStatus::default()));

        let thread_status = Arc::clone(&status);
        let thread_events = events.clone();
        let tick = Duration::from_millis(tick_ms.max(1));
        thread::Builder::new()
            .name("playbridge-audio".to_string())
            .spawn(move || run_sink_thread(rx, thread_status, thread_events, tick))?;

        Ok(Self {
            http,
            commands,
            status,
            events,
            generation: AtomicU64::new(0),
            default_clip_ms,
        })
    }

    fn send(&self, command: SinkCommand) -> Result<(), OutputError> {
        self.commands
            .send(command)
            .map_err(|_| OutputError::Load("audio thread has stopped".to_string()))
    }

    async fn load(&self, uri: &str, generation: u64) -> Result<(), OutputError> {
        let bytes = fetch_clip(&self.http, uri).await?;
        if self.generation.load(Ordering::SeqCst) != generation {
            return Err(OutputError::Interrupted);
        }

        let (reply, decoded) = oneshot::channel();
        self.send(SinkCommand::Load { bytes, reply })?;
        let length_ms = decoded
            .await
            .map_err(|_| OutputError::Load("audio thread has stopped".to_string()))??;

        let mut status = self.status.lock();
        if self.generation.load(Ordering::SeqCst) != generation {
            return Err(OutputError::Interrupted);
        }
        status.uri = Some(uri.to_string());
        status.playing = true;
        status.length_ms = length_ms;
        Ok(())
    }
}

#[async_trait]
impl AudioOutput for DeviceOutput {
    async fn start(&self, uri: &str) -> Result<(), OutputError> {
        self.stop();
        let generation = self.generation.load(Ordering::SeqCst);

        match self.load(uri, generation).await {
            Ok(()) => {
                log::debug!("[Output] Playing clip {}", uri);
                Ok(())
            }
            Err(OutputError::Interrupted) => Err(OutputError::Interrupted),
            Err(e) => {
                log::warn!("[Output] Could not play {}: {}", uri, e);
                let _ = self.events.send(OutputEvent::Error(e.to_string()));
                Err(e)
            }
        }
    }

    fn pause(&self) {
        self.status.lock().playing = false;
        let _ = self.send(SinkCommand::Pause);
    }

    fn resume(&self) -> Result<(), OutputError> {
        let mut status = self.status.lock();
        if status.uri.is_none() {
            return Err(OutputError::NothingLoaded);
        }
        self.send(SinkCommand::Resume)?;
        status.playing = true;
        Ok(())
    }

    fn seek(&self, position_ms: u64) {
        if self.status.lock().uri.is_some() {
            let _ = self.send(SinkCommand::Seek(position_ms));
        }
    }

    fn stop(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let mut status = self.status.lock();
        if status.uri.take().is_some() {
            log::debug!("[Output] Stopped");
        }
        status.playing = false;
        status.length_ms = None;
        let _ = self.send(SinkCommand::Stop);
    }

    fn is_sounding(&self) -> bool {
        let status = self.status.lock();
        status.uri.is_some() && status.playing
    }

    fn clip_length_ms(&self) -> Option<u64> {
        let status = self.status.lock();
        status
            .uri
            .as_ref()
            .map(|_| status.length_ms.unwrap_or(self.default_clip_ms))
    }

    fn subscribe(&self) -> broadcast::Receiver<OutputEvent> {
        self.events.subscribe()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loading
// ─────────────────────────────────────────────────────────────────────────────

async fn fetch_clip(http: &Client, uri: &str) -> Result<Vec<u8>, OutputError> {
    let response = http
        .get(uri)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| OutputError::Load(format!("fetch failed: {}", e)))?;

    if response
        .content_length()
        .is_some_and(|len| len > MAX_PREVIEW_BYTES as u64)
    {
        return Err(OutputError::Load("clip is too large for a preview".to_string()));
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| OutputError::Load(format!("fetch failed: {}", e)))?;
    if bytes.len() > MAX_PREVIEW_BYTES {
        return Err(OutputError::Load("clip is too large for a preview".to_string()));
    }
    Ok(bytes.to_vec())
}

struct DecodedClip {
    source: Decoder<Cursor<Vec<u8>>>,
    length_ms: Option<u64>,
}

fn decode_clip(bytes: Vec<u8>) -> Result<DecodedClip, OutputError> {
    let source = Decoder::new(Cursor::new(bytes))
        .map_err(|e| OutputError::Load(format!("cannot decode clip: {}", e)))?;
    let length_ms = source.total_duration().map(|d| d.as_millis() as u64);
    Ok(DecodedClip { source, length_ms })
}

/// Decodes `bytes` and starts them on a new sink, opening the device if needed.
fn start_sink(
    stream: &mut Option<OutputStream>,
    bytes: Vec<u8>,
) -> Result<(Sink, Option<u64>), OutputError> {
    let clip = decode_clip(bytes)?;
    if stream.is_none() {
        let opened = OutputStreamBuilder::open_default_stream()
            .map_err(|e| OutputError::Load(format!("no audio output device: {}", e)))?;
        *stream = Some(opened);
    }
    let Some(stream) = stream.as_ref() else {
        return Err(OutputError::Load("no audio output device".to_string()));
    };

    let sink = Sink::connect_new(stream.mixer());
    sink.append(clip.source);
    Ok((sink, clip.length_ms))
}

// ─────────────────────────────────────────────────────────────────────────────
// Audio Thread
// ─────────────────────────────────────────────────────────────────────────────

fn run_sink_thread(
    commands: mpsc::Receiver<SinkCommand>,
    status: Arc<Mutex<SinkStatus>>,
    events: broadcast::Sender<OutputEvent>,
    tick: Duration,
) {
    let mut stream: Option<OutputStream> = None;
    let mut sink: Option<Sink> = None;
    // Kept so a finished clip can be restarted by resume.
    let mut current: Option<Vec<u8>> = None;
    let mut ended = true;

    loop {
        match commands.recv_timeout(tick) {
            Ok(SinkCommand::Load { bytes, reply }) => {
                if let Some(old) = sink.take() {
                    old.stop();
                }
                let result = start_sink(&mut stream, bytes.clone()).map(|(next, length_ms)| {
                    sink = Some(next);
                    current = Some(bytes);
                    ended = false;
                    length_ms
                });
                let _ = reply.send(result);
            }
            Ok(SinkCommand::Pause) => {
                if let Some(active) = &sink {
                    active.pause();
                }
            }
            Ok(SinkCommand::Resume) => {
                if ended {
                    if let Some(bytes) = current.clone() {
                        match start_sink(&mut stream, bytes) {
                            Ok((next, _)) => {
                                sink = Some(next);
                                ended = false;
                            }
                            Err(e) => {
                                status.lock().playing = false;
                                let _ = events.send(OutputEvent::Error(e.to_string()));
                            }
                        }
                    }
                } else if let Some(active) = &sink {
                    active.play();
                }
            }
            Ok(SinkCommand::Seek(position_ms)) => {
                if let Some(active) = &sink {
                    if let Err(e) = active.try_seek(Duration::from_millis(position_ms)) {
                        log::warn!("[Output] Seek to {}ms failed: {}", position_ms, e);
                    }
                }
            }
            Ok(SinkCommand::Stop) => {
                if let Some(old) = sink.take() {
                    old.stop();
                }
                current = None;
                ended = true;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let Some(active) = sink.as_ref().filter(|_| !ended) else {
            continue;
        };
        if active.empty() {
            ended = true;
            status.lock().playing = false;
            let _ = events.send(OutputEvent::Ended);
        } else if !active.is_paused() {
            let position_ms = active.get_pos().as_millis() as u64;
            let _ = events.send(OutputEvent::TimeUpdate { position_ms });
        }
    }
    log::debug!("[Output] Audio thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn output() -> DeviceOutput {
        DeviceOutput::new(Client::new(), 30_000, 250).unwrap()
    }

    /// One second of 16-bit mono silence at 8 kHz.
    fn silent_wav() -> Vec<u8> {
        let sample_rate: u32 = 8_000;
        let data_len: u32 = sample_rate * 2;
        let mut wav = Vec::with_capacity(44 + data_len as usize);
        wav.extend_from_slice(b"RIFF");
        wav.extend_from_slice(&(36 + data_len).to_le_bytes());
        wav.extend_from_slice(b"WAVEfmt ");
        wav.extend_from_slice(&16u32.to_le_bytes());
        wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
        wav.extend_from_slice(&1u16.to_le_bytes()); // mono
        wav.extend_from_slice(&sample_rate.to_le_bytes());
        wav.extend_from_slice(&(sample_rate * 2).to_le_bytes());
        wav.extend_from_slice(&2u16.to_le_bytes());
        wav.extend_from_slice(&16u16.to_le_bytes());
        wav.extend_from_slice(b"data");
        wav.extend_from_slice(&data_len.to_le_bytes());
        wav.resize(44 + data_len as usize, 0);
        wav
    }

    #[tokio::test]
    async fn missing_clip_fails_and_reports_error() {
        let base = serve(Router::new().route(
            "/missing.mp3",
            get(|| async { StatusCode::NOT_FOUND }),
        ))
        .await;
        let output = output();
        let mut rx = output.subscribe();

        let err = output
            .start(&format!("{}/missing.mp3", base))
            .await
            .unwrap_err();

        assert!(matches!(err, OutputError::Load(_)));
        assert!(matches!(rx.recv().await.unwrap(), OutputEvent::Error(_)));
        assert!(!output.is_sounding());
        assert_eq!(output.clip_length_ms(), None);
    }

    #[tokio::test]
    async fn undecodable_clip_fails_and_reports_error() {
        let base = serve(Router::new().route(
            "/noise.mp3",
            get(|| async { b"definitely not audio".to_vec() }),
        ))
        .await;
        let output = output();
        let mut rx = output.subscribe();

        let err = output
            .start(&format!("{}/noise.mp3", base))
            .await
            .unwrap_err();

        match err {
            OutputError::Load(message) => assert!(message.contains("decode")),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(matches!(rx.recv().await.unwrap(), OutputEvent::Error(_)));
        assert!(!output.is_sounding());
    }

    #[tokio::test]
    async fn fetch_returns_clip_bytes() {
        let base = serve(Router::new().route("/clip.wav", get(|| async { silent_wav() }))).await;

        let bytes = fetch_clip(&Client::new(), &format!("{}/clip.wav", base))
            .await
            .unwrap();

        assert_eq!(bytes, silent_wav());
    }

    #[test]
    fn wav_clip_decodes_with_length() {
        let clip = decode_clip(silent_wav()).unwrap();
        let length_ms = clip.length_ms.unwrap();
        assert!((900..=1_100).contains(&length_ms), "length {}", length_ms);
    }

    #[test]
    fn resume_without_clip_fails() {
        assert_eq!(output().resume(), Err(OutputError::NothingLoaded));
    }
}
