//! Playbridge Player - command-line player for a remote playback device.
//!
//! Plays a playlist from a JSON catalog on the configured remote device and
//! falls back to local preview clips, played on the sound device, when the
//! remote device is unavailable. Events are logged until the process is asked
//! to stop.

mod catalog;
mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use playbridge_core::utils::format_position;
use playbridge_core::{
    bootstrap_player, now_millis, BroadcastEvent, CatalogService, Credential, ErrorCode,
    LoggingEventEmitter, StaticCredentialProvider,
};
use tokio::signal;
use tokio_stream::StreamExt;

use crate::catalog::JsonFileCatalog;
use crate::config::PlayerConfig;

/// How often the current position is logged.
const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Playbridge Player - remote playback with local preview fallback.
#[derive(Parser, Debug)]
#[command(name = "playbridge-player")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "PLAYBRIDGE_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// JSON catalog file (overrides config file).
    #[arg(long, value_name = "FILE")]
    catalog: Option<PathBuf>,

    /// Playlist to play. Defaults to the first playlist in the catalog.
    #[arg(short, long)]
    playlist: Option<String>,

    /// Index of the first track to play.
    #[arg(short, long, default_value_t = 0)]
    start: usize,

    /// Device name to register (overrides config file).
    #[arg(short = 'n', long)]
    device_name: Option<String>,

    /// Bearer token for the control plane.
    #[arg(long, env = "PLAYBRIDGE_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Lifetime of the access token in seconds.
    #[arg(long, default_value_t = 3600)]
    token_ttl_secs: u64,

    /// Use local previews only, even for premium accounts.
    #[arg(long)]
    preview_only: bool,

    /// Keep previews silent on a virtual clock (no sound device needed).
    #[arg(long)]
    headless_audio: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Playbridge Player v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        PlayerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(catalog) = args.catalog {
        config.catalog = Some(catalog);
    }
    if let Some(name) = args.device_name {
        config.device_name = Some(name);
    }
    if args.preview_only {
        config.premium = false;
    }
    if args.headless_audio {
        config.headless_audio = true;
    }

    let catalog_path = config
        .catalog
        .clone()
        .ok_or_else(|| anyhow!("No catalog given. Pass --catalog or set PLAYBRIDGE_CATALOG."))?;
    let catalog = JsonFileCatalog::load(&catalog_path)?;

    let playlist_id = match args.playlist {
        Some(id) => id,
        None => catalog
            .first_playlist_id()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Catalog {} has no playlists", catalog_path.display()))?,
    };
    let tracks = catalog
        .playlist_tracks(&playlist_id)
        .await
        .with_context(|| format!("Failed to load playlist {}", playlist_id))?;

    // Without a token the remote device is unreachable; previews still play.
    let premium = config.premium && args.access_token.is_some();
    if config.premium && !premium {
        log::warn!("No access token given - playing previews only");
    }
    let credential = Credential::new(
        args.access_token.unwrap_or_default(),
        now_millis() + args.token_ttl_secs * 1000,
    );
    let credentials = Arc::new(StaticCredentialProvider::new(credential));

    let core_config = config.to_core_config();
    log::info!(
        "Configuration: device_name={}, api_base_url={}, premium={}, headless_audio={}",
        core_config.device_name,
        core_config.api_base_url,
        premium,
        core_config.headless_audio
    );

    let player = bootstrap_player(&core_config, credentials.clone(), premium)
        .context("Failed to bootstrap player")?;
    if args.log_level >= log::LevelFilter::Debug {
        player
            .event_bridge
            .set_external_emitter(Arc::new(LoggingEventEmitter));
    }
    player.start_background_tasks();

    log::info!("Background tasks started");

    // Log every event as JSON for downstream tooling
    let mut events = Box::pin(player.facade.subscribe());
    let event_task = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            if let BroadcastEvent::Advisory(ref advisory) = event {
                log::warn!("Advisory: {}", advisory.message);
            }
            match serde_json::to_string(&event) {
                Ok(json) => log::info!("Event: {}", json),
                Err(e) => log::warn!("Failed to serialize event: {}", e),
            }
        }
    });

    let facade = Arc::clone(&player.facade);
    let progress_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PROGRESS_LOG_INTERVAL);
        loop {
            ticker.tick().await;
            if let Some(progress) = facade.get_progress() {
                log::info!(
                    "Progress: {} / {} ({:?}, {})",
                    format_position(progress.position_ms),
                    format_position(progress.duration_ms),
                    progress.source,
                    if progress.is_playing { "playing" } else { "paused" }
                );
            }
        }
    });

    log::info!(
        "Playing playlist {} ({} tracks) from index {}",
        playlist_id,
        tracks.len(),
        args.start
    );
    match player.facade.play_context(tracks, args.start).await {
        Ok(outcome) => log::info!("Playback started: {:?}", outcome),
        Err(e) => log::error!("Playback failed [{}]: {}", e.code(), e),
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");

    player.shutdown().await;
    progress_task.abort();
    event_task.abort();

    if credentials.refresh_requested() {
        log::warn!("The access token was rejected; supply a fresh one next run");
    }

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
