//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where all
//! services are instantiated and wired together.

use std::sync::Arc;

use reqwest::Client;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::credentials::CredentialProvider;
use crate::events::BroadcastEventBridge;
#[cfg(feature = "device-audio")]
use crate::local::DeviceOutput;
use crate::local::{AudioOutput, ClockedOutput};
use crate::remote::{HttpDeviceClient, RemoteDeviceClient};
use crate::runtime::TokioSpawner;
use crate::services::PlaybackFacade;
use crate::state::Config;

/// Errors raised while wiring services.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to create HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Failed to start audio output: {0}")]
    AudioOutput(#[from] std::io::Error),
}

/// Container for all bootstrapped services.
#[derive(Clone)]
pub struct BootstrappedPlayer {
    /// Public playback surface.
    pub facade: Arc<PlaybackFacade>,
    /// Event bridge for subscribers and optional external emitters.
    pub event_bridge: BroadcastEventBridge,
    /// Task spawner for background operations.
    pub spawner: TokioSpawner,
    /// Cancellation token for graceful shutdown.
    pub cancel_token: CancellationToken,
}

impl BootstrappedPlayer {
    /// Spawns the health monitor and the local output event pump.
    pub fn start_background_tasks(&self) {
        self.facade.start(&self.spawner);
    }

    /// Initiates graceful shutdown of all services.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");
        self.facade.logout().await;
        self.facade.shutdown();
        self.cancel_token.cancel();
        log::info!("[Bootstrap] Shutdown complete");
    }
}

/// Creates the shared HTTP client for control-plane calls.
fn create_http_client(config: &Config) -> Result<Client, BootstrapError> {
    Ok(Client::builder().timeout(config.request_timeout()).build()?)
}

/// Creates the local preview output.
///
/// Clips play on the sound device unless `headless_audio` is set or the
/// crate was built without `device-audio`.
fn create_audio_output(
    config: &Config,
    http_client: &Client,
) -> Result<Arc<dyn AudioOutput>, BootstrapError> {
    if !config.headless_audio {
        if let Some(output) = device_output(config, http_client)? {
            return Ok(output);
        }
    }
    log::info!("[Bootstrap] Using headless preview output");
    Ok(Arc::new(ClockedOutput::new(
        config.preview_length_ms,
        config.preview_tick_ms,
    )))
}

#[cfg(feature = "device-audio")]
fn device_output(
    config: &Config,
    http_client: &Client,
) -> Result<Option<Arc<dyn AudioOutput>>, BootstrapError> {
    let output = DeviceOutput::new(
        http_client.clone(),
        config.preview_length_ms,
        config.preview_tick_ms,
    )?;
    Ok(Some(Arc::new(output)))
}

#[cfg(not(feature = "device-audio"))]
fn device_output(
    _config: &Config,
    _http_client: &Client,
) -> Result<Option<Arc<dyn AudioOutput>>, BootstrapError> {
    log::warn!("[Bootstrap] Built without device-audio; previews will not be audible");
    Ok(None)
}

/// Bootstraps the player against the HTTP control plane.
///
/// Wiring order:
/// 1. Shared infrastructure (HTTP client, event bridge, cancellation token)
/// 2. Remote device client (depends on HTTP client and credentials)
/// 3. Preview audio output (shares the HTTP client for clip downloads)
/// 4. Façade and the services behind it
///
/// # Errors
///
/// Returns an error if the configuration is invalid, the HTTP client
/// cannot be built or the audio thread cannot be started.
pub fn bootstrap_player(
    config: &Config,
    credentials: Arc<dyn CredentialProvider>,
    premium_eligible: bool,
) -> Result<BootstrappedPlayer, BootstrapError> {
    config.validate().map_err(BootstrapError::InvalidConfig)?;

    let http_client = create_http_client(config)?;
    let output = create_audio_output(config, &http_client)?;
    let remote = Arc::new(HttpDeviceClient::new(
        http_client,
        config.api_base_url.clone(),
        config.device_name.clone(),
        credentials,
    ));

    bootstrap_with(config, remote, output, premium_eligible)
}

/// Bootstraps the player with caller-supplied backends.
///
/// Must be called from within a Tokio runtime.
pub fn bootstrap_with(
    config: &Config,
    remote: Arc<dyn RemoteDeviceClient>,
    output: Arc<dyn AudioOutput>,
    premium_eligible: bool,
) -> Result<BootstrappedPlayer, BootstrapError> {
    config.validate().map_err(BootstrapError::InvalidConfig)?;

    let spawner = TokioSpawner::current();
    let event_bridge = BroadcastEventBridge::new(config.event_channel_capacity);
    let cancel_token = CancellationToken::new();

    let facade = PlaybackFacade::new(
        config,
        remote,
        output,
        event_bridge.clone(),
        premium_eligible,
        cancel_token.child_token(),
    );

    log::info!(
        "[Bootstrap] Player '{}' ready (premium: {})",
        config.device_name,
        premium_eligible
    );

    Ok(BootstrappedPlayer {
        facade,
        event_bridge,
        spawner,
        cancel_token,
    })
}
