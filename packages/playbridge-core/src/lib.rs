//! Playbridge Core - remote playback session manager with local preview fallback.
//!
//! This crate establishes, supervises and repairs a long-lived registration
//! with an external playback device, mediates between a manually tracked
//! queue and the device's own queue, and falls back to local preview audio
//! when the device becomes unreachable.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`runtime`]: Task spawning abstraction for async runtime independence
//! - [`events`]: Event system for UI subscribers
//! - [`state`]: Configuration
//! - [`remote`]: Remote device control (REST control plane)
//! - [`local`]: Local preview playback
//! - [`services`]: Session state machine, health monitor, queue navigator, façade
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! The crate defines several traits to decouple core logic from platform-specific
//! implementations:
//!
//! - [`TaskSpawner`](runtime::TaskSpawner): Spawning background tasks
//! - [`EventEmitter`](events::EventEmitter): Emitting domain events
//! - [`CredentialProvider`](credentials::CredentialProvider): Bearer tokens
//! - [`RemoteDeviceClient`](remote::RemoteDeviceClient): The playback device
//! - [`AudioOutput`](local::AudioOutput): Local audio sink
//! - [`CatalogService`](catalog::CatalogService): Playlist source

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod bootstrap;
pub mod catalog;
pub mod credentials;
pub mod error;
pub mod events;
pub mod local;
pub mod protocol_constants;
pub mod remote;
pub mod runtime;
pub mod services;
pub mod state;
pub mod types;
pub mod utils;

// Re-export commonly used types at the crate root
pub use catalog::{CatalogService, PlaylistSummary};
pub use credentials::{CredentialProvider, StaticCredentialProvider};
pub use error::{ErrorCode, PlaybackError, PlaybackResult};
pub use events::{
    AdvisoryEvent, AdvisoryKind, BroadcastEvent, BroadcastEventBridge, EventEmitter,
    LoggingEventEmitter, PlaybackEvent, SessionEvent,
};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use state::Config;
pub use types::{
    Classifier, Credential, Device, DeviceKind, PlaybackSource, PlaybackState, Progress,
    Session, SessionState, Track, TrackTags,
};
pub use utils::now_millis;

// Re-export remote and local types
#[cfg(feature = "device-audio")]
pub use local::DeviceOutput;
pub use local::{AudioOutput, ClockedOutput, LocalFallbackPlayer};
pub use remote::{HttpDeviceClient, RemoteDeviceClient, RemoteError};

// Re-export service types
pub use services::{Outcome, PlaybackFacade, Queue, QueueOrigin};

// Re-export bootstrap types
pub use bootstrap::{bootstrap_player, bootstrap_with, BootstrapError, BootstrappedPlayer};
