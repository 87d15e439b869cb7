//! Remote playback device control.
//!
//! This module talks to the vendor playback backend on behalf of the
//! session state machine.
//!
//! # Module Structure
//!
//! - `error` - Transport-level error type and status classification
//! - `traits` - Trait abstractions for testability
//! - `client` - `HttpDeviceClient` concrete trait implementation over REST

pub mod client;
pub mod error;
pub mod traits;

// Re-export error types
pub use error::{RemoteError, RemoteResult};

// Re-export trait abstractions
pub use traits::{RemoteDeviceClient, RemoteDiscovery, RemotePlayback};

// Re-export concrete implementation
pub use client::HttpDeviceClient;
