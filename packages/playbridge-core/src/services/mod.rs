//! Application services layer.
//!
//! This module contains the playback logic that sits between the public
//! façade and the infrastructure (remote/, local/).

mod coalesce;
pub mod health_monitor;
pub mod playback_facade;
pub mod playback_state_store;
pub mod queue_navigator;
pub mod session_machine;

#[cfg(test)]
pub(crate) mod test_support;

pub use health_monitor::HealthMonitor;
pub use playback_facade::{Outcome, PlaybackFacade};
pub use playback_state_store::PlaybackStateStore;
pub use queue_navigator::{Navigation, Queue, QueueNavigator, QueueOrigin};
pub use session_machine::{HealthVerdict, PlayOutcome, PlayRequest, RemoteCommand, SessionStateMachine};
