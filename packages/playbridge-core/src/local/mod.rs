//! Local preview playback used when the remote device is unavailable.

#[cfg(feature = "device-audio")]
mod device_output;
mod output;
mod player;

#[cfg(feature = "device-audio")]
pub use device_output::DeviceOutput;
pub use output::{AudioOutput, ClockedOutput, OutputError, OutputEvent};
pub use player::{LocalFallbackPlayer, LocalSignal};
