//! Player configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Player configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Base URL of the playback control plane.
    /// Override: `PLAYBRIDGE_API_BASE_URL`
    pub api_base_url: Option<String>,

    /// Name of the device to register and transfer playback to.
    /// Override: `PLAYBRIDGE_DEVICE_NAME`
    pub device_name: Option<String>,

    /// Whether the account may control the remote device.
    /// Override: `PLAYBRIDGE_PREMIUM`
    pub premium: bool,

    /// Interval between liveness polls in milliseconds.
    /// Override: `PLAYBRIDGE_HEALTH_POLL_INTERVAL_MS`
    pub health_poll_interval_ms: Option<u64>,

    /// Interval between device enumeration checks in seconds.
    pub device_scan_interval_secs: Option<u64>,

    /// Reconnect cycles before giving up on the remote device.
    /// Override: `PLAYBRIDGE_MAX_RECONNECT_ATTEMPTS`
    pub max_reconnect_attempts: Option<u32>,

    /// Pause after a transfer before playing, in milliseconds.
    pub transfer_settle_delay_ms: Option<u64>,

    /// Keep previews on a virtual clock instead of the sound device.
    /// Override: `PLAYBRIDGE_HEADLESS_AUDIO`
    pub headless_audio: bool,

    /// JSON catalog file with playlists.
    /// Override: `PLAYBRIDGE_CATALOG`
    pub catalog: Option<PathBuf>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            api_base_url: None,
            device_name: None,
            premium: true,
            health_poll_interval_ms: None,
            device_scan_interval_secs: None,
            max_reconnect_attempts: None,
            transfer_settle_delay_ms: None,
            headless_audio: false,
            catalog: None,
        }
    }
}

impl PlayerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Applies `PLAYBRIDGE_*` overrides from `lookup`.
    ///
    /// Values that fail to parse are ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("PLAYBRIDGE_API_BASE_URL") {
            self.api_base_url = Some(val);
        }

        if let Some(val) = lookup("PLAYBRIDGE_DEVICE_NAME") {
            self.device_name = Some(val);
        }

        if let Some(val) = lookup("PLAYBRIDGE_PREMIUM") {
            if let Ok(premium) = val.parse() {
                self.premium = premium;
            }
        }

        if let Some(val) = lookup("PLAYBRIDGE_HEALTH_POLL_INTERVAL_MS") {
            if let Ok(interval) = val.parse() {
                self.health_poll_interval_ms = Some(interval);
            }
        }

        if let Some(val) = lookup("PLAYBRIDGE_MAX_RECONNECT_ATTEMPTS") {
            if let Ok(attempts) = val.parse() {
                self.max_reconnect_attempts = Some(attempts);
            }
        }

        if let Some(val) = lookup("PLAYBRIDGE_HEADLESS_AUDIO") {
            if let Ok(headless) = val.parse() {
                self.headless_audio = headless;
            }
        }

        if let Some(val) = lookup("PLAYBRIDGE_CATALOG") {
            self.catalog = Some(PathBuf::from(val));
        }

        // Note: PLAYBRIDGE_ACCESS_TOKEN is handled by clap via #[arg(env = ...)] in main.rs
    }

    /// Converts to playbridge-core's Config type.
    pub fn to_core_config(&self) -> playbridge_core::Config {
        let defaults = playbridge_core::Config::default();
        playbridge_core::Config {
            api_base_url: self.api_base_url.clone().unwrap_or(defaults.api_base_url),
            device_name: self.device_name.clone().unwrap_or(defaults.device_name),
            health_poll_interval_ms: self
                .health_poll_interval_ms
                .unwrap_or(defaults.health_poll_interval_ms),
            device_scan_interval_secs: self
                .device_scan_interval_secs
                .unwrap_or(defaults.device_scan_interval_secs),
            max_reconnect_attempts: self
                .max_reconnect_attempts
                .unwrap_or(defaults.max_reconnect_attempts),
            transfer_settle_delay_ms: self
                .transfer_settle_delay_ms
                .unwrap_or(defaults.transfer_settle_delay_ms),
            headless_audio: self.headless_audio,
            ..defaults
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn loads_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "device_name: Kitchen Player\npremium: false\nmax_reconnect_attempts: 4"
        )
        .unwrap();

        let mut config: PlayerConfig =
            serde_yaml::from_str(&std::fs::read_to_string(file.path()).unwrap()).unwrap();
        config.apply_overrides(|_| None);

        assert_eq!(config.device_name.as_deref(), Some("Kitchen Player"));
        assert!(!config.premium);

        let core = config.to_core_config();
        assert_eq!(core.device_name, "Kitchen Player");
        assert_eq!(core.max_reconnect_attempts, 4);
        assert_eq!(
            core.health_poll_interval_ms,
            playbridge_core::Config::default().health_poll_interval_ms
        );
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = PlayerConfig::load(Some(&dir.path().join("absent.yaml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "premium: [not, a, bool]").unwrap();

        let err = PlayerConfig::load(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn overrides_replace_file_values() {
        let vars: HashMap<&str, &str> = [
            ("PLAYBRIDGE_DEVICE_NAME", "Den"),
            ("PLAYBRIDGE_PREMIUM", "false"),
            ("PLAYBRIDGE_HEALTH_POLL_INTERVAL_MS", "not-a-number"),
            ("PLAYBRIDGE_HEADLESS_AUDIO", "true"),
        ]
        .into_iter()
        .collect();

        let mut config = PlayerConfig {
            device_name: Some("Kitchen".into()),
            health_poll_interval_ms: Some(5_000),
            ..Default::default()
        };
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.device_name.as_deref(), Some("Den"));
        assert!(!config.premium);
        assert_eq!(config.health_poll_interval_ms, Some(5_000));
        assert!(config.headless_audio);
        assert!(config.to_core_config().headless_audio);
    }
}
