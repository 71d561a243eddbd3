//! # Configuration
//!
//! Runtime configuration for the receiver station, read from a TOML file. Every section and
//! field has a default, so a partial file (or an empty one) is valid.
//!
//! Device settings that the firmware lets users change in the field (radio band, calibration,
//! Wi-Fi credentials) are *not* here; they live in the settings store under
//! [`StorageConfig::settings_path`].
//!
//! ## Sections
//!
//! - [`RadioConfig`] - serial port and exchange timing for the LoRa modem
//! - [`LinkConfig`] - staleness thresholds for the radio link
//! - [`NetworkConfig`] - interface, retry timing, fallback access point and hooks
//! - [`MqttConfig`] - broker connection and topic prefix
//! - [`StorageConfig`] - settings database and status file locations
//! - [`SchedulerConfig`] - tick period and watchdog budget
//! - [`LoggingConfig`] - log level and optional log file
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tanksync::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     println!("Radio port: {}", config.radio.port);
//!     Config::create_default("config.toml").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## File format
//!
//! ```toml
//! [radio]
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//!
//! [network]
//! interface = "wlan0"
//! station_command = "nmcli device wifi connect \"$TANKSYNC_SSID\" password \"$TANKSYNC_PASSWORD\""
//!
//! [mqtt]
//! enabled = true
//! host = "192.168.0.163"
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

use crate::link::network::{AccessPointConfig, NetworkTiming};
use crate::link::sysfs::NetworkHooks;
use crate::link::LinkThresholds;
use crate::radio::RadioTiming;
use crate::station::StationOptions;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub radio: RadioConfig,
    pub link: LinkConfig,
    pub network: NetworkConfig,
    pub mqtt: MqttConfig,
    pub storage: StorageConfig,
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    pub port: String,
    pub baud_rate: u32,
    /// Deadline for the presence probe and each configuration command.
    pub exchange_timeout_ms: u64,
    /// Deadline for the modem's `+OK` after an ack send.
    pub ack_timeout_ms: u64,
    /// Sleep between polls while waiting on the modem.
    pub poll_slice_ms: u64,
    /// Quiet time after which an unterminated serial line is ended.
    pub partial_line_timeout_ms: u64,
    pub max_frames_per_tick: usize,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            exchange_timeout_ms: 1_000,
            ack_timeout_ms: 250,
            poll_slice_ms: 10,
            partial_line_timeout_ms: 1_000,
            max_frames_per_tick: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub stale_after_ms: u64,
    pub lost_after_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        let thresholds = LinkThresholds::default();
        Self {
            stale_after_ms: thresholds.stale_after_ms,
            lost_after_ms: thresholds.lost_after_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub interface: String,
    pub connect_timeout_ms: u64,
    pub retry_interval_ms: u64,
    /// How long a mode switch is postponed when the radio is active.
    pub busy_cooldown_ms: u64,
    pub ap_ssid: String,
    /// Empty for an open access point.
    pub ap_password: String,
    pub ap_channel: u8,
    pub ap_max_connections: u8,
    /// Shell command that joins the configured Wi-Fi network.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub station_command: Option<String>,
    /// Shell command that brings up the fallback access point.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ap_command: Option<String>,
    /// Shell command that tears down the current mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disconnect_command: Option<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        let timing = NetworkTiming::default();
        let ap = AccessPointConfig::default();
        Self {
            interface: "wlan0".to_string(),
            connect_timeout_ms: timing.connect_timeout_ms,
            retry_interval_ms: timing.retry_interval_ms,
            busy_cooldown_ms: timing.busy_cooldown_ms,
            ap_ssid: ap.ssid,
            ap_password: ap.password,
            ap_channel: ap.channel,
            ap_max_connections: ap.max_connections,
            station_command: None,
            ap_command: None,
            disconnect_command: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub topic_prefix: String,
    pub keep_alive_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "localhost".to_string(),
            port: 1883,
            client_id: "tanksync".to_string(),
            username: None,
            password: None,
            topic_prefix: crate::publish::DEFAULT_TOPIC_PREFIX.to_string(),
            keep_alive_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Sled database directory for device settings.
    pub settings_path: String,
    /// JSON status snapshot rewritten whenever state changes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_file: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            settings_path: "./data/settings".to_string(),
            status_file: Some("./data/status.json".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_ms: u64,
    /// Longest allowed gap between watchdog feeds before an overrun is reported.
    pub watchdog_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_ms: 50,
            watchdog_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("tanksync.log".to_string()),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.link.stale_after_ms > self.link.lost_after_ms {
            return Err(anyhow!(
                "link.stale_after_ms ({}) must not exceed link.lost_after_ms ({})",
                self.link.stale_after_ms,
                self.link.lost_after_ms
            ));
        }
        if self.radio.max_frames_per_tick == 0 {
            return Err(anyhow!("radio.max_frames_per_tick must be at least 1"));
        }
        if self.scheduler.tick_ms == 0 {
            return Err(anyhow!("scheduler.tick_ms must be at least 1"));
        }
        if self.mqtt.enabled && self.mqtt.host.trim().is_empty() {
            return Err(anyhow!("mqtt.host is required when MQTT is enabled"));
        }
        Ok(())
    }

    pub fn radio_timing(&self) -> RadioTiming {
        RadioTiming {
            exchange_timeout_ms: self.radio.exchange_timeout_ms,
            ack_timeout_ms: self.radio.ack_timeout_ms,
            partial_line_timeout_ms: self.radio.partial_line_timeout_ms.max(1),
        }
    }

    pub fn poll_slice(&self) -> Duration {
        Duration::from_millis(self.radio.poll_slice_ms.max(1))
    }

    pub fn thresholds(&self) -> LinkThresholds {
        LinkThresholds {
            stale_after_ms: self.link.stale_after_ms,
            lost_after_ms: self.link.lost_after_ms,
        }
    }

    pub fn network_timing(&self) -> NetworkTiming {
        NetworkTiming {
            connect_timeout_ms: self.network.connect_timeout_ms,
            retry_interval_ms: self.network.retry_interval_ms,
            busy_cooldown_ms: self.network.busy_cooldown_ms,
        }
    }

    pub fn access_point(&self) -> AccessPointConfig {
        AccessPointConfig {
            ssid: self.network.ap_ssid.clone(),
            password: self.network.ap_password.clone(),
            channel: self.network.ap_channel,
            max_connections: self.network.ap_max_connections,
        }
    }

    pub fn network_hooks(&self) -> NetworkHooks {
        NetworkHooks {
            station: self.network.station_command.clone(),
            access_point: self.network.ap_command.clone(),
            disconnect: self.network.disconnect_command.clone(),
        }
    }

    pub fn station_options(&self) -> StationOptions {
        StationOptions {
            thresholds: self.thresholds(),
            max_frames_per_tick: self.radio.max_frames_per_tick,
            topic_prefix: self.mqtt.topic_prefix.clone(),
            status_file: self.storage.status_file.as_ref().map(PathBuf::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_all_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.radio.baud_rate, 115_200);
        assert_eq!(config.link.stale_after_ms, 600_000);
        assert_eq!(config.link.lost_after_ms, 900_000);
        assert_eq!(config.network.ap_ssid, "TankSync");
        assert_eq!(config.network.ap_channel, 6);
        assert_eq!(config.scheduler.tick_ms, 50);
        assert!(!config.mqtt.enabled);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [radio]
            port = "/dev/ttyAMA0"

            [network]
            busy_cooldown_ms = 5000
            "#,
        )
        .unwrap();
        assert_eq!(config.radio.port, "/dev/ttyAMA0");
        assert_eq!(config.radio.exchange_timeout_ms, 1_000);
        assert_eq!(config.radio_timing().partial_line_timeout_ms, 1_000);
        assert_eq!(config.network_timing().busy_cooldown_ms, 5_000);
        assert_eq!(config.network_timing().retry_interval_ms, 300_000);
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let mut config = Config::default();
        config.link.stale_after_ms = 1_000_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.storage.settings_path, "./data/settings");
        assert_eq!(back.mqtt.topic_prefix, "tank");
        assert!(back.network.station_command.is_none());
    }
}
