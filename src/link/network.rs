//! Network link supervisor: station mode with access-point fallback.
//!
//! ```text
//! Disconnected ──► Connecting ──► Connected
//!                      │  ▲            │ link lost
//!              timeout ▼  │ retry      ▼
//!                   ApFallback ◄── (no credentials)
//! ```
//!
//! Every mode switch first checks the radio. When the radio is mid-exchange or has unread input
//! the switch is postponed by a cooldown instead of tearing the interface down under it.

use std::fmt;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metrics;
use crate::radio::RadioActivity;
use crate::settings::WifiCredentials;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkLinkState {
    Disconnected,
    Connecting,
    Connected,
    ApFallback,
}

impl fmt::Display for NetworkLinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NetworkLinkState::Disconnected => "disconnected",
            NetworkLinkState::Connecting => "connecting",
            NetworkLinkState::Connected => "connected",
            NetworkLinkState::ApFallback => "ap-fallback",
        })
    }
}

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("network hook `{command}` could not be started: {reason}")]
    Hook { command: String, reason: String },

    #[error("network interface {0} is not available")]
    Unavailable(String),
}

/// Physical side of the network link.
pub trait NetworkDriver {
    /// Start associating with `credentials`. Progress is observed through [`link_up`].
    ///
    /// [`link_up`]: NetworkDriver::link_up
    fn begin_station(&mut self, credentials: &WifiCredentials) -> Result<(), NetworkError>;
    fn link_up(&mut self) -> bool;
    fn start_access_point(&mut self, config: &AccessPointConfig) -> Result<(), NetworkError>;
    fn stop_access_point(&mut self) -> Result<(), NetworkError>;
    fn disconnect(&mut self) -> Result<(), NetworkError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkTiming {
    pub connect_timeout_ms: u64,
    pub retry_interval_ms: u64,
    pub busy_cooldown_ms: u64,
}

impl Default for NetworkTiming {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 20_000,
            retry_interval_ms: 300_000,
            busy_cooldown_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPointConfig {
    pub ssid: String,
    /// Empty for an open access point.
    pub password: String,
    pub channel: u8,
    pub max_connections: u8,
}

impl Default for AccessPointConfig {
    fn default() -> Self {
        Self {
            ssid: "TankSync".to_string(),
            password: String::new(),
            channel: 6,
            max_connections: 2,
        }
    }
}

pub struct NetworkSupervisor {
    state: NetworkLinkState,
    credentials: Option<WifiCredentials>,
    timing: NetworkTiming,
    access_point: AccessPointConfig,
    /// Start of the current retry window (AP entry, failed AP start, or a deferral shift).
    last_retry_ms: Option<u64>,
    retry_count: u32,
    connect_started_ms: u64,
    /// Mode switches are suppressed until this time after the radio was found busy.
    hold_until_ms: Option<u64>,
}

impl NetworkSupervisor {
    pub fn new(
        credentials: Option<WifiCredentials>,
        timing: NetworkTiming,
        access_point: AccessPointConfig,
    ) -> Self {
        Self {
            state: NetworkLinkState::Disconnected,
            credentials,
            timing,
            access_point,
            last_retry_ms: None,
            retry_count: 0,
            connect_started_ms: 0,
            hold_until_ms: None,
        }
    }

    pub fn state(&self) -> NetworkLinkState {
        self.state
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    /// Initial bring-up: station mode with credentials, access point otherwise.
    pub fn start(&mut self, now_ms: u64, driver: &mut dyn NetworkDriver) -> NetworkLinkState {
        if self.credentials.is_some() {
            self.begin_connect(now_ms, driver);
        } else {
            info!("No Wi-Fi credentials stored; starting access point");
            self.enter_access_point(now_ms, driver);
        }
        self.state
    }

    /// Advance the state machine once.
    pub fn tick(
        &mut self,
        now_ms: u64,
        driver: &mut dyn NetworkDriver,
        radio: RadioActivity,
    ) -> NetworkLinkState {
        match self.state {
            NetworkLinkState::Disconnected => {
                let due = self.last_retry_ms.map_or(true, |last| {
                    now_ms.saturating_sub(last) > self.timing.retry_interval_ms
                });
                if due && self.may_switch(now_ms, radio) {
                    if self.credentials.is_some() {
                        self.begin_connect(now_ms, driver);
                    } else {
                        self.enter_access_point(now_ms, driver);
                    }
                }
            }
            NetworkLinkState::Connecting => {
                if driver.link_up() {
                    info!("Wi-Fi connected after {} attempt(s)", self.retry_count);
                    self.state = NetworkLinkState::Connected;
                    self.retry_count = 0;
                    self.hold_until_ms = None;
                } else if now_ms.saturating_sub(self.connect_started_ms)
                    > self.timing.connect_timeout_ms
                    && self.may_switch(now_ms, radio)
                {
                    warn!(
                        "Wi-Fi connect timed out after {} ms; starting access point",
                        now_ms.saturating_sub(self.connect_started_ms)
                    );
                    self.enter_access_point(now_ms, driver);
                }
            }
            NetworkLinkState::Connected => {
                if !driver.link_up() && self.may_switch(now_ms, radio) {
                    warn!("Wi-Fi link lost");
                    if self.credentials.is_some() {
                        self.begin_connect(now_ms, driver);
                    } else {
                        self.enter_access_point(now_ms, driver);
                    }
                }
            }
            NetworkLinkState::ApFallback => {
                if self.credentials.is_some() {
                    let window_start = *self.last_retry_ms.get_or_insert(now_ms);
                    if now_ms.saturating_sub(window_start) > self.timing.retry_interval_ms {
                        if radio.is_quiet() {
                            info!("Retrying Wi-Fi from access-point mode");
                            if let Err(e) = driver.stop_access_point() {
                                debug!("Stopping access point failed: {}", e);
                            }
                            self.begin_connect(now_ms, driver);
                        } else {
                            // Shift the window so the retry comes due one cooldown from now.
                            self.last_retry_ms = Some(
                                now_ms
                                    .saturating_add(self.timing.busy_cooldown_ms)
                                    .saturating_sub(self.timing.retry_interval_ms),
                            );
                            metrics::inc_network_switches_deferred();
                            debug!(
                                "Wi-Fi retry deferred {} ms (radio active)",
                                self.timing.busy_cooldown_ms
                            );
                        }
                    }
                }
            }
        }
        self.state
    }

    /// Gate for mode switches outside the access-point retry path.
    fn may_switch(&mut self, now_ms: u64, radio: RadioActivity) -> bool {
        if let Some(until) = self.hold_until_ms {
            if now_ms < until {
                return false;
            }
        }
        if !radio.is_quiet() {
            self.hold_until_ms = Some(now_ms.saturating_add(self.timing.busy_cooldown_ms));
            metrics::inc_network_switches_deferred();
            debug!(
                "Network switch from {} deferred {} ms (radio active)",
                self.state, self.timing.busy_cooldown_ms
            );
            return false;
        }
        self.hold_until_ms = None;
        true
    }

    fn begin_connect(&mut self, now_ms: u64, driver: &mut dyn NetworkDriver) {
        let Some(credentials) = self.credentials.as_ref() else {
            return;
        };
        self.retry_count += 1;
        self.connect_started_ms = now_ms;
        self.state = NetworkLinkState::Connecting;
        metrics::inc_network_connect_attempts();
        info!(
            "Connecting to Wi-Fi {} (attempt #{})",
            credentials.ssid, self.retry_count
        );
        if let Err(e) = driver.disconnect() {
            debug!("Disconnect before station start failed: {}", e);
        }
        if let Err(e) = driver.begin_station(credentials) {
            // Stay in Connecting; the connect timeout moves us to the access point.
            warn!("Station start failed: {}", e);
        }
    }

    fn enter_access_point(&mut self, now_ms: u64, driver: &mut dyn NetworkDriver) {
        if let Err(e) = driver.disconnect() {
            debug!("Disconnect before access point start failed: {}", e);
        }
        match driver.start_access_point(&self.access_point) {
            Ok(()) => {
                self.state = NetworkLinkState::ApFallback;
                info!(
                    "Access point {} up on channel {}",
                    self.access_point.ssid, self.access_point.channel
                );
                if self.credentials.is_some() {
                    debug!(
                        "Will retry Wi-Fi every {} s",
                        self.timing.retry_interval_ms / 1000
                    );
                }
            }
            Err(e) => {
                warn!("Access point start failed: {}", e);
                self.state = NetworkLinkState::Disconnected;
            }
        }
        self.last_retry_ms = Some(now_ms);
    }
}
