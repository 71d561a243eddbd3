//! Link health: the radio side is derived every tick from hardware presence and reading age;
//! the network side is a stateful supervisor in [`network`].

pub mod network;
pub mod sysfs;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::radio::HardwarePresence;
use crate::telemetry::TelemetryRecord;

pub const DEFAULT_STALE_AFTER_MS: u64 = 10 * 60 * 1000;
pub const DEFAULT_LOST_AFTER_MS: u64 = 15 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RadioLinkState {
    /// Presence probe has not completed.
    Starting,
    /// Radio is up but no valid packet has arrived yet.
    Waiting,
    Connected,
    Stale,
    /// No packet for too long, or hardware absent.
    Lost,
}

impl RadioLinkState {
    /// Short label used on the display and in the published status topic.
    pub fn label(&self) -> &'static str {
        match self {
            RadioLinkState::Connected => "OK",
            RadioLinkState::Stale => "Stale",
            RadioLinkState::Lost => "Lost",
            RadioLinkState::Starting | RadioLinkState::Waiting => "Wait",
        }
    }
}

impl fmt::Display for RadioLinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RadioLinkState::Starting => "starting",
            RadioLinkState::Waiting => "waiting",
            RadioLinkState::Connected => "connected",
            RadioLinkState::Stale => "stale",
            RadioLinkState::Lost => "lost",
        };
        f.write_str(name)
    }
}

/// Age limits for the last accepted packet. `stale_after_ms <= lost_after_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkThresholds {
    pub stale_after_ms: u64,
    pub lost_after_ms: u64,
}

impl Default for LinkThresholds {
    fn default() -> Self {
        Self {
            stale_after_ms: DEFAULT_STALE_AFTER_MS,
            lost_after_ms: DEFAULT_LOST_AFTER_MS,
        }
    }
}

/// Radio link state at `now_ms`. Pure; the clock going backwards reads as age zero.
pub fn derive_radio_state(
    presence: HardwarePresence,
    record: &TelemetryRecord,
    now_ms: u64,
    thresholds: &LinkThresholds,
) -> RadioLinkState {
    match presence {
        HardwarePresence::Unknown => RadioLinkState::Starting,
        HardwarePresence::Absent => RadioLinkState::Lost,
        HardwarePresence::Present if !record.data_valid => RadioLinkState::Waiting,
        HardwarePresence::Present => {
            let age = now_ms.saturating_sub(record.last_update_ms);
            if age <= thresholds.stale_after_ms {
                RadioLinkState::Connected
            } else if age <= thresholds.lost_after_ms {
                RadioLinkState::Stale
            } else {
                RadioLinkState::Lost
            }
        }
    }
}
