//! JSON status snapshot for display and web collaborators.
//!
//! Written with write-then-rename so readers never observe a half-written file.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::link::network::NetworkLinkState;
use crate::link::RadioLinkState;
use crate::metrics;
use crate::radio::HardwarePresence;
use crate::telemetry::TelemetryRecord;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub updated_at: DateTime<Utc>,
    pub radio_state: RadioLinkState,
    /// Display label: "OK", "Stale", "Lost", "Wait" or "HW ERROR".
    pub status: String,
    pub network_state: NetworkLinkState,
    pub hardware: HardwarePresence,
    pub data_valid: bool,
    pub water_percent: u8,
    pub water_level_cm: i32,
    pub water_liters: f32,
    pub tank_capacity: f32,
    pub raw_distance_cm: i32,
    pub battery_percent: u8,
    pub battery_voltage: f32,
    pub rssi: i32,
    pub snr: i32,
    pub packets_received: u64,
    /// Wall-clock time of the last accepted packet. The file is only rewritten on changes, so
    /// readers derive the current age from this rather than from `age_secs`.
    pub last_update: Option<DateTime<Utc>>,
    /// Seconds since the last accepted packet, as of `updated_at`.
    pub age_secs: Option<u64>,
    pub counters: metrics::Snapshot,
}

impl StatusSnapshot {
    pub fn capture(
        record: &TelemetryRecord,
        radio_state: RadioLinkState,
        network_state: NetworkLinkState,
        hardware: HardwarePresence,
        now_ms: u64,
    ) -> Self {
        let status = if hardware == HardwarePresence::Absent {
            "HW ERROR".to_string()
        } else {
            radio_state.label().to_string()
        };
        let updated_at = Utc::now();
        let age_ms = record
            .data_valid
            .then(|| now_ms.saturating_sub(record.last_update_ms));
        let last_update = age_ms.and_then(|ms| {
            updated_at.checked_sub_signed(chrono::Duration::milliseconds(
                i64::try_from(ms).unwrap_or(i64::MAX),
            ))
        });
        Self {
            updated_at,
            radio_state,
            status,
            network_state,
            hardware,
            data_valid: record.data_valid,
            water_percent: record.water_percent,
            water_level_cm: record.water_level_cm,
            water_liters: record.water_liters,
            tank_capacity: record.tank_capacity,
            raw_distance_cm: record.raw_distance_cm,
            battery_percent: record.battery_percent,
            battery_voltage: record.battery_voltage,
            rssi: record.rssi,
            snr: record.snr,
            packets_received: record.packets_received,
            last_update,
            age_secs: age_ms.map(|ms| ms / 1000),
            counters: metrics::snapshot(),
        }
    }

    pub fn write_atomic(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;
        let base = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("status.json");
        let tmp_path = dir.join(format!(".{}.tmp-{}", base, std::process::id()));
        {
            let mut tmp = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            tmp.write_all(json.as_bytes())?;
            tmp.flush()?;
        }
        fs::rename(&tmp_path, path)?;
        if let Ok(dir_file) = File::open(dir) {
            let _ = dir_file.sync_all();
        }
        Ok(())
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}
