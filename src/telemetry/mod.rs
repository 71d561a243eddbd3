//! Telemetry ingestion: decode received lines, validate, acknowledge and update the record.
//!
//! [`TelemetryIngest`] is the single writer of the [`TelemetryRecord`]. Everything else reads
//! snapshots. Drops are silent apart from a debug log line and the returned [`ParseOutcome`].

pub mod parser;

use log::{debug, info};
use serde::Serialize;

use crate::logutil::escape_log;
use crate::metrics;
use crate::tank::{compute_level, Calibration};

use parser::{frame_start, parse_frame, parse_tank_payload, FrameError};

/// Shortest distance the ultrasonic sensor reports reliably.
pub const SENSOR_MIN_READING: i32 = 10;
/// Longest distance the ultrasonic sensor reports reliably.
pub const SENSOR_MAX_READING: i32 = 400;

/// Latest reading from the sensor node.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct TelemetryRecord {
    pub raw_distance_cm: i32,
    pub water_level_cm: i32,
    pub water_percent: u8,
    pub water_liters: f32,
    pub tank_capacity: f32,
    pub battery_percent: u8,
    pub battery_voltage: f32,
    pub rssi: i32,
    pub snr: i32,
    /// Monotonic milliseconds of the last accepted packet.
    pub last_update_ms: u64,
    pub message_id: u32,
    pub data_valid: bool,
    pub packets_received: u64,
}

/// Outbound acknowledgment path, implemented by the radio transport.
pub trait AckSink {
    /// Send `ACK:<message_id>` to `address`. Returns whether the modem confirmed the send.
    fn send_ack(&mut self, address: u16, message_id: u32) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutcome {
    /// Not a received frame (modem chatter, stray replies).
    Ignored,
    Malformed(FrameError),
    /// Valid frame with a payload that is not tank telemetry. Signal quality was updated.
    NotTelemetry,
    OutOfRange { distance_cm: i32 },
    Accepted {
        sender: u16,
        message_id: u32,
        /// Whether the ack send was confirmed by the modem.
        ack: bool,
    },
}

pub struct TelemetryIngest {
    record: TelemetryRecord,
    calibration: Calibration,
    new_data: bool,
}

impl TelemetryIngest {
    pub fn new(calibration: Calibration) -> Self {
        let record = TelemetryRecord {
            tank_capacity: calibration.capacity_liters(),
            ..TelemetryRecord::default()
        };
        Self {
            record,
            calibration,
            new_data: false,
        }
    }

    pub fn record(&self) -> &TelemetryRecord {
        &self.record
    }

    pub fn snapshot(&self) -> TelemetryRecord {
        self.record
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// Swap in a new calibration and recompute derived values for the current reading.
    pub fn set_calibration(&mut self, calibration: Calibration) {
        self.calibration = calibration;
        self.record.tank_capacity = calibration.capacity_liters();
        if self.record.data_valid {
            self.apply_level(self.record.raw_distance_cm);
            self.new_data = true;
        }
    }

    /// Edge-triggered: true once after each accepted packet (or recalibration of valid data).
    pub fn take_new_data(&mut self) -> bool {
        std::mem::take(&mut self.new_data)
    }

    /// Process one inbound line received at `now_ms`.
    pub fn on_line(&mut self, line: &str, now_ms: u64, acks: &mut dyn AckSink) -> ParseOutcome {
        let Some(line) = frame_start(line) else {
            return ParseOutcome::Ignored;
        };

        let frame = match parse_frame(line) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Dropping frame ({}): {}", e, escape_log(line));
                return ParseOutcome::Malformed(e);
            }
        };
        metrics::inc_frames_received();
        self.record.rssi = frame.rssi;
        self.record.snr = frame.snr;

        let packet = match parse_tank_payload(frame.payload) {
            Ok(packet) => packet,
            Err(FrameError::NotTelemetry) => {
                debug!(
                    "Non-telemetry payload from {}: {}",
                    frame.sender,
                    escape_log(frame.payload)
                );
                return ParseOutcome::NotTelemetry;
            }
            Err(e) => {
                debug!("Dropping payload ({}): {}", e, escape_log(frame.payload));
                return ParseOutcome::Malformed(e);
            }
        };

        if !(SENSOR_MIN_READING..=SENSOR_MAX_READING).contains(&packet.distance_cm) {
            debug!(
                "Dropping out-of-range reading {} cm (msg {})",
                packet.distance_cm, packet.message_id
            );
            return ParseOutcome::OutOfRange {
                distance_cm: packet.distance_cm,
            };
        }

        let ack = acks.send_ack(frame.sender, packet.message_id);

        self.apply_level(packet.distance_cm);
        self.record.battery_percent = packet.battery_percent.clamp(0, 100) as u8;
        self.record.battery_voltage = packet.battery_voltage;
        self.record.message_id = packet.message_id;
        self.record.last_update_ms = now_ms;
        self.record.data_valid = true;
        self.record.packets_received += 1;
        self.new_data = true;

        info!(
            "Tank {}% ({:.1} L) from node {} msg {} rssi {} snr {}",
            self.record.water_percent,
            self.record.water_liters,
            frame.sender,
            packet.message_id,
            frame.rssi,
            frame.snr
        );

        ParseOutcome::Accepted {
            sender: frame.sender,
            message_id: packet.message_id,
            ack,
        }
    }

    fn apply_level(&mut self, raw_distance_cm: i32) {
        let level = compute_level(raw_distance_cm, &self.calibration);
        self.record.raw_distance_cm = raw_distance_cm;
        self.record.water_level_cm = level.level_cm;
        self.record.water_percent = level.percent;
        self.record.water_liters = level.liters;
    }
}
