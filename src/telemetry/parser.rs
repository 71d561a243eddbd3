//! Wire grammar for received radio frames and the tank telemetry payload.
//!
//! ```text
//! +RCV=<sender>,<length>,<payload>,<rssi>,<snr>
//! TANK:<distanceCm>:<batteryPercent>:<batteryVoltage>:<msgId>
//! ```
//!
//! The payload never contains commas (the sensor only emits the `TANK:` form), so the frame is
//! split on `,` and only its first five fields are read. Extra trailing fields are ignored.

use thiserror::Error;

pub const FRAME_PREFIX: &str = "+RCV=";
pub const TANK_TAG: &str = "TANK:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("line is not a received frame")]
    NotAFrame,
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("unparseable field `{0}`")]
    BadField(&'static str),
    #[error("payload is not tank telemetry")]
    NotTelemetry,
}

/// Outer frame as reported by the modem. `length` is the modem's byte count for `payload`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RcvFrame<'a> {
    pub sender: u16,
    pub length: usize,
    pub payload: &'a str,
    pub rssi: i32,
    pub snr: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TankPacket {
    pub distance_cm: i32,
    pub battery_percent: i32,
    pub battery_voltage: f32,
    pub message_id: u32,
}

/// The received frame inside `line`, skipping line noise glued in front of the prefix.
pub fn frame_start(line: &str) -> Option<&str> {
    line.find(FRAME_PREFIX).map(|pos| &line[pos..])
}

pub fn parse_frame(line: &str) -> Result<RcvFrame<'_>, FrameError> {
    let body = line.strip_prefix(FRAME_PREFIX).ok_or(FrameError::NotAFrame)?;
    let mut fields = body.split(',');

    let sender = parse_field(fields.next(), "sender")?;
    let length = parse_field(fields.next(), "length")?;
    let payload = fields.next().ok_or(FrameError::MissingField("payload"))?;
    let rssi = parse_field(fields.next(), "rssi")?;
    let snr = parse_field(fields.next(), "snr")?;

    Ok(RcvFrame {
        sender,
        length,
        payload,
        rssi,
        snr,
    })
}

pub fn parse_tank_payload(payload: &str) -> Result<TankPacket, FrameError> {
    let body = payload
        .strip_prefix(TANK_TAG)
        .ok_or(FrameError::NotTelemetry)?;
    let mut fields = body.split(':');

    Ok(TankPacket {
        distance_cm: parse_field(fields.next(), "distance")?,
        battery_percent: parse_field(fields.next(), "battery")?,
        battery_voltage: parse_field(fields.next(), "voltage")?,
        message_id: parse_field(fields.next(), "msgId")?,
    })
}

fn parse_field<T: std::str::FromStr>(
    field: Option<&str>,
    name: &'static str,
) -> Result<T, FrameError> {
    let raw = field.ok_or(FrameError::MissingField(name))?.trim();
    if raw.is_empty() {
        return Err(FrameError::MissingField(name));
    }
    raw.parse().map_err(|_| FrameError::BadField(name))
}
