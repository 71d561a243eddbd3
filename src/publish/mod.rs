//! Outbound publication of telemetry by topic.
//!
//! The station only talks to a [`PublishSink`]. The MQTT implementation lives behind the `mqtt`
//! feature; [`LogSink`] writes the same messages to the log when no broker is configured.

#[cfg(feature = "mqtt")]
pub mod mqtt;

use log::info;
use thiserror::Error;

use crate::link::RadioLinkState;
use crate::telemetry::TelemetryRecord;

pub const DEFAULT_TOPIC_PREFIX: &str = "tank";

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("publish to {topic} rejected: {reason}")]
    Rejected { topic: String, reason: String },
}

pub trait PublishSink {
    fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> Result<(), PublishError>;

    /// Whether a publish right now would reach a broker.
    fn is_connected(&self) -> bool {
        true
    }

    /// Increments on every (re)connect. A change means retained state should be refreshed.
    fn session(&self) -> u64 {
        0
    }
}

/// Topic/payload pairs for one telemetry update, in publish order.
pub fn telemetry_messages(
    prefix: &str,
    record: &TelemetryRecord,
    radio_state: RadioLinkState,
) -> Vec<(String, String)> {
    let topic = |name: &str| format!("{}/{}", prefix.trim_end_matches('/'), name);
    vec![
        (topic("water_level"), record.water_level_cm.to_string()),
        (topic("water_percent"), record.water_percent.to_string()),
        (topic("water_liters"), format!("{:.1}", record.water_liters)),
        (topic("battery_percent"), record.battery_percent.to_string()),
        (topic("battery_voltage"), format!("{:.2}", record.battery_voltage)),
        (topic("rssi"), record.rssi.to_string()),
        (topic("snr"), record.snr.to_string()),
        (topic("status"), radio_state.label().to_string()),
        (topic("packets_received"), record.packets_received.to_string()),
    ]
}

/// Publish the full retained topic set. Nothing is sent before the first valid packet.
/// Returns the number of messages handed to the sink.
pub fn publish_telemetry(
    sink: &mut dyn PublishSink,
    prefix: &str,
    record: &TelemetryRecord,
    radio_state: RadioLinkState,
) -> Result<usize, PublishError> {
    if !record.data_valid {
        return Ok(0);
    }
    let messages = telemetry_messages(prefix, record, radio_state);
    for (topic, payload) in &messages {
        sink.publish(topic, payload, true)?;
    }
    Ok(messages.len())
}

/// Sink that logs each message. Used when MQTT is disabled.
#[derive(Debug, Default)]
pub struct LogSink;

impl PublishSink for LogSink {
    fn publish(&mut self, topic: &str, payload: &str, _retain: bool) -> Result<(), PublishError> {
        info!("publish {} = {}", topic, payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Capture(Vec<(String, String, bool)>);

    impl PublishSink for Capture {
        fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> Result<(), PublishError> {
            self.0.push((topic.into(), payload.into(), retain));
            Ok(())
        }
    }

    fn sample() -> TelemetryRecord {
        TelemetryRecord {
            water_level_cm: 75,
            water_percent: 83,
            water_liters: 785.4167,
            battery_percent: 80,
            battery_voltage: 3.7,
            rssi: -60,
            snr: 7,
            data_valid: true,
            packets_received: 3,
            ..TelemetryRecord::default()
        }
    }

    #[test]
    fn formats_payloads() {
        let messages = telemetry_messages("tank", &sample(), RadioLinkState::Connected);
        let get = |t: &str| {
            messages
                .iter()
                .find(|(topic, _)| topic == t)
                .map(|(_, p)| p.as_str())
        };
        assert_eq!(get("tank/water_liters"), Some("785.4"));
        assert_eq!(get("tank/battery_voltage"), Some("3.70"));
        assert_eq!(get("tank/status"), Some("OK"));
        assert_eq!(get("tank/packets_received"), Some("3"));
        assert_eq!(messages.len(), 9);
    }

    #[test]
    fn nothing_before_first_packet() {
        let mut sink = Capture::default();
        let sent = publish_telemetry(
            &mut sink,
            "tank",
            &TelemetryRecord::default(),
            RadioLinkState::Waiting,
        )
        .unwrap();
        assert_eq!(sent, 0);
        assert!(sink.0.is_empty());
    }

    #[test]
    fn messages_are_retained() {
        let mut sink = Capture::default();
        publish_telemetry(&mut sink, "farm/tank/", &sample(), RadioLinkState::Stale).unwrap();
        assert!(sink.0.iter().all(|(_, _, retain)| *retain));
        assert_eq!(sink.0[0].0, "farm/tank/water_level");
    }
}
