//! # TankSync - LoRa water tank telemetry receiver
//!
//! TankSync listens to a remote ultrasonic tank sensor over an RYLR998-class LoRa modem,
//! turns raw distance readings into a water level, supervises both the radio link and the
//! upstream network link, and hands fresh readings to an MQTT publisher.
//!
//! ## Features
//!
//! - **Half-duplex radio transport**: `AT` command/response exchanges with bounded, polled
//!   timeouts over a serial link that only the transport may touch.
//! - **Packet ingestion**: `+RCV=` frame parsing, range validation and best-effort `ACK:`
//!   replies to the sensor node.
//! - **Tank math**: calibrated distance to level / percent / liters conversion.
//! - **Link supervision**: derived radio link health (fresh, stale, lost) and a network state
//!   machine with access-point fallback that never switches modes mid radio exchange.
//! - **Cooperative scheduling**: one thread, bounded ticks, a watchdog fed at every yield.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tanksync::config::Config;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("tanksync.toml").await?;
//!     println!("Radio port: {}", config.radio.port);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`clock`] - monotonic time, the poll-with-deadline primitive and the watchdog
//! - [`radio`] - serial transport, line framing and the RadioBusy flag
//! - [`telemetry`] - telemetry record, wire parser and acknowledgment
//! - [`tank`] - calibration and level calculation
//! - [`link`] - radio and network link supervision
//! - [`settings`] - persisted device settings (sled)
//! - [`publish`] - publish sinks (MQTT, log)
//! - [`station`] - the scheduler tying everything together
//! - [`config`] - TOML configuration
//! - [`metrics`] / [`logutil`] - counters and log-safe rendering of radio traffic
//!
//! ## Architecture
//!
//! ```text
//! serial bytes ─► RadioTransport ─► TelemetryIngest ─► TelemetryRecord ─► PublishSink
//!                      ▲   │ RadioBusy                    │
//!                      │   ▼                              ▼
//!                   Station tick ─► NetworkSupervisor   RadioLinkState
//! ```

pub mod clock;
pub mod config;
pub mod link;
pub mod logutil;
pub mod metrics;
pub mod publish;
pub mod radio;
pub mod settings;
pub mod station;
pub mod tank;
pub mod telemetry;
