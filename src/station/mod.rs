//! The receiver station: one bounded, synchronous tick that services the radio, advances both
//! link state machines and hands finished telemetry to the publish sink.
//!
//! Tick order matters. Inbound frames are drained first so the network supervisor sees an
//! accurate picture of radio activity, and publishing runs last so it never delays an ack.

pub mod status;

use std::path::PathBuf;
use std::rc::Rc;

use log::{debug, info, trace, warn};

use crate::clock::{Clock, Watchdog};
use crate::link::network::{NetworkDriver, NetworkLinkState, NetworkSupervisor};
use crate::link::{derive_radio_state, LinkThresholds, RadioLinkState};
use crate::logutil::escape_log;
use crate::publish::{publish_telemetry, PublishSink, DEFAULT_TOPIC_PREFIX};
use crate::radio::{HardwarePresence, RadioTransport};
use crate::settings::RadioSettings;
use crate::tank::Calibration;
use crate::telemetry::{ParseOutcome, TelemetryIngest, TelemetryRecord};

use status::StatusSnapshot;

#[derive(Debug, Clone)]
pub struct StationOptions {
    pub thresholds: LinkThresholds,
    /// Upper bound on inbound lines handled in one tick.
    pub max_frames_per_tick: usize,
    pub topic_prefix: String,
    pub status_file: Option<PathBuf>,
}

impl Default for StationOptions {
    fn default() -> Self {
        Self {
            thresholds: LinkThresholds::default(),
            max_frames_per_tick: 16,
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
            status_file: None,
        }
    }
}

pub struct StationParts {
    pub radio: RadioTransport,
    pub network: NetworkSupervisor,
    pub driver: Box<dyn NetworkDriver>,
    pub sink: Box<dyn PublishSink>,
    pub ingest: TelemetryIngest,
    pub clock: Rc<dyn Clock>,
    pub watchdog: Rc<Watchdog>,
    pub options: StationOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// Inbound lines handled this tick.
    pub lines: usize,
    /// Telemetry packets accepted this tick.
    pub accepted: usize,
    pub radio_state: RadioLinkState,
    pub network_state: NetworkLinkState,
    /// Messages handed to the publish sink.
    pub published: usize,
}

pub struct Station {
    radio: RadioTransport,
    network: NetworkSupervisor,
    driver: Box<dyn NetworkDriver>,
    sink: Box<dyn PublishSink>,
    ingest: TelemetryIngest,
    clock: Rc<dyn Clock>,
    watchdog: Rc<Watchdog>,
    options: StationOptions,
    radio_state: RadioLinkState,
    publish_pending: bool,
    last_session: u64,
    status_dirty: bool,
}

impl Station {
    pub fn new(parts: StationParts) -> Self {
        let last_session = parts.sink.session();
        Self {
            radio: parts.radio,
            network: parts.network,
            driver: parts.driver,
            sink: parts.sink,
            ingest: parts.ingest,
            clock: parts.clock,
            watchdog: parts.watchdog,
            options: parts.options,
            radio_state: RadioLinkState::Starting,
            publish_pending: false,
            last_session,
            status_dirty: true,
        }
    }

    /// Probe and configure the radio, then bring up the network. Radio failure is not fatal:
    /// the station keeps running with the radio link reported lost.
    pub fn start(&mut self, radio_settings: &RadioSettings) {
        self.watchdog.feed();
        if let Err(e) = self.radio.initialize(radio_settings) {
            warn!("Radio unavailable: {}", e);
        }
        self.watchdog.feed();

        let now = self.clock.now_ms();
        let network = self.network.start(now, self.driver.as_mut());
        self.radio_state = derive_radio_state(
            self.radio.presence(),
            self.ingest.record(),
            now,
            &self.options.thresholds,
        );
        info!(
            "Station started: radio {} network {}",
            self.radio_state, network
        );
        self.status_dirty = true;
        self.write_status(now);
    }

    pub fn tick(&mut self) -> TickReport {
        self.watchdog.feed();

        let (lines, accepted) = self.service_radio();

        let now = self.clock.now_ms();
        let radio_state = derive_radio_state(
            self.radio.presence(),
            self.ingest.record(),
            now,
            &self.options.thresholds,
        );
        if radio_state != self.radio_state {
            info!("Radio link {} -> {}", self.radio_state, radio_state);
            self.radio_state = radio_state;
            self.status_dirty = true;
            // The retained status topic would otherwise keep the old label.
            if self.ingest.record().data_valid {
                self.publish_pending = true;
            }
        }

        let previous_network = self.network.state();
        let activity = self.radio.activity();
        let network_state = self.network.tick(now, self.driver.as_mut(), activity);
        if network_state != previous_network {
            info!("Network link {} -> {}", previous_network, network_state);
            self.status_dirty = true;
        }

        if self.ingest.take_new_data() {
            self.publish_pending = true;
            self.status_dirty = true;
        }
        let published = self.authorize_publish();

        if self.status_dirty {
            self.write_status(now);
        }
        self.watchdog.feed();

        TickReport {
            lines,
            accepted,
            radio_state,
            network_state,
            published,
        }
    }

    /// Drain inbound lines through the parser, at most `max_frames_per_tick` of them.
    fn service_radio(&mut self) -> (usize, usize) {
        let _busy = self.radio.busy_flag().hold();
        let mut lines = 0;
        let mut accepted = 0;
        while lines < self.options.max_frames_per_tick {
            self.radio.poll_input();
            let Some(line) = self.radio.next_line() else {
                break;
            };
            lines += 1;
            let now = self.clock.now_ms();
            let outcome = self.ingest.on_line(&line, now, &mut self.radio);
            match outcome {
                ParseOutcome::Accepted { .. } => accepted += 1,
                ParseOutcome::Ignored => trace!("radio < {}", escape_log(&line)),
                other => debug!("Frame dropped: {:?}", other),
            }
            self.watchdog.feed();
        }
        (lines, accepted)
    }

    /// Publish when new data is waiting, the network is up and the sink is connected.
    fn authorize_publish(&mut self) -> usize {
        let session = self.sink.session();
        if session != self.last_session {
            self.last_session = session;
            if self.ingest.record().data_valid {
                debug!("Publish sink reconnected; refreshing retained topics");
                self.publish_pending = true;
            }
        }
        if !self.publish_pending
            || self.network.state() != NetworkLinkState::Connected
            || !self.sink.is_connected()
        {
            return 0;
        }

        self.publish_pending = false;
        match publish_telemetry(
            self.sink.as_mut(),
            &self.options.topic_prefix,
            self.ingest.record(),
            self.radio_state,
        ) {
            Ok(count) => count,
            Err(e) => {
                warn!("Publish failed: {}", e);
                0
            }
        }
    }

    fn write_status(&mut self, now_ms: u64) {
        self.status_dirty = false;
        let Some(path) = self.options.status_file.as_ref() else {
            return;
        };
        let snapshot = StatusSnapshot::capture(
            self.ingest.record(),
            self.radio_state,
            self.network.state(),
            self.radio.presence(),
            now_ms,
        );
        if let Err(e) = snapshot.write_atomic(path) {
            warn!("Failed to write status file {}: {}", path.display(), e);
        }
    }

    /// Replace the active calibration. The reading on hand is recomputed and republished.
    pub fn apply_calibration(&mut self, calibration: Calibration) {
        info!(
            "Calibration now {}..{} cm, {} L",
            calibration.near_cm(),
            calibration.far_cm(),
            calibration.capacity_liters()
        );
        self.ingest.set_calibration(calibration);
    }

    pub fn telemetry(&self) -> TelemetryRecord {
        self.ingest.snapshot()
    }

    pub fn radio_state(&self) -> RadioLinkState {
        self.radio_state
    }

    pub fn network_state(&self) -> NetworkLinkState {
        self.network.state()
    }

    pub fn hardware(&self) -> HardwarePresence {
        self.radio.presence()
    }

    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }
}
