//! Half-duplex command/response transport to the RYLR998 LoRa modem.
//!
//! The transport is the only writer of the serial link. Each [`RadioTransport::exchange`]
//! writes one `AT` command and polls for `+OK` / `+ERR` until a deadline, yielding through the
//! injected [`Cooperate`] hook between polls. [`RadioBusy`] is raised for the duration so the
//! network supervisor can stay clear of the radio while it is mid-conversation.
//!
//! Telemetry frames (`+RCV=` lines) that show up during an exchange are never thrown away; they
//! queue behind the exchange and come out of [`RadioTransport::next_line`] in arrival order.

pub mod framer;
pub mod serial;

use std::cell::Cell;
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::rc::Rc;

use log::{debug, info, trace, warn};
use thiserror::Error;

use crate::clock::{poll_with_deadline, Clock, Cooperate, PollOutcome};
use crate::logutil::escape_log;
use crate::metrics;
use crate::settings::RadioSettings;
use crate::telemetry::parser::frame_start;
use crate::telemetry::AckSink;

use framer::LineFramer;
use serial::SerialLink;

const LINE_DELIMITER: &str = "\r\n";
const READ_CHUNK: usize = 128;
const MAX_READS_PER_POLL: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeOutcome {
    Ack,
    Nack,
    Timeout,
}

impl From<PollOutcome> for ExchangeOutcome {
    fn from(outcome: PollOutcome) -> Self {
        match outcome {
            PollOutcome::Success => ExchangeOutcome::Ack,
            PollOutcome::Failure => ExchangeOutcome::Nack,
            PollOutcome::Timeout => ExchangeOutcome::Timeout,
        }
    }
}

impl fmt::Display for ExchangeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExchangeOutcome::Ack => "+OK",
            ExchangeOutcome::Nack => "+ERR",
            ExchangeOutcome::Timeout => "timeout",
        })
    }
}

/// Whether the modem answered the startup probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardwarePresence {
    #[default]
    Unknown,
    Present,
    /// Sticky until restart.
    Absent,
}

#[derive(Debug, Error)]
pub enum RadioError {
    #[error("radio hardware is absent; configuration skipped")]
    HardwareAbsent,

    #[error("radio answered `{command}` with {outcome}")]
    Rejected {
        command: String,
        outcome: ExchangeOutcome,
    },

    #[cfg(feature = "serial")]
    #[error("failed to open serial port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },
}

/// Exclusion signal shared between the transport and the network supervisor.
///
/// Not a lock: nothing waits on it. Readers only use it to postpone work that would disturb
/// the radio.
#[derive(Debug, Clone, Default)]
pub struct RadioBusy(Rc<Cell<bool>>);

impl RadioBusy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_raised(&self) -> bool {
        self.0.get()
    }

    /// Raise the flag until the returned guard drops. Guards nest.
    pub fn hold(&self) -> BusyGuard {
        let previous = self.0.replace(true);
        BusyGuard {
            flag: Rc::clone(&self.0),
            previous,
        }
    }
}

#[must_use = "the busy flag drops as soon as the guard does"]
pub struct BusyGuard {
    flag: Rc<Cell<bool>>,
    previous: bool,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.flag.set(self.previous);
    }
}

/// What the network supervisor needs to know about the radio before switching modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RadioActivity {
    pub busy: bool,
    pub pending_input: bool,
}

impl RadioActivity {
    pub fn is_quiet(&self) -> bool {
        !self.busy && !self.pending_input
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadioTiming {
    /// Deadline for probe and configuration commands.
    pub exchange_timeout_ms: u64,
    /// Deadline for the modem's `+OK` after an `AT+SEND` ack.
    pub ack_timeout_ms: u64,
    /// An unterminated line that receives nothing for this long is ended where it stands.
    pub partial_line_timeout_ms: u64,
}

impl Default for RadioTiming {
    fn default() -> Self {
        Self {
            exchange_timeout_ms: 1_000,
            ack_timeout_ms: 250,
            partial_line_timeout_ms: 1_000,
        }
    }
}

pub struct RadioTransport {
    serial: Box<dyn SerialLink>,
    clock: Rc<dyn Clock>,
    coop: Box<dyn Cooperate>,
    framer: LineFramer,
    pending: VecDeque<String>,
    presence: HardwarePresence,
    busy: RadioBusy,
    timing: RadioTiming,
}

impl RadioTransport {
    pub fn new(
        serial: Box<dyn SerialLink>,
        clock: Rc<dyn Clock>,
        coop: Box<dyn Cooperate>,
        timing: RadioTiming,
    ) -> Self {
        Self {
            serial,
            clock,
            coop,
            framer: LineFramer::new(),
            pending: VecDeque::new(),
            presence: HardwarePresence::Unknown,
            busy: RadioBusy::new(),
            timing,
        }
    }

    pub fn presence(&self) -> HardwarePresence {
        self.presence
    }

    pub fn busy_flag(&self) -> RadioBusy {
        self.busy.clone()
    }

    pub fn timing(&self) -> RadioTiming {
        self.timing
    }

    /// Probe the modem with `AT`, then apply `settings`.
    ///
    /// A missing probe answer marks the hardware absent for the rest of the process lifetime.
    pub fn initialize(&mut self, settings: &RadioSettings) -> Result<(), RadioError> {
        let outcome = self.exchange("AT", self.timing.exchange_timeout_ms);
        if outcome != ExchangeOutcome::Ack {
            self.presence = HardwarePresence::Absent;
            warn!("Radio presence probe failed ({}); marking hardware absent", outcome);
            return Err(RadioError::Rejected {
                command: "AT".to_string(),
                outcome,
            });
        }
        self.presence = HardwarePresence::Present;
        info!("Radio module detected");
        self.configure(settings)
    }

    /// Send address, network id and band. Every command must be acknowledged.
    pub fn configure(&mut self, settings: &RadioSettings) -> Result<(), RadioError> {
        if self.presence == HardwarePresence::Absent {
            return Err(RadioError::HardwareAbsent);
        }
        for command in settings.configuration_commands() {
            let outcome = self.exchange(&command, self.timing.exchange_timeout_ms);
            if outcome != ExchangeOutcome::Ack {
                self.presence = HardwarePresence::Absent;
                warn!(
                    "Radio rejected {} ({}); marking hardware absent",
                    escape_log(&command),
                    outcome
                );
                return Err(RadioError::Rejected { command, outcome });
            }
        }
        info!(
            "Radio configured: address={} network={} band={}",
            settings.address, settings.network_id, settings.frequency
        );
        Ok(())
    }

    /// One command/response round trip bounded by `timeout_ms`.
    pub fn exchange(&mut self, command: &str, timeout_ms: u64) -> ExchangeOutcome {
        let _busy = self.busy.hold();
        self.flush_stale();

        trace!("radio > {}", escape_log(command));
        let mut wire = String::with_capacity(command.len() + LINE_DELIMITER.len());
        wire.push_str(command);
        wire.push_str(LINE_DELIMITER);
        if let Err(e) = self.serial.write_all(wire.as_bytes()) {
            warn!("Serial write failed for {}: {}", escape_log(command), e);
            return ExchangeOutcome::Nack;
        }

        let deadline = self.clock.now_ms().saturating_add(timeout_ms);
        let Self {
            serial,
            clock,
            coop,
            framer,
            pending,
            ..
        } = self;
        let clock: &dyn Clock = &**clock;
        let outcome: ExchangeOutcome =
            poll_with_deadline(clock, deadline, coop.as_mut(), || {
                read_available(serial.as_mut(), framer, clock.now_ms());
                while let Some(line) = framer.next_line() {
                    if let Some(frame) = frame_start(&line) {
                        pending.push_back(frame.to_string());
                    } else if line.contains("+ERR") {
                        trace!("radio < {}", escape_log(&line));
                        return Some(false);
                    } else if line.contains("+OK") {
                        trace!("radio < {}", escape_log(&line));
                        return Some(true);
                    } else {
                        trace!("radio < (ignored) {}", escape_log(&line));
                    }
                }
                None
            })
            .into();

        if outcome == ExchangeOutcome::Timeout {
            metrics::inc_exchange_timeouts();
            debug!("No reply to {} within {} ms", escape_log(command), timeout_ms);
        }
        outcome
    }

    /// `AT+SEND=<address>,<len>,<payload>`, waiting only for the modem's own `+OK`.
    pub fn send(&mut self, address: u16, payload: &str) -> ExchangeOutcome {
        let command = format!("AT+SEND={},{},{}", address, payload.len(), payload);
        self.exchange(&command, self.timing.ack_timeout_ms)
    }

    /// Pull whatever bytes are waiting into the line buffer and end a partial line that has
    /// gone quiet. Returns the byte count.
    pub fn poll_input(&mut self) -> usize {
        let _busy = self.busy.hold();
        let now = self.clock.now_ms();
        let read = read_available(self.serial.as_mut(), &mut self.framer, now);
        self.framer
            .expire_partial(now, self.timing.partial_line_timeout_ms);
        read
    }

    /// Next inbound line: frames queued during exchanges first, then freshly framed input.
    pub fn next_line(&mut self) -> Option<String> {
        self.pending
            .pop_front()
            .or_else(|| self.framer.next_line())
    }

    /// True when lines are queued, a partial line is still growing or the port has unread
    /// bytes. A partial line that went quiet does not count.
    pub fn has_pending_input(&mut self) -> bool {
        let now = self.clock.now_ms();
        if !self.pending.is_empty()
            || self
                .framer
                .has_pending(now, self.timing.partial_line_timeout_ms)
        {
            return true;
        }
        match self.serial.bytes_available() {
            Ok(n) => n > 0,
            Err(e) => {
                debug!("Serial availability check failed: {}", e);
                false
            }
        }
    }

    pub fn activity(&mut self) -> RadioActivity {
        RadioActivity {
            busy: self.busy.is_raised(),
            pending_input: self.has_pending_input(),
        }
    }

    /// Drop leftovers from earlier conversations so they are not mistaken for the next reply.
    /// Complete frames survive and so does a tail that is still growing. Stray replies and
    /// tails that went quiet are dropped.
    fn flush_stale(&mut self) {
        let now = self.clock.now_ms();
        let quiet_ms = self.timing.partial_line_timeout_ms;
        read_available(self.serial.as_mut(), &mut self.framer, now);
        self.framer.expire_partial(now, quiet_ms);
        while let Some(line) = self.framer.next_line() {
            if let Some(frame) = frame_start(&line) {
                self.pending.push_back(frame.to_string());
            } else {
                trace!("Flushing stale line: {}", escape_log(&line));
            }
        }
        // A tail still growing is a frame mid-air; the modem finishes it before replying.
        if self.framer.has_partial() {
            trace!("Keeping partial line still arriving");
        }
    }
}

impl AckSink for RadioTransport {
    fn send_ack(&mut self, address: u16, message_id: u32) -> bool {
        let outcome = self.send(address, &format!("ACK:{}", message_id));
        if outcome == ExchangeOutcome::Ack {
            metrics::inc_acks_sent();
            true
        } else {
            metrics::inc_ack_failures();
            debug!("Ack {} to {} not confirmed ({})", message_id, address, outcome);
            false
        }
    }
}

fn read_available(serial: &mut dyn SerialLink, framer: &mut LineFramer, now_ms: u64) -> usize {
    let mut buf = [0u8; READ_CHUNK];
    let mut total = 0;
    for _ in 0..MAX_READS_PER_POLL {
        let available = match serial.bytes_available() {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!("Serial availability check failed: {}", e);
                break;
            }
        };
        let want = available.min(buf.len());
        match serial.read(&mut buf[..want]) {
            Ok(0) => break,
            Ok(n) => {
                framer.push(&buf[..n], now_ms);
                total += n;
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut
                        | io::ErrorKind::Interrupted
                        | io::ErrorKind::WouldBlock
                ) =>
            {
                break
            }
            Err(e) => {
                warn!("Serial read failed: {}", e);
                break;
            }
        }
    }
    total
}
