//! Test utilities & fixtures.
//! A scriptable modem on a manual clock, plus recording fakes for the network and publish
//! collaborators. Clones of each fake share state so the test keeps a handle after handing
//! one to the code under test.
#![allow(dead_code)] // Each test binary uses a different subset.

use std::cell::RefCell;
use std::rc::Rc;

use tanksync::clock::{ManualClock, SteppedYield};
use tanksync::link::network::{AccessPointConfig, NetworkDriver, NetworkError};
use tanksync::publish::{PublishError, PublishSink};
use tanksync::radio::serial::MockSerial;
use tanksync::radio::{RadioTiming, RadioTransport};
use tanksync::settings::WifiCredentials;

pub const REFERENCE_FRAME: &str = "+RCV=1,20,TANK:45:80:3.70:1001,-60,7";

/// Each yield of the transport advances the clock by this many milliseconds.
pub const YIELD_STEP_MS: u64 = 10;

pub fn transport(modem: &MockSerial, clock: &ManualClock) -> RadioTransport {
    RadioTransport::new(
        Box::new(modem.clone()),
        Rc::new(clock.clone()),
        Box::new(SteppedYield::new(clock.clone(), YIELD_STEP_MS)),
        RadioTiming::default(),
    )
}

pub fn credentials() -> WifiCredentials {
    WifiCredentials {
        ssid: "farmhouse".to_string(),
        password: "irrigate".to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetCall {
    BeginStation(String),
    StartAccessPoint(AccessPointConfig),
    StopAccessPoint,
    Disconnect,
}

#[derive(Debug, Default)]
struct NetState {
    link_up: bool,
    ap_fails: bool,
    calls: Vec<NetCall>,
}

#[derive(Debug, Default, Clone)]
pub struct FakeNetwork {
    state: Rc<RefCell<NetState>>,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_link_up(&self, up: bool) {
        self.state.borrow_mut().link_up = up;
    }

    pub fn set_ap_fails(&self, fails: bool) {
        self.state.borrow_mut().ap_fails = fails;
    }

    pub fn calls(&self) -> Vec<NetCall> {
        self.state.borrow().calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&NetCall) -> bool) -> usize {
        self.state.borrow().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn station_attempts(&self) -> usize {
        self.count(|c| matches!(c, NetCall::BeginStation(_)))
    }

    pub fn ap_starts(&self) -> usize {
        self.count(|c| matches!(c, NetCall::StartAccessPoint(_)))
    }
}

impl NetworkDriver for FakeNetwork {
    fn begin_station(&mut self, credentials: &WifiCredentials) -> Result<(), NetworkError> {
        self.state
            .borrow_mut()
            .calls
            .push(NetCall::BeginStation(credentials.ssid.clone()));
        Ok(())
    }

    fn link_up(&mut self) -> bool {
        self.state.borrow().link_up
    }

    fn start_access_point(&mut self, config: &AccessPointConfig) -> Result<(), NetworkError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(NetCall::StartAccessPoint(config.clone()));
        if state.ap_fails {
            return Err(NetworkError::Unavailable("wlan0".to_string()));
        }
        Ok(())
    }

    fn stop_access_point(&mut self) -> Result<(), NetworkError> {
        self.state.borrow_mut().calls.push(NetCall::StopAccessPoint);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), NetworkError> {
        self.state.borrow_mut().calls.push(NetCall::Disconnect);
        Ok(())
    }
}

#[derive(Debug)]
struct SinkState {
    connected: bool,
    session: u64,
    messages: Vec<(String, String, bool)>,
}

#[derive(Debug, Clone)]
pub struct RecordingSink {
    state: Rc<RefCell<SinkState>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(SinkState {
                connected: true,
                session: 1,
                messages: Vec::new(),
            })),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.state.borrow_mut().connected = connected;
    }

    /// Simulate the broker session being re-established.
    pub fn reconnect(&self) {
        let mut state = self.state.borrow_mut();
        state.connected = true;
        state.session += 1;
    }

    pub fn messages(&self) -> Vec<(String, String, bool)> {
        self.state.borrow().messages.clone()
    }

    pub fn take(&self) -> Vec<(String, String, bool)> {
        std::mem::take(&mut self.state.borrow_mut().messages)
    }

    /// Latest payload published on `topic`.
    pub fn last(&self, topic: &str) -> Option<String> {
        self.state
            .borrow()
            .messages
            .iter()
            .rev()
            .find(|(t, _, _)| t == topic)
            .map(|(_, p, _)| p.clone())
    }
}

impl PublishSink for RecordingSink {
    fn publish(&mut self, topic: &str, payload: &str, retain: bool) -> Result<(), PublishError> {
        self.state
            .borrow_mut()
            .messages
            .push((topic.to_string(), payload.to_string(), retain));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.borrow().connected
    }

    fn session(&self) -> u64 {
        self.state.borrow().session
    }
}
