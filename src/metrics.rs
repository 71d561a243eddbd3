//! Process-lifetime counters for the radio and network paths.
//! Malformed frames are intentionally absent: drops are visible only through link state.
use std::sync::atomic::{AtomicU64, Ordering};

static FRAMES_RECEIVED: AtomicU64 = AtomicU64::new(0);
static ACKS_SENT: AtomicU64 = AtomicU64::new(0);
static ACK_FAILURES: AtomicU64 = AtomicU64::new(0);
static EXCHANGE_TIMEOUTS: AtomicU64 = AtomicU64::new(0);
static NETWORK_CONNECT_ATTEMPTS: AtomicU64 = AtomicU64::new(0);
static NETWORK_SWITCHES_DEFERRED: AtomicU64 = AtomicU64::new(0);

pub fn inc_frames_received() {
    FRAMES_RECEIVED.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_acks_sent() {
    ACKS_SENT.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_ack_failures() {
    ACK_FAILURES.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_exchange_timeouts() {
    EXCHANGE_TIMEOUTS.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_network_connect_attempts() {
    NETWORK_CONNECT_ATTEMPTS.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_network_switches_deferred() {
    NETWORK_SWITCHES_DEFERRED.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Snapshot {
    pub frames_received: u64,
    pub acks_sent: u64,
    pub ack_failures: u64,
    pub exchange_timeouts: u64,
    pub network_connect_attempts: u64,
    pub network_switches_deferred: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        frames_received: FRAMES_RECEIVED.load(Ordering::Relaxed),
        acks_sent: ACKS_SENT.load(Ordering::Relaxed),
        ack_failures: ACK_FAILURES.load(Ordering::Relaxed),
        exchange_timeouts: EXCHANGE_TIMEOUTS.load(Ordering::Relaxed),
        network_connect_attempts: NETWORK_CONNECT_ATTEMPTS.load(Ordering::Relaxed),
        network_switches_deferred: NETWORK_SWITCHES_DEFERRED.load(Ordering::Relaxed),
    }
}
