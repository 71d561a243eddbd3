//! Monotonic time, cooperative yielding and the software watchdog.
//!
//! All timing in the ingestion path is expressed in milliseconds read from a [`Clock`]. Waiting
//! is always a polling loop that calls a [`Cooperate`] hook on every iteration, so the watchdog
//! is fed and nothing ever parks the thread for longer than one poll slice.

use log::warn;
use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Source of monotonic milliseconds.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// Wall clock backed by [`Instant`], counting from construction.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Hand-driven clock. Clones share the same time, so a test can keep one handle and give
/// another to the code under test.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<u64>>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Rc::new(Cell::new(start_ms)),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get().saturating_add(ms));
    }

    pub fn set(&self, ms: u64) {
        self.now.set(ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }
}

/// Hook invoked on every iteration of a polling loop ("service other work").
pub trait Cooperate {
    fn yield_now(&mut self);
}

/// Result of [`poll_with_deadline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Success,
    Failure,
    Timeout,
}

/// Run `check` until it reports a result or `deadline_ms` passes, yielding between attempts.
///
/// `check` returns `Some(true)` for success, `Some(false)` for failure and `None` to keep
/// waiting. It is always called at least once, even when the deadline has already passed.
pub fn poll_with_deadline<F>(
    clock: &dyn Clock,
    deadline_ms: u64,
    coop: &mut dyn Cooperate,
    mut check: F,
) -> PollOutcome
where
    F: FnMut() -> Option<bool>,
{
    loop {
        match check() {
            Some(true) => return PollOutcome::Success,
            Some(false) => return PollOutcome::Failure,
            None => {}
        }
        if clock.now_ms() >= deadline_ms {
            return PollOutcome::Timeout;
        }
        coop.yield_now();
    }
}

/// Software stand-in for the hardware watchdog.
///
/// The platform watchdog resets the device when it is not fed within its interval. On a host we
/// cannot be reset, so overruns are logged and counted instead; they indicate a loop that
/// blocked past its budget.
#[derive(Debug)]
pub struct Watchdog {
    budget: Duration,
    last_feed: Cell<Instant>,
    overruns: Cell<u64>,
}

impl Watchdog {
    pub fn new(budget: Duration) -> Self {
        Self {
            budget,
            last_feed: Cell::new(Instant::now()),
            overruns: Cell::new(0),
        }
    }

    pub fn feed(&self) {
        let now = Instant::now();
        let starved = now.duration_since(self.last_feed.get());
        if starved > self.budget {
            self.overruns.set(self.overruns.get() + 1);
            warn!(
                "Watchdog starved for {} ms (budget {} ms)",
                starved.as_millis(),
                self.budget.as_millis()
            );
        }
        self.last_feed.set(now);
    }

    pub fn overruns(&self) -> u64 {
        self.overruns.get()
    }
}

/// Production yield hook: feed the watchdog, then sleep one poll slice.
pub struct PacedYield {
    slice: Duration,
    watchdog: Rc<Watchdog>,
}

impl PacedYield {
    pub fn new(slice: Duration, watchdog: Rc<Watchdog>) -> Self {
        Self { slice, watchdog }
    }
}

impl Cooperate for PacedYield {
    fn yield_now(&mut self) {
        self.watchdog.feed();
        std::thread::sleep(self.slice);
    }
}

/// Test yield hook: each yield advances a [`ManualClock`] by a fixed step, so deadline loops
/// terminate deterministically without sleeping.
#[derive(Debug, Clone)]
pub struct SteppedYield {
    clock: ManualClock,
    step_ms: u64,
    yields: Rc<Cell<u64>>,
}

impl SteppedYield {
    pub fn new(clock: ManualClock, step_ms: u64) -> Self {
        Self {
            clock,
            step_ms,
            yields: Rc::new(Cell::new(0)),
        }
    }

    /// Number of yields observed so far (shared between clones).
    pub fn yields(&self) -> u64 {
        self.yields.get()
    }
}

impl Cooperate for SteppedYield {
    fn yield_now(&mut self) {
        self.yields.set(self.yields.get() + 1);
        self.clock.advance(self.step_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new(100);
        let other = clock.clone();
        clock.advance(50);
        assert_eq!(other.now_ms(), 150);
        other.set(10);
        assert_eq!(clock.now_ms(), 10);
    }

    #[test]
    fn stepped_yield_advances_clock() {
        let clock = ManualClock::new(0);
        let mut coop = SteppedYield::new(clock.clone(), 10);
        let counter = coop.clone();
        coop.yield_now();
        coop.yield_now();
        assert_eq!(clock.now_ms(), 20);
        assert_eq!(counter.yields(), 2);
    }

    #[test]
    fn poll_times_out_after_deadline() {
        let clock = ManualClock::new(1_000);
        let mut coop = SteppedYield::new(clock.clone(), 10);
        let counter = coop.clone();
        let outcome = poll_with_deadline(&clock, 1_100, &mut coop, || None);
        assert_eq!(outcome, PollOutcome::Timeout);
        assert_eq!(counter.yields(), 10);
    }

    #[test]
    fn poll_returns_first_answer() {
        let clock = ManualClock::new(0);
        let mut coop = SteppedYield::new(clock.clone(), 10);
        let mut attempts = 0;
        let outcome = poll_with_deadline(&clock, 1_000, &mut coop, || {
            attempts += 1;
            (attempts == 3).then_some(false)
        });
        assert_eq!(outcome, PollOutcome::Failure);
        assert_eq!(clock.now_ms(), 20);
    }

    #[test]
    fn watchdog_counts_overruns() {
        let dog = Watchdog::new(Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(2));
        dog.feed();
        assert_eq!(dog.overruns(), 1);
    }
}
