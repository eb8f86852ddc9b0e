//! Frame pacing
//!
//! The capture loop schedules frame `n` at `start + n * period` and sleeps
//! through a [`Clock`], so tests can drive it with simulated time.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Latching stop request shared between the caller and the capture loop
#[derive(Debug, Default)]
pub struct StopSignal {
    raised: Mutex<bool>,
    cvar: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        *self.raised.lock() = true;
        self.cvar.notify_all();
    }

    pub fn is_raised(&self) -> bool {
        *self.raised.lock()
    }

    /// Wait up to `timeout`; returns true if the signal is raised
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut raised = self.raised.lock();
        if !*raised {
            self.cvar.wait_for(&mut raised, timeout);
        }
        *raised
    }
}

/// Time source for the capture loop
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock's origin
    fn now(&self) -> Duration;

    /// Block until `deadline` (on this clock) or until `stop` is raised
    ///
    /// Returns false when woken by `stop`.
    fn sleep_until(&self, deadline: Duration, stop: &StopSignal) -> bool;
}

/// Wall clock backed by `Instant`
#[derive(Debug)]
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
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep_until(&self, deadline: Duration, stop: &StopSignal) -> bool {
        loop {
            if stop.is_raised() {
                return false;
            }
            let now = self.now();
            if now >= deadline {
                return true;
            }
            if stop.wait_timeout(deadline - now) {
                return false;
            }
        }
    }
}

#[derive(Debug, Default)]
struct ManualState {
    now: Duration,
    /// Deadline the loop is currently blocked on
    parked: Option<Duration>,
}

/// Simulated clock that only moves when told to
///
/// A loop sleeping on it stays blocked until [`ManualClock::advance`] moves
/// time past its deadline or its stop signal is raised.
#[derive(Debug, Default)]
pub struct ManualClock {
    state: Mutex<ManualState>,
    cvar: Condvar,
}

/// How often a parked sleeper re-checks its stop signal
const STOP_POLL: Duration = Duration::from_millis(2);

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.state.lock().now += by;
        self.cvar.notify_all();
    }

    /// Wait until a sleeper is blocked on a deadline in the future
    ///
    /// Returns false if that does not happen within `timeout` (real time),
    /// e.g. because the loop has exited.
    pub fn wait_until_parked(&self, timeout: Duration) -> bool {
        let give_up = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.parked.is_some_and(|d| d > state.now) {
                return true;
            }
            if self.cvar.wait_until(&mut state, give_up).timed_out() {
                return state.parked.is_some_and(|d| d > state.now);
            }
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.state.lock().now
    }

    fn sleep_until(&self, deadline: Duration, stop: &StopSignal) -> bool {
        let mut state = self.state.lock();
        let woke = loop {
            if stop.is_raised() {
                break false;
            }
            if state.now >= deadline {
                break true;
            }
            if state.parked != Some(deadline) {
                state.parked = Some(deadline);
                self.cvar.notify_all();
            }
            self.cvar.wait_for(&mut state, STOP_POLL);
        };
        state.parked = None;
        self.cvar.notify_all();
        woke
    }
}
