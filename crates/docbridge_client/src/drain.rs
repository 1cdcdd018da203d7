//! Admission gate with bounded draining.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct GateState {
    open: bool,
    expired: bool,
    in_flight: usize,
}

#[derive(Debug)]
struct GateInner {
    state: Mutex<GateState>,
    idle: Condvar,
}

/// Tracks in-flight work and stops admitting new work on close.
///
/// Closing only refuses new entries; existing guards stay valid until they
/// drop. `expire` marks the drain as abandoned so holders of guards can
/// give up on work that will not be waited for.
#[derive(Debug, Clone)]
pub struct DrainGate {
    inner: Arc<GateInner>,
}

impl DrainGate {
    /// Creates an open gate.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(GateInner {
                state: Mutex::new(GateState {
                    open: true,
                    expired: false,
                    in_flight: 0,
                }),
                idle: Condvar::new(),
            }),
        }
    }

    /// Admits one unit of work, or returns `None` once closed.
    pub fn enter(&self) -> Option<DrainGuard> {
        let mut state = self.inner.state.lock();
        if !state.open {
            return None;
        }
        state.in_flight += 1;
        Some(DrainGuard {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Stops admitting new work.
    pub fn close(&self) {
        self.inner.state.lock().open = false;
    }

    /// Closes the gate and abandons whatever is still in flight.
    pub fn expire(&self) {
        let mut state = self.inner.state.lock();
        state.open = false;
        state.expired = true;
        drop(state);
        self.inner.idle.notify_all();
    }

    /// Returns true while new work is admitted.
    pub fn is_open(&self) -> bool {
        self.inner.state.lock().open
    }

    /// Returns true once the drain was abandoned.
    pub fn is_expired(&self) -> bool {
        self.inner.state.lock().expired
    }

    /// Number of admitted units not yet finished.
    pub fn in_flight(&self) -> usize {
        self.inner.state.lock().in_flight
    }

    /// Waits until nothing is in flight.
    ///
    /// Returns false if `timeout` elapsed or the gate was expired first.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while state.in_flight > 0 && !state.expired {
            if self.inner.idle.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.in_flight == 0
    }
}

impl Default for DrainGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Proof of admission; finishing the work is dropping the guard.
#[derive(Debug)]
pub struct DrainGuard {
    inner: Arc<GateInner>,
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        if state.in_flight == 0 {
            self.inner.idle.notify_all();
        }
    }
}
