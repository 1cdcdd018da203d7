//! Fault injection.
//!
//! A [`FaultPlan`] is shared by the emulator and the test driving it. Each
//! counter is consumed one request at a time, so a test can script an
//! exact sequence of failures before the emulator behaves normally again.

use parking_lot::Mutex;
use std::time::Duration;

/// Fault to apply to one incoming request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Answer with this status instead of handling the request.
    Status(u16),
    /// Refuse the connection.
    Refuse,
    /// Drop the connection without answering.
    Reset,
}

#[derive(Debug, Default)]
struct Plan {
    fail: Option<(u32, u16)>,
    refuse: u32,
    reset: u32,
    latency: Duration,
    reject_auth: bool,
    injected: u64,
}

/// Scripted failures for the emulator.
#[derive(Debug, Default)]
pub struct FaultPlan {
    plan: Mutex<Plan>,
}

impl FaultPlan {
    /// Creates an empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next `count` requests with `status`.
    pub fn fail_next(&self, count: u32, status: u16) {
        self.plan.lock().fail = (count > 0).then_some((count, status));
    }

    /// Refuses the next `count` connections, including certificate fetches.
    pub fn refuse_next(&self, count: u32) {
        self.plan.lock().refuse = count;
    }

    /// Drops the next `count` requests mid-flight.
    pub fn reset_next(&self, count: u32) {
        self.plan.lock().reset = count;
    }

    /// Delays every request by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.plan.lock().latency = latency;
    }

    /// Rejects every signature while enabled.
    pub fn reject_auth(&self, enabled: bool) {
        self.plan.lock().reject_auth = enabled;
    }

    /// Removes every scripted fault.
    pub fn clear(&self) {
        let injected = self.injected();
        *self.plan.lock() = Plan {
            injected,
            ..Plan::default()
        };
    }

    /// Number of faults applied so far.
    pub fn injected(&self) -> u64 {
        self.plan.lock().injected
    }

    pub(crate) fn latency(&self) -> Duration {
        self.plan.lock().latency
    }

    pub(crate) fn rejects_auth(&self) -> bool {
        self.plan.lock().reject_auth
    }

    /// Consumes a refusal for a certificate fetch.
    pub(crate) fn take_refusal(&self) -> bool {
        let mut plan = self.plan.lock();
        if plan.refuse == 0 {
            return false;
        }
        plan.refuse -= 1;
        plan.injected += 1;
        true
    }

    /// Consumes the next fault for a request, if any.
    ///
    /// Refusals are applied before resets, resets before status failures.
    pub(crate) fn next_fault(&self) -> Option<Fault> {
        let mut plan = self.plan.lock();
        let fault = if plan.refuse > 0 {
            plan.refuse -= 1;
            Fault::Refuse
        } else if plan.reset > 0 {
            plan.reset -= 1;
            Fault::Reset
        } else if let Some((count, status)) = plan.fail {
            plan.fail = (count > 1).then_some((count - 1, status));
            Fault::Status(status)
        } else {
            return None;
        };
        plan.injected += 1;
        Some(fault)
    }
}
