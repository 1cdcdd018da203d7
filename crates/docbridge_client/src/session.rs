//! Session management.
//!
//! A [`Session`] owns one transport connection and the health state that
//! goes with it. Every request goes through [`Session::submit`], which
//! retries transient failures with backoff, reconnects when the transport
//! reports the connection gone, and tracks consecutive failures so callers
//! can see when the store is struggling.

use crate::cancel::CancellationToken;
use crate::config::RetryPolicy;
use crate::drain::DrainGate;
use crate::error::{ClientError, ClientResult, ConnectionError, RequestError};
use crate::transport::Transport;
use crate::trust::TrustContext;
use docbridge_protocol::{Request, Response};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Health of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// The first connection is being established.
    Connecting,
    /// Requests are succeeding.
    Ready,
    /// Several consecutive requests failed transiently.
    Degraded,
    /// The session no longer accepts requests.
    Closed,
}

impl SessionState {
    /// Returns true if the session accepts requests.
    pub fn is_usable(&self) -> bool {
        matches!(self, SessionState::Ready | SessionState::Degraded)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Connecting => "connecting",
            SessionState::Ready => "ready",
            SessionState::Degraded => "degraded",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Counters about session traffic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Requests submitted.
    pub requests: u64,
    /// Attempts beyond the first.
    pub retries: u64,
    /// Transient failures observed, timeouts included.
    pub transient_failures: u64,
    /// Connections re-established after a reset.
    pub reconnects: u64,
}

#[derive(Debug, Default)]
struct StatCounters {
    requests: AtomicU64,
    retries: AtomicU64,
    transient_failures: AtomicU64,
    reconnects: AtomicU64,
}

/// A response together with the number of attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Acknowledged {
    /// The store's response.
    pub response: Response,
    /// Attempts made, including the successful one.
    pub attempts: u32,
}

struct SessionInner<T: Transport> {
    transport: T,
    endpoint: String,
    trust: TrustContext,
    policy: RetryPolicy,
    handle: RwLock<Option<Arc<T::Handle>>>,
    state: RwLock<SessionState>,
    consecutive_failures: AtomicU32,
    closed: AtomicBool,
    gate: DrainGate,
    stats: StatCounters,
}

/// A connection to the store with retry and health tracking.
///
/// Cloning is cheap; clones share the connection and state.
pub struct Session<T: Transport> {
    inner: Arc<SessionInner<T>>,
}

impl<T: Transport> Clone for Session<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.inner.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

impl<T: Transport> Session<T> {
    /// Opens a session, retrying transient connection failures per `policy`.
    ///
    /// Fatal failures (authentication, trust, protocol) surface immediately.
    pub fn open(
        transport: T,
        endpoint: impl Into<String>,
        trust: TrustContext,
        policy: RetryPolicy,
    ) -> ClientResult<Self> {
        let session = Self::connecting(transport, endpoint.into(), trust, policy);
        let max_attempts = session.inner.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let timeout = session.inner.policy.request_timeout;
            match session.establish(timeout) {
                Ok(()) => return Ok(session),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = session.inner.policy.delay_for_attempt(attempt);
                    debug!(attempt, error = %e, ?delay, "connection attempt failed, retrying");
                    std::thread::sleep(delay);
                }
                Err(e) => {
                    session.mark_closed();
                    return Err(e.into());
                }
            }
        }
    }

    /// Opens a session, retrying transient failures until `deadline`.
    ///
    /// Fails with [`ClientError::StartupTimeout`] when the deadline passes.
    pub fn open_until(
        transport: T,
        endpoint: impl Into<String>,
        trust: TrustContext,
        policy: RetryPolicy,
        deadline: Instant,
    ) -> ClientResult<Self> {
        let started = Instant::now();
        let session = Self::connecting(transport, endpoint.into(), trust, policy);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                session.mark_closed();
                return Err(ClientError::StartupTimeout(started.elapsed()));
            }
            let timeout = session.inner.policy.request_timeout.min(remaining);
            match session.establish(timeout) {
                Ok(()) => return Ok(session),
                Err(e) if e.is_retryable() => {
                    let delay = session
                        .inner
                        .policy
                        .delay_for_attempt(attempt)
                        .min(deadline.saturating_duration_since(Instant::now()));
                    debug!(attempt, error = %e, "endpoint not ready yet");
                    std::thread::sleep(delay);
                }
                Err(e) => {
                    session.mark_closed();
                    return Err(e.into());
                }
            }
        }
    }

    fn connecting(transport: T, endpoint: String, trust: TrustContext, policy: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                transport,
                endpoint,
                trust,
                policy,
                handle: RwLock::new(None),
                state: RwLock::new(SessionState::Connecting),
                consecutive_failures: AtomicU32::new(0),
                closed: AtomicBool::new(false),
                gate: DrainGate::new(),
                stats: StatCounters::default(),
            }),
        }
    }

    fn establish(&self, timeout: Duration) -> Result<(), ConnectionError> {
        let handle = self
            .inner
            .transport
            .connect(&self.inner.endpoint, &self.inner.trust, timeout)?;
        *self.inner.handle.write() = Some(Arc::new(handle));
        let mut state = self.inner.state.write();
        if *state == SessionState::Connecting {
            *state = SessionState::Ready;
            info!(endpoint = %self.inner.endpoint, "session ready");
        }
        Ok(())
    }

    /// Submits a request.
    pub fn submit(&self, request: &Request) -> ClientResult<Acknowledged> {
        self.submit_with(request, &CancellationToken::new())
    }

    /// Submits a request, giving up early when `cancel` fires.
    ///
    /// Transient failures are retried per the policy; the last one surfaces
    /// once the attempt budget is spent. Permanent failures surface at once.
    pub fn submit_with(
        &self,
        request: &Request,
        cancel: &CancellationToken,
    ) -> ClientResult<Acknowledged> {
        let _guard = self.inner.gate.enter().ok_or(RequestError::Closed)?;
        if cancel.is_cancelled() {
            return Err(RequestError::Cancelled.into());
        }
        self.inner.stats.requests.fetch_add(1, Ordering::Relaxed);

        let policy = &self.inner.policy;
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            if self.inner.closed.load(Ordering::SeqCst) {
                return Err(RequestError::Closed.into());
            }
            attempt += 1;

            let result = match self.current_handle() {
                Ok(handle) => {
                    self.inner
                        .transport
                        .send(&handle, request, policy.request_timeout)
                }
                Err(ConnectionError::Transient(message)) => Err(RequestError::Transient(message)),
                Err(fatal) => return Err(fatal.into()),
            };

            match result {
                Ok(response) => {
                    self.record_success();
                    return Ok(Acknowledged { response, attempts: attempt });
                }
                Err(e) if e.is_retryable() => {
                    self.record_transient_failure();
                    if attempt >= max_attempts {
                        warn!(kind = request.kind(), attempts = attempt, error = %e, "retries exhausted");
                        return Err(e.into());
                    }
                    self.inner.stats.retries.fetch_add(1, Ordering::Relaxed);
                    let delay = policy.delay_for_attempt(attempt);
                    debug!(kind = request.kind(), attempt, error = %e, ?delay, "retrying request");
                    if cancel.wait_timeout(delay) {
                        return Err(RequestError::Cancelled.into());
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn current_handle(&self) -> Result<Arc<T::Handle>, ConnectionError> {
        if let Some(handle) = self.inner.handle.read().as_ref() {
            if self.inner.transport.is_open(handle) {
                return Ok(Arc::clone(handle));
            }
        }

        let mut slot = self.inner.handle.write();
        // Another caller may have reconnected while we waited for the lock.
        if let Some(handle) = slot.as_ref() {
            if self.inner.transport.is_open(handle) {
                return Ok(Arc::clone(handle));
            }
        }
        let handle = Arc::new(self.inner.transport.connect(
            &self.inner.endpoint,
            &self.inner.trust,
            self.inner.policy.request_timeout,
        )?);
        *slot = Some(Arc::clone(&handle));
        self.inner.stats.reconnects.fetch_add(1, Ordering::Relaxed);
        info!(endpoint = %self.inner.endpoint, "reconnected");
        Ok(handle)
    }

    fn record_success(&self) {
        self.inner.consecutive_failures.store(0, Ordering::SeqCst);
        let mut state = self.inner.state.write();
        if *state == SessionState::Degraded {
            *state = SessionState::Ready;
            info!(endpoint = %self.inner.endpoint, "session recovered");
        }
    }

    fn record_transient_failure(&self) {
        self.inner
            .stats
            .transient_failures
            .fetch_add(1, Ordering::Relaxed);
        let failures = self.inner.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.inner.policy.degrade_after {
            let mut state = self.inner.state.write();
            if *state == SessionState::Ready {
                *state = SessionState::Degraded;
                warn!(endpoint = %self.inner.endpoint, failures, "session degraded");
            }
        }
    }

    fn mark_closed(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.gate.close();
        *self.inner.state.write() = SessionState::Closed;
    }

    /// Closes the session.
    ///
    /// New submissions are refused at once. In-flight requests get up to the
    /// policy's close timeout to finish before the connection is released.
    /// Returns true if everything in flight finished. Calling it again is a
    /// no-op that returns true.
    pub fn close(&self) -> bool {
        self.close_within(self.inner.policy.close_timeout)
    }

    /// Closes the session, waiting at most `timeout` for in-flight requests.
    pub fn close_within(&self, timeout: Duration) -> bool {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return true;
        }
        self.inner.gate.close();
        let drained = self.inner.gate.wait_idle(timeout);
        if !drained {
            warn!(
                in_flight = self.inner.gate.in_flight(),
                "closing session with requests still in flight"
            );
            self.inner.gate.expire();
        }
        if let Some(handle) = self.inner.handle.write().take() {
            self.inner.transport.close(&handle);
        }
        *self.inner.state.write() = SessionState::Closed;
        info!(endpoint = %self.inner.endpoint, drained, "session closed");
        drained
    }

    /// Current health state.
    pub fn state(&self) -> SessionState {
        *self.inner.state.read()
    }

    /// Returns true once closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Consecutive transient failures since the last success.
    pub fn consecutive_failures(&self) -> u32 {
        self.inner.consecutive_failures.load(Ordering::SeqCst)
    }

    /// Snapshot of the traffic counters.
    pub fn stats(&self) -> SessionStats {
        let counters = &self.inner.stats;
        SessionStats {
            requests: counters.requests.load(Ordering::Relaxed),
            retries: counters.retries.load(Ordering::Relaxed),
            transient_failures: counters.transient_failures.load(Ordering::Relaxed),
            reconnects: counters.reconnects.load(Ordering::Relaxed),
        }
    }

    /// Endpoint this session talks to.
    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// Trust material in use.
    pub fn trust(&self) -> &TrustContext {
        &self.inner.trust
    }

    /// Retry policy in use.
    pub fn policy(&self) -> &RetryPolicy {
        &self.inner.policy
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use crate::trust::{StaticCredentials, TrustMaterialLoader};
    use std::thread;

    fn trust() -> TrustContext {
        let pem = "-----BEGIN CERTIFICATE-----\nAAECAw==\n-----END CERTIFICATE-----\n";
        TrustMaterialLoader::new()
            .load(&StaticCredentials::new(pem))
            .unwrap()
    }

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts)
            .with_initial_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(5))
            .with_jitter(false)
    }

    fn ok() -> Result<Response, RequestError> {
        Ok(Response::Deleted { existed: true })
    }

    fn open(transport: MockTransport, attempts: u32) -> Session<MockTransport> {
        Session::open(transport, "mock://store", trust(), policy(attempts)).unwrap()
    }

    #[test]
    fn open_retries_transient_failures() {
        let transport = MockTransport::new();
        transport.push_connect(Err(ConnectionError::transient("refused")));
        transport.push_connect(Err(ConnectionError::transient("refused")));
        let session = open(transport, 3);
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.transport().connects(), 1);
    }

    #[test]
    fn open_surfaces_fatal_failures_immediately() {
        let transport = MockTransport::new();
        transport.push_connect(Err(ConnectionError::fatal("unauthorized")));
        let err = Session::open(transport, "mock://store", trust(), policy(5)).unwrap_err();
        assert_eq!(err, ClientError::Connection(ConnectionError::fatal("unauthorized")));
    }

    #[test]
    fn open_gives_up_after_budget() {
        let transport = MockTransport::new();
        for _ in 0..3 {
            transport.push_connect(Err(ConnectionError::transient("refused")));
        }
        let err = Session::open(transport, "mock://store", trust(), policy(3)).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn open_until_times_out() {
        let transport = MockTransport::new();
        for _ in 0..1000 {
            transport.push_connect(Err(ConnectionError::transient("starting")));
        }
        let deadline = Instant::now() + Duration::from_millis(30);
        let err = Session::open_until(transport, "mock://store", trust(), policy(1), deadline)
            .unwrap_err();
        assert!(matches!(err, ClientError::StartupTimeout(_)));
    }

    #[test]
    fn submit_retries_then_succeeds() {
        let transport = MockTransport::with_handler(|_| ok());
        transport.push_send(Err(RequestError::transient("429")));
        let session = open(transport, 3);

        let ack = session.submit(&Request::Account).unwrap();
        assert_eq!(ack.attempts, 2);
        assert_eq!(session.stats().retries, 1);
        assert_eq!(session.consecutive_failures(), 0);
    }

    #[test]
    fn permanent_failure_is_not_retried() {
        let transport = MockTransport::with_handler(|_| ok());
        transport.push_send(Err(RequestError::permanent("conflict")));
        let session = open(transport, 5);

        let err = session.submit(&Request::Account).unwrap_err();
        assert_eq!(err, ClientError::Request(RequestError::permanent("conflict")));
        assert_eq!(session.transport().sent().len(), 1);
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[test]
    fn degrades_after_consecutive_transient_failures() {
        let transport = MockTransport::with_handler(|_| ok());
        for _ in 0..3 {
            transport.push_send(Err(RequestError::transient("503")));
        }
        let session = open(transport, 1);

        for _ in 0..2 {
            assert!(session.submit(&Request::Account).is_err());
            assert_eq!(session.state(), SessionState::Ready);
        }
        assert!(session.submit(&Request::Account).is_err());
        assert_eq!(session.state(), SessionState::Degraded);

        session.submit(&Request::Account).unwrap();
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[test]
    fn timeout_counts_as_transient() {
        let transport = MockTransport::with_handler(|_| ok());
        transport.set_latency(Duration::from_millis(50));
        let policy = policy(2).with_request_timeout(Duration::from_millis(5));
        let session = Session::open(transport, "mock://store", trust(), policy).unwrap();

        let err = session.submit(&Request::Account).unwrap_err();
        assert_eq!(
            err,
            ClientError::Request(RequestError::Timeout(Duration::from_millis(5)))
        );
        assert_eq!(session.stats().transient_failures, 2);
    }

    #[test]
    fn reconnects_after_reset() {
        let transport = MockTransport::with_handler(|_| ok());
        let session = open(transport, 3);
        session.transport().reset_connections();

        session.submit(&Request::Account).unwrap();
        assert_eq!(session.stats().reconnects, 1);
        assert_eq!(session.transport().connects(), 2);
    }

    #[test]
    fn cancelled_submit_leaves_state_alone() {
        let transport = MockTransport::with_handler(|_| ok());
        let session = open(transport, 3);
        let token = CancellationToken::new();
        token.cancel();

        let err = session.submit_with(&Request::Account, &token).unwrap_err();
        assert_eq!(err, ClientError::Request(RequestError::Cancelled));
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.consecutive_failures(), 0);
        assert!(session.transport().sent().is_empty());
    }

    #[test]
    fn cancel_interrupts_backoff() {
        let transport = MockTransport::new();
        let policy = policy(10)
            .with_initial_delay(Duration::from_secs(10))
            .with_max_delay(Duration::from_secs(10));
        let session = Session::open(transport, "mock://store", trust(), policy).unwrap();
        session
            .transport()
            .push_send(Err(RequestError::transient("throttled")));

        let token = CancellationToken::new();
        let remote = token.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.cancel();
        });

        let start = Instant::now();
        let err = session.submit_with(&Request::Account, &token).unwrap_err();
        assert_eq!(err, ClientError::Request(RequestError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(5));
        canceller.join().unwrap();
    }

    #[test]
    fn close_is_idempotent_and_refuses_new_work() {
        let transport = MockTransport::with_handler(|_| ok());
        let session = open(transport, 3);

        assert!(session.close());
        assert!(session.close());
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.transport().closes(), 1);
        assert_eq!(
            session.submit(&Request::Account).unwrap_err(),
            ClientError::Request(RequestError::Closed)
        );
    }

    #[test]
    fn close_waits_for_in_flight_requests() {
        let transport = MockTransport::with_handler(|_| ok());
        transport.set_latency(Duration::from_millis(50));
        let session = open(transport, 1);

        let worker = {
            let session = session.clone();
            thread::spawn(move || session.submit(&Request::Account))
        };
        thread::sleep(Duration::from_millis(10));

        assert!(session.close());
        assert!(worker.join().unwrap().is_ok());
    }

    #[test]
    fn close_is_bounded() {
        let transport = MockTransport::with_handler(|_| ok());
        transport.set_latency(Duration::from_millis(300));
        let policy = policy(1).with_close_timeout(Duration::from_millis(20));
        let session = Session::open(transport, "mock://store", trust(), policy).unwrap();

        let worker = {
            let session = session.clone();
            thread::spawn(move || session.submit(&Request::Account))
        };
        thread::sleep(Duration::from_millis(10));

        let start = Instant::now();
        assert!(!session.close());
        assert!(start.elapsed() < Duration::from_millis(250));
        let _ = worker.join().unwrap();
    }
}
