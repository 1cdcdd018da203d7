//! Transport layer abstraction.

use crate::error::{ConnectionError, RequestError};
use crate::trust::TrustContext;
use docbridge_protocol::{Request, Response};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Moves requests to the store and classifies failures.
///
/// A transport hands out connection handles; the session owns the handle
/// and asks the transport whether it is still usable before every attempt.
pub trait Transport: Send + Sync {
    /// Connection state owned by the session.
    type Handle: Send + Sync;

    /// Establishes a connection, verifying the peer against `trust`.
    fn connect(
        &self,
        endpoint: &str,
        trust: &TrustContext,
        timeout: Duration,
    ) -> Result<Self::Handle, ConnectionError>;

    /// Performs one round trip, bounded by `timeout`.
    fn send(
        &self,
        handle: &Self::Handle,
        request: &Request,
        timeout: Duration,
    ) -> Result<Response, RequestError>;

    /// Releases the connection.
    fn close(&self, handle: &Self::Handle);

    /// Returns false once the connection can no longer carry requests.
    fn is_open(&self, handle: &Self::Handle) -> bool;
}

type Handler = Arc<dyn Fn(&Request) -> Result<Response, RequestError> + Send + Sync>;

/// Connection handle issued by [`MockTransport`].
#[derive(Debug)]
pub struct MockHandle {
    generation: u64,
    open: AtomicBool,
}

/// A scripted transport for testing.
///
/// Scripted results are consumed first, in order. After that, requests go
/// to the handler if one is set, and fail transiently otherwise.
#[derive(Default)]
pub struct MockTransport {
    connect_script: Mutex<VecDeque<Result<(), ConnectionError>>>,
    send_script: Mutex<VecDeque<Result<Response, RequestError>>>,
    handler: Mutex<Option<Handler>>,
    latency: Mutex<Duration>,
    generation: AtomicU64,
    connects: AtomicU64,
    closes: AtomicU64,
    sent: Mutex<Vec<Request>>,
}

impl MockTransport {
    /// Creates a transport that accepts every connection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transport answering every request with `handler`.
    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&Request) -> Result<Response, RequestError> + Send + Sync + 'static,
    {
        let transport = Self::new();
        transport.set_handler(handler);
        transport
    }

    /// Replaces the fallback handler.
    pub fn set_handler<F>(&self, handler: F)
    where
        F: Fn(&Request) -> Result<Response, RequestError> + Send + Sync + 'static,
    {
        *self.handler.lock() = Some(Arc::new(handler));
    }

    /// Queues the result of the next connection attempt.
    pub fn push_connect(&self, result: Result<(), ConnectionError>) {
        self.connect_script.lock().push_back(result);
    }

    /// Queues the result of the next request.
    pub fn push_send(&self, result: Result<Response, RequestError>) {
        self.send_script.lock().push_back(result);
    }

    /// Delays every request; a delay beyond the request timeout times out.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Drops every open connection, as a reset would.
    pub fn reset_connections(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of successful connections.
    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Number of closed handles.
    pub fn closes(&self) -> u64 {
        self.closes.load(Ordering::SeqCst)
    }

    /// Requests seen so far, in arrival order.
    pub fn sent(&self) -> Vec<Request> {
        self.sent.lock().clone()
    }
}

impl Transport for MockTransport {
    type Handle = MockHandle;

    fn connect(
        &self,
        _endpoint: &str,
        _trust: &TrustContext,
        _timeout: Duration,
    ) -> Result<MockHandle, ConnectionError> {
        if let Some(result) = self.connect_script.lock().pop_front() {
            result?;
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(MockHandle {
            generation: self.generation.load(Ordering::SeqCst),
            open: AtomicBool::new(true),
        })
    }

    fn send(
        &self,
        handle: &MockHandle,
        request: &Request,
        timeout: Duration,
    ) -> Result<Response, RequestError> {
        if !self.is_open(handle) {
            return Err(RequestError::transient("connection reset"));
        }
        self.sent.lock().push(request.clone());

        let latency = *self.latency.lock();
        if latency > timeout {
            std::thread::sleep(timeout);
            return Err(RequestError::Timeout(timeout));
        }
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }

        if let Some(result) = self.send_script.lock().pop_front() {
            return result;
        }
        // Handlers run outside the lock so concurrent sends overlap.
        let handler = self.handler.lock().clone();
        match handler {
            Some(handler) => handler(request),
            None => Err(RequestError::transient("no scripted response")),
        }
    }

    fn close(&self, handle: &MockHandle) {
        if handle.open.swap(false, Ordering::SeqCst) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_open(&self, handle: &MockHandle) -> bool {
        handle.open.load(Ordering::SeqCst)
            && handle.generation == self.generation.load(Ordering::SeqCst)
    }
}
