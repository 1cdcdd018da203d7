//! Concurrent bulk writes.
//!
//! Input records are cut into batches bounded by record count and encoded
//! size, and up to `concurrency` batches are in flight at once. Every input
//! record ends with exactly one [`RecordOutcome`], reported in input order;
//! a failure of one record never changes the outcome of another.

use crate::cancel::CancellationToken;
use crate::drain::DrainGate;
use crate::error::{ClientError, ClientResult, ConnectionError, RequestError};
use crate::session::{Acknowledged, Session, SessionState};
use crate::transport::Transport;
use docbridge_protocol::{ItemStatus, Record, Request, Response};
use std::collections::HashMap;
use std::fmt;
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Why a record was not written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// The record failed validation.
    Invalid(String),
    /// The write conflicted with stored state.
    Conflict(String),
    /// The batch failed with a non-retryable error.
    Permanent(String),
    /// Transient failures outlasted the retry budget.
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
    },
    /// The write was cancelled before the record was acknowledged.
    Cancelled,
    /// Shutdown gave up waiting for the record's batch.
    Timeout,
    /// Shutdown began before the record was dispatched.
    ShuttingDown,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Invalid(m) => write!(f, "invalid: {m}"),
            RejectReason::Conflict(m) => write!(f, "conflict: {m}"),
            RejectReason::Permanent(m) => write!(f, "permanent failure: {m}"),
            RejectReason::RetriesExhausted { attempts } => {
                write!(f, "retries exhausted after {attempts} attempts")
            }
            RejectReason::Cancelled => f.write_str("cancelled"),
            RejectReason::Timeout => f.write_str("timed out during shutdown"),
            RejectReason::ShuttingDown => f.write_str("shutting down"),
        }
    }
}

/// Final state of one input record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Acknowledged on the first attempt.
    Committed,
    /// Acknowledged after more than one attempt.
    Retried {
        /// Attempts made, including the successful one.
        attempts: u32,
    },
    /// Not written.
    Rejected(RejectReason),
}

impl RecordOutcome {
    /// Returns true if the store acknowledged the record.
    pub fn is_success(&self) -> bool {
        !matches!(self, RecordOutcome::Rejected(_))
    }
}

/// Result of a bulk write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResult {
    /// Number of input records consumed.
    pub submitted: usize,
    /// Records acknowledged by the store.
    pub succeeded: usize,
    /// One outcome per input record, in input order.
    pub outcomes: Vec<RecordOutcome>,
    /// Batches dispatched to the store.
    pub batches: usize,
    /// Highest number of batches that were in flight together.
    pub max_in_flight: usize,
    /// Lowest effective concurrency the throttle reached.
    pub lowest_concurrency: usize,
    /// Effective concurrency when the write finished.
    pub final_concurrency: usize,
}

impl BatchResult {
    /// Input positions and reasons of rejected records.
    pub fn rejected(&self) -> impl Iterator<Item = (usize, &RejectReason)> {
        self.outcomes
            .iter()
            .enumerate()
            .filter_map(|(i, outcome)| match outcome {
                RecordOutcome::Rejected(reason) => Some((i, reason)),
                _ => None,
            })
    }

    /// Returns true if every record was acknowledged.
    pub fn is_complete_success(&self) -> bool {
        self.succeeded == self.submitted
    }
}

/// Effective concurrency that shrinks while the session is degraded.
///
/// Each batch that resolves while the session is degraded lowers the limit
/// by one, down to one. Each batch acknowledged while the session is ready
/// raises it by one, up to the ceiling.
#[derive(Debug, Clone)]
pub struct AdditiveThrottle {
    ceiling: usize,
    current: usize,
    floor_seen: usize,
}

impl AdditiveThrottle {
    /// Creates a throttle starting at `ceiling`.
    pub fn new(ceiling: usize) -> Self {
        let ceiling = ceiling.max(1);
        Self {
            ceiling,
            current: ceiling,
            floor_seen: ceiling,
        }
    }

    /// Adjusts the limit after a batch resolved.
    pub fn on_resolved(&mut self, state: SessionState, acknowledged: bool) {
        match state {
            SessionState::Degraded => {
                self.current = self.current.saturating_sub(1).max(1);
                self.floor_seen = self.floor_seen.min(self.current);
            }
            SessionState::Ready if acknowledged => {
                self.current = (self.current + 1).min(self.ceiling);
            }
            _ => {}
        }
    }

    /// Current limit.
    pub fn current(&self) -> usize {
        self.current
    }

    /// Upper bound of the limit.
    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Lowest limit reached so far.
    pub fn lowest(&self) -> usize {
        self.floor_seen
    }
}

struct Batch {
    positions: Vec<usize>,
    records: Vec<Record>,
}

type BatchReport = (usize, ClientResult<Acknowledged>);

/// Cuts batches from the input as they are needed.
///
/// Records are pulled one at a time; a record that would overflow the byte
/// bound is held back for the next batch.
struct Batcher<I: Iterator<Item = Record>> {
    input: std::iter::Fuse<I>,
    carry: Option<(usize, Record, usize)>,
    pulled: usize,
    batch_size_limit: usize,
    max_batch_bytes: usize,
}

impl<I: Iterator<Item = Record>> Batcher<I> {
    fn next_batch(&mut self, outcomes: &mut Vec<Option<RecordOutcome>>) -> Option<Batch> {
        let mut batch = Batch {
            positions: Vec::new(),
            records: Vec::new(),
        };
        let mut bytes = 0usize;

        while batch.records.len() < self.batch_size_limit {
            let (position, record, size) = match self.carry.take() {
                Some(entry) => entry,
                None => {
                    let Some(record) = self.input.next() else {
                        break;
                    };
                    let position = self.pulled;
                    self.pulled += 1;
                    let size = record.encoded_len();
                    if size > self.max_batch_bytes {
                        outcomes.push(Some(RecordOutcome::Rejected(RejectReason::Invalid(
                            format!(
                                "record is {size} bytes, batches are limited to {}",
                                self.max_batch_bytes
                            ),
                        ))));
                        continue;
                    }
                    outcomes.push(None);
                    (position, record, size)
                }
            };
            if !batch.records.is_empty() && bytes + size > self.max_batch_bytes {
                self.carry = Some((position, record, size));
                break;
            }
            batch.positions.push(position);
            batch.records.push(record);
            bytes += size;
        }

        (!batch.records.is_empty()).then_some(batch)
    }

    /// Consumes the rest of the input, rejecting every record with `reason`.
    fn reject_rest(&mut self, reason: &RejectReason, outcomes: &mut Vec<Option<RecordOutcome>>) {
        if let Some((position, _, _)) = self.carry.take() {
            outcomes[position] = Some(RecordOutcome::Rejected(reason.clone()));
        }
        for _ in self.input.by_ref() {
            self.pulled += 1;
            outcomes.push(Some(RecordOutcome::Rejected(reason.clone())));
        }
    }
}

/// Writes records through a session.
pub struct BulkWriter<T: Transport> {
    session: Session<T>,
    database: String,
    container: String,
    batch_size_limit: usize,
    max_batch_bytes: usize,
    max_concurrency: Option<usize>,
    gate: DrainGate,
}

impl<T: Transport + 'static> BulkWriter<T> {
    /// Creates a writer with the default batch bounds.
    pub fn new(session: Session<T>, database: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            session,
            database: database.into(),
            container: container.into(),
            batch_size_limit: crate::config::DEFAULT_BATCH_SIZE_LIMIT,
            max_batch_bytes: crate::config::DEFAULT_MAX_BATCH_BYTES,
            max_concurrency: None,
            gate: DrainGate::new(),
        }
    }

    /// Sets the maximum records per batch.
    pub fn with_batch_size_limit(mut self, limit: usize) -> Self {
        self.batch_size_limit = limit.max(1);
        self
    }

    /// Sets the maximum encoded bytes per batch.
    pub fn with_max_batch_bytes(mut self, bytes: usize) -> Self {
        self.max_batch_bytes = bytes.max(1);
        self
    }

    /// Caps the concurrency any single write may ask for.
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = Some(max.max(1));
        self
    }

    /// Uses `gate` to admit batches, so a coordinator can drain them.
    pub fn with_gate(mut self, gate: DrainGate) -> Self {
        self.gate = gate;
        self
    }

    /// Writes `records` with up to `concurrency` batches in flight.
    ///
    /// The input is consumed lazily: records are pulled only when a batch
    /// slot is free, so a slow store holds back a streaming source.
    pub fn write<I>(&self, records: I, concurrency: usize) -> ClientResult<BatchResult>
    where
        I: IntoIterator<Item = Record>,
    {
        self.write_with(records, concurrency, &CancellationToken::new())
    }

    /// Like [`BulkWriter::write`], stopping early when `cancel` fires.
    ///
    /// Records not yet dispatched when the token fires are rejected as
    /// cancelled; batches already in flight resolve normally.
    pub fn write_with<I>(
        &self,
        records: I,
        concurrency: usize,
        cancel: &CancellationToken,
    ) -> ClientResult<BatchResult>
    where
        I: IntoIterator<Item = Record>,
    {
        if concurrency == 0 {
            return Err(ClientError::InvalidConcurrency);
        }
        if !self.gate.is_open() {
            return Err(ClientError::ShuttingDown);
        }
        let concurrency = match self.max_concurrency {
            Some(max) if concurrency > max => {
                debug!(requested = concurrency, max, "clamping concurrency");
                max
            }
            _ => concurrency,
        };

        let started = Instant::now();
        let mut outcomes: Vec<Option<RecordOutcome>> = Vec::new();
        let mut batcher = Batcher {
            input: records.into_iter().fuse(),
            carry: None,
            pulled: 0,
            batch_size_limit: self.batch_size_limit,
            max_batch_bytes: self.max_batch_bytes,
        };

        let (tx, rx) = mpsc::channel::<BatchReport>();
        let batch_cancel = cancel.child();
        let mut throttle = AdditiveThrottle::new(concurrency);
        let mut in_flight: HashMap<usize, Vec<usize>> = HashMap::new();
        let mut next_batch = 0usize;
        let mut max_in_flight = 0usize;
        let mut exhausted = false;
        let mut stop: Option<RejectReason> = None;

        loop {
            while !exhausted && stop.is_none() && in_flight.len() < throttle.current() {
                if cancel.is_cancelled() {
                    stop = Some(RejectReason::Cancelled);
                    break;
                }
                let Some(guard) = self.gate.enter() else {
                    stop = Some(RejectReason::ShuttingDown);
                    break;
                };
                let Some(batch) = batcher.next_batch(&mut outcomes) else {
                    exhausted = true;
                    break;
                };

                let id = next_batch;
                next_batch += 1;
                let request = Request::Upsert {
                    database: self.database.clone(),
                    container: self.container.clone(),
                    records: batch.records,
                };
                in_flight.insert(id, batch.positions);
                max_in_flight = max_in_flight.max(in_flight.len());
                debug!(batch = id, in_flight = in_flight.len(), "dispatching batch");

                let session = self.session.clone();
                let token = batch_cancel.clone();
                let tx = tx.clone();
                std::thread::spawn(move || {
                    let result = session.submit_with(&request, &token);
                    drop(guard);
                    let _ = tx.send((id, result));
                });
            }

            if in_flight.is_empty() && (exhausted || stop.is_some()) {
                break;
            }

            match rx.recv_timeout(POLL_INTERVAL) {
                Ok((id, result)) => {
                    let Some(positions) = in_flight.remove(&id) else {
                        continue;
                    };
                    let acknowledged = result.is_ok();
                    self.resolve(&positions, result, &mut outcomes);
                    throttle.on_resolved(self.session.state(), acknowledged);
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }

            if self.gate.is_expired() && !in_flight.is_empty() {
                warn!(batches = in_flight.len(), "abandoning in-flight batches at shutdown");
                batch_cancel.cancel();
                self.abandon(&rx, &mut in_flight, &mut outcomes);
                stop.get_or_insert(RejectReason::ShuttingDown);
                break;
            }
        }

        if let Some(reason) = &stop {
            batcher.reject_rest(reason, &mut outcomes);
        }

        let outcomes: Vec<RecordOutcome> = outcomes
            .into_iter()
            .map(|o| o.unwrap_or(RecordOutcome::Rejected(RejectReason::ShuttingDown)))
            .collect();
        let submitted = batcher.pulled;
        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();

        info!(
            submitted,
            succeeded,
            batches = next_batch,
            lowest_concurrency = throttle.lowest(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "bulk write finished"
        );

        Ok(BatchResult {
            submitted,
            succeeded,
            outcomes,
            batches: next_batch,
            max_in_flight,
            lowest_concurrency: throttle.lowest(),
            final_concurrency: throttle.current(),
        })
    }

    /// Resolves batches whose results already arrived, then reports the
    /// rest as timed out.
    fn abandon(
        &self,
        rx: &mpsc::Receiver<BatchReport>,
        in_flight: &mut HashMap<usize, Vec<usize>>,
        outcomes: &mut [Option<RecordOutcome>],
    ) {
        while let Ok((id, result)) = rx.try_recv() {
            if let Some(positions) = in_flight.remove(&id) {
                self.resolve(&positions, result, outcomes);
            }
        }
        for positions in in_flight.values() {
            for &i in positions {
                outcomes[i] = Some(RecordOutcome::Rejected(RejectReason::Timeout));
            }
        }
        in_flight.clear();
    }

    fn resolve(
        &self,
        positions: &[usize],
        result: ClientResult<Acknowledged>,
        outcomes: &mut [Option<RecordOutcome>],
    ) {
        let reason = match result {
            Ok(Acknowledged {
                response: Response::Upserted { items },
                attempts,
            }) if items.len() == positions.len() => {
                for (&i, item) in positions.iter().zip(items) {
                    outcomes[i] = Some(match item.status {
                        ItemStatus::Committed if attempts > 1 => RecordOutcome::Retried { attempts },
                        ItemStatus::Committed => RecordOutcome::Committed,
                        ItemStatus::Invalid(m) => RecordOutcome::Rejected(RejectReason::Invalid(m)),
                        ItemStatus::Conflict(m) => {
                            RecordOutcome::Rejected(RejectReason::Conflict(m))
                        }
                    });
                }
                return;
            }
            Ok(ack) => RejectReason::Permanent(format!(
                "unexpected {} response to a batch of {}",
                ack.response.kind(),
                positions.len()
            )),
            Err(ClientError::Request(RequestError::Cancelled)) => RejectReason::Cancelled,
            Err(ClientError::Request(RequestError::Closed)) => RejectReason::ShuttingDown,
            Err(ClientError::Request(RequestError::Permanent(m)))
            | Err(ClientError::Connection(ConnectionError::Fatal(m))) => RejectReason::Permanent(m),
            Err(e) if e.is_retryable() => RejectReason::RetriesExhausted {
                attempts: self.session.policy().max_attempts.max(1),
            },
            Err(e) => RejectReason::Permanent(e.to_string()),
        };
        for &i in positions {
            outcomes[i] = Some(RecordOutcome::Rejected(reason.clone()));
        }
    }

    /// The session batches are written through.
    pub fn session(&self) -> &Session<T> {
        &self.session
    }

    /// The gate admitting batches.
    pub fn gate(&self) -> &DrainGate {
        &self.gate
    }
}
