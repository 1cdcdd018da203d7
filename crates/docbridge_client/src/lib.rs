//! # docbridge client
//!
//! Blocking client for partitioned document stores.
//!
//! This crate provides:
//! - Trust material loading into an explicit, immutable trust context
//! - Sessions with retry, reconnection and health tracking
//! - Concurrent bulk writes with per-record outcomes
//! - Lazy, paginated query streams
//! - Ordered startup and bounded-drain shutdown
//!
//! ## Architecture
//!
//! Every component talks to the store through a [`Session`], which owns a
//! connection obtained from a [`Transport`]. The [`LifecycleCoordinator`]
//! builds the session and hands out writers and query executors that share
//! its [`DrainGate`], so shutdown can stop admissions and wait for work in
//! flight.
//!
//! ## Key Invariants
//!
//! - Every input record of a bulk write gets exactly one outcome
//! - Fatal connection failures and permanent request failures are never retried
//! - A query stream holds at most one page beyond the one being consumed
//! - Shutdown waits at most the drain timeout for in-flight batches

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bulk;
mod cancel;
mod config;
mod drain;
mod error;
mod http;
mod lifecycle;
mod query;
mod session;
mod transport;
mod trust;

pub use bulk::{AdditiveThrottle, BatchResult, BulkWriter, RecordOutcome, RejectReason};
pub use cancel::CancellationToken;
pub use config::{
    AccountKey, ClientConfig, RetryPolicy, DEFAULT_BATCH_SIZE_LIMIT, DEFAULT_MAX_BATCH_BYTES,
    ENV_PREFIX,
};
pub use drain::{DrainGate, DrainGuard};
pub use error::{ClientError, ClientResult, ConnectionError, CredentialError, RequestError};
pub use http::{classify_status, HttpClient, HttpConnection, HttpFailure, HttpTransport, LoopbackClient};
pub use lifecycle::{LifecycleCoordinator, LifecyclePhase, ShutdownReport};
pub use query::{QueryCursor, QueryExecutor, QueryStream};
pub use session::{Acknowledged, Session, SessionState, SessionStats};
pub use transport::{MockHandle, MockTransport, Transport};
pub use trust::{
    fingerprint, parse_pem_certificates, CredentialSource, CredentialSpec, EnvPem, PemFile,
    StaticCredentials, TrustContext, TrustMaterialLoader,
};

pub use docbridge_protocol::{ConnectionMode, ContinuationToken, Predicate, Record};
