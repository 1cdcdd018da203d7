//! # docbridge emulator
//!
//! In-process emulator of a partitioned document store.
//!
//! This crate provides:
//! - The store routes (account probe, containers, upserts, reads, queries)
//! - Master-key signature checks with bounded clock skew
//! - A self-issued certificate clients must trust explicitly
//! - Scripted fault injection
//! - Optional snapshot persistence across restarts
//!
//! # Architecture
//!
//! The emulator implements [`HttpService`](docbridge_protocol::HttpService),
//! so a client reaches it through a loopback HTTP client instead of a
//! socket. Requests pass through, in order:
//! 1. Readiness (startup delay, stopped) checks, refusing the connection
//! 2. The [`FaultPlan`]
//! 3. Signature authentication
//! 4. Route dispatch against the [`DocumentStore`]
//!
//! # Partitioning
//!
//! Records are spread over `partition_count` partitions by a hash of their
//! partition key. Queries walk partitions in order, so results across
//! partitions come back in store order rather than insertion order.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod certificate;
mod config;
mod error;
mod faults;
mod handler;
mod server;
mod store;

pub use auth::{generate_key, RequestAuthenticator};
pub use certificate::Certificate;
pub use config::{EmulatorConfig, DEFAULT_ENDPOINT};
pub use error::{EmulatorError, EmulatorResult};
pub use faults::{Fault, FaultPlan};
pub use handler::{HandlerContext, RequestHandler};
pub use server::{Emulator, EmulatorStats, SNAPSHOT_FILE};
pub use store::{DocumentStore, QueryPage};
