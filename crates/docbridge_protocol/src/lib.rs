//! # docbridge protocol
//!
//! Wire types shared by the docbridge client and the store emulator.
//!
//! This crate provides:
//! - `Record` documents addressed by `(partition_key, id)`
//! - `Predicate` filters evaluated by the store
//! - `Request`/`Response` messages and their HTTP routes
//! - CBOR body encoding/decoding
//! - Master-key request signatures
//! - PEM encoding of certificates
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
mod error;
pub mod http;
mod messages;
pub mod pem;
mod predicate;
mod record;

pub use error::{ProtocolError, ProtocolResult};
pub use http::{HttpRequest, HttpResponse, HttpService, Method, ServiceError};
pub use messages::{
    decode_body, encode_body, AccountInfo, ConnectionMode, ContinuationToken, ErrorBody,
    ItemResult, ItemStatus, Request, Response,
};
pub use predicate::Predicate;
pub use record::{Record, FORBIDDEN_ID_CHARS, MAX_ID_LEN};
