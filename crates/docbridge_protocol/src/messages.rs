//! Protocol messages and their routes.

use crate::error::{ProtocolError, ProtocolResult};
use crate::http::Method;
use crate::predicate::Predicate;
use crate::record::Record;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How requests reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionMode {
    /// Requests address the data routes directly.
    #[default]
    Direct,
    /// Requests go through the `/gateway` route family.
    Gateway,
}

impl ConnectionMode {
    /// Returns the route prefix for this mode.
    pub fn prefix(&self) -> &'static str {
        match self {
            ConnectionMode::Direct => "",
            ConnectionMode::Gateway => "/gateway",
        }
    }
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionMode::Direct => f.write_str("direct"),
            ConnectionMode::Gateway => f.write_str("gateway"),
        }
    }
}

impl FromStr for ConnectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(ConnectionMode::Direct),
            "gateway" => Ok(ConnectionMode::Gateway),
            other => Err(format!("unknown connection mode: {other}")),
        }
    }
}

/// Opaque position of a paginated query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContinuationToken(String);

impl ContinuationToken {
    /// Wraps a token issued by the store.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A single logical operation against the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    /// Account probe used as the connection handshake.
    Account,
    /// Creates the database and container if they do not exist.
    EnsureContainer {
        /// Database name.
        database: String,
        /// Container name.
        container: String,
    },
    /// Deletes a database and everything in it.
    DeleteDatabase {
        /// Database name.
        database: String,
    },
    /// Inserts or replaces a batch of records.
    Upsert {
        /// Database name.
        database: String,
        /// Container name.
        container: String,
        /// Records to write.
        records: Vec<Record>,
    },
    /// Reads one record by identity.
    Read {
        /// Database name.
        database: String,
        /// Container name.
        container: String,
        /// Record identifier.
        id: String,
        /// Partition key value.
        partition_key: String,
    },
    /// Fetches one page of a filtered query.
    Query {
        /// Database name.
        database: String,
        /// Container name.
        container: String,
        /// Filter to apply.
        predicate: Predicate,
        /// Position to resume from, `None` for the first page.
        continuation: Option<ContinuationToken>,
        /// Maximum records per page.
        max_items: u32,
    },
}

impl Request {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Account => "account",
            Request::EnsureContainer { .. } => "ensure_container",
            Request::DeleteDatabase { .. } => "delete_database",
            Request::Upsert { .. } => "upsert",
            Request::Read { .. } => "read",
            Request::Query { .. } => "query",
        }
    }

    /// Method and resource path (without the connection mode prefix).
    pub fn route(&self) -> (Method, String) {
        match self {
            Request::Account => (Method::Get, "/".to_string()),
            Request::EnsureContainer {
                database,
                container,
            } => (Method::Put, format!("/dbs/{database}/colls/{container}")),
            Request::DeleteDatabase { database } => (Method::Delete, format!("/dbs/{database}")),
            Request::Upsert {
                database,
                container,
                ..
            } => (
                Method::Post,
                format!("/dbs/{database}/colls/{container}/docs"),
            ),
            Request::Read {
                database,
                container,
                id,
                ..
            } => (
                Method::Get,
                format!("/dbs/{database}/colls/{container}/docs/{id}"),
            ),
            Request::Query {
                database,
                container,
                ..
            } => (
                Method::Post,
                format!("/dbs/{database}/colls/{container}/query"),
            ),
        }
    }

    /// Full path for the given connection mode.
    pub fn path(&self, mode: ConnectionMode) -> String {
        let (_, resource) = self.route();
        format!("{}{}", mode.prefix(), resource)
    }
}

/// Account metadata returned by the handshake probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    /// Number of physical partitions.
    pub partition_count: u32,
    /// Whether the gateway routes are served.
    pub gateway_enabled: bool,
    /// Existing databases.
    pub databases: Vec<String>,
}

/// Store verdict for a single record in an upsert batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemStatus {
    /// The record was durably written.
    Committed,
    /// The record failed validation.
    Invalid(String),
    /// The write conflicted with the stored state.
    Conflict(String),
}

impl ItemStatus {
    /// Returns true if the record was written.
    pub fn is_committed(&self) -> bool {
        matches!(self, ItemStatus::Committed)
    }
}

/// Per-record result inside an upsert response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemResult {
    /// Record identifier.
    pub id: String,
    /// Partition key value.
    pub partition_key: String,
    /// Verdict.
    pub status: ItemStatus,
}

/// Successful response bodies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    /// Handshake result.
    Account(AccountInfo),
    /// Container exists; `created` is false when it already existed.
    ContainerReady {
        /// Whether the call created it.
        created: bool,
    },
    /// Database deletion result.
    Deleted {
        /// Whether the database existed.
        existed: bool,
    },
    /// Per-record outcomes of an upsert, in request order.
    Upserted {
        /// Item results.
        items: Vec<ItemResult>,
    },
    /// Point read result.
    Item(Option<Record>),
    /// One page of query results.
    Page {
        /// Records in store order.
        records: Vec<Record>,
        /// Position of the next page, `None` when exhausted.
        continuation: Option<ContinuationToken>,
    },
}

impl Response {
    /// Short name used in logs and mismatch errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Response::Account(_) => "account",
            Response::ContainerReady { .. } => "container_ready",
            Response::Deleted { .. } => "deleted",
            Response::Upserted { .. } => "upserted",
            Response::Item(_) => "item",
            Response::Page { .. } => "page",
        }
    }
}

/// Body of a non-2xx response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine readable code, e.g. `TooManyRequests`.
    pub code: String,
    /// Human readable message.
    pub message: String,
}

impl ErrorBody {
    /// Creates an error body.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Encodes a message body as CBOR.
pub fn encode_body<T: Serialize>(value: &T) -> ProtocolResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| ProtocolError::encoding_failed(e.to_string()))?;
    Ok(buf)
}

/// Decodes a CBOR message body.
pub fn decode_body<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    ciborium::from_reader(bytes).map_err(|e| ProtocolError::decoding_failed(e.to_string()))
}
