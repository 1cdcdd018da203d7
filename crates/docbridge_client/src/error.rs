//! Error types for the client.

use std::time::{Duration, SystemTime};
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors raised while loading trust material. Never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// The source produced no usable material.
    #[error("credential material missing: {0}")]
    Missing(String),

    /// The material could not be parsed.
    #[error("credential material malformed: {0}")]
    Malformed(String),

    /// The material is past its validity window.
    #[error("credential material expired at {expired_at:?}")]
    Expired {
        /// End of the validity window.
        expired_at: SystemTime,
    },

    /// Reading the material or writing the trust bundle failed.
    #[error("credential io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for CredentialError {
    fn from(err: std::io::Error) -> Self {
        CredentialError::Io(err.to_string())
    }
}

/// Errors raised while establishing a session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The endpoint may become reachable later.
    #[error("transient connection failure: {0}")]
    Transient(String),

    /// Authentication, trust or protocol failure. Never retried.
    #[error("fatal connection failure: {0}")]
    Fatal(String),
}

impl ConnectionError {
    /// Creates a transient connection error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Creates a fatal connection error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    /// Returns true if the connection attempt can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConnectionError::Transient(_))
    }
}

/// Errors raised by a single request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// Network blip or throttling.
    #[error("transient request failure: {0}")]
    Transient(String),

    /// Validation, conflict or authorization failure.
    #[error("permanent request failure: {0}")]
    Permanent(String),

    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,

    /// The round trip exceeded its timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The session is closed.
    #[error("session closed")]
    Closed,
}

impl RequestError {
    /// Creates a transient request error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Creates a permanent request error.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    /// Returns true if this error can be retried.
    ///
    /// Timeouts count as transient failures.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RequestError::Transient(_) | RequestError::Timeout(_))
    }
}

/// Top-level client error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Trust material could not be loaded.
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// The session could not be established.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// A request failed.
    #[error(transparent)]
    Request(#[from] RequestError),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The client no longer accepts submissions.
    #[error("client is shutting down")]
    ShuttingDown,

    /// Startup did not reach ready in time.
    #[error("startup did not reach ready within {0:?}")]
    StartupTimeout(Duration),

    /// Bulk writes need at least one concurrent batch.
    #[error("concurrency must be at least 1")]
    InvalidConcurrency,

    /// The store answered with an unexpected message.
    #[error("unexpected response: expected {expected}, got {actual}")]
    UnexpectedResponse {
        /// Expected response kind.
        expected: &'static str,
        /// Received response kind.
        actual: &'static str,
    },

    /// A document could not be converted.
    #[error("document error: {0}")]
    Document(String),
}

impl ClientError {
    /// Returns true if retrying the whole operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Connection(e) => e.is_retryable(),
            ClientError::Request(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<docbridge_protocol::ProtocolError> for ClientError {
    fn from(err: docbridge_protocol::ProtocolError) -> Self {
        ClientError::Document(err.to_string())
    }
}
