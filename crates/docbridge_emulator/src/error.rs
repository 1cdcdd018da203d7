//! Error types for the emulator.

use docbridge_protocol::http::status;
use docbridge_protocol::ErrorBody;
use thiserror::Error;

/// Result type for emulator operations.
pub type EmulatorResult<T> = Result<T, EmulatorError>;

/// Errors that can occur in the emulator.
#[derive(Error, Debug)]
pub enum EmulatorError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Missing or invalid signature.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Unknown database, container or route.
    #[error("not found: {0}")]
    NotFound(String),

    /// Request exceeds a size limit.
    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    /// Injected or load related failure that may succeed later.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Internal emulator error.
    #[error("internal error: {0}")]
    Internal(String),

    /// Snapshot could not be read or written.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EmulatorError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            EmulatorError::InvalidRequest(_)
                | EmulatorError::Unauthorized(_)
                | EmulatorError::NotFound(_)
                | EmulatorError::PayloadTooLarge(_)
        )
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }

    /// HTTP status reported for this error.
    pub fn status(&self) -> u16 {
        match self {
            EmulatorError::InvalidRequest(_) => status::BAD_REQUEST,
            EmulatorError::Unauthorized(_) => status::UNAUTHORIZED,
            EmulatorError::NotFound(_) => status::NOT_FOUND,
            EmulatorError::PayloadTooLarge(_) => status::PAYLOAD_TOO_LARGE,
            EmulatorError::Unavailable(_) => status::SERVICE_UNAVAILABLE,
            EmulatorError::Internal(_)
            | EmulatorError::Persistence(_)
            | EmulatorError::Io(_) => status::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            EmulatorError::InvalidRequest(_) => "BadRequest",
            EmulatorError::Unauthorized(_) => "Unauthorized",
            EmulatorError::NotFound(_) => "NotFound",
            EmulatorError::PayloadTooLarge(_) => "RequestEntityTooLarge",
            EmulatorError::Unavailable(_) => "ServiceUnavailable",
            EmulatorError::Internal(_)
            | EmulatorError::Persistence(_)
            | EmulatorError::Io(_) => "InternalServerError",
        }
    }

    /// Error body sent to the client.
    pub fn body(&self) -> ErrorBody {
        ErrorBody::new(self.code(), self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(EmulatorError::InvalidRequest("bad".into()).is_client_error());
        assert!(EmulatorError::Internal("oops".into()).is_server_error());
        assert!(EmulatorError::Unavailable("busy".into()).is_server_error());
        assert!(!EmulatorError::NotFound("db".into()).is_server_error());
    }

    #[test]
    fn statuses() {
        assert_eq!(EmulatorError::Unauthorized("sig".into()).status(), 401);
        assert_eq!(EmulatorError::PayloadTooLarge("big".into()).status(), 413);
        assert!(status::is_transient(
            EmulatorError::Unavailable("busy".into()).status()
        ));
        assert!(!status::is_transient(EmulatorError::NotFound("x".into()).status()));
    }

    #[test]
    fn body_carries_code_and_message() {
        let body = EmulatorError::NotFound("database Assets".into()).body();
        assert_eq!(body.code, "NotFound");
        assert!(body.message.contains("Assets"));
    }
}
