//! HTTP envelope shared by the client transport and the emulator.
//!
//! Only the shape of requests and responses lives here; moving bytes over
//! a socket is left to an `HttpClient` implementation on the client side.

use bytes::Bytes;
use std::fmt;
use thiserror::Error;

/// Header carrying the request signature.
pub const AUTHORIZATION: &str = "authorization";
/// Header carrying the signing date (Unix milliseconds).
pub const DATE: &str = "x-date";
/// Header carrying the per-request activity id.
pub const ACTIVITY_ID: &str = "x-activity-id";

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET.
    Get,
    /// PUT.
    Put,
    /// POST.
    Post,
    /// DELETE.
    Delete,
}

impl Method {
    /// Upper-case method name, as used in signatures.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Method.
    pub method: Method,
    /// Path relative to the endpoint, starting with `/`.
    pub path: String,
    /// Headers as lower-case name/value pairs.
    pub headers: Vec<(String, String)>,
    /// CBOR body.
    pub body: Bytes,
}

impl HttpRequest {
    /// Creates a request without headers.
    pub fn new(method: Method, path: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Adds a header.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.into()));
        self
    }

    /// Looks up a header by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// An HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// CBOR body.
    pub body: Bytes,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Status codes used by the store.
pub mod status {
    /// Request succeeded.
    pub const OK: u16 = 200;
    /// Resource was created.
    pub const CREATED: u16 = 201;
    /// Malformed request.
    pub const BAD_REQUEST: u16 = 400;
    /// Missing or invalid signature.
    pub const UNAUTHORIZED: u16 = 401;
    /// Valid signature, not allowed.
    pub const FORBIDDEN: u16 = 403;
    /// Unknown resource or route.
    pub const NOT_FOUND: u16 = 404;
    /// The server gave up waiting for the request.
    pub const REQUEST_TIMEOUT: u16 = 408;
    /// Conflicting write.
    pub const CONFLICT: u16 = 409;
    /// Request body too large.
    pub const PAYLOAD_TOO_LARGE: u16 = 413;
    /// Request rate too large, retry later.
    pub const TOO_MANY_REQUESTS: u16 = 429;
    /// Retry the request with the same content.
    pub const RETRY_WITH: u16 = 449;
    /// Unexpected server failure.
    pub const INTERNAL_SERVER_ERROR: u16 = 500;
    /// Service temporarily unavailable.
    pub const SERVICE_UNAVAILABLE: u16 = 503;

    /// Returns true if a request failing with this status may succeed later.
    pub fn is_transient(code: u16) -> bool {
        matches!(
            code,
            REQUEST_TIMEOUT | TOO_MANY_REQUESTS | RETRY_WITH | INTERNAL_SERVER_ERROR
                | SERVICE_UNAVAILABLE
        )
    }
}

/// Failures below the HTTP layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Nothing is listening at the endpoint.
    #[error("connection refused")]
    ConnectionRefused,

    /// The connection dropped mid-request.
    #[error("connection reset")]
    ConnectionReset,
}

/// An in-process HTTP service, such as the emulator.
pub trait HttpService: Send + Sync {
    /// Handles one request.
    fn call(&self, request: &HttpRequest) -> Result<HttpResponse, ServiceError>;

    /// DER bytes of the certificate presented during the TLS handshake.
    fn server_certificate(&self) -> Result<Vec<u8>, ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_are_case_insensitive() {
        let request = HttpRequest::new(Method::Get, "/", Vec::new()).with_header("X-Date", "42");
        assert_eq!(request.header("x-date"), Some("42"));
        assert_eq!(request.header(DATE), Some("42"));
        assert_eq!(request.header("missing"), None);
    }

    #[test]
    fn transient_statuses() {
        assert!(status::is_transient(status::TOO_MANY_REQUESTS));
        assert!(status::is_transient(status::SERVICE_UNAVAILABLE));
        assert!(!status::is_transient(status::CONFLICT));
        assert!(!status::is_transient(status::UNAUTHORIZED));
    }

    #[test]
    fn success_range() {
        assert!(HttpResponse::new(status::CREATED, Vec::new()).is_success());
        assert!(!HttpResponse::new(status::NOT_FOUND, Vec::new()).is_success());
    }
}
