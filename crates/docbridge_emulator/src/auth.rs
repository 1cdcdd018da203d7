//! Request authentication.
//!
//! Every request must carry a master-key signature over its method, full
//! path and date. The date must lie within the configured clock skew of
//! the emulator clock so captured requests cannot be replayed later.

use crate::error::{EmulatorError, EmulatorResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use docbridge_protocol::auth;
use docbridge_protocol::http::{AUTHORIZATION, DATE};
use docbridge_protocol::HttpRequest;
use rand::RngCore;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Generates a random base64 account key.
pub fn generate_key() -> String {
    let mut bytes = [0u8; 64];
    rand::thread_rng().fill_bytes(&mut bytes);
    STANDARD.encode(bytes)
}

/// Validates request signatures.
#[derive(Clone)]
pub struct RequestAuthenticator {
    key: String,
    clock_skew: Duration,
}

impl RequestAuthenticator {
    /// Creates an authenticator for the given account key.
    pub fn new(key: impl Into<String>, clock_skew: Duration) -> Self {
        Self {
            key: key.into(),
            clock_skew,
        }
    }

    /// Returns the account key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Checks the signature and date headers of a request.
    pub fn authenticate(&self, request: &HttpRequest) -> EmulatorResult<()> {
        let header = request
            .header(AUTHORIZATION)
            .ok_or_else(|| EmulatorError::Unauthorized("missing authorization header".into()))?;
        let date: u64 = request
            .header(DATE)
            .ok_or_else(|| EmulatorError::Unauthorized("missing date header".into()))?
            .parse()
            .map_err(|_| EmulatorError::Unauthorized("malformed date header".into()))?;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        if now.abs_diff(date) > self.clock_skew.as_millis() as u64 {
            return Err(EmulatorError::Unauthorized(format!(
                "request date is {} ms away from the emulator clock",
                now.abs_diff(date)
            )));
        }

        if !auth::verify(
            self.key.as_bytes(),
            request.method,
            &request.path,
            date,
            header,
        ) {
            return Err(EmulatorError::Unauthorized("signature mismatch".into()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for RequestAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestAuthenticator")
            .field("key", &"<redacted>")
            .field("clock_skew", &self.clock_skew)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docbridge_protocol::Method;

    fn now_millis() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64
    }

    fn signed(key: &str, path: &str, date: u64) -> HttpRequest {
        HttpRequest::new(Method::Get, path, Vec::new())
            .with_header(AUTHORIZATION, auth::sign(key.as_bytes(), Method::Get, path, date))
            .with_header(DATE, date.to_string())
    }

    fn authenticator() -> RequestAuthenticator {
        RequestAuthenticator::new("secret", Duration::from_secs(60))
    }

    #[test]
    fn valid_signature() {
        assert!(authenticator()
            .authenticate(&signed("secret", "/", now_millis()))
            .is_ok());
    }

    #[test]
    fn wrong_key() {
        let result = authenticator().authenticate(&signed("other", "/", now_millis()));
        assert!(matches!(result, Err(EmulatorError::Unauthorized(_))));
    }

    #[test]
    fn stale_date() {
        let stale = now_millis() - 120_000;
        let result = authenticator().authenticate(&signed("secret", "/", stale));
        assert!(matches!(result, Err(EmulatorError::Unauthorized(m)) if m.contains("ms away")));
    }

    #[test]
    fn missing_headers() {
        let request = HttpRequest::new(Method::Get, "/", Vec::new());
        assert!(authenticator().authenticate(&request).is_err());

        let request = request.with_header(AUTHORIZATION, "type=master&ver=1.0&sig=abc");
        assert!(authenticator().authenticate(&request).is_err());
    }

    #[test]
    fn signature_covers_path() {
        let date = now_millis();
        let mut request = signed("secret", "/dbs/Assets", date);
        request.path = "/dbs/Other".into();
        assert!(authenticator().authenticate(&request).is_err());
    }

    #[test]
    fn generated_keys_differ() {
        let a = generate_key();
        assert_eq!(STANDARD.decode(&a).unwrap().len(), 64);
        assert_ne!(a, generate_key());
    }
}
