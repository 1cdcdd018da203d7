//! Master-key request signatures.
//!
//! A signature is an HMAC-SHA256 over `METHOD\nresource\ndate\n`, keyed by
//! the account key and sent base64-encoded in the authorization header:
//!
//! ```text
//! type=master&ver=1.0&sig=<base64>
//! ```
//!
//! The date is Unix milliseconds and travels in its own header so the
//! receiver can bound clock skew.

use crate::http::Method;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_PREFIX: &str = "type=master&ver=1.0&sig=";

fn string_to_sign(method: Method, resource: &str, date_millis: u64) -> String {
    format!("{}\n{}\n{}\n", method.as_str(), resource, date_millis)
}

/// Produces the authorization header value for a request.
pub fn sign(key: &[u8], method: Method, resource: &str, date_millis: u64) -> String {
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        return String::new();
    };
    mac.update(string_to_sign(method, resource, date_millis).as_bytes());
    let signature = mac.finalize().into_bytes();
    format!("{TOKEN_PREFIX}{}", STANDARD.encode(signature))
}

/// Checks an authorization header value in constant time.
pub fn verify(key: &[u8], method: Method, resource: &str, date_millis: u64, header: &str) -> bool {
    let Some(encoded) = header.strip_prefix(TOKEN_PREFIX) else {
        return false;
    };
    let Ok(signature) = STANDARD.decode(encoded) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        return false;
    };
    mac.update(string_to_sign(method, resource, date_millis).as_bytes());
    mac.verify_slice(&signature).is_ok()
}
