//! Self-issued emulator certificate.
//!
//! The emulator does not terminate TLS, so the certificate is an opaque
//! DER-shaped blob: clients only pin it by fingerprint. Its layout is a
//! fixed tag, a random serial, the subject and the expiry in Unix seconds.

use docbridge_protocol::pem;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const TAG: &[u8] = b"docbridge-emulator-cert/1";

/// Certificate presented by the emulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    der: Vec<u8>,
    subject: String,
    not_after: SystemTime,
}

impl Certificate {
    /// Issues a new certificate for `subject`, valid for `validity`.
    pub fn issue(subject: &str, validity: Duration) -> Self {
        let mut serial = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut serial);
        let not_after = SystemTime::now() + validity;
        let expiry = not_after
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let mut der = Vec::with_capacity(TAG.len() + serial.len() + subject.len() + 12);
        der.extend_from_slice(TAG);
        der.extend_from_slice(&serial);
        der.extend_from_slice(&(subject.len() as u32).to_be_bytes());
        der.extend_from_slice(subject.as_bytes());
        der.extend_from_slice(&expiry.to_be_bytes());

        Self {
            der,
            subject: subject.to_string(),
            not_after,
        }
    }

    /// Raw certificate bytes.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// PEM encoding with 64-column lines.
    pub fn pem(&self) -> String {
        pem::encode_certificate(&self.der)
    }

    /// Subject name.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// End of the validity period.
    pub fn not_after(&self) -> SystemTime {
        self.not_after
    }

    /// SHA-256 fingerprint of the DER bytes.
    pub fn fingerprint(&self) -> [u8; 32] {
        Sha256::digest(&self.der).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;

    #[test]
    fn issued_certificates_are_unique() {
        let a = Certificate::issue("localhost", Duration::from_secs(60));
        let b = Certificate::issue("localhost", Duration::from_secs(60));
        assert_ne!(a.der(), b.der());
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.subject(), "localhost");
    }

    #[test]
    fn pem_round_trips_der() {
        let cert = Certificate::issue("localhost", Duration::from_secs(60));
        let pem = cert.pem();
        assert!(pem.starts_with("-----BEGIN CERTIFICATE-----\n"));
        assert!(pem.ends_with("-----END CERTIFICATE-----\n"));

        let body: String = pem
            .lines()
            .filter(|line| !line.starts_with("-----"))
            .collect();
        assert_eq!(STANDARD.decode(body).unwrap(), cert.der());
        assert!(pem.lines().all(|line| line.len() <= 64));
    }

    #[test]
    fn expiry_follows_validity() {
        let cert = Certificate::issue("localhost", Duration::from_secs(3600));
        let remaining = cert.not_after().duration_since(SystemTime::now()).unwrap();
        assert!(remaining > Duration::from_secs(3500));
    }
}
