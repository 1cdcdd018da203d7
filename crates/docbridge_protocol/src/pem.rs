//! PEM text for certificates.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

/// Width of a PEM body line.
pub const LINE_WIDTH: usize = 64;

/// Wraps DER bytes in a `CERTIFICATE` block.
pub fn encode_certificate(der: &[u8]) -> String {
    let body = STANDARD.encode(der);
    let mut pem = String::from("-----BEGIN CERTIFICATE-----\n");
    for chunk in body.as_bytes().chunks(LINE_WIDTH) {
        pem.push_str(&String::from_utf8_lossy(chunk));
        pem.push('\n');
    }
    pem.push_str("-----END CERTIFICATE-----\n");
    pem
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_bodies_are_wrapped() {
        let pem = encode_certificate(&[7u8; 200]);
        let lines: Vec<&str> = pem.lines().collect();
        assert_eq!(lines.first(), Some(&"-----BEGIN CERTIFICATE-----"));
        assert_eq!(lines.last(), Some(&"-----END CERTIFICATE-----"));
        assert!(lines.iter().all(|line| line.len() <= LINE_WIDTH));

        let body: String = lines[1..lines.len() - 1].concat();
        assert_eq!(STANDARD.decode(body).unwrap(), vec![7u8; 200]);
    }

    #[test]
    fn empty_der_has_no_body_lines() {
        assert_eq!(
            encode_certificate(&[]),
            "-----BEGIN CERTIFICATE-----\n-----END CERTIFICATE-----\n"
        );
    }
}
