//! HMAC Validator (§4.7): constant-time verification of `sha256=<hex>`
//! webhook-style signatures.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

/// Validate `signature` (`sha256=<hex>`) against an HMAC-SHA256 of `payload`
/// keyed by `secret`. Comparison is constant-time via [`Mac::verify_slice`].
///
/// A total function: returns `true` iff the signature is well-formed and
/// matches. A missing prefix, malformed hex digits, or an empty secret all
/// fall out as `false`, never an error.
#[must_use]
pub fn validate(secret: &[u8], payload: &[u8], signature: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let Some(hex_digest) = signature.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(expected_bytes) = hex::decode(hex_digest) else {
        return false;
    };

    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(payload);

    mac.verify_slice(&expected_bytes).is_ok()
}

/// Compute a `sha256=<hex>` signature for `payload` keyed by `secret`.
#[must_use]
pub fn sign(secret: &[u8], payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(payload);
    format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_sign_and_validate() {
        let secret = b"top-secret";
        let payload = b"{\"event\":\"ping\"}";
        let signature = sign(secret, payload);
        assert!(validate(secret, payload, &signature));
    }

    #[test]
    fn tampered_payload_fails_validation() {
        let secret = b"top-secret";
        let signature = sign(secret, b"original");
        assert!(!validate(secret, b"tampered", &signature));
    }

    #[test]
    fn missing_prefix_is_false_not_an_error() {
        assert!(!validate(b"secret", b"payload", "deadbeef"));
    }

    #[test]
    fn malformed_hex_is_false_not_an_error() {
        assert!(!validate(b"secret", b"payload", "sha256=zz"));
    }

    #[test]
    fn empty_secret_is_rejected() {
        assert!(!validate(b"", b"payload", "sha256=00"));
    }
}
