//! HMAC-SHA256 signing for outbound deliveries and callbacks.
//!
//! Produces the `X-Runlater-Signature` header value and verifies it in
//! constant time so a timing side-channel can't leak the secret.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Sign `body` with `secret`, returning `sha256=<hex>`.
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body);
    format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
}

/// Verify a `sha256=<hex>` signature header against `body` using `secret`.
///
/// Comparison is constant-time over the decoded bytes.
pub fn verify(secret: &[u8], body: &[u8], signature_header: &str) -> bool {
    let Some(hex_sig) = signature_header.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(given) = hex::decode(hex_sig) else {
        return false;
    };

    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body);
    let expected = mac.finalize().into_bytes();

    given.ct_eq(&expected[..]).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_roundtrips() {
        let secret = b"org-webhook-secret";
        let body = br#"{"execution_id":"abc"}"#;
        let sig = sign(secret, body);
        assert!(sig.starts_with(SIGNATURE_PREFIX));
        assert!(verify(secret, body, &sig));
    }

    #[test]
    fn verify_rejects_wrong_secret() {
        let sig = sign(b"secret-a", b"body");
        assert!(!verify(b"secret-b", b"body", &sig));
    }

    #[test]
    fn verify_rejects_bit_flipped_body() {
        let sig = sign(b"secret", b"original body");
        assert!(!verify(b"secret", b"original-body", &sig));
    }

    #[test]
    fn verify_rejects_malformed_header() {
        assert!(!verify(b"secret", b"body", "not-a-signature"));
        assert!(!verify(b"secret", b"body", "sha256=not-hex!!"));
    }
}
