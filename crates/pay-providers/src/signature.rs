//! # Webhook Signatures
//!
//! Every provider signs webhook bodies with HMAC-SHA256 over the raw bytes
//! using a per-provider shared secret, hex encoded. Some send the digest
//! bare, some prefix it with `sha256=`.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Hex HMAC-SHA256 of `payload` under `secret`
pub fn sign(secret: &str, payload: &[u8]) -> String {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of a hex signature header against the raw body
pub fn verify(secret: &str, payload: &[u8], signature: &str) -> bool {
    let signature = signature.trim();
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature);

    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// Hex SHA-256 of the raw payload, used as a last-resort idempotency key
pub fn payload_fingerprint(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_card_gateway";
    const BODY: &[u8] = br#"{"code":"0","dealId":"D1","ref":"REF1","amount":"150.00"}"#;

    #[test]
    fn test_correct_signature_passes() {
        let sig = sign(SECRET, BODY);
        assert_eq!(sig.len(), 64);
        assert!(verify(SECRET, BODY, &sig));
        assert!(verify(SECRET, BODY, &format!("sha256={}", sig)));
    }

    #[test]
    fn test_any_single_byte_mutation_fails() {
        let sig = sign(SECRET, BODY);
        for i in 0..BODY.len() {
            let mut mutated = BODY.to_vec();
            mutated[i] ^= 0x01;
            assert!(!verify(SECRET, &mutated, &sig), "mutation at byte {} passed", i);
        }
    }

    #[test]
    fn test_wrong_secret_or_garbage_fails() {
        let sig = sign(SECRET, BODY);
        assert!(!verify("other", BODY, &sig));
        assert!(!verify(SECRET, BODY, "not-hex"));
        assert!(!verify(SECRET, BODY, ""));
    }

    #[test]
    fn test_fingerprint_is_stable() {
        assert_eq!(payload_fingerprint(BODY), payload_fingerprint(BODY));
        assert_ne!(payload_fingerprint(BODY), payload_fingerprint(b"{}"));
    }
}
