//! EVM wallet signature verification.
//!
//! Wallets authorize a device key by signing a human-readable message with
//! the `personal_sign` scheme (EIP-191): the message is prefixed with
//! `"\x19Ethereum Signed Message:\n" + byte length`, hashed with Keccak-256,
//! and signed with a recoverable secp256k1 ECDSA signature. Verification
//! recovers the public key from the 65-byte `r || s || v` signature and
//! compares the derived address. Addresses compare lowercased.

use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use sha3::{Digest, Keccak256};
use subtle::ConstantTimeEq;

/// Prefix applied by `personal_sign` before hashing.
const PERSONAL_SIGN_PREFIX: &str = "\x19Ethereum Signed Message:\n";

/// Returns the Keccak-256 digest of the EIP-191 prefixed message.
pub fn personal_sign_hash(message: &str) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(PERSONAL_SIGN_PREFIX.as_bytes());
    hasher.update(message.len().to_string().as_bytes());
    hasher.update(message.as_bytes());
    hasher.finalize().into()
}

/// Derives the lowercase hex address (`0x` + 40 chars) of a secp256k1 key.
pub fn address_of(key: &VerifyingKey) -> String {
    let point = key.to_encoded_point(false);
    // Skip the 0x04 uncompressed-point marker; the address is the last 20
    // bytes of the Keccak-256 of the raw 64-byte public key.
    let digest = Keccak256::digest(&point.as_bytes()[1..]);
    format!("0x{}", hex::encode(&digest[12..]))
}

/// Normalizes an address to its lowercase `0x`-prefixed form, or `None` if
/// it is not 20 bytes of hex.
pub fn normalize_address(address: &str) -> Option<String> {
    let trimmed = address.strip_prefix("0x").unwrap_or(address);
    if trimmed.len() != 40 || !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(format!("0x{}", trimmed.to_ascii_lowercase()))
}

/// Returns true if `s` is a well-formed 20-byte hex address.
pub fn is_wallet_address(s: &str) -> bool {
    normalize_address(s).is_some()
}

/// Verifies a `personal_sign` signature over `message` against `address`.
///
/// `signature_hex` is the 65-byte `r || s || v` form (with or without a
/// `0x` prefix); `v` may be 0/1 or the legacy 27/28. Returns `false` for
/// any malformed input; never panics.
pub fn verify_wallet_signature(address: &str, message: &str, signature_hex: &str) -> bool {
    let Some(expected) = normalize_address(address) else {
        return false;
    };
    let sig_str = signature_hex.strip_prefix("0x").unwrap_or(signature_hex);
    let Ok(sig_bytes) = hex::decode(sig_str) else {
        return false;
    };
    if sig_bytes.len() != 65 {
        return false;
    }

    let recovery = match sig_bytes[64] {
        v @ 0..=1 => v,
        v @ 27..=28 => v - 27,
        _ => return false,
    };
    let Some(recovery_id) = RecoveryId::from_byte(recovery) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&sig_bytes[..64]) else {
        return false;
    };

    let hash = personal_sign_hash(message);
    let Ok(recovered) = VerifyingKey::recover_from_prehash(&hash, &signature, recovery_id) else {
        return false;
    };

    let derived = address_of(&recovered);
    derived.as_bytes().ct_eq(expected.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::SigningKey;
    use rand::rngs::OsRng;

    fn sign_personal(key: &SigningKey, message: &str) -> String {
        let hash = personal_sign_hash(message);
        let (signature, recovery_id) = key
            .sign_prehash_recoverable(&hash)
            .expect("signing cannot fail on a 32-byte prehash");
        let mut bytes = signature.to_vec();
        bytes.push(recovery_id.to_byte());
        format!("0x{}", hex::encode(bytes))
    }

    #[test]
    fn test_personal_sign_roundtrip() {
        let key = SigningKey::random(&mut OsRng);
        let address = address_of(key.verifying_key());
        let message = "authorize device abc123";

        let sig = sign_personal(&key, message);
        assert!(verify_wallet_signature(&address, message, &sig));
    }

    #[test]
    fn test_rejects_modified_message() {
        let key = SigningKey::random(&mut OsRng);
        let address = address_of(key.verifying_key());
        let sig = sign_personal(&key, "authorize device abc123");
        assert!(!verify_wallet_signature(&address, "authorize device abc124", &sig));
    }

    #[test]
    fn test_rejects_wrong_address() {
        let key = SigningKey::random(&mut OsRng);
        let other = SigningKey::random(&mut OsRng);
        let sig = sign_personal(&key, "message");
        assert!(!verify_wallet_signature(
            &address_of(other.verifying_key()),
            "message",
            &sig
        ));
    }

    #[test]
    fn test_accepts_legacy_v_values() {
        let key = SigningKey::random(&mut OsRng);
        let address = address_of(key.verifying_key());
        let hash = personal_sign_hash("legacy");
        let (signature, recovery_id) = key.sign_prehash_recoverable(&hash).unwrap();
        let mut bytes = signature.to_vec();
        bytes.push(recovery_id.to_byte() + 27);
        let sig = hex::encode(bytes);
        assert!(verify_wallet_signature(&address, "legacy", &sig));
    }

    #[test]
    fn test_address_comparison_is_case_insensitive() {
        let key = SigningKey::random(&mut OsRng);
        let address = address_of(key.verifying_key()).to_uppercase().replace("0X", "0x");
        let sig = sign_personal(&key, "case test");
        assert!(verify_wallet_signature(&address, "case test", &sig));
    }

    #[test]
    fn test_malformed_inputs_return_false() {
        assert!(!verify_wallet_signature("not-an-address", "m", "00"));
        assert!(!verify_wallet_signature(
            "0x1234567890abcdef1234567890abcdef12345678",
            "m",
            "zzzz"
        ));
        // Wrong length signature.
        assert!(!verify_wallet_signature(
            "0x1234567890abcdef1234567890abcdef12345678",
            "m",
            &hex::encode([0u8; 64])
        ));
        // Out-of-domain v byte.
        let mut bad = [0u8; 65];
        bad[64] = 5;
        assert!(!verify_wallet_signature(
            "0x1234567890abcdef1234567890abcdef12345678",
            "m",
            &hex::encode(bad)
        ));
    }

    #[test]
    fn test_normalize_address() {
        assert_eq!(
            normalize_address("0xABCDEFabcdefABCDEFabcdefABCDEFabcdefABCD"),
            Some("0xabcdefabcdefabcdefabcdefabcdefabcdefabcd".to_string())
        );
        assert_eq!(
            normalize_address("ABCDEFabcdefABCDEFabcdefABCDEFabcdefABCD"),
            Some("0xabcdefabcdefabcdefabcdefabcdefabcdefabcd".to_string())
        );
        assert!(normalize_address("0x123").is_none());
        assert!(normalize_address("0xZZcdefabcdefABCDEFabcdefABCDEFabcdefABCD").is_none());
    }
}
