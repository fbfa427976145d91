//! Cryptographic primitives for the OpChan engine.
//!
//! Two signature schemes meet here:
//!
//! - **Ed25519** device keys sign every forum message (see [`keys`]).
//! - **secp256k1 / personal_sign** wallet signatures authorize a device key
//!   once per delegation (see [`wallet`]).
//!
//! Hashing is SHA3; the EVM side uses Keccak-256 as the chain requires.
//! Every fallible operation returns a result or a boolean; nothing in this
//! module panics on malformed input.

use sha3::{Digest, Sha3_256};

pub mod keys;
pub mod wallet;

pub use keys::{
    verify_signature, verify_signature_hex, DeviceKeypair, PUBLIC_KEY_LEN, SIGNATURE_LEN,
};
pub use wallet::{
    is_wallet_address, normalize_address, personal_sign_hash, verify_wallet_signature,
};

/// SHA3-256 digest of arbitrary bytes.
pub fn hash_data(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Returns true if `s` parses as a version-4 UUID (the shape of anonymous
/// author ids and message ids).
pub fn is_uuid_v4(s: &str) -> bool {
    match uuid::Uuid::parse_str(s) {
        Ok(parsed) => parsed.get_version() == Some(uuid::Version::Random),
        Err(_) => false,
    }
}
