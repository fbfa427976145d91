//! Ed25519 device keys.
//!
//! Every forum message is signed by a short-lived device key. The wallet
//! never signs messages directly; it signs one authorization binding the
//! device public key (see the delegation module). Keys are carried as
//! 32-byte values, hex-encoded wherever they cross a serialization boundary.

use crate::error::{OpchanError, Result};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use zeroize::Zeroize;

/// Length of an Ed25519 public key in bytes.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Length of an Ed25519 signature in bytes.
pub const SIGNATURE_LEN: usize = 64;

/// An Ed25519 device keypair.
///
/// The secret half is zeroized on drop.
pub struct DeviceKeypair {
    signing: SigningKey,
}

impl DeviceKeypair {
    /// Generates a fresh keypair from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut rng = OsRng;
        Self {
            signing: SigningKey::generate(&mut rng),
        }
    }

    /// Reconstructs a keypair from 32 secret-key bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| OpchanError::crypto("Device secret key must be 32 bytes"))?;
        Ok(Self {
            signing: SigningKey::from_bytes(&arr),
        })
    }

    /// Reconstructs a keypair from a hex-encoded secret key.
    pub fn from_secret_hex(hex_str: &str) -> Result<Self> {
        let mut bytes = hex::decode(hex_str)
            .map_err(|_| OpchanError::crypto("Device secret key is not valid hex"))?;
        let result = Self::from_secret_bytes(&bytes);
        bytes.zeroize();
        result
    }

    /// Returns the public key bytes.
    pub fn public_key_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.signing.verifying_key().to_bytes()
    }

    /// Returns the hex-encoded public key.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key_bytes())
    }

    /// Returns the hex-encoded secret key.
    ///
    /// Callers persisting this value own its lifecycle; the delegation
    /// store zeroizes it when the record is cleared.
    pub fn secret_key_hex(&self) -> String {
        hex::encode(self.signing.to_bytes())
    }

    /// Signs arbitrary bytes, returning the 64-byte signature.
    pub fn sign(&self, payload: &[u8]) -> [u8; SIGNATURE_LEN] {
        self.signing.sign(payload).to_bytes()
    }
}

impl std::fmt::Debug for DeviceKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceKeypair")
            .field("public_key", &self.public_key_hex())
            .finish()
    }
}

/// Verifies an Ed25519 signature over `payload`.
///
/// Returns `false` for any malformed key or signature; never panics.
pub fn verify_signature(public_key: &[u8], payload: &[u8], signature: &[u8]) -> bool {
    let Ok(pk_arr) = <[u8; PUBLIC_KEY_LEN]>::try_from(public_key) else {
        return false;
    };
    let Ok(verifying) = VerifyingKey::from_bytes(&pk_arr) else {
        return false;
    };
    let Ok(sig_arr) = <[u8; SIGNATURE_LEN]>::try_from(signature) else {
        return false;
    };
    verifying
        .verify(payload, &Signature::from_bytes(&sig_arr))
        .is_ok()
}

/// Hex-string convenience wrapper around [`verify_signature`].
pub fn verify_signature_hex(public_key_hex: &str, payload: &[u8], signature_hex: &str) -> bool {
    let Ok(pk) = hex::decode(public_key_hex) else {
        return false;
    };
    let Ok(sig) = hex::decode(signature_hex) else {
        return false;
    };
    verify_signature(&pk, payload, &sig)
}
