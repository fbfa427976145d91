//! The persisted delegation record.
//!
//! A delegation is either wallet-backed (a `DelegationProof` binds the
//! device key to a wallet address) or anonymous (a random session id acts
//! as the author). Exactly one delegation is active at a time; replacing it
//! is `clear()` followed by a fresh create.

use crate::crypto::DeviceKeypair;
use crate::error::Result;
use crate::message::DelegationProof;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// How long a freshly created delegation stays valid for signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DelegationDuration {
    SevenDays,
    ThirtyDays,
}

impl DelegationDuration {
    /// Duration in milliseconds.
    pub fn as_ms(&self) -> u64 {
        match self {
            DelegationDuration::SevenDays => crate::constants::DELEGATION_7D_MS,
            DelegationDuration::ThirtyDays => crate::constants::DELEGATION_30D_MS,
        }
    }
}

/// The active delegation: device keypair plus its authorization.
///
/// The secret key is held hex-encoded and zeroized when the record is
/// dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationRecord {
    /// Wallet address (lowercase hex) or anonymous session id (UUIDv4).
    pub author: String,
    /// Hex 32-byte device public key.
    pub device_pub_key: String,
    /// Hex 32-byte device secret key.
    pub(crate) device_secret_key: String,
    /// When this delegation was created.
    pub created_at_ms: u64,
    /// Past this instant the record must not sign new messages. Messages
    /// already signed stay verifiable forever.
    pub expiry_timestamp_ms: u64,
    /// Present for wallet-backed delegations only.
    pub proof: Option<DelegationProof>,
}

impl DelegationRecord {
    /// True once the delegation may no longer sign.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expiry_timestamp_ms
    }

    /// Milliseconds of signing validity left.
    pub fn time_remaining_ms(&self, now_ms: u64) -> u64 {
        self.expiry_timestamp_ms.saturating_sub(now_ms)
    }

    /// Reconstructs the device keypair from the stored secret.
    pub fn keypair(&self) -> Result<DeviceKeypair> {
        DeviceKeypair::from_secret_hex(&self.device_secret_key)
    }

    /// True when this delegation is wallet-backed.
    pub fn is_wallet_backed(&self) -> bool {
        self.proof.is_some()
    }
}

impl Drop for DelegationRecord {
    fn drop(&mut self) {
        self.device_secret_key.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(expiry: u64) -> DelegationRecord {
        let keypair = DeviceKeypair::generate();
        DelegationRecord {
            author: "8f14e45f-ceea-467f-9a34-0a0f8e9d2c1b".into(),
            device_pub_key: keypair.public_key_hex(),
            device_secret_key: keypair.secret_key_hex(),
            created_at_ms: 1000,
            expiry_timestamp_ms: expiry,
            proof: None,
        }
    }

    #[test]
    fn test_expiry_boundary() {
        let rec = record(5000);
        assert!(!rec.is_expired(4999));
        assert!(rec.is_expired(5000));
        assert_eq!(rec.time_remaining_ms(3000), 2000);
        assert_eq!(rec.time_remaining_ms(6000), 0);
    }

    #[test]
    fn test_keypair_roundtrip() {
        let rec = record(5000);
        let keypair = rec.keypair().unwrap();
        assert_eq!(keypair.public_key_hex(), rec.device_pub_key);
    }

    #[test]
    fn test_duration_ms() {
        assert_eq!(DelegationDuration::SevenDays.as_ms(), 7 * 24 * 3600 * 1000);
        assert_eq!(DelegationDuration::ThirtyDays.as_ms(), 30 * 24 * 3600 * 1000);
    }
}
