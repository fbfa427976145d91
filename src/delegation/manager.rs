//! Delegation lifecycle and message signing/verification.
//!
//! The trust model is two-tier: a wallet key authorizes an ephemeral device
//! key once (the delegation), and the device key signs every forum message.
//! Anonymous sessions skip the wallet tier; their author id is a random
//! UUIDv4 and their messages carry no proof.
//!
//! `verify` is stateless: everything needed to check a message travels with
//! it. Expiry is enforced at signing time only, so historical messages stay
//! verifiable after their delegation lapses.

use crate::crypto::{
    is_uuid_v4, normalize_address, verify_signature_hex, verify_wallet_signature, DeviceKeypair,
};
use crate::delegation::record::{DelegationDuration, DelegationRecord};
use crate::delegation::store::DelegationStore;
use crate::error::{OpchanError, Result};
use crate::message::{canonical_signing_payload, DelegationProof, Message};
use rand::RngCore;
use tracing::{debug, info};

/// Callback supplied by the host wallet: produce a `personal_sign`
/// signature (hex) over an arbitrary UTF-8 message. May be slow; may fail.
pub trait WalletSigner {
    fn sign_message(&self, message: &str) -> Result<String>;
}

/// Snapshot of the active delegation for UI and permission checks.
#[derive(Debug, Clone, Default)]
pub struct DelegationStatus {
    /// A record exists (valid or expired).
    pub present: bool,
    /// The record may sign right now.
    pub valid: bool,
    /// Milliseconds of signing validity left.
    pub time_remaining_ms: u64,
    /// Hex device public key.
    pub public_key: Option<String>,
    /// Author id the record signs as.
    pub address: Option<String>,
    /// Wallet proof, for wallet-backed delegations.
    pub proof: Option<DelegationProof>,
}

/// Manages the active delegation and signs/verifies messages with it.
pub struct DelegationManager {
    store: DelegationStore,
    active: Option<DelegationRecord>,
}

impl DelegationManager {
    /// Opens the manager, loading any persisted delegation.
    pub fn open(store: DelegationStore) -> Result<Self> {
        let active = store.load()?;
        Ok(Self { store, active })
    }

    /// The author id of the active delegation, if one exists.
    pub fn author(&self) -> Option<&str> {
        self.active.as_ref().map(|r| r.author.as_str())
    }

    /// Composes the human-readable authorization text a wallet signs.
    ///
    /// Verification requires textual containment of the device key, the
    /// wallet address, and the expiry; the surrounding prose is free.
    fn compose_auth_message(
        device_pub_key: &str,
        wallet_address: &str,
        expiry_timestamp_ms: u64,
        nonce: &str,
    ) -> String {
        format!(
            "OpChan delegated signing authorization\n\n\
             Device key: {}\n\
             Wallet: {}\n\
             Expires: {}\n\
             Nonce: {}",
            device_pub_key, wallet_address, expiry_timestamp_ms, nonce
        )
    }

    /// Creates a wallet-backed delegation.
    ///
    /// Generates a fresh device keypair, obtains the wallet signature over
    /// the authorization message via `signer`, and persists the record only
    /// after the signature round-trip verifies against the wallet address.
    /// A failing or refusing signer leaves no partial state behind.
    pub fn create_wallet_delegation(
        &mut self,
        wallet_address: &str,
        duration: DelegationDuration,
        signer: &dyn WalletSigner,
        now_ms: u64,
    ) -> Result<DelegationStatus> {
        let address = normalize_address(wallet_address)
            .ok_or_else(|| OpchanError::invalid_input("Wallet address is not 20 bytes of hex"))?;

        let keypair = DeviceKeypair::generate();
        let expiry_timestamp_ms = now_ms + duration.as_ms();
        let mut nonce_bytes = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = hex::encode(nonce_bytes);

        let auth_message = Self::compose_auth_message(
            &keypair.public_key_hex(),
            &address,
            expiry_timestamp_ms,
            &nonce,
        );
        let wallet_signature = signer.sign_message(&auth_message)?;

        if !verify_wallet_signature(&address, &auth_message, &wallet_signature) {
            return Err(OpchanError::invalid_signature(
                "Wallet signature does not verify against its own authorization message",
            ));
        }

        let record = DelegationRecord {
            author: address.clone(),
            device_pub_key: keypair.public_key_hex(),
            device_secret_key: keypair.secret_key_hex(),
            created_at_ms: now_ms,
            expiry_timestamp_ms,
            proof: Some(DelegationProof {
                auth_message,
                wallet_signature,
                expiry_timestamp_ms,
                wallet_address: address.clone(),
            }),
        };
        self.store.save(&record)?;
        info!(wallet = %address, expiry = expiry_timestamp_ms, "created wallet delegation");
        self.active = Some(record);
        Ok(self.status(now_ms))
    }

    /// Creates an anonymous delegation and returns the session id.
    pub fn create_anonymous_delegation(
        &mut self,
        duration: DelegationDuration,
        now_ms: u64,
    ) -> Result<String> {
        let keypair = DeviceKeypair::generate();
        let session_id = uuid::Uuid::new_v4().to_string();

        let record = DelegationRecord {
            author: session_id.clone(),
            device_pub_key: keypair.public_key_hex(),
            device_secret_key: keypair.secret_key_hex(),
            created_at_ms: now_ms,
            expiry_timestamp_ms: now_ms + duration.as_ms(),
            proof: None,
        };
        self.store.save(&record)?;
        info!(session = %session_id, "created anonymous delegation");
        self.active = Some(record);
        Ok(session_id)
    }

    /// Signs `message` with the active delegation.
    ///
    /// Fails with `DelegationMissing` when none exists, `DelegationExpired`
    /// past expiry (the record is left intact for inspection), and
    /// `InvalidInput` when the message's author does not match the
    /// delegation.
    pub fn sign(&self, mut message: Message, now_ms: u64) -> Result<Message> {
        let record = self
            .active
            .as_ref()
            .ok_or_else(|| OpchanError::delegation_missing("No active delegation"))?;
        if record.is_expired(now_ms) {
            return Err(OpchanError::delegation_expired(format!(
                "Delegation expired at {}",
                record.expiry_timestamp_ms
            )));
        }
        if message.author != record.author {
            return Err(OpchanError::invalid_input(
                "Message author does not match the active delegation",
            ));
        }

        let payload = canonical_signing_payload(&message)?;
        let keypair = record.keypair()?;
        message.signature = Some(hex::encode(keypair.sign(&payload)));
        message.device_pub_key = Some(record.device_pub_key.clone());
        message.delegation_proof = record.proof.clone();
        debug!(id = %message.id, kind = %message.kind(), "signed message");
        Ok(message)
    }

    /// Verifies a signed message. Convenience wrapper over
    /// [`verify_with_reasons`](Self::verify_with_reasons).
    pub fn verify(message: &Message) -> bool {
        Self::verify_with_reasons(message).0
    }

    /// Verifies a signed message, collecting every failure reason.
    ///
    /// Checks, in order: field presence and form, the Ed25519 signature
    /// over the canonical payload, and (for wallet authors) the delegation
    /// proof: the wallet signature over the authorization message plus the
    /// textual binding of device key, wallet address, and expiry. Proof
    /// expiry is deliberately not compared against the clock here.
    pub fn verify_with_reasons(message: &Message) -> (bool, Vec<String>) {
        let mut reasons = Vec::new();

        let Some(signature) = message.signature.as_deref() else {
            return (false, vec!["missing signature".to_string()]);
        };
        let Some(device_pub_key) = message.device_pub_key.as_deref() else {
            return (false, vec!["missing device_pub_key".to_string()]);
        };
        if message.author.is_empty() {
            return (false, vec!["missing author".to_string()]);
        }

        match canonical_signing_payload(message) {
            Ok(payload) => {
                if !verify_signature_hex(device_pub_key, &payload, signature) {
                    reasons.push("device signature does not verify".to_string());
                }
            }
            Err(e) => reasons.push(format!("cannot canonicalize message: {}", e)),
        }

        match &message.delegation_proof {
            Some(proof) => {
                let author_matches = normalize_address(&message.author)
                    .is_some_and(|a| a == proof.wallet_address);
                if !author_matches {
                    reasons.push("author does not match the delegation wallet".to_string());
                }
                if !verify_wallet_signature(
                    &proof.wallet_address,
                    &proof.auth_message,
                    &proof.wallet_signature,
                ) {
                    reasons.push("wallet signature does not verify".to_string());
                }
                // The proof must name this device key, wallet, and expiry;
                // otherwise a valid proof for some other key could be
                // grafted onto this message.
                if !proof.auth_message.contains(device_pub_key) {
                    reasons.push("authorization does not name the signing device key".to_string());
                }
                if !proof.auth_message.contains(&proof.wallet_address) {
                    reasons.push("authorization does not name the wallet address".to_string());
                }
                if !proof
                    .auth_message
                    .contains(&proof.expiry_timestamp_ms.to_string())
                {
                    reasons.push("authorization does not name the expiry".to_string());
                }
            }
            None => {
                if !is_uuid_v4(&message.author) {
                    reasons.push(
                        "author without a delegation proof must be an anonymous session id"
                            .to_string(),
                    );
                }
            }
        }

        (reasons.is_empty(), reasons)
    }

    /// Returns the status of the active delegation at `now_ms`.
    pub fn status(&self, now_ms: u64) -> DelegationStatus {
        match &self.active {
            None => DelegationStatus::default(),
            Some(record) => DelegationStatus {
                present: true,
                valid: !record.is_expired(now_ms),
                time_remaining_ms: record.time_remaining_ms(now_ms),
                public_key: Some(record.device_pub_key.clone()),
                address: Some(record.author.clone()),
                proof: record.proof.clone(),
            },
        }
    }

    /// Clears the active delegation, removing the persisted record.
    pub fn clear(&mut self) -> Result<()> {
        self.store.clear()?;
        self.active = None;
        info!("cleared delegation");
        Ok(())
    }
}
