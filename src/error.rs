//! Error types for OpChan engine operations.

use thiserror::Error;

/// Result type alias for OpChan operations.
pub type Result<T> = std::result::Result<T, OpchanError>;

/// Main error type for OpChan operations.
#[derive(Error, Debug)]
pub enum OpchanError {
    /// Signature or delegation proof failed a cryptographic check.
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Structural or field-range failure on a message.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Action-level precondition unmet (permission matrix).
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// No active delegation is available for signing.
    #[error("Delegation missing: {0}")]
    DelegationMissing(String),

    /// Sign attempted past the delegation's expiry.
    #[error("Delegation expired: {0}")]
    DelegationExpired(String),

    /// Transport send failed; the message stays in the local replica.
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// Durable store read or write failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization errors.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Name lookup failed.
    #[error("Resolution error: {0}")]
    Resolution(String),

    /// Cryptographic operation errors (key parsing, signing).
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// The injected wallet signer refused or failed to sign.
    #[error("Wallet signer error: {0}")]
    WalletSigner(String),

    /// Invalid input or arguments.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl OpchanError {
    /// Creates a new invalid-signature error.
    pub fn invalid_signature<T: ToString>(msg: T) -> Self {
        Self::InvalidSignature(msg.to_string())
    }

    /// Creates a new malformed-message error.
    pub fn malformed<T: ToString>(msg: T) -> Self {
        Self::MalformedMessage(msg.to_string())
    }

    /// Creates a new permission-denied error.
    pub fn permission_denied<T: ToString>(msg: T) -> Self {
        Self::PermissionDenied(msg.to_string())
    }

    /// Creates a new delegation-missing error.
    pub fn delegation_missing<T: ToString>(msg: T) -> Self {
        Self::DelegationMissing(msg.to_string())
    }

    /// Creates a new delegation-expired error.
    pub fn delegation_expired<T: ToString>(msg: T) -> Self {
        Self::DelegationExpired(msg.to_string())
    }

    /// Creates a new transport-unavailable error.
    pub fn transport<T: ToString>(msg: T) -> Self {
        Self::TransportUnavailable(msg.to_string())
    }

    /// Creates a new storage error.
    pub fn storage<T: ToString>(msg: T) -> Self {
        Self::Storage(msg.to_string())
    }

    /// Creates a new serialization error.
    pub fn serialization<T: ToString>(msg: T) -> Self {
        Self::Serialization(msg.to_string())
    }

    /// Creates a new resolution error.
    pub fn resolution<T: ToString>(msg: T) -> Self {
        Self::Resolution(msg.to_string())
    }

    /// Creates a new cryptographic error.
    pub fn crypto<T: ToString>(msg: T) -> Self {
        Self::Crypto(msg.to_string())
    }

    /// Creates a new wallet-signer error.
    pub fn wallet_signer<T: ToString>(msg: T) -> Self {
        Self::WalletSigner(msg.to_string())
    }

    /// Creates a new invalid-input error.
    pub fn invalid_input<T: ToString>(msg: T) -> Self {
        Self::InvalidInput(msg.to_string())
    }
}
