//! Message model for the OpChan engine.
//!
//! Every piece of forum state travels as a signed message on the shared
//! pub/sub channel. A message is an envelope (id, timestamp, author,
//! signature material) around one of six payload kinds. Messages are
//! immutable once accepted; later messages supersede earlier ones by the
//! replica's merge rules, never by mutation.

pub mod codec;
pub mod validation;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use codec::{canonical_signing_payload, decode_wire, encode_wire};
pub use validation::{validate_content, validate_structure, ValidationReport};

/// Type discriminator for messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Cell,
    Post,
    Comment,
    Vote,
    Moderate,
    ProfileUpdate,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Cell => write!(f, "cell"),
            MessageKind::Post => write!(f, "post"),
            MessageKind::Comment => write!(f, "comment"),
            MessageKind::Vote => write!(f, "vote"),
            MessageKind::Moderate => write!(f, "moderate"),
            MessageKind::ProfileUpdate => write!(f, "profile_update"),
        }
    }
}

/// Moderation verb carried by a [`MessageBody::Moderate`] payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationAction {
    /// Flag the target as moderated (hidden by default in readers).
    Moderate,
    /// Lift a previous moderation.
    Unmoderate,
}

/// What a moderation message targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModTargetKind {
    Post,
    Comment,
    User,
}

/// How a user wants their display name derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DisplayPreference {
    /// Prefer the self-chosen call sign when one is set.
    CallSign,
    /// Always show the (possibly ENS-resolved) address.
    #[default]
    Address,
}

/// Wallet authorization attached to messages from wallet-backed authors.
///
/// The wallet signs `auth_message` once; every message signed by the device
/// key carries this proof so any peer can check the chain device key →
/// wallet without extra round trips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationProof {
    /// Human-readable authorization text. Must textually contain the device
    /// public key, the wallet address, and the expiry timestamp.
    pub auth_message: String,
    /// Wallet `personal_sign` signature over `auth_message` (hex).
    pub wallet_signature: String,
    /// When the delegation stops being valid for signing new messages.
    pub expiry_timestamp_ms: u64,
    /// Lowercase 20-byte hex wallet address.
    pub wallet_address: String,
}

/// Kind-specific payload fields, flattened into the envelope on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageBody {
    /// A topic-bounded container of posts. Creation is gated on the author
    /// being ENS-verified at send time.
    Cell {
        name: String,
        description: String,
        icon: Option<String>,
    },
    Post {
        cell_id: String,
        title: String,
        body: String,
    },
    Comment {
        post_id: String,
        body: String,
    },
    Vote {
        target_id: String,
        /// +1 or -1; anything else is rejected structurally.
        value: i8,
    },
    Moderate {
        action: ModerationAction,
        target_kind: ModTargetKind,
        target_id: String,
        cell_id: String,
        reason: Option<String>,
    },
    ProfileUpdate {
        call_sign: Option<String>,
        display_preference: DisplayPreference,
    },
}

impl MessageBody {
    /// Returns the kind discriminator for this payload.
    pub fn kind(&self) -> MessageKind {
        match self {
            MessageBody::Cell { .. } => MessageKind::Cell,
            MessageBody::Post { .. } => MessageKind::Post,
            MessageBody::Comment { .. } => MessageKind::Comment,
            MessageBody::Vote { .. } => MessageKind::Vote,
            MessageBody::Moderate { .. } => MessageKind::Moderate,
            MessageBody::ProfileUpdate { .. } => MessageKind::ProfileUpdate,
        }
    }
}

/// A forum message: envelope plus kind-specific payload.
///
/// `signature`, `device_pub_key`, and `delegation_proof` are `None` on a
/// freshly built message and populated by the delegation manager's `sign`.
/// The canonical signing payload is the message with those three fields
/// nulled out (see [`codec`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Stable unique id (UUIDv4 textual form).
    pub id: String,
    /// Author-set milliseconds since epoch.
    pub timestamp: u64,
    /// Wallet address (lowercase hex) or anonymous session id (UUIDv4).
    pub author: String,
    /// Hex Ed25519 signature over the canonical payload.
    pub signature: Option<String>,
    /// Hex 32-byte device public key that signed.
    pub device_pub_key: Option<String>,
    /// Present iff the author is a wallet address.
    pub delegation_proof: Option<DelegationProof>,
    #[serde(flatten)]
    pub body: MessageBody,
}

impl Message {
    /// Builds an unsigned message.
    pub fn unsigned(
        id: impl Into<String>,
        timestamp: u64,
        author: impl Into<String>,
        body: MessageBody,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp,
            author: author.into(),
            signature: None,
            device_pub_key: None,
            delegation_proof: None,
            body,
        }
    }

    /// Returns the kind discriminator.
    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }

    /// Returns true when the author field is an anonymous session id.
    pub fn author_is_anonymous(&self) -> bool {
        crate::crypto::is_uuid_v4(&self.author)
    }

    /// The dedup key: only one message per `(kind, id, timestamp)` is ever
    /// stored by a replica.
    pub fn dedup_key(&self) -> (MessageKind, String, u64) {
        (self.kind(), self.id.clone(), self.timestamp)
    }

    /// The cell a post/moderation belongs to, if this kind names one.
    pub fn cell_id(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Post { cell_id, .. } => Some(cell_id),
            MessageBody::Moderate { cell_id, .. } => Some(cell_id),
            _ => None,
        }
    }

    /// The id a vote or moderation targets.
    pub fn target_id(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Vote { target_id, .. } => Some(target_id),
            MessageBody::Moderate { target_id, .. } => Some(target_id),
            _ => None,
        }
    }
}

/// Ordering key used to break ties between competing votes or moderation
/// records: total on `(timestamp, id)`, so any two replicas that accepted
/// the same message set converge on the same winner.
pub fn supersession_key(message: &Message) -> (u64, &str) {
    (message.timestamp, message.id.as_str())
}
