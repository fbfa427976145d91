//! # OpChan — local-first decentralized forum engine
//!
//! OpChan is the core of a serverless forum whose participants exchange
//! signed messages (cells, posts, comments, votes, moderations, profile
//! updates) over a peer-to-peer pub/sub channel. Every device holds an
//! eventually consistent replica of the global state, derived purely by
//! validating and merging the signed messages it observes.
//!
//! ## Trust model
//!
//! A two-tier key hierarchy: a wallet key authorizes an ephemeral Ed25519
//! device key once (the *delegation*), and the device key signs every forum
//! message. Anonymous sessions skip the wallet tier. See [`delegation`].
//!
//! ## Data flow
//!
//! - Outgoing: action → canonical encoding → device signature → local
//!   apply → transport send.
//! - Incoming: transport receive → structural validation → signature
//!   verification → dedup → index update → subscriber notification.
//!
//! ## Capabilities
//!
//! The engine reads nothing from its environment. Clock, id generation,
//! durable store path, wallet signer, name resolver, and transport are all
//! injected at construction ([`client::ClientDeps`]).

pub mod client;
pub mod constants;
pub mod crypto;
pub mod delegation;
pub mod env;
pub mod error;
pub mod events;
pub mod identity;
pub mod message;
pub mod permissions;
pub mod relevance;
pub mod replica;
pub mod transport;

pub use client::{ClientConfig, ClientDeps, OpchanClient};
pub use delegation::{
    DelegationDuration, DelegationManager, DelegationStatus, DelegationStore, WalletSigner,
};
pub use error::{OpchanError, Result};
pub use identity::{IdentityResolver, NameResolver, ResolvedName, UserIdentity, VerificationStatus};
pub use message::{
    DelegationProof, DisplayPreference, Message, MessageBody, MessageKind, ModTargetKind,
    ModerationAction, ValidationReport,
};
pub use relevance::relevance_score;
pub use replica::{ApplyOutcome, Bookmark, EnhancedCell, EnhancedPost, Following, Replica};
pub use transport::{MessageSender, SyncPhase, TransportAdapter};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
