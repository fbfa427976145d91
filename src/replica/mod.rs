//! The local replica: in-memory indexes plus durable persistence.
//!
//! Forum state is derived purely from signed messages accepted by
//! [`Replica::apply_message`]. All reads are synchronous against the
//! in-memory indexes; the durable store is written through on every accept
//! and replayed on `open()`.
//!
//! ## Convergence
//!
//! Two replicas that accept the same set of messages hold identical state
//! regardless of arrival order: insert-only collections are keyed by
//! message id, and the vote and moderation slots are resolved by a total
//! order on `(timestamp, id)`.

pub mod store;
pub mod views;

use crate::delegation::DelegationManager;
use crate::error::Result;
use crate::events::{ListenerRegistry, SubscriptionId};
use crate::identity::UserIdentity;
use crate::message::{
    validate_structure, Message, MessageBody, MessageKind, ModTargetKind, ModerationAction,
    supersession_key,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use store::{
    composite_key, ReplicaStore, CF_BOOKMARKS, CF_CELLS, CF_COMMENTS, CF_FOLLOWING,
    CF_IDENTITIES, CF_MODERATIONS, CF_POSTS, CF_PROFILES, CF_VOTES,
};
use tracing::{debug, trace, warn};

pub use store::StoreConfig;
pub use views::{EnhancedCell, EnhancedPost};

/// Result of applying one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The message is now part of the replica.
    Accepted,
    /// The `(kind, id, timestamp)` triple was already applied; no-op.
    Duplicate,
    /// Structural or cryptographic rejection; never stored.
    Rejected(String),
}

impl ApplyOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ApplyOutcome::Accepted)
    }
}

/// A device-local bookmark; never broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    /// `post:{target_id}` or `comment:{target_id}`.
    pub id: String,
    /// Author id of the local user who bookmarked.
    pub user_id: String,
    pub created_at_ms: u64,
    /// Denormalized display fields, captured at bookmark time.
    pub title: Option<String>,
    pub author: Option<String>,
    pub cell_id: Option<String>,
    pub post_id: Option<String>,
}

impl Bookmark {
    /// Bookmark id for a post.
    pub fn post_id_key(target_id: &str) -> String {
        format!("post:{}", target_id)
    }

    /// Bookmark id for a comment.
    pub fn comment_id_key(target_id: &str) -> String {
        format!("comment:{}", target_id)
    }
}

/// A device-local follow edge; never broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Following {
    /// `{user_id}:{followed_address}`.
    pub id: String,
    pub user_id: String,
    pub followed_address: String,
    pub followed_at_ms: u64,
}

impl Following {
    pub fn key(user_id: &str, followed_address: &str) -> String {
        format!("{}:{}", user_id, followed_address)
    }
}

/// Apply counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicaStats {
    pub accepted: u64,
    pub duplicates: u64,
    pub rejected: u64,
    /// In-memory applies whose durable write failed.
    pub storage_failures: u64,
}

/// Key of a moderation slot.
type ModKey = (String, ModTargetKind, String);

/// The local replica of forum state.
pub struct Replica {
    cells: HashMap<String, Message>,
    posts: HashMap<String, Message>,
    posts_by_cell: HashMap<String, HashSet<String>>,
    comments: HashMap<String, Message>,
    /// Comment ids per post, kept sorted by `(timestamp, id)`.
    comments_by_post: HashMap<String, Vec<String>>,
    /// Latest vote per `(target_id, author)`.
    votes: HashMap<(String, String), Message>,
    /// Effective moderation record per `(cell_id, target_kind, target_id)`.
    moderations: HashMap<ModKey, Message>,
    /// Every accepted ProfileUpdate, by message id.
    profiles: HashMap<String, Message>,
    /// Latest `(timestamp, id)` ProfileUpdate watermark per author.
    profile_latest: HashMap<String, (u64, String)>,
    identities: HashMap<String, UserIdentity>,
    bookmarks: HashMap<String, Bookmark>,
    following: HashMap<String, Following>,
    seen: HashSet<(MessageKind, String, u64)>,
    pending: HashSet<String>,
    last_sync_ms: Option<u64>,
    store: Option<ReplicaStore>,
    stats: ReplicaStats,
    pending_listeners: ListenerRegistry<Vec<String>>,
}

impl Replica {
    /// Opens a replica over a durable store, hydrating every index.
    pub fn open(store: ReplicaStore) -> Result<Self> {
        let mut replica = Self::bare(Some(store));
        replica.hydrate()?;
        Ok(replica)
    }

    /// An ephemeral replica with no durable store (tests, dry runs).
    pub fn in_memory() -> Self {
        Self::bare(None)
    }

    fn bare(store: Option<ReplicaStore>) -> Self {
        Self {
            cells: HashMap::new(),
            posts: HashMap::new(),
            posts_by_cell: HashMap::new(),
            comments: HashMap::new(),
            comments_by_post: HashMap::new(),
            votes: HashMap::new(),
            moderations: HashMap::new(),
            profiles: HashMap::new(),
            profile_latest: HashMap::new(),
            identities: HashMap::new(),
            bookmarks: HashMap::new(),
            following: HashMap::new(),
            seen: HashSet::new(),
            pending: HashSet::new(),
            last_sync_ms: None,
            store,
            stats: ReplicaStats::default(),
            pending_listeners: ListenerRegistry::new(),
        }
    }

    fn hydrate(&mut self) -> Result<()> {
        let Some(store) = self.store.take() else {
            return Ok(());
        };

        for cf in [CF_CELLS, CF_POSTS, CF_COMMENTS, CF_VOTES, CF_MODERATIONS, CF_PROFILES] {
            for message in store.load_messages(cf)? {
                // Stored messages were verified when first accepted; replay
                // them straight into the indexes.
                self.index_message(&message);
                self.seen.insert(message.dedup_key());
            }
        }

        for identity in store.load_records::<UserIdentity>(CF_IDENTITIES)? {
            self.identities.insert(identity.address.clone(), identity);
        }
        for bookmark in store.load_records::<Bookmark>(CF_BOOKMARKS)? {
            self.bookmarks.insert(bookmark.id.clone(), bookmark);
        }
        for follow in store.load_records::<Following>(CF_FOLLOWING)? {
            self.following.insert(follow.id.clone(), follow);
        }
        self.last_sync_ms = store.last_sync_ms()?;

        debug!(
            cells = self.cells.len(),
            posts = self.posts.len(),
            comments = self.comments.len(),
            votes = self.votes.len(),
            moderations = self.moderations.len(),
            "hydrated replica"
        );
        self.store = Some(store);
        Ok(())
    }

    // =========================================================================
    // Apply pipeline
    // =========================================================================

    /// Validates, verifies, dedups, and applies one message.
    ///
    /// The outcome is a value, not an error: rejection and duplication are
    /// expected traffic on a gossip channel. From any observer's view the
    /// apply is atomic: either the message is in all indexes and `seen`, or
    /// in none.
    pub fn apply_message(&mut self, message: &Message, now_ms: u64) -> ApplyOutcome {
        let report = validate_structure(message, now_ms);
        if !report.ok() {
            self.stats.rejected += 1;
            debug!(id = %message.id, reason = %report.summary(), "rejected malformed message");
            return ApplyOutcome::Rejected(report.summary());
        }

        let (verified, reasons) = DelegationManager::verify_with_reasons(message);
        if !verified {
            self.stats.rejected += 1;
            let reason = reasons.join("; ");
            debug!(id = %message.id, reason = %reason, "rejected unverifiable message");
            return ApplyOutcome::Rejected(reason);
        }

        let dedup_key = message.dedup_key();
        if self.seen.contains(&dedup_key) {
            self.stats.duplicates += 1;
            trace!(id = %message.id, "duplicate message");
            return ApplyOutcome::Duplicate;
        }

        let index_changed = self.index_message(message);
        if index_changed {
            self.persist_message(message);
        }

        self.seen.insert(dedup_key);
        if self.last_sync_ms.is_none_or(|t| message.timestamp > t) {
            self.last_sync_ms = Some(message.timestamp);
            if let Some(store) = &self.store {
                if let Err(e) = store.put_last_sync_ms(message.timestamp) {
                    warn!(error = %e, "failed to persist sync watermark");
                }
            }
        }
        self.stats.accepted += 1;
        ApplyOutcome::Accepted
    }

    /// Updates the primary index for the message's kind. Returns whether
    /// the index changed (a superseded vote/moderation loses the slot and
    /// changes nothing).
    fn index_message(&mut self, message: &Message) -> bool {
        match &message.body {
            MessageBody::Cell { .. } => {
                if self.cells.contains_key(&message.id) {
                    return false;
                }
                self.cells.insert(message.id.clone(), message.clone());
                self.posts_by_cell.entry(message.id.clone()).or_default();
                true
            }
            MessageBody::Post { cell_id, .. } => {
                if self.posts.contains_key(&message.id) {
                    return false;
                }
                self.posts_by_cell
                    .entry(cell_id.clone())
                    .or_default()
                    .insert(message.id.clone());
                self.posts.insert(message.id.clone(), message.clone());
                true
            }
            MessageBody::Comment { post_id, .. } => {
                if self.comments.contains_key(&message.id) {
                    return false;
                }
                let order = self.comments_by_post.entry(post_id.clone()).or_default();
                let sort_key = (message.timestamp, message.id.clone());
                let position = order
                    .partition_point(|id| match self.comments.get(id) {
                        Some(existing) => {
                            (existing.timestamp, existing.id.clone()) < sort_key
                        }
                        None => false,
                    });
                order.insert(position, message.id.clone());
                self.comments.insert(message.id.clone(), message.clone());
                true
            }
            MessageBody::Vote { target_id, .. } => {
                let slot = (target_id.clone(), message.author.clone());
                let wins = self
                    .votes
                    .get(&slot)
                    .is_none_or(|current| supersession_key(current) < supersession_key(message));
                if wins {
                    self.votes.insert(slot, message.clone());
                }
                wins
            }
            MessageBody::Moderate {
                target_kind,
                target_id,
                cell_id,
                ..
            } => {
                let slot = (cell_id.clone(), *target_kind, target_id.clone());
                let wins = self
                    .moderations
                    .get(&slot)
                    .is_none_or(|current| supersession_key(current) < supersession_key(message));
                if wins {
                    self.moderations.insert(slot, message.clone());
                }
                wins
            }
            MessageBody::ProfileUpdate {
                call_sign,
                display_preference,
            } => {
                if self.profiles.contains_key(&message.id) {
                    return false;
                }
                let watermark = (message.timestamp, message.id.clone());
                let newer = self
                    .profile_latest
                    .get(&message.author)
                    .is_none_or(|current| *current < watermark);
                if newer {
                    self.profile_latest.insert(message.author.clone(), watermark);
                    let identity = self
                        .identities
                        .entry(message.author.clone())
                        .or_insert_with(|| UserIdentity {
                            address: message.author.clone(),
                            ens_name: None,
                            ens_avatar: None,
                            call_sign: None,
                            display_preference: Default::default(),
                            display_name: crate::constants::address_short(&message.author),
                            verification_status: if crate::crypto::is_uuid_v4(&message.author) {
                                crate::identity::VerificationStatus::Anonymous
                            } else {
                                crate::identity::VerificationStatus::WalletConnected
                            },
                            last_updated_ms: 0,
                        });
                    identity.call_sign = call_sign.clone();
                    identity.display_preference = *display_preference;
                    identity.display_name = crate::identity::derive_display_name(
                        &identity.address,
                        identity.ens_name.as_deref(),
                        identity.call_sign.as_deref(),
                        identity.display_preference,
                    );
                    let identity = identity.clone();
                    self.persist_identity(&identity);
                }
                self.profiles.insert(message.id.clone(), message.clone());
                true
            }
        }
    }

    /// Writes the message through to its collection. Failures leave the
    /// in-memory apply intact and are surfaced as warnings.
    fn persist_message(&mut self, message: &Message) {
        let Some(store) = &self.store else { return };
        let result = match &message.body {
            MessageBody::Cell { .. } => {
                store.put_message(CF_CELLS, message.id.as_bytes(), message)
            }
            MessageBody::Post { .. } => store.put_message(CF_POSTS, message.id.as_bytes(), message),
            MessageBody::Comment { .. } => {
                store.put_message(CF_COMMENTS, message.id.as_bytes(), message)
            }
            MessageBody::Vote { target_id, .. } => store.put_message(
                CF_VOTES,
                &composite_key(&[target_id, &message.author]),
                message,
            ),
            MessageBody::Moderate {
                target_kind,
                target_id,
                cell_id,
                ..
            } => store.put_message(
                CF_MODERATIONS,
                &composite_key(&[cell_id, &format!("{:?}", target_kind), target_id]),
                message,
            ),
            MessageBody::ProfileUpdate { .. } => {
                store.put_message(CF_PROFILES, message.id.as_bytes(), message)
            }
        };
        if let Err(e) = result {
            self.stats.storage_failures += 1;
            warn!(id = %message.id, error = %e, "durable write failed; replica remains in memory");
        }
    }

    fn persist_identity(&mut self, identity: &UserIdentity) {
        let Some(store) = &self.store else { return };
        if let Err(e) = store.put_record(CF_IDENTITIES, identity.address.as_bytes(), identity) {
            self.stats.storage_failures += 1;
            warn!(address = %identity.address, error = %e, "failed to persist identity");
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn cell(&self, id: &str) -> Option<&Message> {
        self.cells.get(id)
    }

    pub fn cells(&self) -> impl Iterator<Item = &Message> {
        self.cells.values()
    }

    pub fn post(&self, id: &str) -> Option<&Message> {
        self.posts.get(id)
    }

    pub fn posts(&self) -> impl Iterator<Item = &Message> {
        self.posts.values()
    }

    /// Posts in a cell, sorted by `(timestamp, id)` for determinism.
    pub fn posts_in_cell(&self, cell_id: &str) -> Vec<&Message> {
        let mut posts: Vec<&Message> = self
            .posts_by_cell
            .get(cell_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.posts.get(id))
            .collect();
        posts.sort_by_key(|p| (p.timestamp, p.id.clone()));
        posts
    }

    pub fn comment(&self, id: &str) -> Option<&Message> {
        self.comments.get(id)
    }

    /// Comments on a post, ordered by `(timestamp, id)`.
    pub fn comments_for_post(&self, post_id: &str) -> Vec<&Message> {
        self.comments_by_post
            .get(post_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.comments.get(id))
            .collect()
    }

    /// Current votes targeting `target_id`, one per author.
    pub fn votes_for_target(&self, target_id: &str) -> Vec<&Message> {
        let mut votes: Vec<&Message> = self
            .votes
            .iter()
            .filter(|((target, _), _)| target == target_id)
            .map(|(_, message)| message)
            .collect();
        votes.sort_by_key(|v| (v.timestamp, v.id.clone()));
        votes
    }

    /// The stored vote by `author` on `target_id`.
    pub fn vote_by(&self, target_id: &str, author: &str) -> Option<&Message> {
        self.votes.get(&(target_id.to_string(), author.to_string()))
    }

    /// The effective moderation record for a slot.
    pub fn moderation(
        &self,
        cell_id: &str,
        target_kind: ModTargetKind,
        target_id: &str,
    ) -> Option<&Message> {
        self.moderations
            .get(&(cell_id.to_string(), target_kind, target_id.to_string()))
    }

    /// True when the slot's effective record is a `Moderate` action.
    pub fn is_moderated(&self, cell_id: &str, target_kind: ModTargetKind, target_id: &str) -> bool {
        matches!(
            self.moderation(cell_id, target_kind, target_id).map(|m| &m.body),
            Some(MessageBody::Moderate {
                action: ModerationAction::Moderate,
                ..
            })
        )
    }

    pub fn identity(&self, address: &str) -> Option<&UserIdentity> {
        self.identities.get(address)
    }

    pub fn identities(&self) -> impl Iterator<Item = &UserIdentity> {
        self.identities.values()
    }

    /// Upserts a resolver-refreshed identity and persists it.
    pub fn put_identity(&mut self, identity: UserIdentity) {
        self.persist_identity(&identity);
        self.identities.insert(identity.address.clone(), identity);
    }

    pub fn last_sync_ms(&self) -> Option<u64> {
        self.last_sync_ms
    }

    pub fn stats(&self) -> ReplicaStats {
        self.stats
    }

    // =========================================================================
    // Bookmarks and follows (device-local)
    // =========================================================================

    pub fn add_bookmark(&mut self, bookmark: Bookmark) {
        if let Some(store) = &self.store {
            if let Err(e) = store.put_record(CF_BOOKMARKS, bookmark.id.as_bytes(), &bookmark) {
                self.stats.storage_failures += 1;
                warn!(id = %bookmark.id, error = %e, "failed to persist bookmark");
            }
        }
        self.bookmarks.insert(bookmark.id.clone(), bookmark);
    }

    pub fn remove_bookmark(&mut self, id: &str) -> Option<Bookmark> {
        if let Some(store) = &self.store {
            if let Err(e) = store.delete(CF_BOOKMARKS, id.as_bytes()) {
                warn!(id, error = %e, "failed to delete bookmark");
            }
        }
        self.bookmarks.remove(id)
    }

    pub fn bookmark(&self, id: &str) -> Option<&Bookmark> {
        self.bookmarks.get(id)
    }

    pub fn bookmarks(&self) -> impl Iterator<Item = &Bookmark> {
        self.bookmarks.values()
    }

    pub fn add_following(&mut self, follow: Following) {
        if let Some(store) = &self.store {
            if let Err(e) = store.put_record(CF_FOLLOWING, follow.id.as_bytes(), &follow) {
                self.stats.storage_failures += 1;
                warn!(id = %follow.id, error = %e, "failed to persist follow");
            }
        }
        self.following.insert(follow.id.clone(), follow);
    }

    pub fn remove_following(&mut self, id: &str) -> Option<Following> {
        if let Some(store) = &self.store {
            if let Err(e) = store.delete(CF_FOLLOWING, id.as_bytes()) {
                warn!(id, error = %e, "failed to delete follow");
            }
        }
        self.following.remove(id)
    }

    pub fn following(&self) -> impl Iterator<Item = &Following> {
        self.following.values()
    }

    // =========================================================================
    // Pending set
    // =========================================================================

    /// Marks a locally built message as awaiting transport delivery.
    pub fn mark_pending(&mut self, id: &str) {
        if self.pending.insert(id.to_string()) {
            self.notify_pending();
        }
    }

    /// Clears the pending mark once the transport confirms delivery.
    pub fn clear_pending(&mut self, id: &str) {
        if self.pending.remove(id) {
            self.notify_pending();
        }
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains(id)
    }

    pub fn pending(&self) -> Vec<String> {
        let mut pending: Vec<String> = self.pending.iter().cloned().collect();
        pending.sort();
        pending
    }

    /// Subscribes to pending-set changes; the callback receives the sorted
    /// snapshot after each change.
    pub fn on_pending_changed(
        &mut self,
        listener: impl FnMut(&Vec<String>) + 'static,
    ) -> SubscriptionId {
        self.pending_listeners.subscribe(listener)
    }

    pub fn unsubscribe_pending(&mut self, subscription: SubscriptionId) -> bool {
        self.pending_listeners.unsubscribe(subscription)
    }

    fn notify_pending(&mut self) {
        let snapshot = self.pending();
        self.pending_listeners.emit(&snapshot);
    }
}

impl std::fmt::Debug for Replica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replica")
            .field("cells", &self.cells.len())
            .field("posts", &self.posts.len())
            .field("comments", &self.comments.len())
            .field("votes", &self.votes.len())
            .field("moderations", &self.moderations.len())
            .field("pending", &self.pending.len())
            .field("last_sync_ms", &self.last_sync_ms)
            .finish()
    }
}
