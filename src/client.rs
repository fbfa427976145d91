//! Client facade.
//!
//! `OpchanClient` wires the delegation manager, replica, identity resolver,
//! and transport adapter into one object with an explicit lifecycle. All
//! forum actions live here: each one checks the permission matrix, builds
//! an unsigned message from the injected id source and clock, signs it,
//! applies it locally (so readers see it immediately), marks it pending,
//! and hands it to the transport.
//!
//! The engine is single-threaded and cooperative: the host calls
//! [`OpchanClient::handle_incoming`] with payloads from the channel and the
//! action methods from its UI; listeners fire synchronously after state
//! commits.

use crate::delegation::{
    DelegationDuration, DelegationManager, DelegationStatus, DelegationStore, WalletSigner,
};
use crate::env::{Clock, IdSource};
use crate::error::{OpchanError, Result};
use crate::events::{ListenerRegistry, SubscriptionId};
use crate::identity::{IdentityResolver, NameResolver, UserIdentity, VerificationStatus};
use crate::message::{
    decode_wire, validate_content, DisplayPreference, Message, MessageBody, ModTargetKind,
    ModerationAction,
};
use crate::permissions;
use crate::replica::{
    ApplyOutcome, Bookmark, EnhancedCell, EnhancedPost, Following, Replica, ReplicaStats,
    StoreConfig,
};
use crate::replica::store::ReplicaStore;
use crate::transport::{MessageSender, SyncPhase, TransportAdapter};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Filesystem and store configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Root directory; the replica database and delegation record live
    /// beneath it.
    pub data_dir: PathBuf,
    pub store: StoreConfig,
}

impl ClientConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            store: StoreConfig::default(),
        }
    }
}

/// Injected capabilities. Nothing in the engine reaches for ambient
/// globals; hosts and tests decide what backs each seam.
pub struct ClientDeps {
    pub sender: Box<dyn MessageSender>,
    pub resolver: Box<dyn NameResolver>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdSource>,
}

/// The engine facade.
pub struct OpchanClient {
    replica: Replica,
    delegation: DelegationManager,
    identity: IdentityResolver,
    transport: TransportAdapter,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdSource>,
    message_listeners: ListenerRegistry<Message>,
    identity_listeners: ListenerRegistry<String>,
}

impl OpchanClient {
    /// Opens the engine: hydrates the replica from the durable store,
    /// loads the persisted delegation, and seeds the identity cache.
    pub fn open(config: ClientConfig, deps: ClientDeps) -> Result<Self> {
        let store = ReplicaStore::open(config.data_dir.join("replica"), &config.store)?;
        let replica = Replica::open(store)?;
        let delegation =
            DelegationManager::open(DelegationStore::new(config.data_dir.join("delegation.json")))?;

        let mut identity = IdentityResolver::new(deps.resolver);
        identity.seed(replica.identities().cloned());

        info!(data_dir = %config.data_dir.display(), "opened opchan client");
        Ok(Self {
            replica,
            delegation,
            identity,
            transport: TransportAdapter::new(deps.sender),
            clock: deps.clock,
            ids: deps.ids,
            message_listeners: ListenerRegistry::new(),
            identity_listeners: ListenerRegistry::new(),
        })
    }

    /// Tears the engine down. Buffered store writes flush on drop.
    pub fn close(self) {
        info!("closing opchan client");
    }

    fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    // =========================================================================
    // Delegation lifecycle
    // =========================================================================

    /// Creates a wallet-backed delegation via the caller's signer.
    pub fn create_wallet_delegation(
        &mut self,
        wallet_address: &str,
        duration: DelegationDuration,
        signer: &dyn WalletSigner,
    ) -> Result<DelegationStatus> {
        let now = self.now();
        let status = self
            .delegation
            .create_wallet_delegation(wallet_address, duration, signer, now)?;
        if let Some(address) = &status.address {
            self.identity.mark_delegated(address);
        }
        Ok(status)
    }

    /// Creates an anonymous delegation; returns the session id.
    pub fn create_anonymous_delegation(
        &mut self,
        duration: DelegationDuration,
    ) -> Result<String> {
        let now = self.now();
        self.delegation.create_anonymous_delegation(duration, now)
    }

    pub fn delegation_status(&self) -> DelegationStatus {
        self.delegation.status(self.now())
    }

    pub fn clear_delegation(&mut self) -> Result<()> {
        self.delegation.clear()
    }

    // =========================================================================
    // Ingress
    // =========================================================================

    /// Feeds one payload from the pub/sub channel into the replica.
    ///
    /// Undecodable payloads are rejections, not errors; gossip channels
    /// carry garbage. On acceptance, observers registered through
    /// [`on_message`](Self::on_message) fire after the state commit.
    pub fn handle_incoming(&mut self, payload: &[u8]) -> ApplyOutcome {
        let message = match decode_wire(payload) {
            Ok(message) => message,
            Err(e) => return ApplyOutcome::Rejected(e.to_string()),
        };
        let outcome = self.replica.apply_message(&message, self.now());
        if outcome.is_accepted() {
            self.after_accept(&message);
        }
        self.transport.notify_received(payload.to_vec());
        outcome
    }

    /// Marks a locally produced message as delivered, clearing its pending
    /// flag. Wired to the transport's delivery confirmation.
    pub fn confirm_delivery(&mut self, message_id: &str) {
        self.replica.clear_pending(message_id);
    }

    /// Host-pushed transport liveness.
    pub fn set_transport_health(&mut self, healthy: bool) {
        self.transport.set_health(healthy);
    }

    /// Host-pushed sync phase.
    pub fn set_sync_phase(&mut self, phase: SyncPhase) {
        self.transport.set_sync_phase(phase);
    }

    /// Post-accept bookkeeping shared by ingress and local actions.
    fn after_accept(&mut self, message: &Message) {
        if message.delegation_proof.is_some() {
            self.identity.mark_delegated(&message.author);
        }
        if matches!(message.body, MessageBody::ProfileUpdate { .. }) {
            // The replica has already merged this update under its
            // `(timestamp, id)` watermark; its record is authoritative. A
            // stale redelivered update must not clobber a newer call sign.
            if let Some(identity) = self.replica.identity(&message.author).cloned() {
                self.identity.sync(identity);
            }
            self.identity_listeners.emit(&message.author);
        }
        self.message_listeners.emit(message);
    }

    // =========================================================================
    // Forum actions
    // =========================================================================

    /// Builds, signs, applies, marks pending, and publishes one message.
    fn submit(&mut self, body: MessageBody) -> Result<Message> {
        let now = self.now();
        let status = self.delegation.status(now);
        permissions::require_authenticated(&status)?;
        validate_content(&body)?;

        let author = status
            .address
            .ok_or_else(|| OpchanError::delegation_missing("Delegation has no author"))?;
        let message = Message::unsigned(self.ids.next_id(), now, author, body);
        let signed = self.delegation.sign(message, now)?;

        match self.replica.apply_message(&signed, now) {
            ApplyOutcome::Rejected(reason) => {
                // A locally built message failing its own apply is a bug in
                // the builder, not normal traffic.
                return Err(OpchanError::malformed(reason));
            }
            ApplyOutcome::Accepted | ApplyOutcome::Duplicate => {}
        }
        self.replica.mark_pending(&signed.id);
        self.after_accept(&signed);

        debug!(id = %signed.id, kind = %signed.kind(), "submitting local message");
        self.transport.send(&signed)?;
        Ok(signed)
    }

    /// Creates a cell. Requires an ENS-verified author.
    pub fn create_cell(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        icon: Option<String>,
    ) -> Result<Message> {
        let now = self.now();
        let status = self.delegation.status(now);
        permissions::require_authenticated(&status)?;
        let author = status
            .address
            .ok_or_else(|| OpchanError::delegation_missing("Delegation has no author"))?;
        let identity = self.identity.get(&author, false, now);
        permissions::require_cell_creator(&identity)?;

        self.submit(MessageBody::Cell {
            name: name.into(),
            description: description.into(),
            icon,
        })
    }

    /// Creates a post in a cell.
    pub fn create_post(
        &mut self,
        cell_id: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<Message> {
        self.submit(MessageBody::Post {
            cell_id: cell_id.into(),
            title: title.into(),
            body: body.into(),
        })
    }

    /// Comments on a post.
    pub fn create_comment(
        &mut self,
        post_id: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<Message> {
        self.submit(MessageBody::Comment {
            post_id: post_id.into(),
            body: body.into(),
        })
    }

    /// Votes on a post or comment already present in the replica.
    pub fn vote(&mut self, target_id: &str, value: i8) -> Result<Message> {
        if self.replica.post(target_id).is_none() && self.replica.comment(target_id).is_none() {
            return Err(OpchanError::invalid_input(format!(
                "Vote target '{}' is not a known post or comment",
                target_id
            )));
        }
        self.submit(MessageBody::Vote {
            target_id: target_id.to_string(),
            value,
        })
    }

    fn moderation(
        &mut self,
        action: ModerationAction,
        target_kind: ModTargetKind,
        cell_id: &str,
        target_id: &str,
        reason: Option<String>,
    ) -> Result<Message> {
        let now = self.now();
        let status = self.delegation.status(now);
        permissions::require_authenticated(&status)?;
        let author = status
            .address
            .ok_or_else(|| OpchanError::delegation_missing("Delegation has no author"))?;
        permissions::require_cell_owner(self.replica.cell(cell_id), &author)?;

        self.submit(MessageBody::Moderate {
            action,
            target_kind,
            target_id: target_id.to_string(),
            cell_id: cell_id.to_string(),
            reason,
        })
    }

    /// Flags a post in an owned cell.
    pub fn moderate_post(
        &mut self,
        cell_id: &str,
        post_id: &str,
        reason: Option<String>,
    ) -> Result<Message> {
        self.moderation(
            ModerationAction::Moderate,
            ModTargetKind::Post,
            cell_id,
            post_id,
            reason,
        )
    }

    /// Lifts a post moderation in an owned cell.
    pub fn unmoderate_post(&mut self, cell_id: &str, post_id: &str) -> Result<Message> {
        self.moderation(
            ModerationAction::Unmoderate,
            ModTargetKind::Post,
            cell_id,
            post_id,
            None,
        )
    }

    /// Flags a comment in an owned cell.
    pub fn moderate_comment(
        &mut self,
        cell_id: &str,
        comment_id: &str,
        reason: Option<String>,
    ) -> Result<Message> {
        self.moderation(
            ModerationAction::Moderate,
            ModTargetKind::Comment,
            cell_id,
            comment_id,
            reason,
        )
    }

    /// Lifts a comment moderation in an owned cell.
    pub fn unmoderate_comment(&mut self, cell_id: &str, comment_id: &str) -> Result<Message> {
        self.moderation(
            ModerationAction::Unmoderate,
            ModTargetKind::Comment,
            cell_id,
            comment_id,
            None,
        )
    }

    /// Flags a user within an owned cell.
    pub fn moderate_user(
        &mut self,
        cell_id: &str,
        user_address: &str,
        reason: Option<String>,
    ) -> Result<Message> {
        self.moderation(
            ModerationAction::Moderate,
            ModTargetKind::User,
            cell_id,
            user_address,
            reason,
        )
    }

    /// Lifts a user moderation within an owned cell.
    pub fn unmoderate_user(&mut self, cell_id: &str, user_address: &str) -> Result<Message> {
        self.moderation(
            ModerationAction::Unmoderate,
            ModTargetKind::User,
            cell_id,
            user_address,
            None,
        )
    }

    /// Publishes a profile update for the current author.
    pub fn update_profile(
        &mut self,
        call_sign: Option<String>,
        display_preference: DisplayPreference,
    ) -> Result<Message> {
        self.submit(MessageBody::ProfileUpdate {
            call_sign,
            display_preference,
        })
    }

    // =========================================================================
    // Device-local state
    // =========================================================================

    fn local_user(&self) -> Result<String> {
        self.delegation
            .author()
            .map(str::to_string)
            .ok_or_else(|| OpchanError::delegation_missing("No active delegation"))
    }

    /// Bookmarks a post; device-local, never broadcast.
    pub fn bookmark_post(&mut self, post_id: &str) -> Result<Bookmark> {
        let user_id = self.local_user()?;
        let post = self.replica.post(post_id);
        let bookmark = Bookmark {
            id: Bookmark::post_id_key(post_id),
            user_id,
            created_at_ms: self.now(),
            title: post.and_then(|p| match &p.body {
                MessageBody::Post { title, .. } => Some(title.clone()),
                _ => None,
            }),
            author: post.map(|p| p.author.clone()),
            cell_id: post.and_then(|p| p.cell_id().map(str::to_string)),
            post_id: None,
        };
        self.replica.add_bookmark(bookmark.clone());
        Ok(bookmark)
    }

    /// Bookmarks a comment; device-local, never broadcast.
    pub fn bookmark_comment(&mut self, comment_id: &str) -> Result<Bookmark> {
        let user_id = self.local_user()?;
        let comment = self.replica.comment(comment_id);
        let bookmark = Bookmark {
            id: Bookmark::comment_id_key(comment_id),
            user_id,
            created_at_ms: self.now(),
            title: None,
            author: comment.map(|c| c.author.clone()),
            cell_id: None,
            post_id: comment.and_then(|c| match &c.body {
                MessageBody::Comment { post_id, .. } => Some(post_id.clone()),
                _ => None,
            }),
        };
        self.replica.add_bookmark(bookmark.clone());
        Ok(bookmark)
    }

    pub fn remove_bookmark(&mut self, bookmark_id: &str) -> Option<Bookmark> {
        self.replica.remove_bookmark(bookmark_id)
    }

    /// Follows an address; device-local, never broadcast.
    pub fn follow(&mut self, followed_address: &str) -> Result<Following> {
        let user_id = self.local_user()?;
        let follow = Following {
            id: Following::key(&user_id, followed_address),
            user_id,
            followed_address: followed_address.to_string(),
            followed_at_ms: self.now(),
        };
        self.replica.add_following(follow.clone());
        Ok(follow)
    }

    pub fn unfollow(&mut self, followed_address: &str) -> Result<Option<Following>> {
        let user_id = self.local_user()?;
        Ok(self
            .replica
            .remove_following(&Following::key(&user_id, followed_address)))
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn replica(&self) -> &Replica {
        &self.replica
    }

    pub fn stats(&self) -> ReplicaStats {
        self.replica.stats()
    }

    pub fn is_transport_ready(&self) -> bool {
        self.transport.is_ready()
    }

    /// Resolves an identity, refreshing the cache as needed and persisting
    /// the result.
    pub fn get_identity(&mut self, address: &str, fresh: bool) -> UserIdentity {
        let now = self.now();
        let identity = self.identity.get(address, fresh, now);
        if identity.verification_status != VerificationStatus::Anonymous {
            self.replica.put_identity(identity.clone());
        }
        identity
    }

    /// Enhanced view of a post using the cached verification tiers.
    pub fn enhanced_post(&self, post_id: &str) -> Option<EnhancedPost> {
        self.replica.enhanced_post(
            post_id,
            |address| self.identity.verification_of(address),
            self.now(),
        )
    }

    /// Posts of a cell ranked by relevance.
    pub fn ranked_posts(&self, cell_id: &str) -> Vec<EnhancedPost> {
        self.replica.ranked_posts(
            cell_id,
            |address| self.identity.verification_of(address),
            self.now(),
        )
    }

    /// Enhanced view of a cell.
    pub fn enhanced_cell(&self, cell_id: &str) -> Option<EnhancedCell> {
        self.replica.enhanced_cell(cell_id, self.now())
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Fires after every accepted message, local or from the network.
    pub fn on_message(&mut self, listener: impl FnMut(&Message) + 'static) -> SubscriptionId {
        self.message_listeners.subscribe(listener)
    }

    pub fn unsubscribe_message(&mut self, subscription: SubscriptionId) -> bool {
        self.message_listeners.unsubscribe(subscription)
    }

    /// Fires with the author address after an identity-affecting change.
    pub fn on_identity_changed(
        &mut self,
        listener: impl FnMut(&String) + 'static,
    ) -> SubscriptionId {
        self.identity_listeners.subscribe(listener)
    }

    pub fn unsubscribe_identity(&mut self, subscription: SubscriptionId) -> bool {
        self.identity_listeners.unsubscribe(subscription)
    }

    /// Fires with the sorted pending snapshot on every pending change.
    pub fn on_pending_changed(
        &mut self,
        listener: impl FnMut(&Vec<String>) + 'static,
    ) -> SubscriptionId {
        self.replica.on_pending_changed(listener)
    }

    /// Fires on transport liveness changes.
    pub fn on_health(&mut self, listener: impl FnMut(&bool) + 'static) -> SubscriptionId {
        self.transport.on_health(listener)
    }

    /// Fires on sync-phase transitions.
    pub fn on_sync(&mut self, listener: impl FnMut(&SyncPhase) + 'static) -> SubscriptionId {
        self.transport.on_sync(listener)
    }
}

impl std::fmt::Debug for OpchanClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpchanClient")
            .field("replica", &self.replica)
            .finish_non_exhaustive()
    }
}
