//! End-to-end tests for the forum engine.
//!
//! These drive complete flows through the client facade: delegations,
//! posting, cross-replica convergence, moderation, and permissions, with
//! two simulated devices exchanging wire payloads by hand.

use opchan::crypto::wallet::{address_of, personal_sign_hash};
use opchan::env::{FixedClock, UuidSource};
use opchan::identity::{NameResolver, NoopResolver, ResolvedName};
use opchan::message::MessageBody;
use opchan::transport::MessageSender;
use opchan::{
    ApplyOutcome, ClientConfig, ClientDeps, DelegationDuration, DisplayPreference, OpchanClient,
    OpchanError, Result, VerificationStatus, WalletSigner,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use tempfile::TempDir;

const NOW: u64 = 1_700_000_000_000;

/// Routes engine tracing output through the test harness capture, so
/// `tracing::debug!`/`warn!` lines show up on failing tests.
fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Captures every payload the client publishes.
#[derive(Default, Clone)]
struct CapturingSender {
    sent: Rc<RefCell<Vec<Vec<u8>>>>,
}

impl MessageSender for CapturingSender {
    fn send(&self, payload: &[u8]) -> Result<()> {
        self.sent.borrow_mut().push(payload.to_vec());
        Ok(())
    }

    fn is_ready(&self) -> bool {
        true
    }
}

/// Sender that always fails, for offline scenarios.
struct OfflineSender;

impl MessageSender for OfflineSender {
    fn send(&self, _payload: &[u8]) -> Result<()> {
        Err(OpchanError::transport("no peers connected"))
    }

    fn is_ready(&self) -> bool {
        false
    }
}

/// Resolver that knows a fixed set of primary names.
struct StaticResolver {
    names: Vec<(String, String)>,
}

impl NameResolver for StaticResolver {
    fn resolve(&self, address: &str) -> Result<Option<ResolvedName>> {
        Ok(self
            .names
            .iter()
            .find(|(a, _)| a == address)
            .map(|(_, name)| ResolvedName {
                name: name.clone(),
                avatar: None,
            }))
    }
}

/// In-memory wallet backed by a secp256k1 key.
struct TestWallet {
    key: k256::ecdsa::SigningKey,
}

impl TestWallet {
    fn new() -> Self {
        Self {
            key: k256::ecdsa::SigningKey::random(&mut rand::rngs::OsRng),
        }
    }

    fn address(&self) -> String {
        address_of(self.key.verifying_key())
    }
}

impl WalletSigner for TestWallet {
    fn sign_message(&self, message: &str) -> Result<String> {
        let hash = personal_sign_hash(message);
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(&hash)
            .map_err(|e| OpchanError::wallet_signer(e.to_string()))?;
        let mut bytes = signature.to_vec();
        bytes.push(recovery_id.to_byte());
        Ok(format!("0x{}", hex::encode(bytes)))
    }
}

struct Device {
    client: OpchanClient,
    sent: Rc<RefCell<Vec<Vec<u8>>>>,
    clock: Arc<FixedClock>,
    _dir: TempDir,
}

fn device_with_resolver(resolver: Box<dyn NameResolver>) -> Device {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let sender = CapturingSender::default();
    let sent = Rc::clone(&sender.sent);
    let clock = Arc::new(FixedClock::new(NOW));
    let client = OpchanClient::open(
        ClientConfig::new(dir.path()),
        ClientDeps {
            sender: Box::new(sender),
            resolver,
            clock: Arc::clone(&clock) as Arc<dyn opchan::env::Clock>,
            ids: Arc::new(UuidSource),
        },
    )
    .unwrap();
    Device {
        client,
        sent,
        clock,
        _dir: dir,
    }
}

fn device() -> Device {
    device_with_resolver(Box::new(NoopResolver))
}

impl Device {
    /// Drains everything this device published into another device.
    fn gossip_to(&self, other: &mut Device) {
        for payload in self.sent.borrow().iter() {
            other.client.handle_incoming(payload);
        }
    }
}

// =============================================================================
// Scenario: anonymous post round-trip
// =============================================================================

#[test]
fn test_anonymous_post_round_trip() {
    let mut alice = device();
    let mut bob = device();

    alice
        .client
        .create_anonymous_delegation(DelegationDuration::SevenDays)
        .unwrap();
    let post = alice.client.create_post("c1", "Hi", "World").unwrap();

    alice.gossip_to(&mut bob);

    let replicated = bob.client.replica().post(&post.id).expect("post replicated");
    assert_eq!(replicated, &post);

    // A body modification under the same signature must be rejected.
    let mut forged = post.clone();
    if let MessageBody::Post { body, .. } = &mut forged.body {
        *body = "World!".into();
    }
    let payload = opchan::message::encode_wire(&forged).unwrap();
    assert!(matches!(
        bob.client.handle_incoming(&payload),
        ApplyOutcome::Rejected(_)
    ));
    // Bob still holds the original.
    if let MessageBody::Post { body, .. } = &bob.client.replica().post(&post.id).unwrap().body {
        assert_eq!(body, "World");
    }
}

// =============================================================================
// Scenario: vote supersession across devices
// =============================================================================

#[test]
fn test_vote_supersession_across_devices() {
    let mut alice = device();
    let mut bob = device();

    let session = alice
        .client
        .create_anonymous_delegation(DelegationDuration::SevenDays)
        .unwrap();
    let post = alice.client.create_post("c1", "Hi", "World").unwrap();
    alice.clock.advance(1000);
    let _up = alice.client.vote(&post.id, 1).unwrap();
    alice.clock.advance(1000);
    let down = alice.client.vote(&post.id, -1).unwrap();
    assert!(down.timestamp > post.timestamp);

    // Deliver in order and in reverse; both replicas agree.
    alice.gossip_to(&mut bob);
    let stored = bob.client.replica().vote_by(&post.id, &session).unwrap();
    assert!(matches!(stored.body, MessageBody::Vote { value: -1, .. }));

    let mut carol = device();
    for payload in alice.sent.borrow().iter().rev() {
        carol.client.handle_incoming(payload);
    }
    let stored = carol.client.replica().vote_by(&post.id, &session).unwrap();
    assert!(matches!(stored.body, MessageBody::Vote { value: -1, .. }));
}

// =============================================================================
// Scenario: moderation toggle by the cell owner
// =============================================================================

#[test]
fn test_moderation_toggle() {
    let wallet = TestWallet::new();
    let mut owner = device_with_resolver(Box::new(StaticResolver {
        names: vec![(wallet.address(), "owner.eth".to_string())],
    }));
    owner
        .client
        .create_wallet_delegation(&wallet.address(), DelegationDuration::SevenDays, &wallet)
        .unwrap();

    let cell = owner.client.create_cell("general", "talk", None).unwrap();
    let post = owner.client.create_post(&cell.id, "Hi", "World").unwrap();

    owner.clock.advance(1000);
    owner.client.moderate_post(&cell.id, &post.id, None).unwrap();
    assert!(owner
        .client
        .replica()
        .is_moderated(&cell.id, opchan::ModTargetKind::Post, &post.id));

    owner.clock.advance(1000);
    owner.client.unmoderate_post(&cell.id, &post.id).unwrap();
    assert!(!owner
        .client
        .replica()
        .is_moderated(&cell.id, opchan::ModTargetKind::Post, &post.id));

    // Redelivering the stale Moderate message to a fresh replica after the
    // Unmoderate cannot resurrect the flag.
    let mut observer = device();
    owner.gossip_to(&mut observer);
    let payloads = owner.sent.borrow();
    let moderate_payload = payloads
        .iter()
        .find(|p| {
            let m = opchan::message::decode_wire(p).unwrap();
            matches!(
                m.body,
                MessageBody::Moderate {
                    action: opchan::ModerationAction::Moderate,
                    ..
                }
            )
        })
        .unwrap();
    assert_eq!(
        observer.client.handle_incoming(moderate_payload),
        ApplyOutcome::Duplicate
    );
    assert!(!observer
        .client
        .replica()
        .is_moderated(&cell.id, opchan::ModTargetKind::Post, &post.id));
}

// =============================================================================
// Scenario: permission denials
// =============================================================================

#[test]
fn test_non_owner_moderation_denied() {
    let wallet = TestWallet::new();
    let mut owner = device_with_resolver(Box::new(StaticResolver {
        names: vec![(wallet.address(), "owner.eth".to_string())],
    }));
    owner
        .client
        .create_wallet_delegation(&wallet.address(), DelegationDuration::SevenDays, &wallet)
        .unwrap();
    let cell = owner.client.create_cell("general", "talk", None).unwrap();
    let post = owner.client.create_post(&cell.id, "Hi", "World").unwrap();

    let mut intruder = device();
    intruder
        .client
        .create_anonymous_delegation(DelegationDuration::SevenDays)
        .unwrap();
    owner.gossip_to(&mut intruder);

    let stats_before = intruder.client.stats();
    let err = intruder
        .client
        .moderate_post(&cell.id, &post.id, None)
        .unwrap_err();
    assert!(matches!(err, OpchanError::PermissionDenied(_)));
    assert_eq!(intruder.client.stats(), stats_before, "no state change");
    assert!(!intruder
        .client
        .replica()
        .is_moderated(&cell.id, opchan::ModTargetKind::Post, &post.id));
}

#[test]
fn test_cell_creation_requires_ens() {
    let mut anon = device();
    anon.client
        .create_anonymous_delegation(DelegationDuration::SevenDays)
        .unwrap();
    let err = anon.client.create_cell("general", "talk", None).unwrap_err();
    assert!(matches!(err, OpchanError::PermissionDenied(_)));

    // A wallet without a primary name is denied too.
    let wallet = TestWallet::new();
    let mut plain = device();
    plain
        .client
        .create_wallet_delegation(&wallet.address(), DelegationDuration::SevenDays, &wallet)
        .unwrap();
    assert!(matches!(
        plain.client.create_cell("general", "talk", None),
        Err(OpchanError::PermissionDenied(_))
    ));
}

#[test]
fn test_unauthenticated_actions_denied() {
    let mut fresh = device();
    assert!(matches!(
        fresh.client.create_post("c1", "t", "b"),
        Err(OpchanError::DelegationMissing(_))
    ));
}

#[test]
fn test_vote_requires_known_target() {
    let mut alice = device();
    alice
        .client
        .create_anonymous_delegation(DelegationDuration::SevenDays)
        .unwrap();
    assert!(matches!(
        alice.client.vote("nonexistent", 1),
        Err(OpchanError::InvalidInput(_))
    ));
}

// =============================================================================
// Scenario: transport failure leaves the message pending
// =============================================================================

#[test]
fn test_offline_send_keeps_message_pending() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let mut client = OpchanClient::open(
        ClientConfig::new(dir.path()),
        ClientDeps {
            sender: Box::new(OfflineSender),
            resolver: Box::new(NoopResolver),
            clock: Arc::new(FixedClock::new(NOW)),
            ids: Arc::new(UuidSource),
        },
    )
    .unwrap();
    client
        .create_anonymous_delegation(DelegationDuration::SevenDays)
        .unwrap();

    let err = client.create_post("c1", "Hi", "World").unwrap_err();
    assert!(matches!(err, OpchanError::TransportUnavailable(_)));

    // The post is applied locally and pending despite the failed send.
    let pending = client.replica().pending();
    assert_eq!(pending.len(), 1);
    assert!(client.replica().post(&pending[0]).is_some());
}

#[test]
fn test_delivery_confirmation_clears_pending() {
    let mut alice = device();
    alice
        .client
        .create_anonymous_delegation(DelegationDuration::SevenDays)
        .unwrap();

    let pending_log = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&pending_log);
    alice
        .client
        .on_pending_changed(move |snapshot| sink.borrow_mut().push(snapshot.len()));

    let post = alice.client.create_post("c1", "Hi", "World").unwrap();
    assert!(alice.client.replica().is_pending(&post.id));
    alice.client.confirm_delivery(&post.id);
    assert!(!alice.client.replica().is_pending(&post.id));
    assert_eq!(*pending_log.borrow(), vec![1, 0]);
}

// =============================================================================
// Scenario: profile updates and identity fan-out
// =============================================================================

#[test]
fn test_profile_update_propagates_display_name() {
    let mut alice = device();
    let mut bob = device();
    let session = alice
        .client
        .create_anonymous_delegation(DelegationDuration::SevenDays)
        .unwrap();

    let identity_events = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&identity_events);
    bob.client
        .on_identity_changed(move |address| sink.borrow_mut().push(address.clone()));

    alice
        .client
        .update_profile(Some("Maverick".into()), DisplayPreference::CallSign)
        .unwrap();
    alice.gossip_to(&mut bob);

    assert_eq!(*identity_events.borrow(), vec![session.clone()]);
    let identity = bob.client.get_identity(&session, false);
    assert_eq!(identity.display_name, "Maverick");
    assert_eq!(identity.verification_status, VerificationStatus::Anonymous);
}

#[test]
fn test_stale_profile_update_does_not_clobber_identity() {
    let mut alice = device();
    let mut bob = device();
    let session = alice
        .client
        .create_anonymous_delegation(DelegationDuration::SevenDays)
        .unwrap();

    alice
        .client
        .update_profile(Some("Ghost".into()), DisplayPreference::CallSign)
        .unwrap();
    alice.clock.advance(1000);
    alice
        .client
        .update_profile(Some("Maverick".into()), DisplayPreference::CallSign)
        .unwrap();

    // Network reordering: the newer update lands first, the stale one after.
    for payload in alice.sent.borrow().iter().rev() {
        bob.client.handle_incoming(payload);
    }

    let identity = bob.client.get_identity(&session, false);
    assert_eq!(identity.call_sign.as_deref(), Some("Maverick"));
    assert_eq!(identity.display_name, "Maverick");
}

// =============================================================================
// Scenario: persistence across restart
// =============================================================================

#[test]
fn test_state_survives_reopen() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let post_id;
    {
        let sender = CapturingSender::default();
        let mut client = OpchanClient::open(
            ClientConfig::new(dir.path()),
            ClientDeps {
                sender: Box::new(sender),
                resolver: Box::new(NoopResolver),
                clock: Arc::new(FixedClock::new(NOW)),
                ids: Arc::new(UuidSource),
            },
        )
        .unwrap();
        client
            .create_anonymous_delegation(DelegationDuration::SevenDays)
            .unwrap();
        let post = client.create_post("c1", "Hi", "World").unwrap();
        client.vote(&post.id, 1).unwrap();
        client.bookmark_post(&post.id).unwrap();
        post_id = post.id.clone();
        client.close();
    }

    let reopened = OpchanClient::open(
        ClientConfig::new(dir.path()),
        ClientDeps {
            sender: Box::new(CapturingSender::default()),
            resolver: Box::new(NoopResolver),
            clock: Arc::new(FixedClock::new(NOW + 1000)),
            ids: Arc::new(UuidSource),
        },
    )
    .unwrap();

    assert!(reopened.replica().post(&post_id).is_some());
    assert_eq!(reopened.replica().votes_for_target(&post_id).len(), 1);
    assert!(reopened
        .replica()
        .bookmark(&opchan::Bookmark::post_id_key(&post_id))
        .is_some());
    assert!(reopened.delegation_status().present);
    assert!(reopened.replica().last_sync_ms().is_some());
}

// =============================================================================
// Scenario: relevance ranking through the facade
// =============================================================================

#[test]
fn test_ranked_posts_respect_votes_and_moderation() {
    let wallet = TestWallet::new();
    let mut owner = device_with_resolver(Box::new(StaticResolver {
        names: vec![(wallet.address(), "owner.eth".to_string())],
    }));
    owner
        .client
        .create_wallet_delegation(&wallet.address(), DelegationDuration::SevenDays, &wallet)
        .unwrap();
    let cell = owner.client.create_cell("general", "talk", None).unwrap();
    let loser = owner.client.create_post(&cell.id, "Meh", "meh").unwrap();
    let winner = owner.client.create_post(&cell.id, "Top", "top").unwrap();

    let mut voter = device();
    voter
        .client
        .create_anonymous_delegation(DelegationDuration::SevenDays)
        .unwrap();
    owner.gossip_to(&mut voter);
    voter.client.vote(&winner.id, 1).unwrap();
    voter.gossip_to(&mut owner);

    let ranked = owner.client.ranked_posts(&cell.id);
    assert_eq!(ranked[0].post.id, winner.id);
    assert_eq!(ranked[0].upvoters.len(), 1);

    // Moderating the winner halves its score; with only one vote between
    // them, the loser takes the lead.
    owner.client.moderate_post(&cell.id, &winner.id, None).unwrap();
    let ranked = owner.client.ranked_posts(&cell.id);
    assert_eq!(ranked[0].post.id, loser.id);
    assert!(ranked[1].moderated);
}
