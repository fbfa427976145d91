//! Identity resolution and display derivation.
//!
//! Addresses on the wire are opaque; what readers see is a `UserIdentity`:
//! resolved name, avatar, self-chosen call sign, and a verification tier.
//! Resolution goes through an injected name-lookup capability (an ENS
//! resolver in production) and is cached with a freshness window. A failed
//! lookup degrades to whatever is cached; staleness is informational and
//! never a correctness input.

use crate::constants::{address_short, IDENTITY_FRESHNESS_MS};
use crate::crypto::is_uuid_v4;
use crate::error::Result;
use crate::message::DisplayPreference;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Verification tier of an author, computed on read and never stored on
/// messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    /// UUID session author.
    Anonymous,
    /// Known wallet address with no observed delegation.
    WalletUnconnected,
    /// Wallet address that signs through a delegation.
    WalletConnected,
    /// Wallet address with a resolved primary name.
    EnsVerified,
}

/// A resolved primary name from the injected lookup capability.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedName {
    pub name: String,
    pub avatar: Option<String>,
}

/// Injected name-lookup capability. Resolution may be slow or fail; the
/// engine treats failure as "no answer right now", not as an error state.
pub trait NameResolver {
    /// Returns the primary name for `address`, or `None` when it has none.
    fn resolve(&self, address: &str) -> Result<Option<ResolvedName>>;
}

/// A resolver for deployments without name lookup; every address resolves
/// to nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopResolver;

impl NameResolver for NoopResolver {
    fn resolve(&self, _address: &str) -> Result<Option<ResolvedName>> {
        Ok(None)
    }
}

/// Display identity of one author.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub address: String,
    pub ens_name: Option<String>,
    pub ens_avatar: Option<String>,
    pub call_sign: Option<String>,
    pub display_preference: DisplayPreference,
    pub display_name: String,
    pub verification_status: VerificationStatus,
    /// When the resolver last refreshed this entry.
    pub last_updated_ms: u64,
}

impl UserIdentity {
    fn address_only(address: &str, status: VerificationStatus) -> Self {
        Self {
            address: address.to_string(),
            ens_name: None,
            ens_avatar: None,
            call_sign: None,
            display_preference: DisplayPreference::default(),
            display_name: address_short(address),
            verification_status: status,
            last_updated_ms: 0,
        }
    }
}

/// Derives the display name: call sign when preferred and set, else the
/// resolved name, else the shortened address.
pub fn derive_display_name(
    address: &str,
    ens_name: Option<&str>,
    call_sign: Option<&str>,
    preference: DisplayPreference,
) -> String {
    if preference == DisplayPreference::CallSign {
        if let Some(call_sign) = call_sign.filter(|c| !c.is_empty()) {
            return call_sign.to_string();
        }
    }
    if let Some(name) = ens_name.filter(|n| !n.is_empty()) {
        return name.to_string();
    }
    address_short(address)
}

/// Caching identity resolver.
pub struct IdentityResolver {
    resolver: Box<dyn NameResolver>,
    cache: HashMap<String, UserIdentity>,
    /// Addresses observed signing through a delegation; lifts the tier from
    /// `WalletUnconnected` to `WalletConnected`.
    delegated: HashSet<String>,
}

impl IdentityResolver {
    pub fn new(resolver: Box<dyn NameResolver>) -> Self {
        Self {
            resolver,
            cache: HashMap::new(),
            delegated: HashSet::new(),
        }
    }

    /// Seeds the cache from persisted identities (replica hydration).
    pub fn seed(&mut self, identities: impl IntoIterator<Item = UserIdentity>) {
        for identity in identities {
            self.sync(identity);
        }
    }

    /// Replaces the cached entry for an address with the replica's merged
    /// record. The replica resolves competing profile updates by their
    /// `(timestamp, id)` watermark, so its record wins over whatever order
    /// the underlying messages arrived in.
    pub fn sync(&mut self, identity: UserIdentity) {
        if matches!(
            identity.verification_status,
            VerificationStatus::WalletConnected | VerificationStatus::EnsVerified
        ) {
            self.delegated.insert(identity.address.clone());
        }
        self.cache.insert(identity.address.clone(), identity);
    }

    /// Records that `address` signs through a delegation.
    pub fn mark_delegated(&mut self, address: &str) {
        if self.delegated.insert(address.to_string()) {
            if let Some(identity) = self.cache.get_mut(address) {
                if identity.verification_status == VerificationStatus::WalletUnconnected {
                    identity.verification_status = VerificationStatus::WalletConnected;
                }
            }
        }
    }

    fn base_status(&self, address: &str) -> VerificationStatus {
        if is_uuid_v4(address) {
            VerificationStatus::Anonymous
        } else if self.delegated.contains(address) {
            VerificationStatus::WalletConnected
        } else {
            VerificationStatus::WalletUnconnected
        }
    }

    /// Returns the identity for `address`.
    ///
    /// Anonymous (UUID) authors bypass name lookup entirely. Wallet authors
    /// are served from cache inside the freshness window unless `fresh` is
    /// set; otherwise the resolver refreshes and the cache is updated. A
    /// lookup failure returns the cached (possibly address-only) identity.
    pub fn get(&mut self, address: &str, fresh: bool, now_ms: u64) -> UserIdentity {
        if is_uuid_v4(address) {
            return self
                .cache
                .entry(address.to_string())
                .or_insert_with(|| {
                    UserIdentity::address_only(address, VerificationStatus::Anonymous)
                })
                .clone();
        }

        let cached_fresh = self.cache.get(address).is_some_and(|identity| {
            now_ms.saturating_sub(identity.last_updated_ms) < IDENTITY_FRESHNESS_MS
        });
        if cached_fresh && !fresh {
            return self.cache[address].clone();
        }

        match self.resolver.resolve(address) {
            Ok(resolved) => {
                let mut identity = self
                    .cache
                    .remove(address)
                    .unwrap_or_else(|| UserIdentity::address_only(address, self.base_status(address)));
                match resolved {
                    Some(ResolvedName { name, avatar }) => {
                        identity.ens_name = Some(name);
                        identity.ens_avatar = avatar;
                        identity.verification_status = VerificationStatus::EnsVerified;
                    }
                    None => {
                        identity.ens_name = None;
                        identity.ens_avatar = None;
                        identity.verification_status = self.base_status(address);
                    }
                }
                identity.last_updated_ms = now_ms;
                identity.display_name = derive_display_name(
                    address,
                    identity.ens_name.as_deref(),
                    identity.call_sign.as_deref(),
                    identity.display_preference,
                );
                debug!(address, status = ?identity.verification_status, "refreshed identity");
                self.cache.insert(address.to_string(), identity.clone());
                identity
            }
            Err(e) => {
                warn!(address, error = %e, "name lookup failed, serving cached identity");
                self.cache
                    .get(address)
                    .cloned()
                    .unwrap_or_else(|| UserIdentity::address_only(address, self.base_status(address)))
            }
        }
    }

    /// Verification tier of `address` without forcing a refresh. Used by
    /// the relevance scorer and the permission matrix.
    pub fn verification_of(&self, address: &str) -> VerificationStatus {
        self.cache
            .get(address)
            .map(|identity| identity.verification_status)
            .unwrap_or_else(|| self.base_status(address))
    }

    /// Snapshot of every cached identity.
    pub fn cached(&self) -> impl Iterator<Item = &UserIdentity> {
        self.cache.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    const WALLET: &str = "0x1234567890abcdef1234567890abcdef12345678";
    const ANON: &str = "8f14e45f-ceea-467f-9a34-0a0f8e9d2c1b";

    /// Scripted resolver: answers from a map and counts lookups.
    struct ScriptedResolver {
        names: HashMap<String, String>,
        calls: std::rc::Rc<RefCell<usize>>,
        fail: bool,
    }

    impl ScriptedResolver {
        fn with(names: &[(&str, &str)]) -> Self {
            Self {
                names: names
                    .iter()
                    .map(|(a, n)| (a.to_string(), n.to_string()))
                    .collect(),
                calls: std::rc::Rc::new(RefCell::new(0)),
                fail: false,
            }
        }
    }

    impl NameResolver for ScriptedResolver {
        fn resolve(&self, address: &str) -> Result<Option<ResolvedName>> {
            *self.calls.borrow_mut() += 1;
            if self.fail {
                return Err(crate::error::OpchanError::resolution("network down"));
            }
            Ok(self.names.get(address).map(|name| ResolvedName {
                name: name.clone(),
                avatar: None,
            }))
        }
    }

    #[test]
    fn test_anonymous_bypasses_lookup() {
        let mut resolver = IdentityResolver::new(Box::new(ScriptedResolver::with(&[])));
        let identity = resolver.get(ANON, true, 0);
        assert_eq!(identity.verification_status, VerificationStatus::Anonymous);
        assert_eq!(identity.display_name, "8f14e4…2c1b");
    }

    #[test]
    fn test_ens_verified_resolution() {
        let mut resolver =
            IdentityResolver::new(Box::new(ScriptedResolver::with(&[(WALLET, "alice.eth")])));
        let identity = resolver.get(WALLET, false, 1000);
        assert_eq!(identity.verification_status, VerificationStatus::EnsVerified);
        assert_eq!(identity.ens_name.as_deref(), Some("alice.eth"));
        assert_eq!(identity.display_name, "alice.eth");
    }

    #[test]
    fn test_cache_serves_within_freshness_window() {
        let script = ScriptedResolver::with(&[(WALLET, "alice.eth")]);
        let calls = std::rc::Rc::clone(&script.calls);
        let mut resolver = IdentityResolver::new(Box::new(script));

        resolver.get(WALLET, false, 1000);
        resolver.get(WALLET, false, 1000 + IDENTITY_FRESHNESS_MS - 1);
        assert_eq!(*calls.borrow(), 1, "fresh cache entry skips the lookup");

        // Past the window triggers a refresh; `fresh` forces one too.
        resolver.get(WALLET, false, 1000 + IDENTITY_FRESHNESS_MS + 1);
        assert_eq!(*calls.borrow(), 2);
        resolver.get(WALLET, true, 1000 + IDENTITY_FRESHNESS_MS + 2);
        assert_eq!(*calls.borrow(), 3);
    }

    #[test]
    fn test_lookup_failure_returns_cached() {
        let mut script = ScriptedResolver::with(&[(WALLET, "alice.eth")]);
        let mut resolver = IdentityResolver::new(Box::new(ScriptedResolver::with(&[(
            WALLET, "alice.eth",
        )])));
        let first = resolver.get(WALLET, false, 1000);
        assert_eq!(first.verification_status, VerificationStatus::EnsVerified);

        script.fail = true;
        let mut failing = IdentityResolver::new(Box::new(script));
        failing.seed([first.clone()]);
        let served = failing.get(WALLET, true, 2000);
        assert_eq!(served, first, "failure degrades to the cached identity");
    }

    #[test]
    fn test_wallet_tiers() {
        let mut resolver = IdentityResolver::new(Box::new(ScriptedResolver::with(&[])));
        assert_eq!(
            resolver.verification_of(WALLET),
            VerificationStatus::WalletUnconnected
        );
        resolver.mark_delegated(WALLET);
        assert_eq!(
            resolver.verification_of(WALLET),
            VerificationStatus::WalletConnected
        );
    }

    #[test]
    fn test_display_name_derivation() {
        assert_eq!(
            derive_display_name(WALLET, Some("alice.eth"), Some("Maverick"), DisplayPreference::CallSign),
            "Maverick"
        );
        assert_eq!(
            derive_display_name(WALLET, Some("alice.eth"), Some("Maverick"), DisplayPreference::Address),
            "alice.eth"
        );
        assert_eq!(
            derive_display_name(WALLET, None, None, DisplayPreference::CallSign),
            "0x1234…5678"
        );
    }

    #[test]
    fn test_sync_replaces_cached_entry() {
        let mut resolver = IdentityResolver::new(Box::new(ScriptedResolver::with(&[])));
        resolver.sync(UserIdentity {
            address: WALLET.into(),
            ens_name: None,
            ens_avatar: None,
            call_sign: Some("Maverick".into()),
            display_preference: DisplayPreference::CallSign,
            display_name: "Maverick".into(),
            verification_status: VerificationStatus::WalletConnected,
            last_updated_ms: 500,
        });
        assert_eq!(
            resolver.get(WALLET, false, 500).call_sign.as_deref(),
            Some("Maverick")
        );
        assert_eq!(
            resolver.verification_of(WALLET),
            VerificationStatus::WalletConnected
        );
    }
}
