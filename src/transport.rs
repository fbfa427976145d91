//! Transport adapter.
//!
//! The engine does not implement the pub/sub network; it talks to an
//! injected [`MessageSender`] and is fed incoming payloads by the host.
//! The adapter owns the listener registries for receive, health, and
//! sync-phase events, and serializes outgoing messages to their wire form.
//!
//! Delivery is at-least-once: duplicates on the channel are absorbed by the
//! replica's dedup, so the adapter never needs to track what was seen.

use crate::error::{OpchanError, Result};
use crate::events::{ListenerRegistry, SubscriptionId};
use crate::message::{encode_wire, Message};
use tracing::{debug, warn};

/// Phase reported by the underlying transport while it catches up with the
/// channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Backfilling history from peers.
    Syncing,
    /// Live; new messages arrive as they are published.
    Synced,
}

/// Injected send capability over the external pub/sub.
pub trait MessageSender {
    /// Publishes one encoded message payload. Fire-and-report: no reply is
    /// required for correctness.
    fn send(&self, payload: &[u8]) -> Result<()>;

    /// Whether the transport believes it can currently publish.
    fn is_ready(&self) -> bool;
}

/// A sender for tests and offline operation; records nothing, accepts
/// everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSender;

impl MessageSender for NullSender {
    fn send(&self, _payload: &[u8]) -> Result<()> {
        Ok(())
    }

    fn is_ready(&self) -> bool {
        true
    }
}

/// Bridges the engine to the external pub/sub.
pub struct TransportAdapter {
    sender: Box<dyn MessageSender>,
    receive_listeners: ListenerRegistry<Vec<u8>>,
    health_listeners: ListenerRegistry<bool>,
    sync_listeners: ListenerRegistry<SyncPhase>,
    healthy: bool,
}

impl TransportAdapter {
    pub fn new(sender: Box<dyn MessageSender>) -> Self {
        Self {
            sender,
            receive_listeners: ListenerRegistry::new(),
            health_listeners: ListenerRegistry::new(),
            sync_listeners: ListenerRegistry::new(),
            healthy: false,
        }
    }

    /// Whether the underlying transport reports readiness.
    pub fn is_ready(&self) -> bool {
        self.sender.is_ready()
    }

    /// Last health value pushed by the host.
    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    /// Encodes and publishes a signed message.
    pub fn send(&self, message: &Message) -> Result<()> {
        if message.signature.is_none() {
            return Err(OpchanError::invalid_input(
                "Refusing to publish an unsigned message",
            ));
        }
        let payload = encode_wire(message)?;
        match self.sender.send(&payload) {
            Ok(()) => {
                debug!(id = %message.id, kind = %message.kind(), bytes = payload.len(), "published message");
                Ok(())
            }
            Err(e) => {
                warn!(id = %message.id, error = %e, "transport send failed");
                Err(OpchanError::transport(e.to_string()))
            }
        }
    }

    /// Registers a sink for raw incoming payloads.
    pub fn on_receive(&mut self, listener: impl FnMut(&Vec<u8>) + 'static) -> SubscriptionId {
        self.receive_listeners.subscribe(listener)
    }

    /// Registers a liveness sink.
    pub fn on_health(&mut self, listener: impl FnMut(&bool) + 'static) -> SubscriptionId {
        self.health_listeners.subscribe(listener)
    }

    /// Registers a sync-phase sink.
    pub fn on_sync(&mut self, listener: impl FnMut(&SyncPhase) + 'static) -> SubscriptionId {
        self.sync_listeners.subscribe(listener)
    }

    pub fn unsubscribe_receive(&mut self, subscription: SubscriptionId) -> bool {
        self.receive_listeners.unsubscribe(subscription)
    }

    pub fn unsubscribe_health(&mut self, subscription: SubscriptionId) -> bool {
        self.health_listeners.unsubscribe(subscription)
    }

    pub fn unsubscribe_sync(&mut self, subscription: SubscriptionId) -> bool {
        self.sync_listeners.unsubscribe(subscription)
    }

    /// Called by the host when a payload arrives from the channel.
    pub fn notify_received(&mut self, payload: Vec<u8>) {
        self.receive_listeners.emit(&payload);
    }

    /// Called by the host when transport liveness changes.
    pub fn set_health(&mut self, healthy: bool) {
        self.healthy = healthy;
        self.health_listeners.emit(&healthy);
    }

    /// Called by the host on sync-phase transitions.
    pub fn set_sync_phase(&mut self, phase: SyncPhase) {
        self.sync_listeners.emit(&phase);
    }
}

impl std::fmt::Debug for TransportAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportAdapter")
            .field("healthy", &self.healthy)
            .field("receive_listeners", &self.receive_listeners.len())
            .finish()
    }
}
