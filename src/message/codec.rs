//! Canonical message encoding.
//!
//! The bytes a device key signs must be identical on every replica, so the
//! signing payload is pinned to one concrete form. This is an
//! interoperability constant; changing any rule below forks the network.
//!
//! ## Canonical form
//!
//! - JSON, UTF-8, no whitespace between tokens.
//! - Object keys in lexicographic (byte) order at every nesting level.
//! - Integers in plain decimal; no floating-point values exist in messages.
//! - `signature`, `device_pub_key`, and `delegation_proof` set to `null`
//!   regardless of their values on the signed message.
//!
//! The wire form is the same JSON with the signature fields populated.
//! Duplicates and reordering on the wire are harmless: verification always
//! recomputes the canonical payload from the decoded message.

use crate::error::{OpchanError, Result};
use crate::message::Message;
use serde_json::Value;

/// Envelope fields logically deleted from the signed form.
const SIGNATURE_FIELDS: [&str; 3] = ["signature", "device_pub_key", "delegation_proof"];

/// Produces the exact bytes that are signed and verified for `message`.
///
/// The message's own signature fields are ignored; the output is identical
/// for a message before and after signing.
pub fn canonical_signing_payload(message: &Message) -> Result<Vec<u8>> {
    let mut value = serde_json::to_value(message)
        .map_err(|e| OpchanError::serialization(format!("Failed to encode message: {}", e)))?;

    let Value::Object(ref mut map) = value else {
        return Err(OpchanError::serialization(
            "Message did not encode as a JSON object",
        ));
    };
    for field in SIGNATURE_FIELDS {
        map.insert(field.to_string(), Value::Null);
    }

    // serde_json's Map is a BTreeMap, so emitting the Value directly yields
    // lexicographic key order with compact separators.
    serde_json::to_vec(&value)
        .map_err(|e| OpchanError::serialization(format!("Failed to encode payload: {}", e)))
}

/// Encodes a message for the wire (signature fields included as-is).
pub fn encode_wire(message: &Message) -> Result<Vec<u8>> {
    let value = serde_json::to_value(message)
        .map_err(|e| OpchanError::serialization(format!("Failed to encode message: {}", e)))?;
    serde_json::to_vec(&value)
        .map_err(|e| OpchanError::serialization(format!("Failed to encode message: {}", e)))
}

/// Decodes a message from wire bytes.
pub fn decode_wire(bytes: &[u8]) -> Result<Message> {
    serde_json::from_slice(bytes)
        .map_err(|e| OpchanError::malformed(format!("Undecodable message payload: {}", e)))
}
