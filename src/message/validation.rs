//! Structural validation of messages.
//!
//! Validation here is purely structural: required fields, length limits,
//! enum domains, timestamp sanity, author shape. Cryptographic checks live
//! in the delegation manager; the replica runs both and records the
//! signature outcome on the same report.

use crate::constants::{
    MAX_BODY_LEN, MAX_CALL_SIGN_LEN, MAX_CELL_DESCRIPTION_LEN, MAX_CELL_ICON_LEN,
    MAX_CELL_NAME_LEN, MAX_CLOCK_SKEW_MS, MAX_MODERATION_REASON_LEN, MAX_TITLE_LEN,
};
use crate::crypto::{is_uuid_v4, is_wallet_address};
use crate::error::{OpchanError, Result};
use crate::message::{DisplayPreference, Message, MessageBody};

/// Outcome of validating one message, suitable for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    /// Fields that are required but absent or empty.
    pub missing_fields: Vec<String>,
    /// Fields present but out of range or malformed.
    pub invalid_fields: Vec<String>,
    /// Set once the cryptographic check has run; `None` when only the
    /// structural pass has happened.
    pub signature_ok: Option<bool>,
    /// Human-readable error descriptions.
    pub errors: Vec<String>,
    /// Non-fatal observations.
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// True when no structural problem was found and the signature check,
    /// if it ran, passed.
    pub fn ok(&self) -> bool {
        self.missing_fields.is_empty()
            && self.invalid_fields.is_empty()
            && self.errors.is_empty()
            && self.signature_ok != Some(false)
    }

    /// Records a required-but-absent field.
    pub fn add_missing(&mut self, field: &str) {
        self.missing_fields.push(field.to_string());
        self.errors.push(format!("Missing field: {}", field));
    }

    /// Records an out-of-range or malformed field.
    pub fn add_invalid(&mut self, field: &str, why: impl Into<String>) {
        self.invalid_fields.push(field.to_string());
        self.errors.push(format!("Invalid {}: {}", field, why.into()));
    }

    /// Records a non-fatal observation.
    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Condenses the report into one diagnostic line.
    pub fn summary(&self) -> String {
        if self.ok() {
            "ok".to_string()
        } else {
            self.errors.join("; ")
        }
    }
}

fn check_required(report: &mut ValidationReport, field: &str, value: &str) {
    if value.is_empty() {
        report.add_missing(field);
    }
}

fn check_len(report: &mut ValidationReport, field: &str, value: &str, max: usize) {
    if value.len() > max {
        report.add_invalid(field, format!("{} bytes exceeds the {} limit", value.len(), max));
    }
}

/// Validates the kind-specific payload limits.
///
/// Used both by the ingress validator and by action builders before
/// signing, so a local author never signs a message peers would reject.
pub fn validate_content(body: &MessageBody) -> Result<()> {
    let mut report = ValidationReport::default();
    check_body(&mut report, body);
    if report.ok() {
        Ok(())
    } else {
        Err(OpchanError::malformed(report.summary()))
    }
}

fn check_body(report: &mut ValidationReport, body: &MessageBody) {
    match body {
        MessageBody::Cell {
            name,
            description,
            icon,
        } => {
            check_required(report, "name", name);
            check_len(report, "name", name, MAX_CELL_NAME_LEN);
            check_len(report, "description", description, MAX_CELL_DESCRIPTION_LEN);
            if let Some(icon) = icon {
                check_len(report, "icon", icon, MAX_CELL_ICON_LEN);
            }
        }
        MessageBody::Post {
            cell_id,
            title,
            body,
        } => {
            check_required(report, "cell_id", cell_id);
            check_required(report, "title", title);
            check_len(report, "title", title, MAX_TITLE_LEN);
            check_required(report, "body", body);
            check_len(report, "body", body, MAX_BODY_LEN);
        }
        MessageBody::Comment { post_id, body } => {
            check_required(report, "post_id", post_id);
            check_required(report, "body", body);
            check_len(report, "body", body, MAX_BODY_LEN);
        }
        MessageBody::Vote { target_id, value } => {
            check_required(report, "target_id", target_id);
            if *value != 1 && *value != -1 {
                report.add_invalid("value", format!("must be +1 or -1, got {}", value));
            }
        }
        MessageBody::Moderate {
            target_id,
            cell_id,
            reason,
            ..
        } => {
            check_required(report, "target_id", target_id);
            check_required(report, "cell_id", cell_id);
            if let Some(reason) = reason {
                check_len(report, "reason", reason, MAX_MODERATION_REASON_LEN);
            }
        }
        MessageBody::ProfileUpdate {
            call_sign,
            display_preference,
        } => {
            if let Some(call_sign) = call_sign {
                check_len(report, "call_sign", call_sign, MAX_CALL_SIGN_LEN);
            }
            let call_sign_empty = call_sign.as_deref().unwrap_or("").is_empty();
            if *display_preference == DisplayPreference::CallSign && call_sign_empty {
                report.add_warning("display_preference is call_sign but no call sign is set");
            }
        }
    }
}

/// Runs the full structural pass over a signed message.
///
/// `now_ms` bounds the author timestamp: zero and far-future timestamps are
/// rejected, mild clock skew is tolerated.
pub fn validate_structure(message: &Message, now_ms: u64) -> ValidationReport {
    let mut report = ValidationReport::default();

    check_required(&mut report, "id", &message.id);
    if !message.id.is_empty() && !is_uuid_v4(&message.id) {
        report.add_warning("message id is not in UUIDv4 form");
    }

    if message.timestamp == 0 {
        report.add_invalid("timestamp", "must be a positive integer");
    } else if message.timestamp > now_ms.saturating_add(MAX_CLOCK_SKEW_MS) {
        report.add_invalid("timestamp", "is in the future beyond allowed clock skew");
    }

    let wallet_author = is_wallet_address(&message.author);
    let anonymous_author = is_uuid_v4(&message.author);
    if message.author.is_empty() {
        report.add_missing("author");
    } else if !wallet_author && !anonymous_author {
        report.add_invalid("author", "must be a 20-byte hex address or a UUIDv4");
    }

    match &message.signature {
        None => report.add_missing("signature"),
        Some(sig) => {
            if sig.len() != 128 || hex::decode(sig).is_err() {
                report.add_invalid("signature", "must be 64 bytes of hex");
            }
        }
    }
    match &message.device_pub_key {
        None => report.add_missing("device_pub_key"),
        Some(pk) => {
            if pk.len() != 64 || hex::decode(pk).is_err() {
                report.add_invalid("device_pub_key", "must be 32 bytes of hex");
            }
        }
    }

    match (&message.delegation_proof, wallet_author, anonymous_author) {
        (None, true, _) => report.add_missing("delegation_proof"),
        (Some(_), _, true) => {
            report.add_invalid("delegation_proof", "anonymous authors cannot carry one")
        }
        (Some(proof), true, _) => {
            check_required(&mut report, "delegation_proof.auth_message", &proof.auth_message);
            check_required(
                &mut report,
                "delegation_proof.wallet_signature",
                &proof.wallet_signature,
            );
            if !is_wallet_address(&proof.wallet_address) {
                report.add_invalid(
                    "delegation_proof.wallet_address",
                    "must be a 20-byte hex address",
                );
            }
        }
        _ => {}
    }

    check_body(&mut report, &message.body);
    report
}
