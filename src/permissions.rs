//! Pre-send permission matrix.
//!
//! Permissions are enforced when constructing messages, before anything is
//! signed or applied. Ingest deliberately does not re-check them: a
//! malicious peer can gossip a cell created by an unverified author, but
//! such data is harmless and honest replicas never produce it.
//!
//! | Action                | Requirement                                  |
//! |-----------------------|----------------------------------------------|
//! | create cell           | author is ENS-verified                       |
//! | create post/comment   | authenticated (wallet or anonymous)          |
//! | vote                  | authenticated; target exists in the replica  |
//! | moderate / unmoderate | actor is the owner of the named cell         |
//! | profile update        | authenticated                                |

use crate::delegation::DelegationStatus;
use crate::error::{OpchanError, Result};
use crate::identity::{UserIdentity, VerificationStatus};
use crate::message::Message;
use subtle::ConstantTimeEq;

/// Requires a present, unexpired delegation.
pub fn require_authenticated(status: &DelegationStatus) -> Result<()> {
    if !status.present {
        return Err(OpchanError::delegation_missing(
            "Create a delegation before posting",
        ));
    }
    if !status.valid {
        return Err(OpchanError::delegation_expired(
            "The active delegation has expired",
        ));
    }
    Ok(())
}

/// Cell creation is reserved for ENS-verified authors.
pub fn require_cell_creator(identity: &UserIdentity) -> Result<()> {
    if identity.verification_status == VerificationStatus::EnsVerified {
        Ok(())
    } else {
        Err(OpchanError::permission_denied(
            "Only ENS-verified users can create cells",
        ))
    }
}

/// Moderation is reserved for the owner of the cell.
///
/// `cell` is the cell message named by the moderation's `cell_id`; a
/// missing cell denies as well, since ownership cannot be established.
pub fn require_cell_owner(cell: Option<&Message>, actor: &str) -> Result<()> {
    let Some(cell) = cell else {
        return Err(OpchanError::permission_denied(
            "Cannot moderate in an unknown cell",
        ));
    };
    let is_owner: bool = cell.author.as_bytes().ct_eq(actor.as_bytes()).into();
    if is_owner {
        Ok(())
    } else {
        Err(OpchanError::permission_denied(
            "Only the cell owner can moderate it",
        ))
    }
}
