//! Persistence for the active delegation.
//!
//! The record lives in a single JSON file owned by the delegation manager.
//! It is deliberately separate from the replica's durable store: the
//! replica owns its database exclusively, and the delegation outlives any
//! one replica directory.
//!
//! The secret key is stored in the clear; protecting the file is the host
//! platform's job (disk encryption, file permissions). Clearing the
//! delegation removes the file and zeroizes the in-memory copy.

use crate::delegation::record::DelegationRecord;
use crate::error::{OpchanError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File-backed store for the active delegation record.
#[derive(Debug, Clone)]
pub struct DelegationStore {
    path: PathBuf,
}

impl DelegationStore {
    /// Creates a store rooted at `path`. The file need not exist yet.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Returns the backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the persisted record, if any.
    ///
    /// A corrupt file is treated as absent (with a warning) rather than
    /// wedging startup; the user can simply create a new delegation.
    pub fn load(&self) -> Result<Option<DelegationRecord>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(OpchanError::storage(format!(
                    "Failed to read delegation file: {}",
                    e
                )))
            }
        };

        match serde_json::from_slice::<DelegationRecord>(&bytes) {
            Ok(record) => {
                debug!(author = %record.author, "loaded delegation record");
                Ok(Some(record))
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "unreadable delegation record, ignoring");
                Ok(None)
            }
        }
    }

    /// Persists `record`, replacing any previous one.
    pub fn save(&self, record: &DelegationRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                OpchanError::storage(format!("Failed to create delegation dir: {}", e))
            })?;
        }
        let bytes = serde_json::to_vec_pretty(record)
            .map_err(|e| OpchanError::serialization(format!("Failed to encode delegation: {}", e)))?;
        fs::write(&self.path, bytes)
            .map_err(|e| OpchanError::storage(format!("Failed to write delegation file: {}", e)))?;
        debug!(author = %record.author, "saved delegation record");
        Ok(())
    }

    /// Removes the persisted record. Succeeds when none exists.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(OpchanError::storage(format!(
                "Failed to remove delegation file: {}",
                e
            ))),
        }
    }
}
