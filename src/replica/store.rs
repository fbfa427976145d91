//! Durable storage for the replica.
//!
//! One RocksDB database with a column family per logical collection. The
//! store is owned exclusively by the replica; nothing else writes to it.
//!
//! ## Layout
//!
//! - `cells`, `posts`, `comments`, `profiles`: message id → wire JSON bytes
//! - `votes`: `{target_id}:{author}` → wire JSON bytes (latest vote wins)
//! - `moderations`: `{cell_id}:{target_kind}:{target_id}` → wire JSON bytes
//! - `identities`: address → bincode `UserIdentity`
//! - `bookmarks`, `following`: id → bincode local record
//! - `meta`: engine metadata (`last_sync_ms`)
//!
//! Messages are stored as their signed wire encoding, byte-identical to
//! what peers verify; device-local records use bincode. `open()` surfaces
//! every previously accepted message; after a crash the store holds a
//! prefix of the accepted stream, which hydration replays as-is.

use crate::error::{OpchanError, Result};
use crate::message::{decode_wire, encode_wire, Message};
use rocksdb::{ColumnFamilyDescriptor, DBWithThreadMode, MultiThreaded, Options};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Column family names, one per collection.
pub const CF_CELLS: &str = "cells";
pub const CF_POSTS: &str = "posts";
pub const CF_COMMENTS: &str = "comments";
pub const CF_VOTES: &str = "votes";
pub const CF_MODERATIONS: &str = "moderations";
pub const CF_PROFILES: &str = "profiles";
pub const CF_IDENTITIES: &str = "identities";
pub const CF_BOOKMARKS: &str = "bookmarks";
pub const CF_FOLLOWING: &str = "following";
pub const CF_META: &str = "meta";

const ALL_CFS: [&str; 10] = [
    CF_CELLS,
    CF_POSTS,
    CF_COMMENTS,
    CF_VOTES,
    CF_MODERATIONS,
    CF_PROFILES,
    CF_IDENTITIES,
    CF_BOOKMARKS,
    CF_FOLLOWING,
    CF_META,
];

/// Key for the sync watermark in the meta column family.
const META_LAST_SYNC: &[u8] = b"last_sync_ms";

/// RocksDB tuning for the replica store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum number of open files.
    pub max_open_files: i32,
    /// Number of log files to keep.
    pub keep_log_file_num: usize,
    /// Write buffer size in bytes.
    pub write_buffer_size: usize,
    /// Maximum WAL size in bytes.
    pub max_wal_size: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_open_files: 128,
            keep_log_file_num: 2,
            write_buffer_size: 16 * 1024 * 1024, // 16MB
            max_wal_size: 32 * 1024 * 1024,      // 32MB
        }
    }
}

impl StoreConfig {
    /// Builds RocksDB Options from this configuration.
    fn build_options(&self) -> Options {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_max_open_files(self.max_open_files);
        opts.set_keep_log_file_num(self.keep_log_file_num);
        opts.set_write_buffer_size(self.write_buffer_size);
        opts.set_max_total_wal_size(self.max_wal_size);
        opts.increase_parallelism(num_cpus::get() as i32);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }
}

/// Builds a composite key from parts, colon-separated.
pub fn composite_key(parts: &[&str]) -> Vec<u8> {
    parts.join(":").into_bytes()
}

/// The replica's durable key-value store.
pub struct ReplicaStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
}

impl ReplicaStore {
    /// Opens (or creates) the store at `path` with all column families.
    pub fn open(path: impl AsRef<Path>, config: &StoreConfig) -> Result<Self> {
        let opts = config.build_options();
        let cf_opts = Options::default();
        let descriptors: Vec<_> = ALL_CFS
            .iter()
            .map(|cf| ColumnFamilyDescriptor::new(*cf, cf_opts.clone()))
            .collect();

        let db = DBWithThreadMode::<MultiThreaded>::open_cf_descriptors(
            &opts,
            path.as_ref(),
            descriptors,
        )
        .map_err(|e| OpchanError::storage(format!("Failed to open replica store: {}", e)))?;

        debug!(path = %path.as_ref().display(), "opened replica store");
        Ok(Self { db: Arc::new(db) })
    }

    fn cf(&self, name: &str) -> Result<Arc<rocksdb::BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| OpchanError::storage(format!("Column family '{}' not found", name)))
    }

    /// Stores a message under `key` in `cf_name` as wire JSON bytes.
    pub fn put_message(&self, cf_name: &str, key: &[u8], message: &Message) -> Result<()> {
        let bytes = encode_wire(message)?;
        let cf = self.cf(cf_name)?;
        self.db
            .put_cf(&cf, key, &bytes)
            .map_err(|e| OpchanError::storage(format!("Failed to write message: {}", e)))
    }

    /// Loads every message in `cf_name`.
    ///
    /// Undecodable rows are skipped with a warning instead of failing
    /// hydration wholesale.
    pub fn load_messages(&self, cf_name: &str) -> Result<Vec<Message>> {
        let cf = self.cf(cf_name)?;
        let mut messages = Vec::new();
        let mut skipped = 0usize;
        for item in self.db.iterator_cf(&cf, rocksdb::IteratorMode::Start) {
            match item {
                Ok((_, value)) => match decode_wire(&value) {
                    Ok(message) => messages.push(message),
                    Err(e) => {
                        skipped += 1;
                        warn!(cf = cf_name, error = %e, "skipping undecodable stored message");
                    }
                },
                Err(e) => {
                    return Err(OpchanError::storage(format!("Iterator error: {}", e)));
                }
            }
        }
        debug!(
            cf = cf_name,
            loaded = messages.len(),
            skipped = skipped,
            "hydrated message collection"
        );
        Ok(messages)
    }

    /// Stores a bincode-encoded local record.
    pub fn put_record<T: Serialize>(&self, cf_name: &str, key: &[u8], value: &T) -> Result<()> {
        let bytes = bincode::serialize(value)
            .map_err(|e| OpchanError::serialization(format!("Failed to encode record: {}", e)))?;
        let cf = self.cf(cf_name)?;
        self.db
            .put_cf(&cf, key, &bytes)
            .map_err(|e| OpchanError::storage(format!("Failed to write record: {}", e)))
    }

    /// Loads every bincode-encoded record in `cf_name`.
    pub fn load_records<T: DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut records = Vec::new();
        for item in self.db.iterator_cf(&cf, rocksdb::IteratorMode::Start) {
            match item {
                Ok((_, value)) => match bincode::deserialize(&value) {
                    Ok(record) => records.push(record),
                    Err(e) => {
                        warn!(cf = cf_name, error = %e, "skipping undecodable stored record");
                    }
                },
                Err(e) => {
                    return Err(OpchanError::storage(format!("Iterator error: {}", e)));
                }
            }
        }
        Ok(records)
    }

    /// Deletes a key.
    pub fn delete(&self, cf_name: &str, key: &[u8]) -> Result<()> {
        let cf = self.cf(cf_name)?;
        self.db
            .delete_cf(&cf, key)
            .map_err(|e| OpchanError::storage(format!("Failed to delete: {}", e)))
    }

    /// Persists the sync watermark.
    pub fn put_last_sync_ms(&self, last_sync_ms: u64) -> Result<()> {
        let cf = self.cf(CF_META)?;
        self.db
            .put_cf(&cf, META_LAST_SYNC, last_sync_ms.to_be_bytes())
            .map_err(|e| OpchanError::storage(format!("Failed to write meta: {}", e)))
    }

    /// Loads the sync watermark, if one was ever recorded.
    pub fn last_sync_ms(&self) -> Result<Option<u64>> {
        let cf = self.cf(CF_META)?;
        match self.db.get_cf(&cf, META_LAST_SYNC) {
            Ok(Some(bytes)) => {
                let arr: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| OpchanError::storage("Corrupt last_sync_ms value"))?;
                Ok(Some(u64::from_be_bytes(arr)))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(OpchanError::storage(format!("Failed to read meta: {}", e))),
        }
    }
}

impl std::fmt::Debug for ReplicaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicaStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageBody;
    use tempfile::TempDir;

    fn open_store() -> (ReplicaStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = ReplicaStore::open(dir.path().join("db"), &StoreConfig::default()).unwrap();
        (store, dir)
    }

    fn post(id: &str) -> Message {
        Message::unsigned(
            id,
            1000,
            "8f14e45f-ceea-467f-9a34-0a0f8e9d2c1b",
            MessageBody::Post {
                cell_id: "c1".into(),
                title: "T".into(),
                body: "B".into(),
            },
        )
    }

    #[test]
    fn test_message_roundtrip() {
        let (store, _dir) = open_store();
        let message = post("p1");
        store
            .put_message(CF_POSTS, message.id.as_bytes(), &message)
            .unwrap();

        let loaded = store.load_messages(CF_POSTS).unwrap();
        assert_eq!(loaded, vec![message]);
    }

    #[test]
    fn test_composite_key() {
        assert_eq!(composite_key(&["a", "b", "c"]), b"a:b:c".to_vec());
    }

    #[test]
    fn test_record_roundtrip_and_delete() {
        let (store, _dir) = open_store();
        store
            .put_record(CF_META, b"k", &("value".to_string(), 7u64))
            .unwrap();
        let records: Vec<(String, u64)> = store.load_records(CF_META).unwrap();
        assert_eq!(records, vec![("value".to_string(), 7)]);

        store.delete(CF_META, b"k").unwrap();
        let records: Vec<(String, u64)> = store.load_records(CF_META).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_last_sync_watermark() {
        let (store, _dir) = open_store();
        assert_eq!(store.last_sync_ms().unwrap(), None);
        store.put_last_sync_ms(12345).unwrap();
        assert_eq!(store.last_sync_ms().unwrap(), Some(12345));
    }

    #[test]
    fn test_reopen_surfaces_previous_messages() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");
        {
            let store = ReplicaStore::open(&path, &StoreConfig::default()).unwrap();
            store.put_message(CF_POSTS, b"p1", &post("p1")).unwrap();
        }
        let store = ReplicaStore::open(&path, &StoreConfig::default()).unwrap();
        assert_eq!(store.load_messages(CF_POSTS).unwrap().len(), 1);
    }
}
