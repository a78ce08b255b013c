//! OpenVolume key-value store contract
//!
//! Everything cluster-wide in OpenVolume is persisted through the small
//! [`Kvdb`] contract defined here. The store itself is assumed reliable;
//! consumers only rely on get/put and on [`KvError::KeyNotFound`] being
//! reported for absent keys.
//!
//! Two implementations are provided:
//!
//! - [`MemKvdb`]: process-local, for tests and single-node setups
//! - [`RedbKvdb`]: single-file persistent store built on redb

mod entry;
pub mod error;
pub mod mem;
pub mod redb_store;

pub use error::{KvError, KvResult};
pub use mem::MemKvdb;
pub use redb_store::RedbKvdb;

use openvolume_common::config::{KvdbBackend, KvdbConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// A key with its value and the store-wide index of its last modification
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KvPair {
    pub key: String,
    pub value: Vec<u8>,
    pub modified_index: u64,
}

/// Minimal key-value store contract
pub trait Kvdb: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &str;

    /// Fetch a key. Absent or expired keys fail with [`KvError::KeyNotFound`].
    fn get(&self, key: &str) -> KvResult<KvPair>;

    /// Unconditionally store a value. A TTL makes the key expire.
    fn put(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> KvResult<KvPair>;

    /// Store a value only if the key does not exist yet
    fn create(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> KvResult<KvPair>;

    /// Remove a key, returning its last value
    fn delete(&self, key: &str) -> KvResult<KvPair>;

    /// All live keys under `prefix`, sorted by key
    fn enumerate(&self, prefix: &str) -> KvResult<Vec<KvPair>>;

    /// Store a value only if the key's modification index equals
    /// `prev_index`; `None` requires the key to be absent.
    fn compare_and_set(
        &self,
        key: &str,
        value: &[u8],
        prev_index: Option<u64>,
    ) -> KvResult<KvPair>;
}

/// Build the store selected by configuration
pub fn open_kvdb(config: &KvdbConfig) -> KvResult<Arc<dyn Kvdb>> {
    match config.backend {
        KvdbBackend::Memory => {
            info!("Using in-memory kvdb; state is lost on exit");
            Ok(Arc::new(MemKvdb::new()))
        }
        KvdbBackend::Redb => {
            info!("Using redb kvdb at {}", config.path.display());
            Ok(Arc::new(RedbKvdb::open(&config.path)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_memory_backend() {
        let config = KvdbConfig {
            backend: KvdbBackend::Memory,
            ..KvdbConfig::default()
        };
        let kv = open_kvdb(&config).unwrap();
        assert_eq!(kv.name(), "memory");
    }

    #[test]
    fn test_open_redb_backend() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = KvdbConfig {
            backend: KvdbBackend::Redb,
            path: dir.path().join("nested").join("kv.redb"),
        };
        let kv = open_kvdb(&config).unwrap();
        assert_eq!(kv.name(), "redb");
        kv.put("a", b"b", None).unwrap();
    }
}
