//! Persistent key-value store backed by redb.
//!
//! Entries are bincode-encoded [`StoredEntry`] values. Every write runs in
//! its own write transaction, which also bumps the store-wide modification
//! index kept in the meta table.

use crate::entry::{self, Mutation, Op, StoredEntry};
use crate::error::{KvError, KvResult};
use crate::{KvPair, Kvdb};

use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error};

const ENTRIES: TableDefinition<&str, &[u8]> = TableDefinition::new("entries");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");
const LAST_INDEX: &str = "last_index";

/// redb-backed [`Kvdb`]
pub struct RedbKvdb {
    db: Database,
}

impl RedbKvdb {
    /// Open (or create) the redb database at the given path.
    pub fn open(path: impl AsRef<Path>) -> KvResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Create all tables eagerly so later read txns don't fail
        let write_txn = db.begin_write()?;
        {
            let _t = write_txn.open_table(ENTRIES)?;
            let _t = write_txn.open_table(META)?;
        }
        write_txn.commit()?;

        debug!(path = %path.display(), "opened redb kvdb");
        Ok(Self { db })
    }

    fn apply(&self, key: &str, op: Op<'_>) -> KvResult<KvPair> {
        let now = entry::now_ms();
        let write_txn = self.db.begin_write()?;
        let pair = {
            let mut meta = write_txn.open_table(META)?;
            let last_index = meta.get(LAST_INDEX)?.map_or(0, |g| g.value());

            let mut table = write_txn.open_table(ENTRIES)?;
            let current = match table.get(key)?.map(|g| g.value().to_vec()) {
                Some(bytes) => Some(bincode::deserialize::<StoredEntry>(&bytes)?),
                None => None,
            }
            .filter(|e| !e.is_expired(now));

            let mutation = entry::plan(key, op, current.as_ref(), last_index + 1, now)?;
            let pair = mutation.result(key);
            match mutation {
                Mutation::Insert(e) => {
                    let bytes = bincode::serialize(&e)?;
                    table.insert(key, bytes.as_slice())?;
                    meta.insert(LAST_INDEX, e.modified_index)?;
                }
                Mutation::Remove(_) => {
                    table.remove(key)?;
                }
            }
            pair
        };
        write_txn.commit()?;
        Ok(pair)
    }
}

impl Kvdb for RedbKvdb {
    fn name(&self) -> &str {
        "redb"
    }

    fn get(&self, key: &str) -> KvResult<KvPair> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ENTRIES)?;
        let stored = match table.get(key)? {
            Some(guard) => bincode::deserialize::<StoredEntry>(guard.value())?,
            None => return Err(KvError::KeyNotFound(key.to_string())),
        };
        if stored.is_expired(entry::now_ms()) {
            return Err(KvError::KeyNotFound(key.to_string()));
        }
        Ok(stored.to_pair(key))
    }

    fn put(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> KvResult<KvPair> {
        self.apply(key, Op::Put { value, ttl })
    }

    fn create(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> KvResult<KvPair> {
        self.apply(key, Op::Create { value, ttl })
    }

    fn delete(&self, key: &str) -> KvResult<KvPair> {
        self.apply(key, Op::Delete)
    }

    fn enumerate(&self, prefix: &str) -> KvResult<Vec<KvPair>> {
        let now = entry::now_ms();
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ENTRIES)?;
        let mut result = Vec::new();
        for item in table.range(prefix..)? {
            let (k, v) = item?;
            let key = k.value();
            if !key.starts_with(prefix) {
                break;
            }
            let entry = bincode::deserialize::<StoredEntry>(v.value()).map_err(|e| {
                error!("Failed to decode entry '{}': {}", key, e);
                KvError::from(e)
            })?;
            if !entry.is_expired(now) {
                result.push(entry.to_pair(key));
            }
        }
        Ok(result)
    }

    fn compare_and_set(
        &self,
        key: &str,
        value: &[u8],
        prev_index: Option<u64>,
    ) -> KvResult<KvPair> {
        self.apply(key, Op::CompareAndSet { value, prev_index })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open() -> (TempDir, RedbKvdb) {
        let dir = TempDir::new().unwrap();
        let kv = RedbKvdb::open(dir.path().join("kv.redb")).unwrap();
        (dir, kv)
    }

    #[test]
    fn test_missing_key() {
        let (_dir, kv) = open();
        assert!(kv.get("nope").unwrap_err().is_key_not_found());
    }

    #[test]
    fn test_put_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kv.redb");
        let written = {
            let kv = RedbKvdb::open(&path).unwrap();
            kv.put("cluster/database", b"{\"a\":1}", None).unwrap()
        };

        let kv = RedbKvdb::open(&path).unwrap();
        let got = kv.get("cluster/database").unwrap();
        assert_eq!(got.value, b"{\"a\":1}");
        assert_eq!(got.modified_index, written.modified_index);

        // The index keeps growing across reopen
        let next = kv.put("other", b"x", None).unwrap();
        assert!(next.modified_index > written.modified_index);
    }

    #[test]
    fn test_create_delete_enumerate() {
        let (_dir, kv) = open();
        kv.create("v/1", b"a", None).unwrap();
        kv.create("v/2", b"b", None).unwrap();
        kv.create("w/1", b"c", None).unwrap();
        assert!(kv.create("v/1", b"z", None).unwrap_err().is_key_exists());

        let listed: Vec<_> = kv.enumerate("v/").unwrap().into_iter().map(|p| p.key).collect();
        assert_eq!(listed, vec!["v/1", "v/2"]);

        kv.delete("v/1").unwrap();
        assert_eq!(kv.enumerate("v/").unwrap().len(), 1);
        assert!(kv.delete("v/1").unwrap_err().is_key_not_found());
    }

    #[test]
    fn test_undecodable_entry_fails_enumerate() {
        let (_dir, kv) = open();
        kv.create("v/1", b"a", None).unwrap();
        let write_txn = kv.db.begin_write().unwrap();
        {
            let mut table = write_txn.open_table(ENTRIES).unwrap();
            table.insert("v/2", &[0xffu8][..]).unwrap();
        }
        write_txn.commit().unwrap();

        assert!(matches!(kv.enumerate("v/"), Err(KvError::Bincode(_))));
        assert_eq!(kv.enumerate("w/").unwrap().len(), 0);
    }

    #[test]
    fn test_compare_and_set() {
        let (_dir, kv) = open();
        let first = kv.compare_and_set("k", b"1", None).unwrap();
        assert!(kv.compare_and_set("k", b"1", None).is_err());
        kv.compare_and_set("k", b"2", Some(first.modified_index))
            .unwrap();
        assert_eq!(kv.get("k").unwrap().value, b"2");
    }
}
