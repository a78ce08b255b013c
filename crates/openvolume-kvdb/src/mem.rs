//! In-memory key-value store
//!
//! Process-local and lost on exit. Used for single-node setups and tests.

use crate::entry::{self, Mutation, Op, StoredEntry};
use crate::error::{KvError, KvResult};
use crate::{KvPair, Kvdb};

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Default)]
struct MemState {
    entries: BTreeMap<String, StoredEntry>,
    last_index: u64,
}

/// In-memory [`Kvdb`]
#[derive(Default)]
pub struct MemKvdb {
    state: RwLock<MemState>,
}

impl MemKvdb {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn apply(&self, key: &str, op: Op<'_>) -> KvResult<KvPair> {
        let now = entry::now_ms();
        let mut state = self.state.write();
        let current = state.entries.get(key).filter(|e| !e.is_expired(now));
        let mutation = entry::plan(key, op, current, state.last_index + 1, now)?;
        let pair = mutation.result(key);
        match mutation {
            Mutation::Insert(e) => {
                state.last_index = e.modified_index;
                state.entries.insert(key.to_string(), e);
            }
            Mutation::Remove(_) => {
                state.entries.remove(key);
            }
        }
        Ok(pair)
    }
}

impl Kvdb for MemKvdb {
    fn name(&self) -> &str {
        "memory"
    }

    fn get(&self, key: &str) -> KvResult<KvPair> {
        let now = entry::now_ms();
        self.state
            .read()
            .entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.to_pair(key))
            .ok_or_else(|| KvError::KeyNotFound(key.to_string()))
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
        let state = self.state.read();
        Ok(state
            .entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(_, e)| !e.is_expired(now))
            .map(|(k, e)| e.to_pair(k))
            .collect())
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

    #[test]
    fn test_get_missing_is_key_not_found() {
        let kv = MemKvdb::new();
        let err = kv.get("cluster/database").unwrap_err();
        assert!(err.is_key_not_found());
    }

    #[test]
    fn test_put_get_and_index() {
        let kv = MemKvdb::new();
        let first = kv.put("a", b"1", None).unwrap();
        let second = kv.put("a", b"2", None).unwrap();
        assert!(second.modified_index > first.modified_index);

        let got = kv.get("a").unwrap();
        assert_eq!(got.value, b"2");
        assert_eq!(got.modified_index, second.modified_index);
    }

    #[test]
    fn test_create_and_delete() {
        let kv = MemKvdb::new();
        kv.create("a", b"1", None).unwrap();
        assert!(kv.create("a", b"2", None).unwrap_err().is_key_exists());

        let removed = kv.delete("a").unwrap();
        assert_eq!(removed.value, b"1");
        assert!(kv.delete("a").unwrap_err().is_key_not_found());
    }

    #[test]
    fn test_enumerate_prefix() {
        let kv = MemKvdb::new();
        kv.put("vols/b", b"b", None).unwrap();
        kv.put("vols/a", b"a", None).unwrap();
        kv.put("volsx", b"x", None).unwrap();
        kv.put("snaps/a", b"s", None).unwrap();

        let keys: Vec<_> = kv
            .enumerate("vols/")
            .unwrap()
            .into_iter()
            .map(|p| p.key)
            .collect();
        assert_eq!(keys, vec!["vols/a", "vols/b"]);
    }

    #[test]
    fn test_expired_key_reads_absent() {
        let kv = MemKvdb::new();
        kv.put("lease", b"x", Some(Duration::ZERO)).unwrap();
        assert!(kv.get("lease").unwrap_err().is_key_not_found());
        assert!(kv.enumerate("").unwrap().is_empty());
        // An expired key may be created again
        kv.create("lease", b"y", None).unwrap();
    }

    #[test]
    fn test_compare_and_set() {
        let kv = MemKvdb::new();
        let created = kv.compare_and_set("k", b"1", None).unwrap();
        let updated = kv
            .compare_and_set("k", b"2", Some(created.modified_index))
            .unwrap();
        let stale = kv.compare_and_set("k", b"3", Some(created.modified_index));
        assert!(matches!(stale, Err(KvError::ModifiedIndexMismatch { .. })));
        assert_eq!(kv.get("k").unwrap().modified_index, updated.modified_index);
    }
}
