//! Stored entry representation and the write semantics shared by every backend.

use crate::KvPair;
use crate::error::{KvError, KvResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Value as persisted by a backend
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct StoredEntry {
    pub value: Vec<u8>,
    pub modified_index: u64,
    /// Unix millis after which the entry reads as absent
    pub expires_at: Option<u64>,
}

impl StoredEntry {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at.is_some_and(|t| t <= now_ms)
    }

    pub fn to_pair(&self, key: &str) -> KvPair {
        KvPair {
            key: key.to_string(),
            value: self.value.clone(),
            modified_index: self.modified_index,
        }
    }
}

/// A requested write
pub(crate) enum Op<'a> {
    Put {
        value: &'a [u8],
        ttl: Option<Duration>,
    },
    Create {
        value: &'a [u8],
        ttl: Option<Duration>,
    },
    Delete,
    CompareAndSet {
        value: &'a [u8],
        prev_index: Option<u64>,
    },
}

/// What a backend must do to its table
pub(crate) enum Mutation {
    Insert(StoredEntry),
    Remove(StoredEntry),
}

impl Mutation {
    /// The pair reported back to the caller
    pub fn result(&self, key: &str) -> KvPair {
        match self {
            Self::Insert(e) | Self::Remove(e) => e.to_pair(key),
        }
    }
}

pub(crate) fn now_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

/// Decide the mutation for `op` given the live entry under `key`.
///
/// `current` must already have expired entries filtered out.
pub(crate) fn plan(
    key: &str,
    op: Op<'_>,
    current: Option<&StoredEntry>,
    next_index: u64,
    now_ms: u64,
) -> KvResult<Mutation> {
    let entry = |value: &[u8], ttl: Option<Duration>| StoredEntry {
        value: value.to_vec(),
        modified_index: next_index,
        expires_at: ttl.map(|t| now_ms.saturating_add(u64::try_from(t.as_millis()).unwrap_or(u64::MAX))),
    };

    match op {
        Op::Put { value, ttl } => Ok(Mutation::Insert(entry(value, ttl))),
        Op::Create { value, ttl } => match current {
            Some(_) => Err(KvError::KeyExists(key.to_string())),
            None => Ok(Mutation::Insert(entry(value, ttl))),
        },
        Op::Delete => match current {
            Some(e) => Ok(Mutation::Remove(e.clone())),
            None => Err(KvError::KeyNotFound(key.to_string())),
        },
        Op::CompareAndSet { value, prev_index } => {
            let actual = current.map(|e| e.modified_index);
            if actual != prev_index {
                return Err(KvError::ModifiedIndexMismatch {
                    key: key.to_string(),
                    expected: prev_index,
                    actual,
                });
            }
            // CAS never carries a TTL; keep the existing deadline if any
            let mut next = entry(value, None);
            next.expires_at = current.and_then(|e| e.expires_at);
            Ok(Mutation::Insert(next))
        }
    }
}
