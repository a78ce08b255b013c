//! Cluster database persistence
//!
//! The whole cluster record (status plus node table) lives under a single
//! key and is always read and written as one unit. A missing key or the
//! empty-object marker means the cluster was never initialized; anything
//! else must decode cleanly or the read fails.
//!
//! Plain writes are last-writer-wins. [`ClusterDatabase::read_versioned`]
//! and [`ClusterDatabase::write_database_cas`] add an opt-in
//! check-and-set path for callers that need read-modify-write safety.

use crate::error::{ClusterDbError, ClusterDbResult};
use crate::types::Database;

use openvolume_kvdb::{KvError, Kvdb};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Key the aggregate record is stored under
pub const DATABASE_KEY: &str = "cluster/database";

/// Stored value meaning "not yet initialized"
const EMPTY_MARKER: &[u8] = b"{}";

/// A database together with the store index it was read at.
///
/// `version` is `None` when nothing was stored yet.
#[derive(Clone, Debug, PartialEq)]
pub struct Versioned {
    pub db: Database,
    pub version: Option<u64>,
}

/// Reads and writes the cluster-wide record
pub struct ClusterDatabase {
    kv: Arc<dyn Kvdb>,
}

impl ClusterDatabase {
    pub fn new(kv: Arc<dyn Kvdb>) -> Self {
        Self { kv }
    }

    /// Fetch the cluster record.
    ///
    /// A missing key or the empty-object marker yields a fresh
    /// `initializing` record. Decode failures and other store errors are
    /// returned; they never fall back to a fresh record.
    pub fn read_database(&self) -> ClusterDbResult<Database> {
        self.read_versioned().map(|v| v.db)
    }

    /// Like [`ClusterDatabase::read_database`], also returning the store index
    pub fn read_versioned(&self) -> ClusterDbResult<Versioned> {
        let pair = match self.kv.get(DATABASE_KEY) {
            Ok(pair) => pair,
            Err(e) if e.is_key_not_found() => {
                info!("Cluster is uninitialized...");
                return Ok(Versioned {
                    db: Database::initializing(),
                    version: None,
                });
            }
            Err(e) => {
                warn!("Could not read cluster database: {}", e);
                return Err(e.into());
            }
        };

        if pair.value == EMPTY_MARKER {
            info!("Cluster is uninitialized...");
            return Ok(Versioned {
                db: Database::initializing(),
                version: Some(pair.modified_index),
            });
        }

        let db = serde_json::from_slice::<Database>(&pair.value).map_err(|e| {
            warn!("Could not parse cluster database: {}", e);
            ClusterDbError::Decode(e)
        })?;
        debug!(nodes = db.nodes.len(), status = %db.cluster.status, "read cluster database");
        Ok(Versioned {
            db,
            version: Some(pair.modified_index),
        })
    }

    /// Store the full record, overwriting whatever is there.
    pub fn write_database(&self, db: &Database) -> ClusterDbResult<u64> {
        let bytes = Self::encode(db)?;
        let pair = self.kv.put(DATABASE_KEY, &bytes, None).map_err(|e| {
            warn!("Could not write cluster database: {}", e);
            ClusterDbError::from(e)
        })?;
        Ok(pair.modified_index)
    }

    /// Store the record only if nobody wrote it since `version` was read.
    ///
    /// Losing the race yields [`ClusterDbError::Conflict`]; re-read and retry.
    pub fn write_database_cas(&self, db: &Database, version: Option<u64>) -> ClusterDbResult<u64> {
        let bytes = Self::encode(db)?;
        match self.kv.compare_and_set(DATABASE_KEY, &bytes, version) {
            Ok(pair) => Ok(pair.modified_index),
            Err(KvError::ModifiedIndexMismatch { expected, actual, .. }) => {
                warn!(
                    "Cluster database changed underneath us (expected {:?}, found {:?})",
                    expected, actual
                );
                Err(ClusterDbError::Conflict { expected, actual })
            }
            Err(e) => {
                warn!("Could not write cluster database: {}", e);
                Err(e.into())
            }
        }
    }

    fn encode(db: &Database) -> ClusterDbResult<Vec<u8>> {
        serde_json::to_vec(db).map_err(|e| {
            warn!("Could not encode cluster database: {}", e);
            ClusterDbError::Encode(e)
        })
    }
}
