//! Cluster database errors

use openvolume_kvdb::KvError;
use thiserror::Error;

/// Errors from reading or writing the cluster record
#[derive(Debug, Error)]
pub enum ClusterDbError {
    #[error("cluster store error: {0}")]
    Store(#[from] KvError),

    #[error("failed to decode cluster database: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("failed to encode cluster database: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("cluster database modified concurrently (expected index {expected:?}, found {actual:?})")]
    Conflict {
        expected: Option<u64>,
        actual: Option<u64>,
    },
}

pub type ClusterDbResult<T> = Result<T, ClusterDbError>;
