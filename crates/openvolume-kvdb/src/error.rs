//! Key-value store error types

use thiserror::Error;

/// Key-value store error
#[derive(Error, Debug)]
pub enum KvError {
    /// Key does not exist (or has expired)
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Key already exists
    #[error("Key already exists: {0}")]
    KeyExists(String),

    /// Compare-and-set lost against a concurrent writer
    #[error("Modified index mismatch for {key}: expected {expected:?}, found {actual:?}")]
    ModifiedIndexMismatch {
        key: String,
        expected: Option<u64>,
        actual: Option<u64>,
    },

    #[error("redb error: {0}")]
    Redb(#[from] redb::DatabaseError),
    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("redb transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redb::TransactionError> for KvError {
    fn from(e: redb::TransactionError) -> Self {
        Self::Transaction(Box::new(e))
    }
}

impl KvError {
    /// The one condition callers may treat as "nothing stored yet"
    #[must_use]
    pub fn is_key_not_found(&self) -> bool {
        matches!(self, Self::KeyNotFound(_))
    }

    #[must_use]
    pub fn is_key_exists(&self) -> bool {
        matches!(self, Self::KeyExists(_))
    }
}

/// Result type for key-value operations
pub type KvResult<T> = Result<T, KvError>;
