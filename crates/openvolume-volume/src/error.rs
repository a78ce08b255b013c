//! Volume driver error types

use openvolume_common::{SnapId, VolumeId};
use openvolume_kvdb::KvError;
use thiserror::Error;

/// Broad error classes shared by every driver
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    AlreadyExists,
    NotFound,
    NotSupported,
    InvalidState,
    InvalidArgument,
    ResourceExhausted,
    /// The store or an OS primitive failed underneath us
    DependencyFailure,
}

/// Volume driver error
#[derive(Error, Debug)]
pub enum VolumeError {
    /// A driver with this name is already registered or instantiated
    #[error("Driver already exists: {0}")]
    DriverExists(String),

    /// No live driver instance with this name
    #[error("Driver not found: {0}")]
    DriverNotFound(String),

    /// Operation not supported by this backend
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// A volume matching the request already exists
    #[error("Volume already exists: {0}")]
    VolumeExists(String),

    #[error("Volume not found: {0}")]
    VolumeNotFound(VolumeId),

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(SnapId),

    #[error("Snapshot already exists: {0}")]
    SnapshotExists(SnapId),

    /// Volume has snapshots and cannot be deleted
    #[error("Volume has snapshots associated: {0}")]
    VolumeHasSnapshots(VolumeId),

    #[error("Volume is attached: {0}")]
    VolumeAttached(VolumeId),

    #[error("Volume is detached: {0}")]
    VolumeDetached(VolumeId),

    #[error("Volume is mounted: {0}")]
    VolumeMounted(VolumeId),

    #[error("Volume not mounted: {0}")]
    NotMounted(VolumeId),

    /// No filesystem has been recorded for the volume
    #[error("Volume not formatted: {0}")]
    NotFormatted(VolumeId),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Out of space: {0}")]
    NoSpace(String),

    #[error("Out of memory")]
    OutOfMemory,

    #[error("Mount failed at {path}: {reason}")]
    MountFailed { path: String, reason: String },

    #[error("Unmount failed at {path}: {reason}")]
    UnmountFailed { path: String, reason: String },

    /// Key-value store failure
    #[error("Store error: {0}")]
    Store(#[from] KvError),

    /// Stored record could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VolumeError {
    /// Create a not supported error for the named operation
    pub fn not_supported(op: impl Into<String>) -> Self {
        Self::NotSupported(op.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Classify this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DriverExists(_) | Self::VolumeExists(_) | Self::SnapshotExists(_) => {
                ErrorKind::AlreadyExists
            }
            Self::DriverNotFound(_) | Self::VolumeNotFound(_) | Self::SnapshotNotFound(_) => {
                ErrorKind::NotFound
            }
            Self::NotSupported(_) => ErrorKind::NotSupported,
            Self::VolumeHasSnapshots(_)
            | Self::VolumeAttached(_)
            | Self::VolumeDetached(_)
            | Self::VolumeMounted(_)
            | Self::NotMounted(_)
            | Self::NotFormatted(_) => ErrorKind::InvalidState,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::NoSpace(_) | Self::OutOfMemory => ErrorKind::ResourceExhausted,
            Self::Io(e) if e.kind() == std::io::ErrorKind::StorageFull => {
                ErrorKind::ResourceExhausted
            }
            Self::MountFailed { .. }
            | Self::UnmountFailed { .. }
            | Self::Store(_)
            | Self::Serialization(_)
            | Self::Io(_) => ErrorKind::DependencyFailure,
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        self.kind() == ErrorKind::AlreadyExists
    }

    #[must_use]
    pub fn is_not_supported(&self) -> bool {
        self.kind() == ErrorKind::NotSupported
    }

    #[must_use]
    pub fn is_invalid_state(&self) -> bool {
        self.kind() == ErrorKind::InvalidState
    }
}

/// Result type for volume operations
pub type VolumeResult<T> = Result<T, VolumeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            VolumeError::DriverExists("nfs".into()).kind(),
            ErrorKind::AlreadyExists
        );
        assert!(VolumeError::DriverNotFound("nfs".into()).is_not_found());
        assert!(VolumeError::not_supported("alerts").is_not_supported());
        assert!(VolumeError::NotMounted(VolumeId::new("v")).is_invalid_state());
        assert!(VolumeError::NotFormatted(VolumeId::new("v")).is_invalid_state());
        assert_eq!(
            VolumeError::Store(KvError::KeyExists("k".into())).kind(),
            ErrorKind::DependencyFailure
        );
    }

    #[test]
    fn test_storage_full_is_resource_exhaustion() {
        let full = std::io::Error::from(std::io::ErrorKind::StorageFull);
        assert_eq!(VolumeError::Io(full).kind(), ErrorKind::ResourceExhausted);

        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert_eq!(VolumeError::Io(denied).kind(), ErrorKind::DependencyFailure);
    }

    #[test]
    fn test_display() {
        let err = VolumeError::VolumeHasSnapshots(VolumeId::new("vol-1"));
        assert_eq!(err.to_string(), "Volume has snapshots associated: vol-1");
    }
}
