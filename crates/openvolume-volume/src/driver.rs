//! The volume driver contract
//!
//! A backend is a [`VolumeDriver`] once it provides all three facets:
//! [`ProtoDriver`] (lifecycle), [`BlockDriver`] (device attachment) and
//! [`Enumerator`] (queries). Backends that cannot meaningfully support a
//! facet are composed through [`crate::DriverBuilder`], which fills the gap
//! with stubs that report [`crate::VolumeError::NotSupported`].

use crate::error::{VolumeError, VolumeResult};
use openvolume_common::{
    CreateOptions, Labels, SnapId, Volume, VolumeAlerts, VolumeId, VolumeLocator, VolumeSnap,
    VolumeSpec, VolumeStats,
};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

/// Kind of storage a backend provides. Backends may combine kinds.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DriverType(u8);

impl DriverType {
    pub const FILE: Self = Self(1 << 0);
    pub const BLOCK: Self = Self(1 << 1);
    pub const OBJECT: Self = Self(1 << 2);
    pub const CLUSTERED: Self = Self(1 << 3);

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl std::ops::BitOr for DriverType {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for DriverType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (Self::FILE, "File"),
            (Self::BLOCK, "Block"),
            (Self::OBJECT, "Object"),
            (Self::CLUSTERED, "Clustered"),
        ]
        .into_iter()
        .filter(|(t, _)| self.contains(*t))
        .map(|(_, n)| n)
        .collect();
        write!(f, "DriverType({})", names.join("|"))
    }
}

/// Backend-defined initialization parameters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DriverParams(HashMap<String, String>);

impl DriverParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// A parameter the backend cannot start without
    pub fn required(&self, key: &str) -> VolumeResult<&str> {
        self.get(key)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| VolumeError::invalid_argument(format!("missing parameter '{key}'")))
    }
}

impl From<HashMap<String, String>> for DriverParams {
    fn from(map: HashMap<String, String>) -> Self {
        Self(map)
    }
}

/// Lifecycle operations every volume driver must implement.
pub trait ProtoDriver: Send + Sync {
    /// Stable driver name
    fn name(&self) -> &str;

    fn driver_type(&self) -> DriverType;

    /// Create a new volume for the given spec, returning its ID.
    ///
    /// If `options.fail_if_exists` is set and a volume with a matching
    /// locator exists, this fails with `VolumeExists`. Otherwise a matching
    /// available volume may be returned instead of creating a new one.
    fn create(
        &self,
        locator: &VolumeLocator,
        options: &CreateOptions,
        spec: &VolumeSpec,
    ) -> VolumeResult<VolumeId>;

    /// Delete a volume. May fail with `VolumeNotFound` or `VolumeHasSnapshots`.
    fn delete(&self, volume_id: &VolumeId) -> VolumeResult<()>;

    /// Mount the volume at `mount_path`
    fn mount(&self, volume_id: &VolumeId, mount_path: &Path) -> VolumeResult<()>;

    /// Unmount the volume. Fails with `NotMounted` if it has no attach path.
    fn unmount(&self, volume_id: &VolumeId, mount_path: &Path) -> VolumeResult<()>;

    /// Snapshot a volume. I/O must be quiesced by the caller first.
    fn snapshot(&self, volume_id: &VolumeId, labels: &Labels) -> VolumeResult<SnapId>;

    fn snap_delete(&self, snap_id: &SnapId) -> VolumeResult<()>;

    fn stats(&self, volume_id: &VolumeId) -> VolumeResult<VolumeStats>;

    /// Alerts on this volume; `NotSupported` if the backend has no telemetry
    fn alerts(&self, volume_id: &VolumeId) -> VolumeResult<VolumeAlerts>;

    /// Low level diagnostic key-value pairs
    fn status(&self) -> Vec<(String, String)>;

    /// Release all backend resources. Safe to call on a half-initialized backend.
    fn shutdown(&self);
}

/// Block device operations
pub trait BlockDriver: Send + Sync {
    /// Expose the volume as a device and return its path
    fn attach(&self, volume_id: &VolumeId) -> VolumeResult<String>;

    /// Apply the filesystem declared in the volume's spec
    fn format(&self, volume_id: &VolumeId) -> VolumeResult<()>;

    fn detach(&self, volume_id: &VolumeId) -> VolumeResult<()>;
}

/// Volume and snapshot queries
pub trait Enumerator: Send + Sync {
    /// Full records for the given volumes. Fails if any is unknown.
    fn inspect(&self, volume_ids: &[VolumeId]) -> VolumeResult<Vec<Volume>>;

    /// Volumes matching `locator`; empty locator fields match anything.
    /// `labels` filters on the volumes' configuration labels.
    fn enumerate(&self, locator: &VolumeLocator, labels: &Labels) -> VolumeResult<Vec<Volume>>;

    fn snap_inspect(&self, snap_ids: &[SnapId]) -> VolumeResult<Vec<VolumeSnap>>;

    /// Snapshots of the given volumes (all volumes when empty) carrying `labels`
    fn snap_enumerate(
        &self,
        volume_ids: &[VolumeId],
        labels: &Labels,
    ) -> VolumeResult<Vec<VolumeSnap>>;
}

/// The full driver contract
pub trait VolumeDriver: ProtoDriver + BlockDriver + Enumerator {}

impl<T: ProtoDriver + BlockDriver + Enumerator> VolumeDriver for T {}
