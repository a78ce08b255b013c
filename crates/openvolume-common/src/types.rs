//! Core type definitions for OpenVolume
//!
//! Volumes, their creation-time settings, snapshots and the
//! identifiers that tie them together. These are plain value types;
//! drivers own the behavior.

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// A name-value map
pub type Labels = HashMap<String, String>;

/// Driver-specific, system-wide unique volume identifier.
///
/// The empty string is reserved as [`VolumeId::BAD`] and is never generated.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{_0}")]
#[serde(transparent)]
pub struct VolumeId(String);

impl VolumeId {
    /// Invalid volume ID, usually accompanied by an error.
    pub const BAD: Self = Self(String::new());

    /// Generate a new random volume ID
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap an existing identifier
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Anything but the empty sentinel is a valid ID
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
    }
}

impl fmt::Debug for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VolumeId({:?})", self.0)
    }
}

impl From<&str> for VolumeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Driver-specific, system-wide unique snapshot identifier.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{_0}")]
#[serde(transparent)]
pub struct SnapId(String);

impl SnapId {
    /// Invalid snapshot ID, usually accompanied by an error.
    pub const BAD: Self = Self(String::new());

    /// Generate a new random snapshot ID
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
    }
}

impl fmt::Debug for SnapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SnapId({:?})", self.0)
    }
}

impl From<&str> for SnapId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Node instance identifier for clustered systems.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
#[serde(transparent)]
pub struct MachineId(String);

impl MachineId {
    /// Not attached to any node
    pub const NONE: Self = Self(String::new());

    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MachineId({:?})", self.0)
    }
}

/// Class of service: 0 (lowest) to 9 (highest)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct VolumeCos(u8);

impl VolumeCos {
    /// Minimum level of CoS
    pub const NONE: Self = Self(0);
    /// In-between level of CoS
    pub const MEDIUM: Self = Self(5);
    /// Maximum level of CoS
    pub const MAX: Self = Self(9);

    /// Create a CoS value, rejecting anything above [`VolumeCos::MAX`]
    pub fn new(level: u8) -> Result<Self, InvalidCos> {
        if level > Self::MAX.0 {
            return Err(InvalidCos(level));
        }
        Ok(Self(level))
    }

    #[must_use]
    pub const fn level(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for VolumeCos {
    type Error = InvalidCos;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        Self::new(level)
    }
}

impl From<VolumeCos> for u8 {
    fn from(cos: VolumeCos) -> u8 {
        cos.0
    }
}

/// Class of service outside 0..=9
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("class of service must be between 0 and 9, got {0}")]
pub struct InvalidCos(pub u8);

/// Health status of a volume
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum VolumeStatus {
    /// The volume is not present
    #[default]
    NotPresent,
    /// Healthy
    Up,
    /// Failed
    Down,
    /// Up but with degraded performance, e.g. a RAID group missing a drive
    Degraded,
}

/// Primary lifecycle state of a volume.
///
/// The error facet is tracked separately in [`Volume::faulted`] so that a
/// volume can be e.g. attached and in error at the same time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum VolumeState {
    /// Transitioning to a new state
    #[default]
    Pending,
    /// Ready to be attached
    Available,
    /// Attached to a node
    Attached,
    /// Known but not currently attached
    Detached,
    /// In error
    Error,
    /// Deleted; remains here while resources are reclaimed asynchronously
    Deleted,
}

impl VolumeState {
    pub const ALL: [Self; 6] = [
        Self::Pending,
        Self::Available,
        Self::Attached,
        Self::Detached,
        Self::Error,
        Self::Deleted,
    ];

    const fn bit(self) -> u8 {
        match self {
            Self::Pending => 1 << 0,
            Self::Available => 1 << 1,
            Self::Attached => 1 << 2,
            Self::Detached => 1 << 3,
            Self::Error => 1 << 4,
            Self::Deleted => 1 << 5,
        }
    }
}

/// A set of lifecycle states used to filter enumeration queries.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateFilter(u8);

impl StateFilter {
    /// Matches nothing
    pub const EMPTY: Self = Self(0);
    /// Matches a volume in any state
    pub const ANY: Self = Self(0b11_1111);

    /// Filter matching exactly the given states
    #[must_use]
    pub fn of(states: &[VolumeState]) -> Self {
        states.iter().fold(Self::EMPTY, |f, s| f.with(*s))
    }

    /// Add a state to the set
    #[must_use]
    pub const fn with(self, state: VolumeState) -> Self {
        Self(self.0 | state.bit())
    }

    #[must_use]
    pub const fn contains(self, state: VolumeState) -> bool {
        self.0 & state.bit() != 0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterate over the member states
    pub fn iter(self) -> impl Iterator<Item = VolumeState> {
        VolumeState::ALL.into_iter().filter(move |s| self.contains(*s))
    }
}

impl From<VolumeState> for StateFilter {
    fn from(state: VolumeState) -> Self {
        Self::EMPTY.with(state)
    }
}

impl std::ops::BitOr<VolumeState> for StateFilter {
    type Output = Self;

    fn bitor(self, rhs: VolumeState) -> Self {
        self.with(rhs)
    }
}

impl fmt::Debug for StateFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Metadata attached to a volume, used for searching. Never an identity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeLocator {
    /// User friendly name
    pub name: String,
    /// Name-value pairs that act as search filters
    #[serde(default)]
    pub volume_labels: Labels,
}

impl VolumeLocator {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            volume_labels: Labels::new(),
        }
    }

    /// Add a label
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.volume_labels.insert(key.into(), value.into());
        self
    }

    /// True if `self`, read as a filter, selects `candidate`.
    ///
    /// An empty name matches any name; every filter label must be present
    /// on the candidate with the same value.
    #[must_use]
    pub fn matches(&self, candidate: &VolumeLocator) -> bool {
        (self.name.is_empty() || self.name == candidate.name)
            && labels_match(&self.volume_labels, &candidate.volume_labels)
    }
}

/// True if every entry of `filter` is present in `labels`
#[must_use]
pub fn labels_match(filter: &Labels, labels: &Labels) -> bool {
    filter
        .iter()
        .all(|(k, v)| labels.get(k).is_some_and(|have| have == v))
}

/// Options passed in with a create request
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOptions {
    /// Fail the create if a volume with a matching locator already exists
    pub fail_if_exists: bool,
    /// Materialize the new volume from this snapshot
    pub create_from_snap: Option<SnapId>,
}

/// Supported filesystems
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum Filesystem {
    #[default]
    #[display("none")]
    None,
    #[display("ext4")]
    Ext4,
    #[display("xfs")]
    Xfs,
    #[display("zfs")]
    Zfs,
    #[display("nfs")]
    Nfs,
}

impl std::str::FromStr for Filesystem {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "" => Ok(Self::None),
            "ext4" => Ok(Self::Ext4),
            "xfs" => Ok(Self::Xfs),
            "zfs" => Ok(Self::Zfs),
            "nfs" => Ok(Self::Nfs),
            _ => Err(format!("unknown filesystem: {s}")),
        }
    }
}

/// Properties needed to create a volume. Frozen into the volume at creation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpec {
    /// Ephemeral storage
    pub ephemeral: bool,
    /// Thin provisioned size in bytes
    pub size: u64,
    /// Format the disk with this filesystem
    pub format: Filesystem,
    /// Filesystem block size; 0 lets the backend choose
    pub block_size: u32,
    /// Number of nodes allowed to fail while data stays available.
    /// 0 means no redundancy.
    pub ha_level: u32,
    pub cos: VolumeCos,
    /// Perform dedupe on this disk
    pub dedupe: bool,
    /// Snapshot interval in minutes; 0 disables periodic snapshots
    pub snapshot_interval: u32,
    #[serde(default)]
    pub config_labels: Labels,
}

impl VolumeSpec {
    /// A spec of the given size with everything else defaulted
    #[must_use]
    pub fn with_size(size: u64) -> Self {
        Self {
            size,
            ..Self::default()
        }
    }
}

/// A live, created volume
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    /// Self-referential ID; never reassigned
    pub id: VolumeId,
    pub locator: VolumeLocator,
    /// Creation time
    pub ctime: DateTime<Utc>,
    /// Spec as given at creation
    pub spec: VolumeSpec,
    /// Usage in bytes
    pub usage: u64,
    /// Last integrity scan
    pub last_scan: DateTime<Utc>,
    /// Detected filesystem
    pub format: Filesystem,
    pub status: VolumeStatus,
    pub state: VolumeState,
    /// Error facet, combinable with any primary state
    #[serde(default)]
    pub faulted: bool,
    /// Node on which this volume is attached
    pub attached_on: MachineId,
    /// Non-empty when a device is attached
    pub device_path: String,
    /// Non-empty when mounted
    pub attach_path: String,
    /// Nodes on which this volume is erasure coded (clustered backends only)
    pub replica_set: Vec<MachineId>,
    /// Last recorded error
    pub error: String,
}

impl Volume {
    /// A fresh, pending volume record
    #[must_use]
    pub fn new(id: VolumeId, locator: VolumeLocator, spec: VolumeSpec) -> Self {
        let now = Utc::now();
        Self {
            id,
            locator,
            ctime: now,
            format: spec.format,
            spec,
            usage: 0,
            last_scan: now,
            status: VolumeStatus::NotPresent,
            state: VolumeState::Pending,
            faulted: false,
            attached_on: MachineId::NONE,
            device_path: String::new(),
            attach_path: String::new(),
            replica_set: Vec::new(),
            error: String::new(),
        }
    }

    /// Mounted somewhere on the host
    #[must_use]
    pub fn is_mounted(&self) -> bool {
        !self.attach_path.is_empty()
    }

    /// Exposed as a device
    #[must_use]
    pub fn is_attached(&self) -> bool {
        !self.device_path.is_empty()
    }

    /// Set-membership test against an enumeration filter
    #[must_use]
    pub fn matches_state(&self, filter: StateFilter) -> bool {
        filter.contains(self.state) || (self.faulted && filter.contains(VolumeState::Error))
    }

    /// Record an error without losing the primary state
    pub fn set_error(&mut self, msg: impl Into<String>) {
        self.faulted = true;
        self.error = msg.into();
    }

    pub fn clear_error(&mut self) {
        self.faulted = false;
        self.error.clear();
    }
}

/// A point-in-time snapshot of a volume
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VolumeSnap {
    /// System generated ID
    pub id: SnapId,
    /// Parent volume
    pub volume_id: VolumeId,
    pub ctime: DateTime<Utc>,
    #[serde(default)]
    pub snap_labels: Labels,
    pub usage: u64,
}

impl VolumeSnap {
    #[must_use]
    pub fn new(volume_id: VolumeId, snap_labels: Labels, usage: u64) -> Self {
        Self {
            id: SnapId::generate(),
            volume_id,
            ctime: Utc::now(),
            snap_labels,
            usage,
        }
    }
}

/// I/O statistics for a volume
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeStats {
    pub usage_bytes: u64,
    pub read_ops: u64,
    pub write_ops: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
}

/// Alert severity
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub severity: AlertSeverity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Alerts raised on a volume
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeAlerts {
    pub alerts: Vec<Alert>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_valid() {
        let id = VolumeId::generate();
        assert!(id.is_valid());
        assert_ne!(id, VolumeId::BAD);
        assert!(!VolumeId::BAD.is_valid());
        assert!(SnapId::generate().is_valid());
        assert!(MachineId::NONE.is_none());
    }

    #[test]
    fn test_cos_bounds() {
        assert_eq!(VolumeCos::new(9).unwrap(), VolumeCos::MAX);
        assert!(VolumeCos::new(10).is_err());
        let err = serde_json::from_str::<VolumeCos>("12").unwrap_err();
        assert!(err.to_string().contains("between 0 and 9"));
    }

    #[test]
    fn test_state_filter_membership() {
        let filter = StateFilter::from(VolumeState::Attached) | VolumeState::Detached;
        assert!(filter.contains(VolumeState::Attached));
        assert!(filter.contains(VolumeState::Detached));
        assert!(!filter.contains(VolumeState::Available));

        for state in VolumeState::ALL {
            assert!(StateFilter::ANY.contains(state));
            assert!(!StateFilter::EMPTY.contains(state));
        }
        assert_eq!(StateFilter::of(&VolumeState::ALL), StateFilter::ANY);
    }

    #[test]
    fn test_faulted_volume_matches_error_filter() {
        let mut vol = Volume::new(
            VolumeId::generate(),
            VolumeLocator::new("v"),
            VolumeSpec::with_size(1024),
        );
        vol.state = VolumeState::Attached;
        assert!(!vol.matches_state(VolumeState::Error.into()));

        vol.set_error("disk vanished");
        assert!(vol.matches_state(VolumeState::Error.into()));
        assert!(vol.matches_state(VolumeState::Attached.into()));
        assert!(!vol.matches_state(VolumeState::Available.into()));

        vol.clear_error();
        assert!(vol.error.is_empty());
        assert!(!vol.matches_state(VolumeState::Error.into()));
    }

    #[test]
    fn test_locator_matching() {
        let vol = VolumeLocator::new("db")
            .with_label("env", "prod")
            .with_label("tier", "gold");

        assert!(VolumeLocator::default().matches(&vol));
        assert!(VolumeLocator::new("db").matches(&vol));
        assert!(VolumeLocator::new("").with_label("env", "prod").matches(&vol));
        assert!(!VolumeLocator::new("web").matches(&vol));
        assert!(!VolumeLocator::new("db").with_label("env", "dev").matches(&vol));
        assert!(!VolumeLocator::new("db").with_label("zone", "a").matches(&vol));
    }

    #[test]
    fn test_volume_path_invariants() {
        let mut vol = Volume::new(
            VolumeId::generate(),
            VolumeLocator::new("v"),
            VolumeSpec::with_size(1),
        );
        assert!(!vol.is_attached());
        assert!(!vol.is_mounted());
        vol.device_path = "/dev/ov0".into();
        vol.attach_path = "/mnt/v".into();
        assert!(vol.is_attached());
        assert!(vol.is_mounted());
    }

    #[test]
    fn test_filesystem_parse() {
        assert_eq!("ext4".parse::<Filesystem>().unwrap(), Filesystem::Ext4);
        assert_eq!("".parse::<Filesystem>().unwrap(), Filesystem::None);
        assert!("btrfs".parse::<Filesystem>().is_err());
        assert_eq!(Filesystem::Nfs.to_string(), "nfs");
    }
}
