//! Built-in OpenVolume drivers
//!
//! - [`nfs`]: file volumes as directories on an NFS export
//! - [`blockfile`]: block volumes backed by sparse image files
//!
//! Both keep their volume records in the shared key-value store and take
//! a [`mount::Mounter`] so they can run without touching the host.

pub mod blockfile;
pub mod mount;
pub mod nfs;

pub use mount::{MountCall, Mounter, RecordingMounter, SysMounter};

use openvolume_common::MachineId;
use openvolume_kvdb::Kvdb;
use openvolume_volume::{DriverParams, DriverRegistry, VolumeResult};
use std::path::PathBuf;
use std::sync::Arc;

/// The node the drivers run on
#[derive(Clone, Debug, Default)]
pub struct NodeContext {
    /// Recorded as `attached_on` for volumes attached here
    pub node_id: MachineId,
    /// Parent of per-driver default roots; empty means no default
    pub data_dir: PathBuf,
}

impl NodeContext {
    pub fn new(node_id: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            node_id: MachineId::new(node_id),
            data_dir: data_dir.into(),
        }
    }
}

/// Register every built-in driver, all persisting into `kv`
pub fn register_builtin(
    registry: &DriverRegistry,
    kv: Arc<dyn Kvdb>,
    node: NodeContext,
) -> VolumeResult<()> {
    let nfs_kv = kv.clone();
    registry.register(nfs::NAME, move |params: &DriverParams| {
        nfs::init(params, nfs_kv.clone())
    })?;
    registry.register(blockfile::NAME, move |params: &DriverParams| {
        blockfile::init(params, kv.clone(), &node)
    })?;
    Ok(())
}
