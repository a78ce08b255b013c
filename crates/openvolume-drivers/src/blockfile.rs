//! Sparse-file block driver
//!
//! Each volume is a sparse image file under `<root>/volumes/`, and each
//! snapshot a full copy of it under `<root>/snaps/`. Attaching a volume
//! exposes the image path as its device; mounting goes through the
//! [`Mounter`] with the filesystem recorded at format time.
//!
//! Formatting records the requested filesystem; it does not run mkfs.
//! The image has to carry that filesystem, and on a real host be exposed
//! through a loop device, before [`SysMounter`] can mount it.
//!
//! The image root comes from the `root` parameter, or defaults to
//! `<data_dir>/blockfile` for the node.
//!
//! Volume lifecycle:
//!
//! ```text
//! create ─► Available ─attach─► Attached ─detach─► Detached ─attach─► ...
//!                                  │ format / mount / unmount
//! ```

use crate::NodeContext;
use crate::mount::{Mounter, SysMounter};

use openvolume_common::{
    CreateOptions, Filesystem, Labels, MachineId, SnapId, Volume, VolumeAlerts, VolumeId, VolumeLocator,
    VolumeSnap, VolumeSpec, VolumeState, VolumeStats, VolumeStatus,
};
use openvolume_kvdb::Kvdb;
use openvolume_volume::{
    BlockDriver, DriverBuilder, DriverParams, DriverType, ProtoDriver, VolumeDriver, VolumeError,
    VolumeResult, VolumeStore,
};
use parking_lot::Mutex;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const NAME: &str = "blockfile";

pub fn init(
    params: &DriverParams,
    kv: Arc<dyn Kvdb>,
    node: &NodeContext,
) -> VolumeResult<Arc<dyn VolumeDriver>> {
    init_with(params, kv, node, Arc::new(SysMounter))
}

pub fn init_with(
    params: &DriverParams,
    kv: Arc<dyn Kvdb>,
    node: &NodeContext,
    mounter: Arc<dyn Mounter>,
) -> VolumeResult<Arc<dyn VolumeDriver>> {
    let driver = Arc::new(BlockFileDriver::new(params, kv, node, mounter)?);
    let store = driver.store.clone();
    Ok(DriverBuilder::new(driver.clone())
        .block(driver)
        .enumerator(store)
        .build_arc())
}

pub struct BlockFileDriver {
    root: PathBuf,
    node_id: MachineId,
    store: Arc<VolumeStore>,
    mounter: Arc<dyn Mounter>,
    op_lock: Mutex<()>,
}

impl BlockFileDriver {
    fn new(
        params: &DriverParams,
        kv: Arc<dyn Kvdb>,
        node: &NodeContext,
        mounter: Arc<dyn Mounter>,
    ) -> VolumeResult<Self> {
        let root = match params.get("root") {
            Some(root) => PathBuf::from(root),
            None if !node.data_dir.as_os_str().is_empty() => node.data_dir.join(NAME),
            None => return Err(VolumeError::invalid_argument("missing parameter 'root'")),
        };
        fs::create_dir_all(root.join("volumes"))?;
        fs::create_dir_all(root.join("snaps"))?;
        info!("blockfile driver initialized at {}", root.display());
        Ok(Self {
            root,
            node_id: node.node_id.clone(),
            store: Arc::new(VolumeStore::new(NAME, kv)),
            mounter,
            op_lock: Mutex::new(()),
        })
    }

    fn image_path(&self, id: &VolumeId) -> PathBuf {
        self.root.join("volumes").join(format!("{id}.img"))
    }

    fn snap_path(&self, id: &SnapId) -> PathBuf {
        self.root.join("snaps").join(format!("{id}.img"))
    }

    /// Lay down the image for a new volume
    fn provision(&self, image: &Path, spec: &VolumeSpec, from: Option<&SnapId>) -> VolumeResult<()> {
        if let Some(snap_id) = from {
            let snap = self.store.get_snap(snap_id)?;
            fs::copy(self.snap_path(&snap.id), image)?;
        }
        let file = OpenOptions::new().create(true).write(true).truncate(false).open(image)?;
        if spec.size > file.metadata()?.len() {
            file.set_len(spec.size)?;
        }
        Ok(())
    }

    fn attached_vol(&self, volume_id: &VolumeId) -> VolumeResult<Volume> {
        let vol = self.store.get_vol(volume_id)?;
        if !vol.is_attached() {
            return Err(VolumeError::VolumeDetached(volume_id.clone()));
        }
        Ok(vol)
    }
}

/// Bytes actually allocated on disk for `path`
fn allocated(path: &Path) -> VolumeResult<u64> {
    let meta = fs::metadata(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        Ok(meta.blocks() * 512)
    }
    #[cfg(not(unix))]
    {
        Ok(meta.len())
    }
}

impl ProtoDriver for BlockFileDriver {
    fn name(&self) -> &str {
        NAME
    }

    fn driver_type(&self) -> DriverType {
        DriverType::BLOCK
    }

    fn create(
        &self,
        locator: &VolumeLocator,
        options: &CreateOptions,
        spec: &VolumeSpec,
    ) -> VolumeResult<VolumeId> {
        if spec.size == 0 && options.create_from_snap.is_none() {
            return Err(VolumeError::invalid_argument("volume size must be non-zero"));
        }

        let _guard = self.op_lock.lock();
        if let Some(existing) = self.store.check_create(locator, options)? {
            return Ok(existing);
        }

        let id = VolumeId::generate();
        let image = self.image_path(&id);
        if let Err(e) = self.provision(&image, spec, options.create_from_snap.as_ref()) {
            warn!("Failed to provision image {}: {}", image.display(), e);
            let _ = fs::remove_file(&image);
            return Err(e);
        }

        let mut vol = Volume::new(id.clone(), locator.clone(), spec.clone());
        vol.format = Filesystem::None;
        vol.state = VolumeState::Available;
        vol.status = VolumeStatus::Up;
        vol.usage = allocated(&image).unwrap_or(0);
        if let Err(e) = self.store.create_vol(&vol) {
            let _ = fs::remove_file(&image);
            return Err(e);
        }
        info!(volume_id = %id, name = %locator.name, size = spec.size, "block volume created");
        Ok(id)
    }

    fn delete(&self, volume_id: &VolumeId) -> VolumeResult<()> {
        let _guard = self.op_lock.lock();
        let vol = self.store.get_vol(volume_id)?;
        if vol.is_attached() {
            return Err(VolumeError::VolumeAttached(volume_id.clone()));
        }
        if !self.store.snaps_of(volume_id)?.is_empty() {
            return Err(VolumeError::VolumeHasSnapshots(volume_id.clone()));
        }

        let image = self.image_path(volume_id);
        if let Err(e) = fs::remove_file(&image)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            return Err(e.into());
        }
        self.store.delete_vol(volume_id)?;
        info!(volume_id = %volume_id, "block volume deleted");
        Ok(())
    }

    fn mount(&self, volume_id: &VolumeId, mount_path: &Path) -> VolumeResult<()> {
        let _guard = self.op_lock.lock();
        let mut vol = self.attached_vol(volume_id)?;
        if vol.is_mounted() {
            if Path::new(&vol.attach_path) == mount_path {
                return Ok(());
            }
            return Err(VolumeError::VolumeMounted(volume_id.clone()));
        }
        if vol.format == Filesystem::None {
            return Err(VolumeError::NotFormatted(volume_id.clone()));
        }

        self.mounter
            .mount_fs(Path::new(&vol.device_path), mount_path, &vol.format.to_string())?;
        vol.attach_path = mount_path.display().to_string();
        self.store.update_vol(&vol)
    }

    fn unmount(&self, volume_id: &VolumeId, _mount_path: &Path) -> VolumeResult<()> {
        let _guard = self.op_lock.lock();
        let mut vol = self.store.get_vol(volume_id)?;
        if !vol.is_mounted() {
            return Err(VolumeError::NotMounted(volume_id.clone()));
        }
        self.mounter.unmount(Path::new(&vol.attach_path))?;
        vol.attach_path.clear();
        self.store.update_vol(&vol)
    }

    fn snapshot(&self, volume_id: &VolumeId, labels: &Labels) -> VolumeResult<SnapId> {
        let _guard = self.op_lock.lock();
        let vol = self.store.get_vol(volume_id)?;
        let image = self.image_path(&vol.id);

        let snap = VolumeSnap::new(vol.id.clone(), labels.clone(), allocated(&image)?);
        let copy = self.snap_path(&snap.id);
        fs::copy(&image, &copy)?;
        if let Err(e) = self.store.create_snap(&snap) {
            let _ = fs::remove_file(&copy);
            return Err(e);
        }
        info!(volume_id = %volume_id, snap_id = %snap.id, "snapshot taken");
        Ok(snap.id)
    }

    fn snap_delete(&self, snap_id: &SnapId) -> VolumeResult<()> {
        let _guard = self.op_lock.lock();
        let snap = self.store.get_snap(snap_id)?;
        if let Err(e) = fs::remove_file(self.snap_path(&snap.id))
            && e.kind() != std::io::ErrorKind::NotFound
        {
            return Err(e.into());
        }
        self.store.delete_snap(snap_id)
    }

    fn stats(&self, volume_id: &VolumeId) -> VolumeResult<VolumeStats> {
        self.store.get_vol(volume_id)?;
        Ok(VolumeStats {
            usage_bytes: allocated(&self.image_path(volume_id))?,
            ..Default::default()
        })
    }

    fn alerts(&self, volume_id: &VolumeId) -> VolumeResult<VolumeAlerts> {
        self.store.get_vol(volume_id)?;
        Ok(VolumeAlerts::default())
    }

    fn status(&self) -> Vec<(String, String)> {
        let count = match self.store.volumes() {
            Ok(vols) => vols.len().to_string(),
            Err(e) => format!("unavailable: {e}"),
        };
        vec![
            ("root".to_string(), self.root.display().to_string()),
            ("volumes".to_string(), count),
        ]
    }

    fn shutdown(&self) {
        info!("{} shutting down", NAME);
    }
}

impl BlockDriver for BlockFileDriver {
    fn attach(&self, volume_id: &VolumeId) -> VolumeResult<String> {
        let _guard = self.op_lock.lock();
        let mut vol = self.store.get_vol(volume_id)?;
        if vol.is_attached() {
            return Ok(vol.device_path);
        }
        vol.device_path = self.image_path(volume_id).display().to_string();
        vol.state = VolumeState::Attached;
        vol.attached_on = self.node_id.clone();
        self.store.update_vol(&vol)?;
        debug!(volume_id = %volume_id, device = %vol.device_path, node = %vol.attached_on, "attached");
        Ok(vol.device_path)
    }

    fn format(&self, volume_id: &VolumeId) -> VolumeResult<()> {
        let _guard = self.op_lock.lock();
        let mut vol = self.attached_vol(volume_id)?;
        if vol.is_mounted() {
            return Err(VolumeError::VolumeMounted(volume_id.clone()));
        }
        if vol.spec.format == Filesystem::None {
            return Err(VolumeError::invalid_argument("no filesystem requested in spec"));
        }
        vol.format = vol.spec.format;
        self.store.update_vol(&vol)?;
        debug!(volume_id = %volume_id, format = %vol.format, "formatted");
        Ok(())
    }

    fn detach(&self, volume_id: &VolumeId) -> VolumeResult<()> {
        let _guard = self.op_lock.lock();
        let mut vol = self.attached_vol(volume_id)?;
        if vol.is_mounted() {
            return Err(VolumeError::VolumeMounted(volume_id.clone()));
        }
        vol.device_path.clear();
        vol.attached_on = MachineId::NONE;
        vol.state = VolumeState::Detached;
        self.store.update_vol(&vol)?;
        debug!(volume_id = %volume_id, "detached");
        Ok(())
    }
}
