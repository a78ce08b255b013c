//! NFS file driver
//!
//! Mounts one NFS export (or bind-mounts a local directory when no server
//! is given) under a private root at init time. Each volume is a
//! directory inside that root; mounting a volume bind-mounts its
//! directory onto the requested path. Volume records live in the
//! driver's [`VolumeStore`], which also serves enumeration.

use crate::mount::{Mounter, SysMounter};

use openvolume_common::{
    CreateOptions, Filesystem, Labels, SnapId, Volume, VolumeAlerts, VolumeId, VolumeLocator,
    VolumeSpec, VolumeState, VolumeStats, VolumeStatus,
};
use openvolume_kvdb::Kvdb;
use openvolume_volume::{
    DriverBuilder, DriverParams, DriverType, ProtoDriver, VolumeDriver, VolumeError,
    VolumeResult, VolumeStore,
};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const NAME: &str = "nfs";

/// Where the export is mounted unless `mount_root` says otherwise
pub const DEFAULT_MOUNT_ROOT: &str = "/var/lib/openvolume/nfs/";

/// Build the driver against the host kernel
pub fn init(params: &DriverParams, kv: Arc<dyn Kvdb>) -> VolumeResult<Arc<dyn VolumeDriver>> {
    init_with(params, kv, Arc::new(SysMounter))
}

/// Build the driver with an explicit mounter
pub fn init_with(
    params: &DriverParams,
    kv: Arc<dyn Kvdb>,
    mounter: Arc<dyn Mounter>,
) -> VolumeResult<Arc<dyn VolumeDriver>> {
    let driver = Arc::new(NfsDriver::new(params, kv, mounter)?);
    let store = driver.store.clone();
    Ok(DriverBuilder::new(driver).enumerator(store).build_arc())
}

pub struct NfsDriver {
    server: Option<String>,
    export: String,
    mount_root: PathBuf,
    store: Arc<VolumeStore>,
    mounter: Arc<dyn Mounter>,
    /// Serializes read-modify-write cycles on volume records
    op_lock: Mutex<()>,
}

impl NfsDriver {
    fn new(
        params: &DriverParams,
        kv: Arc<dyn Kvdb>,
        mounter: Arc<dyn Mounter>,
    ) -> VolumeResult<Self> {
        let export = params
            .get("path")
            .ok_or_else(|| VolumeError::invalid_argument("no NFS path provided"))?
            .to_string();
        let server = params.get("server").map(str::to_string);
        let mount_root = PathBuf::from(params.get("mount_root").unwrap_or(DEFAULT_MOUNT_ROOT));

        match &server {
            Some(server) => info!("NFS driver initializing with {}:{}", server, export),
            None => info!("No NFS server provided, will bind mount {}", export),
        }

        fs::create_dir_all(&mount_root)?;

        // Clear whatever a previous run left mounted here
        if let Err(e) = mounter.unmount(&mount_root) {
            debug!("Nothing to unmount at {}: {}", mount_root.display(), e);
        }

        let mounted = match &server {
            Some(server) => mounter.mount_nfs(server, &export, &mount_root),
            None => mounter.bind(Path::new(&export), &mount_root),
        };
        if let Err(e) = mounted {
            warn!(
                "Unable to mount {}:{} at {}: {}",
                server.as_deref().unwrap_or(""),
                export,
                mount_root.display(),
                e
            );
            return Err(e);
        }

        info!("NFS initialized and driver mounted at {}", mount_root.display());
        Ok(Self {
            server,
            export,
            mount_root,
            store: Arc::new(VolumeStore::new(NAME, kv)),
            mounter,
            op_lock: Mutex::new(()),
        })
    }

    fn volume_dir(&self, id: &VolumeId) -> PathBuf {
        self.mount_root.join(id.as_str())
    }
}

impl ProtoDriver for NfsDriver {
    fn name(&self) -> &str {
        NAME
    }

    fn driver_type(&self) -> DriverType {
        DriverType::FILE
    }

    fn create(
        &self,
        locator: &VolumeLocator,
        options: &CreateOptions,
        spec: &VolumeSpec,
    ) -> VolumeResult<VolumeId> {
        if !matches!(spec.format, Filesystem::Nfs | Filesystem::None) {
            return Err(VolumeError::invalid_argument(format!(
                "unsupported filesystem format: {}",
                spec.format
            )));
        }
        if options.create_from_snap.is_some() {
            return Err(VolumeError::not_supported("create from snapshot"));
        }
        if spec.block_size != 0 {
            info!("NFS driver will ignore the block size option");
        }

        let _guard = self.op_lock.lock();
        if let Some(existing) = self.store.check_create(locator, options)? {
            return Ok(existing);
        }

        let id = VolumeId::generate();
        let dir = self.volume_dir(&id);
        fs::create_dir_all(&dir).inspect_err(|e| {
            warn!("Failed to create volume directory {}: {}", dir.display(), e);
        })?;

        let mut vol = Volume::new(id.clone(), locator.clone(), spec.clone());
        vol.format = Filesystem::Nfs;
        vol.state = VolumeState::Available;
        vol.status = VolumeStatus::Up;
        vol.device_path = dir.display().to_string();

        if let Err(e) = self.store.create_vol(&vol) {
            let _ = fs::remove_dir_all(&dir);
            return Err(e);
        }
        info!(volume_id = %id, name = %locator.name, "nfs volume created");
        Ok(id)
    }

    fn delete(&self, volume_id: &VolumeId) -> VolumeResult<()> {
        let _guard = self.op_lock.lock();
        let vol = self.store.get_vol(volume_id)?;
        if vol.is_mounted() {
            return Err(VolumeError::VolumeMounted(volume_id.clone()));
        }

        if let Err(e) = fs::remove_dir_all(&vol.device_path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!("Failed to remove volume directory {}: {}", vol.device_path, e);
        }
        self.store.delete_vol(volume_id)?;
        info!(volume_id = %volume_id, "nfs volume deleted");
        Ok(())
    }

    fn mount(&self, volume_id: &VolumeId, mount_path: &Path) -> VolumeResult<()> {
        let _guard = self.op_lock.lock();
        let mut vol = self.store.get_vol(volume_id)?;
        if vol.is_mounted() {
            if Path::new(&vol.attach_path) == mount_path {
                return Ok(());
            }
            return Err(VolumeError::VolumeMounted(volume_id.clone()));
        }

        if let Err(e) = self.mounter.unmount(mount_path) {
            debug!("Nothing to unmount at {}: {}", mount_path.display(), e);
        }
        self.mounter
            .bind(Path::new(&vol.device_path), mount_path)
            .inspect_err(|e| {
                warn!(
                    "Cannot mount {} at {}: {}",
                    vol.device_path,
                    mount_path.display(),
                    e
                );
            })?;

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

    fn snapshot(&self, _volume_id: &VolumeId, _labels: &Labels) -> VolumeResult<SnapId> {
        Err(VolumeError::not_supported("snapshot"))
    }

    fn snap_delete(&self, _snap_id: &SnapId) -> VolumeResult<()> {
        Err(VolumeError::not_supported("snap_delete"))
    }

    fn stats(&self, volume_id: &VolumeId) -> VolumeResult<VolumeStats> {
        let vol = self.store.get_vol(volume_id)?;
        Ok(VolumeStats {
            usage_bytes: dir_usage(Path::new(&vol.device_path))?,
            ..Default::default()
        })
    }

    fn alerts(&self, _volume_id: &VolumeId) -> VolumeResult<VolumeAlerts> {
        Err(VolumeError::not_supported("alerts"))
    }

    fn status(&self) -> Vec<(String, String)> {
        vec![
            ("server".to_string(), self.server.clone().unwrap_or_default()),
            ("path".to_string(), self.export.clone()),
            (
                "mount_root".to_string(),
                self.mount_root.display().to_string(),
            ),
        ]
    }

    fn shutdown(&self) {
        info!("{} shutting down", NAME);
        if let Err(e) = self.mounter.unmount(&self.mount_root) {
            warn!("Failed to unmount {}: {}", self.mount_root.display(), e);
        }
    }
}

/// Total size of regular files under `dir`
fn dir_usage(dir: &Path) -> VolumeResult<u64> {
    let mut total = 0;
    let mut pending = vec![dir.to_path_buf()];
    while let Some(path) = pending.pop() {
        for entry in fs::read_dir(&path)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if meta.is_dir() {
                pending.push(entry.path());
            } else {
                total += meta.len();
            }
        }
    }
    Ok(total)
}
