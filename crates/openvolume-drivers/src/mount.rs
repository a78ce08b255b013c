//! Host mount primitives
//!
//! Backends never call the mount syscalls directly; they go through a
//! [`Mounter`] so the same driver code runs against the real kernel
//! ([`SysMounter`]) or an in-memory recorder ([`RecordingMounter`]).

use openvolume_volume::{VolumeError, VolumeResult};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Mount operations a backend may need
pub trait Mounter: Send + Sync {
    /// Bind-mount `source` onto `target`
    fn bind(&self, source: &Path, target: &Path) -> VolumeResult<()>;

    /// Mount the NFS export `export` from `server` onto `target`
    fn mount_nfs(&self, server: &str, export: &str, target: &Path) -> VolumeResult<()>;

    /// Mount the filesystem on `device` onto `target`
    fn mount_fs(&self, device: &Path, target: &Path, fstype: &str) -> VolumeResult<()>;

    fn unmount(&self, target: &Path) -> VolumeResult<()>;
}

fn mount_failed(target: &Path, reason: impl ToString) -> VolumeError {
    VolumeError::MountFailed {
        path: target.display().to_string(),
        reason: reason.to_string(),
    }
}

fn unmount_failed(target: &Path, reason: impl ToString) -> VolumeError {
    VolumeError::UnmountFailed {
        path: target.display().to_string(),
        reason: reason.to_string(),
    }
}

/// Mounts through the host kernel
#[derive(Clone, Copy, Debug, Default)]
pub struct SysMounter;

#[cfg(target_os = "linux")]
impl Mounter for SysMounter {
    fn bind(&self, source: &Path, target: &Path) -> VolumeResult<()> {
        use nix::mount::{MsFlags, mount};

        mount(
            Some(source),
            target,
            None::<&str>,
            MsFlags::MS_BIND,
            None::<&str>,
        )
        .map_err(|e| mount_failed(target, e))?;
        debug!(source = %source.display(), target = %target.display(), "bind mounted");
        Ok(())
    }

    fn mount_nfs(&self, server: &str, export: &str, target: &Path) -> VolumeResult<()> {
        use nix::mount::{MsFlags, mount};

        let source = format!(":{export}");
        let data = format!("nolock,addr={server}");
        mount(
            Some(source.as_str()),
            target,
            Some("nfs"),
            MsFlags::empty(),
            Some(data.as_str()),
        )
        .map_err(|e| mount_failed(target, e))?;
        debug!(%server, %export, target = %target.display(), "nfs export mounted");
        Ok(())
    }

    fn mount_fs(&self, device: &Path, target: &Path, fstype: &str) -> VolumeResult<()> {
        use nix::mount::{MsFlags, mount};

        if std::fs::metadata(device).is_ok_and(|m| m.is_file()) {
            return Err(mount_failed(
                target,
                format!(
                    "{} is not a block device; attach a loop device first",
                    device.display()
                ),
            ));
        }
        mount(
            Some(device),
            target,
            Some(fstype),
            MsFlags::empty(),
            None::<&str>,
        )
        .map_err(|e| mount_failed(target, e))?;
        debug!(device = %device.display(), target = %target.display(), %fstype, "filesystem mounted");
        Ok(())
    }

    fn unmount(&self, target: &Path) -> VolumeResult<()> {
        nix::mount::umount(target).map_err(|e| unmount_failed(target, e))?;
        debug!(target = %target.display(), "unmounted");
        Ok(())
    }
}

#[cfg(not(target_os = "linux"))]
impl Mounter for SysMounter {
    fn bind(&self, _source: &Path, target: &Path) -> VolumeResult<()> {
        Err(mount_failed(target, "bind mounts require Linux"))
    }

    fn mount_nfs(&self, _server: &str, _export: &str, target: &Path) -> VolumeResult<()> {
        Err(mount_failed(target, "nfs mounts require Linux"))
    }

    fn mount_fs(&self, _device: &Path, target: &Path, _fstype: &str) -> VolumeResult<()> {
        Err(mount_failed(target, "filesystem mounts require Linux"))
    }

    fn unmount(&self, target: &Path) -> VolumeResult<()> {
        Err(unmount_failed(target, "unmount requires Linux"))
    }
}

/// A mount call seen by [`RecordingMounter`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MountCall {
    Bind { source: PathBuf, target: PathBuf },
    Nfs { server: String, export: String, target: PathBuf },
    Fs { device: PathBuf, target: PathBuf, fstype: String },
    Unmount { target: PathBuf },
}

/// Records mount calls and tracks what would be mounted, without touching
/// the host. Unmounting a target that is not mounted fails like the kernel
/// would.
#[derive(Debug, Default)]
pub struct RecordingMounter {
    calls: Mutex<Vec<MountCall>>,
    mounted: Mutex<Vec<PathBuf>>,
}

impl RecordingMounter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<MountCall> {
        self.calls.lock().clone()
    }

    pub fn is_mounted(&self, target: &Path) -> bool {
        self.mounted.lock().iter().any(|t| t == target)
    }

    fn record(&self, call: MountCall, target: &Path) {
        self.calls.lock().push(call);
        self.mounted.lock().push(target.to_path_buf());
    }
}

impl Mounter for RecordingMounter {
    fn bind(&self, source: &Path, target: &Path) -> VolumeResult<()> {
        self.record(
            MountCall::Bind {
                source: source.to_path_buf(),
                target: target.to_path_buf(),
            },
            target,
        );
        Ok(())
    }

    fn mount_nfs(&self, server: &str, export: &str, target: &Path) -> VolumeResult<()> {
        self.record(
            MountCall::Nfs {
                server: server.to_string(),
                export: export.to_string(),
                target: target.to_path_buf(),
            },
            target,
        );
        Ok(())
    }

    fn mount_fs(&self, device: &Path, target: &Path, fstype: &str) -> VolumeResult<()> {
        self.record(
            MountCall::Fs {
                device: device.to_path_buf(),
                target: target.to_path_buf(),
                fstype: fstype.to_string(),
            },
            target,
        );
        Ok(())
    }

    fn unmount(&self, target: &Path) -> VolumeResult<()> {
        self.calls.lock().push(MountCall::Unmount {
            target: target.to_path_buf(),
        });
        let mut mounted = self.mounted.lock();
        match mounted.iter().rposition(|t| t == target) {
            Some(pos) => {
                mounted.remove(pos);
                Ok(())
            }
            None => Err(unmount_failed(target, "not mounted")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_tracks_mounts() {
        let m = RecordingMounter::new();
        let target = Path::new("/mnt/a");
        m.bind(Path::new("/src"), target).unwrap();
        assert!(m.is_mounted(target));

        m.unmount(target).unwrap();
        assert!(!m.is_mounted(target));
        assert!(matches!(
            m.unmount(target),
            Err(VolumeError::UnmountFailed { .. })
        ));
        assert_eq!(m.calls().len(), 3);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_sys_mount_rejects_image_file() {
        let image = tempfile::NamedTempFile::new().unwrap();
        let target = tempfile::TempDir::new().unwrap();
        let err = SysMounter
            .mount_fs(image.path(), target.path(), "ext4")
            .unwrap_err();
        match err {
            VolumeError::MountFailed { reason, .. } => {
                assert!(reason.contains("not a block device"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_recording_nfs_call() {
        let m = RecordingMounter::new();
        m.mount_nfs("10.0.0.5", "/exports/vol", Path::new("/mnt/nfs"))
            .unwrap();
        assert_eq!(
            m.calls()[0],
            MountCall::Nfs {
                server: "10.0.0.5".into(),
                export: "/exports/vol".into(),
                target: PathBuf::from("/mnt/nfs"),
            }
        );
    }
}
