//! Store-backed volume and snapshot records
//!
//! [`VolumeStore`] is the persistence substrate most drivers share: it
//! keeps one JSON record per volume and per snapshot in the key-value
//! store, namespaced by driver name, and answers the [`Enumerator`]
//! queries from those records. The driver owning the namespace is its
//! only writer.

use crate::driver::Enumerator;
use crate::error::{VolumeError, VolumeResult};
use openvolume_common::{
    CreateOptions, Labels, SnapId, StateFilter, Volume, VolumeId, VolumeLocator, VolumeSnap,
    VolumeState, labels_match,
};
use openvolume_kvdb::{KvError, Kvdb};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, error, warn};

const KEY_ROOT: &str = "openvolume";

/// Volume and snapshot records for one driver
pub struct VolumeStore {
    driver: String,
    kv: Arc<dyn Kvdb>,
}

impl VolumeStore {
    pub fn new(driver: impl Into<String>, kv: Arc<dyn Kvdb>) -> Self {
        Self {
            driver: driver.into(),
            kv,
        }
    }

    fn volumes_prefix(&self) -> String {
        format!("{KEY_ROOT}/{}/volumes/", self.driver)
    }

    fn snaps_prefix(&self) -> String {
        format!("{KEY_ROOT}/{}/snaps/", self.driver)
    }

    fn volume_key(&self, id: &VolumeId) -> String {
        format!("{}{id}", self.volumes_prefix())
    }

    fn snap_key(&self, id: &SnapId) -> String {
        format!("{}{id}", self.snaps_prefix())
    }

    // ---- Volumes ----

    /// Persist a new volume record. Fails if the ID is already taken.
    pub fn create_vol(&self, vol: &Volume) -> VolumeResult<()> {
        if !vol.id.is_valid() {
            return Err(VolumeError::invalid_argument("volume ID must not be empty"));
        }
        let bytes = serde_json::to_vec(vol)?;
        match self.kv.create(&self.volume_key(&vol.id), &bytes, None) {
            Ok(_) => {
                debug!(volume_id = %vol.id, driver = %self.driver, "volume record created");
                Ok(())
            }
            Err(KvError::KeyExists(_)) => Err(VolumeError::VolumeExists(vol.id.to_string())),
            Err(e) => {
                warn!("Failed to create volume record {}: {}", vol.id, e);
                Err(e.into())
            }
        }
    }

    pub fn get_vol(&self, id: &VolumeId) -> VolumeResult<Volume> {
        self.get_record(&self.volume_key(id))
            .map_err(|e| match e {
                VolumeError::Store(KvError::KeyNotFound(_)) => {
                    VolumeError::VolumeNotFound(id.clone())
                }
                other => other,
            })
    }

    /// Overwrite an existing volume record
    pub fn update_vol(&self, vol: &Volume) -> VolumeResult<()> {
        let bytes = serde_json::to_vec(vol)?;
        self.kv
            .put(&self.volume_key(&vol.id), &bytes, None)
            .map_err(|e| {
                warn!("Failed to update volume record {}: {}", vol.id, e);
                VolumeError::from(e)
            })?;
        Ok(())
    }

    pub fn delete_vol(&self, id: &VolumeId) -> VolumeResult<()> {
        match self.kv.delete(&self.volume_key(id)) {
            Ok(_) => Ok(()),
            Err(KvError::KeyNotFound(_)) => Err(VolumeError::VolumeNotFound(id.clone())),
            Err(e) => {
                warn!("Failed to delete volume record {}: {}", id, e);
                Err(e.into())
            }
        }
    }

    /// Every volume record of this driver
    pub fn volumes(&self) -> VolumeResult<Vec<Volume>> {
        self.load_prefix(&self.volumes_prefix())
    }

    /// Volumes matching the locator and configuration labels whose state is in `filter`
    pub fn enumerate_in(
        &self,
        locator: &VolumeLocator,
        labels: &Labels,
        filter: StateFilter,
    ) -> VolumeResult<Vec<Volume>> {
        Ok(self
            .volumes()?
            .into_iter()
            .filter(|v| {
                locator.matches(&v.locator)
                    && labels_match(labels, &v.spec.config_labels)
                    && v.matches_state(filter)
            })
            .collect())
    }

    /// Live (not deleted) volumes with exactly this locator.
    ///
    /// An unnamed locator never identifies an existing volume.
    pub fn live_by_locator(&self, locator: &VolumeLocator) -> VolumeResult<Vec<Volume>> {
        if locator.name.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .volumes()?
            .into_iter()
            .filter(|v| v.state != VolumeState::Deleted && v.locator == *locator)
            .collect())
    }

    /// Apply the create policy for `locator`.
    ///
    /// Returns the ID of an existing available volume to hand back instead
    /// of creating one, `None` when a new volume should be created, or
    /// `VolumeExists` when `fail_if_exists` forbids reuse. Any available
    /// match is reused, whatever the state of the others.
    pub fn check_create(
        &self,
        locator: &VolumeLocator,
        options: &CreateOptions,
    ) -> VolumeResult<Option<VolumeId>> {
        let live = self.live_by_locator(locator)?;
        if live.is_empty() {
            return Ok(None);
        }
        if options.fail_if_exists {
            return Err(VolumeError::VolumeExists(locator.name.clone()));
        }
        let reusable = live
            .into_iter()
            .find(|v| v.state == VolumeState::Available)
            .map(|v| v.id);
        if let Some(id) = &reusable {
            debug!(volume_id = %id, name = %locator.name, "reusing existing volume");
        }
        Ok(reusable)
    }

    // ---- Snapshots ----

    pub fn create_snap(&self, snap: &VolumeSnap) -> VolumeResult<()> {
        let bytes = serde_json::to_vec(snap)?;
        match self.kv.create(&self.snap_key(&snap.id), &bytes, None) {
            Ok(_) => Ok(()),
            Err(KvError::KeyExists(_)) => Err(VolumeError::SnapshotExists(snap.id.clone())),
            Err(e) => {
                warn!("Failed to create snapshot record {}: {}", snap.id, e);
                Err(e.into())
            }
        }
    }

    pub fn get_snap(&self, id: &SnapId) -> VolumeResult<VolumeSnap> {
        self.get_record(&self.snap_key(id)).map_err(|e| match e {
            VolumeError::Store(KvError::KeyNotFound(_)) => {
                VolumeError::SnapshotNotFound(id.clone())
            }
            other => other,
        })
    }

    pub fn delete_snap(&self, id: &SnapId) -> VolumeResult<()> {
        match self.kv.delete(&self.snap_key(id)) {
            Ok(_) => Ok(()),
            Err(KvError::KeyNotFound(_)) => Err(VolumeError::SnapshotNotFound(id.clone())),
            Err(e) => {
                warn!("Failed to delete snapshot record {}: {}", id, e);
                Err(e.into())
            }
        }
    }

    pub fn snaps(&self) -> VolumeResult<Vec<VolumeSnap>> {
        self.load_prefix(&self.snaps_prefix())
    }

    /// Snapshots whose parent is `volume_id`
    pub fn snaps_of(&self, volume_id: &VolumeId) -> VolumeResult<Vec<VolumeSnap>> {
        Ok(self
            .snaps()?
            .into_iter()
            .filter(|s| s.volume_id == *volume_id)
            .collect())
    }

    // ---- Helpers ----

    fn get_record<T: DeserializeOwned>(&self, key: &str) -> VolumeResult<T> {
        let pair = self.kv.get(key).inspect_err(|e| {
            if !e.is_key_not_found() {
                warn!("Failed to read {}: {}", key, e);
            }
        })?;
        serde_json::from_slice(&pair.value).map_err(|e| {
            error!("Failed to decode record '{}': {}", key, e);
            VolumeError::from(e)
        })
    }

    fn load_prefix<T: DeserializeOwned>(&self, prefix: &str) -> VolumeResult<Vec<T>> {
        let pairs = self.kv.enumerate(prefix).inspect_err(|e| {
            warn!("Failed to enumerate {}: {}", prefix, e);
        })?;
        pairs
            .into_iter()
            .map(|pair| {
                serde_json::from_slice(&pair.value).map_err(|e| {
                    error!("Failed to decode record '{}': {}", pair.key, e);
                    VolumeError::from(e)
                })
            })
            .collect()
    }
}

impl Enumerator for VolumeStore {
    fn inspect(&self, volume_ids: &[VolumeId]) -> VolumeResult<Vec<Volume>> {
        volume_ids.iter().map(|id| self.get_vol(id)).collect()
    }

    fn enumerate(&self, locator: &VolumeLocator, labels: &Labels) -> VolumeResult<Vec<Volume>> {
        self.enumerate_in(locator, labels, StateFilter::ANY)
    }

    fn snap_inspect(&self, snap_ids: &[SnapId]) -> VolumeResult<Vec<VolumeSnap>> {
        snap_ids.iter().map(|id| self.get_snap(id)).collect()
    }

    fn snap_enumerate(
        &self,
        volume_ids: &[VolumeId],
        labels: &Labels,
    ) -> VolumeResult<Vec<VolumeSnap>> {
        Ok(self
            .snaps()?
            .into_iter()
            .filter(|s| volume_ids.is_empty() || volume_ids.contains(&s.volume_id))
            .filter(|s| labels_match(labels, &s.snap_labels))
            .collect())
    }
}
