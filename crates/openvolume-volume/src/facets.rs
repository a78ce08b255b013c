//! Facet composition
//!
//! A backend declares the facets it really implements and [`DriverBuilder`]
//! wraps them into one [`VolumeDriver`]. Facets left out are served by
//! stubs that always report `NotSupported`, so callers can treat every
//! backend uniformly.

use crate::driver::{BlockDriver, DriverType, Enumerator, ProtoDriver, VolumeDriver};
use crate::error::{VolumeError, VolumeResult};
use openvolume_common::{
    CreateOptions, Labels, SnapId, Volume, VolumeAlerts, VolumeId, VolumeLocator, VolumeSnap,
    VolumeSpec, VolumeStats,
};
use std::path::Path;
use std::sync::Arc;

/// Block facet for backends without a device notion
#[derive(Debug, Default, Clone, Copy)]
pub struct BlockNotSupported;

impl BlockDriver for BlockNotSupported {
    fn attach(&self, _volume_id: &VolumeId) -> VolumeResult<String> {
        Err(VolumeError::not_supported("attach"))
    }

    fn format(&self, _volume_id: &VolumeId) -> VolumeResult<()> {
        Err(VolumeError::not_supported("format"))
    }

    fn detach(&self, _volume_id: &VolumeId) -> VolumeResult<()> {
        Err(VolumeError::not_supported("detach"))
    }
}

/// Enumeration facet for backends that keep no queryable records
#[derive(Debug, Default, Clone, Copy)]
pub struct EnumeratorNotSupported;

impl Enumerator for EnumeratorNotSupported {
    fn inspect(&self, _volume_ids: &[VolumeId]) -> VolumeResult<Vec<Volume>> {
        Err(VolumeError::not_supported("inspect"))
    }

    fn enumerate(&self, _locator: &VolumeLocator, _labels: &Labels) -> VolumeResult<Vec<Volume>> {
        Err(VolumeError::not_supported("enumerate"))
    }

    fn snap_inspect(&self, _snap_ids: &[SnapId]) -> VolumeResult<Vec<VolumeSnap>> {
        Err(VolumeError::not_supported("snap_inspect"))
    }

    fn snap_enumerate(
        &self,
        _volume_ids: &[VolumeId],
        _labels: &Labels,
    ) -> VolumeResult<Vec<VolumeSnap>> {
        Err(VolumeError::not_supported("snap_enumerate"))
    }
}

/// Builds a [`FacetedDriver`] from the facets a backend provides
pub struct DriverBuilder {
    proto: Arc<dyn ProtoDriver>,
    block: Option<Arc<dyn BlockDriver>>,
    enumerator: Option<Arc<dyn Enumerator>>,
}

impl DriverBuilder {
    pub fn new(proto: Arc<dyn ProtoDriver>) -> Self {
        Self {
            proto,
            block: None,
            enumerator: None,
        }
    }

    #[must_use]
    pub fn block(mut self, block: Arc<dyn BlockDriver>) -> Self {
        self.block = Some(block);
        self
    }

    #[must_use]
    pub fn enumerator(mut self, enumerator: Arc<dyn Enumerator>) -> Self {
        self.enumerator = Some(enumerator);
        self
    }

    #[must_use]
    pub fn build(self) -> FacetedDriver {
        FacetedDriver {
            proto: self.proto,
            block: self.block.unwrap_or_else(|| Arc::new(BlockNotSupported)),
            enumerator: self
                .enumerator
                .unwrap_or_else(|| Arc::new(EnumeratorNotSupported)),
        }
    }

    /// Build and erase the type, ready for the registry
    #[must_use]
    pub fn build_arc(self) -> Arc<dyn VolumeDriver> {
        Arc::new(self.build())
    }
}

/// A driver assembled from independent facets
pub struct FacetedDriver {
    proto: Arc<dyn ProtoDriver>,
    block: Arc<dyn BlockDriver>,
    enumerator: Arc<dyn Enumerator>,
}

impl ProtoDriver for FacetedDriver {
    fn name(&self) -> &str {
        self.proto.name()
    }

    fn driver_type(&self) -> DriverType {
        self.proto.driver_type()
    }

    fn create(
        &self,
        locator: &VolumeLocator,
        options: &CreateOptions,
        spec: &VolumeSpec,
    ) -> VolumeResult<VolumeId> {
        self.proto.create(locator, options, spec)
    }

    fn delete(&self, volume_id: &VolumeId) -> VolumeResult<()> {
        self.proto.delete(volume_id)
    }

    fn mount(&self, volume_id: &VolumeId, mount_path: &Path) -> VolumeResult<()> {
        self.proto.mount(volume_id, mount_path)
    }

    fn unmount(&self, volume_id: &VolumeId, mount_path: &Path) -> VolumeResult<()> {
        self.proto.unmount(volume_id, mount_path)
    }

    fn snapshot(&self, volume_id: &VolumeId, labels: &Labels) -> VolumeResult<SnapId> {
        self.proto.snapshot(volume_id, labels)
    }

    fn snap_delete(&self, snap_id: &SnapId) -> VolumeResult<()> {
        self.proto.snap_delete(snap_id)
    }

    fn stats(&self, volume_id: &VolumeId) -> VolumeResult<VolumeStats> {
        self.proto.stats(volume_id)
    }

    fn alerts(&self, volume_id: &VolumeId) -> VolumeResult<VolumeAlerts> {
        self.proto.alerts(volume_id)
    }

    fn status(&self) -> Vec<(String, String)> {
        self.proto.status()
    }

    fn shutdown(&self) {
        self.proto.shutdown();
    }
}

impl BlockDriver for FacetedDriver {
    fn attach(&self, volume_id: &VolumeId) -> VolumeResult<String> {
        self.block.attach(volume_id)
    }

    fn format(&self, volume_id: &VolumeId) -> VolumeResult<()> {
        self.block.format(volume_id)
    }

    fn detach(&self, volume_id: &VolumeId) -> VolumeResult<()> {
        self.block.detach(volume_id)
    }
}

impl Enumerator for FacetedDriver {
    fn inspect(&self, volume_ids: &[VolumeId]) -> VolumeResult<Vec<Volume>> {
        self.enumerator.inspect(volume_ids)
    }

    fn enumerate(&self, locator: &VolumeLocator, labels: &Labels) -> VolumeResult<Vec<Volume>> {
        self.enumerator.enumerate(locator, labels)
    }

    fn snap_inspect(&self, snap_ids: &[SnapId]) -> VolumeResult<Vec<VolumeSnap>> {
        self.enumerator.snap_inspect(snap_ids)
    }

    fn snap_enumerate(
        &self,
        volume_ids: &[VolumeId],
        labels: &Labels,
    ) -> VolumeResult<Vec<VolumeSnap>> {
        self.enumerator.snap_enumerate(volume_ids, labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Minimal;

    impl ProtoDriver for Minimal {
        fn name(&self) -> &str {
            "minimal"
        }

        fn driver_type(&self) -> DriverType {
            DriverType::OBJECT
        }

        fn create(
            &self,
            _locator: &VolumeLocator,
            _options: &CreateOptions,
            _spec: &VolumeSpec,
        ) -> VolumeResult<VolumeId> {
            Ok(VolumeId::new("minimal-1"))
        }

        fn delete(&self, volume_id: &VolumeId) -> VolumeResult<()> {
            Err(VolumeError::VolumeNotFound(volume_id.clone()))
        }

        fn mount(&self, _volume_id: &VolumeId, _mount_path: &Path) -> VolumeResult<()> {
            Ok(())
        }

        fn unmount(&self, _volume_id: &VolumeId, _mount_path: &Path) -> VolumeResult<()> {
            Ok(())
        }

        fn snapshot(&self, _volume_id: &VolumeId, _labels: &Labels) -> VolumeResult<SnapId> {
            Err(VolumeError::not_supported("snapshot"))
        }

        fn snap_delete(&self, _snap_id: &SnapId) -> VolumeResult<()> {
            Err(VolumeError::not_supported("snap_delete"))
        }

        fn stats(&self, _volume_id: &VolumeId) -> VolumeResult<VolumeStats> {
            Ok(VolumeStats::default())
        }

        fn alerts(&self, _volume_id: &VolumeId) -> VolumeResult<VolumeAlerts> {
            Err(VolumeError::not_supported("alerts"))
        }

        fn status(&self) -> Vec<(String, String)> {
            vec![("state".into(), "ok".into())]
        }

        fn shutdown(&self) {}
    }

    #[test]
    fn test_missing_facets_report_not_supported() {
        let driver = DriverBuilder::new(Arc::new(Minimal)).build();
        let id = VolumeId::new("v");

        assert!(driver.attach(&id).unwrap_err().is_not_supported());
        assert!(driver.format(&id).unwrap_err().is_not_supported());
        assert!(driver.detach(&id).unwrap_err().is_not_supported());
        assert!(driver.inspect(&[id.clone()]).unwrap_err().is_not_supported());
        assert!(driver
            .enumerate(&VolumeLocator::default(), &Labels::new())
            .unwrap_err()
            .is_not_supported());
        assert!(driver.snap_inspect(&[]).unwrap_err().is_not_supported());
        assert!(driver.snap_enumerate(&[], &Labels::new()).unwrap_err().is_not_supported());
    }

    #[test]
    fn test_core_calls_are_delegated() {
        let driver = DriverBuilder::new(Arc::new(Minimal)).build_arc();
        assert_eq!(driver.name(), "minimal");
        assert_eq!(driver.driver_type(), DriverType::OBJECT);
        let id = driver
            .create(
                &VolumeLocator::new("a"),
                &CreateOptions::default(),
                &VolumeSpec::default(),
            )
            .unwrap();
        assert_eq!(id.as_str(), "minimal-1");
        assert!(driver.delete(&id).unwrap_err().is_not_found());
        assert!(driver.alerts(&id).unwrap_err().is_not_supported());
        assert_eq!(driver.status().len(), 1);
    }
}
