//! Driver registry
//!
//! Maps driver names to their initializers and to the single live instance
//! bound to each name. Construct one at process start and share it by
//! reference; registry calls are rare and never on the volume I/O path, so
//! one mutex guards both tables.

use crate::driver::{DriverParams, VolumeDriver};
use crate::error::{VolumeError, VolumeResult};

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Builds a live driver from backend-defined parameters.
///
/// On failure the initializer must leave nothing allocated behind.
pub type InitFn = Arc<dyn Fn(&DriverParams) -> VolumeResult<Arc<dyn VolumeDriver>> + Send + Sync>;

#[derive(Default)]
struct Tables {
    drivers: HashMap<String, InitFn>,
    instances: HashMap<String, Arc<dyn VolumeDriver>>,
}

/// Process-wide table of driver initializers and live instances
#[derive(Default)]
pub struct DriverRegistry {
    tables: Mutex<Tables>,
}

impl DriverRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an initializer. Fails if the name is already registered.
    pub fn register<F>(&self, name: impl Into<String>, init: F) -> VolumeResult<()>
    where
        F: Fn(&DriverParams) -> VolumeResult<Arc<dyn VolumeDriver>> + Send + Sync + 'static,
    {
        let name = name.into();
        let mut tables = self.tables.lock();
        if tables.drivers.contains_key(&name) {
            return Err(VolumeError::DriverExists(name));
        }
        info!(driver = %name, "registered volume driver");
        tables.drivers.insert(name, Arc::new(init));
        Ok(())
    }

    /// Instantiate the named driver.
    ///
    /// Fails with `DriverExists` if an instance is already live and with
    /// `NotSupported` if no initializer is registered under `name`. The
    /// instance only becomes visible once its initializer has succeeded.
    pub fn new_driver(
        &self,
        name: &str,
        params: &DriverParams,
    ) -> VolumeResult<Arc<dyn VolumeDriver>> {
        let mut tables = self.tables.lock();
        if tables.instances.contains_key(name) {
            return Err(VolumeError::DriverExists(name.to_string()));
        }
        let init = tables
            .drivers
            .get(name)
            .cloned()
            .ok_or_else(|| VolumeError::not_supported(format!("driver '{name}'")))?;

        let driver = init(params).inspect_err(|e| {
            warn!(driver = %name, "driver initialization failed: {}", e);
        })?;
        tables.instances.insert(name.to_string(), driver.clone());
        info!(driver = %name, "volume driver instantiated");
        Ok(driver)
    }

    /// The live instance bound to `name`
    pub fn get(&self, name: &str) -> VolumeResult<Arc<dyn VolumeDriver>> {
        self.tables
            .lock()
            .instances
            .get(name)
            .cloned()
            .ok_or_else(|| VolumeError::DriverNotFound(name.to_string()))
    }

    /// Shut down and forget the live instance bound to `name`, freeing the
    /// name for a later [`DriverRegistry::new_driver`].
    pub fn remove(&self, name: &str) -> VolumeResult<Arc<dyn VolumeDriver>> {
        let driver = self
            .tables
            .lock()
            .instances
            .remove(name)
            .ok_or_else(|| VolumeError::DriverNotFound(name.to_string()))?;
        driver.shutdown();
        info!(driver = %name, "volume driver removed");
        Ok(driver)
    }

    /// Shut down every live instance.
    ///
    /// Instances stay in the table; the process is expected to exit after
    /// this. No ordering between instances is guaranteed, and in-flight
    /// volume operations are not waited for here.
    pub fn shutdown(&self) {
        let live: Vec<(String, Arc<dyn VolumeDriver>)> = self
            .tables
            .lock()
            .instances
            .iter()
            .map(|(name, d)| (name.clone(), d.clone()))
            .collect();
        for (name, driver) in live {
            info!(driver = %name, "shutting down volume driver");
            driver.shutdown();
        }
    }

    /// Names with a registered initializer
    #[must_use]
    pub fn registered(&self) -> Vec<String> {
        let mut names: Vec<_> = self.tables.lock().drivers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Names with a live instance
    #[must_use]
    pub fn instances(&self) -> Vec<String> {
        let mut names: Vec<_> = self.tables.lock().instances.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DriverType, ProtoDriver};
    use crate::facets::DriverBuilder;
    use openvolume_common::{
        CreateOptions, Labels, SnapId, VolumeAlerts, VolumeId, VolumeLocator, VolumeSpec,
        VolumeStats,
    };
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        shutdowns: AtomicUsize,
    }

    impl ProtoDriver for Counting {
        fn name(&self) -> &str {
            "demo"
        }
        fn driver_type(&self) -> DriverType {
            DriverType::FILE
        }
        fn create(
            &self,
            _: &VolumeLocator,
            _: &CreateOptions,
            _: &VolumeSpec,
        ) -> VolumeResult<VolumeId> {
            Ok(VolumeId::generate())
        }
        fn delete(&self, _: &VolumeId) -> VolumeResult<()> {
            Ok(())
        }
        fn mount(&self, _: &VolumeId, _: &Path) -> VolumeResult<()> {
            Ok(())
        }
        fn unmount(&self, _: &VolumeId, _: &Path) -> VolumeResult<()> {
            Ok(())
        }
        fn snapshot(&self, _: &VolumeId, _: &Labels) -> VolumeResult<SnapId> {
            Err(VolumeError::not_supported("snapshot"))
        }
        fn snap_delete(&self, _: &SnapId) -> VolumeResult<()> {
            Err(VolumeError::not_supported("snap_delete"))
        }
        fn stats(&self, _: &VolumeId) -> VolumeResult<VolumeStats> {
            Ok(VolumeStats::default())
        }
        fn alerts(&self, _: &VolumeId) -> VolumeResult<VolumeAlerts> {
            Err(VolumeError::not_supported("alerts"))
        }
        fn status(&self) -> Vec<(String, String)> {
            Vec::new()
        }
        fn shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn register_counting(registry: &DriverRegistry, name: &str) -> Arc<Counting> {
        let proto = Arc::new(Counting::default());
        let handle = proto.clone();
        registry
            .register(name, move |_params: &DriverParams| {
                Ok(DriverBuilder::new(proto.clone()).build_arc())
            })
            .unwrap();
        handle
    }

    #[test]
    fn test_register_twice_fails() {
        let registry = DriverRegistry::new();
        register_counting(&registry, "demo");
        let err = registry
            .register("demo", |_: &DriverParams| {
                Err(VolumeError::invalid_argument("unused"))
            })
            .unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(registry.registered(), vec!["demo"]);
    }

    #[test]
    fn test_new_unregistered_is_not_supported() {
        let registry = DriverRegistry::new();
        let err = registry.new_driver("demo", &DriverParams::new()).err().unwrap();
        assert!(err.is_not_supported());
        assert!(registry.instances().is_empty());
    }

    #[test]
    fn test_demo_scenario() {
        let registry = DriverRegistry::new();
        assert!(registry
            .new_driver("demo", &DriverParams::new())
            .err().unwrap()
            .is_not_supported());

        register_counting(&registry, "demo");
        let driver = registry.new_driver("demo", &DriverParams::new()).unwrap();
        let got = registry.get("demo").unwrap();
        assert!(Arc::ptr_eq(&driver, &got));

        let again = registry.new_driver("demo", &DriverParams::new()).err().unwrap();
        assert!(again.is_already_exists());
    }

    #[test]
    fn test_get_unknown_is_not_found() {
        let registry = DriverRegistry::new();
        register_counting(&registry, "demo");
        // Registered but never instantiated
        assert!(matches!(
            registry.get("demo"),
            Err(VolumeError::DriverNotFound(_))
        ));
        assert!(registry.get("nope").err().unwrap().is_not_found());
    }

    #[test]
    fn test_failed_init_leaves_name_free() {
        let registry = DriverRegistry::new();
        let attempts = Arc::new(AtomicUsize::new(0));
        let seen = attempts.clone();
        registry
            .register("flaky", move |params: &DriverParams| {
                seen.fetch_add(1, Ordering::SeqCst);
                params.required("path")?;
                Ok(DriverBuilder::new(Arc::new(Counting::default())).build_arc())
            })
            .unwrap();

        let err = registry.new_driver("flaky", &DriverParams::new()).err().unwrap();
        assert!(matches!(err, VolumeError::InvalidArgument(_)));
        assert!(registry.get("flaky").is_err());

        registry
            .new_driver("flaky", &DriverParams::new().with("path", "/x"))
            .unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_shutdown_reaches_every_instance() {
        let registry = DriverRegistry::new();
        let a = register_counting(&registry, "a");
        let b = register_counting(&registry, "b");
        registry.new_driver("a", &DriverParams::new()).unwrap();
        registry.new_driver("b", &DriverParams::new()).unwrap();

        registry.shutdown();
        assert_eq!(a.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(b.shutdowns.load(Ordering::SeqCst), 1);
        // Entries are kept
        assert_eq!(registry.instances(), vec!["a", "b"]);
    }

    #[test]
    fn test_remove_frees_the_name() {
        let registry = DriverRegistry::new();
        let proto = register_counting(&registry, "demo");
        registry.new_driver("demo", &DriverParams::new()).unwrap();

        registry.remove("demo").unwrap();
        assert_eq!(proto.shutdowns.load(Ordering::SeqCst), 1);
        assert!(registry.get("demo").err().unwrap().is_not_found());
        assert!(registry.remove("demo").err().unwrap().is_not_found());

        registry.new_driver("demo", &DriverParams::new()).unwrap();
    }
}
