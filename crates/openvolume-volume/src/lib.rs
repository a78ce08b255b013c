//! OpenVolume volume driver layer
//!
//! This crate defines the contract every storage backend implements and
//! the registry that instantiates and tracks live drivers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │   Orchestrator      │
//! └─────────┬───────────┘
//!           │ new_driver / get
//! ┌─────────▼───────────┐
//! │   DriverRegistry    │  name → initializer, name → live instance
//! └─────────┬───────────┘
//!           │
//! ┌─────────▼───────────┐
//! │   VolumeDriver      │  ProtoDriver + BlockDriver + Enumerator
//! │   (FacetedDriver)   │
//! └─────────┬───────────┘
//!           │
//! ┌─────────▼───────────┐
//! │   VolumeStore       │  per-driver records in the kvdb
//! └─────────────────────┘
//! ```

pub mod driver;
pub mod error;
pub mod facets;
pub mod registry;
pub mod store;

pub use driver::{BlockDriver, DriverParams, DriverType, Enumerator, ProtoDriver, VolumeDriver};
pub use error::{ErrorKind, VolumeError, VolumeResult};
pub use facets::{BlockNotSupported, DriverBuilder, EnumeratorNotSupported, FacetedDriver};
pub use registry::{DriverRegistry, InitFn};
pub use store::VolumeStore;
