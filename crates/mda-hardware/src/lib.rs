//! Device-type registry and device instance management for fastmda.
//!
//! - [`discovery`]: driver sources (compiled catalog, manifest directories).
//! - [`registry`]: the [`DeviceTypeRegistry`] populated by discovery.
//! - [`record`]: persisted device records and the [`RecordStore`] seam.
//! - [`manager`]: the [`DeviceInstanceManager`] owning live devices.
//! - [`config`]: Figment-based host configuration.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut registry = DeviceTypeRegistry::new();
//! registry
//!     .discover(&StaticDriverSource::new(mda_driver_mock::modules()))
//!     .await;
//!
//! let manager = DeviceInstanceManager::new(
//!     Arc::new(registry),
//!     Arc::new(InMemoryRecordStore::new()),
//! );
//! manager
//!     .instantiate([DeviceRecord::new(1, "Stage", "example").with_arg("com_port", "COM1")])
//!     .await?;
//! manager.connect_all()?;
//! manager.actuator(1, 1)?.set_value(500.0).await?;
//! ```

pub mod config;
pub mod discovery;
pub mod manager;
pub mod record;
pub mod registry;

pub use config::{LogFormat, MdaConfig, TimeoutConfig};
pub use discovery::{
    Candidate, DriverManifest, DriverSource, ImplementationCatalog, ManifestDirectorySource,
    StaticDriverSource,
};
pub use manager::DeviceInstanceManager;
pub use record::{DeviceRecord, InMemoryRecordStore, RecordStore};
pub use registry::{DeviceTypeRegistry, DiscoveryFailure, RegisteredDeviceType};
