//! Driver plugin contract.
//!
//! A driver kind is published as a [`DriverModule`]: a named unit exposing a
//! [`DeviceType`] descriptor and a [`DriverFactory`]. The registry checks both
//! are present when it discovers the module; a module missing either is
//! rejected with an implementation error and no device of that kind can ever
//! be built.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                 DriverSource (catalog / manifests)           │
//! │   yields DriverModule candidates, or load failures           │
//! └──────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     DeviceTypeRegistry                       │
//! │   name -> (DeviceType, Arc<dyn DriverFactory>)               │
//! └──────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │          DriverFactory::build(device_id, args)               │
//! │   returns DeviceComponents, assembled into a Device          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example: Implementing a Driver Factory
//!
//! ```rust,ignore
//! use mda_core::driver::{DeviceArgs, DeviceComponents, DriverFactory};
//! use futures::future::BoxFuture;
//!
//! pub struct StageFactory;
//!
//! impl DriverFactory for StageFactory {
//!     fn validate(&self, args: &DeviceArgs) -> anyhow::Result<()> {
//!         parse_args::<StageArgs>(args).map(|_| ())
//!     }
//!
//!     fn build(&self, device_id: DeviceId, args: DeviceArgs)
//!         -> BoxFuture<'static, anyhow::Result<DeviceComponents>>
//!     {
//!         Box::pin(async move {
//!             let args: StageArgs = parse_args(&args)?;
//!             let link = Arc::new(StageLink::new(&args.port));
//!             Ok(DeviceComponents::new()
//!                 .with_driver(link.clone())
//!                 .with_actuator(Actuator::new(1, device_id, "X", "mm", x_axis(link))))
//!         })
//!     }
//! }
//! ```

use crate::actuator::Actuator;
use crate::detector::Detector;
use crate::setting::Setting;
use crate::DeviceId;
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Stored constructor arguments of a device record.
pub type DeviceArgs = serde_json::Map<String, serde_json::Value>;

/// Deserialize stored constructor arguments into a driver's typed argument struct.
pub fn parse_args<T: DeserializeOwned>(args: &DeviceArgs) -> Result<T> {
    serde_json::from_value(serde_json::Value::Object(args.clone()))
        .context("constructor arguments do not match the driver")
}

// =============================================================================
// DeviceType descriptor
// =============================================================================

/// One constructor argument of a driver kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgumentSpec {
    /// Argument name as it appears in device records.
    pub name: String,
    /// One-line help shown to operators.
    pub help: String,
}

/// Descriptor of a driver kind: its name, a description and the ordered list
/// of constructor arguments with help text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceType {
    /// Kind name referenced by device records.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Constructor arguments in declaration order.
    #[serde(default)]
    pub args: Vec<ArgumentSpec>,
}

impl DeviceType {
    /// Create a descriptor without arguments.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            args: Vec::new(),
        }
    }

    /// Append a constructor argument. Order is preserved.
    pub fn with_arg(mut self, name: impl Into<String>, help: impl Into<String>) -> Self {
        self.args.push(ArgumentSpec {
            name: name.into(),
            help: help.into(),
        });
        self
    }

    /// Argument names in declaration order.
    pub fn arg_names(&self) -> impl Iterator<Item = &str> {
        self.args.iter().map(|a| a.name.as_str())
    }

    /// Check stored arguments against the declared constructor signature.
    ///
    /// Every declared argument must be present and nothing undeclared may be
    /// passed.
    pub fn check_args(&self, args: &DeviceArgs) -> std::result::Result<(), String> {
        let missing: Vec<&str> = self.arg_names().filter(|n| !args.contains_key(*n)).collect();
        let unexpected: Vec<&str> = args
            .keys()
            .map(String::as_str)
            .filter(|k| !self.args.iter().any(|a| a.name == *k))
            .collect();
        match (missing.is_empty(), unexpected.is_empty()) {
            (true, true) => Ok(()),
            (false, true) => Err(format!("missing argument(s): {}", missing.join(", "))),
            (true, false) => Err(format!("unexpected argument(s): {}", unexpected.join(", "))),
            (false, false) => Err(format!(
                "missing argument(s): {}; unexpected argument(s): {}",
                missing.join(", "),
                unexpected.join(", ")
            )),
        }
    }
}

// =============================================================================
// Device driver & components
// =============================================================================

/// Connection lifecycle of a concrete device.
///
/// Connect/disconnect are synchronous; only value reads, writes and
/// acquisitions suspend.
pub trait DeviceDriver: Send + Sync {
    /// Open the connection. `Ok(false)` is reported as a connect failure.
    fn connect(&self) -> Result<bool>;

    /// Close the connection. `Ok(false)` is reported as a disconnect failure.
    fn disconnect(&self) -> Result<bool>;

    fn is_connected(&self) -> bool;
}

impl<T: DeviceDriver + ?Sized> DeviceDriver for Arc<T> {
    fn connect(&self) -> Result<bool> {
        (**self).connect()
    }

    fn disconnect(&self) -> Result<bool> {
        (**self).disconnect()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
}

/// Parts a factory hands back for assembly into a
/// [`Device`](crate::device::Device).
///
/// ```rust,ignore
/// let components = DeviceComponents::new()
///     .with_driver(link.clone())
///     .with_actuator(position)
///     .with_detector(spectrometer)
///     .with_setting(temperature);
/// ```
#[derive(Default)]
pub struct DeviceComponents {
    /// Connection lifecycle; required.
    pub driver: Option<Box<dyn DeviceDriver>>,
    /// Actuators of the device.
    pub actuators: Vec<Actuator>,
    /// Detectors of the device.
    pub detectors: Vec<Detector>,
    /// Device-level settings.
    pub settings: Vec<Setting>,
}

impl DeviceComponents {
    /// Empty component set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection driver.
    pub fn with_driver(mut self, driver: impl DeviceDriver + 'static) -> Self {
        self.driver = Some(Box::new(driver));
        self
    }

    /// Add an actuator.
    pub fn with_actuator(mut self, actuator: Actuator) -> Self {
        self.actuators.push(actuator);
        self
    }

    /// Add a detector.
    pub fn with_detector(mut self, detector: Detector) -> Self {
        self.detectors.push(detector);
        self
    }

    /// Add a device-level setting.
    pub fn with_setting(mut self, setting: Setting) -> Self {
        self.settings.push(setting);
        self
    }
}

impl std::fmt::Debug for DeviceComponents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceComponents")
            .field("has_driver", &self.driver.is_some())
            .field("actuators", &self.actuators.len())
            .field("detectors", &self.detectors.len())
            .field("settings", &self.settings.len())
            .finish()
    }
}

// =============================================================================
// Factory & module
// =============================================================================

/// Builds devices of one driver kind.
///
/// Factories live for the program's lifetime and may be called from any task,
/// so they must not hold mutable state across builds.
pub trait DriverFactory: Send + Sync + 'static {
    /// Check stored arguments without building anything.
    fn validate(&self, args: &DeviceArgs) -> Result<()> {
        let _ = args;
        Ok(())
    }

    /// Build the parts of device `device_id` from its stored arguments.
    ///
    /// Children must name `device_id` as their device and settings must name
    /// the child they are attached to as their parent.
    fn build(&self, device_id: DeviceId, args: DeviceArgs) -> BoxFuture<'static, Result<DeviceComponents>>;
}

/// A discoverable driver kind.
///
/// Either accessor may come back empty; the registry rejects such modules.
pub trait DriverModule: Send + Sync {
    /// Name the module was loaded under (used in error reports).
    fn module_name(&self) -> &str;

    fn device_type(&self) -> Option<DeviceType>;

    fn factory(&self) -> Option<Arc<dyn DriverFactory>>;
}

/// Anything that accepts compiled driver implementations by name.
///
/// Driver crates register into it without depending on the registry crate.
pub trait FactoryRegistry {
    fn register_factory(&self, implementation: &str, factory: Arc<dyn DriverFactory>);
}
