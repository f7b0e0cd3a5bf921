//! Simulated Device Drivers for fastmda
//!
//! This crate provides simulated hardware for testing without physical devices.
//! All simulated I/O uses async-safe delays (`tokio::time::sleep`).
//!
//! # Available Drivers
//!
//! - [`ExampleModule`] / [`ExampleFactory`] - kind `example`: a stage axis, a
//!   power switch and a spectrometer behind a simulated serial link
//! - [`BrokenModule`] - kind `broken`: publishes a descriptor but no factory
//!
//! # Modes
//!
//! [`MockMode::Instant`] has no delays, [`MockMode::Realistic`] adds
//! hardware-like timing, [`MockMode::Chaos`] also injects random failures.
//!
//! # Registration
//!
//! ```rust,ignore
//! use mda_hardware::{DeviceTypeRegistry, StaticDriverSource};
//!
//! let mut registry = DeviceTypeRegistry::new();
//! registry.discover(&StaticDriverSource::new(mda_driver_mock::modules()));
//! ```

pub mod common;
mod broken;
mod example;

pub use common::{ErrorConfig, ErrorScenario, MockMode, MockRng, TimingConfig};

pub use broken::{BrokenModule, BROKEN_DEVICE_TYPE};
pub use example::{
    example_device_type, ExampleArgs, ExampleFactory, ExampleLink, ExampleModule,
    SimulatedAxis, SimulatedSelector, SimulatedSpectrometer, EXAMPLE_DEVICE_TYPE,
};

use mda_core::{DriverModule, FactoryRegistry};
use std::sync::Arc;

/// Every simulated driver module, including the deliberately broken one.
pub fn modules() -> Vec<Arc<dyn DriverModule>> {
    modules_with_mode(MockMode::Instant)
}

/// Like [`modules`], with the example device running in `mode`.
pub fn modules_with_mode(mode: MockMode) -> Vec<Arc<dyn DriverModule>> {
    vec![
        Arc::new(ExampleModule::new(ExampleFactory::new().with_mode(mode))),
        Arc::new(BrokenModule),
    ]
}

/// Register every compiled implementation under its implementation name.
///
/// Driver manifests refer to implementations by these names.
pub fn register_all(registry: &impl FactoryRegistry) {
    register_all_with_mode(registry, MockMode::Instant);
}

pub fn register_all_with_mode(registry: &impl FactoryRegistry, mode: MockMode) {
    registry.register_factory(
        EXAMPLE_DEVICE_TYPE,
        Arc::new(ExampleFactory::new().with_mode(mode)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use mda_core::DriverFactory;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Names(Mutex<Vec<String>>);

    impl FactoryRegistry for Names {
        fn register_factory(&self, implementation: &str, _factory: Arc<dyn DriverFactory>) {
            self.0.lock().push(implementation.to_string());
        }
    }

    #[test]
    fn test_register_all() {
        let names = Names::default();
        register_all(&names);
        assert_eq!(*names.0.lock(), vec!["example".to_string()]);
    }

    #[test]
    fn test_modules() {
        let modules = modules();
        assert_eq!(modules.len(), 2);
        assert!(modules.iter().all(|m| m.device_type().is_some()));
        assert_eq!(modules.iter().filter(|m| m.factory().is_some()).count(), 1);
    }
}
