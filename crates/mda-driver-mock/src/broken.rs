//! A driver module that publishes a descriptor but no factory.
//!
//! Discovery must reject it, and no device of kind `broken` can be built.

use mda_core::{DeviceType, DriverFactory, DriverModule};
use std::sync::Arc;

/// Kind name of the broken module.
pub const BROKEN_DEVICE_TYPE: &str = "broken";

#[derive(Debug, Clone, Copy, Default)]
pub struct BrokenModule;

impl DriverModule for BrokenModule {
    fn module_name(&self) -> &str {
        "mda_driver_mock::broken"
    }

    fn device_type(&self) -> Option<DeviceType> {
        Some(DeviceType::new(BROKEN_DEVICE_TYPE, "Driver that forgot its device factory"))
    }

    fn factory(&self) -> Option<Arc<dyn DriverFactory>> {
        None
    }
}
