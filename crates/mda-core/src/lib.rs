//! `mda-core`
//!
//! Device control and safety-enforcement model for laboratory instrumentation.
//!
//! This crate defines what every driver gets for free and cannot bypass:
//!
//! - [`limits`]: hard/soft limit pairs and the checks applied before a write.
//! - [`busy`]: the compare-and-swap busy guard serializing mutations.
//! - [`value`]: discrete and continuous value endpoints and the set algorithm
//!   (busy, then hard limits, then soft limits, then the driver write).
//! - [`actuator`], [`detector`], [`setting`]: the roles built on endpoints.
//! - [`device`]: the aggregate owning a driver and its children.
//! - [`driver`]: the plugin contract (descriptor, factory, module).
//! - [`snapshot`]: serializable projections of live state.
//! - [`error`]: the [`MdaError`] taxonomy and its status mapping.
//!
//! Drivers implement small async traits ([`DiscreteHardware`],
//! [`ContinuousHardware`], [`DetectorHardware`]) and a synchronous
//! [`DeviceDriver`] for the connection lifecycle. Registry and lifecycle
//! management across many devices live in `mda-hardware`.

pub mod actuator;
pub mod busy;
pub mod data;
pub mod detector;
pub mod device;
pub mod driver;
pub mod error;
pub mod limits;
pub mod setting;
pub mod snapshot;
pub mod value;

/// Numeric id of a device, unique across the instance set.
pub type DeviceId = u32;
/// Numeric id of an actuator, unique within its device.
pub type ActuatorId = u32;
/// Numeric id of a detector, unique within its device.
pub type DetectorId = u32;
/// Numeric id of a setting, unique within its parent.
pub type SettingId = u32;

pub use actuator::Actuator;
pub use busy::{BusyGuard, BusyPermit};
pub use data::{Coordinate, DataArray};
pub use detector::{Detector, DetectorHardware};
pub use device::Device;
pub use driver::{
    parse_args, ArgumentSpec, DeviceArgs, DeviceComponents, DeviceDriver, DeviceType,
    DriverFactory, DriverModule, FactoryRegistry,
};
pub use error::{ErrorCategory, MdaError, MdaResult, Operation};
pub use limits::{LimitCheck, LimitPair};
pub use setting::{Setting, SettingParent};
pub use snapshot::{ActuatorInfo, DetectorInfo, SettingInfo};
pub use value::{
    ContinuousHardware, ContinuousValue, DiscreteHardware, DiscreteValue, SetPoint, Value,
    ValueEndpoint, ValueKind,
};
