//! The device aggregate: connection lifecycle plus its child maps.

use crate::actuator::Actuator;
use crate::detector::Detector;
use crate::driver::{DeviceComponents, DeviceDriver};
use crate::error::{MdaError, MdaResult};
use crate::setting::{Setting, SettingParent};
use crate::snapshot::{ActuatorInfo, DetectorInfo, SettingInfo};
use crate::value::ValueKind;
use crate::{ActuatorId, DetectorId, DeviceId, SettingId};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// A live device built from a driver's [`DeviceComponents`].
///
/// Child maps are fixed once the device is assembled. Only the connection
/// state changes afterwards, and only through [`Device::connect`] and
/// [`Device::disconnect`].
pub struct Device {
    id: DeviceId,
    device_type: Arc<str>,
    driver: Box<dyn DeviceDriver>,
    actuators: BTreeMap<ActuatorId, Arc<Actuator>>,
    detectors: BTreeMap<DetectorId, Arc<Detector>>,
    settings: BTreeMap<SettingId, Arc<Setting>>,
}

impl Device {
    /// Assemble a device, checking the child tree the driver produced.
    ///
    /// Fails with [`MdaError::ImplementationError`] when the driver is
    /// missing, when ids collide within a parent scope, when a child names a
    /// different device or parent, or when an endpoint is malformed (a discrete
    /// value without options, inverted hard limits).
    pub fn assemble(
        id: DeviceId,
        device_type: &str,
        components: DeviceComponents,
    ) -> MdaResult<Self> {
        let type_name: Arc<str> = Arc::from(device_type);
        let broken = |reason: String| MdaError::ImplementationError {
            device_type: device_type.to_string(),
            reason,
        };

        let driver = components
            .driver
            .ok_or_else(|| broken(format!("factory returned no driver for device {id}")))?;

        let mut actuators = BTreeMap::new();
        for mut actuator in components.actuators {
            if actuator.device_id() != id {
                return Err(broken(format!(
                    "actuator {} names device {} instead of {id}",
                    actuator.id(),
                    actuator.device_id()
                )));
            }
            check_endpoint(actuator.endpoint(), || format!("actuator {}", actuator.id()))
                .map_err(&broken)?;
            actuator.seal(&type_name)?;
            for setting in actuator.settings().values() {
                check_endpoint(setting.endpoint(), || {
                    format!("setting {} of actuator {}", setting.id(), actuator.id())
                })
                .map_err(&broken)?;
            }
            let actuator_id = actuator.id();
            if actuators.insert(actuator_id, Arc::new(actuator)).is_some() {
                return Err(broken(format!("duplicate actuator id {actuator_id}")));
            }
        }

        let mut detectors = BTreeMap::new();
        for mut detector in components.detectors {
            if detector.device_id() != id {
                return Err(broken(format!(
                    "detector {} names device {} instead of {id}",
                    detector.id(),
                    detector.device_id()
                )));
            }
            detector.seal(&type_name)?;
            for setting in detector.settings().values() {
                check_endpoint(setting.endpoint(), || {
                    format!("setting {} of detector {}", setting.id(), detector.id())
                })
                .map_err(&broken)?;
            }
            let detector_id = detector.id();
            if detectors.insert(detector_id, Arc::new(detector)).is_some() {
                return Err(broken(format!("duplicate detector id {detector_id}")));
            }
        }

        let mut settings = BTreeMap::new();
        for mut setting in components.settings {
            if setting.parent() != SettingParent::device(id) {
                return Err(broken(format!(
                    "device-level setting {} declares parent {:?}",
                    setting.id(),
                    setting.parent()
                )));
            }
            check_endpoint(setting.endpoint(), || format!("setting {}", setting.id()))
                .map_err(&broken)?;
            setting.bind_device_type(&type_name);
            let setting_id = setting.id();
            if settings.insert(setting_id, Arc::new(setting)).is_some() {
                return Err(broken(format!("duplicate setting id {setting_id}")));
            }
        }

        Ok(Self {
            id,
            device_type: type_name,
            driver,
            actuators,
            detectors,
            settings,
        })
    }

    /// Id, unique across the instance set.
    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Kind name this device was built from.
    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    /// Open the hardware connection.
    ///
    /// Returns `Ok(true)` or [`MdaError::ConnectFailed`]; a driver reporting
    /// `false` without an error is a failure too.
    pub fn connect(&self) -> MdaResult<bool> {
        let outcome = self.driver.connect();
        self.lifecycle_result(outcome, "connect", |device_type, device_id, reason| {
            MdaError::ConnectFailed {
                device_type,
                device_id,
                reason,
            }
        })
    }

    /// Close the hardware connection; symmetric with [`Device::connect`].
    pub fn disconnect(&self) -> MdaResult<bool> {
        let outcome = self.driver.disconnect();
        self.lifecycle_result(outcome, "disconnect", |device_type, device_id, reason| {
            MdaError::DisconnectFailed {
                device_type,
                device_id,
                reason,
            }
        })
    }

    fn lifecycle_result(
        &self,
        outcome: anyhow::Result<bool>,
        action: &str,
        failed: impl FnOnce(String, DeviceId, String) -> MdaError,
    ) -> MdaResult<bool> {
        let reason = match outcome {
            Ok(true) => {
                info!(device_id = self.id, device_type = %self.device_type, "Device {action}ed");
                return Ok(true);
            }
            Ok(false) => format!("driver reported {action} failure"),
            Err(err) => format!("{err:#}"),
        };
        warn!(device_id = self.id, device_type = %self.device_type, %reason, "Device {action} failed");
        Err(failed(self.device_type.to_string(), self.id, reason))
    }

    /// Last known connection state.
    pub fn is_connected(&self) -> bool {
        self.driver.is_connected()
    }

    /// Actuators by id.
    pub fn actuators(&self) -> &BTreeMap<ActuatorId, Arc<Actuator>> {
        &self.actuators
    }

    /// Detectors by id.
    pub fn detectors(&self) -> &BTreeMap<DetectorId, Arc<Detector>> {
        &self.detectors
    }

    /// Device-level settings.
    pub fn settings(&self) -> &BTreeMap<SettingId, Arc<Setting>> {
        &self.settings
    }

    /// Look up an actuator, failing with `ActuatorNotFound`.
    pub fn actuator(&self, actuator_id: ActuatorId) -> MdaResult<&Arc<Actuator>> {
        self.actuators
            .get(&actuator_id)
            .ok_or(MdaError::ActuatorNotFound {
                device_id: self.id,
                actuator_id,
            })
    }

    /// Look up a detector, failing with `DetectorNotFound`.
    pub fn detector(&self, detector_id: DetectorId) -> MdaResult<&Arc<Detector>> {
        self.detectors
            .get(&detector_id)
            .ok_or(MdaError::DetectorNotFound {
                device_id: self.id,
                detector_id,
            })
    }

    /// Look up a device-level setting, failing with `SettingNotFound`.
    pub fn setting(&self, setting_id: SettingId) -> MdaResult<&Arc<Setting>> {
        self.settings
            .get(&setting_id)
            .ok_or(MdaError::SettingNotFound {
                device_id: self.id,
                setting_id,
            })
    }

    /// Snapshots of every actuator, in id order.
    pub fn actuator_infos(&self) -> Vec<ActuatorInfo> {
        self.actuators.values().map(|a| a.info()).collect()
    }

    /// Actuator snapshots restricted to one value kind.
    pub fn actuator_infos_of_kind(&self, kind: ValueKind) -> Vec<ActuatorInfo> {
        self.actuators
            .values()
            .filter(|a| a.kind() == kind)
            .map(|a| a.info())
            .collect()
    }

    /// Snapshots of every detector, in id order.
    pub fn detector_infos(&self) -> Vec<DetectorInfo> {
        self.detectors.values().map(|d| d.info()).collect()
    }

    /// Snapshots of every setting on the device: device-level first, then
    /// per actuator, then per detector, each in id order.
    pub fn setting_infos(&self) -> Vec<SettingInfo> {
        self.settings
            .values()
            .map(|s| s.info())
            .chain(self.actuators.values().flat_map(|a| a.setting_infos()))
            .chain(self.detectors.values().flat_map(|d| d.setting_infos()))
            .collect()
    }
}

fn check_endpoint(
    endpoint: &crate::value::ValueEndpoint,
    what: impl FnOnce() -> String,
) -> std::result::Result<(), String> {
    if let Some(discrete) = endpoint.as_discrete() {
        if discrete.options().is_empty() {
            return Err(format!("{} has no options", what()));
        }
    }
    if let Some(continuous) = endpoint.as_continuous() {
        if !continuous.hard_limits().is_well_formed() {
            return Err(format!(
                "{} has malformed hard limits {}",
                what(),
                continuous.hard_limits()
            ));
        }
    }
    Ok(())
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("device_type", &self.device_type)
            .field("is_connected", &self.driver.is_connected())
            .field("actuators", &self.actuators.keys().collect::<Vec<_>>())
            .field("detectors", &self.detectors.keys().collect::<Vec<_>>())
            .field("settings", &self.settings.keys().collect::<Vec<_>>())
            .finish()
    }
}
