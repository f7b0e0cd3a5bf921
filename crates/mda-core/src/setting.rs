//! Settings: value endpoints owned by a device, actuator or detector.

use crate::error::{MdaError, MdaResult};
use crate::limits::LimitPair;
use crate::snapshot::{ContinuousSettingInfo, DiscreteSettingInfo, SettingInfo};
use crate::value::{self, EndpointOwner, Rejection, SetPoint, Value, ValueEndpoint, ValueKind};
use crate::{ActuatorId, DetectorId, DeviceId, SettingId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Owner of a setting. Actuator and detector parents carry their device id,
/// which snapshots report as the setting's grandparent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SettingParent {
    Device {
        device_id: DeviceId,
    },
    Actuator {
        device_id: DeviceId,
        actuator_id: ActuatorId,
    },
    Detector {
        device_id: DeviceId,
        detector_id: DetectorId,
    },
}

impl SettingParent {
    /// Setting attached to the device itself.
    pub fn device(device_id: DeviceId) -> Self {
        SettingParent::Device { device_id }
    }

    /// Setting attached to an actuator.
    pub fn actuator(device_id: DeviceId, actuator_id: ActuatorId) -> Self {
        SettingParent::Actuator {
            device_id,
            actuator_id,
        }
    }

    /// Setting attached to a detector.
    pub fn detector(device_id: DeviceId, detector_id: DetectorId) -> Self {
        SettingParent::Detector {
            device_id,
            detector_id,
        }
    }

    /// The device ultimately owning the setting.
    pub fn device_id(&self) -> DeviceId {
        match *self {
            SettingParent::Device { device_id }
            | SettingParent::Actuator { device_id, .. }
            | SettingParent::Detector { device_id, .. } => device_id,
        }
    }

    /// Id of the immediate parent.
    pub fn parent_id(&self) -> u32 {
        match *self {
            SettingParent::Device { device_id } => device_id,
            SettingParent::Actuator { actuator_id, .. } => actuator_id,
            SettingParent::Detector { detector_id, .. } => detector_id,
        }
    }

    /// The owning device id when the parent is an actuator or detector.
    pub fn grandparent_id(&self) -> Option<DeviceId> {
        match *self {
            SettingParent::Device { .. } => None,
            SettingParent::Actuator { device_id, .. } | SettingParent::Detector { device_id, .. } => {
                Some(device_id)
            }
        }
    }
}

/// A configurable value attached to a device, actuator or detector.
#[derive(Debug)]
pub struct Setting {
    id: SettingId,
    parent: SettingParent,
    name: String,
    unit: String,
    value: ValueEndpoint,
    device_type: Arc<str>,
}

impl Setting {
    /// Create a setting under `parent`.
    pub fn new(
        id: SettingId,
        parent: SettingParent,
        name: impl Into<String>,
        unit: impl Into<String>,
        value: ValueEndpoint,
    ) -> Self {
        Self {
            id,
            parent,
            name: name.into(),
            unit: unit.into(),
            value,
            device_type: Arc::from(""),
        }
    }

    /// Id, unique within the owning device.
    pub fn id(&self) -> SettingId {
        self.id
    }

    /// Where this setting hangs in the device tree.
    pub fn parent(&self) -> SettingParent {
        self.parent
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unit of the value, empty for unitless or discrete values.
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Discrete or continuous.
    pub fn kind(&self) -> ValueKind {
        self.value.kind()
    }

    /// The underlying value endpoint.
    pub fn endpoint(&self) -> &ValueEndpoint {
        &self.value
    }

    pub(crate) fn bind_device_type(&mut self, device_type: &Arc<str>) {
        self.device_type = Arc::clone(device_type);
    }

    /// False while a set is in flight anywhere in this endpoint's busy scope.
    pub fn is_able_to_set(&self) -> bool {
        self.value.is_able_to_set()
    }

    /// Read the current value from hardware.
    pub async fn get_value(&self) -> MdaResult<Value> {
        value::get_value(self, &self.value, None).await
    }

    /// Like `get_value`, bounded by `timeout`. An expired read is abandoned.
    pub async fn get_value_timeout(&self, timeout: Duration) -> MdaResult<Value> {
        value::get_value(self, &self.value, Some(timeout)).await
    }

    /// Check busy, hard limits and soft limits, then write to hardware.
    pub async fn set_value(&self, candidate: impl Into<SetPoint>) -> MdaResult<()> {
        value::set_value(self, &self.value, candidate.into(), None).await
    }

    /// Like `set_value`, bounded by `timeout`. An expired write keeps running
    /// and keeps the endpoint busy until it completes.
    pub async fn set_value_timeout(
        &self,
        candidate: impl Into<SetPoint>,
        timeout: Duration,
    ) -> MdaResult<()> {
        value::set_value(self, &self.value, candidate.into(), Some(timeout)).await
    }

    /// Option strings of a discrete value.
    pub fn value_options(&self) -> MdaResult<&[String]> {
        self.value.value_options()
    }

    /// Temporarily invalid option indices, sorted.
    pub fn invalid_values(&self) -> MdaResult<Vec<usize>> {
        self.value.invalid_values()
    }

    /// Mark an option index as temporarily invalid.
    pub fn set_invalid_value(&self, index: usize) -> MdaResult<()> {
        self.value.set_invalid_value(index)
    }

    /// Clear a temporarily invalid option index.
    pub fn set_valid_value(&self, index: usize) -> MdaResult<()> {
        self.value.set_valid_value(index)
    }

    /// Immutable limits of a continuous value.
    pub fn hard_limits(&self) -> MdaResult<LimitPair> {
        self.value.hard_limits()
    }

    /// Operator limits of a continuous value.
    pub fn soft_limits(&self) -> MdaResult<LimitPair> {
        self.value.soft_limits()
    }

    /// Replace the soft limits. Suspicious pairs are logged, never refused.
    pub fn set_soft_limits(&self, limits: LimitPair) -> MdaResult<()> {
        let hard = self.value.hard_limits()?;
        if let Some(concern) = limits.soft_limit_concern(&hard) {
            tracing::warn!(
                setting_id = self.id,
                device_id = self.parent.device_id(),
                %limits,
                %hard,
                concern,
                "Suspicious soft limits"
            );
        }
        self.value.set_soft_limits(limits)?;
        tracing::info!(
            setting_id = self.id,
            device_id = self.parent.device_id(),
            %limits,
            "Soft limits updated"
        );
        Ok(())
    }

    /// Serializable snapshot of the current state.
    pub fn info(&self) -> SettingInfo {
        let name = self.name.clone();
        let setting_id = self.id;
        let parent_id = self.parent.parent_id();
        let grandparent_id = self.parent.grandparent_id();
        match &self.value {
            ValueEndpoint::Discrete(v) => SettingInfo::Discrete(DiscreteSettingInfo {
                name,
                setting_id,
                parent_id,
                grandparent_id,
                options: v.options().to_vec(),
                invalid_values: v.invalid_values(),
            }),
            ValueEndpoint::Continuous(v) => SettingInfo::Continuous(ContinuousSettingInfo {
                name,
                setting_id,
                parent_id,
                grandparent_id,
                hard_limits: v.hard_limits(),
                soft_limits: v.soft_limits(),
            }),
        }
    }
}

impl EndpointOwner for Setting {
    fn owner_device_id(&self) -> DeviceId {
        self.parent.device_id()
    }

    fn owner_device_type(&self) -> &str {
        &self.device_type
    }

    fn limit_error(&self, rejection: Rejection, candidate: SetPoint) -> MdaError {
        let info = Box::new(self.info());
        if rejection == Rejection::HardLimit {
            MdaError::SettingAtHardLimit { info, candidate }
        } else {
            MdaError::SettingAtSoftLimit { info, candidate }
        }
    }
}
