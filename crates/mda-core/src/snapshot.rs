//! Serializable snapshots of actuators, detectors and settings.
//!
//! Snapshots are plain values built on demand from live state and never
//! mutated afterwards. They travel inside limit errors and are what an outer
//! transport layer hands to clients.

use crate::limits::LimitPair;
use crate::{ActuatorId, DetectorId, DeviceId, SettingId};
use serde::{Deserialize, Serialize};

/// Snapshot of a discrete actuator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscreteActuatorInfo {
    /// Display name.
    pub name: String,
    /// Actuator id within the device.
    pub actuator_id: ActuatorId,
    /// Owning device.
    pub device_id: DeviceId,
    /// Option strings, by index.
    pub options: Vec<String>,
    /// Temporarily invalid option indices.
    pub invalid_values: Vec<usize>,
}

/// Snapshot of a continuous actuator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuousActuatorInfo {
    /// Display name.
    pub name: String,
    /// Actuator id within the device.
    pub actuator_id: ActuatorId,
    /// Owning device.
    pub device_id: DeviceId,
    /// Immutable driver limits.
    pub hardware_limits: LimitPair,
    /// Operator limits.
    pub software_limits: LimitPair,
}

/// Snapshot of an actuator, tagged by value kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActuatorInfo {
    /// Option-list actuator.
    Discrete(DiscreteActuatorInfo),
    /// Float actuator.
    Continuous(ContinuousActuatorInfo),
}

impl ActuatorInfo {
    /// Display name.
    pub fn name(&self) -> &str {
        match self {
            ActuatorInfo::Discrete(i) => &i.name,
            ActuatorInfo::Continuous(i) => &i.name,
        }
    }

    /// Actuator id within the device.
    pub fn actuator_id(&self) -> ActuatorId {
        match self {
            ActuatorInfo::Discrete(i) => i.actuator_id,
            ActuatorInfo::Continuous(i) => i.actuator_id,
        }
    }

    /// Owning device.
    pub fn device_id(&self) -> DeviceId {
        match self {
            ActuatorInfo::Discrete(i) => i.device_id,
            ActuatorInfo::Continuous(i) => i.device_id,
        }
    }
}

/// Snapshot of a detector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorInfo {
    /// Display name.
    pub name: String,
    /// Detector id within the device.
    pub detector_id: DetectorId,
    /// Owning device.
    pub device_id: DeviceId,
    /// Dimensions of every acquired array.
    pub dimensionality: usize,
}

/// Snapshot of a discrete setting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscreteSettingInfo {
    /// Display name.
    pub name: String,
    /// Setting id within its parent.
    pub setting_id: SettingId,
    /// Id of the owning device, actuator or detector.
    pub parent_id: u32,
    /// Owning device id when the parent is an actuator or detector.
    pub grandparent_id: Option<DeviceId>,
    /// Option strings, by index.
    pub options: Vec<String>,
    /// Temporarily invalid option indices.
    pub invalid_values: Vec<usize>,
}

/// Snapshot of a continuous setting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuousSettingInfo {
    /// Display name.
    pub name: String,
    /// Setting id within its parent.
    pub setting_id: SettingId,
    /// Id of the device, actuator or detector owning the setting.
    pub parent_id: u32,
    /// Device id when the parent is an actuator or detector.
    pub grandparent_id: Option<DeviceId>,
    /// Immutable driver limits.
    pub hard_limits: LimitPair,
    /// Operator limits.
    pub soft_limits: LimitPair,
}

/// Snapshot of a setting, tagged by value kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SettingInfo {
    /// Option-list setting.
    Discrete(DiscreteSettingInfo),
    /// Float setting.
    Continuous(ContinuousSettingInfo),
}

impl SettingInfo {
    /// Display name.
    pub fn name(&self) -> &str {
        match self {
            SettingInfo::Discrete(i) => &i.name,
            SettingInfo::Continuous(i) => &i.name,
        }
    }

    /// Setting id within its parent.
    pub fn setting_id(&self) -> SettingId {
        match self {
            SettingInfo::Discrete(i) => i.setting_id,
            SettingInfo::Continuous(i) => i.setting_id,
        }
    }

    /// Id of the owning device, actuator or detector.
    pub fn parent_id(&self) -> u32 {
        match self {
            SettingInfo::Discrete(i) => i.parent_id,
            SettingInfo::Continuous(i) => i.parent_id,
        }
    }

    /// Device id when the parent is an actuator or detector.
    pub fn grandparent_id(&self) -> Option<DeviceId> {
        match self {
            SettingInfo::Discrete(i) => i.grandparent_id,
            SettingInfo::Continuous(i) => i.grandparent_id,
        }
    }
}
