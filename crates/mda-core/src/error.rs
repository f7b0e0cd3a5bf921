//! Error taxonomy for device control.
//!
//! `MdaError` is the single error type returned by every core operation. Each
//! failure mode carries structured context so callers can distinguish a busy
//! device from a limit violation, a timeout or a missing driver without
//! parsing messages.
//!
//! ## Error Categories
//!
//! - **Gating** - `IsBusy`, the `*AtHardLimit` / `*AtSoftLimit` kinds and
//!   `ValueKindMismatch`. Raised before any hardware I/O; the device state is
//!   unchanged.
//! - **Lifecycle** - `ConnectFailed`, `DisconnectFailed`.
//! - **Driver contract** - `ImplementationError`, `ModuleError`. Raised at
//!   discovery or instantiation, or when a driver returns data that breaks its
//!   declared shape.
//! - **Runtime** - `Timeout`, `Hardware`.
//! - **Lookup** - the `*NotFound` kinds and `DuplicateDevice`.
//! - **Aggregate** - `InstantiationFailed`, `ConnectAllFailed`,
//!   `DisconnectAllFailed` carry every collected failure from a bulk operation.
//!
//! [`MdaError::category`] maps each kind onto an [`ErrorCategory`] so an outer
//! transport layer can translate failures without matching every variant.

use crate::snapshot::{ActuatorInfo, SettingInfo};
use crate::value::{SetPoint, ValueKind};
use crate::{ActuatorId, DetectorId, DeviceId, SettingId};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using [`MdaError`].
pub type MdaResult<T> = std::result::Result<T, MdaError>;

// =============================================================================
// Operation / Category
// =============================================================================

/// Suspending operation that can be bounded by a caller timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// `get_value` on an actuator or setting.
    GetValue,
    /// `set_value` on an actuator or setting.
    SetValue,
    /// `acquire` on a detector.
    Acquire,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Operation::GetValue => "get_value",
            Operation::SetValue => "set_value",
            Operation::Acquire => "acquire",
        };
        write!(f, "{}", label)
    }
}

/// Transport-neutral failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The resource is busy with another operation.
    Locked,
    /// The requested value violates a limit.
    NotAcceptable,
    /// The request does not fit the target (wrong value kind, bad config).
    BadRequest,
    /// A bounded operation did not finish in time.
    GatewayTimeout,
    /// The hardware behind a driver reported a failure.
    BadGateway,
    /// Driver or lifecycle failure on the server side.
    ServerFault,
    /// A looked-up entity does not exist.
    NotFound,
    /// The entity already exists.
    Conflict,
}

impl ErrorCategory {
    /// HTTP-style numeric status for this category.
    pub fn status_code(self) -> u16 {
        match self {
            ErrorCategory::Locked => 423,
            ErrorCategory::NotAcceptable => 406,
            ErrorCategory::BadRequest => 400,
            ErrorCategory::GatewayTimeout => 504,
            ErrorCategory::BadGateway => 502,
            ErrorCategory::ServerFault => 500,
            ErrorCategory::NotFound => 404,
            ErrorCategory::Conflict => 409,
        }
    }
}

// =============================================================================
// MdaError
// =============================================================================

/// Primary error type for device control.
#[derive(Error, Debug, Clone)]
pub enum MdaError {
    /// A driver could not establish its connection.
    #[error("Failed to connect {device_type} device {device_id}: {reason}")]
    ConnectFailed {
        device_type: String,
        device_id: DeviceId,
        reason: String,
    },

    /// A driver could not release its connection.
    #[error("Failed to disconnect {device_type} device {device_id}: {reason}")]
    DisconnectFailed {
        device_type: String,
        device_id: DeviceId,
        reason: String,
    },

    /// A driver does not satisfy the capability contract.
    ///
    /// Raised when a module lacks its descriptor or factory, when a factory
    /// rejects stored constructor arguments, when a built device has an
    /// inconsistent child tree, or when a driver returns data that contradicts
    /// what it declared.
    #[error("Driver '{device_type}' implementation error: {reason}")]
    ImplementationError { device_type: String, reason: String },

    /// A driver module could not be loaded at all.
    #[error("Failed to load driver module '{module}': {reason}")]
    ModuleError { module: String, reason: String },

    /// The endpoint (or its guard scope) is mid-operation.
    #[error("Device {device_id} is busy")]
    IsBusy { device_id: DeviceId },

    /// Actuator candidate outside the hard limits or option range.
    #[error("Actuator {} on device {}: {candidate} is outside the hard limits", .info.actuator_id(), .info.device_id())]
    ActuatorAtHardLimit {
        info: Box<ActuatorInfo>,
        candidate: SetPoint,
    },

    /// Actuator candidate outside the soft limits or marked invalid.
    #[error("Actuator {} on device {}: {candidate} is outside the soft limits", .info.actuator_id(), .info.device_id())]
    ActuatorAtSoftLimit {
        info: Box<ActuatorInfo>,
        candidate: SetPoint,
    },

    /// Setting candidate outside the hard limits or option range.
    #[error("Setting {} (parent {}): {candidate} is outside the hard limits", .info.setting_id(), .info.parent_id())]
    SettingAtHardLimit {
        info: Box<SettingInfo>,
        candidate: SetPoint,
    },

    /// Setting candidate outside the soft limits or marked invalid.
    #[error("Setting {} (parent {}): {candidate} is outside the soft limits", .info.setting_id(), .info.parent_id())]
    SettingAtSoftLimit {
        info: Box<SettingInfo>,
        candidate: SetPoint,
    },

    /// A caller-bounded operation exceeded its timeout.
    #[error("{operation} on device {device_id} timed out after {timeout:?}")]
    Timeout {
        operation: Operation,
        device_id: DeviceId,
        timeout: Duration,
    },

    /// Raw driver I/O failure.
    #[error("Hardware error on device {device_id}: {message}")]
    Hardware { device_id: DeviceId, message: String },

    /// A set point of the wrong kind was submitted to an endpoint.
    #[error("Expected a {expected} value, received {received}")]
    ValueKindMismatch {
        expected: ValueKind,
        received: ValueKind,
    },

    #[error("Device {0} not found")]
    DeviceNotFound(DeviceId),

    #[error("Actuator {actuator_id} not found on device {device_id}")]
    ActuatorNotFound {
        device_id: DeviceId,
        actuator_id: ActuatorId,
    },

    #[error("Detector {detector_id} not found on device {device_id}")]
    DetectorNotFound {
        device_id: DeviceId,
        detector_id: DetectorId,
    },

    #[error("Setting {setting_id} not found on device {device_id}")]
    SettingNotFound {
        device_id: DeviceId,
        setting_id: SettingId,
    },

    #[error("Device {0} already exists")]
    DuplicateDevice(DeviceId),

    /// Instantiating device records failed for one or more records.
    #[error("Instantiation failed with {} error(s): {}", .0.len(), join_errors(.0))]
    InstantiationFailed(Vec<MdaError>),

    /// Connecting every device failed for one or more devices.
    #[error("Connect-all failed with {} error(s): {}", .0.len(), join_errors(.0))]
    ConnectAllFailed(Vec<MdaError>),

    /// Disconnecting every device failed for one or more devices.
    #[error("Disconnect-all failed with {} error(s): {}", .0.len(), join_errors(.0))]
    DisconnectAllFailed(Vec<MdaError>),

    /// Configuration could not be loaded or is semantically invalid.
    #[error("Configuration error: {0}")]
    Config(String),
}

fn join_errors(errors: &[MdaError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl MdaError {
    /// Wrap a raw driver failure reported through `anyhow`.
    pub fn hardware(device_id: DeviceId, err: &anyhow::Error) -> Self {
        MdaError::Hardware {
            device_id,
            message: format!("{err:#}"),
        }
    }

    /// Transport-neutral category of this failure.
    pub fn category(&self) -> ErrorCategory {
        match self {
            MdaError::IsBusy { .. } => ErrorCategory::Locked,
            MdaError::ActuatorAtHardLimit { .. }
            | MdaError::ActuatorAtSoftLimit { .. }
            | MdaError::SettingAtHardLimit { .. }
            | MdaError::SettingAtSoftLimit { .. } => ErrorCategory::NotAcceptable,
            MdaError::ValueKindMismatch { .. } | MdaError::Config(_) => ErrorCategory::BadRequest,
            MdaError::Timeout { .. } => ErrorCategory::GatewayTimeout,
            MdaError::Hardware { .. } => ErrorCategory::BadGateway,
            MdaError::ConnectFailed { .. }
            | MdaError::DisconnectFailed { .. }
            | MdaError::ImplementationError { .. }
            | MdaError::ModuleError { .. }
            | MdaError::InstantiationFailed(_)
            | MdaError::ConnectAllFailed(_)
            | MdaError::DisconnectAllFailed(_) => ErrorCategory::ServerFault,
            MdaError::DeviceNotFound(_)
            | MdaError::ActuatorNotFound { .. }
            | MdaError::DetectorNotFound { .. }
            | MdaError::SettingNotFound { .. } => ErrorCategory::NotFound,
            MdaError::DuplicateDevice(_) => ErrorCategory::Conflict,
        }
    }

    /// Numeric status code of [`MdaError::category`].
    pub fn status_code(&self) -> u16 {
        self.category().status_code()
    }

    /// True when the caller may reasonably retry the same request later.
    ///
    /// Busy devices clear, timeouts may succeed on a second attempt, and soft
    /// limits can be changed by an operator. Hard limits never move.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MdaError::IsBusy { .. }
                | MdaError::Timeout { .. }
                | MdaError::ActuatorAtSoftLimit { .. }
                | MdaError::SettingAtSoftLimit { .. }
        )
    }

    /// True for either hard-limit kind.
    pub fn is_hard_limit(&self) -> bool {
        matches!(
            self,
            MdaError::ActuatorAtHardLimit { .. } | MdaError::SettingAtHardLimit { .. }
        )
    }

    /// True for either soft-limit kind.
    pub fn is_soft_limit(&self) -> bool {
        matches!(
            self,
            MdaError::ActuatorAtSoftLimit { .. } | MdaError::SettingAtSoftLimit { .. }
        )
    }
}
