//! Value endpoints shared by actuators and settings.
//!
//! A value endpoint is anything holding a gettable/settable value. Two shapes
//! exist:
//!
//! - [`DiscreteValue`]: an ordered list of string options plus a set of
//!   temporarily invalid indices. The hardware speaks indices.
//! - [`ContinuousValue`]: a float with immutable hard limits and mutable soft
//!   limits.
//!
//! Drivers implement the small [`DiscreteHardware`] / [`ContinuousHardware`]
//! traits. They never receive a value directly from a caller: every write goes
//! through [`ValueEndpoint::admit`], which claims the busy guard and checks hard
//! then soft limits before a [`PendingWrite`] is handed out. The only way to
//! reach `write_index`/`write` is to commit that pending write.
//!
//! # Timeouts
//!
//! Reads bounded by a timeout are simply abandoned when the bound expires.
//! Writes are not: a timed-out write is moved onto the runtime together with its
//! busy permit and runs to completion, so the endpoint keeps reporting busy until
//! the hardware has settled.

use crate::busy::{BusyGuard, BusyPermit};
use crate::error::{MdaError, MdaResult, Operation};
use crate::limits::{check_continuous, check_discrete, LimitCheck, LimitPair};
use crate::DeviceId;
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Values and set points
// =============================================================================

/// The two endpoint shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// Indexed option list.
    Discrete,
    /// Float with limits.
    Continuous,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Discrete => write!(f, "discrete"),
            ValueKind::Continuous => write!(f, "continuous"),
        }
    }
}

/// A value read back from an endpoint: the option string for discrete
/// endpoints, the float for continuous ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Current option string.
    Discrete(String),
    /// Current float.
    Continuous(f64),
}

impl Value {
    /// Discrete or continuous.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Discrete(_) => ValueKind::Discrete,
            Value::Continuous(_) => ValueKind::Continuous,
        }
    }

    /// The option string, if this is a discrete value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Discrete(option) => Some(option),
            Value::Continuous(_) => None,
        }
    }

    /// The float, if this is a continuous value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Continuous(value) => Some(*value),
            Value::Discrete(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Discrete(option) => write!(f, "{option}"),
            Value::Continuous(value) => write!(f, "{value}"),
        }
    }
}

/// A candidate submitted to `set_value`.
///
/// Discrete endpoints take an option index. Continuous endpoints take a float;
/// they also accept an index, read as the equivalent whole number, because
/// untagged transports cannot tell `500` from `500.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SetPoint {
    /// Option index.
    Index(usize),
    /// Float candidate.
    Value(f64),
}

impl SetPoint {
    /// Discrete or continuous.
    pub fn kind(&self) -> ValueKind {
        match self {
            SetPoint::Index(_) => ValueKind::Discrete,
            SetPoint::Value(_) => ValueKind::Continuous,
        }
    }
}

impl From<usize> for SetPoint {
    fn from(index: usize) -> Self {
        SetPoint::Index(index)
    }
}

impl From<f64> for SetPoint {
    fn from(value: f64) -> Self {
        SetPoint::Value(value)
    }
}

impl fmt::Display for SetPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetPoint::Index(index) => write!(f, "index {index}"),
            SetPoint::Value(value) => write!(f, "{value}"),
        }
    }
}

// =============================================================================
// Driver-side hardware traits
// =============================================================================

/// Hardware behind a discrete endpoint.
///
/// Implementations speak option indices; the endpoint maps them onto option
/// strings and guarantees `write_index` only ever sees an admitted index.
#[async_trait]
pub trait DiscreteHardware: Send + Sync {
    /// Read the currently selected option index.
    ///
    /// Must return an index below the option count the endpoint was built
    /// with. Anything else is reported as an implementation error.
    async fn read_index(&self) -> Result<usize>;

    /// Select an option. Only called with indices that passed every check.
    async fn write_index(&self, index: usize) -> Result<()>;
}

/// Hardware behind a continuous endpoint.
#[async_trait]
pub trait ContinuousHardware: Send + Sync {
    /// Read the current value.
    async fn read(&self) -> Result<f64>;

    /// Write a value. Only called with values inside the hard and soft limits.
    async fn write(&self, value: f64) -> Result<()>;
}

// =============================================================================
// Endpoints
// =============================================================================

/// Discrete endpoint state: options, invalid indices, guard and hardware.
pub struct DiscreteValue {
    options: Vec<String>,
    invalid: Mutex<BTreeSet<usize>>,
    guard: BusyGuard,
    hardware: Arc<dyn DiscreteHardware>,
}

impl DiscreteValue {
    /// Create a discrete value over `options`, starting with every option valid.
    pub fn new<I, S>(options: I, hardware: Arc<dyn DiscreteHardware>, guard: BusyGuard) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            options: options.into_iter().map(Into::into).collect(),
            invalid: Mutex::new(BTreeSet::new()),
            guard,
            hardware,
        }
    }

    /// Option strings, by index.
    pub fn options(&self) -> &[String] {
        &self.options
    }

    /// Indices currently marked invalid, ascending.
    pub fn invalid_values(&self) -> Vec<usize> {
        self.invalid.lock().iter().copied().collect()
    }

    /// Mark an index as temporarily invalid. Idempotent.
    pub fn set_invalid_value(&self, index: usize) {
        self.invalid.lock().insert(index);
    }

    /// Clear an invalid mark. Idempotent.
    pub fn set_valid_value(&self, index: usize) {
        self.invalid.lock().remove(&index);
    }

    /// Check an option index against hard and soft limits.
    pub fn check(&self, index: usize) -> LimitCheck {
        check_discrete(index, self.options.len(), &self.invalid.lock())
    }
}

impl fmt::Debug for DiscreteValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscreteValue")
            .field("options", &self.options)
            .field("invalid", &*self.invalid.lock())
            .field("busy", &self.guard.is_busy())
            .finish_non_exhaustive()
    }
}

/// Continuous endpoint state: hard/soft limits, guard and hardware.
pub struct ContinuousValue {
    hard: LimitPair,
    soft: RwLock<LimitPair>,
    guard: BusyGuard,
    hardware: Arc<dyn ContinuousHardware>,
}

impl ContinuousValue {
    /// Build an endpoint with fixed hard limits and unrestricted soft limits.
    pub fn new(hard: LimitPair, hardware: Arc<dyn ContinuousHardware>, guard: BusyGuard) -> Self {
        Self {
            hard,
            soft: RwLock::new(LimitPair::unbounded()),
            guard,
            hardware,
        }
    }

    /// Immutable driver limits.
    pub fn hard_limits(&self) -> LimitPair {
        self.hard
    }

    /// Operator limits.
    pub fn soft_limits(&self) -> LimitPair {
        *self.soft.read()
    }

    /// Replace the soft limits. Never fails; hard limits still apply first.
    pub fn set_soft_limits(&self, limits: LimitPair) {
        *self.soft.write() = limits;
    }

    /// Check a candidate against hard, then soft limits.
    pub fn check(&self, value: f64) -> LimitCheck {
        check_continuous(value, &self.hard, &self.soft.read())
    }
}

impl fmt::Debug for ContinuousValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContinuousValue")
            .field("hard", &self.hard)
            .field("soft", &*self.soft.read())
            .field("busy", &self.guard.is_busy())
            .finish_non_exhaustive()
    }
}

/// A discrete or continuous value endpoint.
#[derive(Debug)]
pub enum ValueEndpoint {
    /// Option list endpoint.
    Discrete(DiscreteValue),
    /// Float endpoint.
    Continuous(ContinuousValue),
}

/// Why [`ValueEndpoint::admit`] refused a candidate. Checked in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The guard scope is claimed.
    Busy,
    /// Wrong set-point kind for this endpoint.
    Kind {
        /// Kind the endpoint holds.
        expected: ValueKind,
        /// Kind submitted.
        received: ValueKind,
    },
    /// Outside the hard limits or option range.
    HardLimit,
    /// Outside the soft limits or marked invalid.
    SoftLimit,
}

/// Failure of an unbounded endpoint read.
#[derive(Debug)]
pub enum ReadFailure {
    /// The driver's read failed.
    Hardware(anyhow::Error),
    /// The driver reported an option index outside the option list.
    IndexOutOfRange { index: usize, len: usize },
}

impl ValueEndpoint {
    /// Convenience constructor for a discrete endpoint.
    pub fn discrete<I, S>(options: I, hardware: Arc<dyn DiscreteHardware>, guard: BusyGuard) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ValueEndpoint::Discrete(DiscreteValue::new(options, hardware, guard))
    }

    /// Convenience constructor for a continuous endpoint.
    pub fn continuous(hard: LimitPair, hardware: Arc<dyn ContinuousHardware>, guard: BusyGuard) -> Self {
        ValueEndpoint::Continuous(ContinuousValue::new(hard, hardware, guard))
    }

    /// Discrete or continuous.
    pub fn kind(&self) -> ValueKind {
        match self {
            ValueEndpoint::Discrete(_) => ValueKind::Discrete,
            ValueEndpoint::Continuous(_) => ValueKind::Continuous,
        }
    }

    /// Busy guard scoping this endpoint.
    pub fn guard(&self) -> &BusyGuard {
        match self {
            ValueEndpoint::Discrete(v) => &v.guard,
            ValueEndpoint::Continuous(v) => &v.guard,
        }
    }

    /// True unless the endpoint's guard scope is mid-set.
    pub fn is_able_to_set(&self) -> bool {
        !self.guard().is_busy()
    }

    /// The discrete value, if this is one.
    pub fn as_discrete(&self) -> Option<&DiscreteValue> {
        match self {
            ValueEndpoint::Discrete(v) => Some(v),
            ValueEndpoint::Continuous(_) => None,
        }
    }

    /// The continuous value, if this is one.
    pub fn as_continuous(&self) -> Option<&ContinuousValue> {
        match self {
            ValueEndpoint::Continuous(v) => Some(v),
            ValueEndpoint::Discrete(_) => None,
        }
    }

    fn discrete_or_mismatch(&self) -> MdaResult<&DiscreteValue> {
        self.as_discrete().ok_or(MdaError::ValueKindMismatch {
            expected: ValueKind::Continuous,
            received: ValueKind::Discrete,
        })
    }

    fn continuous_or_mismatch(&self) -> MdaResult<&ContinuousValue> {
        self.as_continuous().ok_or(MdaError::ValueKindMismatch {
            expected: ValueKind::Discrete,
            received: ValueKind::Continuous,
        })
    }

    /// Option strings of a discrete endpoint.
    pub fn value_options(&self) -> MdaResult<&[String]> {
        Ok(self.discrete_or_mismatch()?.options())
    }

    /// Temporarily invalid option indices, sorted.
    pub fn invalid_values(&self) -> MdaResult<Vec<usize>> {
        Ok(self.discrete_or_mismatch()?.invalid_values())
    }

    /// Mark an option index as temporarily invalid.
    pub fn set_invalid_value(&self, index: usize) -> MdaResult<()> {
        self.discrete_or_mismatch()?.set_invalid_value(index);
        Ok(())
    }

    /// Clear a temporarily invalid option index.
    pub fn set_valid_value(&self, index: usize) -> MdaResult<()> {
        self.discrete_or_mismatch()?.set_valid_value(index);
        Ok(())
    }

    /// Immutable driver limits.
    pub fn hard_limits(&self) -> MdaResult<LimitPair> {
        Ok(self.continuous_or_mismatch()?.hard_limits())
    }

    /// Operator limits.
    pub fn soft_limits(&self) -> MdaResult<LimitPair> {
        Ok(self.continuous_or_mismatch()?.soft_limits())
    }

    /// Replace the operator limits.
    pub fn set_soft_limits(&self, limits: LimitPair) -> MdaResult<()> {
        self.continuous_or_mismatch()?.set_soft_limits(limits);
        Ok(())
    }

    /// Read the current value from hardware.
    pub async fn read(&self) -> std::result::Result<Value, ReadFailure> {
        match self {
            ValueEndpoint::Discrete(v) => {
                let index = v.hardware.read_index().await.map_err(ReadFailure::Hardware)?;
                v.options
                    .get(index)
                    .cloned()
                    .map(Value::Discrete)
                    .ok_or(ReadFailure::IndexOutOfRange {
                        index,
                        len: v.options.len(),
                    })
            }
            ValueEndpoint::Continuous(v) => v
                .hardware
                .read()
                .await
                .map(Value::Continuous)
                .map_err(ReadFailure::Hardware),
        }
    }

    /// Gate a candidate: busy, then kind, then hard limits, then soft limits.
    ///
    /// On success the busy scope is claimed by the returned [`PendingWrite`]
    /// and stays claimed until that write has been committed or dropped.
    pub fn admit(&self, candidate: SetPoint) -> std::result::Result<PendingWrite, Rejection> {
        let permit = self.guard().try_acquire().ok_or(Rejection::Busy)?;
        let target = match (self, candidate) {
            (ValueEndpoint::Discrete(v), SetPoint::Index(index)) => {
                limit_gate(v.check(index))?;
                WriteTarget::Discrete {
                    hardware: Arc::clone(&v.hardware),
                    index,
                }
            }
            (ValueEndpoint::Discrete(_), SetPoint::Value(_)) => {
                return Err(Rejection::Kind {
                    expected: ValueKind::Discrete,
                    received: ValueKind::Continuous,
                })
            }
            (ValueEndpoint::Continuous(v), candidate) => {
                let value = match candidate {
                    SetPoint::Value(value) => value,
                    SetPoint::Index(index) => index as f64,
                };
                limit_gate(v.check(value))?;
                WriteTarget::Continuous {
                    hardware: Arc::clone(&v.hardware),
                    value,
                }
            }
        };
        Ok(PendingWrite {
            target,
            _permit: permit,
        })
    }
}

fn limit_gate(check: LimitCheck) -> std::result::Result<(), Rejection> {
    match check {
        LimitCheck::Accepted => Ok(()),
        LimitCheck::AtHardLimit => Err(Rejection::HardLimit),
        LimitCheck::AtSoftLimit => Err(Rejection::SoftLimit),
    }
}

enum WriteTarget {
    Discrete {
        hardware: Arc<dyn DiscreteHardware>,
        index: usize,
    },
    Continuous {
        hardware: Arc<dyn ContinuousHardware>,
        value: f64,
    },
}

/// An admitted write holding the endpoint's busy permit.
pub struct PendingWrite {
    target: WriteTarget,
    _permit: BusyPermit,
}

impl PendingWrite {
    /// Perform the hardware write, then release the busy scope.
    pub async fn commit(self) -> Result<()> {
        match &self.target {
            WriteTarget::Discrete { hardware, index } => hardware.write_index(*index).await,
            WriteTarget::Continuous { hardware, value } => hardware.write(*value).await,
        }
    }
}

impl fmt::Debug for PendingWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("PendingWrite");
        match &self.target {
            WriteTarget::Discrete { index, .. } => s.field("index", index),
            WriteTarget::Continuous { value, .. } => s.field("value", value),
        };
        s.finish_non_exhaustive()
    }
}

// =============================================================================
// Role plumbing
// =============================================================================

/// Context a role supplies so endpoint failures name the right entity.
pub(crate) trait EndpointOwner {
    fn owner_device_id(&self) -> DeviceId;
    fn owner_device_type(&self) -> &str;
    /// Build the role-specific limit error for a rejected candidate.
    fn limit_error(&self, rejection: Rejection, candidate: SetPoint) -> MdaError;
}

/// Run a future with an optional bound, mapping expiry onto [`MdaError::Timeout`].
pub(crate) async fn bounded<T, F>(
    future: F,
    timeout: Option<Duration>,
    operation: Operation,
    device_id: DeviceId,
) -> MdaResult<T>
where
    F: std::future::Future<Output = MdaResult<T>>,
{
    match timeout {
        None => future.await,
        Some(limit) => tokio::time::timeout(limit, future).await.map_err(|_| {
            tracing::warn!(device_id, %operation, ?limit, "Operation timed out");
            MdaError::Timeout {
                operation,
                device_id,
                timeout: limit,
            }
        })?,
    }
}

/// Await a spawned task under an optional bound. On expiry the task is left
/// running; whatever it owns (typically a busy permit) stays alive until it
/// finishes.
pub(crate) async fn detached<T>(
    future: impl std::future::Future<Output = Result<T>> + Send + 'static,
    timeout: Option<Duration>,
    operation: Operation,
    device_id: DeviceId,
) -> MdaResult<Result<T>>
where
    T: Send + 'static,
{
    let Some(limit) = timeout else {
        return Ok(future.await);
    };
    let handle = tokio::spawn(future);
    match tokio::time::timeout(limit, handle).await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(join)) => Ok(Err(anyhow::anyhow!("{operation} task failed: {join}"))),
        Err(_) => {
            tracing::warn!(
                device_id,
                %operation,
                ?limit,
                "Operation timed out; hardware call continues in the background"
            );
            Err(MdaError::Timeout {
                operation,
                device_id,
                timeout: limit,
            })
        }
    }
}

pub(crate) async fn get_value<O: EndpointOwner>(
    owner: &O,
    endpoint: &ValueEndpoint,
    timeout: Option<Duration>,
) -> MdaResult<Value> {
    let device_id = owner.owner_device_id();
    let read = async {
        endpoint.read().await.map_err(|failure| match failure {
            ReadFailure::Hardware(err) => MdaError::hardware(device_id, &err),
            ReadFailure::IndexOutOfRange { index, len } => MdaError::ImplementationError {
                device_type: owner.owner_device_type().to_string(),
                reason: format!(
                    "device {device_id} reported option index {index} but only {len} options exist"
                ),
            },
        })
    };
    bounded(read, timeout, Operation::GetValue, device_id).await
}

pub(crate) async fn set_value<O: EndpointOwner>(
    owner: &O,
    endpoint: &ValueEndpoint,
    candidate: SetPoint,
    timeout: Option<Duration>,
) -> MdaResult<()> {
    let device_id = owner.owner_device_id();
    let pending = endpoint.admit(candidate).map_err(|rejection| match rejection {
        Rejection::Busy => MdaError::IsBusy { device_id },
        Rejection::Kind { expected, received } => MdaError::ValueKindMismatch { expected, received },
        Rejection::HardLimit | Rejection::SoftLimit => owner.limit_error(rejection, candidate),
    })?;
    tracing::debug!(device_id, %candidate, "Writing set point");
    detached(pending.commit(), timeout, Operation::SetValue, device_id)
        .await?
        .map_err(|err| MdaError::hardware(device_id, &err))
}
