//! Actuators: value endpoints that move or switch something physical.

use crate::error::{MdaError, MdaResult};
use crate::limits::LimitPair;
use crate::setting::{Setting, SettingParent};
use crate::snapshot::{ActuatorInfo, ContinuousActuatorInfo, DiscreteActuatorInfo, SettingInfo};
use crate::value::{self, EndpointOwner, Rejection, SetPoint, Value, ValueEndpoint, ValueKind};
use crate::{ActuatorId, DeviceId, SettingId};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// A discrete or continuous actuator belonging to a device.
///
/// Settings are attached with [`Actuator::with_setting`] while the driver
/// builds the device and are indexed by id when the device is assembled.
#[derive(Debug)]
pub struct Actuator {
    id: ActuatorId,
    device_id: DeviceId,
    name: String,
    unit: String,
    value: ValueEndpoint,
    settings: BTreeMap<SettingId, Setting>,
    pending: Vec<Setting>,
    device_type: Arc<str>,
}

impl Actuator {
    /// Create an actuator on device `device_id`. Settings are attached with
    /// [`Actuator::with_setting`].
    pub fn new(
        id: ActuatorId,
        device_id: DeviceId,
        name: impl Into<String>,
        unit: impl Into<String>,
        value: ValueEndpoint,
    ) -> Self {
        Self {
            id,
            device_id,
            name: name.into(),
            unit: unit.into(),
            value,
            settings: BTreeMap::new(),
            pending: Vec::new(),
            device_type: Arc::from(""),
        }
    }

    /// Attach a setting whose parent is this actuator.
    pub fn with_setting(mut self, setting: Setting) -> Self {
        self.pending.push(setting);
        self
    }

    /// Parent reference to use for settings attached to this actuator.
    pub fn setting_parent(&self) -> SettingParent {
        SettingParent::actuator(self.device_id, self.id)
    }

    /// Index pending settings and bind the owning device's type name.
    pub(crate) fn seal(&mut self, device_type: &Arc<str>) -> MdaResult<()> {
        self.device_type = Arc::clone(device_type);
        let expected = self.setting_parent();
        for mut setting in std::mem::take(&mut self.pending) {
            if setting.parent() != expected {
                return Err(MdaError::ImplementationError {
                    device_type: device_type.to_string(),
                    reason: format!(
                        "setting {} attached to actuator {} declares parent {:?}",
                        setting.id(),
                        self.id,
                        setting.parent()
                    ),
                });
            }
            setting.bind_device_type(device_type);
            let id = setting.id();
            if self.settings.insert(id, setting).is_some() {
                return Err(MdaError::ImplementationError {
                    device_type: device_type.to_string(),
                    reason: format!("actuator {} has duplicate setting id {id}", self.id),
                });
            }
        }
        Ok(())
    }

    /// Id, unique within the owning device.
    pub fn id(&self) -> ActuatorId {
        self.id
    }

    /// Id of the owning device.
    pub fn device_id(&self) -> DeviceId {
        self.device_id
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

    /// Nested settings by id.
    pub fn settings(&self) -> &BTreeMap<SettingId, Setting> {
        &self.settings
    }

    /// Look up a nested setting.
    pub fn setting(&self, setting_id: SettingId) -> MdaResult<&Setting> {
        self.settings
            .get(&setting_id)
            .ok_or(MdaError::SettingNotFound {
                device_id: self.device_id,
                setting_id,
            })
    }

    /// Snapshots of the nested settings, in id order.
    pub fn setting_infos(&self) -> Vec<SettingInfo> {
        self.settings.values().map(Setting::info).collect()
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

    /// Gate and write a new value: busy, then hard limits, then soft limits.
    pub async fn set_value(&self, candidate: impl Into<SetPoint>) -> MdaResult<()> {
        value::set_value(self, &self.value, candidate.into(), None).await
    }

    /// Like [`Actuator::set_value`], bounded by `timeout`.
    ///
    /// On timeout the hardware write keeps running and the actuator stays busy
    /// until it finishes.
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
                actuator_id = self.id,
                device_id = self.device_id,
                %limits,
                %hard,
                concern,
                "Suspicious soft limits"
            );
        }
        self.value.set_soft_limits(limits)?;
        tracing::info!(actuator_id = self.id, device_id = self.device_id, %limits, "Soft limits updated");
        Ok(())
    }

    /// Serializable snapshot of the current state.
    pub fn info(&self) -> ActuatorInfo {
        let name = self.name.clone();
        let actuator_id = self.id;
        let device_id = self.device_id;
        match &self.value {
            ValueEndpoint::Discrete(v) => ActuatorInfo::Discrete(DiscreteActuatorInfo {
                name,
                actuator_id,
                device_id,
                options: v.options().to_vec(),
                invalid_values: v.invalid_values(),
            }),
            ValueEndpoint::Continuous(v) => ActuatorInfo::Continuous(ContinuousActuatorInfo {
                name,
                actuator_id,
                device_id,
                hardware_limits: v.hard_limits(),
                software_limits: v.soft_limits(),
            }),
        }
    }
}

impl EndpointOwner for Actuator {
    fn owner_device_id(&self) -> DeviceId {
        self.device_id
    }

    fn owner_device_type(&self) -> &str {
        &self.device_type
    }

    fn limit_error(&self, rejection: Rejection, candidate: SetPoint) -> MdaError {
        let info = Box::new(self.info());
        if rejection == Rejection::HardLimit {
            MdaError::ActuatorAtHardLimit { info, candidate }
        } else {
            MdaError::ActuatorAtSoftLimit { info, candidate }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::busy::BusyGuard;
    use crate::value::{ContinuousHardware, DiscreteHardware};
    use async_trait::async_trait;
    use crate::error::Operation;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;
    use tracing_test::traced_test;

    #[derive(Default)]
    struct Stage {
        position: Mutex<f64>,
        writes: AtomicUsize,
    }

    #[async_trait]
    impl ContinuousHardware for Stage {
        async fn read(&self) -> anyhow::Result<f64> {
            Ok(*self.position.lock())
        }

        async fn write(&self, value: f64) -> anyhow::Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            *self.position.lock() = value;
            Ok(())
        }
    }

    /// Reads block until released; writes go straight through.
    #[derive(Default)]
    struct GatedStage {
        release: Notify,
        position: Mutex<f64>,
    }

    #[async_trait]
    impl ContinuousHardware for GatedStage {
        async fn read(&self) -> anyhow::Result<f64> {
            self.release.notified().await;
            Ok(*self.position.lock())
        }

        async fn write(&self, value: f64) -> anyhow::Result<()> {
            *self.position.lock() = value;
            Ok(())
        }
    }

    struct Shutter(AtomicUsize);

    #[async_trait]
    impl DiscreteHardware for Shutter {
        async fn read_index(&self) -> anyhow::Result<usize> {
            Ok(self.0.load(Ordering::SeqCst))
        }

        async fn write_index(&self, index: usize) -> anyhow::Result<()> {
            self.0.store(index, Ordering::SeqCst);
            Ok(())
        }
    }

    fn stage() -> (Actuator, Arc<Stage>) {
        let hw = Arc::new(Stage::default());
        let actuator = Actuator::new(
            1,
            1,
            "Position",
            "mm",
            ValueEndpoint::continuous(LimitPair::bounded(0.0, 1000.0), hw.clone(), BusyGuard::new()),
        );
        (actuator, hw)
    }

    #[tokio::test]
    async fn test_continuous_soft_then_hard_scenario() {
        let (actuator, hw) = stage();
        assert_eq!(actuator.soft_limits().unwrap(), LimitPair::unbounded());

        actuator.set_value(500.0).await.unwrap();
        assert_eq!(actuator.get_value().await.unwrap(), Value::Continuous(500.0));

        actuator
            .set_soft_limits(LimitPair::bounded(0.0, 100.0))
            .unwrap();
        let err = actuator.set_value(500.0).await.unwrap_err();
        assert!(err.is_soft_limit());
        assert_eq!(err.status_code(), 406);

        actuator.set_value(100.0).await.unwrap();
        assert_eq!(actuator.get_value().await.unwrap(), Value::Continuous(100.0));

        let err = actuator.set_value(1500.0).await.unwrap_err();
        assert!(err.is_hard_limit());
        assert_eq!(hw.writes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_suspicious_soft_limits_are_logged_not_refused() {
        let (actuator, hw) = stage();

        actuator
            .set_soft_limits(LimitPair::bounded(100.0, 0.0))
            .unwrap();
        assert!(logs_contain("inverted"));
        let err = actuator.set_value(50.0).await.unwrap_err();
        assert!(err.is_soft_limit());

        actuator
            .set_soft_limits(LimitPair::bounded(-10.0, 2000.0))
            .unwrap();
        assert!(logs_contain("beyond hard limits"));
        assert!(actuator.set_value(1500.0).await.unwrap_err().is_hard_limit());
        assert_eq!(hw.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_timed_out_read_is_abandoned() {
        let hw = Arc::new(GatedStage::default());
        let actuator = Actuator::new(
            1,
            3,
            "Position",
            "mm",
            ValueEndpoint::continuous(LimitPair::bounded(0.0, 10.0), hw.clone(), BusyGuard::new()),
        );

        let err = actuator
            .get_value_timeout(Duration::from_millis(5))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MdaError::Timeout {
                operation: Operation::GetValue,
                device_id: 3,
                ..
            }
        ));
        assert_eq!(err.status_code(), 504);

        // Reads never hold the busy guard, so the endpoint stays settable.
        assert!(actuator.is_able_to_set());
        actuator.set_value(4.0).await.unwrap();
        hw.release.notify_one();
        assert_eq!(actuator.get_value().await.unwrap(), Value::Continuous(4.0));
    }

    #[tokio::test]
    async fn test_limit_error_carries_snapshot() {
        let (actuator, _hw) = stage();
        let err = actuator.set_value(-5.0).await.unwrap_err();
        let MdaError::ActuatorAtHardLimit { info, candidate } = err else {
            panic!("expected hard-limit error");
        };
        assert_eq!(info.actuator_id(), 1);
        assert_eq!(info.device_id(), 1);
        assert_eq!(candidate, SetPoint::Value(-5.0));
    }

    #[tokio::test]
    async fn test_discrete_round_trip() {
        let actuator = Actuator::new(
            2,
            1,
            "Shutter",
            "",
            ValueEndpoint::discrete(
                ["closed", "open"],
                Arc::new(Shutter(AtomicUsize::new(0))),
                BusyGuard::new(),
            ),
        );
        assert_eq!(actuator.value_options().unwrap(), ["closed", "open"]);
        actuator.set_value(1usize).await.unwrap();
        assert_eq!(actuator.get_value().await.unwrap().as_str(), Some("open"));
        assert!(matches!(
            actuator.set_value(0.5).await,
            Err(MdaError::ValueKindMismatch { .. })
        ));
    }

    #[test]
    fn test_seal_rejects_foreign_setting() {
        let (actuator, hw) = stage();
        let foreign = Setting::new(
            1,
            SettingParent::actuator(1, 99),
            "Speed",
            "mm/s",
            ValueEndpoint::continuous(LimitPair::unbounded(), hw, BusyGuard::new()),
        );
        let mut actuator = actuator.with_setting(foreign);
        let err = actuator.seal(&Arc::from("example")).unwrap_err();
        assert!(matches!(err, MdaError::ImplementationError { .. }));
    }
}
