//! Detectors: acquisition endpoints producing [`DataArray`]s.

use crate::busy::BusyGuard;
use crate::data::DataArray;
use crate::error::{MdaError, MdaResult, Operation};
use crate::setting::{Setting, SettingParent};
use crate::snapshot::{DetectorInfo, SettingInfo};
use crate::value;
use crate::{DetectorId, DeviceId, SettingId};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Hardware behind a detector.
#[async_trait]
pub trait DetectorHardware: Send + Sync {
    /// Perform one acquisition.
    ///
    /// The returned array must have as many coordinates as the detector's
    /// declared dimensionality.
    async fn acquire(&self) -> Result<DataArray>;
}

/// A detector belonging to a device.
pub struct Detector {
    id: DetectorId,
    device_id: DeviceId,
    name: String,
    dimensionality: usize,
    guard: BusyGuard,
    hardware: Arc<dyn DetectorHardware>,
    settings: BTreeMap<SettingId, Setting>,
    pending: Vec<Setting>,
    device_type: Arc<str>,
}

impl Detector {
    /// Create a detector producing `dimensionality`-dimensional arrays.
    pub fn new(
        id: DetectorId,
        device_id: DeviceId,
        name: impl Into<String>,
        dimensionality: usize,
        hardware: Arc<dyn DetectorHardware>,
        guard: BusyGuard,
    ) -> Self {
        Self {
            id,
            device_id,
            name: name.into(),
            dimensionality,
            guard,
            hardware,
            settings: BTreeMap::new(),
            pending: Vec::new(),
            device_type: Arc::from(""),
        }
    }

    /// Attach a setting whose parent is this detector.
    pub fn with_setting(mut self, setting: Setting) -> Self {
        self.pending.push(setting);
        self
    }

    /// Parent to use for settings of this detector.
    pub fn setting_parent(&self) -> SettingParent {
        SettingParent::detector(self.device_id, self.id)
    }

    pub(crate) fn seal(&mut self, device_type: &Arc<str>) -> MdaResult<()> {
        self.device_type = Arc::clone(device_type);
        let expected = self.setting_parent();
        for mut setting in std::mem::take(&mut self.pending) {
            if setting.parent() != expected {
                return Err(MdaError::ImplementationError {
                    device_type: device_type.to_string(),
                    reason: format!(
                        "setting {} attached to detector {} declares parent {:?}",
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
                    reason: format!("detector {} has duplicate setting id {id}", self.id),
                });
            }
        }
        Ok(())
    }

    /// Id, unique within the owning device.
    pub fn id(&self) -> DetectorId {
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

    /// Number of dimensions of every acquired array.
    pub fn dimensionality(&self) -> usize {
        self.dimensionality
    }

    /// Nested settings by id.
    pub fn settings(&self) -> &BTreeMap<SettingId, Setting> {
        &self.settings
    }

    /// Look up a detector setting.
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

    /// False while an acquisition is in flight.
    pub fn is_able_to_acquire(&self) -> bool {
        !self.guard.is_busy()
    }

    /// Acquire one array. Fails with `IsBusy` if an acquisition is running.
    pub async fn acquire(&self) -> MdaResult<DataArray> {
        self.acquire_inner(None).await
    }

    /// Like [`Detector::acquire`], bounded by `timeout`. A timed-out
    /// acquisition keeps the detector busy until the hardware returns.
    pub async fn acquire_timeout(&self, timeout: Duration) -> MdaResult<DataArray> {
        self.acquire_inner(Some(timeout)).await
    }

    async fn acquire_inner(&self, timeout: Option<Duration>) -> MdaResult<DataArray> {
        let permit = self.guard.try_acquire().ok_or(MdaError::IsBusy {
            device_id: self.device_id,
        })?;
        tracing::debug!(device_id = self.device_id, detector_id = self.id, "Acquiring");

        let hardware = Arc::clone(&self.hardware);
        let acquisition = async move {
            let result = hardware.acquire().await;
            drop(permit);
            result
        };
        let data = value::detached(acquisition, timeout, Operation::Acquire, self.device_id)
            .await?
            .map_err(|err| MdaError::hardware(self.device_id, &err))?;

        if data.ndim() != self.dimensionality {
            return Err(MdaError::ImplementationError {
                device_type: self.device_type.to_string(),
                reason: format!(
                    "detector {} on device {} declared {} dimension(s) but returned {}",
                    self.id,
                    self.device_id,
                    self.dimensionality,
                    data.ndim()
                ),
            });
        }
        Ok(data)
    }

    /// Serializable snapshot of the current state.
    pub fn info(&self) -> DetectorInfo {
        DetectorInfo {
            name: self.name.clone(),
            detector_id: self.id,
            device_id: self.device_id,
            dimensionality: self.dimensionality,
        }
    }
}

impl fmt::Debug for Detector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Detector")
            .field("id", &self.id)
            .field("device_id", &self.device_id)
            .field("name", &self.name)
            .field("dimensionality", &self.dimensionality)
            .field("busy", &self.guard.is_busy())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Coordinate;
    use tokio::sync::Notify;

    struct Photodiode;

    #[async_trait]
    impl DetectorHardware for Photodiode {
        async fn acquire(&self) -> Result<DataArray> {
            Ok(DataArray::scalar("power", "Optical power", "W", 0.25))
        }
    }

    /// Blocks until released, then returns a flat spectrum.
    struct GatedSpectrometer(Arc<Notify>);

    #[async_trait]
    impl DetectorHardware for GatedSpectrometer {
        async fn acquire(&self) -> Result<DataArray> {
            self.0.notified().await;
            Ok(DataArray::new(
                "spectrum",
                "Spectrum",
                "counts",
                vec![Coordinate::new("wavelength", "nm", vec![500.0, 600.0])],
                vec![1.0, 1.0],
            )?)
        }
    }

    #[tokio::test]
    async fn test_dimensionality_mismatch_is_implementation_error() {
        let detector = Detector::new(1, 3, "Power meter", 1, Arc::new(Photodiode), BusyGuard::new());
        let err = detector.acquire().await.unwrap_err();
        assert!(matches!(err, MdaError::ImplementationError { .. }));
        assert!(detector.is_able_to_acquire());
    }

    #[tokio::test]
    async fn test_scalar_acquire() {
        let detector = Detector::new(1, 3, "Power meter", 0, Arc::new(Photodiode), BusyGuard::new());
        let data = detector.acquire().await.unwrap();
        assert_eq!(data.get(&[]), Some(0.25));
        assert_eq!(detector.info().dimensionality, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_timed_out_acquire_stays_busy_until_hardware_returns() {
        let release = Arc::new(Notify::new());
        let detector = Detector::new(
            1,
            3,
            "Spectrometer",
            1,
            Arc::new(GatedSpectrometer(Arc::clone(&release))),
            BusyGuard::new(),
        );

        let err = detector
            .acquire_timeout(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, MdaError::Timeout { operation: Operation::Acquire, .. }));
        assert!(!detector.is_able_to_acquire());
        assert!(matches!(
            detector.acquire().await,
            Err(MdaError::IsBusy { device_id: 3 })
        ));

        release.notify_one();
        for _ in 0..100 {
            if detector.is_able_to_acquire() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(detector.is_able_to_acquire());
    }
}
