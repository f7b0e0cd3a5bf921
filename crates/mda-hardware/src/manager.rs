//! Device instance management.
//!
//! [`DeviceInstanceManager`] turns persisted [`DeviceRecord`]s into live
//! [`Device`]s through the [`DeviceTypeRegistry`], keeps the record store's
//! connection state in step with the hardware, and runs connect/disconnect
//! across the whole instance set.
//!
//! Bulk operations never stop at the first failure. Every record or device is
//! attempted, and the failures come back together in one aggregate error.
//!
//! # Thread Safety
//!
//! Live devices sit in a `DashMap`, so lookups and per-device lifecycle calls
//! may run concurrently from any task.

use crate::record::{DeviceRecord, RecordStore};
use crate::registry::DeviceTypeRegistry;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use mda_core::{
    Actuator, ActuatorId, ActuatorInfo, Detector, DetectorId, DetectorInfo, Device, DeviceId,
    MdaError, MdaResult, Setting, SettingId, SettingInfo, ValueKind,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Owns the live devices built from device records.
pub struct DeviceInstanceManager {
    registry: Arc<DeviceTypeRegistry>,
    store: Arc<dyn RecordStore>,
    devices: DashMap<DeviceId, Arc<Device>>,
}

impl DeviceInstanceManager {
    pub fn new(registry: Arc<DeviceTypeRegistry>, store: Arc<dyn RecordStore>) -> Self {
        Self {
            registry,
            store,
            devices: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<DeviceTypeRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    // =========================================================================
    // Instantiation
    // =========================================================================

    /// Store and instantiate every record.
    ///
    /// All records are attempted. Failures are collected into
    /// [`MdaError::InstantiationFailed`]; records that failed stay in the
    /// store without a live device.
    pub async fn instantiate(
        &self,
        records: impl IntoIterator<Item = DeviceRecord>,
    ) -> MdaResult<()> {
        let mut errors = Vec::new();
        for record in records {
            let id = record.id;
            if self.devices.contains_key(&id) {
                errors.push(MdaError::DuplicateDevice(id));
                continue;
            }
            self.store.upsert(record.clone());
            if let Err(err) = self.build(record).await {
                warn!(device_id = id, error = %err, "Device instantiation failed");
                errors.push(err);
            }
        }

        if errors.is_empty() {
            info!(devices = self.devices.len(), "Device records instantiated");
            Ok(())
        } else {
            error!(failed = errors.len(), "Device instantiation finished with failures");
            Err(MdaError::InstantiationFailed(errors))
        }
    }

    /// Instantiate every record already in the store that has no live device.
    pub async fn instantiate_stored(&self) -> MdaResult<()> {
        let pending: Vec<DeviceRecord> = self
            .store
            .list()
            .into_iter()
            .filter(|record| !self.devices.contains_key(&record.id))
            .collect();
        self.instantiate(pending).await
    }

    /// Register and instantiate one new record.
    ///
    /// Fails with [`MdaError::DuplicateDevice`] if the id is taken. A record
    /// whose device cannot be built is not kept.
    pub async fn add_record(&self, record: DeviceRecord) -> MdaResult<Arc<Device>> {
        let id = record.id;
        if self.devices.contains_key(&id) || self.store.get(id).is_some() {
            return Err(MdaError::DuplicateDevice(id));
        }
        self.store.upsert(record.clone());
        match self.build(record).await {
            Ok(device) => Ok(device),
            Err(err) => {
                self.store.remove(id);
                Err(err)
            }
        }
    }

    async fn build(&self, record: DeviceRecord) -> MdaResult<Arc<Device>> {
        let entry = self.registry.resolve(&record.device_type)?;
        let broken = |reason: String| MdaError::ImplementationError {
            device_type: record.device_type.clone(),
            reason,
        };

        entry
            .device_type()
            .check_args(&record.args)
            .map_err(|reason| broken(format!("device {}: {reason}", record.id)))?;
        let factory = Arc::clone(entry.factory());
        factory
            .validate(&record.args)
            .map_err(|e| broken(format!("device {}: {e:#}", record.id)))?;
        let components = factory
            .build(record.id, record.args.clone())
            .await
            .map_err(|e| broken(format!("device {}: {e:#}", record.id)))?;
        let device = Arc::new(Device::assemble(record.id, &record.device_type, components)?);

        match self.devices.entry(record.id) {
            Entry::Occupied(_) => return Err(MdaError::DuplicateDevice(record.id)),
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&device));
            }
        }
        self.store.set_connected(record.id, device.is_connected());
        info!(
            device_id = record.id,
            name = %record.name,
            device_type = %record.device_type,
            "Device instantiated"
        );
        Ok(device)
    }

    /// Remove a device together with its record.
    ///
    /// A connected device is disconnected first; if that fails the device
    /// and its record are kept.
    pub async fn remove(&self, id: DeviceId) -> MdaResult<DeviceRecord> {
        let live = self.device(id).ok();
        if let Some(device) = live {
            if device.is_connected() {
                device.disconnect()?;
            }
            self.devices.remove(&id);
        }
        let record = self.store.remove(id).ok_or(MdaError::DeviceNotFound(id))?;
        info!(device_id = id, "Device removed");
        Ok(record)
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    pub fn connect(&self, id: DeviceId) -> MdaResult<bool> {
        let device = self.device(id)?;
        let outcome = device.connect();
        self.store.set_connected(id, device.is_connected());
        outcome
    }

    pub fn disconnect(&self, id: DeviceId) -> MdaResult<bool> {
        let device = self.device(id)?;
        let outcome = device.disconnect();
        self.store.set_connected(id, device.is_connected());
        outcome
    }

    /// Connect every live device that is not connected yet, in id order.
    pub fn connect_all(&self) -> MdaResult<()> {
        let mut errors = Vec::new();
        for device in self.sorted_devices() {
            if device.is_connected() {
                debug!(device_id = device.id(), "Device already connected");
                continue;
            }
            if let Err(err) = self.connect(device.id()) {
                errors.push(err);
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            error!(failed = errors.len(), "Connect-all finished with failures");
            Err(MdaError::ConnectAllFailed(errors))
        }
    }

    /// Disconnect every live device, in id order.
    ///
    /// One failing device does not stop the loop; every record gets the
    /// device's actual connection state afterwards.
    pub fn disconnect_all(&self) -> MdaResult<()> {
        let mut errors = Vec::new();
        for device in self.sorted_devices() {
            if let Err(err) = self.disconnect(device.id()) {
                errors.push(err);
            }
        }
        if errors.is_empty() {
            info!(devices = self.devices.len(), "All devices disconnected");
            Ok(())
        } else {
            error!(failed = errors.len(), "Disconnect-all finished with failures");
            Err(MdaError::DisconnectAllFailed(errors))
        }
    }

    fn sorted_devices(&self) -> Vec<Arc<Device>> {
        let mut devices: Vec<Arc<Device>> = self
            .devices
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        devices.sort_by_key(|device| device.id());
        devices
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    pub fn device(&self, id: DeviceId) -> MdaResult<Arc<Device>> {
        self.devices
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(MdaError::DeviceNotFound(id))
    }

    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.sorted_devices()
    }

    pub fn actuator(&self, device_id: DeviceId, actuator_id: ActuatorId) -> MdaResult<Arc<Actuator>> {
        self.device(device_id)?.actuator(actuator_id).cloned()
    }

    pub fn detector(&self, device_id: DeviceId, detector_id: DetectorId) -> MdaResult<Arc<Detector>> {
        self.device(device_id)?.detector(detector_id).cloned()
    }

    /// Device-level setting lookup.
    pub fn setting(&self, device_id: DeviceId, setting_id: SettingId) -> MdaResult<Arc<Setting>> {
        self.device(device_id)?.setting(setting_id).cloned()
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Every stored record, in id order.
    pub fn records(&self) -> Vec<DeviceRecord> {
        self.store.list()
    }

    pub fn discrete_actuator_infos(&self) -> Vec<ActuatorInfo> {
        self.actuator_infos_of_kind(ValueKind::Discrete)
    }

    pub fn continuous_actuator_infos(&self) -> Vec<ActuatorInfo> {
        self.actuator_infos_of_kind(ValueKind::Continuous)
    }

    fn actuator_infos_of_kind(&self, kind: ValueKind) -> Vec<ActuatorInfo> {
        self.sorted_devices()
            .iter()
            .flat_map(|device| device.actuator_infos_of_kind(kind))
            .collect()
    }

    pub fn detector_infos(&self) -> Vec<DetectorInfo> {
        self.sorted_devices()
            .iter()
            .flat_map(|device| device.detector_infos())
            .collect()
    }

    /// Setting snapshots of one device.
    pub fn setting_infos(&self, device_id: DeviceId) -> MdaResult<Vec<SettingInfo>> {
        Ok(self.device(device_id)?.setting_infos())
    }
}

impl std::fmt::Debug for DeviceInstanceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<DeviceId> = self.devices.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        f.debug_struct("DeviceInstanceManager")
            .field("device_types", &self.registry.len())
            .field("devices", &ids)
            .finish()
    }
}
