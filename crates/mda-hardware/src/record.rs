//! Persisted device records.
//!
//! How records are stored is up to the host. The manager only needs the
//! [`RecordStore`] trait; [`InMemoryRecordStore`] backs tests and the
//! command-line host, which loads its records from configuration.

use mda_core::{DeviceArgs, DeviceId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A registered device as persisted by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: DeviceId,
    pub name: String,
    /// Kind name resolved against the device-type registry.
    pub device_type: String,
    /// Constructor arguments, matched against the kind's declared arguments.
    #[serde(default)]
    pub args: DeviceArgs,
    /// Last known connection state, written back by the manager.
    #[serde(default)]
    pub is_connected: bool,
}

impl DeviceRecord {
    pub fn new(id: DeviceId, name: impl Into<String>, device_type: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            device_type: device_type.into(),
            args: DeviceArgs::new(),
            is_connected: false,
        }
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }
}

/// Storage for device records.
pub trait RecordStore: Send + Sync {
    /// Every record, in id order.
    fn list(&self) -> Vec<DeviceRecord>;

    fn get(&self, id: DeviceId) -> Option<DeviceRecord>;

    /// Insert or replace the record with `record.id`.
    fn upsert(&self, record: DeviceRecord);

    /// Update the stored connection state. Returns `false` if no record has `id`.
    fn set_connected(&self, id: DeviceId, is_connected: bool) -> bool;

    fn remove(&self, id: DeviceId) -> Option<DeviceRecord>;
}

/// Records held in memory.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: RwLock<BTreeMap<DeviceId, DeviceRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = DeviceRecord>) -> Self {
        let store = Self::new();
        for record in records {
            store.upsert(record);
        }
        store
    }
}

impl RecordStore for InMemoryRecordStore {
    fn list(&self) -> Vec<DeviceRecord> {
        self.records.read().values().cloned().collect()
    }

    fn get(&self, id: DeviceId) -> Option<DeviceRecord> {
        self.records.read().get(&id).cloned()
    }

    fn upsert(&self, record: DeviceRecord) {
        self.records.write().insert(record.id, record);
    }

    fn set_connected(&self, id: DeviceId, is_connected: bool) -> bool {
        match self.records.write().get_mut(&id) {
            Some(record) => {
                record.is_connected = is_connected;
                true
            }
            None => false,
        }
    }

    fn remove(&self, id: DeviceId) -> Option<DeviceRecord> {
        self.records.write().remove(&id)
    }
}
