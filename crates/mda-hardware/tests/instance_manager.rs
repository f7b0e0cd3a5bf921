//! End-to-end behaviour of the registry and instance manager against the
//! simulated example driver.

use mda_core::{LimitPair, MdaError, Value};
use mda_driver_mock::{
    modules, modules_with_mode, ErrorConfig, ErrorScenario, ExampleFactory, ExampleModule,
    MockMode,
};
use mda_hardware::{
    DeviceInstanceManager, DeviceRecord, DeviceTypeRegistry, InMemoryRecordStore,
    StaticDriverSource,
};
use std::sync::Arc;
use std::time::Duration;

async fn manager_with(mode: MockMode) -> DeviceInstanceManager {
    let mut registry = DeviceTypeRegistry::new();
    let errors = registry
        .discover(&StaticDriverSource::new(modules_with_mode(mode)))
        .await;
    // The broken module is always rejected.
    assert_eq!(errors.len(), 1);
    DeviceInstanceManager::new(Arc::new(registry), Arc::new(InMemoryRecordStore::new()))
}

fn example(id: u32, com_port: &str) -> DeviceRecord {
    DeviceRecord::new(id, format!("Example {id}"), "example").with_arg("com_port", com_port)
}

#[tokio::test]
async fn continuous_soft_limit_scenario() {
    let manager = manager_with(MockMode::Instant).await;
    manager.instantiate([example(1, "COM1")]).await.unwrap();
    assert!(manager.connect(1).unwrap());

    let position = manager.actuator(1, 1).unwrap();
    assert_eq!(position.hard_limits().unwrap(), LimitPair::bounded(0.0, 1000.0));
    assert!(position.soft_limits().unwrap().is_unbounded());

    position.set_value(500.0).await.unwrap();
    assert_eq!(position.get_value().await.unwrap(), Value::Continuous(500.0));

    position.set_soft_limits(LimitPair::bounded(0.0, 100.0)).unwrap();
    let err = position.set_value(500.0).await.unwrap_err();
    assert!(matches!(err, MdaError::ActuatorAtSoftLimit { .. }));
    assert_eq!(err.status_code(), 406);
    assert_eq!(position.get_value().await.unwrap(), Value::Continuous(500.0));

    position.set_value(100.0).await.unwrap();
    assert_eq!(position.get_value().await.unwrap(), Value::Continuous(100.0));
}

#[tokio::test]
async fn discrete_invalid_value_scenario() {
    let manager = manager_with(MockMode::Instant).await;
    manager.instantiate([example(1, "COM1")]).await.unwrap();
    let power = manager.actuator(1, 2).unwrap();
    assert_eq!(power.value_options().unwrap(), ["off", "on"]);

    let err = power.set_value(2usize).await.unwrap_err();
    assert!(matches!(err, MdaError::ActuatorAtHardLimit { .. }));
    assert_eq!(power.get_value().await.unwrap(), Value::Discrete("off".into()));

    power.set_invalid_value(1).unwrap();
    let err = power.set_value(1usize).await.unwrap_err();
    assert!(matches!(err, MdaError::ActuatorAtSoftLimit { .. }));

    power.set_valid_value(1).unwrap();
    power.set_value(1usize).await.unwrap();
    assert_eq!(power.get_value().await.unwrap(), Value::Discrete("on".into()));
}

#[tokio::test]
async fn wide_soft_limits_never_pass_hard_limits() {
    let manager = manager_with(MockMode::Instant).await;
    manager.instantiate([example(1, "COM1")]).await.unwrap();
    let position = manager.actuator(1, 1).unwrap();

    position
        .set_soft_limits(LimitPair::bounded(-5000.0, 5000.0))
        .unwrap();
    let err = position.set_value(1500.0).await.unwrap_err();
    assert!(err.is_hard_limit());
    let err = position.set_value(f64::NAN).await.unwrap_err();
    assert!(err.is_hard_limit());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_sets_on_one_endpoint() {
    let manager = manager_with(MockMode::Realistic).await;
    manager.instantiate([example(1, "COM1")]).await.unwrap();
    let position = manager.actuator(1, 1).unwrap();

    let (first, second) = tokio::join!(position.set_value(100.0), position.set_value(200.0));
    let outcomes = [first, second];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    let busy = outcomes.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert!(matches!(busy, MdaError::IsBusy { device_id: 1 }));
    assert_eq!(busy.status_code(), 423);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timed_out_set_keeps_endpoint_busy_until_write_ends() {
    let manager = manager_with(MockMode::Realistic).await;
    manager.instantiate([example(1, "COM1")]).await.unwrap();
    let position = manager.actuator(1, 1).unwrap();

    let err = position
        .set_value_timeout(250.0, Duration::from_millis(5))
        .await
        .unwrap_err();
    assert!(matches!(err, MdaError::Timeout { device_id: 1, .. }));
    assert_eq!(err.status_code(), 504);

    assert!(!position.is_able_to_set());
    let busy = position.set_value(300.0).await.unwrap_err();
    assert!(matches!(busy, MdaError::IsBusy { .. }));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(position.is_able_to_set());
    assert_eq!(position.get_value().await.unwrap(), Value::Continuous(250.0));
}

#[tokio::test]
async fn settings_share_the_axis_busy_scope() {
    let manager = manager_with(MockMode::Instant).await;
    manager.instantiate([example(1, "COM1")]).await.unwrap();

    let position = manager.actuator(1, 1).unwrap();
    let velocity = position.setting(1).unwrap();
    velocity.set_value(25.0).await.unwrap();
    assert_eq!(velocity.get_value().await.unwrap(), Value::Continuous(25.0));

    let err = velocity.set_value(80.0).await.unwrap_err();
    assert!(matches!(err, MdaError::SettingAtHardLimit { .. }));

    let temperature = manager.setting(1, 1).unwrap();
    assert_eq!(temperature.hard_limits().unwrap(), LimitPair::bounded(-20.0, 40.0));
}

#[tokio::test]
async fn instantiation_collects_every_failure() {
    let manager = manager_with(MockMode::Instant).await;
    let records = vec![
        example(1, "COM1"),
        DeviceRecord::new(2, "Broken", "broken"),
        DeviceRecord::new(3, "Misconfigured", "example").with_arg("port", "COM1"),
        DeviceRecord::new(4, "Unknown", "laser"),
        example(5, "COM2"),
    ];
    let err = manager.instantiate(records).await.unwrap_err();
    let MdaError::InstantiationFailed(errors) = err else {
        panic!("expected an aggregate error");
    };
    assert_eq!(errors.len(), 3);
    assert!(matches!(errors[0], MdaError::ImplementationError { .. }));
    assert!(errors[0].to_string().contains("no device factory"));
    assert!(matches!(errors[1], MdaError::ImplementationError { .. }));
    assert!(errors[1].to_string().contains("missing argument(s): com_port"));
    // No driver provides "laser" at all.
    assert!(matches!(&errors[2], MdaError::ModuleError { module, .. } if module == "laser"));

    let live: Vec<_> = manager.devices().iter().map(|d| d.id()).collect();
    assert_eq!(live, vec![1, 5]);
    // Failed records are kept for the operator to fix.
    assert_eq!(manager.records().len(), 5);
}

#[tokio::test]
async fn connection_state_is_written_back() {
    let manager = manager_with(MockMode::Instant).await;
    let mut stale = example(1, "COM1");
    stale.is_connected = true;
    manager.instantiate([stale, example(2, "COM7")]).await.unwrap();
    assert!(!manager.store().get(1).unwrap().is_connected);

    let err = manager.connect_all().unwrap_err();
    let MdaError::ConnectAllFailed(errors) = err else {
        panic!("expected an aggregate error");
    };
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], MdaError::ConnectFailed { device_id: 2, .. }));
    assert!(errors[0].to_string().contains("COM7, invalid com port."));

    assert!(manager.store().get(1).unwrap().is_connected);
    assert!(!manager.store().get(2).unwrap().is_connected);

    manager.disconnect(1).unwrap();
    assert!(!manager.store().get(1).unwrap().is_connected);
}

#[tokio::test]
async fn add_and_remove_records() {
    let manager = manager_with(MockMode::Instant).await;
    let device = manager.add_record(example(7, "COM1")).await.unwrap();
    assert_eq!(device.device_type(), "example");
    assert!(matches!(
        manager.add_record(example(7, "COM1")).await,
        Err(MdaError::DuplicateDevice(7))
    ));

    let err = manager
        .add_record(DeviceRecord::new(8, "Broken", "broken"))
        .await
        .unwrap_err();
    assert!(matches!(err, MdaError::ImplementationError { .. }));
    assert!(manager.store().get(8).is_none());

    let err = manager
        .add_record(DeviceRecord::new(9, "Unknown", "laser"))
        .await
        .unwrap_err();
    assert!(matches!(err, MdaError::ModuleError { .. }));
    assert_eq!(err.status_code(), 500);
    assert!(manager.store().get(9).is_none());

    manager.connect(7).unwrap();
    let record = manager.remove(7).await.unwrap();
    assert_eq!(record.id, 7);
    assert!(!device.is_connected());
    assert!(matches!(manager.device(7), Err(MdaError::DeviceNotFound(7))));
    assert!(matches!(manager.remove(7).await, Err(MdaError::DeviceNotFound(7))));
}

#[tokio::test]
async fn instantiate_stored_builds_only_pending_records() {
    let mut registry = DeviceTypeRegistry::new();
    registry.discover(&StaticDriverSource::new(modules())).await;
    let manager = DeviceInstanceManager::new(
        Arc::new(registry),
        Arc::new(InMemoryRecordStore::with_records([
            example(1, "COM1"),
            example(2, "COM2"),
        ])),
    );

    manager.instantiate_stored().await.unwrap();
    let first = manager.device(1).unwrap();
    assert_eq!(manager.devices().len(), 2);

    // A record added behind the manager's back is picked up; live ones stay.
    manager.store().upsert(example(3, "COM1"));
    manager.instantiate_stored().await.unwrap();
    let live: Vec<_> = manager.devices().iter().map(|d| d.id()).collect();
    assert_eq!(live, vec![1, 2, 3]);
    assert!(Arc::ptr_eq(&first, &manager.device(1).unwrap()));
}

#[tokio::test]
async fn remove_keeps_a_device_that_cannot_disconnect() {
    let sticky = ExampleFactory::new().with_errors(ErrorConfig::scenario(ErrorScenario::Always {
        operation: "disconnect",
    }));
    let mut registry = DeviceTypeRegistry::new();
    registry
        .discover(&StaticDriverSource::new(vec![Arc::new(ExampleModule::new(
            sticky,
        ))]))
        .await;
    let manager =
        DeviceInstanceManager::new(Arc::new(registry), Arc::new(InMemoryRecordStore::new()));
    manager.instantiate([example(1, "COM1")]).await.unwrap();
    manager.connect(1).unwrap();

    let err = manager.remove(1).await.unwrap_err();
    assert!(matches!(err, MdaError::DisconnectFailed { device_id: 1, .. }));
    assert!(manager.device(1).unwrap().is_connected());
    let record = manager.store().get(1).unwrap();
    assert!(record.is_connected);
}

#[tokio::test]
async fn lookups_report_what_is_missing() {
    let manager = manager_with(MockMode::Instant).await;
    manager.instantiate([example(1, "COM1")]).await.unwrap();

    assert_eq!(
        manager.device(2).unwrap_err().status_code(),
        404
    );
    assert!(matches!(
        manager.actuator(1, 9),
        Err(MdaError::ActuatorNotFound { device_id: 1, actuator_id: 9 })
    ));
    assert!(matches!(
        manager.detector(1, 4),
        Err(MdaError::DetectorNotFound { device_id: 1, detector_id: 4 })
    ));
    assert!(matches!(
        manager.setting(1, 3),
        Err(MdaError::SettingNotFound { device_id: 1, setting_id: 3 })
    ));
}

#[tokio::test]
async fn snapshot_listings() {
    let manager = manager_with(MockMode::Instant).await;
    manager
        .instantiate([example(1, "COM1"), example(2, "COM1")])
        .await
        .unwrap();

    let discrete = manager.discrete_actuator_infos();
    assert_eq!(discrete.len(), 2);
    assert!(discrete.iter().all(|info| info.name() == "Power"));
    assert_eq!(manager.continuous_actuator_infos().len(), 2);
    assert_eq!(manager.detector_infos()[1].device_id, 2);

    let settings = manager.setting_infos(1).unwrap();
    assert_eq!(settings.len(), 4);
    // Device-level setting has no grandparent; the velocity setting's is the device.
    assert_eq!(settings[0].grandparent_id(), None);
    assert_eq!(settings[1].grandparent_id(), Some(1));

    let json = serde_json::to_value(&discrete[0]).unwrap();
    assert_eq!(json["options"], serde_json::json!(["off", "on"]));
}

#[tokio::test]
async fn detector_acquires_through_manager() {
    let manager = manager_with(MockMode::Instant).await;
    manager.instantiate([example(1, "COM1")]).await.unwrap();
    let spectrometer = manager.detector(1, 1).unwrap();
    assert!(spectrometer.is_able_to_acquire());
    let spectrum = spectrometer.acquire().await.unwrap();
    assert_eq!(spectrum.ndim(), spectrometer.dimensionality());
    assert_eq!(spectrum.coords[0].units, "nm");
}

#[tokio::test]
async fn registry_lists_device_types() {
    let mut registry = DeviceTypeRegistry::new();
    registry.discover(&StaticDriverSource::new(modules())).await;
    let types = registry.device_types();
    assert_eq!(types.len(), 1);
    assert_eq!(types[0].name, "example");
    assert_eq!(types[0].args[0].name, "com_port");
    assert_eq!(
        types[0].args[0].help,
        "COM port on which the device is located (as an example)"
    );
}
