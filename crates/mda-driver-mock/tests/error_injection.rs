//! Injected driver failures surface as typed core errors.

use mda_core::{Device, DeviceArgs, DriverFactory, MdaError, Value};
use mda_driver_mock::{ErrorConfig, ErrorScenario, ExampleFactory, MockMode, EXAMPLE_DEVICE_TYPE};
use serde_json::json;

async fn device(factory: ExampleFactory) -> Device {
    let mut args = DeviceArgs::new();
    args.insert("com_port".into(), json!("COM1"));
    let components = factory.build(1, args).await.unwrap();
    Device::assemble(1, EXAMPLE_DEVICE_TYPE, components).unwrap()
}

#[tokio::test]
async fn failed_write_is_a_hardware_error_and_releases_the_endpoint() {
    let device = device(ExampleFactory::new().with_errors(ErrorConfig::scenario(
        ErrorScenario::FailAfterN {
            operation: "write",
            count: 1,
        },
    )))
    .await;
    let position = device.actuator(1).unwrap();

    position.set_value(10.0).await.unwrap();
    let err = position.set_value(20.0).await.unwrap_err();
    assert!(matches!(err, MdaError::Hardware { device_id: 1, .. }));
    assert_eq!(err.status_code(), 502);
    assert!(!err.is_retryable());

    assert!(position.is_able_to_set());
    assert_eq!(position.get_value().await.unwrap(), Value::Continuous(10.0));
}

#[tokio::test]
async fn hardware_fault_blocks_connect() {
    let device = device(
        ExampleFactory::new().with_errors(ErrorConfig::scenario(ErrorScenario::HardwareFault {
            code: 42,
        })),
    )
    .await;
    let err = device.connect().unwrap_err();
    assert!(matches!(err, MdaError::ConnectFailed { .. }));
    assert!(err.to_string().contains("hardware fault 0x002a"));
    assert!(!device.is_connected());
}

#[tokio::test]
async fn communication_loss_fails_acquisition() {
    let device = device(
        ExampleFactory::new().with_errors(ErrorConfig::scenario(ErrorScenario::CommunicationLoss)),
    )
    .await;
    let detector = device.detector(1).unwrap();
    let err = detector.acquire().await.unwrap_err();
    assert!(err.to_string().contains("communication lost"));
    assert!(detector.is_able_to_acquire());
}

#[tokio::test]
async fn chaos_mode_with_certain_failure() {
    let device = device(
        ExampleFactory::new()
            .with_mode(MockMode::Chaos)
            .with_errors(ErrorConfig::random_failures_seeded(1.0, Some(7))),
    )
    .await;
    let power = device.actuator(2).unwrap();
    assert!(matches!(
        power.get_value().await,
        Err(MdaError::Hardware { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timed_out_acquisition_keeps_detector_busy() {
    let device = device(ExampleFactory::new().with_mode(MockMode::Realistic)).await;
    let detector = device.detector(1).unwrap();

    let err = detector
        .acquire_timeout(std::time::Duration::from_millis(2))
        .await
        .unwrap_err();
    assert!(matches!(err, MdaError::Timeout { .. }));
    assert!(!detector.is_able_to_acquire());
    assert!(matches!(
        detector.acquire().await,
        Err(MdaError::IsBusy { device_id: 1 })
    ));

    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    assert!(detector.is_able_to_acquire());
}
