//! Simulated "example" device.
//!
//! Layout (ids in parentheses):
//!
//! - device setting: Temperature (1), continuous, -20..40 °C
//! - actuator Position (1): continuous, 0..1000 mm, with setting Velocity (1)
//!   sharing the axis busy scope
//! - actuator Power (2): discrete `["off", "on"]`
//! - detector Spectrometer (1): one-dimensional, with settings Integration
//!   time (1) and Gain (2)
//!
//! The connection only succeeds on `COM1`.

use crate::common::{ErrorConfig, MockMode, MockRng, TimingConfig};
use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use mda_core::{
    parse_args, Actuator, BusyGuard, ContinuousHardware, Coordinate, DataArray, Detector,
    DetectorHardware, DeviceArgs, DeviceComponents, DeviceDriver, DeviceId, DeviceType,
    DiscreteHardware, DriverFactory, DriverModule, LimitPair, Setting, SettingParent,
    ValueEndpoint,
};
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Kind name of the example driver.
pub const EXAMPLE_DEVICE_TYPE: &str = "example";

/// Descriptor of the example driver kind.
pub fn example_device_type() -> DeviceType {
    DeviceType::new(EXAMPLE_DEVICE_TYPE, "An example of how to implement a device").with_arg(
        "com_port",
        "COM port on which the device is located (as an example)",
    )
}

/// Constructor arguments of the example device.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExampleArgs {
    pub com_port: String,
}

// =============================================================================
// Simulation context
// =============================================================================

/// State shared by every simulated part of one device.
#[derive(Debug)]
struct Simulation {
    mode: MockMode,
    timing: TimingConfig,
    errors: ErrorConfig,
    rng: MockRng,
}

impl Simulation {
    async fn pause(&self, delay: Duration) {
        if self.mode.is_timed() && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

// =============================================================================
// Simulated hardware
// =============================================================================

/// Connection of the example device.
#[derive(Debug)]
pub struct ExampleLink {
    com_port: String,
    connected: AtomicBool,
    sim: Arc<Simulation>,
}

impl DeviceDriver for ExampleLink {
    fn connect(&self) -> Result<bool> {
        self.sim.errors.check_operation("connect")?;
        if self.com_port != "COM1" {
            anyhow::bail!("{}, invalid com port.", self.com_port);
        }
        self.connected.store(true, Ordering::SeqCst);
        tracing::debug!(com_port = %self.com_port, "Simulated link open");
        Ok(true)
    }

    fn disconnect(&self) -> Result<bool> {
        self.sim.errors.check_operation("disconnect")?;
        self.connected.store(false, Ordering::SeqCst);
        Ok(true)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// A simulated continuous register (axis position, temperature, ...).
#[derive(Debug)]
pub struct SimulatedAxis {
    value: Mutex<f64>,
    sim: Arc<Simulation>,
}

impl SimulatedAxis {
    fn new(initial: f64, sim: &Arc<Simulation>) -> Arc<Self> {
        Arc::new(Self {
            value: Mutex::new(initial),
            sim: Arc::clone(sim),
        })
    }

    fn current(&self) -> f64 {
        *self.value.lock()
    }
}

#[async_trait]
impl ContinuousHardware for SimulatedAxis {
    async fn read(&self) -> Result<f64> {
        self.sim.errors.check_operation("read")?;
        self.sim.pause(self.sim.timing.read_delay()).await;
        Ok(*self.value.lock())
    }

    async fn write(&self, value: f64) -> Result<()> {
        self.sim.errors.check_operation("write")?;
        self.sim.pause(self.sim.timing.write_delay()).await;
        *self.value.lock() = value;
        Ok(())
    }
}

/// A simulated option selector (power switch, gain, ...).
#[derive(Debug)]
pub struct SimulatedSelector {
    index: AtomicUsize,
    sim: Arc<Simulation>,
}

impl SimulatedSelector {
    fn new(initial: usize, sim: &Arc<Simulation>) -> Arc<Self> {
        Arc::new(Self {
            index: AtomicUsize::new(initial),
            sim: Arc::clone(sim),
        })
    }
}

#[async_trait]
impl DiscreteHardware for SimulatedSelector {
    async fn read_index(&self) -> Result<usize> {
        self.sim.errors.check_operation("read")?;
        self.sim.pause(self.sim.timing.read_delay()).await;
        Ok(self.index.load(Ordering::SeqCst))
    }

    async fn write_index(&self, index: usize) -> Result<()> {
        self.sim.errors.check_operation("write")?;
        self.sim.pause(self.sim.timing.write_delay()).await;
        self.index.store(index, Ordering::SeqCst);
        Ok(())
    }
}

/// Spectrometer returning a Gaussian line at 550 nm whose height follows the
/// integration time and gain settings.
#[derive(Debug)]
pub struct SimulatedSpectrometer {
    integration_ms: Arc<SimulatedAxis>,
    gain: Arc<SimulatedSelector>,
    sim: Arc<Simulation>,
}

const SPECTRUM_START_NM: f64 = 400.0;
const SPECTRUM_STEP_NM: f64 = 5.0;
const SPECTRUM_POINTS: usize = 64;
const LINE_CENTER_NM: f64 = 550.0;
const LINE_WIDTH_NM: f64 = 20.0;

#[async_trait]
impl DetectorHardware for SimulatedSpectrometer {
    async fn acquire(&self) -> Result<DataArray> {
        self.sim.errors.check_operation("acquire")?;
        self.sim.pause(self.sim.timing.acquire_delay()).await;

        let gain = if self.gain.index.load(Ordering::SeqCst) == 0 { 1.0 } else { 10.0 };
        let height = self.integration_ms.current() * gain;
        let wavelengths: Vec<f64> = (0..SPECTRUM_POINTS)
            .map(|i| SPECTRUM_START_NM + SPECTRUM_STEP_NM * i as f64)
            .collect();
        let counts = wavelengths
            .iter()
            .map(|nm| {
                let x = (nm - LINE_CENTER_NM) / LINE_WIDTH_NM;
                (height * (-0.5 * x * x).exp() + self.sim.rng.jitter(0.5)).max(0.0)
            })
            .collect();

        Ok(DataArray::new(
            "spectrum",
            "Simulated spectrum",
            "counts",
            vec![Coordinate::new("wavelength", "nm", wavelengths)],
            counts,
        )?)
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Builds example devices.
#[derive(Debug, Clone, Default)]
pub struct ExampleFactory {
    mode: MockMode,
    errors: Option<ErrorConfig>,
    seed: Option<u64>,
}

impl ExampleFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: MockMode) -> Self {
        self.mode = mode;
        self
    }

    /// Inject errors into every device this factory builds.
    pub fn with_errors(mut self, errors: ErrorConfig) -> Self {
        self.errors = Some(errors);
        self
    }

    /// Seed the noise and chaos RNG for reproducible runs.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    fn simulation(&self) -> Arc<Simulation> {
        let errors = match (&self.errors, self.mode) {
            (Some(errors), _) => errors.clone(),
            (None, MockMode::Chaos) => ErrorConfig::random_failures_seeded(0.05, self.seed),
            (None, _) => ErrorConfig::none(),
        };
        let timing = if self.mode.is_timed() {
            TimingConfig::example()
        } else {
            TimingConfig::default()
        };
        Arc::new(Simulation {
            mode: self.mode,
            timing,
            errors,
            rng: MockRng::new(self.seed),
        })
    }
}

impl DriverFactory for ExampleFactory {
    fn validate(&self, args: &DeviceArgs) -> Result<()> {
        parse_args::<ExampleArgs>(args).map(|_| ())
    }

    fn build(&self, device_id: DeviceId, args: DeviceArgs) -> BoxFuture<'static, Result<DeviceComponents>> {
        let sim = self.simulation();
        Box::pin(async move {
            let args: ExampleArgs = parse_args(&args)?;
            Ok(example_components(device_id, args, &sim))
        })
    }
}

fn example_components(device_id: DeviceId, args: ExampleArgs, sim: &Arc<Simulation>) -> DeviceComponents {
    let link = Arc::new(ExampleLink {
        com_port: args.com_port,
        connected: AtomicBool::new(false),
        sim: Arc::clone(sim),
    });

    let temperature = Setting::new(
        1,
        SettingParent::device(device_id),
        "Temperature",
        "°C",
        ValueEndpoint::continuous(
            LimitPair::bounded(-20.0, 40.0),
            SimulatedAxis::new(21.0, sim),
            BusyGuard::new(),
        ),
    );

    // Position and velocity share one busy scope: the axis.
    let axis_guard = BusyGuard::new();
    let position = Actuator::new(
        1,
        device_id,
        "Position",
        "mm",
        ValueEndpoint::continuous(
            LimitPair::bounded(0.0, 1000.0),
            SimulatedAxis::new(0.0, sim),
            axis_guard.clone(),
        ),
    );
    let velocity = Setting::new(
        1,
        position.setting_parent(),
        "Velocity",
        "mm/s",
        ValueEndpoint::continuous(
            LimitPair::bounded(0.1, 50.0),
            SimulatedAxis::new(10.0, sim),
            axis_guard,
        ),
    );
    let position = position.with_setting(velocity);

    let power = Actuator::new(
        2,
        device_id,
        "Power",
        "",
        ValueEndpoint::discrete(["off", "on"], SimulatedSelector::new(0, sim), BusyGuard::new()),
    );

    let integration = SimulatedAxis::new(100.0, sim);
    let gain = SimulatedSelector::new(0, sim);
    let spectrometer = Detector::new(
        1,
        device_id,
        "Spectrometer",
        1,
        Arc::new(SimulatedSpectrometer {
            integration_ms: Arc::clone(&integration),
            gain: Arc::clone(&gain),
            sim: Arc::clone(sim),
        }),
        BusyGuard::new(),
    );
    let detector_parent = spectrometer.setting_parent();
    let spectrometer = spectrometer
        .with_setting(Setting::new(
            1,
            detector_parent,
            "Integration time",
            "ms",
            ValueEndpoint::continuous(LimitPair::bounded(1.0, 10_000.0), integration, BusyGuard::new()),
        ))
        .with_setting(Setting::new(
            2,
            detector_parent,
            "Gain",
            "",
            ValueEndpoint::discrete(["low", "high"], gain, BusyGuard::new()),
        ));

    DeviceComponents::new()
        .with_driver(link)
        .with_setting(temperature)
        .with_actuator(position)
        .with_actuator(power)
        .with_detector(spectrometer)
}

// =============================================================================
// Module
// =============================================================================

/// The example driver kind as a discoverable module.
#[derive(Debug, Clone, Default)]
pub struct ExampleModule {
    factory: ExampleFactory,
}

impl ExampleModule {
    pub fn new(factory: ExampleFactory) -> Self {
        Self { factory }
    }
}

impl DriverModule for ExampleModule {
    fn module_name(&self) -> &str {
        "mda_driver_mock::example"
    }

    fn device_type(&self) -> Option<DeviceType> {
        Some(example_device_type())
    }

    fn factory(&self) -> Option<Arc<dyn DriverFactory>> {
        Some(Arc::new(self.factory.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mda_core::{Device, MdaError, Value};
    use serde_json::json;

    fn args(com_port: &str) -> DeviceArgs {
        let mut map = DeviceArgs::new();
        map.insert("com_port".into(), json!(com_port));
        map
    }

    async fn build(factory: &ExampleFactory, device_id: DeviceId, com_port: &str) -> Device {
        let components = factory.build(device_id, args(com_port)).await.unwrap();
        Device::assemble(device_id, EXAMPLE_DEVICE_TYPE, components).unwrap()
    }

    #[tokio::test]
    async fn test_connect_only_on_com1() {
        let factory = ExampleFactory::new();
        let good = build(&factory, 1, "COM1").await;
        assert!(good.connect().unwrap());
        assert!(good.is_connected());

        let bad = build(&factory, 2, "COM7").await;
        let err = bad.connect().unwrap_err();
        assert!(matches!(err, MdaError::ConnectFailed { device_id: 2, .. }));
        assert!(err.to_string().contains("COM7, invalid com port."));
    }

    #[tokio::test]
    async fn test_layout() {
        let device = build(&ExampleFactory::new(), 1, "COM1").await;
        assert_eq!(device.actuators().len(), 2);
        assert_eq!(device.detectors().len(), 1);
        assert_eq!(device.settings().len(), 1);
        assert_eq!(device.setting_infos().len(), 4);
        assert_eq!(
            device.actuator(1).unwrap().hard_limits().unwrap(),
            LimitPair::bounded(0.0, 1000.0)
        );
        assert_eq!(device.actuator(2).unwrap().value_options().unwrap(), ["off", "on"]);
    }

    #[tokio::test]
    async fn test_spectrum_follows_gain() {
        let device = build(&ExampleFactory::new().with_seed(11), 1, "COM1").await;
        let detector = device.detector(1).unwrap();

        let low = detector.acquire().await.unwrap();
        assert_eq!(low.shape(), vec![SPECTRUM_POINTS]);
        detector.setting(2).unwrap().set_value(1usize).await.unwrap();
        let high = detector.acquire().await.unwrap();

        let peak = |d: &DataArray| d.data().iter().copied().fold(0.0, f64::max);
        assert!(peak(&high) > 5.0 * peak(&low));
        assert_eq!(
            detector.setting(2).unwrap().get_value().await.unwrap(),
            Value::Discrete("high".into())
        );
    }

    #[tokio::test]
    async fn test_axis_scope_shared_with_velocity() {
        let device = build(&ExampleFactory::new(), 1, "COM1").await;
        let position = device.actuator(1).unwrap();
        let velocity = position.setting(1).unwrap();
        assert!(position.endpoint().guard().same_scope(velocity.endpoint().guard()));
        assert!(!position
            .endpoint()
            .guard()
            .same_scope(device.actuator(2).unwrap().endpoint().guard()));
    }

    #[test]
    fn test_validate_rejects_unknown_args() {
        let mut bad = args("COM1");
        bad.insert("baud".into(), json!(9600));
        assert!(ExampleFactory::new().validate(&bad).is_err());
        assert!(ExampleFactory::new().validate(&args("COM1")).is_ok());
    }
}
