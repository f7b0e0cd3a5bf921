//! Command-line host for fastmda.
//!
//! Loads configuration, discovers drivers (the compiled-in simulated drivers
//! plus any manifest directories), builds the configured devices, connects
//! them, prints their state as JSON and disconnects again.
//!
//! # Usage
//!
//! ```bash
//! fastmda --config mda.toml
//! fastmda --config mda.toml --driver-path drivers --log-level debug
//! fastmda types
//! fastmda --config mda.toml set 1 1 250.5
//! fastmda --config mda.toml acquire 1 1
//! ```

mod logging;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mda_core::{ActuatorId, DetectorId, DeviceId, SetPoint, Value};
use mda_driver_mock::MockMode;
use mda_hardware::{
    DeviceInstanceManager, DeviceTypeRegistry, ImplementationCatalog, InMemoryRecordStore,
    ManifestDirectorySource, MdaConfig, StaticDriverSource, TimeoutConfig,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "fastmda")]
#[command(about = "Device control host with limit and busy enforcement", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Additional driver manifest directory (repeatable)
    #[arg(long = "driver-path", global = true)]
    driver_paths: Vec<PathBuf>,

    /// Add hardware-like latency to the simulated drivers
    #[arg(long, global = true)]
    realistic: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build, connect, report and disconnect every configured device (default)
    Run,
    /// List the discovered device types
    Types,
    /// Set one actuator, bounded by the configured set timeout
    Set {
        device: DeviceId,
        actuator: ActuatorId,
        /// Option index for discrete actuators, number for continuous ones
        #[arg(value_parser = parse_set_point, allow_hyphen_values = true)]
        value: SetPoint,
    },
    /// Acquire once from a detector, bounded by the configured acquire timeout
    Acquire {
        device: DeviceId,
        detector: DetectorId,
    },
}

/// Whole non-negative numbers are option indices; anything else is a float.
fn parse_set_point(raw: &str) -> Result<SetPoint, String> {
    if let Ok(index) = raw.parse::<usize>() {
        return Ok(SetPoint::Index(index));
    }
    raw.parse::<f64>()
        .map(SetPoint::Value)
        .map_err(|_| format!("'{raw}' is neither an option index nor a number"))
}

#[derive(Serialize)]
struct DeviceReport {
    record: mda_hardware::DeviceRecord,
    actuators: Vec<mda_core::ActuatorInfo>,
    detectors: Vec<mda_core::DetectorInfo>,
    settings: Vec<mda_core::SettingInfo>,
    values: Vec<ActuatorValue>,
}

#[derive(Serialize)]
struct ActuatorValue {
    actuator_id: u32,
    value: Option<Value>,
    error: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = MdaConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    config.driver_paths.extend(cli.driver_paths.iter().cloned());

    let level = logging::parse_log_level(&config.log_level).map_err(anyhow::Error::msg)?;
    logging::init(level, config.log_format).map_err(anyhow::Error::msg)?;
    info!(
        config = ?cli.config,
        driver_paths = ?config.driver_paths,
        devices = config.devices.len(),
        "Starting fastmda"
    );

    let mode = if cli.realistic {
        MockMode::Realistic
    } else {
        MockMode::Instant
    };
    let registry = discover(&config, mode).await;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Types => {
            println!("{}", serde_json::to_string_pretty(&registry.device_types())?);
            Ok(())
        }
        Commands::Run => run(config, registry).await,
        Commands::Set {
            device,
            actuator,
            value,
        } => {
            let manager = start(&config, registry).await?;
            let outcome = set(&manager, device, actuator, value, &config.timeouts).await;
            stop(&manager)?;
            outcome
        }
        Commands::Acquire { device, detector } => {
            let manager = start(&config, registry).await?;
            let outcome = acquire(&manager, device, detector, &config.timeouts).await;
            stop(&manager)?;
            outcome
        }
    }
}

async fn discover(config: &MdaConfig, mode: MockMode) -> Arc<DeviceTypeRegistry> {
    let mut registry = DeviceTypeRegistry::new();
    registry
        .discover(&StaticDriverSource::new(mda_driver_mock::modules_with_mode(mode)))
        .await;

    let catalog = Arc::new(ImplementationCatalog::new());
    mda_driver_mock::register_all_with_mode(catalog.as_ref(), mode);
    for path in &config.driver_paths {
        let source = ManifestDirectorySource::new(path.clone(), Arc::clone(&catalog));
        registry.discover(&source).await;
    }

    if registry.has_failures() {
        warn!(
            failures = registry.failures().len(),
            "Some driver candidates were rejected"
        );
    }
    Arc::new(registry)
}

/// Instantiate and connect the configured devices. Partial failures are
/// reported and the remaining devices still run.
async fn start(
    config: &MdaConfig,
    registry: Arc<DeviceTypeRegistry>,
) -> Result<DeviceInstanceManager> {
    let manager = DeviceInstanceManager::new(registry, Arc::new(InMemoryRecordStore::new()));
    if let Err(err) = manager.instantiate(config.devices.clone()).await {
        warn!(error = %err, "Some devices could not be instantiated");
    }
    if let Err(err) = manager.connect_all() {
        warn!(error = %err, "Some devices could not be connected");
    }
    Ok(manager)
}

fn stop(manager: &DeviceInstanceManager) -> Result<()> {
    manager
        .disconnect_all()
        .context("disconnecting devices")?;
    info!("Shutdown complete");
    Ok(())
}

async fn run(config: MdaConfig, registry: Arc<DeviceTypeRegistry>) -> Result<()> {
    let manager = start(&config, registry).await?;

    let mut reports = Vec::new();
    for device in manager.devices() {
        reports.push(report(&manager, device.id(), &config.timeouts).await?);
    }
    println!("{}", serde_json::to_string_pretty(&reports)?);

    stop(&manager)
}

async fn set(
    manager: &DeviceInstanceManager,
    device: DeviceId,
    actuator: ActuatorId,
    value: SetPoint,
    timeouts: &TimeoutConfig,
) -> Result<()> {
    let target = manager.actuator(device, actuator)?;
    target
        .set_value_timeout(value, timeouts.set())
        .await
        .with_context(|| format!("setting actuator {actuator} of device {device}"))?;
    let readback = target.get_value_timeout(timeouts.get()).await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&ActuatorValue {
            actuator_id: actuator,
            value: Some(readback),
            error: None,
        })?
    );
    Ok(())
}

async fn acquire(
    manager: &DeviceInstanceManager,
    device: DeviceId,
    detector: DetectorId,
    timeouts: &TimeoutConfig,
) -> Result<()> {
    let data = manager
        .detector(device, detector)?
        .acquire_timeout(timeouts.acquire())
        .await
        .with_context(|| format!("acquiring from detector {detector} of device {device}"))?;
    println!("{}", serde_json::to_string_pretty(&data)?);
    Ok(())
}

async fn report(
    manager: &DeviceInstanceManager,
    id: DeviceId,
    timeouts: &TimeoutConfig,
) -> Result<DeviceReport> {
    let device = manager.device(id)?;
    let record = manager
        .store()
        .get(id)
        .with_context(|| format!("no record for device {id}"))?;

    let mut values = Vec::new();
    if device.is_connected() {
        for actuator in device.actuators().values() {
            let (value, error) = match actuator.get_value_timeout(timeouts.get()).await {
                Ok(value) => (Some(value), None),
                Err(err) => (None, Some(err.to_string())),
            };
            values.push(ActuatorValue {
                actuator_id: actuator.id(),
                value,
                error,
            });
        }
    }

    Ok(DeviceReport {
        record,
        actuators: device.actuator_infos(),
        detectors: device.detector_infos(),
        settings: device.setting_infos(),
        values,
    })
}
