//! Device-type registry.
//!
//! Maps a device kind name to its [`DeviceType`] descriptor and the
//! [`DriverFactory`] that builds it. The registry is populated by
//! [`DeviceTypeRegistry::discover`] before it is shared (via `Arc`) with the
//! instance manager, so its contents cannot change once devices exist.
//!
//! Discovery validates every candidate: a module that failed to load is a
//! [`MdaError::ModuleError`], a module that loaded but misses its descriptor or
//! its factory is a [`MdaError::ImplementationError`]. Failures never abort discovery. They
//! are collected, logged, and remembered, so building a device of a rejected
//! kind later reports the original reason.

use crate::discovery::DriverSource;
use mda_core::{DeviceType, DriverFactory, MdaError, MdaResult};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// A validated device kind.
#[derive(Clone)]
pub struct RegisteredDeviceType {
    device_type: DeviceType,
    module: String,
    factory: Arc<dyn DriverFactory>,
}

impl RegisteredDeviceType {
    pub fn device_type(&self) -> &DeviceType {
        &self.device_type
    }

    /// Module the kind was discovered in.
    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn factory(&self) -> &Arc<dyn DriverFactory> {
        &self.factory
    }
}

impl std::fmt::Debug for RegisteredDeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredDeviceType")
            .field("device_type", &self.device_type.name)
            .field("module", &self.module)
            .finish()
    }
}

/// Information about a rejected discovery candidate
#[derive(Debug, Clone)]
pub struct DiscoveryFailure {
    /// Source the candidate came from
    pub source: String,
    /// Device kind, when the candidate got far enough to name one
    pub device_type: Option<String>,
    pub error: MdaError,
}

/// Registry of discovered device kinds.
#[derive(Debug, Default)]
pub struct DeviceTypeRegistry {
    types: BTreeMap<String, RegisteredDeviceType>,
    /// Kinds whose module was rejected, with the rejection.
    rejected: BTreeMap<String, MdaError>,
    failures: Vec<DiscoveryFailure>,
}

impl DeviceTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register every candidate of `source`.
    ///
    /// Returns the failures of this pass; they are also kept in
    /// [`DeviceTypeRegistry::failures`].
    pub async fn discover(&mut self, source: &dyn DriverSource) -> Vec<MdaError> {
        let source_name = source.name();
        let mut errors = Vec::new();
        let mut registered = 0usize;

        for candidate in source.candidates().await {
            let module = match candidate {
                Ok(module) => module,
                Err(err) => {
                    self.record_failure(&source_name, None, err.clone());
                    errors.push(err);
                    continue;
                }
            };
            let module_name = module.module_name().to_string();

            let Some(device_type) = module.device_type() else {
                let err = MdaError::ImplementationError {
                    device_type: module_name.clone(),
                    reason: format!("module '{module_name}' provides no device-type descriptor"),
                };
                self.record_failure(&source_name, None, err.clone());
                errors.push(err);
                continue;
            };
            let kind = device_type.name.clone();

            let Some(factory) = module.factory() else {
                let err = MdaError::ImplementationError {
                    device_type: kind.clone(),
                    reason: format!("module '{module_name}' provides no device factory"),
                };
                self.rejected.insert(kind.clone(), err.clone());
                self.record_failure(&source_name, Some(kind), err.clone());
                errors.push(err);
                continue;
            };

            if let Some(existing) = self.types.get(&kind) {
                let err = MdaError::ModuleError {
                    module: module_name,
                    reason: format!(
                        "device type '{kind}' is already provided by '{}'",
                        existing.module
                    ),
                };
                self.record_failure(&source_name, Some(kind), err.clone());
                errors.push(err);
                continue;
            }

            info!(
                device_type = %kind,
                module = %module_name,
                args = ?device_type.arg_names().collect::<Vec<_>>(),
                "Registering device type"
            );
            self.rejected.remove(&kind);
            self.types.insert(
                kind,
                RegisteredDeviceType {
                    device_type,
                    module: module_name,
                    factory,
                },
            );
            registered += 1;
        }

        if errors.is_empty() {
            info!(source = %source_name, registered, "Driver discovery finished");
        } else {
            warn!(
                source = %source_name,
                registered,
                failed = errors.len(),
                "Driver discovery finished with failures"
            );
        }
        errors
    }

    fn record_failure(&mut self, source: &str, device_type: Option<String>, error: MdaError) {
        error!(
            source = %source,
            device_type = device_type.as_deref().unwrap_or("-"),
            error = %error,
            "Driver candidate rejected"
        );
        self.failures.push(DiscoveryFailure {
            source: source.to_string(),
            device_type,
            error,
        });
    }

    /// Look up a kind for instantiation.
    ///
    /// A kind rejected at discovery returns the rejection. A kind no source
    /// provided is a [`MdaError::ModuleError`]: the driver cannot be located.
    pub fn resolve(&self, name: &str) -> MdaResult<&RegisteredDeviceType> {
        if let Some(entry) = self.types.get(name) {
            return Ok(entry);
        }
        if let Some(err) = self.rejected.get(name) {
            return Err(err.clone());
        }
        Err(MdaError::ModuleError {
            module: name.to_string(),
            reason: "no driver provides this device type".to_string(),
        })
    }

    pub fn factory(&self, name: &str) -> MdaResult<Arc<dyn DriverFactory>> {
        self.resolve(name).map(|entry| Arc::clone(&entry.factory))
    }

    pub fn device_type(&self, name: &str) -> Option<&DeviceType> {
        self.types.get(name).map(|entry| &entry.device_type)
    }

    /// Every registered descriptor, in name order.
    pub fn device_types(&self) -> Vec<DeviceType> {
        self.types
            .values()
            .map(|entry| entry.device_type.clone())
            .collect()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Every candidate rejected so far, in discovery order.
    pub fn failures(&self) -> &[DiscoveryFailure] {
        &self.failures
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{Candidate, StaticDriverSource};
    use async_trait::async_trait;
    use mda_core::DriverModule;
    use mda_driver_mock::{BrokenModule, ExampleFactory, ExampleModule};

    struct Anonymous;

    impl DriverModule for Anonymous {
        fn module_name(&self) -> &str {
            "anonymous"
        }

        fn device_type(&self) -> Option<DeviceType> {
            None
        }

        fn factory(&self) -> Option<Arc<dyn DriverFactory>> {
            Some(Arc::new(ExampleFactory::new()))
        }
    }

    struct Unloadable;

    #[async_trait]
    impl DriverSource for Unloadable {
        fn name(&self) -> String {
            "unloadable".into()
        }

        async fn candidates(&self) -> Vec<Candidate> {
            vec![
                Err(MdaError::ModuleError {
                    module: "drivers/stage.so".into(),
                    reason: "symbol not found".into(),
                }),
                Ok(Arc::new(ExampleModule::default())),
            ]
        }
    }

    #[tokio::test]
    async fn test_discover_registers_complete_modules() {
        let mut registry = DeviceTypeRegistry::new();
        let source = StaticDriverSource::new(vec![Arc::new(ExampleModule::default())]);
        let errors = registry.discover(&source).await;
        assert!(errors.is_empty());
        assert!(registry.is_registered("example"));
        assert_eq!(registry.device_types().len(), 1);
        assert_eq!(
            registry.device_type("example").unwrap().description,
            "An example of how to implement a device"
        );
        assert!(registry.factory("example").is_ok());
    }

    #[tokio::test]
    async fn test_missing_factory_is_remembered() {
        let mut registry = DeviceTypeRegistry::new();
        let source = StaticDriverSource::new(vec![
            Arc::new(BrokenModule),
            Arc::new(ExampleModule::default()),
        ]);
        let errors = registry.discover(&source).await;
        assert_eq!(errors.len(), 1);
        assert!(registry.is_registered("example"));

        let err = registry.factory("broken").err().unwrap();
        match err {
            MdaError::ImplementationError { device_type, reason } => {
                assert_eq!(device_type, "broken");
                assert!(reason.contains("no device factory"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(registry.failures().len(), 1);
        assert_eq!(registry.failures()[0].device_type.as_deref(), Some("broken"));
    }

    #[tokio::test]
    async fn test_missing_descriptor_is_implementation_error() {
        let mut registry = DeviceTypeRegistry::new();
        let errors = registry
            .discover(&StaticDriverSource::new(vec![Arc::new(Anonymous)]))
            .await;
        assert!(matches!(errors[0], MdaError::ImplementationError { .. }));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_unloadable_candidate_does_not_stop_discovery() {
        let mut registry = DeviceTypeRegistry::new();
        let errors = registry.discover(&Unloadable).await;
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], MdaError::ModuleError { .. }));
        assert!(registry.is_registered("example"));
        assert!(registry.has_failures());
    }

    #[tokio::test]
    async fn test_duplicate_kind_is_module_error() {
        let mut registry = DeviceTypeRegistry::new();
        let source = StaticDriverSource::new(vec![
            Arc::new(ExampleModule::default()),
            Arc::new(ExampleModule::default()),
        ]);
        let errors = registry.discover(&source).await;
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("already provided"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_kind_is_module_error() {
        let registry = DeviceTypeRegistry::new();
        match registry.resolve("laser") {
            Err(MdaError::ModuleError { module, reason }) => {
                assert_eq!(module, "laser");
                assert!(reason.contains("no driver"));
            }
            other => panic!("unexpected resolution: {other:?}"),
        }
    }
}
