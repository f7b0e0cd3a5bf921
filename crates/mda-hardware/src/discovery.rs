//! Driver sources.
//!
//! A [`DriverSource`] yields candidate [`DriverModule`]s for the
//! [`DeviceTypeRegistry`](crate::registry::DeviceTypeRegistry) to validate.
//! Candidates that could not even be loaded come back as
//! [`MdaError::ModuleError`] so discovery can report them and move on.
//!
//! Two sources are provided:
//!
//! - [`StaticDriverSource`]: modules compiled into the binary.
//! - [`ManifestDirectorySource`]: a directory of `*.toml` driver manifests.
//!   Each manifest names a device kind, its descriptor, and the compiled
//!   implementation (from an [`ImplementationCatalog`]) that builds it.
//!
//! # Manifest format
//!
//! ```toml
//! name = "bench_stage"
//! description = "Stage on the optics bench"
//! implementation = "example"
//!
//! [[args]]
//! name = "com_port"
//! help = "COM port on which the stage is located"
//! ```

use async_trait::async_trait;
use dashmap::DashMap;
use mda_core::{
    ArgumentSpec, DeviceType, DriverFactory, DriverModule, FactoryRegistry, MdaError,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// One discovery candidate: a loaded module, or the reason it failed to load.
pub type Candidate = Result<Arc<dyn DriverModule>, MdaError>;

/// Somewhere driver modules come from.
#[async_trait]
pub trait DriverSource: Send + Sync {
    /// Label used in logs and failure reports.
    fn name(&self) -> String;

    /// Enumerate every candidate this source offers.
    async fn candidates(&self) -> Vec<Candidate>;
}

// =============================================================================
// Static source
// =============================================================================

/// Modules compiled into the binary.
#[derive(Clone, Default)]
pub struct StaticDriverSource {
    modules: Vec<Arc<dyn DriverModule>>,
}

impl StaticDriverSource {
    pub fn new(modules: Vec<Arc<dyn DriverModule>>) -> Self {
        Self { modules }
    }

    pub fn with_module(mut self, module: Arc<dyn DriverModule>) -> Self {
        self.modules.push(module);
        self
    }
}

#[async_trait]
impl DriverSource for StaticDriverSource {
    fn name(&self) -> String {
        "static catalog".to_string()
    }

    async fn candidates(&self) -> Vec<Candidate> {
        self.modules.iter().cloned().map(Ok).collect()
    }
}

// =============================================================================
// Implementation catalog
// =============================================================================

/// Compiled driver implementations addressable by name from manifests.
#[derive(Default)]
pub struct ImplementationCatalog {
    factories: DashMap<String, Arc<dyn DriverFactory>>,
}

impl ImplementationCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `implementation`, replacing any previous one.
    pub fn insert(&self, implementation: &str, factory: Arc<dyn DriverFactory>) {
        debug!(implementation, "Registering driver implementation");
        self.factories.insert(implementation.to_string(), factory);
    }

    pub fn get(&self, implementation: &str) -> Option<Arc<dyn DriverFactory>> {
        self.factories
            .get(implementation)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, implementation: &str) -> bool {
        self.factories.contains_key(implementation)
    }

    /// Registered implementation names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl FactoryRegistry for ImplementationCatalog {
    fn register_factory(&self, implementation: &str, factory: Arc<dyn DriverFactory>) {
        self.insert(implementation, factory);
    }
}

// =============================================================================
// Manifest directory source
// =============================================================================

/// On-disk description of a device kind bound to a compiled implementation.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DriverManifest {
    pub name: String,
    pub description: String,
    pub implementation: String,
    #[serde(default)]
    pub args: Vec<ArgumentSpec>,
}

impl DriverManifest {
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn device_type(&self) -> DeviceType {
        DeviceType {
            name: self.name.clone(),
            description: self.description.clone(),
            args: self.args.clone(),
        }
    }
}

/// A manifest bound against the catalog.
///
/// The factory is absent when the manifest names an implementation the
/// catalog does not have; the registry rejects such modules.
struct ManifestModule {
    path: String,
    device_type: DeviceType,
    factory: Arc<dyn DriverFactory>,
}

impl DriverModule for ManifestModule {
    fn module_name(&self) -> &str {
        &self.path
    }

    fn device_type(&self) -> Option<DeviceType> {
        Some(self.device_type.clone())
    }

    fn factory(&self) -> Option<Arc<dyn DriverFactory>> {
        Some(Arc::clone(&self.factory))
    }
}

/// Scans a directory for `*.toml` driver manifests.
///
/// A missing directory yields no candidates. Files are visited in path order.
pub struct ManifestDirectorySource {
    dir: PathBuf,
    catalog: Arc<ImplementationCatalog>,
}

impl ManifestDirectorySource {
    pub fn new(dir: impl Into<PathBuf>, catalog: Arc<ImplementationCatalog>) -> Self {
        Self {
            dir: dir.into(),
            catalog,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn manifest_paths(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("toml") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    async fn load(&self, path: &Path) -> Candidate {
        let module_error = |reason: String| MdaError::ModuleError {
            module: path.display().to_string(),
            reason,
        };
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| module_error(format!("unreadable manifest: {e}")))?;
        let manifest = DriverManifest::from_toml(&content)
            .map_err(|e| module_error(format!("invalid manifest: {e:#}")))?;

        let factory = self.catalog.get(&manifest.implementation).ok_or_else(|| {
            module_error(format!(
                "device type '{}' names implementation '{}', which is not compiled in",
                manifest.name, manifest.implementation
            ))
        })?;
        Ok(Arc::new(ManifestModule {
            path: path.display().to_string(),
            device_type: manifest.device_type(),
            factory,
        }))
    }
}

#[async_trait]
impl DriverSource for ManifestDirectorySource {
    fn name(&self) -> String {
        self.dir.display().to_string()
    }

    async fn candidates(&self) -> Vec<Candidate> {
        if !self.dir.is_dir() {
            debug!(dir = %self.dir.display(), "Driver manifest directory not found, skipping");
            return Vec::new();
        }

        let paths = match self.manifest_paths().await {
            Ok(paths) => paths,
            Err(e) => {
                return vec![Err(MdaError::ModuleError {
                    module: self.dir.display().to_string(),
                    reason: format!("failed to read manifest directory: {e}"),
                })]
            }
        };

        let mut candidates = Vec::with_capacity(paths.len());
        for path in &paths {
            candidates.push(self.load(path).await);
        }
        info!(
            dir = %self.dir.display(),
            manifests = paths.len(),
            "Scanned driver manifests"
        );
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_preserves_arg_order() {
        let manifest = DriverManifest::from_toml(
            r#"
            name = "stage"
            description = "Two-axis stage"
            implementation = "example"

            [[args]]
            name = "port"
            help = "Serial port"

            [[args]]
            name = "address"
            help = "Bus address"
            "#,
        )
        .unwrap();
        let ty = manifest.device_type();
        assert_eq!(ty.arg_names().collect::<Vec<_>>(), ["port", "address"]);
    }

    #[test]
    fn test_manifest_rejects_unknown_keys() {
        let result = DriverManifest::from_toml(
            r#"
            name = "stage"
            description = "Two-axis stage"
            implementation = "example"
            baud = 9600
            "#,
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_missing_directory_yields_nothing() {
        let source = ManifestDirectorySource::new(
            "/nonexistent/mda/drivers",
            Arc::new(ImplementationCatalog::new()),
        );
        assert!(source.candidates().await.is_empty());
    }
}
