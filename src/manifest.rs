//! Build manifest.
//!
//! The TOML file the binary builds from: extra lifecycles, packaging
//! bindings, plugin descriptors and the build units themselves. The
//! standard lifecycles, packagings and plugins are always available; the
//! manifest adds to them and replaces entries with the same id.
//!
//! ```toml
//! default_tasks = ["install"]
//!
//! [packagings.war]
//! compile = ["org.apache.maven.plugins:maven-compiler-plugin:3.14.0:compile"]
//!
//! [[plugins]]
//! coordinate = "org.acme:acme-plugin:1.0"
//! prefix = "acme"
//!
//! [[plugins.goals]]
//! goal = "report"
//! aggregator = true
//!
//! [[units]]
//! id = "parent"
//! packaging = "pom"
//! modules = ["core"]
//!
//! [[units]]
//! id = "core"
//! ```

use crate::errors::{BuildError, Result};
use crate::lifecycle::{Lifecycle, LifecycleRegistry};
use crate::plan::binding::PackagingRegistry;
use crate::plan::calculator::PlanCalculator;
use crate::plan::catalog::DescriptorCatalog;
use crate::plan::descriptor::PluginDescriptor;
use crate::reactor::{BuildUnit, Reactor, UnitGraph};
use crate::session::{BuildSession, SessionSettings};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Default manifest file name.
pub const MANIFEST_FILE: &str = "build.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    /// Unit aggregating goals run on; the first unit when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    /// Tasks run when none are given
    #[serde(default)]
    pub default_tasks: Vec<String>,
    #[serde(default)]
    pub lifecycles: Vec<Lifecycle>,
    /// `packaging -> phase -> ["group:artifact[:version]:goal", ...]`
    #[serde(default)]
    pub packagings: BTreeMap<String, BTreeMap<String, Vec<String>>>,
    #[serde(default)]
    pub plugins: Vec<PluginDescriptor>,
    #[serde(default)]
    pub units: Vec<BuildUnit>,
}

impl Manifest {
    /// Load a manifest from a TOML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read build manifest: {}", path.display()))?;

        Self::parse(&content)
            .with_context(|| format!("Invalid build manifest: {}", path.display()))
    }

    /// Parse a manifest from a TOML string.
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).context("Failed to parse build manifest")
    }

    /// Standard lifecycles plus the declared ones.
    pub fn registry(&self) -> Result<LifecycleRegistry> {
        let mut registry = LifecycleRegistry::standard()?;
        for lifecycle in &self.lifecycles {
            registry.register(lifecycle.clone())?;
        }
        Ok(registry)
    }

    /// Standard plugins plus the declared ones.
    pub fn catalog(&self) -> DescriptorCatalog {
        let mut catalog = DescriptorCatalog::standard();
        for plugin in &self.plugins {
            catalog.register(plugin.clone());
        }
        catalog
    }

    /// Standard packagings plus the declared ones.
    pub fn packaging(&self) -> PackagingRegistry {
        let mut packaging = PackagingRegistry::standard();
        for (id, phases) in &self.packagings {
            packaging.register(id.clone(), phases.clone());
        }
        packaging
    }

    pub fn calculator(&self) -> Result<PlanCalculator> {
        Ok(PlanCalculator::new(
            Arc::new(self.registry()?),
            Arc::new(self.catalog()),
            self.packaging(),
        ))
    }

    pub fn reactor(&self) -> Result<Reactor> {
        let reactor = Reactor::new(UnitGraph::build(self.units.clone())?)?;
        match &self.root {
            Some(root) => reactor.with_root(root.clone()),
            None => Ok(reactor),
        }
    }

    /// A session over this manifest's units.
    pub fn session(&self, settings: SessionSettings) -> Result<BuildSession> {
        Ok(BuildSession::new(self.reactor()?, self.calculator()?).with_settings(settings))
    }

    /// Tasks to run: `requested`, or the default tasks when it is empty.
    pub fn tasks(&self, requested: &[String]) -> Result<Vec<String>> {
        if !requested.is_empty() {
            return Ok(requested.to_vec());
        }
        if self.default_tasks.is_empty() {
            return Err(BuildError::configuration(
                "No goals have been specified for this build and the manifest declares no default_tasks",
            ));
        }
        Ok(self.default_tasks.clone())
    }

    /// Validate the manifest and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let packaging = self.packaging();

        for unit in &self.units {
            if !packaging.contains(&unit.packaging) {
                warnings.push(format!(
                    "Unit '{}' uses unknown packaging '{}'; only explicit goals can run on it",
                    unit.id, unit.packaging
                ));
            }
        }
        for plugin in &self.plugins {
            if plugin.goals.is_empty() {
                warnings.push(format!("Plugin {} declares no goals", plugin.coordinate));
            }
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::descriptor::{Coordinate, DescriptorResolver};
    use crate::plan::task::Task;
    use tempfile::tempdir;

    const MANIFEST: &str = r#"
default_tasks = ["compile"]

[[lifecycles]]
id = "release"

[[lifecycles.phases]]
name = "prepare"

[[lifecycles.phases]]
name = "perform"
links = [{ kind = "after", pointer = { phase = "prepare" } }]
bindings = ["org.acme:acme-plugin:1.0:publish"]

[packagings.bundle]
compile = ["org.apache.maven.plugins:maven-compiler-plugin:3.14.0:compile"]
package = ["org.acme:acme-plugin:1.0:bundle"]

[[plugins]]
coordinate = "org.acme:acme-plugin:1.0"
prefix = "acme"

[[plugins.goals]]
goal = "bundle"
phase = "package"
fork = { goal = "prepare" }

[[plugins.goals]]
goal = "prepare"

[[plugins.goals]]
goal = "publish"
online_required = true

[[plugins.goals]]
goal = "report"
aggregator = true

[[units]]
id = "parent"
packaging = "pom"
modules = ["core", "app"]

[[units]]
id = "core"
packaging = "bundle"

[[units]]
id = "app"

[[units.dependencies]]
unit = "core"
"#;

    #[test]
    fn test_parse_manifest() {
        let manifest = Manifest::parse(MANIFEST).unwrap();
        assert_eq!(manifest.units.len(), 3);
        assert_eq!(manifest.plugins[0].goals.len(), 4);
        assert!(manifest.validate().is_empty());

        let reactor = manifest.reactor().unwrap();
        assert_eq!(reactor.root(), "parent");
        assert_eq!(reactor.units().upstream("app"), ["core"]);
    }

    #[test]
    fn test_declared_lifecycle_is_registered() {
        let registry = Manifest::parse(MANIFEST).unwrap().registry().unwrap();
        assert_eq!(registry.ids(), ["clean", "default", "site", "release"]);
        let order = registry.order("release").unwrap();
        assert_eq!(order.phases(), ["prepare", "perform"]);
    }

    #[test]
    fn test_catalog_includes_declared_plugins() {
        let catalog = Manifest::parse(MANIFEST).unwrap().catalog();
        let acme = catalog.resolve_prefix("acme").unwrap();
        assert_eq!(acme, Coordinate::new("org.acme", "acme-plugin").with_version("1.0"));
        assert!(catalog.resolve(&acme, "report").unwrap().aggregator);
        assert!(catalog.resolve(&acme, "missing").is_err());
    }

    #[test]
    fn test_custom_packaging_plans() {
        let manifest = Manifest::parse(MANIFEST).unwrap();
        let calculator = manifest.calculator().unwrap();
        let reactor = manifest.reactor().unwrap();
        let core = reactor.units().get("core").unwrap();

        let plan = calculator
            .calculate_plan(core, &[Task::parse("package").unwrap()], reactor.units())
            .unwrap();
        let goals: Vec<&str> = plan.iter().map(|e| e.descriptor().goal.as_str()).collect();
        assert_eq!(goals, ["compile", "bundle"]);
        assert_eq!(plan.executions[1].forked_units().len(), 1);
    }

    #[test]
    fn test_tasks_fall_back_to_defaults() {
        let manifest = Manifest::parse(MANIFEST).unwrap();
        assert_eq!(manifest.tasks(&[]).unwrap(), ["compile"]);
        assert_eq!(
            manifest.tasks(&["install".to_string()]).unwrap(),
            ["install"]
        );
        assert!(Manifest::default().tasks(&[]).is_err());
    }

    #[test]
    fn test_unknown_root_and_packaging() {
        let mut manifest = Manifest::parse(MANIFEST).unwrap();
        manifest.root = Some("nope".into());
        assert!(manifest.reactor().is_err());

        manifest.units[1].packaging = "ear".into();
        let warnings = manifest.validate();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("unknown packaging 'ear'"));
    }

    #[test]
    fn test_empty_manifest_has_no_units() {
        let manifest = Manifest::parse("").unwrap();
        assert!(manifest.reactor().unwrap_err().is_configuration());
    }

    #[test]
    fn test_load_reports_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(MANIFEST_FILE);
        std::fs::write(&path, "units = 3").unwrap();
        let err = Manifest::load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("Invalid build manifest"));

        let missing = Manifest::load(&dir.path().join("missing.toml")).unwrap_err();
        assert!(missing.to_string().contains("Failed to read build manifest"));
    }
}
