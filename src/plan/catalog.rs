//! In-memory descriptor catalog.

use super::configuration::ConfigNode;
use super::descriptor::{
    Coordinate, DescriptorResolver, ForkSpec, LifecycleOverlay, OverlayPhase, Parameter,
    PluginDescriptor, StepDescriptor,
};
use super::scope::ResolutionScope;
use crate::errors::{BuildError, Result};
use std::collections::HashMap;
use std::sync::Arc;

const PLUGINS: &str = "org.apache.maven.plugins";

#[derive(Debug)]
struct CatalogEntry {
    coordinate: Coordinate,
    goals: Vec<Arc<StepDescriptor>>,
    lifecycles: Vec<LifecycleOverlay>,
}

/// Descriptors registered up front, keyed by `group:artifact`.
#[derive(Debug, Default)]
pub struct DescriptorCatalog {
    plugins: HashMap<String, CatalogEntry>,
    prefixes: HashMap<String, Coordinate>,
}

impl DescriptorCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with descriptors for the plugins the built-in lifecycles and
    /// packagings bind.
    pub fn standard() -> Self {
        let mut catalog = Self::new();
        for plugin in standard_plugins() {
            catalog.register(plugin);
        }
        catalog
    }

    /// Register a plugin, replacing any plugin with the same `group:artifact`.
    pub fn register(&mut self, plugin: PluginDescriptor) {
        let coordinate = plugin.coordinate;
        let goals = plugin
            .goals
            .into_iter()
            .map(|mut goal| {
                goal.plugin = coordinate.clone();
                Arc::new(goal)
            })
            .collect();
        if let Some(prefix) = plugin.prefix {
            self.prefixes.insert(prefix, coordinate.clone());
        }
        self.plugins.insert(
            coordinate.key(),
            CatalogEntry {
                coordinate,
                goals,
                lifecycles: plugin.lifecycles,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    fn entry(&self, plugin: &Coordinate) -> Result<&CatalogEntry> {
        self.plugins.get(&plugin.key()).ok_or_else(|| {
            BuildError::resolution(format!("Plugin {} could not be found", plugin))
        })
    }
}

impl DescriptorResolver for DescriptorCatalog {
    fn resolve(&self, plugin: &Coordinate, goal: &str) -> Result<Arc<StepDescriptor>> {
        let entry = self.entry(plugin)?;
        entry
            .goals
            .iter()
            .find(|d| d.goal == goal)
            .cloned()
            .ok_or_else(|| {
                let available: Vec<&str> = entry.goals.iter().map(|d| d.goal.as_str()).collect();
                BuildError::resolution(format!(
                    "Could not find goal '{}' in plugin {} among available goals {}",
                    goal,
                    entry.coordinate,
                    available.join(", ")
                ))
            })
    }

    fn resolve_prefix(&self, prefix: &str) -> Result<Coordinate> {
        self.prefixes.get(prefix).cloned().ok_or_else(|| {
            BuildError::resolution(format!(
                "No plugin found for prefix '{}' in the current project",
                prefix
            ))
        })
    }

    fn overlay(&self, plugin: &Coordinate, id: &str) -> Result<LifecycleOverlay> {
        let entry = self.entry(plugin)?;
        entry
            .lifecycles
            .iter()
            .find(|l| l.id == id)
            .cloned()
            .ok_or_else(|| {
                BuildError::resolution(format!(
                    "Lifecycle '{}' is not declared by plugin {}",
                    id, entry.coordinate
                ))
            })
    }
}

fn plugin(artifact: &str, version: &str, prefix: &str) -> PluginDescriptor {
    PluginDescriptor::new(Coordinate::new(PLUGINS, artifact).with_version(version)).with_prefix(prefix)
}

fn goal(name: &str, phase: &str) -> StepDescriptor {
    let mut descriptor = StepDescriptor::new(Coordinate::default(), name);
    descriptor.phase = Some(phase.to_string());
    descriptor
}

fn standard_plugins() -> Vec<PluginDescriptor> {
    let output = Parameter::new("outputDirectory")
        .with_expression("${project.build.outputDirectory}")
        .with_default("target/classes");

    let mut compile = goal("compile", "compile");
    compile.requires_resolution = Some(ResolutionScope::Compile);
    compile.parameters = vec![
        Parameter::new("source")
            .with_expression("${maven.compiler.source}")
            .with_default("1.8"),
        Parameter::new("target")
            .with_expression("${maven.compiler.target}")
            .with_default("1.8"),
        output.clone(),
    ];
    let mut test_compile = goal("testCompile", "test-compile");
    test_compile.requires_resolution = Some(ResolutionScope::Test);
    test_compile.parameters = vec![
        Parameter::new("skip").with_expression("${maven.test.skip}"),
        Parameter::new("testOutputDirectory")
            .with_expression("${project.build.testOutputDirectory}")
            .with_default("target/test-classes"),
    ];

    let mut resources = goal("resources", "process-resources");
    resources.parameters = vec![output];
    let test_resources = goal("testResources", "process-test-resources");

    let mut test = goal("test", "test");
    test.requires_resolution = Some(ResolutionScope::Test);
    test.parameters = vec![
        Parameter::new("skipTests").with_expression("${skipTests}"),
        Parameter::new("testFailureIgnore")
            .with_expression("${maven.test.failure.ignore}")
            .with_default("false"),
    ];

    let mut jar = goal("jar", "package");
    jar.requires_resolution = Some(ResolutionScope::Runtime);
    let mut test_jar = goal("test-jar", "package");
    test_jar.requires_resolution = Some(ResolutionScope::Test);

    let mut install = goal("install", "install");
    install.parameters = vec![Parameter::new("skip").with_expression("${maven.install.skip}")];
    let mut deploy = goal("deploy", "deploy");
    deploy.online_required = true;

    let mut clean = goal("clean", "clean");
    clean.parameters = vec![
        Parameter::new("skip").with_expression("${maven.clean.skip}"),
        Parameter::new("failOnError")
            .with_expression("${maven.clean.failOnError}")
            .with_default("true"),
    ];

    let mut site = goal("site", "site");
    site.requires_resolution = Some(ResolutionScope::Test);
    let mut site_deploy = goal("deploy", "site-deploy");
    site_deploy.online_required = true;

    let mut source_jar = goal("jar", "package");
    source_jar.fork = Some(ForkSpec::Phase {
        phase: "generate-sources".to_string(),
        lifecycle: Some("source".to_string()),
    });
    let source_overlay = LifecycleOverlay {
        id: "source".to_string(),
        phases: vec![OverlayPhase {
            id: "generate-sources".to_string(),
            executions: Vec::new(),
            configuration: Some(
                ConfigNode::root().with_child(ConfigNode::new("attach").with_value("false")),
            ),
        }],
    };

    let mut help = StepDescriptor::new(Coordinate::default(), "help");
    help.project_required = false;

    vec![
        plugin("maven-clean-plugin", "3.2.0", "clean").with_goal(clean),
        plugin("maven-resources-plugin", "3.3.1", "resources")
            .with_goal(resources)
            .with_goal(test_resources),
        plugin("maven-compiler-plugin", "3.14.0", "compiler")
            .with_goal(compile)
            .with_goal(test_compile),
        plugin("maven-surefire-plugin", "3.5.3", "surefire").with_goal(test),
        plugin("maven-jar-plugin", "3.4.2", "jar")
            .with_goal(jar)
            .with_goal(test_jar),
        plugin("maven-source-plugin", "3.3.1", "source")
            .with_goal(source_jar)
            .with_lifecycle(source_overlay),
        plugin("maven-install-plugin", "3.1.4", "install").with_goal(install),
        plugin("maven-deploy-plugin", "3.1.4", "deploy").with_goal(deploy),
        plugin("maven-site-plugin", "3.12.1", "site")
            .with_goal(site)
            .with_goal(site_deploy),
        plugin("maven-help-plugin", "3.5.1", "help").with_goal(help),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    #[test]
    fn test_standard_catalog_resolves_packaging_goals() {
        let catalog = DescriptorCatalog::standard();
        let compiler = Coordinate::new(PLUGINS, "maven-compiler-plugin");

        let compile = catalog.resolve(&compiler, "compile").unwrap();
        assert_eq!(compile.plugin.key(), "org.apache.maven.plugins:maven-compiler-plugin");
        assert_eq!(compile.plugin.version.as_deref(), Some("3.14.0"));
        assert_eq!(compile.requires_resolution, Some(ResolutionScope::Compile));
    }

    #[test]
    fn test_resolve_ignores_requested_version() {
        let catalog = DescriptorCatalog::standard();
        let clean = Coordinate::new(PLUGINS, "maven-clean-plugin").with_version("9.9");
        assert!(catalog.resolve(&clean, "clean").is_ok());
    }

    #[test]
    fn test_unknown_goal_is_resolution_error() {
        let catalog = DescriptorCatalog::standard();
        let err = catalog
            .resolve(&Coordinate::new(PLUGINS, "maven-jar-plugin"), "explode")
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Resolution);
        assert!(err.message.contains("among available goals jar, test-jar"));

        let err = catalog
            .resolve(&Coordinate::new("org.acme", "missing"), "run")
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Resolution);
    }

    #[test]
    fn test_resolve_prefix() {
        let catalog = DescriptorCatalog::standard();
        assert_eq!(
            catalog.resolve_prefix("compiler").unwrap().artifact,
            "maven-compiler-plugin"
        );
        assert!(catalog.resolve_prefix("nope").is_err());
    }

    #[test]
    fn test_overlay_lookup() {
        let catalog = DescriptorCatalog::standard();
        let source = Coordinate::new(PLUGINS, "maven-source-plugin");
        let overlay = catalog.overlay(&source, "source").unwrap();
        assert_eq!(overlay.phases[0].id, "generate-sources");
        assert!(catalog.overlay(&source, "other").is_err());
    }

    #[test]
    fn test_register_replaces_plugin() {
        let mut catalog = DescriptorCatalog::new();
        let coordinate = Coordinate::new("org.acme", "acme-plugin");
        catalog.register(
            PluginDescriptor::new(coordinate.clone()).with_goal(StepDescriptor::new(Coordinate::default(), "a")),
        );
        catalog.register(
            PluginDescriptor::new(coordinate.clone()).with_goal(StepDescriptor::new(Coordinate::default(), "b")),
        );

        assert_eq!(catalog.len(), 1);
        assert!(catalog.resolve(&coordinate, "a").is_err());
        assert_eq!(catalog.resolve(&coordinate, "b").unwrap().plugin, coordinate);
    }
}
