//! Build units and their mutable run state.

use crate::plan::configuration::ConfigNode;
use crate::plan::descriptor::Coordinate;
use crate::plan::scope::Scope;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_packaging() -> String {
    "jar".to_string()
}

fn default_execution_id() -> String {
    "default".to_string()
}

/// Edge to another unit of the same build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitDependency {
    pub unit: String,
    /// Declared scope; `None` reads as compile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,
}

impl UnitDependency {
    pub fn new(unit: impl Into<String>, scope: Option<Scope>) -> Self {
        Self {
            unit: unit.into(),
            scope,
        }
    }
}

/// An execution block declared under a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionDecl {
    #[serde(default = "default_execution_id")]
    pub id: String,
    /// Bound phase; falls back to each goal's default phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<ConfigNode>,
}

/// A plugin used by a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginUse {
    pub coordinate: Coordinate,
    /// Plugin-level configuration, shared by every execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<ConfigNode>,
    #[serde(default)]
    pub executions: Vec<ExecutionDecl>,
}

impl PluginUse {
    pub fn new(coordinate: Coordinate) -> Self {
        Self {
            coordinate,
            configuration: None,
            executions: Vec::new(),
        }
    }

    pub fn execution(&self, id: &str) -> Option<&ExecutionDecl> {
        self.executions.iter().find(|e| e.id == id)
    }

    /// Configuration of execution `id` merged over the plugin-level one.
    pub fn configuration_for(&self, id: &str) -> Option<ConfigNode> {
        let execution = self.execution(id).and_then(|e| e.configuration.as_ref());
        match (execution, &self.configuration) {
            (Some(execution), Some(plugin)) => Some(execution.merged_over(plugin)),
            (Some(execution), None) => Some(execution.clone()),
            (None, plugin) => plugin.clone(),
        }
    }
}

/// One unit (project) of a multi-unit build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildUnit {
    pub id: String,
    #[serde(default = "default_packaging")]
    pub packaging: String,
    #[serde(default)]
    pub dependencies: Vec<UnitDependency>,
    /// Child units aggregated by this one.
    #[serde(default)]
    pub modules: Vec<String>,
    #[serde(default)]
    pub plugins: Vec<PluginUse>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl BuildUnit {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            packaging: default_packaging(),
            dependencies: Vec::new(),
            modules: Vec::new(),
            plugins: Vec::new(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_packaging(mut self, packaging: impl Into<String>) -> Self {
        self.packaging = packaging.into();
        self
    }

    pub fn depends_on(mut self, unit: impl Into<String>, scope: Option<Scope>) -> Self {
        self.dependencies.push(UnitDependency::new(unit, scope));
        self
    }

    pub fn with_module(mut self, unit: impl Into<String>) -> Self {
        self.modules.push(unit.into());
        self
    }

    pub fn with_plugin(mut self, plugin: PluginUse) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Plugin declaration matching `coordinate`, ignoring versions.
    pub fn plugin(&self, coordinate: &Coordinate) -> Option<&PluginUse> {
        let key = coordinate.key();
        self.plugins.iter().find(|p| p.coordinate.key() == key)
    }
}

/// What a unit accumulates while it builds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UnitState {
    /// Last phase a step of this unit ran in.
    pub last_phase: Option<String>,
    /// Steps run so far, in order.
    pub executed: Vec<String>,
    pub properties: BTreeMap<String, String>,
    /// State produced by the forks of the step currently running.
    #[serde(skip)]
    pub execution_snapshot: Option<Box<UnitState>>,
}

impl UnitState {
    pub fn for_unit(unit: &BuildUnit) -> Self {
        Self {
            properties: unit.properties.clone(),
            ..Default::default()
        }
    }

    /// Copy used by forked executions; the snapshot slot starts empty.
    pub fn snapshot(&self) -> Self {
        Self {
            last_phase: self.last_phase.clone(),
            executed: self.executed.clone(),
            properties: self.properties.clone(),
            execution_snapshot: None,
        }
    }
}
