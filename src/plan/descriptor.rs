//! Step descriptors: what a build step declares about itself.
//!
//! Descriptors are supplied by a [`DescriptorResolver`]. The planner only
//! reads them; it never loads step code.

use super::configuration::{ConfigNode, DEFAULT_VALUE};
use super::scope::ResolutionScope;
use crate::errors::{BuildError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// `group:artifact[:version]` of a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Coordinate {
    pub group: String,
    pub artifact: String,
    pub version: Option<String>,
}

impl Coordinate {
    pub fn new(group: impl Into<String>, artifact: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            artifact: artifact.into(),
            version: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Version-less identity, `group:artifact`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.group, self.artifact)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}:{}:{}", self.group, self.artifact, version),
            None => write!(f, "{}:{}", self.group, self.artifact),
        }
    }
}

impl FromStr for Coordinate {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(BuildError::configuration(format!(
                "Invalid plugin coordinate '{}'. Expected group:artifact[:version]",
                s
            )));
        }
        match parts.as_slice() {
            [group, artifact] => Ok(Coordinate::new(*group, *artifact)),
            [group, artifact, version] => {
                Ok(Coordinate::new(*group, *artifact).with_version(*version))
            }
            _ => Err(BuildError::configuration(format!(
                "Invalid plugin coordinate '{}'. Expected group:artifact[:version]",
                s
            ))),
        }
    }
}

impl TryFrom<String> for Coordinate {
    type Error = BuildError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Coordinate> for String {
    fn from(value: Coordinate) -> Self {
        value.to_string()
    }
}

/// Identity of a step descriptor: plugin `group:artifact` plus goal.
///
/// Executions of the same descriptor share a key regardless of their
/// execution id or bound phase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct StepKey {
    pub plugin: String,
    pub goal: String,
}

impl fmt::Display for StepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.plugin, self.goal)
    }
}

/// A configurable parameter of a step.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Expression evaluated at run time, e.g. `${project.build.directory}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implementation: Option<String>,
}

impl Parameter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn with_implementation(mut self, implementation: impl Into<String>) -> Self {
        self.implementation = Some(implementation.into());
        self
    }
}

/// Work a step requires before it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ForkSpec {
    /// Run a lifecycle up to `phase`, optionally with an overlay from the
    /// step's plugin named `lifecycle`.
    Phase {
        phase: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lifecycle: Option<String>,
    },
    /// Run one other goal of the same plugin.
    Goal { goal: String },
}

/// One execution inside an overlay phase.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OverlayExecution {
    /// `goal` (same plugin) or `group:artifact[:version]:goal`.
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<ConfigNode>,
}

/// Extra work and configuration for one phase of a forked lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OverlayPhase {
    pub id: String,
    #[serde(default)]
    pub executions: Vec<OverlayExecution>,
    /// Merged over every forked step of this phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<ConfigNode>,
}

/// A named lifecycle overlay declared by a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LifecycleOverlay {
    pub id: String,
    #[serde(default)]
    pub phases: Vec<OverlayPhase>,
}

fn default_true() -> bool {
    true
}

/// Metadata of one goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDescriptor {
    /// Owning plugin; filled in by the catalog.
    #[serde(skip)]
    pub plugin: Coordinate,
    pub goal: String,
    /// Phase the goal binds to when an execution names no phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fork: Option<ForkSpec>,
    /// Operates on every unit of the build rather than its own.
    #[serde(default)]
    pub aggregator: bool,
    #[serde(default)]
    pub online_required: bool,
    #[serde(default = "default_true")]
    pub project_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_resolution: Option<ResolutionScope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_collection: Option<ResolutionScope>,
}

impl StepDescriptor {
    pub fn new(plugin: Coordinate, goal: impl Into<String>) -> Self {
        Self {
            plugin,
            goal: goal.into(),
            phase: None,
            parameters: Vec::new(),
            fork: None,
            aggregator: false,
            online_required: false,
            project_required: true,
            requires_resolution: None,
            requires_collection: None,
        }
    }

    pub fn key(&self) -> StepKey {
        StepKey {
            plugin: self.plugin.key(),
            goal: self.goal.clone(),
        }
    }

    pub fn is_forking(&self) -> bool {
        self.fork.is_some()
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Configuration built from parameter defaults alone.
    ///
    /// Each parameter with an expression or default value becomes a child
    /// whose value is the expression and whose `default-value` attribute
    /// carries the default.
    pub fn default_configuration(&self) -> ConfigNode {
        let mut root = ConfigNode::root();
        for parameter in &self.parameters {
            if parameter.expression.is_none() && parameter.default_value.is_none() {
                continue;
            }
            let mut node = ConfigNode::new(parameter.name.clone());
            node.value = parameter.expression.clone();
            if let Some(default) = &parameter.default_value {
                node = node.with_attribute(DEFAULT_VALUE, default.clone());
            }
            root.children.push(node);
        }
        root
    }
}

impl fmt::Display for StepDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.plugin, self.goal)
    }
}

/// Metadata of a whole plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub coordinate: Coordinate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default)]
    pub goals: Vec<StepDescriptor>,
    #[serde(default)]
    pub lifecycles: Vec<LifecycleOverlay>,
}

impl PluginDescriptor {
    pub fn new(coordinate: Coordinate) -> Self {
        Self {
            coordinate,
            prefix: None,
            goals: Vec::new(),
            lifecycles: Vec::new(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_goal(mut self, goal: StepDescriptor) -> Self {
        self.goals.push(goal);
        self
    }

    pub fn with_lifecycle(mut self, overlay: LifecycleOverlay) -> Self {
        self.lifecycles.push(overlay);
        self
    }
}

/// Lookup service for step metadata.
pub trait DescriptorResolver: Send + Sync {
    /// Descriptor of `goal` in `plugin`.
    fn resolve(&self, plugin: &Coordinate, goal: &str) -> Result<Arc<StepDescriptor>>;

    /// Plugin registered under a short prefix, e.g. `compiler`.
    fn resolve_prefix(&self, prefix: &str) -> Result<Coordinate>;

    /// Lifecycle overlay `id` declared by `plugin`.
    fn overlay(&self, plugin: &Coordinate, id: &str) -> Result<LifecycleOverlay>;
}
