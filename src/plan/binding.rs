//! Step bindings and goal specifications.

use super::configuration::ConfigNode;
use super::descriptor::{Coordinate, DescriptorResolver};
use crate::errors::{BuildError, Result};
use crate::lifecycle::defaults;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Execution id given to goals requested on the command line.
pub const DEFAULT_CLI_EXECUTION_ID: &str = "default-cli";

/// A step declared against a phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepBinding {
    pub plugin: Coordinate,
    pub goal: String,
    /// Bound phase; `None` means the descriptor's default phase applies.
    pub phase: Option<String>,
    /// Lower sorts first among bindings of the same execution point.
    pub priority: i32,
    pub execution_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configuration: Option<ConfigNode>,
}

impl StepBinding {
    pub fn new(plugin: Coordinate, goal: impl Into<String>) -> Self {
        let goal = goal.into();
        Self {
            execution_id: format!("default-{}", goal),
            plugin,
            goal,
            phase: None,
            priority: 0,
            configuration: None,
        }
    }

    pub fn in_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_execution_id(mut self, id: impl Into<String>) -> Self {
        self.execution_id = id.into();
        self
    }

    pub fn with_configuration(mut self, configuration: Option<ConfigNode>) -> Self {
        self.configuration = configuration;
        self
    }
}

/// Parse a `group:artifact[:version]:goal` binding.
///
/// Any other token count is a configuration error; callers log it and skip
/// the binding.
pub fn parse_binding(spec: &str) -> Result<(Coordinate, String)> {
    let tokens: Vec<&str> = spec.trim().split(':').collect();
    if tokens.iter().any(|t| t.is_empty()) {
        return Err(invalid_binding(spec));
    }
    match tokens.as_slice() {
        [group, artifact, goal] => Ok((Coordinate::new(*group, *artifact), goal.to_string())),
        [group, artifact, version, goal] => Ok((
            Coordinate::new(*group, *artifact).with_version(*version),
            goal.to_string(),
        )),
        _ => Err(invalid_binding(spec)),
    }
}

fn invalid_binding(spec: &str) -> BuildError {
    BuildError::configuration(format!(
        "Invalid step binding '{}'. Expected group:artifact:goal or group:artifact:version:goal",
        spec
    ))
}

/// Plugin part of a goal specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginRef {
    Prefix(String),
    Coordinate(Coordinate),
}

/// A goal requested as a task, `plugin:goal[@executionId]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GoalSpec {
    pub plugin: PluginRef,
    pub goal: String,
    pub execution_id: Option<String>,
}

impl GoalSpec {
    /// Parse `prefix:goal`, `group:artifact:goal` or
    /// `group:artifact:version:goal`, each with an optional `@id` suffix.
    pub fn parse(raw: &str) -> Result<Self> {
        let (spec, execution_id) = match raw.split_once('@') {
            Some((spec, id)) if !id.is_empty() => (spec, Some(id.to_string())),
            Some(_) => return Err(invalid_goal(raw)),
            None => (raw, None),
        };

        let tokens: Vec<&str> = spec.split(':').collect();
        if tokens.iter().any(|t| t.is_empty()) {
            return Err(invalid_goal(raw));
        }
        let (plugin, goal) = match tokens.as_slice() {
            [prefix, goal] => (PluginRef::Prefix(prefix.to_string()), *goal),
            [group, artifact, goal] => (
                PluginRef::Coordinate(Coordinate::new(*group, *artifact)),
                *goal,
            ),
            [group, artifact, version, goal] => (
                PluginRef::Coordinate(Coordinate::new(*group, *artifact).with_version(*version)),
                *goal,
            ),
            _ => return Err(invalid_goal(raw)),
        };

        Ok(Self {
            plugin,
            goal: goal.to_string(),
            execution_id,
        })
    }

    pub fn execution_id(&self) -> &str {
        self.execution_id.as_deref().unwrap_or(DEFAULT_CLI_EXECUTION_ID)
    }

    /// Resolve the plugin coordinate, looking prefixes up in `resolver`.
    pub fn coordinate(&self, resolver: &dyn DescriptorResolver) -> Result<Coordinate> {
        match &self.plugin {
            PluginRef::Prefix(prefix) => resolver.resolve_prefix(prefix),
            PluginRef::Coordinate(coordinate) => Ok(coordinate.clone()),
        }
    }
}

fn invalid_goal(raw: &str) -> BuildError {
    BuildError::configuration(format!(
        "Invalid task '{}': you must specify a valid lifecycle phase, or a goal in the format \
         plugin:goal or pluginGroupId:pluginArtifactId[:pluginVersion]:goal",
        raw
    ))
}

impl fmt::Display for GoalSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.plugin {
            PluginRef::Prefix(prefix) => write!(f, "{}:{}", prefix, self.goal)?,
            PluginRef::Coordinate(coordinate) => write!(f, "{}:{}", coordinate, self.goal)?,
        }
        if let Some(id) = &self.execution_id {
            write!(f, "@{}", id)?;
        }
        Ok(())
    }
}

/// Default bindings of each packaging type.
#[derive(Debug, Clone, Default)]
pub struct PackagingRegistry {
    packagings: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

impl PackagingRegistry {
    pub fn new(packagings: BTreeMap<String, BTreeMap<String, Vec<String>>>) -> Self {
        Self { packagings }
    }

    /// `jar` and `pom`.
    pub fn standard() -> Self {
        Self::new(defaults::standard_packagings())
    }

    /// Add or replace the bindings of one packaging.
    pub fn register(&mut self, packaging: impl Into<String>, phases: BTreeMap<String, Vec<String>>) {
        self.packagings.insert(packaging.into(), phases);
    }

    pub fn contains(&self, packaging: &str) -> bool {
        self.packagings.contains_key(packaging)
    }

    /// Parsed bindings of `packaging`, phase by phase.
    ///
    /// Malformed specs are logged and skipped.
    pub fn bindings(&self, packaging: &str) -> Result<Vec<StepBinding>> {
        let phases = self.packagings.get(packaging).ok_or_else(|| {
            BuildError::configuration(format!("Unknown packaging '{}'", packaging))
        })?;

        let mut bindings = Vec::new();
        for (phase, specs) in phases {
            for spec in specs {
                match parse_binding(spec) {
                    Ok((plugin, goal)) => {
                        bindings.push(StepBinding::new(plugin, goal).in_phase(phase.clone()))
                    }
                    Err(e) => tracing::warn!(packaging, phase, "{}", e.message),
                }
            }
        }
        Ok(bindings)
    }
}
