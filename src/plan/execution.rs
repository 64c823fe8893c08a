//! Step executions and plans.
//!
//! A [`StepExecutionBuilder`] holds a resolved descriptor and the declared
//! configuration, which fork overlays may still change. [`configure`]
//! finalizes the configuration and yields an immutable [`StepExecution`].
//! Fork expansion then consumes the execution and returns a new one with
//! its forks attached.
//!
//! [`configure`]: StepExecutionBuilder::configure

use super::binding::StepBinding;
use super::configuration::{self, ConfigNode};
use super::descriptor::{DescriptorResolver, StepDescriptor, StepKey};
use super::scope::Scope;
use crate::errors::Result;
use serde::{Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Where an execution came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionSource {
    /// Requested explicitly as a goal task.
    Cli,
    /// Bound to a lifecycle phase.
    Lifecycle,
    /// Produced by fork expansion.
    Forked,
}

impl fmt::Display for ExecutionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionSource::Cli => write!(f, "cli"),
            ExecutionSource::Lifecycle => write!(f, "lifecycle"),
            ExecutionSource::Forked => write!(f, "forked"),
        }
    }
}

/// An execution whose descriptor is resolved but whose configuration is
/// still open.
#[derive(Debug, Clone)]
pub struct StepExecutionBuilder {
    descriptor: Arc<StepDescriptor>,
    execution_id: String,
    lifecycle_phase: Option<String>,
    source: ExecutionSource,
    configuration: Option<ConfigNode>,
}

impl StepExecutionBuilder {
    pub fn new(
        descriptor: Arc<StepDescriptor>,
        execution_id: impl Into<String>,
        source: ExecutionSource,
    ) -> Self {
        Self {
            descriptor,
            execution_id: execution_id.into(),
            lifecycle_phase: None,
            source,
            configuration: None,
        }
    }

    /// Resolve the descriptor of a binding.
    pub fn resolve(
        binding: &StepBinding,
        resolver: &dyn DescriptorResolver,
        source: ExecutionSource,
    ) -> Result<Self> {
        let descriptor = resolver.resolve(&binding.plugin, &binding.goal)?;
        Ok(Self::new(descriptor, binding.execution_id.clone(), source)
            .in_phase(binding.phase.clone())
            .with_configuration(binding.configuration.clone()))
    }

    pub fn in_phase(mut self, phase: Option<String>) -> Self {
        self.lifecycle_phase = phase;
        self
    }

    pub fn with_configuration(mut self, configuration: Option<ConfigNode>) -> Self {
        self.configuration = configuration;
        self
    }

    pub fn set_source(&mut self, source: ExecutionSource) {
        self.source = source;
    }

    /// Merge `dominant` over the declared configuration.
    pub fn overlay(&mut self, dominant: &ConfigNode) {
        self.configuration = Some(match &self.configuration {
            Some(declared) => dominant.merged_over(declared),
            None => dominant.clone(),
        });
    }

    pub fn descriptor(&self) -> &Arc<StepDescriptor> {
        &self.descriptor
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn configuration(&self) -> Option<&ConfigNode> {
        self.configuration.as_ref()
    }

    /// Finalize the configuration against the descriptor's parameters.
    pub fn configure(self) -> StepExecution {
        let configuration = configuration::finalize(&self.descriptor, self.configuration.as_ref());
        StepExecution {
            descriptor: self.descriptor,
            execution_id: self.execution_id,
            lifecycle_phase: self.lifecycle_phase,
            source: self.source,
            configuration,
            forks: ForkState::Pending,
        }
    }
}

/// Nested executions of one unit produced by a fork.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForkedUnit {
    pub unit: String,
    pub executions: Vec<StepExecution>,
}

/// Fork expansion progress of a configured execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "state", content = "units", rename_all = "snake_case")]
pub enum ForkState {
    /// Not yet checked for a fork specification.
    #[default]
    Pending,
    /// Checked; the descriptor does not fork.
    NotForking,
    /// Forks resolved and attached, unit by unit.
    Expanded(Vec<ForkedUnit>),
}

/// One concrete, configured step invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepExecution {
    #[serde(rename = "step", serialize_with = "serialize_descriptor")]
    descriptor: Arc<StepDescriptor>,
    execution_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    lifecycle_phase: Option<String>,
    source: ExecutionSource,
    configuration: ConfigNode,
    forks: ForkState,
}

fn serialize_descriptor<S: Serializer>(
    descriptor: &Arc<StepDescriptor>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(descriptor)
}

impl StepExecution {
    pub fn descriptor(&self) -> &StepDescriptor {
        &self.descriptor
    }

    pub fn key(&self) -> StepKey {
        self.descriptor.key()
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn lifecycle_phase(&self) -> Option<&str> {
        self.lifecycle_phase.as_deref()
    }

    pub fn source(&self) -> ExecutionSource {
        self.source
    }

    pub fn configuration(&self) -> &ConfigNode {
        &self.configuration
    }

    pub fn fork_state(&self) -> &ForkState {
        &self.forks
    }

    /// Forked executions, unit by unit; empty unless forks were expanded.
    pub fn forked_units(&self) -> &[ForkedUnit] {
        match &self.forks {
            ForkState::Expanded(units) => units,
            _ => &[],
        }
    }

    /// Touches every unit of the build, not just its own.
    pub fn is_aggregating(&self) -> bool {
        self.descriptor.aggregator
    }

    /// Artifact scopes that must be resolved before this step runs.
    pub fn required_scopes(&self) -> BTreeSet<Scope> {
        let mut scopes = BTreeSet::new();
        if let Some(resolution) = self.descriptor.requires_resolution {
            scopes.extend(resolution.scopes());
        }
        if let Some(collection) = self.descriptor.requires_collection {
            scopes.extend(collection.scopes());
        }
        scopes
    }

    pub(crate) fn not_forking(mut self) -> Self {
        self.forks = ForkState::NotForking;
        self
    }

    pub(crate) fn with_forks(mut self, units: Vec<ForkedUnit>) -> Self {
        self.forks = ForkState::Expanded(units);
        self
    }
}

impl fmt::Display for StepExecution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plugin = &self.descriptor.plugin;
        match &plugin.version {
            Some(version) => write!(
                f,
                "{}:{}:{} ({})",
                plugin.artifact, version, self.descriptor.goal, self.execution_id
            ),
            None => write!(
                f,
                "{}:{} ({})",
                plugin.artifact, self.descriptor.goal, self.execution_id
            ),
        }
    }
}

/// Ordered executions of one unit for one task segment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionPlan {
    pub unit: String,
    pub executions: Vec<StepExecution>,
}

impl ExecutionPlan {
    pub fn new(unit: impl Into<String>, executions: Vec<StepExecution>) -> Self {
        Self {
            unit: unit.into(),
            executions,
        }
    }

    pub fn len(&self) -> usize {
        self.executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StepExecution> {
        self.executions.iter()
    }

    /// Every descriptor key in the plan, forks included.
    pub fn keys(&self) -> Vec<StepKey> {
        fn collect(executions: &[StepExecution], keys: &mut Vec<StepKey>) {
            for execution in executions {
                for unit in execution.forked_units() {
                    collect(&unit.executions, keys);
                }
                keys.push(execution.key());
            }
        }
        let mut keys = Vec::new();
        collect(&self.executions, &mut keys);
        keys
    }

    /// Union of the scopes required by every execution.
    pub fn required_scopes(&self) -> BTreeSet<Scope> {
        self.executions
            .iter()
            .flat_map(StepExecution::required_scopes)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::descriptor::{Coordinate, Parameter};
    use crate::plan::scope::ResolutionScope;

    fn descriptor() -> Arc<StepDescriptor> {
        let mut d = StepDescriptor::new(
            Coordinate::new("org.acme", "acme-plugin").with_version("1.0"),
            "build",
        );
        d.parameters = vec![Parameter::new("mode").with_default("fast")];
        d.requires_resolution = Some(ResolutionScope::Runtime);
        Arc::new(d)
    }

    #[test]
    fn test_configure_finalizes_declared_configuration() {
        let builder = StepExecutionBuilder::new(descriptor(), "default-build", ExecutionSource::Lifecycle)
            .with_configuration(Some(
                ConfigNode::root().with_child(ConfigNode::new("mode").with_value("slow")),
            ));

        let execution = builder.configure();
        let mode = execution.configuration().child("mode").unwrap();
        assert_eq!(mode.value.as_deref(), Some("slow"));
        assert_eq!(execution.fork_state(), &ForkState::Pending);
        assert!(execution.forked_units().is_empty());
    }

    #[test]
    fn test_overlay_is_dominant() {
        let mut builder = StepExecutionBuilder::new(descriptor(), "x", ExecutionSource::Forked)
            .with_configuration(Some(
                ConfigNode::root().with_child(ConfigNode::new("mode").with_value("slow")),
            ));
        builder.overlay(&ConfigNode::root().with_child(ConfigNode::new("mode").with_value("quick")));

        let execution = builder.configure();
        assert_eq!(
            execution.configuration().child("mode").unwrap().value.as_deref(),
            Some("quick")
        );
    }

    #[test]
    fn test_execution_display() {
        let execution =
            StepExecutionBuilder::new(descriptor(), "default-build", ExecutionSource::Lifecycle)
                .configure();
        assert_eq!(execution.to_string(), "acme-plugin:1.0:build (default-build)");
    }

    #[test]
    fn test_plan_keys_include_forks() {
        let forked = StepExecutionBuilder::new(descriptor(), "x", ExecutionSource::Forked)
            .configure()
            .not_forking();
        let top = StepExecutionBuilder::new(descriptor(), "y", ExecutionSource::Cli)
            .configure()
            .with_forks(vec![ForkedUnit {
                unit: "app".into(),
                executions: vec![forked],
            }]);

        let plan = ExecutionPlan::new("app", vec![top]);
        assert_eq!(plan.keys().len(), 2);
        assert_eq!(plan.len(), 1);
        assert!(plan.required_scopes().contains(&Scope::Runtime));
    }

    #[test]
    fn test_execution_serializes_step_name() {
        let execution =
            StepExecutionBuilder::new(descriptor(), "default-build", ExecutionSource::Lifecycle)
                .configure();
        let json = serde_json::to_value(&execution).unwrap();
        assert_eq!(json["step"], "org.acme:acme-plugin:1.0:build");
        assert_eq!(json["source"], "lifecycle");
    }
}
