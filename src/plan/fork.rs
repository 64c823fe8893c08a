//! Fork expansion.
//!
//! A step whose descriptor declares a fork gets the forked work attached
//! before it runs: either a lifecycle run up to a phase, optionally shaped
//! by an overlay from the step's plugin, or a single other goal of the same
//! plugin. Forked steps may fork again. A guard set of descriptor keys,
//! fresh for every top-level execution and copied for every forked unit,
//! keeps a descriptor from being forked twice and stops runaway recursion.

use super::binding::parse_binding;
use super::calculator::{LifecycleMappings, PlanCalculator};
use super::descriptor::{ForkSpec, StepKey};
use super::execution::{
    ExecutionSource, ForkState, ForkedUnit, StepExecution, StepExecutionBuilder,
};
use crate::errors::{BuildError, Result};
use crate::reactor::graph::UnitGraph;
use crate::reactor::unit::BuildUnit;
use std::collections::HashSet;

/// Descriptors already planned for one top-level execution.
#[derive(Debug, Clone, Default)]
pub struct GuardSet {
    keys: HashSet<StepKey>,
}

impl GuardSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &StepKey) -> bool {
        self.keys.contains(key)
    }

    /// Returns `false` if the key was already present.
    pub fn insert(&mut self, key: StepKey) -> bool {
        self.keys.insert(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Expands fork specifications using the calculator's primitives.
pub struct ForkResolver<'a> {
    calculator: &'a PlanCalculator,
    units: &'a UnitGraph,
}

impl<'a> ForkResolver<'a> {
    pub fn new(calculator: &'a PlanCalculator, units: &'a UnitGraph) -> Self {
        Self { calculator, units }
    }

    /// Check `execution` for a fork and attach the forked executions.
    ///
    /// Executions that were already checked are returned unchanged.
    pub fn expand(&self, unit: &BuildUnit, execution: StepExecution) -> Result<StepExecution> {
        if !matches!(execution.fork_state(), ForkState::Pending) {
            return Ok(execution);
        }
        let mut guard = GuardSet::new();
        self.expand_guarded(unit, execution, &mut guard)
    }

    fn expand_guarded(
        &self,
        unit: &BuildUnit,
        execution: StepExecution,
        guard: &mut GuardSet,
    ) -> Result<StepExecution> {
        let Some(fork) = execution.descriptor().fork.clone() else {
            return Ok(execution.not_forking());
        };
        guard.insert(execution.key());

        let mut forked = Vec::new();
        for target in self.fork_units(unit, execution.descriptor().aggregator) {
            // Each forked unit plans its own copy of the descriptors.
            let mut unit_guard = guard.clone();
            let executions = match &fork {
                ForkSpec::Phase { phase, lifecycle } => self.forked_lifecycle(
                    target,
                    &execution,
                    phase,
                    lifecycle.as_deref(),
                    &mut unit_guard,
                )?,
                ForkSpec::Goal { goal } => {
                    self.forked_goal(target, &execution, goal, &mut unit_guard)?
                }
            };
            if !executions.is_empty() {
                tracing::debug!(
                    step = %execution,
                    unit = %target.id,
                    forked = executions.len(),
                    "Attached forked executions"
                );
                forked.push(ForkedUnit {
                    unit: target.id.clone(),
                    executions,
                });
            }
        }

        Ok(execution.with_forks(forked))
    }

    /// The triggering unit, or for aggregators every unit it reaches.
    fn fork_units<'u>(&'u self, unit: &'u BuildUnit, aggregator: bool) -> Vec<&'u BuildUnit> {
        if aggregator {
            let reachable = self.units.reachable(&unit.id);
            if !reachable.is_empty() {
                return reachable;
            }
        }
        vec![unit]
    }

    fn forked_lifecycle(
        &self,
        target: &BuildUnit,
        parent: &StepExecution,
        phase: &str,
        overlay: Option<&str>,
        guard: &mut GuardSet,
    ) -> Result<Vec<StepExecution>> {
        let mut mappings = self
            .calculator
            .lifecycle_mappings(target, phase)
            .map_err(|e| not_runnable(parent, target, e))?;
        for builder in mappings.builders_mut() {
            builder.set_source(ExecutionSource::Forked);
        }

        if let Some(overlay) = overlay {
            self.inject_overlay(&mut mappings, parent, target, overlay)
                .map_err(|e| not_runnable(parent, target, e))?;
        }

        let mut executions = Vec::new();
        for builder in mappings.into_builders() {
            let key = builder.descriptor().key();
            if guard.contains(&key) {
                tracing::trace!(step = %key, "Already planned; not forked again");
                continue;
            }
            guard.insert(key);
            let execution = self.calculator.finalize_configuration(builder);
            executions.push(self.expand_guarded(target, execution, guard)?);
        }
        Ok(executions)
    }

    fn forked_goal(
        &self,
        target: &BuildUnit,
        parent: &StepExecution,
        goal: &str,
        guard: &mut GuardSet,
    ) -> Result<Vec<StepExecution>> {
        let plugin = &parent.descriptor().plugin;
        let descriptor = self
            .calculator
            .resolver()
            .resolve(plugin, goal)
            .map_err(|e| not_runnable(parent, target, e))?;

        let key = descriptor.key();
        if guard.contains(&key) {
            return Ok(Vec::new());
        }
        guard.insert(key);

        let configuration = target.plugin(plugin).and_then(|p| p.configuration_for(goal));
        let builder = StepExecutionBuilder::new(descriptor, goal, ExecutionSource::Forked)
            .with_configuration(configuration);
        let execution = self.calculator.finalize_configuration(builder);
        Ok(vec![self.expand_guarded(target, execution, guard)?])
    }

    /// Add overlay executions and merge overlay configuration into the
    /// mapped phases the overlay names.
    fn inject_overlay(
        &self,
        mappings: &mut LifecycleMappings,
        parent: &StepExecution,
        target: &BuildUnit,
        overlay_id: &str,
    ) -> Result<()> {
        let plugin = &parent.descriptor().plugin;
        let overlay = self.calculator.resolver().overlay(plugin, overlay_id)?;

        for phase in &overlay.phases {
            let key = self
                .calculator
                .phase_cache()
                .resolve(self.calculator.registry(), &phase.id)
                .node_key();
            let Some(builders) = mappings.get_mut(&key) else {
                continue;
            };

            for execution in &phase.executions {
                for goal in &execution.goals {
                    let (coordinate, goal) = if goal.contains(':') {
                        parse_binding(goal)?
                    } else {
                        (plugin.clone(), goal.clone())
                    };
                    let descriptor = self.calculator.resolver().resolve(&coordinate, &goal)?;
                    let declared = target
                        .plugin(&coordinate)
                        .and_then(|p| p.configuration_for(parent.execution_id()));
                    let configuration = match (&execution.configuration, declared) {
                        (Some(own), Some(declared)) => Some(own.merged_over(&declared)),
                        (Some(own), None) => Some(own.clone()),
                        (None, declared) => declared,
                    };
                    builders.push(
                        StepExecutionBuilder::new(
                            descriptor,
                            parent.execution_id(),
                            ExecutionSource::Forked,
                        )
                        .in_phase(Some(phase.id.clone()))
                        .with_configuration(configuration),
                    );
                }
            }

            if let Some(configuration) = &phase.configuration {
                for builder in builders.iter_mut() {
                    builder.overlay(configuration);
                }
            }
        }
        Ok(())
    }
}

fn not_runnable(parent: &StepExecution, target: &BuildUnit, cause: BuildError) -> BuildError {
    BuildError::resolution(format!(
        "Step {} is not runnable: {}",
        parent, cause.message
    ))
    .with_unit(target.id.clone())
    .with_step(parent.to_string())
    .with_source(cause)
}
