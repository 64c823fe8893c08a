//! Plan calculation.
//!
//! Turns a unit and its tasks into an ordered [`ExecutionPlan`]: phase tasks
//! expand into every binding up to the requested execution point, goal
//! tasks resolve to a single CLI execution, and every resulting execution is
//! configured and handed to the [`ForkResolver`].

use super::binding::{PackagingRegistry, StepBinding, parse_binding};
use super::descriptor::DescriptorResolver;
use super::execution::{ExecutionPlan, ExecutionSource, StepExecution, StepExecutionBuilder};
use super::fork::ForkResolver;
use super::task::Task;
use crate::errors::{BuildError, Result};
use crate::lifecycle::defaults;
use crate::lifecycle::{Lifecycle, LifecycleRegistry, NodeKey, PhaseRefCache, Point};
use crate::reactor::graph::UnitGraph;
use crate::reactor::unit::BuildUnit;
use std::sync::Arc;

/// Executions of one lifecycle, grouped by execution point.
///
/// Every point up to the requested one is present, even without steps, so
/// overlays can target any of them.
#[derive(Debug, Clone, Default)]
pub struct LifecycleMappings {
    pub lifecycle: String,
    entries: Vec<(NodeKey, Vec<StepExecutionBuilder>)>,
}

impl LifecycleMappings {
    pub fn points(&self) -> impl Iterator<Item = &NodeKey> {
        self.entries.iter().map(|(key, _)| key)
    }

    pub fn get(&self, key: &NodeKey) -> Option<&[StepExecutionBuilder]> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, builders)| builders.as_slice())
    }

    pub fn get_mut(&mut self, key: &NodeKey) -> Option<&mut Vec<StepExecutionBuilder>> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, builders)| builders)
    }

    pub fn len(&self) -> usize {
        self.entries.iter().map(|(_, builders)| builders.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn builders_mut(&mut self) -> impl Iterator<Item = &mut StepExecutionBuilder> {
        self.entries.iter_mut().flat_map(|(_, builders)| builders.iter_mut())
    }

    /// Builders in execution order.
    pub fn into_builders(self) -> impl Iterator<Item = StepExecutionBuilder> {
        self.entries.into_iter().flat_map(|(_, builders)| builders)
    }
}

/// A binding together with where it sorts.
struct Placed {
    position: usize,
    binding: StepBinding,
}

/// Computes per-unit execution plans.
pub struct PlanCalculator {
    registry: Arc<LifecycleRegistry>,
    resolver: Arc<dyn DescriptorResolver>,
    packaging: PackagingRegistry,
    cache: PhaseRefCache,
}

impl PlanCalculator {
    pub fn new(
        registry: Arc<LifecycleRegistry>,
        resolver: Arc<dyn DescriptorResolver>,
        packaging: PackagingRegistry,
    ) -> Self {
        Self {
            registry,
            resolver,
            packaging,
            cache: PhaseRefCache::new(),
        }
    }

    pub fn registry(&self) -> &LifecycleRegistry {
        &self.registry
    }

    pub fn resolver(&self) -> &dyn DescriptorResolver {
        self.resolver.as_ref()
    }

    pub fn phase_cache(&self) -> &PhaseRefCache {
        &self.cache
    }

    /// Ordered executions of `unit` for `tasks`, forks expanded.
    pub fn calculate_plan(
        &self,
        unit: &BuildUnit,
        tasks: &[Task],
        units: &UnitGraph,
    ) -> Result<ExecutionPlan> {
        let mut configured = Vec::new();
        for task in tasks {
            match task {
                Task::Goal(spec) => {
                    let plugin = spec.coordinate(self.resolver())?;
                    let plugin = unit
                        .plugin(&plugin)
                        .map_or(plugin, |declared| declared.coordinate.clone());
                    let descriptor = self.resolver.resolve(&plugin, &spec.goal)?;
                    let execution_id = spec.execution_id();
                    let configuration = unit
                        .plugin(&plugin)
                        .and_then(|p| p.configuration_for(execution_id));
                    let builder =
                        StepExecutionBuilder::new(descriptor, execution_id, ExecutionSource::Cli)
                            .with_configuration(configuration);
                    configured.push(self.finalize_configuration(builder));
                }
                Task::Phase(phase) => {
                    let mappings = self.lifecycle_mappings(unit, phase)?;
                    configured.extend(
                        mappings
                            .into_builders()
                            .map(|builder| self.finalize_configuration(builder)),
                    );
                }
            }
        }

        let forks = ForkResolver::new(self, units);
        let executions = configured
            .into_iter()
            .map(|execution| forks.expand(unit, execution))
            .collect::<Result<Vec<_>>>()
            .map_err(|e| e.with_unit(unit.id.clone()))?;

        tracing::debug!(unit = %unit.id, steps = executions.len(), "Calculated execution plan");
        Ok(ExecutionPlan::new(unit.id.clone(), executions))
    }

    /// Merge declared configuration over parameter defaults.
    pub fn finalize_configuration(&self, builder: StepExecutionBuilder) -> StepExecution {
        builder.configure()
    }

    /// Bindings of `unit` for `raw_phase`'s lifecycle, grouped by execution
    /// point up to and including the requested point.
    ///
    /// A bare phase covers its `after:` point; `before:` and `after:` forms
    /// (and aliases resolving to them) stop at that point.
    pub fn lifecycle_mappings(&self, unit: &BuildUnit, raw_phase: &str) -> Result<LifecycleMappings> {
        let requested = self.cache.resolve(&self.registry, raw_phase);
        let lifecycle = self
            .registry
            .lifecycle_for_phase(&requested.phase)
            .map_err(|e| e.with_unit(unit.id.clone()))?;
        let order = self.registry.order(&lifecycle.id)?;

        let end_key = match requested.point {
            Point::At => NodeKey::After(requested.phase.clone()),
            _ => requested.node_key(),
        };
        let end = order.position(&end_key).ok_or_else(|| {
            BuildError::configuration(format!(
                "Phase '{}' is not part of lifecycle '{}'",
                raw_phase, lifecycle.id
            ))
            .with_phase(raw_phase)
        })?;

        let mut placed = Vec::new();
        for binding in self.collect_bindings(unit, lifecycle)? {
            let Some(phase) = &binding.phase else {
                continue;
            };
            let key = self.cache.resolve(&self.registry, phase).node_key();
            if let Some(position) = order.position(&key)
                && position <= end
            {
                placed.push(Placed { position, binding });
            }
        }
        // Stable, so declaration order breaks remaining ties.
        placed.sort_by_key(|p| (p.position, p.binding.priority));

        let mut entries: Vec<(NodeKey, Vec<StepExecutionBuilder>)> = order.points()[..=end]
            .iter()
            .map(|key| (key.clone(), Vec::new()))
            .collect();
        for Placed { position, binding } in placed {
            let builder =
                StepExecutionBuilder::resolve(&binding, self.resolver(), ExecutionSource::Lifecycle)
                    .map_err(|e| e.with_unit(unit.id.clone()))?;
            entries[position].1.push(builder);
        }

        Ok(LifecycleMappings {
            lifecycle: lifecycle.id.clone(),
            entries,
        })
    }

    /// Every binding `unit` contributes to `lifecycle`, in declaration order:
    /// lifecycle defaults, then packaging defaults, then the unit's own
    /// executions.
    pub fn collect_bindings(&self, unit: &BuildUnit, lifecycle: &Lifecycle) -> Result<Vec<StepBinding>> {
        let mut bindings = Vec::new();

        for phase in lifecycle.all_phases() {
            for spec in &phase.bindings {
                match parse_binding(spec) {
                    Ok((plugin, goal)) => {
                        bindings.push(StepBinding::new(plugin, goal).in_phase(phase.name.clone()))
                    }
                    Err(e) => tracing::warn!(lifecycle = %lifecycle.id, "{}", e.message),
                }
            }
        }

        if lifecycle.id == defaults::DEFAULT {
            bindings.extend(
                self.packaging
                    .bindings(&unit.packaging)
                    .map_err(|e| e.with_unit(unit.id.clone()))?,
            );
        }

        // Default executions pick up the unit's plugin version and configuration.
        for binding in &mut bindings {
            if let Some(declared) = unit.plugin(&binding.plugin) {
                binding.plugin = declared.coordinate.clone();
                binding.configuration = declared.configuration_for(&binding.execution_id);
            }
        }

        for plugin in &unit.plugins {
            for execution in &plugin.executions {
                for goal in &execution.goals {
                    let phase = match &execution.phase {
                        Some(phase) => Some(phase.clone()),
                        None => self.resolver.resolve(&plugin.coordinate, goal)?.phase.clone(),
                    };
                    let Some(phase) = phase else {
                        tracing::debug!(
                            unit = %unit.id,
                            execution = %execution.id,
                            goal = %goal,
                            "Execution has no phase; not bound"
                        );
                        continue;
                    };
                    bindings.push(
                        StepBinding::new(plugin.coordinate.clone(), goal.clone())
                            .in_phase(phase)
                            .with_priority(execution.priority)
                            .with_execution_id(execution.id.clone())
                            .with_configuration(plugin.configuration_for(&execution.id)),
                    );
                }
            }
        }

        Ok(bindings)
    }
}
