//! Step executor.
//!
//! Walks one unit's executions in plan order. For every execution it
//! 1. checks preconditions (online mode, project present)
//! 2. runs the forked executions on a copy of the unit state
//! 3. takes the step locks when the build is concurrent
//! 4. makes sure the required dependency scopes are resolved
//! 5. invokes the [`StepRunner`]
//!
//! Locks are released in reverse order once the step is done, and the phase
//! of every execution is recorded as the unit's last phase.

use super::dependency::{DependencyContext, DependencyResolver, GraphResolver};
use super::events::{EventSink, ExecutionEvent};
use super::locks::{LaneId, LockTable, OwnerToken, StepLock};
use crate::errors::{BuildError, Result};
use crate::plan::execution::{ExecutionSource, StepExecution};
use crate::reactor::graph::UnitGraph;
use crate::reactor::unit::{BuildUnit, UnitState};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;

/// Everything a step sees while it runs.
#[derive(Debug)]
pub struct StepContext<'a> {
    pub unit: &'a BuildUnit,
    pub execution: &'a StepExecution,
    /// Dependency artifacts resolved for the unit.
    pub artifacts: &'a [String],
    pub owner: &'a OwnerToken,
    /// 0 for planned executions, deeper for forked ones.
    pub fork_depth: usize,
}

/// Runs the work behind a step.
#[async_trait]
pub trait StepRunner: Send + Sync {
    async fn run(&self, context: &StepContext<'_>, state: &mut UnitState) -> anyhow::Result<()>;
}

/// Session facts the preconditions are checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorConfig {
    pub offline: bool,
    pub project_present: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            offline: false,
            project_present: true,
        }
    }
}

/// Executes step executions for units of one build.
pub struct StepExecutor {
    units: Arc<UnitGraph>,
    runner: Arc<dyn StepRunner>,
    resolver: Arc<dyn DependencyResolver>,
    events: Arc<dyn EventSink>,
    /// Present only when units build concurrently.
    locks: Option<Arc<LockTable>>,
    config: ExecutorConfig,
}

impl StepExecutor {
    pub fn new(units: Arc<UnitGraph>, runner: Arc<dyn StepRunner>, events: Arc<dyn EventSink>) -> Self {
        Self {
            resolver: Arc::new(GraphResolver::new(Arc::clone(&units))),
            units,
            runner,
            events,
            locks: None,
            config: ExecutorConfig::default(),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn DependencyResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Enable the locking protocol.
    pub fn with_locks(mut self, locks: Arc<LockTable>) -> Self {
        self.locks = Some(locks);
        self
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn is_locking(&self) -> bool {
        self.locks.is_some()
    }

    pub fn units(&self) -> &UnitGraph {
        &self.units
    }

    /// Run `executions` for `unit` in order, stopping at the first failure.
    pub async fn execute(
        &self,
        lane: LaneId,
        unit: &BuildUnit,
        state: &mut UnitState,
        executions: &[StepExecution],
    ) -> Result<()> {
        self.execute_list(lane, unit, state, executions, 0).await
    }

    // Boxed because forked executions recurse back into it.
    fn execute_list<'a>(
        &'a self,
        lane: LaneId,
        unit: &'a BuildUnit,
        state: &'a mut UnitState,
        executions: &'a [StepExecution],
        depth: usize,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let mut dependencies = DependencyContext::new(unit.id.clone(), executions);
            for execution in executions {
                self.execute_step(lane, unit, state, execution, &mut dependencies, depth)
                    .await?;
                if let Some(phase) = execution.lifecycle_phase()
                    && state.last_phase.as_deref() != Some(phase)
                {
                    state.last_phase = Some(phase.to_string());
                }
            }
            Ok(())
        }
        .boxed()
    }

    async fn execute_step(
        &self,
        lane: LaneId,
        unit: &BuildUnit,
        state: &mut UnitState,
        execution: &StepExecution,
        dependencies: &mut DependencyContext,
        depth: usize,
    ) -> Result<()> {
        let step = execution.to_string();

        if let Some(reason) = self.unmet_precondition(execution) {
            if execution.source() == ExecutionSource::Cli {
                return Err(BuildError::precondition(reason)
                    .with_unit(unit.id.clone())
                    .with_step(step));
            }
            self.events.emit(ExecutionEvent::StepSkipped {
                unit: unit.id.clone(),
                step,
                reason: reason.to_string(),
            });
            return Ok(());
        }

        self.execute_forks(lane, unit, state, execution, depth).await?;

        let owner = OwnerToken::new(lane, unit.id.clone(), step);
        let lock = match &self.locks {
            Some(table) => table.acquire(&owner, execution.is_aggregating()).await,
            None => StepLock::none(),
        };
        let result = self
            .run_step(unit, state, execution, dependencies, &owner, depth)
            .await;
        drop(lock);

        // The forked copy only lives as long as the step that forked it.
        state.execution_snapshot = None;
        result
    }

    fn unmet_precondition(&self, execution: &StepExecution) -> Option<&'static str> {
        let descriptor = execution.descriptor();
        if descriptor.project_required && !self.config.project_present {
            return Some("Goal requires a project to execute but there is no project present");
        }
        if descriptor.online_required && self.config.offline {
            return Some("Goal requires online mode for execution but the build is offline");
        }
        None
    }

    async fn run_step(
        &self,
        unit: &BuildUnit,
        state: &mut UnitState,
        execution: &StepExecution,
        dependencies: &mut DependencyContext,
        owner: &OwnerToken,
        depth: usize,
    ) -> Result<()> {
        dependencies
            .ensure(self.resolver.as_ref(), &self.units, unit, execution)
            .await
            .map_err(|e| {
                BuildError::resolution(format!(
                    "Could not resolve dependencies for unit {}: {:#}",
                    unit.id, e
                ))
                .with_unit(unit.id.clone())
                .with_step(owner.step.clone())
                .with_source(e)
            })?;

        self.events.emit(ExecutionEvent::StepStarted {
            unit: unit.id.clone(),
            step: owner.step.clone(),
            phase: execution.lifecycle_phase().map(str::to_string),
        });

        let context = StepContext {
            unit,
            execution,
            artifacts: dependencies.artifacts(),
            owner,
            fork_depth: depth,
        };
        match self.runner.run(&context, state).await {
            Ok(()) => {
                state.executed.push(owner.step.clone());
                self.events.emit(ExecutionEvent::StepSucceeded {
                    unit: unit.id.clone(),
                    step: owner.step.clone(),
                });
                Ok(())
            }
            Err(e) => {
                let mut error = BuildError::execution(format!(
                    "Failed to execute goal {} on unit {}: {:#}",
                    owner.step, unit.id, e
                ))
                .with_unit(unit.id.clone())
                .with_step(owner.step.clone());
                if let Some(phase) = execution.lifecycle_phase() {
                    error = error.with_phase(phase);
                }
                let error = error.with_source(e);
                self.events.emit(ExecutionEvent::StepFailed {
                    unit: unit.id.clone(),
                    step: owner.step.clone(),
                    error: error.message.clone(),
                });
                Err(error)
            }
        }
    }

    async fn execute_forks(
        &self,
        lane: LaneId,
        unit: &BuildUnit,
        state: &mut UnitState,
        execution: &StepExecution,
        depth: usize,
    ) -> Result<()> {
        if execution.forked_units().is_empty() {
            return Ok(());
        }
        let step = execution.to_string();

        self.events.emit(ExecutionEvent::ForkStarted {
            unit: unit.id.clone(),
            step: step.clone(),
        });
        let result = self
            .run_forked_units(lane, unit, state, execution, &step, depth)
            .await;
        match &result {
            Ok(()) => self.events.emit(ExecutionEvent::ForkSucceeded {
                unit: unit.id.clone(),
                step,
            }),
            Err(e) => self.events.emit(ExecutionEvent::ForkFailed {
                unit: unit.id.clone(),
                step,
                error: e.message.clone(),
            }),
        }
        result
    }

    async fn run_forked_units(
        &self,
        lane: LaneId,
        unit: &BuildUnit,
        state: &mut UnitState,
        execution: &StepExecution,
        step: &str,
        depth: usize,
    ) -> Result<()> {
        for forked in execution.forked_units() {
            let target = self.units.get(&forked.unit).ok_or_else(|| {
                BuildError::resolution(format!(
                    "Forked unit '{}' is not part of the build",
                    forked.unit
                ))
                .with_unit(unit.id.clone())
                .with_step(step)
            })?;

            // Forked work never touches the real state directly.
            let mut snapshot = if target.id == unit.id {
                state.snapshot()
            } else {
                UnitState::for_unit(target)
            };

            self.events.emit(ExecutionEvent::ForkedUnitStarted {
                unit: unit.id.clone(),
                step: step.to_string(),
                forked_unit: target.id.clone(),
            });
            let result = self
                .execute_list(lane, target, &mut snapshot, &forked.executions, depth + 1)
                .await;
            if let Err(e) = result {
                self.events.emit(ExecutionEvent::ForkedUnitFailed {
                    unit: unit.id.clone(),
                    step: step.to_string(),
                    forked_unit: target.id.clone(),
                    error: e.message.clone(),
                });
                return Err(e);
            }
            self.events.emit(ExecutionEvent::ForkedUnitSucceeded {
                unit: unit.id.clone(),
                step: step.to_string(),
                forked_unit: target.id.clone(),
            });

            if target.id == unit.id {
                state.execution_snapshot = Some(Box::new(snapshot));
            }
        }
        Ok(())
    }
}
