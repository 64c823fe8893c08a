//! Build session.
//!
//! Owns everything one build shares: the reactor, the plan calculator (and
//! with it the phase reference cache), the event sink and, when units build
//! concurrently, the lock table.

use crate::config::{FailurePolicy, ReactorConfig};
use crate::engine::events::{EventSink, TracingSink};
use crate::engine::executor::ExecutorConfig;
use crate::engine::locks::LockTable;
use crate::errors::Result;
use crate::plan::calculator::PlanCalculator;
use crate::plan::execution::ExecutionPlan;
use crate::plan::task::{TaskSegment, compute_segments};
use crate::reactor::graph::UnitGraph;
use crate::reactor::unit::BuildUnit;
use crate::reactor::Reactor;
use std::sync::{Arc, OnceLock};

/// Plain values the coordinator and engine run with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub degree_of_concurrency: usize,
    pub failure_policy: FailurePolicy,
    pub executor: ExecutorConfig,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            degree_of_concurrency: 1,
            failure_policy: FailurePolicy::default(),
            executor: ExecutorConfig::default(),
        }
    }
}

impl SessionSettings {
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.degree_of_concurrency = threads.max(1);
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_executor(mut self, executor: ExecutorConfig) -> Self {
        self.executor = executor;
        self
    }
}

impl From<&ReactorConfig> for SessionSettings {
    fn from(config: &ReactorConfig) -> Self {
        Self {
            degree_of_concurrency: config.degree_of_concurrency(),
            failure_policy: config.failure_policy(),
            executor: config.executor_config(),
        }
    }
}

pub struct BuildSession {
    reactor: Reactor,
    calculator: PlanCalculator,
    settings: SessionSettings,
    events: Arc<dyn EventSink>,
    /// Created on first use, only for concurrent builds
    locks: OnceLock<Arc<LockTable>>,
}

impl BuildSession {
    pub fn new(reactor: Reactor, calculator: PlanCalculator) -> Self {
        Self {
            reactor,
            calculator,
            settings: SessionSettings::default(),
            events: Arc::new(TracingSink),
            locks: OnceLock::new(),
        }
    }

    pub fn with_settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn reactor(&self) -> &Reactor {
        &self.reactor
    }

    pub fn units(&self) -> &Arc<UnitGraph> {
        self.reactor.units()
    }

    pub fn calculator(&self) -> &PlanCalculator {
        &self.calculator
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn events(&self) -> &Arc<dyn EventSink> {
        &self.events
    }

    /// Whether more than one unit may build at a time.
    pub fn is_concurrent(&self) -> bool {
        self.settings.degree_of_concurrency > 1
    }

    /// The session's lock table; `None` for sequential builds, which never
    /// lock.
    pub fn lock_table(&self) -> Option<Arc<LockTable>> {
        self.is_concurrent()
            .then(|| Arc::clone(self.locks.get_or_init(|| Arc::new(LockTable::new()))))
    }

    /// Split raw tasks into segments.
    pub fn segments(&self, tasks: &[String]) -> Result<Vec<TaskSegment>> {
        compute_segments(tasks, self.calculator.resolver())
    }

    /// Plan of `unit` for `segment`.
    pub fn plan(&self, unit: &BuildUnit, segment: &TaskSegment) -> Result<ExecutionPlan> {
        tracing::debug!(unit = %unit.id, segment = %segment, "Calculating plan");
        self.calculator
            .calculate_plan(unit, &segment.tasks, self.units())
    }

    /// Plans of every unit taking part in `segment`, in build order.
    pub fn plans(&self, segment: &TaskSegment) -> Vec<(String, Result<ExecutionPlan>)> {
        self.reactor
            .units_for(segment)
            .into_iter()
            .map(|unit| (unit.id.clone(), self.plan(unit, segment)))
            .collect()
    }
}
