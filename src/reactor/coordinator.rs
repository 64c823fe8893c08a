//! Build coordinator.
//!
//! Runs the task segments of a build one after the other. Within a segment
//! every participating unit gets its plan up front; units then start as soon
//! as their upstream units have finished, at most `degree_of_concurrency` at
//! a time. Right before a unit would start, the shared [`ReactorStatus`]
//! decides whether it is skipped instead.
//!
//! Failure policies:
//! - fail-fast halts the build and blacklists the failed unit's subtree
//! - fail-at-end blacklists the failed unit's subtree, so later segments
//!   skip it as well
//! - fail-never records the failure and carries on
//!
//! Resolution and precondition failures go through the policy like a failing
//! step. A plan that could not be calculated is a configuration error and
//! halts the build whatever the policy. Units already running always finish.

use super::scheduler::UnitScheduler;
use super::state::{BuildSummary, ExecutionTimer, UnitResult};
use super::status::ReactorStatus;
use super::unit::UnitState;
use crate::config::FailurePolicy;
use crate::engine::dependency::DependencyResolver;
use crate::engine::events::{EventSink, ExecutionEvent};
use crate::engine::executor::{StepExecutor, StepRunner};
use crate::engine::locks::LaneId;
use crate::errors::{BuildError, Result};
use crate::plan::execution::ExecutionPlan;
use crate::plan::task::TaskSegment;
use crate::session::BuildSession;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;

/// A unit that finished its part of a segment.
struct UnitDone {
    unit: String,
    state: UnitState,
    result: Result<()>,
    steps: usize,
    duration: Duration,
}

/// Builds every unit of a session through a task list.
pub struct BuildCoordinator {
    session: Arc<BuildSession>,
    runner: Arc<dyn StepRunner>,
    resolver: Option<Arc<dyn DependencyResolver>>,
}

impl BuildCoordinator {
    pub fn new(session: Arc<BuildSession>, runner: Arc<dyn StepRunner>) -> Self {
        Self {
            session,
            runner,
            resolver: None,
        }
    }

    /// Resolve dependencies with `resolver` instead of the unit graph.
    pub fn with_resolver(mut self, resolver: Arc<dyn DependencyResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn session(&self) -> &BuildSession {
        &self.session
    }

    fn executor(&self) -> StepExecutor {
        let mut executor = StepExecutor::new(
            Arc::clone(self.session.units()),
            Arc::clone(&self.runner),
            Arc::clone(self.session.events()),
        )
        .with_config(self.session.settings().executor);
        if let Some(resolver) = &self.resolver {
            executor = executor.with_resolver(Arc::clone(resolver));
        }
        if let Some(locks) = self.session.lock_table() {
            executor = executor.with_locks(locks);
        }
        executor
    }

    /// Build `tasks`.
    ///
    /// Errors only when the task list itself is invalid; unit failures end
    /// up in the returned summary.
    pub async fn run(&self, tasks: &[String]) -> Result<BuildSummary> {
        let timer = ExecutionTimer::start();
        let segments = self.session.segments(tasks)?;
        let settings = *self.session.settings();
        let units = Arc::clone(self.session.units());
        let events = Arc::clone(self.session.events());

        events.emit(ExecutionEvent::SessionStarted {
            units: units.len(),
            segments: segments.len(),
        });
        tracing::debug!(
            threads = settings.degree_of_concurrency,
            policy = %settings.failure_policy,
            locking = self.session.lock_table().is_some(),
            "Reactor settings"
        );

        let mut run = BuildRun {
            executor: Arc::new(self.executor()),
            status: ReactorStatus::new(Arc::clone(&units)),
            states: units
                .sorted()
                .map(|u| (u.id.clone(), UnitState::for_unit(u)))
                .collect(),
            summary: BuildSummary::new(settings.failure_policy),
            events: Arc::clone(&events),
            policy: settings.failure_policy,
            capacity: settings.degree_of_concurrency.max(1),
            next_lane: 0,
        };

        for (index, segment) in segments.iter().enumerate() {
            tracing::info!(segment = index, tasks = %segment, "Starting task segment");
            let plans = self.session.plans(segment);
            run.run_segment(&self.session, index, segment, plans).await;
        }

        let mut summary = run.summary;
        summary.duration = timer.elapsed();
        events.emit(ExecutionEvent::SessionEnded {
            success: summary.is_success(),
        });
        Ok(summary)
    }
}

/// Mutable state of one build.
struct BuildRun {
    executor: Arc<StepExecutor>,
    status: ReactorStatus,
    /// Unit states carried from one segment to the next
    states: HashMap<String, UnitState>,
    summary: BuildSummary,
    events: Arc<dyn EventSink>,
    policy: FailurePolicy,
    capacity: usize,
    next_lane: LaneId,
}

impl BuildRun {
    async fn run_segment(
        &mut self,
        session: &BuildSession,
        index: usize,
        segment: &TaskSegment,
        plans: Vec<(String, Result<ExecutionPlan>)>,
    ) {
        let members = session.reactor().units_for(segment);
        let mut scheduler = UnitScheduler::new(session.units(), &members);
        let mut plans: HashMap<String, Result<ExecutionPlan>> = plans.into_iter().collect();

        tracing::debug!(segment = index, waves = ?scheduler.compute_waves(), "Segment schedule");

        let semaphore = Arc::new(Semaphore::new(self.capacity));
        let (result_tx, mut result_rx) = mpsc::channel::<UnitDone>(self.capacity);
        let mut active_tasks: HashMap<String, JoinHandle<()>> = HashMap::new();

        loop {
            let ready = scheduler.ready_units();
            if ready.is_empty() && active_tasks.is_empty() {
                break;
            }

            for id in ready {
                if let Some(reason) = self.status.skip_reason(&id) {
                    let reason = reason.to_string();
                    self.events.emit(ExecutionEvent::UnitSkipped {
                        unit: id.clone(),
                        segment: index,
                        reason: reason.clone(),
                    });
                    scheduler.mark_skipped(&id, &reason);
                    self.summary.mark_skipped(&id, index, &reason);
                    continue;
                }

                let plan = match plans.remove(&id) {
                    Some(Ok(plan)) => plan,
                    Some(Err(error)) => {
                        self.fail(&mut scheduler, index, &id, error, Duration::ZERO, None, 0);
                        continue;
                    }
                    None => {
                        let error = BuildError::configuration(format!(
                            "No execution plan was calculated for unit '{}'",
                            id
                        ));
                        self.fail(&mut scheduler, index, &id, error, Duration::ZERO, None, 0);
                        continue;
                    }
                };

                // No permit means we are at capacity; the unit stays pending.
                let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                    plans.insert(id, Ok(plan));
                    break;
                };

                scheduler.mark_running(&id);
                self.events.emit(ExecutionEvent::UnitStarted {
                    unit: id.clone(),
                    segment: index,
                });

                self.next_lane += 1;
                let lane = self.next_lane;
                let state = self.states.remove(&id).unwrap_or_default();
                let executor = Arc::clone(&self.executor);
                let result_tx = result_tx.clone();
                let unit = id.clone();

                let handle = tokio::spawn(async move {
                    let _permit = permit; // Hold until complete
                    let done = execute_unit(&executor, lane, unit, state, plan).await;
                    result_tx.send(done).await.ok();
                });
                active_tasks.insert(id, handle);
            }

            // Skips and planning failures may have made more units ready.
            if active_tasks.is_empty() {
                continue;
            }

            match result_rx.recv().await {
                Some(done) => {
                    if let Some(handle) = active_tasks.remove(&done.unit) {
                        handle.await.ok();
                    }
                    self.record(&mut scheduler, index, done);
                }
                None => break,
            }
        }
    }

    fn record(&mut self, scheduler: &mut UnitScheduler, segment: usize, done: UnitDone) {
        let UnitDone {
            unit,
            state,
            result,
            steps,
            duration,
        } = done;
        let last_phase = state.last_phase.clone();
        self.states.insert(unit.clone(), state);

        match result {
            Ok(()) => {
                scheduler.mark_succeeded(&unit);
                self.events.emit(ExecutionEvent::UnitSucceeded {
                    unit: unit.clone(),
                    segment,
                });
                self.summary.add_result(
                    UnitResult::success(&unit, segment, steps, duration).with_last_phase(last_phase),
                );
            }
            Err(error) => self.fail(scheduler, segment, &unit, error, duration, last_phase, steps),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn fail(
        &mut self,
        scheduler: &mut UnitScheduler,
        segment: usize,
        unit: &str,
        error: BuildError,
        duration: Duration,
        last_phase: Option<String>,
        steps: usize,
    ) {
        scheduler.mark_failed(unit, &error.message);
        self.events.emit(ExecutionEvent::UnitFailed {
            unit: unit.to_string(),
            segment,
            error: error.message.clone(),
        });
        self.apply_failure_policy(unit, &error);
        self.summary.add_result(
            UnitResult::failure(unit, segment, &error, duration)
                .with_last_phase(last_phase)
                .with_steps(steps),
        );
    }

    fn apply_failure_policy(&self, unit: &str, error: &BuildError) {
        if error.is_configuration() {
            tracing::debug!(unit = %unit, "Configuration failure halts the build");
            self.status.halt();
        }
        match self.policy {
            FailurePolicy::FailFast => {
                self.status.halt();
                self.status.blacklist(unit);
            }
            FailurePolicy::FailAtEnd => self.status.blacklist(unit),
            FailurePolicy::FailNever => {}
        }
    }
}

async fn execute_unit(
    executor: &StepExecutor,
    lane: LaneId,
    unit: String,
    mut state: UnitState,
    plan: ExecutionPlan,
) -> UnitDone {
    let timer = ExecutionTimer::start();
    let before = state.executed.len();

    let result = match executor.units().get(&unit) {
        Some(build_unit) => {
            executor
                .execute(lane, build_unit, &mut state, &plan.executions)
                .await
        }
        None => Err(BuildError::configuration(format!(
            "Unit '{}' is not part of the build",
            unit
        ))),
    };

    UnitDone {
        steps: state.executed.len().saturating_sub(before),
        unit,
        state,
        result,
        duration: timer.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::dependency::NoopResolver;
    use crate::engine::events::RecordingSink;
    use crate::engine::executor::StepContext;
    use crate::errors::ErrorKind;
    use crate::lifecycle::LifecycleRegistry;
    use crate::plan::binding::PackagingRegistry;
    use crate::plan::calculator::PlanCalculator;
    use crate::plan::catalog::DescriptorCatalog;
    use crate::plan::descriptor::{Coordinate, PluginDescriptor, StepDescriptor};
    use crate::plan::scope::Scope;
    use crate::reactor::Reactor;
    use crate::reactor::graph::UnitGraph;
    use crate::reactor::state::UnitOutcome;
    use crate::reactor::unit::BuildUnit;
    use crate::session::SessionSettings;
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    // =========================================
    // Test fixtures
    // =========================================

    #[derive(Default)]
    struct ScriptedRunner {
        log: Mutex<Vec<String>>,
        /// (unit, goal) pairs that fail
        failures: Vec<(String, String)>,
    }

    impl ScriptedRunner {
        fn failing(unit: &str, goal: &str) -> Self {
            Self {
                failures: vec![(unit.to_string(), goal.to_string())],
                ..Default::default()
            }
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        fn position(&self, entry: &str) -> usize {
            self.log().iter().position(|e| e == entry).unwrap()
        }
    }

    #[async_trait]
    impl StepRunner for ScriptedRunner {
        async fn run(&self, context: &StepContext<'_>, _state: &mut UnitState) -> anyhow::Result<()> {
            let goal = context.execution.descriptor().goal.clone();
            tokio::task::yield_now().await;
            self.log
                .lock()
                .unwrap()
                .push(format!("{}@{}", goal, context.unit.id));
            if self
                .failures
                .iter()
                .any(|(u, g)| u == &context.unit.id && g == &goal)
            {
                anyhow::bail!("{} failed on {}", goal, context.unit.id);
            }
            Ok(())
        }
    }

    fn calculator() -> PlanCalculator {
        let mut report = StepDescriptor::new(Coordinate::default(), "report");
        report.aggregator = true;
        let mut catalog = DescriptorCatalog::standard();
        catalog.register(
            PluginDescriptor::new(Coordinate::new("org.acme", "acme-plugin").with_version("1.0"))
                .with_prefix("acme")
                .with_goal(report),
        );
        PlanCalculator::new(
            Arc::new(LifecycleRegistry::standard().unwrap()),
            Arc::new(catalog),
            PackagingRegistry::standard(),
        )
    }

    /// core <- api <- web, plus an independent docs unit.
    fn session(threads: usize, policy: FailurePolicy, sink: &Arc<RecordingSink>) -> Arc<BuildSession> {
        let units = UnitGraph::build(vec![
            BuildUnit::new("core"),
            BuildUnit::new("api").depends_on("core", None),
            BuildUnit::new("web").depends_on("api", Some(Scope::Runtime)),
            BuildUnit::new("docs"),
        ])
        .unwrap();
        Arc::new(
            BuildSession::new(Reactor::new(units).unwrap(), calculator())
                .with_settings(
                    SessionSettings::default()
                        .with_threads(threads)
                        .with_failure_policy(policy),
                )
                .with_events(sink.clone()),
        )
    }

    fn tasks(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    async fn build(
        threads: usize,
        policy: FailurePolicy,
        runner: &Arc<ScriptedRunner>,
        raw: &[&str],
    ) -> (BuildSummary, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let summary = BuildCoordinator::new(session(threads, policy, &sink), runner.clone())
            .with_resolver(Arc::new(NoopResolver))
            .run(&tasks(raw))
            .await
            .unwrap();
        (summary, sink)
    }

    // =========================================
    // Sequencing tests
    // =========================================

    #[tokio::test]
    async fn test_sequential_build_follows_unit_order() {
        let runner = Arc::new(ScriptedRunner::default());
        let (summary, sink) = build(1, FailurePolicy::FailFast, &runner, &["compile"]).await;

        assert!(summary.is_success());
        assert_eq!(summary.succeeded, 4);
        assert_eq!(
            runner.log(),
            [
                "resources@core",
                "compile@core",
                "resources@api",
                "compile@api",
                "resources@web",
                "compile@web",
                "resources@docs",
                "compile@docs",
            ]
        );
        let result = summary.result("web", 0).unwrap();
        assert_eq!(result.last_phase.as_deref(), Some("compile"));
        assert_eq!(result.steps, 2);

        let kinds = sink.kinds();
        assert_eq!(kinds.first(), Some(&"session_started"));
        assert_eq!(kinds.last(), Some(&"session_ended"));
    }

    #[tokio::test]
    async fn test_phases_share_one_segment() {
        let runner = Arc::new(ScriptedRunner::default());
        let (summary, _) = build(1, FailurePolicy::FailFast, &runner, &["install", "clean"]).await;

        assert_eq!(summary.total, 4);
        assert!(summary.results.iter().all(|r| r.segment == 0));
        let core: Vec<String> = runner
            .log()
            .into_iter()
            .filter(|e| e.ends_with("@core"))
            .collect();
        assert_eq!(core[core.len() - 2..], ["install@core", "clean@core"]);
    }

    #[tokio::test]
    async fn test_aggregating_segment_runs_on_root_only() {
        let runner = Arc::new(ScriptedRunner::default());
        let (summary, _) = build(
            1,
            FailurePolicy::FailFast,
            &runner,
            &["resources", "acme:report", "resources"],
        )
        .await;

        assert!(summary.is_success());
        let aggregated: Vec<&str> = summary
            .results
            .iter()
            .filter(|r| r.segment == 1)
            .map(|r| r.unit.as_str())
            .collect();
        assert_eq!(aggregated, ["core"]);
        assert_eq!(summary.total, 9);
        assert_eq!(
            runner.log().iter().filter(|e| e.starts_with("report@")).count(),
            1
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_build_waits_for_upstream() {
        let runner = Arc::new(ScriptedRunner::default());
        let (summary, _) = build(4, FailurePolicy::FailFast, &runner, &["compile"]).await;

        assert_eq!(summary.succeeded, 4);
        assert!(runner.position("compile@core") < runner.position("resources@api"));
        assert!(runner.position("compile@api") < runner.position("resources@web"));
    }

    #[tokio::test]
    async fn test_invalid_task_list_is_an_error() {
        let sink = Arc::new(RecordingSink::new());
        let runner = Arc::new(ScriptedRunner::default());
        let err = BuildCoordinator::new(session(1, FailurePolicy::FailFast, &sink), runner)
            .run(&[])
            .await
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(sink.events().is_empty());
    }

    // =========================================
    // Failure policy tests
    // =========================================

    #[tokio::test]
    async fn test_fail_fast_skips_remaining_units() {
        let runner = Arc::new(ScriptedRunner::failing("core", "compile"));
        let (summary, sink) = build(1, FailurePolicy::FailFast, &runner, &["compile"]).await;

        assert!(!summary.is_success());
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 3);
        assert_eq!(summary.outcome("core", 0), Some(UnitOutcome::Failed));
        assert_eq!(summary.outcome("docs", 0), Some(UnitOutcome::Skipped));
        assert_eq!(
            summary.result("api", 0).unwrap().error.as_deref(),
            Some("build halted after an earlier failure")
        );
        assert!(!runner.log().iter().any(|e| e.ends_with("@docs")));

        let failure = summary.result("core", 0).unwrap();
        assert_eq!(failure.error_kind, Some(ErrorKind::Execution));
        assert_eq!(failure.steps, 1);
        assert!(sink.kinds().contains(&"unit_skipped"));
    }

    #[tokio::test]
    async fn test_fail_at_end_builds_independent_units() {
        let runner = Arc::new(ScriptedRunner::failing("core", "compile"));
        let (summary, _) = build(1, FailurePolicy::FailAtEnd, &runner, &["compile"]).await;

        assert!(!summary.is_success());
        assert_eq!(summary.outcome("docs", 0), Some(UnitOutcome::Success));
        assert_eq!(summary.outcome("api", 0), Some(UnitOutcome::Skipped));
        assert_eq!(summary.outcome("web", 0), Some(UnitOutcome::Skipped));
        assert_eq!(
            summary.result("web", 0).unwrap().error.as_deref(),
            Some("an upstream unit failed")
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_fail_at_end_concurrently() {
        let runner = Arc::new(ScriptedRunner::failing("api", "resources"));
        let (summary, _) = build(4, FailurePolicy::FailAtEnd, &runner, &["compile"]).await;

        assert_eq!(summary.outcome("core", 0), Some(UnitOutcome::Success));
        assert_eq!(summary.outcome("api", 0), Some(UnitOutcome::Failed));
        assert_eq!(summary.outcome("web", 0), Some(UnitOutcome::Skipped));
        assert_eq!(summary.outcome("docs", 0), Some(UnitOutcome::Success));
    }

    #[tokio::test]
    async fn test_fail_never_builds_everything() {
        let runner = Arc::new(ScriptedRunner::failing("core", "compile"));
        let (summary, _) = build(1, FailurePolicy::FailNever, &runner, &["compile"]).await;

        assert!(summary.is_success());
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.succeeded, 3);
        assert!(runner.log().contains(&"compile@web".to_string()));
    }

    #[tokio::test]
    async fn test_halt_carries_into_later_segments() {
        let runner = Arc::new(ScriptedRunner::failing("docs", "resources"));
        let (summary, _) = build(
            1,
            FailurePolicy::FailFast,
            &runner,
            &["resources", "acme:report"],
        )
        .await;

        assert_eq!(summary.outcome("core", 1), Some(UnitOutcome::Skipped));
        assert!(!runner.log().iter().any(|e| e.starts_with("report@")));
    }

    /// Fails resolution for one unit only.
    struct BrokenResolver(&'static str);

    #[async_trait]
    impl DependencyResolver for BrokenResolver {
        async fn resolve(&self, unit: &BuildUnit, _scopes: &BTreeSet<Scope>) -> anyhow::Result<Vec<String>> {
            if unit.id == self.0 {
                anyhow::bail!("repository unreachable");
            }
            Ok(Vec::new())
        }
    }

    async fn build_with_broken_resolver(policy: FailurePolicy) -> BuildSummary {
        let sink = Arc::new(RecordingSink::new());
        let runner = Arc::new(ScriptedRunner::default());
        BuildCoordinator::new(session(1, policy, &sink), runner)
            .with_resolver(Arc::new(BrokenResolver("core")))
            .run(&tasks(&["compile"]))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_resolution_failure_follows_fail_never() {
        let summary = build_with_broken_resolver(FailurePolicy::FailNever).await;

        let failure = summary.result("core", 0).unwrap();
        assert_eq!(failure.error_kind, Some(ErrorKind::Resolution));
        assert_eq!(summary.outcome("core", 0), Some(UnitOutcome::Failed));
        assert_eq!(summary.outcome("docs", 0), Some(UnitOutcome::Success));
        assert_eq!(summary.outcome("web", 0), Some(UnitOutcome::Success));
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 0);
    }

    #[tokio::test]
    async fn test_resolution_failure_follows_fail_at_end() {
        let summary = build_with_broken_resolver(FailurePolicy::FailAtEnd).await;

        assert_eq!(summary.outcome("core", 0), Some(UnitOutcome::Failed));
        assert_eq!(summary.outcome("api", 0), Some(UnitOutcome::Skipped));
        assert_eq!(summary.outcome("web", 0), Some(UnitOutcome::Skipped));
        assert_eq!(summary.outcome("docs", 0), Some(UnitOutcome::Success));
    }

    #[tokio::test]
    async fn test_fail_at_end_does_not_rebuild_failed_unit_in_later_segments() {
        let runner = Arc::new(ScriptedRunner::failing("api", "resources"));
        let (summary, _) = build(
            1,
            FailurePolicy::FailAtEnd,
            &runner,
            &["resources", "acme:report", "resources"],
        )
        .await;

        assert_eq!(summary.outcome("api", 0), Some(UnitOutcome::Failed));
        assert_eq!(summary.outcome("api", 2), Some(UnitOutcome::Skipped));
        assert_eq!(summary.outcome("web", 2), Some(UnitOutcome::Skipped));
        assert_eq!(summary.outcome("docs", 2), Some(UnitOutcome::Success));
        assert_eq!(
            runner.log().iter().filter(|e| *e == "resources@api").count(),
            1
        );
    }

    #[tokio::test]
    async fn test_planning_failure_fails_the_unit() {
        let runner = Arc::new(ScriptedRunner::default());
        let (summary, _) = build(1, FailurePolicy::FailAtEnd, &runner, &["compyle"]).await;

        let failure = summary.result("core", 0).unwrap();
        assert_eq!(failure.error_kind, Some(ErrorKind::Configuration));
        assert!(failure.error.as_deref().unwrap().contains("compyle"));
        assert_eq!(summary.skipped, 3);
        assert!(runner.log().is_empty());
    }
}
