//! Dependency resolution context of one execution list.
//!
//! The context resolves the union of the scopes every remaining step needs,
//! once, when the first step that needs any scope runs. It resolves again
//! only when a step asks for a scope outside that set. Aggregating steps
//! additionally resolve their scopes on every other unit of the build.

use crate::plan::execution::StepExecution;
use crate::plan::scope::Scope;
use crate::reactor::graph::UnitGraph;
use crate::reactor::unit::BuildUnit;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Materializes the artifacts of a unit's dependencies.
#[async_trait]
pub trait DependencyResolver: Send + Sync {
    /// Resolve `scopes` for `unit`, returning the resolved artifact ids.
    async fn resolve(&self, unit: &BuildUnit, scopes: &BTreeSet<Scope>) -> anyhow::Result<Vec<String>>;
}

/// Resolves nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopResolver;

#[async_trait]
impl DependencyResolver for NoopResolver {
    async fn resolve(&self, _unit: &BuildUnit, _scopes: &BTreeSet<Scope>) -> anyhow::Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Resolves dependencies to the upstream units of the build graph.
#[derive(Debug, Clone)]
pub struct GraphResolver {
    units: Arc<UnitGraph>,
}

impl GraphResolver {
    pub fn new(units: Arc<UnitGraph>) -> Self {
        Self { units }
    }
}

#[async_trait]
impl DependencyResolver for GraphResolver {
    async fn resolve(&self, unit: &BuildUnit, scopes: &BTreeSet<Scope>) -> anyhow::Result<Vec<String>> {
        if self.units.get(&unit.id).is_none() {
            anyhow::bail!("Unit '{}' is not part of the build", unit.id);
        }
        Ok(self
            .units
            .upstream_in_scope(&unit.id, scopes)
            .into_iter()
            .map(|u| u.id.clone())
            .collect())
    }
}

/// Lazily resolved dependencies of one unit.
#[derive(Debug, Clone)]
pub struct DependencyContext {
    unit: String,
    /// Scopes required by the steps of the list.
    pending: BTreeSet<Scope>,
    resolved: Option<BTreeSet<Scope>>,
    artifacts: Vec<String>,
    /// Scopes already resolved on the other units for aggregating steps.
    aggregated: BTreeSet<Scope>,
    aggregated_artifacts: BTreeMap<String, Vec<String>>,
    resolutions: usize,
}

impl DependencyContext {
    pub fn new(unit: impl Into<String>, executions: &[StepExecution]) -> Self {
        Self {
            unit: unit.into(),
            pending: executions
                .iter()
                .flat_map(StepExecution::required_scopes)
                .collect(),
            resolved: None,
            artifacts: Vec::new(),
            aggregated: BTreeSet::new(),
            aggregated_artifacts: BTreeMap::new(),
            resolutions: 0,
        }
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Whether a step requiring `scopes` needs a (re-)resolution.
    pub fn is_resolution_required(&self, scopes: &BTreeSet<Scope>) -> bool {
        match &self.resolved {
            None => !scopes.is_empty(),
            Some(resolved) => !scopes.is_subset(resolved),
        }
    }

    /// Whether an aggregating step requiring `scopes` needs the other units
    /// resolved.
    pub fn is_aggregate_resolution_required(&self, scopes: &BTreeSet<Scope>) -> bool {
        !scopes.is_empty() && !scopes.is_subset(&self.aggregated)
    }

    /// Make sure the dependencies `execution` needs are resolved.
    pub async fn ensure(
        &mut self,
        resolver: &dyn DependencyResolver,
        units: &UnitGraph,
        unit: &BuildUnit,
        execution: &StepExecution,
    ) -> anyhow::Result<()> {
        let required = execution.required_scopes();

        if self.is_resolution_required(&required) {
            let mut scopes = self.resolved.clone().unwrap_or_default();
            scopes.extend(self.pending.iter().copied());
            scopes.extend(required.iter().copied());

            tracing::debug!(unit = %unit.id, scopes = ?scopes, "Resolving dependencies");
            self.artifacts = resolver.resolve(unit, &scopes).await?;
            self.resolved = Some(scopes);
            self.resolutions += 1;
        }

        if execution.is_aggregating() && self.is_aggregate_resolution_required(&required) {
            for other in units.sorted().filter(|u| u.id != unit.id) {
                let artifacts = resolver.resolve(other, &required).await?;
                self.aggregated_artifacts.insert(other.id.clone(), artifacts);
            }
            self.aggregated.extend(required);
            self.resolutions += 1;
        }
        Ok(())
    }

    /// Artifacts resolved for the unit itself.
    pub fn artifacts(&self) -> &[String] {
        &self.artifacts
    }

    pub fn aggregated_artifacts(&self) -> &BTreeMap<String, Vec<String>> {
        &self.aggregated_artifacts
    }

    pub fn resolved_scopes(&self) -> Option<&BTreeSet<Scope>> {
        self.resolved.as_ref()
    }

    /// Number of resolver round-trips so far.
    pub fn resolutions(&self) -> usize {
        self.resolutions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::descriptor::{Coordinate, StepDescriptor};
    use crate::plan::execution::{ExecutionSource, StepExecutionBuilder};
    use crate::plan::scope::ResolutionScope;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingResolver {
        calls: Mutex<Vec<(String, BTreeSet<Scope>)>>,
    }

    impl CountingResolver {
        fn calls(&self) -> Vec<(String, BTreeSet<Scope>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DependencyResolver for CountingResolver {
        async fn resolve(&self, unit: &BuildUnit, scopes: &BTreeSet<Scope>) -> anyhow::Result<Vec<String>> {
            self.calls
                .lock()
                .unwrap()
                .push((unit.id.clone(), scopes.clone()));
            Ok(vec![format!("{}-deps", unit.id)])
        }
    }

    fn step(goal: &str, scope: Option<ResolutionScope>, aggregator: bool) -> StepExecution {
        let mut descriptor = StepDescriptor::new(Coordinate::new("org.acme", "acme-plugin"), goal);
        descriptor.requires_resolution = scope;
        descriptor.aggregator = aggregator;
        StepExecutionBuilder::new(Arc::new(descriptor), format!("default-{}", goal), ExecutionSource::Lifecycle)
            .configure()
    }

    fn graph() -> UnitGraph {
        UnitGraph::build(vec![
            BuildUnit::new("app").depends_on("core", None),
            BuildUnit::new("core"),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_resolves_union_once() {
        let units = graph();
        let app = units.get("app").unwrap();
        let steps = vec![
            step("resources", None, false),
            step("compile", Some(ResolutionScope::Compile), false),
            step("test", Some(ResolutionScope::Test), false),
        ];
        let resolver = CountingResolver::default();
        let mut context = DependencyContext::new("app", &steps);

        for execution in &steps {
            context.ensure(&resolver, &units, app, execution).await.unwrap();
        }

        let calls = resolver.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, BTreeSet::from(Scope::ALL));
        assert_eq!(context.artifacts(), ["app-deps"]);
        assert_eq!(context.resolutions(), 1);
    }

    #[tokio::test]
    async fn test_steps_without_scopes_resolve_nothing() {
        let units = graph();
        let steps = vec![step("clean", None, false)];
        let resolver = CountingResolver::default();
        let mut context = DependencyContext::new("app", &steps);

        context
            .ensure(&resolver, &units, units.get("app").unwrap(), &steps[0])
            .await
            .unwrap();
        assert!(resolver.calls().is_empty());
        assert!(context.resolved_scopes().is_none());
    }

    #[tokio::test]
    async fn test_wider_step_triggers_reresolution() {
        let units = graph();
        let app = units.get("app").unwrap();
        let planned = vec![step("compile", Some(ResolutionScope::Compile), false)];
        let resolver = CountingResolver::default();
        let mut context = DependencyContext::new("app", &planned);

        context.ensure(&resolver, &units, app, &planned[0]).await.unwrap();
        let wider = step("test", Some(ResolutionScope::Test), false);
        assert!(context.is_resolution_required(&wider.required_scopes()));
        context.ensure(&resolver, &units, app, &wider).await.unwrap();

        assert_eq!(resolver.calls().len(), 2);
        assert!(context.resolved_scopes().unwrap().contains(&Scope::Test));
    }

    #[tokio::test]
    async fn test_aggregator_resolves_other_units_once() {
        let units = graph();
        let app = units.get("app").unwrap();
        let report = step("report", Some(ResolutionScope::Runtime), true);
        let steps = vec![report.clone(), report];
        let resolver = CountingResolver::default();
        let mut context = DependencyContext::new("app", &steps);

        for execution in &steps {
            context.ensure(&resolver, &units, app, execution).await.unwrap();
        }

        let units_resolved: Vec<String> = resolver.calls().into_iter().map(|(u, _)| u).collect();
        assert_eq!(units_resolved, ["app", "core"]);
        assert_eq!(context.aggregated_artifacts()["core"], ["core-deps"]);
    }

    #[tokio::test]
    async fn test_graph_resolver_returns_upstream_units() {
        let units = Arc::new(graph());
        let resolver = GraphResolver::new(Arc::clone(&units));
        let app = units.get("app").unwrap();

        let ids = resolver
            .resolve(app, &ResolutionScope::Compile.scopes())
            .await
            .unwrap();
        assert_eq!(ids, ["core"]);

        let stranger = BuildUnit::new("stranger");
        assert!(resolver.resolve(&stranger, &BTreeSet::new()).await.is_err());
    }
}
