//! Unit dependency graph.
//!
//! Units are nodes; a declared dependency is an edge from the upstream unit
//! to the unit that needs it. The graph is validated once, at construction.

use super::unit::BuildUnit;
use crate::errors::{BuildError, Result};
use crate::plan::scope::{Scope, effective_scope};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Index into the unit list.
pub type UnitIndex = usize;

/// A directed acyclic graph of build units.
#[derive(Debug, Default)]
pub struct UnitGraph {
    /// Units in declaration order
    units: Vec<BuildUnit>,
    /// Map from unit id to index
    index_map: HashMap<String, UnitIndex>,
    /// Forward edges: index -> units that depend on it
    forward_edges: Vec<Vec<UnitIndex>>,
    /// Reverse edges: index -> units it depends on
    reverse_edges: Vec<Vec<UnitIndex>>,
    /// Topological order, ties broken by declaration order
    sorted: Vec<UnitIndex>,
}

impl UnitGraph {
    /// Build and validate the graph.
    ///
    /// Fails on duplicate ids, unknown dependencies or modules, and cycles.
    pub fn build(units: Vec<BuildUnit>) -> Result<Self> {
        let mut index_map = HashMap::new();
        for (i, unit) in units.iter().enumerate() {
            if index_map.insert(unit.id.clone(), i).is_some() {
                return Err(BuildError::configuration(format!(
                    "Duplicate unit id: {}",
                    unit.id
                )));
            }
        }

        let mut forward_edges: Vec<Vec<UnitIndex>> = vec![Vec::new(); units.len()];
        let mut reverse_edges: Vec<Vec<UnitIndex>> = vec![Vec::new(); units.len()];

        for (to_idx, unit) in units.iter().enumerate() {
            for dep in &unit.dependencies {
                let from_idx = *index_map.get(&dep.unit).ok_or_else(|| {
                    BuildError::configuration(format!(
                        "Unknown dependency '{}' in unit '{}': no unit with that id exists",
                        dep.unit, unit.id
                    ))
                    .with_unit(unit.id.clone())
                })?;
                if !forward_edges[from_idx].contains(&to_idx) {
                    forward_edges[from_idx].push(to_idx);
                    reverse_edges[to_idx].push(from_idx);
                }
            }
            for module in &unit.modules {
                if !index_map.contains_key(module) {
                    return Err(BuildError::configuration(format!(
                        "Unknown module '{}' in unit '{}'",
                        module, unit.id
                    ))
                    .with_unit(unit.id.clone()));
                }
            }
        }

        let mut graph = UnitGraph {
            units,
            index_map,
            forward_edges,
            reverse_edges,
            sorted: Vec::new(),
        };
        graph.sorted = graph.topological_order()?;
        Ok(graph)
    }

    /// Kahn's algorithm, always taking the lowest declared index that is ready.
    fn topological_order(&self) -> Result<Vec<UnitIndex>> {
        let mut in_degree: Vec<usize> = self.reverse_edges.iter().map(|deps| deps.len()).collect();
        let mut ready: BTreeSet<UnitIndex> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, deg)| *deg == 0)
            .map(|(i, _)| i)
            .collect();

        let mut order = Vec::with_capacity(self.units.len());
        while let Some(node) = ready.pop_first() {
            order.push(node);
            for &dependent in self.dependents(node) {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() != self.units.len() {
            let cycle_units: Vec<&str> = in_degree
                .iter()
                .enumerate()
                .filter(|&(_, deg)| *deg > 0)
                .map(|(i, _)| self.units[i].id.as_str())
                .collect();
            return Err(BuildError::configuration(format!(
                "Cycle detected in unit dependencies. Involved units: {:?}",
                cycle_units
            )));
        }

        Ok(order)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn get_index(&self, id: &str) -> Option<UnitIndex> {
        self.index_map.get(id).copied()
    }

    pub fn get(&self, id: &str) -> Option<&BuildUnit> {
        self.get_index(id).and_then(|i| self.units.get(i))
    }

    pub fn unit(&self, index: UnitIndex) -> Option<&BuildUnit> {
        self.units.get(index)
    }

    pub fn units(&self) -> &[BuildUnit] {
        &self.units
    }

    /// Units that depend on the given unit.
    pub fn dependents(&self, index: UnitIndex) -> &[UnitIndex] {
        self.forward_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    /// Units the given unit depends on.
    pub fn dependencies(&self, index: UnitIndex) -> &[UnitIndex] {
        self.reverse_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    /// Units in build order.
    pub fn sorted(&self) -> impl Iterator<Item = &BuildUnit> {
        self.sorted.iter().filter_map(|&i| self.units.get(i))
    }

    /// Ids of the direct upstream units of `id`.
    pub fn upstream(&self, id: &str) -> Vec<&str> {
        self.get_index(id)
            .map(|i| {
                self.dependencies(i)
                    .iter()
                    .map(|&d| self.units[d].id.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Ids of every unit that transitively depends on `id`.
    pub fn transitive_downstream(&self, id: &str) -> Vec<&str> {
        let Some(start) = self.get_index(id) else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        let mut stack: Vec<UnitIndex> = self.dependents(start).to_vec();
        while let Some(node) = stack.pop() {
            if seen.insert(node) {
                stack.extend_from_slice(self.dependents(node));
            }
        }
        self.sorted
            .iter()
            .filter(|i| seen.contains(i))
            .map(|&i| self.units[i].id.as_str())
            .collect()
    }

    /// `id` plus every unit reachable through modules or dependencies, in
    /// build order.
    pub fn reachable(&self, id: &str) -> Vec<&BuildUnit> {
        let Some(start) = self.get_index(id) else {
            return Vec::new();
        };
        let mut seen = HashSet::from([start]);
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            let modules = self.units[node]
                .modules
                .iter()
                .filter_map(|m| self.get_index(m));
            let next: Vec<UnitIndex> = modules
                .chain(self.dependencies(node).iter().copied())
                .collect();
            for n in next {
                if seen.insert(n) {
                    stack.push(n);
                }
            }
        }
        self.sorted
            .iter()
            .filter(|i| seen.contains(i))
            .filter_map(|&i| self.units.get(i))
            .collect()
    }

    /// Transitive upstream units of `id` whose effective scope is in
    /// `scopes`, in build order.
    pub fn upstream_in_scope(&self, id: &str, scopes: &BTreeSet<Scope>) -> Vec<&BuildUnit> {
        let Some(start) = self.get_index(id) else {
            return Vec::new();
        };

        let mut effective: HashMap<UnitIndex, BTreeSet<Scope>> = HashMap::new();
        let mut stack: Vec<(UnitIndex, Option<Scope>)> = vec![(start, None)];
        while let Some((node, inherited)) = stack.pop() {
            for dep in &self.units[node].dependencies {
                let Some(target) = self.get_index(&dep.unit) else {
                    continue;
                };
                let Some(scope) = effective_scope(dep.scope, inherited) else {
                    continue;
                };
                if effective.entry(target).or_default().insert(scope) {
                    stack.push((target, Some(scope)));
                }
            }
        }

        self.sorted
            .iter()
            .filter(|i| {
                effective
                    .get(i)
                    .is_some_and(|found| found.iter().any(|s| scopes.contains(s)))
            })
            .filter_map(|&i| self.units.get(i))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(units: &[&BuildUnit]) -> Vec<String> {
        units.iter().map(|u| u.id.clone()).collect()
    }

    fn chain() -> Vec<BuildUnit> {
        vec![
            BuildUnit::new("app").depends_on("core", None),
            BuildUnit::new("core").depends_on("api", None),
            BuildUnit::new("api"),
        ]
    }

    #[test]
    fn test_sorted_respects_dependencies() {
        let graph = UnitGraph::build(chain()).unwrap();
        let order: Vec<&str> = graph.sorted().map(|u| u.id.as_str()).collect();
        assert_eq!(order, ["api", "core", "app"]);
    }

    #[test]
    fn test_independent_units_keep_declaration_order() {
        let graph = UnitGraph::build(vec![
            BuildUnit::new("b"),
            BuildUnit::new("a"),
            BuildUnit::new("c"),
        ])
        .unwrap();
        let order: Vec<&str> = graph.sorted().map(|u| u.id.as_str()).collect();
        assert_eq!(order, ["b", "a", "c"]);
    }

    #[test]
    fn test_upstream_and_downstream() {
        let graph = UnitGraph::build(chain()).unwrap();
        assert_eq!(graph.upstream("app"), ["core"]);
        assert!(graph.upstream("api").is_empty());
        assert_eq!(graph.transitive_downstream("api"), ["core", "app"]);
    }

    #[test]
    fn test_cycle_detection() {
        let result = UnitGraph::build(vec![
            BuildUnit::new("a").depends_on("c", None),
            BuildUnit::new("b").depends_on("a", None),
            BuildUnit::new("c").depends_on("b", None),
        ]);
        let err = result.unwrap_err();
        assert!(err.message.contains("Cycle"));
    }

    #[test]
    fn test_missing_dependency() {
        let err = UnitGraph::build(vec![BuildUnit::new("a").depends_on("nonexistent", None)])
            .unwrap_err();
        assert!(err.message.contains("nonexistent"));
        assert_eq!(err.context.unit.as_deref(), Some("a"));
    }

    #[test]
    fn test_duplicate_unit() {
        let err = UnitGraph::build(vec![BuildUnit::new("a"), BuildUnit::new("a")]).unwrap_err();
        assert!(err.message.contains("Duplicate"));
    }

    #[test]
    fn test_unknown_module() {
        let err = UnitGraph::build(vec![BuildUnit::new("root").with_module("ghost")]).unwrap_err();
        assert!(err.message.contains("Unknown module 'ghost'"));
    }

    #[test]
    fn test_reachable_follows_modules_and_dependencies() {
        let graph = UnitGraph::build(vec![
            BuildUnit::new("root")
                .with_packaging("pom")
                .with_module("app")
                .with_module("lib"),
            BuildUnit::new("app").depends_on("util", None),
            BuildUnit::new("lib"),
            BuildUnit::new("util"),
            BuildUnit::new("other"),
        ])
        .unwrap();

        assert_eq!(ids(&graph.reachable("root")), ["root", "lib", "util", "app"]);
        assert_eq!(ids(&graph.reachable("lib")), ["lib"]);
    }

    #[test]
    fn test_upstream_in_scope() {
        let graph = UnitGraph::build(vec![
            BuildUnit::new("app")
                .depends_on("core", None)
                .depends_on("junit", Some(Scope::Test)),
            BuildUnit::new("core")
                .depends_on("api", None)
                .depends_on("mock", Some(Scope::Test)),
            BuildUnit::new("api"),
            BuildUnit::new("junit"),
            BuildUnit::new("mock"),
        ])
        .unwrap();

        let compile = BTreeSet::from([Scope::Compile]);
        assert_eq!(ids(&graph.upstream_in_scope("app", &compile)), ["api", "core"]);

        let test = BTreeSet::from([Scope::Test]);
        // Test scope does not propagate, so core's mock dependency is not seen.
        assert_eq!(ids(&graph.upstream_in_scope("app", &test)), ["junit"]);
    }
}
