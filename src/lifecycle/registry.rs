//! Registry of known lifecycles.
//!
//! Registration validates each lifecycle and caches its computed order, so
//! planning never rebuilds a phase graph.

use super::defaults;
use super::graph::{PhaseOrder, compute_order};
use super::{Lifecycle, PhaseRef, Point};
use crate::errors::{BuildError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Known lifecycles with their phase orders and legacy aliases.
#[derive(Debug, Default)]
pub struct LifecycleRegistry {
    lifecycles: Vec<Lifecycle>,
    orders: HashMap<String, Arc<PhaseOrder>>,
    /// Phase or alias name -> index into `lifecycles`
    owners: HashMap<String, usize>,
    /// Legacy name -> execution point it stands for
    aliases: HashMap<String, PhaseRef>,
}

impl LifecycleRegistry {
    /// Create a registry from a list of lifecycles.
    pub fn new(lifecycles: Vec<Lifecycle>) -> Result<Self> {
        let mut registry = Self::default();
        for lifecycle in lifecycles {
            registry.register(lifecycle)?;
        }
        Ok(registry)
    }

    /// The `clean`, `default` and `site` lifecycles.
    pub fn standard() -> Result<Self> {
        Self::new(defaults::standard_lifecycles())
    }

    /// Register a lifecycle, replacing one with the same id.
    pub fn register(&mut self, lifecycle: Lifecycle) -> Result<()> {
        if let Some(duplicate) = lifecycle.duplicate_phases().first() {
            return Err(BuildError::configuration(format!(
                "Found duplicated phase '{}' in '{}' lifecycle",
                duplicate, lifecycle.id
            )));
        }

        if let Some(existing) = self.lifecycles.iter().position(|l| l.id == lifecycle.id) {
            self.lifecycles.remove(existing);
            self.rebuild_index()?;
        }

        let order = compute_order(&lifecycle.phases).map_err(|e| {
            BuildError::configuration(format!("Lifecycle '{}': {}", lifecycle.id, e.message))
        })?;
        let index = self.lifecycles.len();
        self.index_lifecycle(index, &lifecycle)?;
        self.orders.insert(lifecycle.id.clone(), Arc::new(order));
        self.lifecycles.push(lifecycle);
        Ok(())
    }

    fn rebuild_index(&mut self) -> Result<()> {
        self.owners.clear();
        self.aliases.clear();
        self.orders.retain(|id, _| self.lifecycles.iter().any(|l| &l.id == id));
        let lifecycles = std::mem::take(&mut self.lifecycles);
        for (index, lifecycle) in lifecycles.iter().enumerate() {
            self.index_lifecycle(index, lifecycle)?;
        }
        self.lifecycles = lifecycles;
        Ok(())
    }

    fn index_lifecycle(&mut self, index: usize, lifecycle: &Lifecycle) -> Result<()> {
        let names = lifecycle
            .phase_names()
            .into_iter()
            .map(str::to_string)
            .chain(lifecycle.aliases.iter().map(|a| a.legacy.clone()));
        for name in names {
            if let Some(&owner) = self.owners.get(&name)
                && owner != index
            {
                let other = self
                    .lifecycles
                    .get(owner)
                    .map_or("<unknown>", |l| l.id.as_str());
                return Err(BuildError::configuration(format!(
                    "Phase '{}' of lifecycle '{}' is already declared by lifecycle '{}'",
                    name, lifecycle.id, other
                )));
            }
            self.owners.insert(name, index);
        }
        for alias in &lifecycle.aliases {
            self.aliases
                .insert(alias.legacy.clone(), PhaseRef::parse(&alias.target));
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Lifecycle> {
        self.lifecycles.iter().find(|l| l.id == id)
    }

    pub fn lifecycles(&self) -> &[Lifecycle] {
        &self.lifecycles
    }

    pub fn ids(&self) -> Vec<&str> {
        self.lifecycles.iter().map(|l| l.id.as_str()).collect()
    }

    /// The computed order of a lifecycle.
    pub fn order(&self, id: &str) -> Result<Arc<PhaseOrder>> {
        self.orders
            .get(id)
            .cloned()
            .ok_or_else(|| BuildError::configuration(format!("Unknown lifecycle '{}'", id)))
    }

    /// Map a raw phase string to its execution point, following legacy aliases.
    pub fn resolve(&self, raw: &str) -> PhaseRef {
        let parsed = PhaseRef::parse(raw);
        if parsed.point == Point::At
            && let Some(target) = self.aliases.get(&parsed.phase)
        {
            return target.clone();
        }
        parsed
    }

    /// Find the lifecycle that declares `phase` (or an alias of it).
    pub fn lifecycle_for_phase(&self, phase: &str) -> Result<&Lifecycle> {
        self.owners
            .get(phase)
            .and_then(|&i| self.lifecycles.get(i))
            .ok_or_else(|| self.unknown_phase(phase))
    }

    fn unknown_phase(&self, phase: &str) -> BuildError {
        let available: Vec<&str> = self
            .lifecycles
            .iter()
            .flat_map(|l| l.phase_names())
            .collect();
        BuildError::configuration(format!(
            "Unknown lifecycle phase \"{}\". You must specify a valid lifecycle phase or a goal in \
             the format <plugin-prefix>:<goal> or <plugin-group-id>:<plugin-artifact-id>[:<plugin-version>]:<goal>. \
             Available lifecycle phases are: {}.",
            phase,
            available.join(", ")
        ))
        .with_phase(phase)
    }
}

/// Memoized phase-string resolution for one build session.
#[derive(Debug, Default)]
pub struct PhaseRefCache {
    entries: Mutex<HashMap<String, PhaseRef>>,
}

impl PhaseRefCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&self, registry: &LifecycleRegistry, raw: &str) -> PhaseRef {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .entry(raw.to_string())
            .or_insert_with(|| registry.resolve(raw))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::lifecycle::Phase;

    #[test]
    fn test_standard_registry() {
        let registry = LifecycleRegistry::standard().unwrap();
        assert_eq!(registry.ids(), ["clean", "default", "site"]);
        assert_eq!(registry.lifecycle_for_phase("compile").unwrap().id, "default");
        assert_eq!(registry.lifecycle_for_phase("clean").unwrap().id, "clean");
        assert_eq!(registry.lifecycle_for_phase("post-site").unwrap().id, "site");
    }

    #[test]
    fn test_duplicate_phase_rejected_at_registration() {
        let lifecycle = Lifecycle::new(
            "broken",
            vec![Phase::new("a").child(Phase::new("b")), Phase::new("b")],
        );
        let err = LifecycleRegistry::new(vec![lifecycle]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
        assert!(err.message.contains("Found duplicated phase 'b' in 'broken' lifecycle"));
    }

    #[test]
    fn test_phase_claimed_by_two_lifecycles() {
        let err = LifecycleRegistry::new(vec![
            Lifecycle::new("one", vec![Phase::new("shared")]),
            Lifecycle::new("two", vec![Phase::new("shared")]),
        ])
        .unwrap_err();
        assert!(err.message.contains("already declared by lifecycle 'one'"));
    }

    #[test]
    fn test_register_replaces_same_id() {
        let mut registry =
            LifecycleRegistry::new(vec![Lifecycle::new("docs", vec![Phase::new("render")])])
                .unwrap();
        registry
            .register(Lifecycle::new("docs", vec![Phase::new("publish")]))
            .unwrap();

        assert_eq!(registry.ids(), ["docs"]);
        assert!(registry.lifecycle_for_phase("render").is_err());
        assert_eq!(registry.order("docs").unwrap().phases(), ["publish"]);
    }

    #[test]
    fn test_unknown_phase_lists_available() {
        let registry = LifecycleRegistry::standard().unwrap();
        let err = registry.lifecycle_for_phase("bogus").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
        assert!(err.message.contains("Unknown lifecycle phase \"bogus\""));
        assert!(err.message.contains("compile"));
        assert_eq!(err.context.phase.as_deref(), Some("bogus"));
    }

    #[test]
    fn test_resolve_legacy_aliases() {
        let registry = LifecycleRegistry::standard().unwrap();
        assert_eq!(registry.resolve("generate-sources"), PhaseRef::at("sources"));
        assert_eq!(
            registry.resolve("process-classes"),
            PhaseRef::with_point(Point::After, "compile")
        );
        assert_eq!(
            registry.resolve("prepare-package"),
            PhaseRef::with_point(Point::Before, "package")
        );
        assert_eq!(registry.resolve("compile"), PhaseRef::at("compile"));
    }

    #[test]
    fn test_unknown_lifecycle_order() {
        let registry = LifecycleRegistry::standard().unwrap();
        let err = registry.order("release").unwrap_err();
        assert!(err.message.contains("Unknown lifecycle 'release'"));
    }

    #[test]
    fn test_cycle_reported_as_configuration_error() {
        let err = LifecycleRegistry::new(vec![Lifecycle::new(
            "loop",
            vec![Phase::new("a").after("b"), Phase::new("b")],
        )])
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
        assert!(err.message.contains("Lifecycle 'loop'"));
    }

    #[test]
    fn test_phase_ref_cache_memoizes() {
        let registry = LifecycleRegistry::standard().unwrap();
        let cache = PhaseRefCache::new();
        assert!(cache.is_empty());

        let first = cache.resolve(&registry, "process-resources");
        let second = cache.resolve(&registry, "process-resources");
        assert_eq!(first, second);
        assert_eq!(first, PhaseRef::with_point(Point::After, "resources"));
        assert_eq!(cache.len(), 1);
    }
}
