//! Lifecycle declarations and phase ordering.
//!
//! A lifecycle is a tree of phases. Each phase may contain sub-phases and
//! carry links to other phases. The [`graph`] module flattens the tree into
//! one total order, and the [`registry`] keeps the known lifecycles with
//! their legacy phase aliases.
//!
//! ```
//! use reactor::lifecycle::{Lifecycle, Phase};
//! use reactor::lifecycle::graph::compute_order;
//!
//! let lifecycle = Lifecycle::new(
//!     "docs",
//!     vec![
//!         Phase::new("render"),
//!         Phase::new("publish").after("render"),
//!     ],
//! );
//! let order = compute_order(&lifecycle.phases).unwrap();
//! assert_eq!(order.phases(), ["render", "publish"]);
//! ```

pub mod defaults;
pub mod graph;
pub mod registry;

pub use graph::{NodeKey, PhaseOrder, compute_order};
pub use registry::{LifecycleRegistry, PhaseRefCache};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Direction of an ordering link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    /// The declaring phase starts only after the target completed.
    After,
    /// The declaring phase completes before the target starts.
    Before,
}

/// Target of a link.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pointer {
    /// A phase of the same unit.
    Phase(String),
    /// The named phase of every child unit.
    Children(String),
    /// The named phase of every upstream unit reached through `scope`.
    Dependencies { scope: String, phase: String },
}

/// A directed ordering constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Link {
    pub kind: LinkKind,
    pub pointer: Pointer,
}

/// A named ordering point with optional nested phases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phases: Vec<Phase>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<Link>,
    /// Step bindings attached to this phase by the lifecycle itself,
    /// as `group:artifact[:version]:goal` strings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bindings: Vec<String>,
}

impl Phase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phases: Vec::new(),
            links: Vec::new(),
            bindings: Vec::new(),
        }
    }

    /// Append a sub-phase.
    pub fn child(mut self, phase: Phase) -> Self {
        self.phases.push(phase);
        self
    }

    /// Run only after `phase` completed.
    pub fn after(mut self, phase: impl Into<String>) -> Self {
        self.links.push(Link {
            kind: LinkKind::After,
            pointer: Pointer::Phase(phase.into()),
        });
        self
    }

    /// Complete before `phase` starts.
    pub fn before(mut self, phase: impl Into<String>) -> Self {
        self.links.push(Link {
            kind: LinkKind::Before,
            pointer: Pointer::Phase(phase.into()),
        });
        self
    }

    /// Wait for `phase` of every child unit.
    pub fn after_children(mut self, phase: impl Into<String>) -> Self {
        self.links.push(Link {
            kind: LinkKind::After,
            pointer: Pointer::Children(phase.into()),
        });
        self
    }

    /// Wait for `phase` of every upstream unit in `scope`.
    pub fn after_dependencies(mut self, scope: impl Into<String>, phase: impl Into<String>) -> Self {
        self.links.push(Link {
            kind: LinkKind::After,
            pointer: Pointer::Dependencies {
                scope: scope.into(),
                phase: phase.into(),
            },
        });
        self
    }

    pub fn binding(mut self, spec: impl Into<String>) -> Self {
        self.bindings.push(spec.into());
        self
    }

    /// Visit this phase and every nested phase, parents first.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Phase)) {
        visit(self);
        for child in &self.phases {
            child.walk(visit);
        }
    }
}

/// A legacy phase name mapped onto an execution point of a current phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
    pub legacy: String,
    pub target: String,
}

impl Alias {
    pub fn new(legacy: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            legacy: legacy.into(),
            target: target.into(),
        }
    }
}

/// A named tree of phases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifecycle {
    pub id: String,
    pub phases: Vec<Phase>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<Alias>,
}

impl Lifecycle {
    pub fn new(id: impl Into<String>, phases: Vec<Phase>) -> Self {
        Self {
            id: id.into(),
            phases,
            aliases: Vec::new(),
        }
    }

    pub fn with_aliases(mut self, aliases: Vec<Alias>) -> Self {
        self.aliases = aliases;
        self
    }

    /// Every phase of the tree, parents first.
    pub fn all_phases(&self) -> Vec<&Phase> {
        let mut all = Vec::new();
        for phase in &self.phases {
            phase.walk(&mut |p| all.push(p));
        }
        all
    }

    /// Every phase name of the tree, parents first.
    pub fn phase_names(&self) -> Vec<&str> {
        self.all_phases().into_iter().map(|p| p.name.as_str()).collect()
    }

    pub fn find(&self, name: &str) -> Option<&Phase> {
        self.all_phases().into_iter().find(|p| p.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Names declared more than once, in first-repeat order.
    pub fn duplicate_phases(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();
        for name in self.phase_names() {
            if !seen.insert(name) && !duplicates.iter().any(|d| d == name) {
                duplicates.push(name.to_string());
            }
        }
        duplicates
    }
}

/// One of the three execution points of a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Point {
    Before,
    At,
    After,
}

impl Point {
    fn prefix(self) -> &'static str {
        match self {
            Point::Before => "before:",
            Point::At => "at:",
            Point::After => "after:",
        }
    }
}

/// A phase name with the execution point it refers to.
///
/// Parses `name`, `before:name`, `at:name` and `after:name`. A bare name
/// defaults to [`Point::At`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PhaseRef {
    pub point: Point,
    pub phase: String,
}

impl PhaseRef {
    pub fn at(phase: impl Into<String>) -> Self {
        Self {
            point: Point::At,
            phase: phase.into(),
        }
    }

    pub fn with_point(point: Point, phase: impl Into<String>) -> Self {
        Self {
            point,
            phase: phase.into(),
        }
    }

    pub fn parse(raw: &str) -> Self {
        for point in [Point::Before, Point::At, Point::After] {
            if let Some(phase) = raw.strip_prefix(point.prefix()) {
                return Self::with_point(point, phase);
            }
        }
        Self::at(raw)
    }

    /// The graph node this reference binds to.
    pub fn node_key(&self) -> NodeKey {
        match self.point {
            Point::Before => NodeKey::Before(self.phase.clone()),
            Point::At => NodeKey::At(self.phase.clone()),
            Point::After => NodeKey::After(self.phase.clone()),
        }
    }
}

impl FromStr for PhaseRef {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl fmt::Display for PhaseRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.point {
            Point::At => write!(f, "{}", self.phase),
            point => write!(f, "{}{}", point.prefix(), self.phase),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_builder_links() {
        let phase = Phase::new("compile")
            .after("sources")
            .after_dependencies("compile", "ready")
            .before("package");

        assert_eq!(phase.links.len(), 3);
        assert_eq!(phase.links[0].kind, LinkKind::After);
        assert_eq!(phase.links[0].pointer, Pointer::Phase("sources".into()));
        assert_eq!(
            phase.links[1].pointer,
            Pointer::Dependencies {
                scope: "compile".into(),
                phase: "ready".into()
            }
        );
        assert_eq!(phase.links[2].kind, LinkKind::Before);
    }

    #[test]
    fn test_lifecycle_walks_nested_phases() {
        let lifecycle = Lifecycle::new(
            "custom",
            vec![
                Phase::new("outer")
                    .child(Phase::new("first").child(Phase::new("deep")))
                    .child(Phase::new("second")),
            ],
        );

        assert_eq!(lifecycle.phase_names(), ["outer", "first", "deep", "second"]);
        assert!(lifecycle.contains("deep"));
        assert!(!lifecycle.contains("missing"));
    }

    #[test]
    fn test_duplicate_phases_reported_once() {
        let lifecycle = Lifecycle::new(
            "dup",
            vec![
                Phase::new("a").child(Phase::new("b")),
                Phase::new("b"),
                Phase::new("b"),
            ],
        );

        assert_eq!(lifecycle.duplicate_phases(), ["b"]);
    }

    #[test]
    fn test_phase_ref_parse() {
        assert_eq!(PhaseRef::parse("compile"), PhaseRef::at("compile"));
        assert_eq!(
            PhaseRef::parse("after:compile"),
            PhaseRef::with_point(Point::After, "compile")
        );
        assert_eq!(
            PhaseRef::parse("before:package"),
            PhaseRef::with_point(Point::Before, "package")
        );
        assert_eq!(PhaseRef::parse("at:test"), PhaseRef::at("test"));
    }

    #[test]
    fn test_phase_ref_display() {
        assert_eq!(PhaseRef::at("compile").to_string(), "compile");
        assert_eq!(
            PhaseRef::with_point(Point::After, "compile").to_string(),
            "after:compile"
        );
    }

    #[test]
    fn test_pointer_deserializes_from_toml() {
        let content = r#"
kind = "after"
pointer = { dependencies = { scope = "runtime", phase = "package" } }
"#;
        let link: Link = toml::from_str(content).unwrap();
        assert_eq!(link.kind, LinkKind::After);
        assert!(matches!(link.pointer, Pointer::Dependencies { .. }));
    }
}
