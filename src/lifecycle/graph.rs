//! Phase graph construction and ordering.
//!
//! Every phase becomes three execution points, `Before(P) -> At(P) -> After(P)`.
//! Sub-phases are nested between their parent's `Before` and `At` points,
//! consecutive siblings are chained `After(prev) -> Before(next)`, and links
//! add edges between execution points. Cross-unit pointers attach to
//! aggregate nodes that have no predecessors, so they never constrain the
//! order of real phases.

use super::{Link, LinkKind, Phase, Pointer};
use crate::errors::{BuildError, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Index into the node list.
pub type NodeIndex = usize;

/// Node key of the phase graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "point", content = "phase", rename_all = "snake_case")]
pub enum NodeKey {
    Before(String),
    At(String),
    After(String),
    /// The named phase across all child units.
    ChildAggregate(String),
    /// The named phase across all upstream units reached through a scope.
    UpstreamAggregate { scope: String, phase: String },
}

impl NodeKey {
    /// Aggregate nodes stand for other units and never appear in an order.
    pub fn is_aggregate(&self) -> bool {
        matches!(self, NodeKey::ChildAggregate(_) | NodeKey::UpstreamAggregate { .. })
    }

    pub fn phase(&self) -> &str {
        match self {
            NodeKey::Before(p)
            | NodeKey::At(p)
            | NodeKey::After(p)
            | NodeKey::ChildAggregate(p)
            | NodeKey::UpstreamAggregate { phase: p, .. } => p,
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKey::Before(p) => write!(f, "before:{}", p),
            NodeKey::At(p) => write!(f, "{}", p),
            NodeKey::After(p) => write!(f, "after:{}", p),
            NodeKey::ChildAggregate(p) => write!(f, "children:{}", p),
            NodeKey::UpstreamAggregate { scope, phase } => {
                write!(f, "dependencies[{}]:{}", scope, phase)
            }
        }
    }
}

/// A directed graph of execution points.
#[derive(Debug, Default)]
pub struct PhaseGraph {
    /// Nodes in insertion order
    nodes: Vec<NodeKey>,
    /// Map from node key to index
    index_map: HashMap<NodeKey, NodeIndex>,
    /// Forward edges: index -> nodes that must come after it
    forward_edges: Vec<Vec<NodeIndex>>,
    /// Reverse edges: index -> nodes that must come before it
    reverse_edges: Vec<Vec<NodeIndex>>,
}

impl PhaseGraph {
    /// Build the graph for a list of top-level phases.
    pub fn from_phases(phases: &[Phase]) -> Self {
        let mut graph = Self::default();
        graph.add_phases(None, phases);
        graph
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get_index(&self, key: &NodeKey) -> Option<NodeIndex> {
        self.index_map.get(key).copied()
    }

    pub fn node(&self, index: NodeIndex) -> Option<&NodeKey> {
        self.nodes.get(index)
    }

    /// Nodes that must come after the given node.
    pub fn successors(&self, index: NodeIndex) -> &[NodeIndex] {
        self.forward_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    /// Nodes that must come before the given node.
    pub fn predecessors(&self, index: NodeIndex) -> &[NodeIndex] {
        self.reverse_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    /// Get or create the node for `key`.
    fn add_node(&mut self, key: NodeKey) -> NodeIndex {
        if let Some(&index) = self.index_map.get(&key) {
            return index;
        }
        let index = self.nodes.len();
        self.nodes.push(key.clone());
        self.index_map.insert(key, index);
        self.forward_edges.push(Vec::new());
        self.reverse_edges.push(Vec::new());
        index
    }

    fn add_edge(&mut self, from: NodeIndex, to: NodeIndex) {
        if !self.forward_edges[from].contains(&to) {
            self.forward_edges[from].push(to);
            self.reverse_edges[to].push(from);
        }
    }

    /// Add sibling phases nested inside `parent`, chained in declaration order.
    fn add_phases(&mut self, parent: Option<(NodeIndex, NodeIndex)>, phases: &[Phase]) {
        let mut prev: Option<&str> = None;
        for phase in phases {
            self.add_phase(parent, phase);
            if let Some(prev) = prev {
                let from = self.add_node(NodeKey::After(prev.to_string()));
                let to = self.add_node(NodeKey::Before(phase.name.clone()));
                self.add_edge(from, to);
            }
            prev = Some(&phase.name);
        }
    }

    fn add_phase(&mut self, parent: Option<(NodeIndex, NodeIndex)>, phase: &Phase) {
        let before = self.add_node(NodeKey::Before(phase.name.clone()));
        let at = self.add_node(NodeKey::At(phase.name.clone()));
        let after = self.add_node(NodeKey::After(phase.name.clone()));
        self.add_edge(before, at);
        self.add_edge(at, after);

        if let Some((start, end)) = parent {
            self.add_edge(start, before);
            self.add_edge(after, end);
        }

        for link in &phase.links {
            self.add_link(before, after, link);
        }

        self.add_phases(Some((before, at)), &phase.phases);
    }

    fn add_link(&mut self, before: NodeIndex, after: NodeIndex, link: &Link) {
        let target = match (&link.pointer, link.kind) {
            (Pointer::Phase(name), LinkKind::After) => NodeKey::After(name.clone()),
            (Pointer::Phase(name), LinkKind::Before) => NodeKey::Before(name.clone()),
            (Pointer::Children(name), _) => NodeKey::ChildAggregate(name.clone()),
            (Pointer::Dependencies { scope, phase }, _) => NodeKey::UpstreamAggregate {
                scope: scope.clone(),
                phase: phase.clone(),
            },
        };
        let target = self.add_node(target);
        match link.kind {
            LinkKind::After => self.add_edge(target, before),
            LinkKind::Before => self.add_edge(after, target),
        }
    }

    /// Depth-first post-order over every node, reversed.
    ///
    /// Roots are visited in reverse insertion order so that nodes without
    /// any constraint keep their declaration order in the result.
    pub fn execution_order(&self) -> Result<Vec<NodeIndex>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            Active,
            Done,
        }

        let mut marks = vec![Mark::New; self.nodes.len()];
        let mut post_order = Vec::with_capacity(self.nodes.len());

        for root in (0..self.nodes.len()).rev() {
            if marks[root] != Mark::New {
                continue;
            }
            // Explicit stack of (node, next successor slot) to keep deep trees off the call stack.
            let mut stack: Vec<(NodeIndex, usize)> = vec![(root, 0)];
            marks[root] = Mark::Active;
            while let Some(top) = stack.last_mut() {
                let node = top.0;
                let successors = self.successors(node);
                if top.1 < successors.len() {
                    let next = successors[successors.len() - 1 - top.1];
                    top.1 += 1;
                    match marks[next] {
                        Mark::New => {
                            marks[next] = Mark::Active;
                            stack.push((next, 0));
                        }
                        Mark::Active => {
                            return Err(BuildError::configuration(format!(
                                "Cycle detected in lifecycle phases between '{}' and '{}'",
                                self.nodes[node], self.nodes[next]
                            )));
                        }
                        Mark::Done => {}
                    }
                } else {
                    marks[node] = Mark::Done;
                    post_order.push(node);
                    stack.pop();
                }
            }
        }

        post_order.reverse();
        Ok(post_order)
    }
}

/// Flattened order of one phase tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseOrder {
    /// Non-aggregate execution points in order
    points: Vec<NodeKey>,
    /// Position of every point in `points`
    positions: HashMap<NodeKey, usize>,
}

impl PhaseOrder {
    /// Phase names in execution order, execution points filtered out.
    pub fn phases(&self) -> Vec<&str> {
        self.points
            .iter()
            .filter_map(|key| match key {
                NodeKey::At(name) => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Every before/at/after point in order.
    pub fn points(&self) -> &[NodeKey] {
        &self.points
    }

    pub fn position(&self, key: &NodeKey) -> Option<usize> {
        self.positions.get(key).copied()
    }

    pub fn contains_phase(&self, name: &str) -> bool {
        self.positions.contains_key(&NodeKey::At(name.to_string()))
    }
}

/// Compute the execution order of a phase tree.
pub fn compute_order(phases: &[Phase]) -> Result<PhaseOrder> {
    let graph = PhaseGraph::from_phases(phases);
    let order = graph.execution_order()?;

    let points: Vec<NodeKey> = order
        .into_iter()
        .filter_map(|index| graph.node(index))
        .filter(|key| !key.is_aggregate())
        .cloned()
        .collect();
    let positions = points
        .iter()
        .enumerate()
        .map(|(i, key)| (key.clone(), i))
        .collect();

    Ok(PhaseOrder { points, positions })
}
