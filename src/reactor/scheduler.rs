//! Unit scheduler for one task segment.
//!
//! Tracks the status of every unit taking part in a segment and hands out
//! the units whose upstream units have all finished.

use super::graph::UnitGraph;
use super::unit::BuildUnit;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Status of a unit within a segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    /// Unit is waiting to run
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed { error: String },
    /// Unit was not attempted
    Skipped { reason: String },
}

impl UnitStatus {
    /// Check if the unit is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed { .. } | Self::Skipped { .. })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

/// A unit of the segment with its current status.
#[derive(Debug, Clone)]
pub struct UnitNode {
    pub id: String,
    pub status: UnitStatus,
    /// Direct upstream units that also take part in the segment
    pub upstream: Vec<String>,
}

#[derive(Debug, Default)]
pub struct UnitScheduler {
    /// Nodes in build order
    nodes: Vec<UnitNode>,
    index_map: HashMap<String, usize>,
}

impl UnitScheduler {
    /// Schedule `members`, given in build order, of `units`.
    pub fn new(units: &UnitGraph, members: &[&BuildUnit]) -> Self {
        let ids: HashSet<&str> = members.iter().map(|u| u.id.as_str()).collect();
        let nodes: Vec<UnitNode> = members
            .iter()
            .map(|unit| UnitNode {
                id: unit.id.clone(),
                status: UnitStatus::Pending,
                upstream: units
                    .upstream(&unit.id)
                    .into_iter()
                    .filter(|u| ids.contains(u))
                    .map(str::to_string)
                    .collect(),
            })
            .collect();
        let index_map = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();
        Self { nodes, index_map }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[UnitNode] {
        &self.nodes
    }

    pub fn get(&self, id: &str) -> Option<&UnitNode> {
        self.index_map.get(id).and_then(|&i| self.nodes.get(i))
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut UnitNode> {
        let index = *self.index_map.get(id)?;
        self.nodes.get_mut(index)
    }

    fn upstream_finished(&self, node: &UnitNode, finished: impl Fn(&UnitNode) -> bool) -> bool {
        node.upstream
            .iter()
            .all(|u| self.get(u).is_none_or(&finished))
    }

    /// Groups of units that could build side by side, assuming every unit
    /// of a group finishes before the next group starts.
    pub fn compute_waves(&self) -> Vec<Vec<String>> {
        let mut waves = Vec::new();
        let mut done: HashSet<&str> = HashSet::new();

        loop {
            let ready: Vec<&str> = self
                .nodes
                .iter()
                .filter(|n| !done.contains(n.id.as_str()))
                .filter(|n| n.upstream.iter().all(|u| done.contains(u.as_str())))
                .map(|n| n.id.as_str())
                .collect();
            if ready.is_empty() {
                break;
            }
            done.extend(ready.iter().copied());
            waves.push(ready.into_iter().map(str::to_string).collect());
        }
        waves
    }

    /// Pending units whose upstream units are all terminal, in build order.
    pub fn ready_units(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| n.status == UnitStatus::Pending)
            .filter(|n| self.upstream_finished(n, |u| u.status.is_terminal()))
            .map(|n| n.id.clone())
            .collect()
    }

    pub fn mark_running(&mut self, id: &str) {
        if let Some(node) = self.get_mut(id) {
            node.status = UnitStatus::Running;
        }
    }

    pub fn mark_succeeded(&mut self, id: &str) {
        if let Some(node) = self.get_mut(id) {
            node.status = UnitStatus::Succeeded;
        }
    }

    pub fn mark_failed(&mut self, id: &str, error: &str) {
        if let Some(node) = self.get_mut(id) {
            node.status = UnitStatus::Failed {
                error: error.to_string(),
            };
        }
    }

    pub fn mark_skipped(&mut self, id: &str, reason: &str) {
        if let Some(node) = self.get_mut(id) {
            node.status = UnitStatus::Skipped {
                reason: reason.to_string(),
            };
        }
    }

    /// Whether every unit reached a terminal state.
    pub fn all_complete(&self) -> bool {
        self.nodes.iter().all(|n| n.status.is_terminal())
    }

    pub fn running_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.status.is_running()).count()
    }
}
