//! The reactor: build units, their graph and the coordinator that builds
//! them segment by segment.

pub mod coordinator;
pub mod graph;
pub mod scheduler;
pub mod state;
pub mod status;
pub mod unit;

pub use coordinator::BuildCoordinator;
pub use graph::{UnitGraph, UnitIndex};
pub use scheduler::{UnitScheduler, UnitStatus};
pub use state::{BuildSummary, ExecutionTimer, UnitOutcome, UnitResult};
pub use status::{ReactorStatus, SkipReason};
pub use unit::{BuildUnit, ExecutionDecl, PluginUse, UnitDependency, UnitState};

use crate::errors::{BuildError, Result};
use crate::plan::task::TaskSegment;
use std::sync::Arc;

/// The units of one build plus the unit the build was started from.
#[derive(Debug, Clone)]
pub struct Reactor {
    units: Arc<UnitGraph>,
    root: String,
}

impl Reactor {
    /// Reactor rooted at the first declared unit.
    pub fn new(units: UnitGraph) -> Result<Self> {
        let root = units
            .units()
            .first()
            .map(|u| u.id.clone())
            .ok_or_else(|| BuildError::configuration("The build contains no units"))?;
        Ok(Self {
            units: Arc::new(units),
            root,
        })
    }

    pub fn with_root(mut self, root: impl Into<String>) -> Result<Self> {
        let root = root.into();
        if self.units.get(&root).is_none() {
            return Err(BuildError::configuration(format!(
                "Unknown root unit '{}'",
                root
            )));
        }
        self.root = root;
        Ok(self)
    }

    pub fn units(&self) -> &Arc<UnitGraph> {
        &self.units
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Units taking part in `segment`, in build order. Aggregating segments
    /// run on the root unit only.
    pub fn units_for(&self, segment: &TaskSegment) -> Vec<&BuildUnit> {
        if segment.aggregating {
            self.units.get(&self.root).into_iter().collect()
        } else {
            self.units.sorted().collect()
        }
    }
}
