//! Execution planning.
//!
//! Given a unit and a task list, the [`PlanCalculator`] produces an ordered
//! [`ExecutionPlan`] of configured [`StepExecution`]s. Step metadata comes from
//! a [`DescriptorResolver`]; forks are expanded by the [`ForkResolver`].
//!
//! ## Example
//!
//! ```
//! use reactor::lifecycle::LifecycleRegistry;
//! use reactor::plan::{DescriptorCatalog, PackagingRegistry, PlanCalculator, Task};
//! use reactor::reactor::{BuildUnit, UnitGraph};
//! use std::sync::Arc;
//!
//! let calculator = PlanCalculator::new(
//!     Arc::new(LifecycleRegistry::standard().unwrap()),
//!     Arc::new(DescriptorCatalog::standard()),
//!     PackagingRegistry::standard(),
//! );
//! let units = UnitGraph::build(vec![BuildUnit::new("app")]).unwrap();
//! let unit = units.get("app").unwrap();
//!
//! let plan = calculator
//!     .calculate_plan(unit, &[Task::parse("compile").unwrap()], &units)
//!     .unwrap();
//! let goals: Vec<&str> = plan.iter().map(|e| e.descriptor().goal.as_str()).collect();
//! assert_eq!(goals, ["resources", "compile"]);
//! ```

pub mod binding;
pub mod calculator;
pub mod catalog;
pub mod configuration;
pub mod descriptor;
pub mod execution;
pub mod fork;
pub mod scope;
pub mod task;

pub use binding::{GoalSpec, PackagingRegistry, StepBinding};
pub use calculator::{LifecycleMappings, PlanCalculator};
pub use catalog::DescriptorCatalog;
pub use configuration::ConfigNode;
pub use descriptor::{
    Coordinate, DescriptorResolver, ForkSpec, PluginDescriptor, StepDescriptor, StepKey,
};
pub use execution::{
    ExecutionPlan, ExecutionSource, ForkState, ForkedUnit, StepExecution, StepExecutionBuilder,
};
pub use fork::{ForkResolver, GuardSet};
pub use scope::{ResolutionScope, Scope};
pub use task::{Task, TaskSegment, compute_segments};
