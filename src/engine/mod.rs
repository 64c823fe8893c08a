//! Execution engine.
//!
//! Runs the executions of one unit's plan: forks first, then locks, then
//! dependency resolution, then the step itself. Progress is reported as
//! [`ExecutionEvent`]s.

pub mod dependency;
pub mod events;
pub mod executor;
pub mod locks;

pub use dependency::{DependencyContext, DependencyResolver, GraphResolver, NoopResolver};
pub use events::{
    ChannelSink, CompositeSink, EventSink, ExecutionEvent, NullSink, RecordingSink, TracingSink,
};
pub use executor::{ExecutorConfig, StepContext, StepExecutor, StepRunner};
pub use locks::{Access, AggregatorLock, LaneId, LockTable, OwnerToken, ReentrantLock, StepLock};
