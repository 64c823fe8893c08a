//! Tasks and task segments.
//!
//! A task is either a phase to run or an explicit goal. Consecutive tasks
//! with the same aggregating flag form one [`TaskSegment`].

use super::binding::GoalSpec;
use super::descriptor::DescriptorResolver;
use crate::errors::{BuildError, Result};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Task {
    Phase(String),
    Goal(GoalSpec),
}

impl Task {
    /// Anything containing a colon is a goal; everything else is a phase.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(BuildError::configuration("Empty task"));
        }
        if raw.contains(':') {
            Ok(Task::Goal(GoalSpec::parse(raw)?))
        } else {
            Ok(Task::Phase(raw.to_string()))
        }
    }

    pub fn is_goal(&self) -> bool {
        matches!(self, Task::Goal(_))
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Phase(phase) => f.write_str(phase),
            Task::Goal(goal) => write!(f, "{}", goal),
        }
    }
}

/// Tasks sharing one aggregating flag.
///
/// An aggregating segment runs once for the whole build instead of once per
/// unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskSegment {
    pub tasks: Vec<Task>,
    pub aggregating: bool,
}

impl TaskSegment {
    pub fn new(aggregating: bool) -> Self {
        Self {
            tasks: Vec::new(),
            aggregating,
        }
    }
}

impl fmt::Display for TaskSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tasks: Vec<String> = self.tasks.iter().map(ToString::to_string).collect();
        write!(f, "{}", tasks.join(" "))?;
        if self.aggregating {
            write!(f, " (aggregating)")?;
        }
        Ok(())
    }
}

/// Split raw task strings into segments, preserving their order.
///
/// A goal is aggregating when its descriptor is an aggregator or does not
/// need a project. Phases are never aggregating.
pub fn compute_segments(
    tasks: &[String],
    resolver: &dyn DescriptorResolver,
) -> Result<Vec<TaskSegment>> {
    if tasks.is_empty() {
        return Err(BuildError::configuration(
            "No goals have been specified for this build. You must specify a valid lifecycle phase or a goal",
        ));
    }

    let mut segments: Vec<TaskSegment> = Vec::new();
    for raw in tasks {
        let task = Task::parse(raw)?;
        let aggregating = match &task {
            Task::Phase(_) => false,
            Task::Goal(spec) => {
                let plugin = spec.coordinate(resolver)?;
                let descriptor = resolver.resolve(&plugin, &spec.goal)?;
                descriptor.aggregator || !descriptor.project_required
            }
        };

        match segments.last_mut() {
            Some(segment) if segment.aggregating == aggregating => segment.tasks.push(task),
            _ => {
                let mut segment = TaskSegment::new(aggregating);
                segment.tasks.push(task);
                segments.push(segment);
            }
        }
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::catalog::DescriptorCatalog;
    use crate::plan::descriptor::{Coordinate, PluginDescriptor, StepDescriptor};

    fn catalog() -> DescriptorCatalog {
        let mut catalog = DescriptorCatalog::standard();
        let mut report = StepDescriptor::new(Coordinate::default(), "report");
        report.aggregator = true;
        catalog.register(
            PluginDescriptor::new(Coordinate::new("org.acme", "acme-plugin"))
                .with_prefix("acme")
                .with_goal(report)
                .with_goal(StepDescriptor::new(Coordinate::default(), "check")),
        );
        catalog
    }

    fn tasks(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_task_parse() {
        assert_eq!(Task::parse("install").unwrap(), Task::Phase("install".into()));
        assert!(Task::parse("compiler:compile").unwrap().is_goal());
        assert!(Task::parse("  ").is_err());
    }

    #[test]
    fn test_phases_share_one_segment() {
        let segments = compute_segments(&tasks(&["install", "clean"]), &catalog()).unwrap();
        assert_eq!(segments.len(), 1);
        assert!(!segments[0].aggregating);
        assert_eq!(
            segments[0].tasks,
            [Task::Phase("install".into()), Task::Phase("clean".into())]
        );
    }

    #[test]
    fn test_segment_changes_with_aggregating_flag() {
        let segments = compute_segments(
            &tasks(&["clean", "acme:check", "acme:report", "help:help", "install"]),
            &catalog(),
        )
        .unwrap();

        let shape: Vec<(usize, bool)> = segments
            .iter()
            .map(|s| (s.tasks.len(), s.aggregating))
            .collect();
        assert_eq!(shape, [(2, false), (2, true), (1, false)]);
    }

    #[test]
    fn test_unknown_goal_fails_segmentation() {
        let err = compute_segments(&tasks(&["acme:missing"]), &catalog()).unwrap_err();
        assert!(err.message.contains("Could not find goal 'missing'"));
    }

    #[test]
    fn test_no_tasks() {
        assert!(compute_segments(&[], &catalog()).is_err());
    }

    #[test]
    fn test_segment_display() {
        let segments = compute_segments(&tasks(&["acme:report"]), &catalog()).unwrap();
        assert_eq!(segments[0].to_string(), "acme:report (aggregating)");
    }
}
