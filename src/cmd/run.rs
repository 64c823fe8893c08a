//! Build execution (`reactor run`).

use anyhow::Result;
use async_trait::async_trait;
use console::style;
use reactor::config::ReactorConfig;
use reactor::engine::{GraphResolver, StepContext, StepRunner};
use reactor::reactor::{BuildCoordinator, BuildSummary, UnitOutcome, UnitState};
use reactor::session::SessionSettings;
use std::path::Path;
use std::sync::Arc;

/// Unit property naming goals (comma-separated) the simulated runner fails.
pub const FAIL_PROPERTY: &str = "simulate.fail";

/// Property the runner records the last completed step under.
pub const LAST_STEP_PROPERTY: &str = "last.step";

/// Stands in for real plugin goals: logs each step and records it on the
/// unit's state.
pub struct SimulatedRunner;

#[async_trait]
impl StepRunner for SimulatedRunner {
    async fn run(&self, context: &StepContext<'_>, state: &mut UnitState) -> anyhow::Result<()> {
        let goal = &context.execution.descriptor().goal;
        tracing::info!(
            unit = %context.unit.id,
            step = %context.execution,
            fork_depth = context.fork_depth,
            artifacts = context.artifacts.len(),
            "Executing step"
        );

        let fails = context
            .unit
            .properties
            .get(FAIL_PROPERTY)
            .is_some_and(|goals| goals.split(',').any(|g| g.trim() == goal));
        if fails {
            anyhow::bail!("Simulated failure of goal '{}'", goal);
        }

        state
            .properties
            .insert(LAST_STEP_PROPERTY.to_string(), context.execution.to_string());
        Ok(())
    }
}

/// Run the build and print its summary. Returns whether the build counts as
/// successful under the failure policy.
pub async fn cmd_run(
    manifest_path: &Path,
    config: &ReactorConfig,
    tasks: &[String],
    json: bool,
) -> Result<bool> {
    let manifest = super::load_manifest(manifest_path)?;
    let tasks = manifest.tasks(tasks)?;
    let session = Arc::new(manifest.session(SessionSettings::from(config))?);
    let resolver = Arc::new(GraphResolver::new(Arc::clone(session.units())));

    let coordinator =
        BuildCoordinator::new(session, Arc::new(SimulatedRunner)).with_resolver(resolver);
    let summary = coordinator.run(&tasks).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    Ok(summary.is_success())
}

fn print_summary(summary: &BuildSummary) {
    println!();
    println!(
        "{}",
        style(format!("Reactor Summary ({}):", summary.failure_policy)).bold()
    );
    println!();

    let multi_segment = summary.results.iter().any(|r| r.segment > 0);
    for result in &summary.results {
        let name = if multi_segment {
            format!("{} #{}", result.unit, result.segment + 1)
        } else {
            result.unit.clone()
        };
        let outcome = match result.outcome {
            UnitOutcome::Success => style(result.outcome.to_string()).green(),
            UnitOutcome::Failed => style(result.outcome.to_string()).red(),
            UnitOutcome::Skipped => style(result.outcome.to_string()).yellow(),
        };
        println!(
            "  {:.<40} {} [{:.2}s]",
            format!("{} ", name),
            outcome,
            result.duration.as_secs_f64()
        );
        if let Some(error) = &result.error {
            println!("      {}", style(error).dim());
        }
    }

    println!();
    if summary.is_success() {
        println!("{}", style("BUILD SUCCESS").green().bold());
    } else {
        println!("{}", style("BUILD FAILURE").red().bold());
    }
    println!(
        "  {} succeeded, {} failed, {} skipped in {:.2}s",
        summary.succeeded,
        summary.failed,
        summary.skipped,
        summary.duration.as_secs_f64()
    );
}
