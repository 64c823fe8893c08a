//! Plan display (`reactor plan`).

use anyhow::Result;
use console::style;
use reactor::config::ReactorConfig;
use reactor::plan::execution::{ExecutionPlan, StepExecution};
use reactor::reactor::UnitScheduler;
use reactor::session::SessionSettings;
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Serialize)]
struct SegmentView {
    index: usize,
    tasks: String,
    aggregating: bool,
    /// Units grouped by the earliest wave they could build in
    waves: Vec<Vec<String>>,
    units: Vec<UnitView>,
}

#[derive(Debug, Serialize)]
struct UnitView {
    unit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    plan: Option<ExecutionPlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub fn cmd_plan(
    manifest_path: &Path,
    config: &ReactorConfig,
    tasks: &[String],
    json: bool,
) -> Result<()> {
    let manifest = super::load_manifest(manifest_path)?;
    let tasks = manifest.tasks(tasks)?;
    let session = manifest.session(SessionSettings::from(config))?;
    let segments = session.segments(&tasks)?;

    let mut failed = 0;
    let mut views = Vec::with_capacity(segments.len());
    for (index, segment) in segments.iter().enumerate() {
        let members = session.reactor().units_for(segment);
        let waves = UnitScheduler::new(session.units(), &members).compute_waves();

        let units = session
            .plans(segment)
            .into_iter()
            .map(|(unit, plan)| match plan {
                Ok(plan) => UnitView {
                    unit,
                    plan: Some(plan),
                    error: None,
                },
                Err(e) => {
                    failed += 1;
                    UnitView {
                        unit,
                        plan: None,
                        error: Some(e.to_string()),
                    }
                }
            })
            .collect();

        views.push(SegmentView {
            index,
            tasks: segment.to_string(),
            aggregating: segment.aggregating,
            waves,
            units,
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&views)?);
    } else {
        print_segments(&views);
    }

    if failed > 0 {
        anyhow::bail!("Could not calculate the plan of {} unit(s)", failed);
    }
    Ok(())
}

fn print_segments(views: &[SegmentView]) {
    for view in views {
        println!(
            "{} {}",
            style(format!("Segment {}:", view.index + 1)).bold(),
            view.tasks
        );
        let waves: Vec<String> = view
            .waves
            .iter()
            .map(|wave| format!("[{}]", wave.join(", ")))
            .collect();
        println!("  Waves: {}", waves.join(" -> "));

        for unit in &view.units {
            println!();
            println!("  {}", style(&unit.unit).cyan().bold());
            match (&unit.plan, &unit.error) {
                (Some(plan), _) if plan.is_empty() => println!("    (nothing to do)"),
                (Some(plan), _) => print_executions(&plan.executions, 4),
                (None, Some(error)) => println!("    {} {}", style("error:").red(), error),
                (None, None) => {}
            }
        }
        println!();
    }
}

fn print_executions(executions: &[StepExecution], indent: usize) {
    let pad = " ".repeat(indent);
    for (i, execution) in executions.iter().enumerate() {
        match execution.lifecycle_phase() {
            Some(phase) => println!("{}{:>2}. {} [{}]", pad, i + 1, execution, phase),
            None => println!("{}{:>2}. {} ({})", pad, i + 1, execution, execution.source()),
        }
        for forked in execution.forked_units() {
            println!("{}    {} {}", pad, style("fork ->").dim(), forked.unit);
            print_executions(&forked.executions, indent + 8);
        }
    }
}
