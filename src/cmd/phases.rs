//! Phase order listing (`reactor phases`).

use anyhow::Result;
use console::style;
use reactor::manifest::Manifest;
use std::path::Path;

/// Print the computed phase order. Works without a manifest, in which case
/// only the standard lifecycles are known.
pub fn cmd_phases(manifest_path: &Path, lifecycle: Option<&str>, points: bool) -> Result<()> {
    let manifest = if manifest_path.exists() {
        super::load_manifest(manifest_path)?
    } else {
        Manifest::default()
    };
    let registry = manifest.registry()?;

    let ids: Vec<String> = match lifecycle {
        Some(id) => vec![id.to_string()],
        None => registry.ids().into_iter().map(String::from).collect(),
    };

    for id in &ids {
        let order = registry.order(id)?;
        println!("{}", style(format!("[{}]", id)).bold());
        if points {
            for (i, key) in order.points().iter().enumerate() {
                println!("  {:>3}. {}", i + 1, key);
            }
        } else {
            for (i, phase) in order.phases().iter().enumerate() {
                println!("  {:>3}. {}", i + 1, phase);
            }
        }
        println!();
    }

    Ok(())
}
