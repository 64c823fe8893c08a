//! Configuration view and validation commands (`reactor config`).

use anyhow::Result;
use reactor::config::{CONFIG_FILE, ReactorConfig};
use std::path::Path;

use super::super::ConfigCommands;

pub fn cmd_config(
    manifest_path: &Path,
    config: &ReactorConfig,
    command: Option<ConfigCommands>,
) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Reactor Configuration");
            println!("=====================");
            println!();

            match &config.source {
                Some(path) => println!("Config file: {}", path.display()),
                None => println!("No {} found, using defaults", CONFIG_FILE),
            }
            println!();
            println!("Effective values (with env/CLI overrides):");
            println!();
            print!("{}", toml::to_string_pretty(&config.toml)?);
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let mut warnings = config.validate();
            if manifest_path.exists() {
                let manifest = reactor::manifest::Manifest::load(manifest_path)?;
                manifest.registry()?;
                manifest.reactor()?;
                warnings.extend(manifest.validate());
            } else {
                println!("No build manifest at {}", manifest_path.display());
            }

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
    }

    Ok(())
}
