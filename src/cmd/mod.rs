//! CLI command implementations.
//!
//! | Module   | Commands handled |
//! |----------|------------------|
//! | `phases` | `Phases`         |
//! | `plan`   | `Plan`           |
//! | `run`    | `Run`            |
//! | `config` | `Config`         |

pub mod config;
pub mod phases;
pub mod plan;
pub mod run;

pub use config::cmd_config;
pub use phases::cmd_phases;
pub use plan::cmd_plan;
pub use run::cmd_run;

use anyhow::Result;
use reactor::manifest::Manifest;
use std::path::Path;

/// Load the build manifest and log its warnings.
fn load_manifest(path: &Path) -> Result<Manifest> {
    let manifest = Manifest::load(path)?;
    for warning in manifest.validate() {
        tracing::warn!("{}", warning);
    }
    Ok(manifest)
}
