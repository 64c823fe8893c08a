//! Build-step scheduling core.
//!
//! Orders lifecycle phases, turns a task list into per-unit execution plans,
//! expands forks, and runs the plans across a reactor of build units with a
//! configurable degree of concurrency and failure policy.
//!
//! | Module      | Concern                                               |
//! |-------------|-------------------------------------------------------|
//! | `lifecycle` | Phase trees, links, the phase graph and its order     |
//! | `plan`      | Tasks, segments, bindings, plans and fork resolution  |
//! | `engine`    | Step execution, locks, dependency resolution, events  |
//! | `reactor`   | Build units, their graph and the build coordinator    |
//! | `session`   | State shared by one build                             |
//! | `config`    | `reactor.toml` and its env/CLI layers                 |
//! | `manifest`  | The TOML build manifest the binary reads              |

pub mod config;
pub mod engine;
pub mod errors;
pub mod lifecycle;
pub mod manifest;
pub mod plan;
pub mod reactor;
pub mod session;

pub use errors::{BuildError, ErrorKind, Result};
