//! Build configuration.
//!
//! Settings come from an optional `reactor.toml`, then environment
//! variables, then command-line flags, each layer overriding the previous.
//!
//! # Configuration File Format
//!
//! ```toml
//! [build]
//! degree_of_concurrency = 4
//! failure_policy = "fail-at-end"
//! offline = false
//! project_present = true
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```
//!
//! Environment overrides: `REACTOR_THREADS`, `REACTOR_FAILURE_POLICY`,
//! `REACTOR_OFFLINE`.

use crate::engine::executor::ExecutorConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default file name looked up in the working directory.
pub const CONFIG_FILE: &str = "reactor.toml";

pub const ENV_THREADS: &str = "REACTOR_THREADS";
pub const ENV_FAILURE_POLICY: &str = "REACTOR_FAILURE_POLICY";
pub const ENV_OFFLINE: &str = "REACTOR_OFFLINE";

/// What the coordinator does when a unit fails.
///
/// | Policy        | Behavior                                                |
/// |---------------|---------------------------------------------------------|
/// | `FailFast`    | Stop starting units; running units finish               |
/// | `FailAtEnd`   | Skip the failed unit and its downstream, build the rest |
/// | `FailNever`   | Record the failure, build everything, report success    |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    #[default]
    FailFast,
    FailAtEnd,
    FailNever,
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailurePolicy::FailFast => write!(f, "fail-fast"),
            FailurePolicy::FailAtEnd => write!(f, "fail-at-end"),
            FailurePolicy::FailNever => write!(f, "fail-never"),
        }
    }
}

impl std::str::FromStr for FailurePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fail-fast" => Ok(FailurePolicy::FailFast),
            "fail-at-end" => Ok(FailurePolicy::FailAtEnd),
            "fail-never" => Ok(FailurePolicy::FailNever),
            _ => anyhow::bail!(
                "Invalid failure policy '{}'. Valid values: fail-fast, fail-at-end, fail-never",
                s
            ),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Invalid log format '{}'. Valid values: text, json", s),
        }
    }
}

/// Parse a thread count: a plain number, or a multiple of the available
/// cores written with a `C` suffix (`"1.5C"`).
pub fn parse_threads(spec: &str) -> Result<usize> {
    let spec = spec.trim();
    let threads = match spec.strip_suffix(['C', 'c']) {
        Some(factor) => {
            let factor: f64 = factor
                .parse()
                .with_context(|| format!("Invalid thread count '{}'", spec))?;
            let cores = std::thread::available_parallelism().map_or(1, |n| n.get());
            (factor * cores as f64).floor() as usize
        }
        None => spec
            .parse()
            .with_context(|| format!("Invalid thread count '{}'", spec))?,
    };
    if threads == 0 {
        anyhow::bail!("Invalid thread count '{}': must be at least 1", spec);
    }
    Ok(threads)
}

/// `[build]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSection {
    /// Units built at the same time
    #[serde(default = "default_degree_of_concurrency")]
    pub degree_of_concurrency: usize,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Skip steps that need the network
    #[serde(default)]
    pub offline: bool,
    /// Whether the build runs against a project at all
    #[serde(default = "default_project_present")]
    pub project_present: bool,
}

fn default_degree_of_concurrency() -> usize {
    1
}

fn default_project_present() -> bool {
    true
}

impl Default for BuildSection {
    fn default() -> Self {
        Self {
            degree_of_concurrency: default_degree_of_concurrency(),
            failure_policy: FailurePolicy::default(),
            offline: false,
            project_present: default_project_present(),
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Filter directive, e.g. `"info"` or `"reactor::engine=debug"`
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// The complete `reactor.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReactorToml {
    #[serde(default)]
    pub build: BuildSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl ReactorToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse reactor.toml")
    }

    /// Load `reactor.toml` from `dir`, or defaults if there is none.
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.build.degree_of_concurrency == 0 {
            warnings.push(
                "degree_of_concurrency is 0; building one unit at a time instead".to_string(),
            );
        }

        if tracing_subscriber::EnvFilter::try_new(&self.logging.level).is_err() {
            warnings.push(format!(
                "Invalid logging level '{}': should be a filter directive such as 'info' or 'reactor=debug'",
                self.logging.level
            ));
        }

        warnings
    }
}

/// Flag values from the command line; `None`/`false` leaves the lower
/// layers alone.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub threads: Option<usize>,
    pub failure_policy: Option<FailurePolicy>,
    pub offline: bool,
    pub log_format: Option<LogFormat>,
}

/// Layered configuration: file, then environment, then CLI.
#[derive(Debug, Clone, Default)]
pub struct ReactorConfig {
    pub toml: ReactorToml,
    /// File the settings were loaded from, if any
    pub source: Option<PathBuf>,
}

impl ReactorConfig {
    /// Load `path`, or `reactor.toml` in `dir` when no path is given.
    pub fn load(path: Option<&Path>, dir: &Path) -> Result<Self> {
        match path {
            Some(path) => Ok(Self {
                toml: ReactorToml::load(path)?,
                source: Some(path.to_path_buf()),
            }),
            None => {
                let default_path = dir.join(CONFIG_FILE);
                Ok(Self {
                    source: default_path.exists().then_some(default_path),
                    toml: ReactorToml::load_or_default(dir)?,
                })
            }
        }
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides read through `lookup`.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(threads) = lookup(ENV_THREADS) {
            self.toml.build.degree_of_concurrency =
                parse_threads(&threads).with_context(|| format!("Invalid {}", ENV_THREADS))?;
        }
        if let Some(policy) = lookup(ENV_FAILURE_POLICY) {
            self.toml.build.failure_policy = policy
                .parse()
                .with_context(|| format!("Invalid {}", ENV_FAILURE_POLICY))?;
        }
        if let Some(offline) = lookup(ENV_OFFLINE) {
            self.toml.build.offline = !matches!(offline.to_lowercase().as_str(), "" | "0" | "false");
        }
        Ok(())
    }

    pub fn apply_cli(&mut self, overrides: &CliOverrides) {
        if let Some(threads) = overrides.threads {
            self.toml.build.degree_of_concurrency = threads;
        }
        if let Some(policy) = overrides.failure_policy {
            self.toml.build.failure_policy = policy;
        }
        if overrides.offline {
            self.toml.build.offline = true;
        }
        if let Some(format) = overrides.log_format {
            self.toml.logging.format = format;
        }
    }

    /// Degree of concurrency, never below 1.
    pub fn degree_of_concurrency(&self) -> usize {
        self.toml.build.degree_of_concurrency.max(1)
    }

    /// Whether units build concurrently (and therefore lock).
    pub fn is_concurrent(&self) -> bool {
        self.degree_of_concurrency() > 1
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.toml.build.failure_policy
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            offline: self.toml.build.offline,
            project_present: self.toml.build.project_present,
        }
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}
