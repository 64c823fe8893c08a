use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reactor::config::{CliOverrides, FailurePolicy, LogFormat, ReactorConfig, parse_threads};
use reactor::manifest::MANIFEST_FILE;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cmd;

#[derive(Parser)]
#[command(name = "reactor")]
#[command(version, about = "Plan and run multi-unit builds through lifecycle phases")]
pub struct Cli {
    /// Build manifest (defaults to build.toml in the current directory)
    #[arg(short = 'f', long, global = true)]
    pub manifest: Option<PathBuf>,

    /// Configuration file (defaults to reactor.toml in the current directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Units built at once: a count such as "4", or a per-core multiple such as "1.5C"
    #[arg(short = 'T', long, global = true, value_parser = parse_threads)]
    pub threads: Option<usize>,

    /// Stop at the first failure
    #[arg(long, global = true, conflicts_with_all = ["fail_at_end", "fail_never"])]
    pub fail_fast: bool,

    /// Keep building units that do not depend on a failed one
    #[arg(long, global = true, conflicts_with = "fail_never")]
    pub fail_at_end: bool,

    /// Never fail the build, whatever the unit results
    #[arg(long, global = true)]
    pub fail_never: bool,

    /// Skip steps that need network access
    #[arg(short, long, global = true)]
    pub offline: bool,

    /// Raise log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log output format: text, json
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    fn failure_policy(&self) -> Option<FailurePolicy> {
        if self.fail_fast {
            Some(FailurePolicy::FailFast)
        } else if self.fail_at_end {
            Some(FailurePolicy::FailAtEnd)
        } else if self.fail_never {
            Some(FailurePolicy::FailNever)
        } else {
            None
        }
    }

    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            threads: self.threads,
            failure_policy: self.failure_policy(),
            offline: self.offline,
            log_format: self.log_format,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the phase order of one or every lifecycle
    Phases {
        /// Lifecycle id (clean, default, site, or one the manifest declares)
        #[arg(short, long)]
        lifecycle: Option<String>,

        /// Include the before/after execution points
        #[arg(long)]
        points: bool,
    },
    /// Print the execution plan of every unit for the given tasks
    Plan {
        /// Phases or goals (group:artifact[:version]:goal[@execution])
        tasks: Vec<String>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Build the given tasks
    Run {
        /// Phases or goals (group:artifact[:version]:goal[@execution])
        tasks: Vec<String>,

        /// Print the build summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and manifest and show any warnings
    Validate,
}

fn init_tracing(config: &ReactorConfig, verbose: u8) {
    let level = match verbose {
        0 => config.toml.logging.level.clone(),
        1 => "info".to_string(),
        2 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match config.toml.logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = std::env::current_dir().context("Failed to get current directory")?;

    let mut config = ReactorConfig::load(cli.config.as_deref(), &project_dir)?;
    config.apply_env()?;
    config.apply_cli(&cli.overrides());
    init_tracing(&config, cli.verbose);

    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    let manifest_path = cli
        .manifest
        .clone()
        .unwrap_or_else(|| project_dir.join(MANIFEST_FILE));

    match &cli.command {
        Commands::Phases { lifecycle, points } => {
            cmd::cmd_phases(&manifest_path, lifecycle.as_deref(), *points)?
        }
        Commands::Plan { tasks, json } => cmd::cmd_plan(&manifest_path, &config, tasks, *json)?,
        Commands::Run { tasks, json } => {
            let success = cmd::cmd_run(&manifest_path, &config, tasks, *json).await?;
            if !success {
                std::process::exit(1);
            }
        }
        Commands::Config { command } => cmd::cmd_config(&manifest_path, &config, command.clone())?,
    }

    Ok(())
}
