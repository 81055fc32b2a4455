pub mod project;
pub mod sources;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use project::{OutputFormat, ProjectOptions};
use sources::{
    ConfigOnly, HostPlans, HostResolver, InteractivePrompt, StampPolicy, SyncConfiguration,
    SyncEngine, SystemTransport, discover_config_file, format_report,
};

/// Scaffold data-analysis projects and keep their local data cache in sync.
#[derive(Parser, Debug)]
#[command(name = "rproj", version, about, long_about = None)]
pub struct Cli {
    /// Log debug detail, including transfer progress
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a new project with a default config and report template
    New(NewArgs),
    /// Refresh the local data cache from the configured input locations
    Sync(SyncArgs),
}

#[derive(Args, Debug)]
pub struct NewArgs {
    /// Name of the project directory
    #[arg(long)]
    pub project_name: String,

    /// Output format of the report template
    #[arg(long, value_enum)]
    pub output_format: OutputFormat,

    /// Working directory written into the config
    #[arg(long, default_value = "")]
    pub work_dir: String,

    /// Output directory written into the config
    #[arg(long, default_value = "")]
    pub output_dir: String,

    /// Input location written into the config (path or host:path)
    #[arg(long, default_value = "")]
    pub input_dir: String,

    /// Overwrite an existing config.yml and report
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Config file (defaults to ./config.yml)
    #[arg(long, env = "RPROJ_CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Fail instead of prompting for passwords missing from the config
    #[arg(long)]
    pub no_prompt: bool,

    /// Rewrite the last-update record after every location, even failed ones
    #[arg(long)]
    pub stamp_every_attempt: bool,

    /// Seconds to wait when connecting to a host or gateway
    #[arg(long, default_value_t = SystemTransport::DEFAULT_TIMEOUT_SECS)]
    pub connect_timeout: u64,

    /// Print the sync report as JSON
    #[arg(long)]
    pub json: bool,
}

/// How a successful invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    /// Sync finished but at least one location failed.
    PartialFailure,
}

impl RunStatus {
    pub fn exit_code(self) -> ExitCode {
        match self {
            Self::Success => ExitCode::SUCCESS,
            Self::PartialFailure => ExitCode::from(3),
        }
    }
}

/// Library entrypoint for the CLI.
pub fn run(cli: Cli) -> Result<RunStatus> {
    let cwd = std::env::current_dir().context("cannot determine current directory")?;
    match cli.command {
        Commands::New(args) => {
            let options = ProjectOptions {
                project_name: args.project_name,
                output_format: args.output_format,
                work_dir: args.work_dir,
                output_dir: args.output_dir,
                input_dir: args.input_dir,
                force: args.force,
            };
            project::create_project(&options, &cwd)?;
            Ok(RunStatus::Success)
        }
        Commands::Sync(args) => run_sync(&args, &cwd),
    }
}

fn resolve_hosts(config: &SyncConfiguration, no_prompt: bool) -> Result<HostPlans> {
    let plans = if no_prompt {
        HostResolver::new(ConfigOnly).resolve(config)?
    } else {
        HostResolver::new(InteractivePrompt::new()).resolve(config)?
    };
    Ok(plans)
}

fn run_sync(args: &SyncArgs, cwd: &Path) -> Result<RunStatus> {
    let path = discover_config_file(args.config_file.as_deref(), cwd)?;
    tracing::info!(config = %path.display(), "syncing project");

    let config = SyncConfiguration::load(&path)?;
    let plans = resolve_hosts(&config, args.no_prompt)?;
    project::prepare_directories(&config)?;

    let policy = if args.stamp_every_attempt {
        StampPolicy::EveryAttempt
    } else {
        StampPolicy::OnSuccess
    };
    let transport = SystemTransport::new().with_connection_timeout(args.connect_timeout);
    let report = SyncEngine::new(transport)
        .with_stamp_policy(policy)
        .run(&config, &plans)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", format_report(&report));
    }

    Ok(if report.all_succeeded() {
        RunStatus::Success
    } else {
        RunStatus::PartialFailure
    })
}
