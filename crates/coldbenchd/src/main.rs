//! coldbenchd — the coldbench daemon and CLI.
//!
//! One binary for both halves of the system:
//! - `agent`: serve one service type's Agent API, with an embedded trigger
//!   dispatcher, and publish its descriptor into the registry
//! - `dispatch`: standalone trigger dispatcher over a shared store
//! - `run`, `collect`, `cleanup`, `report`, `baseline`: Manager operations
//! - `registry put`, `discover`: registry maintenance and inspection
//!
//! # Usage
//!
//! ```text
//! coldbenchd agent --config agent.toml
//! coldbenchd run --config manager.toml --agent-config discord-webhook=run.json
//! coldbenchd collect --config manager.toml <run_id>
//! coldbenchd report --config manager.toml --latest
//! ```

mod agent_mode;
mod manager_cmd;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,coldbenchd=debug,coldbench=debug";

#[derive(Parser)]
#[command(name = "coldbenchd", about = "Cold-start benchmarks for scale-to-zero platforms")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Serve an Agent for one service type.
    Agent {
        /// Agent configuration file.
        #[arg(long, default_value = "agent.toml")]
        config: PathBuf,

        /// Override the configured listen port.
        #[arg(long)]
        port: Option<u16>,
    },

    /// Fire due triggers for every Agent sharing the store.
    Dispatch {
        #[arg(long, default_value = "manager.toml")]
        config: PathBuf,

        /// Poll interval in seconds.
        #[arg(long, default_value = "15")]
        interval: u64,

        /// Run one pass and exit.
        #[arg(long)]
        once: bool,
    },

    /// Start a run: Deploy on every discovered Agent.
    Run {
        #[arg(long, default_value = "manager.toml")]
        config: PathBuf,

        /// Run configuration for one Agent, as `service_type=path.json`.
        #[arg(long = "agent-config", value_name = "SERVICE=FILE")]
        agent_configs: Vec<String>,

        /// Only invoke these service types.
        #[arg(long)]
        only: Vec<String>,

        /// Override the configured cold-start iteration count.
        #[arg(long)]
        iterations: Option<u32>,

        /// Override the configured warm request count.
        #[arg(long)]
        warm_requests: Option<u32>,

        /// Override the scale-to-zero wait, in seconds.
        #[arg(long)]
        scale_to_zero_secs: Option<u64>,
    },

    /// Wait for a run's Agents to finish and write the run document.
    Collect {
        #[arg(long, default_value = "manager.toml")]
        config: PathBuf,

        run_id: String,

        /// Also publish the report.
        #[arg(long)]
        report: bool,
    },

    /// Cancel a run on every Agent that accepted it.
    Cleanup {
        #[arg(long, default_value = "manager.toml")]
        config: PathBuf,

        run_id: String,
    },

    /// Render the report of a collected run.
    Report {
        #[arg(long, default_value = "manager.toml")]
        config: PathBuf,

        #[arg(required_unless_present = "latest")]
        run_id: Option<String>,

        /// Use the most recent run in the index.
        #[arg(long, conflicts_with = "run_id")]
        latest: bool,

        /// Print the JSON report instead of Markdown.
        #[arg(long)]
        json: bool,
    },

    /// Baseline management.
    Baseline {
        #[arg(long, default_value = "manager.toml")]
        config: PathBuf,

        #[command(subcommand)]
        action: BaselineAction,
    },

    /// Registry maintenance.
    Registry {
        #[arg(long, default_value = "manager.toml")]
        config: PathBuf,

        #[command(subcommand)]
        action: RegistryAction,
    },

    /// Print the current Agent catalog.
    Discover {
        #[arg(long, default_value = "manager.toml")]
        config: PathBuf,
    },
}

#[derive(Subcommand)]
enum BaselineAction {
    /// Pin a collected run as the regression baseline.
    Promote { run_id: String },
    /// Print the current baseline's run id and promotion time.
    Show,
}

#[derive(Subcommand)]
enum RegistryAction {
    /// Validate and publish an Agent descriptor (JSON).
    Put { descriptor: PathBuf },
    /// Remove a service type from the registry.
    Remove { service_type: String },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Agent { config, port } => agent_mode::run_agent(&config, port).await,
        Command::Dispatch {
            config,
            interval,
            once,
        } => agent_mode::run_dispatch(&config, interval, once).await,
        Command::Run {
            config,
            agent_configs,
            only,
            iterations,
            warm_requests,
            scale_to_zero_secs,
        } => {
            let overrides = manager_cmd::Overrides {
                iterations,
                warm_requests,
                scale_to_zero_secs,
            };
            manager_cmd::run(&config, &agent_configs, only, overrides).await
        }
        Command::Collect {
            config,
            run_id,
            report,
        } => manager_cmd::collect(&config, &run_id, report).await,
        Command::Cleanup { config, run_id } => manager_cmd::cleanup(&config, &run_id).await,
        Command::Report {
            config,
            run_id,
            latest,
            json,
        } => manager_cmd::report(&config, run_id, latest, json),
        Command::Baseline { config, action } => match action {
            BaselineAction::Promote { run_id } => manager_cmd::promote(&config, &run_id),
            BaselineAction::Show => manager_cmd::show_baseline(&config),
        },
        Command::Registry { config, action } => match action {
            RegistryAction::Put { descriptor } => manager_cmd::registry_put(&config, &descriptor),
            RegistryAction::Remove { service_type } => {
                manager_cmd::registry_remove(&config, &service_type)
            }
        },
        Command::Discover { config } => manager_cmd::discover(&config).await,
    }
}
