use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use gantry::config::{CliOverrides, GatewayConfig, LogFormat};

mod cmd;

#[derive(Parser)]
#[command(name = "gantry")]
#[command(version, about = "Run agent CLI jobs and publish per-branch live previews")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Working directory the agent operates in (default: current directory)
    #[arg(long, global = true)]
    pub workdir: Option<PathBuf>,

    /// Config file (default: <workdir>/.gantry/gateway.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log output format on stderr
    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the gateway: job API, preview server and branch watcher
    Serve {
        /// Port to serve on (overrides server.port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind (overrides server.host)
        #[arg(long)]
        host: Option<String>,

        /// Open the preview in a browser once the server is up
        #[arg(long)]
        open: bool,
    },
    /// Publish the working directory into the preview root and exit
    Publish {
        /// Publish every local branch instead of the checked-out one
        #[arg(long)]
        all: bool,
    },
    /// Check agent CLI arguments against the configured policy
    CheckArgs {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        tokens: Vec<String>,
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
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default gateway.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let workdir = match cli.workdir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let mut config = GatewayConfig::load(&workdir, cli.config.as_deref())?;
    let (host, port) = match &cli.command {
        Commands::Serve { host, port, .. } => (host.clone(), *port),
        _ => (None, None),
    };
    config.apply_cli(&CliOverrides {
        host,
        port,
        log_format: cli.log_format,
    });

    let _log_guard = gantry::logging::init(
        config.toml.logging.format,
        cli.verbose,
        config.log_dir().as_deref(),
    )?;

    match cli.command {
        Commands::Serve { open, .. } => cmd::cmd_serve(config, open).await?,
        Commands::Publish { all } => cmd::cmd_publish(&config, all).await?,
        Commands::CheckArgs { tokens } => cmd::cmd_check_args(&config, &tokens)?,
        Commands::Config { command } => cmd::cmd_config(&config, command)?,
    }

    Ok(())
}
