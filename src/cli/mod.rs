pub mod commands;

use clap::{Parser, Subcommand};

use crate::config::AppConfig;
use crate::error::Result;

#[derive(Parser)]
#[command(name = "skiff")]
#[command(version)]
#[command(about = "Dispatch compute jobs to remote machines")]
#[command(long_about = "Dispatch long-running compute jobs to a remote machine over a remote shell,\nand watch their progress through sentinel files on a mounted directory.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize skiff configuration
    Init,

    /// Check the dispatch target (mount, ping, round-trip)
    Status {
        /// Show configuration details alongside the checks
        #[arg(short, long)]
        detailed: bool,

        /// Emit the status breakdown as JSON
        #[arg(long)]
        json: bool,
    },

    /// Dispatch a job script that already sits in the server directory
    Run {
        /// Script name, relative to the server directory
        script: String,

        /// Block until the job completes or fails
        #[arg(short, long)]
        wait: bool,
    },

    /// Show the sentinel status of a dispatched job
    Poll {
        /// Script name, relative to the server directory
        script: String,
    },

    /// Show a job's captured output
    Logs {
        /// Script name, relative to the server directory
        script: String,

        /// Number of lines to show (default: 100)
        #[arg(short = 'n', long, default_value = "100")]
        lines: usize,

        /// Follow mode: keep watching for new output (like tail -f)
        #[arg(short, long)]
        follow: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Set a configuration value
    Set {
        /// Parameter name (prefix MPI options with "mpi.")
        key: String,
        /// Parameter value
        value: String,
    },

    /// Open configuration file in editor
    Edit,
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Init => commands::init::execute().await,
            Commands::Status { detailed, json } => {
                let config = AppConfig::load()?;
                commands::status::execute(config, detailed, json).await
            }
            Commands::Run { script, wait } => {
                let config = AppConfig::load()?;
                commands::run::execute(config, &script, wait).await
            }
            Commands::Poll { script } => {
                let config = AppConfig::load()?;
                commands::poll::execute(config, &script).await
            }
            Commands::Logs {
                script,
                lines,
                follow,
            } => {
                let config = AppConfig::load()?;
                commands::logs::execute(config, &script, lines, follow).await
            }
            Commands::Config { command } => match command {
                ConfigCommands::Show => commands::config::show().await,
                ConfigCommands::Set { key, value } => commands::config::set(key, value).await,
                ConfigCommands::Edit => commands::config::edit().await,
            },
        }
    }
}
