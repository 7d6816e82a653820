use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use mender::logging::{self, LogFormat};

mod cmd;

#[derive(Parser)]
#[command(name = "mender")]
#[command(version, about = "Scan, fix and validate source code with a bounded agent pipeline")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Diagnostic log format on stderr: compact or json
    #[arg(long, default_value = "compact", global = true)]
    pub log_format: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP API
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
        /// Allow cross-origin requests from a local front-end
        #[arg(long)]
        dev: bool,
    },
    /// Debug a single source file and print the result
    Run {
        file: PathBuf,
        /// python, javascript, java, cpp or go (default: python)
        #[arg(short, long)]
        language: Option<String>,
        /// What the code is supposed to do
        #[arg(short, long)]
        context: Option<String>,
        #[arg(short, long)]
        max_iterations: Option<u32>,
        /// Print only the final result as JSON
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
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default mender.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let log_format: LogFormat = cli.log_format.parse()?;
    logging::init(cli.verbose, log_format);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Serve { host, port, dev } => {
            cmd::cmd_serve(project_dir, host.clone(), *port, *dev).await?
        }
        Commands::Run {
            file,
            language,
            context,
            max_iterations,
            json,
        } => {
            let args = cmd::RunArgs {
                file: file.clone(),
                language: language.clone(),
                context: context.clone(),
                max_iterations: *max_iterations,
                json: *json,
            };
            cmd::cmd_run(project_dir, args).await?
        }
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
