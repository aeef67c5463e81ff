//! Canopy CLI
//!
//! Provisions a host cluster and its tenant clusters, and tears them down again

mod commands;
mod output;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use output::OutputFormat;
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file (default: ./canopy.yml, ./config.yml or ./canopy.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table, global = true)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pre-flight checks without touching any infrastructure
    Validate,
    /// Provision the host and every tenant
    Up,
    /// Destroy the instances, local artefacts and remote state
    Down {
        /// Confirm the teardown
        #[arg(short, long)]
        yes: bool,
    },
    /// Print or write a sample configuration
    SampleConfig {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        write: Option<PathBuf>,
    },
    /// Generate shell completions
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Validate => {
            let (config, _guard) = commands::load(config_path)?;
            commands::provision::validate(config).await
        }
        Commands::Up => {
            let (config, _guard) = commands::load(config_path)?;
            commands::provision::up(config, cli.output).await
        }
        Commands::Down { yes } => {
            let (config, _guard) = commands::load(config_path)?;
            commands::teardown::down(config, yes).await
        }
        Commands::SampleConfig { write } => commands::config::sample(write.as_deref()),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "canopy", &mut std::io::stdout());
            Ok(())
        }
    }
}
