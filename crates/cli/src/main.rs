//! Resource Monitor CLI
//!
//! A command-line tool for reading the current window's usage and the
//! health of a running resource monitor.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use commands::{health, stats};

/// Resource Monitor CLI
#[derive(Parser)]
#[command(name = "rmon")]
#[command(author, version, about = "CLI for the Resource Monitor", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via RMON_API_URL env var)
    #[arg(long, env = "RMON_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show mean CPU and memory usage of the current window
    Stats {
        /// Only show one kind of target
        #[arg(long, short)]
        kind: Option<KindFilter>,
    },

    /// Show monitor health and readiness
    Health,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum KindFilter {
    Container,
    Host,
}

impl KindFilter {
    fn as_str(self) -> &'static str {
        match self {
            KindFilter::Container => "container",
            KindFilter::Host => "host",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::Config::load()?;
    let client = client::ApiClient::new(&config.api_url(cli.api_url))?;

    match cli.command {
        Commands::Stats { kind } => {
            let kind = kind.map(|k| k.as_str().to_string());
            stats::show_stats(&client, kind, cli.format).await?;
        }
        Commands::Health => {
            health::show_health(&client, cli.format).await?;
        }
    }

    Ok(())
}
