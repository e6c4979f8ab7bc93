//! Usage statistics commands

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{ApiClient, StatsEntry};
use crate::output::{color_percent, print_json, print_table, OutputFormat};

/// Row for the stats table
#[derive(Tabled)]
struct StatsRow {
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "CPU")]
    cpu: String,
    #[tabled(rename = "Memory")]
    memory: String,
    #[tabled(rename = "Samples")]
    samples: usize,
    #[tabled(rename = "Window Start")]
    window_started_at: String,
}

impl From<StatsEntry> for StatsRow {
    fn from(entry: StatsEntry) -> Self {
        let (cpu, memory) = if entry.sample_count == 0 {
            ("N/A".to_string(), "N/A".to_string())
        } else {
            (
                color_percent(entry.cpu_percent),
                color_percent(entry.memory_percent),
            )
        };

        Self {
            kind: entry.kind,
            target: entry.target,
            cpu,
            memory,
            samples: entry.sample_count,
            window_started_at: entry.window_started_at,
        }
    }
}

/// Show the running window's mean usage of every monitored target
pub async fn show_stats(
    client: &ApiClient,
    kind: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let entries = client.stats(kind.as_deref()).await?;

    match format {
        OutputFormat::Json => print_json(&entries)?,
        OutputFormat::Table => {
            println!("{}", "Current Window Usage".bold());
            print_table(entries.into_iter().map(StatsRow::from).collect());
        }
    }

    Ok(())
}
