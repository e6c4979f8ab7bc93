//! Health and readiness commands

use anyhow::Result;
use colored::Colorize;
use serde_json::json;
use tabled::Tabled;

use crate::client::{ApiClient, HealthResponse, ReadinessResponse};
use crate::output::{
    color_status, print_info, print_json, print_success, print_table, print_warning, OutputFormat,
};

/// Row for the component health table
#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
    #[tabled(rename = "Checked At")]
    checked_at: String,
}

/// Show overall status, readiness and per-component health
pub async fn show_health(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let (_, health): (bool, HealthResponse) = client.get_probe("healthz").await?;
    let (_, readiness): (bool, ReadinessResponse) = client.get_probe("readyz").await?;

    match format {
        OutputFormat::Json => {
            print_json(&json!({ "health": health, "readiness": readiness }))?;
        }
        OutputFormat::Table => {
            println!("{}", "Monitor Health".bold());
            println!("{}", "=".repeat(50));
            println!("Status:    {}", color_status(&health.status));

            if readiness.ready {
                print_success("Ready");
            } else {
                print_warning(&format!(
                    "Not ready: {}",
                    readiness.reason.as_deref().unwrap_or("unknown")
                ));
            }
            println!();

            if health.components.is_empty() {
                print_info("No components registered");
                return Ok(());
            }

            let rows = health
                .components
                .into_iter()
                .map(|(name, component)| ComponentRow {
                    name,
                    status: color_status(&component.status),
                    message: component.message.unwrap_or_else(|| "-".to_string()),
                    checked_at: component.checked_at,
                })
                .collect();
            print_table(rows);
        }
    }

    Ok(())
}
