//! Validate-config command implementation.

use catalog_core::CatalogConfig;
use serde::Serialize;
use std::path::Path;
use tracing::info;

/// Summary of a valid configuration.
#[derive(Debug, Serialize)]
pub struct ConfigSummary {
    /// Configuration file.
    pub path: String,
    /// Parsed configuration, defaults filled in.
    pub config: CatalogConfig,
}

/// Runs the validate-config command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    info!("Validating {:?}", path);
    let summary = summarize(path)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        _ => print_text(&summary),
    }
    Ok(())
}

fn summarize(path: &Path) -> Result<ConfigSummary, Box<dyn std::error::Error>> {
    let config = CatalogConfig::from_file(path)?;
    Ok(ConfigSummary {
        path: path.display().to_string(),
        config,
    })
}

fn print_text(summary: &ConfigSummary) {
    let config = &summary.config;
    println!("Configuration: {}", summary.path);
    println!("================");
    println!("  Mode:              {}", config.mode);
    println!("  Index:             {}", config.index_name);
    println!("  Mutation exchange: {}", config.mutation_exchange);
    println!("  Reply timeout:     {:?}", config.reply_timeout);

    if let Some(replication) = &config.replication {
        println!("\nReplication:");
        println!("  Host:              {}", replication.host);
        if replication.uses_ephemeral_ports() {
            println!("  Ports:             ephemeral");
        } else {
            println!(
                "  Ports:             {}-{}",
                replication.min_port, replication.max_port
            );
        }
        println!("  Exchange:          {}", replication.exchange);
        println!("  Session timeout:   {:?}", replication.session_timeout);
        println!("  Request timeout:   {:?}", replication.request_timeout);
    }
    println!("\n✓ Configuration is valid");
}
