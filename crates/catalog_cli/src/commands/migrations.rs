//! Migrations command implementation.

use catalog_core::{MigrationManager, MigrationState};
use catalog_index::{ElasticsearchIndex, SearchIndex};
use serde::Serialize;
use tracing::info;

/// One migration and whether it was applied.
#[derive(Debug, Serialize)]
pub struct MigrationStatus {
    /// Version number.
    pub version: u64,
    /// Migration name.
    pub name: String,
    /// What the migration does.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// `None` when no index was inspected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied: Option<bool>,
}

/// Runs the migrations command.
pub async fn run(
    elasticsearch: Option<&str>,
    index_name: &str,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let state = match elasticsearch {
        Some(url) => {
            info!("Reading migration record of {} at {}", index_name, url);
            let index = ElasticsearchIndex::new(url);
            index.ping().await?;
            Some(MigrationState::load(&index, index_name).await?)
        }
        None => None,
    };
    let statuses = statuses(&MigrationManager::builtin(), state.as_ref());

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&statuses)?);
        }
        _ => print_text(&statuses),
    }
    Ok(())
}

fn statuses(manager: &MigrationManager, state: Option<&MigrationState>) -> Vec<MigrationStatus> {
    manager
        .list()
        .into_iter()
        .map(|m| MigrationStatus {
            applied: state.map(|s| s.is_applied(m.version)),
            version: m.version,
            name: m.name,
            description: m.description,
        })
        .collect()
}

fn print_text(statuses: &[MigrationStatus]) {
    println!("Registered Migrations");
    println!("====================");

    if statuses.is_empty() {
        println!("  No migrations registered.");
        return;
    }
    for migration in statuses {
        let status = match migration.applied {
            Some(true) => " [✓ applied]",
            Some(false) => " [○ pending]",
            None => "",
        };
        println!("  v{}: {}{}", migration.version, migration.name, status);
        if let Some(desc) = &migration.description {
            println!("      {}", desc);
        }
    }
}
