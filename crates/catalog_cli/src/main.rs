//! Catalog CLI
//!
//! Command-line tools for the single-writer catalog.
//!
//! # Commands
//!
//! - `validate-config` - Load and validate a node configuration file
//! - `cluster` - Run a master and replicas in one process and report counts
//! - `migrations` - List built-in migrations and their status on an index

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Single-writer catalog tools.
#[derive(Parser)]
#[command(name = "catalog")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(global = true, short, long, default_value = "text")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate a TOML node configuration
    ValidateConfig {
        /// Path to the configuration file
        file: PathBuf,
    },

    /// Run a master and replicas in one process
    Cluster {
        /// Number of replicas to bootstrap
        #[arg(short, long, default_value = "2")]
        replicas: usize,

        /// Number of products written through the master
        #[arg(short, long, default_value = "1000")]
        products: usize,

        /// Elasticsearch URL; the in-memory index is used when absent
        #[arg(short, long)]
        elasticsearch: Option<String>,

        /// Base index name; replicas append `-replica-<n>`
        #[arg(short, long, default_value = "products")]
        index: String,

        /// Lowest snapshot listener port (0 with --max-port 0 for ephemeral)
        #[arg(long, default_value = "0")]
        min_port: u16,

        /// Highest snapshot listener port
        #[arg(long, default_value = "0")]
        max_port: u16,
    },

    /// List built-in migrations
    Migrations {
        /// Elasticsearch URL to read the applied record from
        #[arg(short, long)]
        elasticsearch: Option<String>,

        /// Index holding the record
        #[arg(short, long, default_value = "products")]
        index: String,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::ValidateConfig { file } => {
            commands::validate_config::run(&file, &cli.format)?;
        }
        Commands::Cluster {
            replicas,
            products,
            elasticsearch,
            index,
            min_port,
            max_port,
        } => {
            let options = commands::cluster::ClusterOptions {
                replicas,
                products,
                elasticsearch,
                index,
                min_port,
                max_port,
            };
            commands::cluster::run(options, &cli.format).await?;
        }
        Commands::Migrations {
            elasticsearch,
            index,
        } => {
            commands::migrations::run(elasticsearch.as_deref(), &index, &cli.format).await?;
        }
        Commands::Version => {
            println!("catalog CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("snapshot protocol v{}", catalog_protocol::PROTOCOL_VERSION);
        }
    }

    Ok(())
}
