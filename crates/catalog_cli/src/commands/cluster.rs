//! Cluster command implementation.
//!
//! Runs a master and a number of replicas in one process. The nodes share
//! an in-memory fabric; snapshots travel over real TCP streams.

use catalog_core::{CatalogConfig, Node, NodeBuilder, NodeMode};
use catalog_fabric::{MemoryFabric, MessagingFabric};
use catalog_index::{ElasticsearchIndex, MemoryIndex, SearchIndex};
use catalog_snapshot::ReplicationConfig;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Cluster command options.
#[derive(Debug, Clone)]
pub struct ClusterOptions {
    /// Replicas to bootstrap.
    pub replicas: usize,
    /// Products written through the master.
    pub products: usize,
    /// Elasticsearch URL, or `None` for in-memory indexes.
    pub elasticsearch: Option<String>,
    /// Base index name.
    pub index: String,
    /// Lowest snapshot listener port.
    pub min_port: u16,
    /// Highest snapshot listener port.
    pub max_port: u16,
}

/// State of one node after the run.
#[derive(Debug, Serialize)]
pub struct NodeReport {
    /// Node mode.
    pub mode: String,
    /// Local index name.
    pub index: String,
    /// Searchable documents.
    pub documents: u64,
    /// Mutations the node's dispatcher applied.
    pub writes_applied: u64,
    /// Milliseconds until the node was ready.
    pub ready_ms: u64,
}

/// Cluster run result.
#[derive(Debug, Serialize)]
pub struct ClusterReport {
    /// Index backend in use.
    pub backend: String,
    /// Products written.
    pub products: usize,
    /// The master.
    pub master: NodeReport,
    /// The replicas, in start order.
    pub replicas: Vec<NodeReport>,
    /// Wall time of the run in milliseconds.
    pub elapsed_ms: u64,
}

impl ClusterReport {
    /// Returns true if every replica holds the master's documents.
    pub fn consistent(&self) -> bool {
        self.replicas
            .iter()
            .all(|r| r.documents == self.master.documents)
    }
}

/// Runs the cluster command.
pub async fn run(options: ClusterOptions, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let report = simulate(&options).await?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => print_text(&report),
    }

    if report.consistent() {
        Ok(())
    } else {
        Err("replicas diverged from the master".into())
    }
}

async fn simulate(options: &ClusterOptions) -> Result<ClusterReport, Box<dyn std::error::Error>> {
    let started = Instant::now();
    let fabric: Arc<dyn MessagingFabric> = Arc::new(MemoryFabric::new());
    let shared: Option<Arc<dyn SearchIndex>> = options
        .elasticsearch
        .as_ref()
        .map(|url| Arc::new(ElasticsearchIndex::new(url.clone())) as Arc<dyn SearchIndex>);
    let index_for = || -> Arc<dyn SearchIndex> {
        match &shared {
            Some(index) => Arc::clone(index),
            None => Arc::new(MemoryIndex::new()),
        }
    };
    let replication = ReplicationConfig::new("127.0.0.1", options.min_port, options.max_port);

    let master_config = CatalogConfig::new(options.index.clone())
        .with_mode(NodeMode::Master)
        .with_replication(replication.clone());
    let master = NodeBuilder::new(master_config)
        .with_index(index_for())
        .with_fabric(Arc::clone(&fabric))
        .start()
        .await?;
    master.ensure_ready().await?;
    let master_ready = started.elapsed();
    info!(index = %options.index, "master ready");

    for i in 0..options.products {
        master.catalog().create(sample_product(i)).await?;
    }
    info!(products = options.products, "products written");

    let mut replicas = Vec::with_capacity(options.replicas);
    for n in 1..=options.replicas {
        let config = CatalogConfig::new(format!("{}-replica-{n}", options.index))
            .with_mode(NodeMode::Replica)
            .with_replication(replication.clone());
        let node = NodeBuilder::new(config)
            .with_index(index_for())
            .with_fabric(Arc::clone(&fabric))
            .start()
            .await?;
        replicas.push(node);
    }

    // Replicas bootstrap concurrently in their warm-up tasks.
    let mut replica_reports = Vec::with_capacity(replicas.len());
    for node in &replicas {
        node.ensure_ready().await?;
        let ready_ms = started.elapsed().as_millis() as u64;
        replica_reports.push(report_for(node, ready_ms).await?);
    }

    Ok(ClusterReport {
        backend: match &options.elasticsearch {
            Some(url) => url.clone(),
            None => "memory".to_string(),
        },
        products: options.products,
        master: report_for(&master, master_ready.as_millis() as u64).await?,
        replicas: replica_reports,
        elapsed_ms: started.elapsed().as_millis() as u64,
    })
}

fn sample_product(i: usize) -> Map<String, Value> {
    let mut attributes = Map::new();
    attributes.insert("name".into(), json!(format!("product {i}")));
    attributes.insert("rank".into(), json!(i));
    attributes.insert("tags".into(), json!(["demo", "", if i % 2 == 0 { "even" } else { "odd" }]));
    attributes
}

async fn report_for(node: &Node, ready_ms: u64) -> Result<NodeReport, Box<dyn std::error::Error>> {
    let catalog = node.catalog();
    catalog.refresh().await?;
    let stats = node.dispatcher_stats();
    Ok(NodeReport {
        mode: node.mode().to_string(),
        index: node.gate().config().index_name.clone(),
        documents: catalog.count().await?,
        writes_applied: stats.writes + stats.deletes,
        ready_ms,
    })
}

fn print_text(report: &ClusterReport) {
    println!("Cluster Run");
    println!("===========");
    println!("  Backend:  {}", report.backend);
    println!("  Products: {}", report.products);
    println!("  Elapsed:  {} ms", report.elapsed_ms);
    println!();
    println!(
        "  {:<10} {:<28} {:>10} {:>10} {:>10}",
        "MODE", "INDEX", "DOCUMENTS", "APPLIED", "READY MS"
    );
    for node in std::iter::once(&report.master).chain(&report.replicas) {
        println!(
            "  {:<10} {:<28} {:>10} {:>10} {:>10}",
            node.mode, node.index, node.documents, node.writes_applied, node.ready_ms
        );
    }
    println!();
    if report.consistent() {
        println!("✓ All replicas match the master");
    } else {
        println!("⚠ Replica document counts differ from the master");
    }
}
