//! Node wiring.
//!
//! A [`Node`] owns the readiness gate, the dispatcher task and a facade.
//! Writers (standalone, master) take the mutation queue exclusively; a
//! replica subscribes to the same exchange by broadcast and follows.

use crate::catalog::Catalog;
use crate::config::{CatalogConfig, NodeMode};
use crate::dispatcher::{Dispatcher, DispatcherStats};
use crate::error::{CoreResult, ReadinessError};
use crate::migration::MigrationManager;
use crate::readiness::{ReadinessGate, ReadinessState};
use catalog_fabric::MessagingFabric;
use catalog_index::SearchIndex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Builds and starts a [`Node`].
///
/// # Example
///
/// ```ignore
/// let node = NodeBuilder::new(CatalogConfig::new("products"))
///     .with_index(Arc::new(MemoryIndex::new()))
///     .with_fabric(Arc::new(MemoryFabric::new()))
///     .start()
///     .await?;
/// node.ensure_ready().await?;
/// ```
pub struct NodeBuilder {
    config: CatalogConfig,
    index: Option<Arc<dyn SearchIndex>>,
    fabric: Option<Arc<dyn MessagingFabric>>,
    migrations: Option<MigrationManager>,
}

impl NodeBuilder {
    /// Creates a builder for `config`.
    pub fn new(config: CatalogConfig) -> Self {
        Self {
            config,
            index: None,
            fabric: None,
            migrations: None,
        }
    }

    /// Sets the search index handle.
    #[must_use]
    pub fn with_index(mut self, index: Arc<dyn SearchIndex>) -> Self {
        self.index = Some(index);
        self
    }

    /// Sets the messaging fabric handle.
    #[must_use]
    pub fn with_fabric(mut self, fabric: Arc<dyn MessagingFabric>) -> Self {
        self.fabric = Some(fabric);
        self
    }

    /// Replaces the built-in migrations.
    #[must_use]
    pub fn with_migrations(mut self, migrations: MigrationManager) -> Self {
        self.migrations = Some(migrations);
        self
    }

    /// Attaches to the mutation exchange and starts the dispatcher.
    ///
    /// Initialization starts in the background right away; use
    /// [`Node::ensure_ready`] to wait for it.
    ///
    /// # Errors
    ///
    /// Fails with a configuration error if a handle is missing, and with a
    /// fabric error if the exchange cannot be attached, for instance when
    /// another writer already owns the mutation queue.
    pub async fn start(self) -> CoreResult<Node> {
        let index = self.index.ok_or_else(|| {
            ReadinessError::Configuration("a search index handle is required".into())
        })?;
        let fabric = self.fabric.ok_or_else(|| {
            ReadinessError::Configuration("a messaging fabric handle is required".into())
        })?;

        let mode = self.config.mode;
        let exchange = self.config.mutation_exchange.clone();
        let mut gate = ReadinessGate::new(self.config, Arc::clone(&index), Arc::clone(&fabric));
        if let Some(migrations) = self.migrations {
            gate = gate.with_migrations(migrations);
        }
        let gate = Arc::new(gate);

        let subscription = if mode.is_writer() {
            fabric.consume_exclusive(&exchange).await?
        } else {
            fabric.subscribe_broadcast(&exchange).await?
        };
        let catalog =
            Catalog::connect(Arc::clone(&gate), Arc::clone(&index), Arc::clone(&fabric)).await?;

        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&gate), index, fabric));
        let running = Arc::clone(&dispatcher);
        let dispatcher_task = tokio::spawn(async move { running.run(subscription).await });

        let warming = Arc::clone(&gate);
        let warmup_task = tokio::spawn(async move {
            // Failures are logged by the gate and handed to every caller.
            let _ = warming.ensure_ready().await;
        });

        info!(%mode, exchange = %exchange, "node started");
        Ok(Node {
            mode,
            gate,
            dispatcher,
            catalog,
            tasks: vec![dispatcher_task, warmup_task],
        })
    }
}

/// A running catalog node.
pub struct Node {
    mode: NodeMode,
    gate: Arc<ReadinessGate>,
    dispatcher: Arc<Dispatcher>,
    catalog: Catalog,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    /// The node's role.
    pub fn mode(&self) -> NodeMode {
        self.mode
    }

    /// Waits for initialization to finish.
    pub async fn ensure_ready(&self) -> Result<(), ReadinessError> {
        self.gate.ensure_ready().await
    }

    /// Current readiness state.
    pub fn readiness(&self) -> ReadinessState {
        self.gate.state()
    }

    /// The readiness gate.
    pub fn gate(&self) -> &Arc<ReadinessGate> {
        &self.gate
    }

    /// The catalog facade.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Dispatcher statistics.
    pub fn dispatcher_stats(&self) -> DispatcherStats {
        self.dispatcher.stats()
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("mode", &self.mode)
            .field("readiness", &self.readiness())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use catalog_fabric::{FabricError, MemoryFabric};
    use catalog_index::MemoryIndex;

    #[tokio::test]
    async fn missing_index_is_a_configuration_error() {
        let err = NodeBuilder::new(CatalogConfig::new("products"))
            .with_fabric(Arc::new(MemoryFabric::new()))
            .start()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::NotReady(ReadinessError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn second_writer_is_rejected() {
        let fabric = Arc::new(MemoryFabric::new());
        let first = NodeBuilder::new(CatalogConfig::new("products"))
            .with_index(Arc::new(MemoryIndex::new()))
            .with_fabric(fabric.clone())
            .start()
            .await
            .unwrap();
        assert!(first.mode().is_writer());

        let err = NodeBuilder::new(CatalogConfig::new("products"))
            .with_index(Arc::new(MemoryIndex::new()))
            .with_fabric(fabric.clone())
            .start()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Fabric(FabricError::ExclusiveConsumerBusy(_))
        ));

        // The queue is released once the node's tasks wind down.
        drop(first);
        let mut second = None;
        for _ in 0..50 {
            let attempt = NodeBuilder::new(CatalogConfig::new("products"))
                .with_index(Arc::new(MemoryIndex::new()))
                .with_fabric(fabric.clone())
                .start()
                .await;
            if let Ok(node) = attempt {
                second = Some(node);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(second.is_some());
    }

    #[tokio::test]
    async fn node_becomes_ready_in_background() {
        let node = NodeBuilder::new(CatalogConfig::new("products"))
            .with_index(Arc::new(MemoryIndex::new()))
            .with_fabric(Arc::new(MemoryFabric::new()))
            .start()
            .await
            .unwrap();

        node.ensure_ready().await.unwrap();
        assert_eq!(node.readiness(), ReadinessState::Ready);
        assert_eq!(node.gate().initializations(), 1);
        assert_eq!(node.dispatcher_stats().received, 0);
    }
}
