//! Single-flight readiness gate.
//!
//! Every component awaits [`ReadinessGate::ensure_ready`] before it touches
//! the index. The first caller spawns the initialization sequence; callers
//! arriving while it runs wait on it, and every caller, then and later,
//! receives a clone of the same outcome. A failure is permanent for the
//! lifetime of the gate.
//!
//! ## Sequence
//!
//! 1. validate the configuration
//! 2. probe the search index
//! 3. resolve the index name; an alias is fatal
//! 4. create the index if missing
//! 5. replica only: pull a snapshot from the master
//! 6. run pending migrations
//! 7. refresh the index
//! 8. mark ready; master only: start the snapshot server

use crate::config::{CatalogConfig, NodeMode};
use crate::error::ReadinessError;
use crate::migration::{MigrationContext, MigrationManager, MigrationState};
use catalog_fabric::MessagingFabric;
use catalog_index::{CreateOutcome, IndexError, Resolution, SearchIndex};
use catalog_snapshot::{IndexDumpTool, SnapshotClient, SnapshotServer};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, Instrument};

/// Readiness of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadinessState {
    /// Nobody asked yet.
    NotReady,
    /// The initialization sequence is running.
    Initializing,
    /// Initialization succeeded.
    Ready,
    /// Initialization failed; terminal.
    Failed,
}

impl ReadinessState {
    /// Returns the state name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadinessState::NotReady => "not_ready",
            ReadinessState::Initializing => "initializing",
            ReadinessState::Ready => "ready",
            ReadinessState::Failed => "failed",
        }
    }

    /// Returns true once the outcome is known.
    pub fn is_settled(&self) -> bool {
        matches!(self, ReadinessState::Ready | ReadinessState::Failed)
    }
}

impl std::fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

struct RunningServer {
    server: Arc<SnapshotServer>,
    task: JoinHandle<()>,
}

type Outcome = Option<Result<(), ReadinessError>>;

/// State shared between the gate and its initialization task.
struct Shared {
    outcome: watch::Sender<Outcome>,
    state: RwLock<ReadinessState>,
    initializations: AtomicU64,
    server: Mutex<Option<RunningServer>>,
}

impl Shared {
    fn settle(&self, result: Result<(), ReadinessError>) {
        *self.state.write() = if result.is_ok() {
            ReadinessState::Ready
        } else {
            ReadinessState::Failed
        };
        self.outcome.send_replace(Some(result));
    }
}

/// Settles the outcome if the initialization task stops without one.
struct Interrupted(Arc<Shared>);

impl Drop for Interrupted {
    fn drop(&mut self) {
        let settled = self.0.outcome.borrow().is_some();
        if !settled {
            self.0.settle(Err(ReadinessError::Interrupted(
                "initialization task stopped before finishing".into(),
            )));
        }
    }
}

/// Owns the one-time initialization of a node.
///
/// The sequence runs on its own task, started by the first caller of
/// [`ReadinessGate::ensure_ready`]. Waiters only observe the outcome, so a
/// cancelled waiter never abandons or restarts the sequence.
pub struct ReadinessGate {
    init: Initialization,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ReadinessGate {
    /// Creates a gate running the built-in migrations.
    pub fn new(
        config: CatalogConfig,
        index: Arc<dyn SearchIndex>,
        fabric: Arc<dyn MessagingFabric>,
    ) -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            init: Initialization {
                config,
                index,
                fabric,
                migrations: Arc::new(MigrationManager::builtin()),
                shared: Arc::new(Shared {
                    outcome,
                    state: RwLock::new(ReadinessState::NotReady),
                    initializations: AtomicU64::new(0),
                    server: Mutex::new(None),
                }),
            },
            task: Mutex::new(None),
        }
    }

    /// Replaces the migrations to run.
    #[must_use]
    pub fn with_migrations(mut self, migrations: MigrationManager) -> Self {
        self.init.migrations = Arc::new(migrations);
        self
    }

    /// The node configuration.
    pub fn config(&self) -> &CatalogConfig {
        &self.init.config
    }

    /// Current readiness state.
    pub fn state(&self) -> ReadinessState {
        *self.init.shared.state.read()
    }

    /// How many times the initialization sequence started.
    pub fn initializations(&self) -> u64 {
        self.init.shared.initializations.load(Ordering::SeqCst)
    }

    /// The snapshot server, once a master is ready.
    pub fn snapshot_server(&self) -> Option<Arc<SnapshotServer>> {
        self.init
            .shared
            .server
            .lock()
            .as_ref()
            .map(|s| Arc::clone(&s.server))
    }

    /// Becomes ready, or joins the initialization already in flight.
    ///
    /// # Errors
    ///
    /// Returns the error that failed initialization. The same error is
    /// returned to every caller, forever.
    pub async fn ensure_ready(&self) -> Result<(), ReadinessError> {
        let mut outcome = self.init.shared.outcome.subscribe();
        self.start();

        let settled = match outcome.wait_for(Option::is_some).await {
            Ok(settled) => (*settled).clone(),
            Err(_) => None,
        };
        settled.unwrap_or_else(|| Err(ReadinessError::Interrupted("readiness gate closed".into())))
    }

    fn start(&self) {
        let mut task = self.task.lock();
        if task.is_none() {
            let interrupted = Interrupted(Arc::clone(&self.init.shared));
            *task = Some(tokio::spawn(self.init.clone().run(interrupted)));
        }
    }
}

/// Everything the initialization sequence needs, owned by its task.
#[derive(Clone)]
struct Initialization {
    config: CatalogConfig,
    index: Arc<dyn SearchIndex>,
    fabric: Arc<dyn MessagingFabric>,
    migrations: Arc<MigrationManager>,
    shared: Arc<Shared>,
}

impl Initialization {
    async fn run(self, _interrupted: Interrupted) {
        let result = self.initialize().await;
        self.shared.settle(result);
    }

    async fn initialize(&self) -> Result<(), ReadinessError> {
        self.shared.initializations.fetch_add(1, Ordering::SeqCst);
        *self.shared.state.write() = ReadinessState::Initializing;
        let started = Instant::now();

        let span = info_span!(
            "readiness",
            mode = %self.config.mode,
            index = %self.config.index_name
        );
        let result = self.run_sequence().instrument(span.clone()).await;

        match &result {
            Ok(()) => {
                info!(parent: &span, elapsed_ms = started.elapsed().as_millis() as u64, "node ready");
                if self.config.mode == NodeMode::Master {
                    self.start_snapshot_server().instrument(span).await;
                }
            }
            Err(e) => {
                error!(parent: &span, error = %e, "initialization failed");
            }
        }
        result
    }

    async fn run_sequence(&self) -> Result<(), ReadinessError> {
        let name = self.config.index_name.as_str();

        self.config
            .validate()
            .map_err(|e| ReadinessError::Configuration(e.to_string()))?;

        self.index
            .ping()
            .await
            .map_err(|e| ReadinessError::Connectivity(e.to_string()))?;
        debug!(endpoint = %self.index.endpoint(), "search index reachable");

        match self.index.resolve(name).await.map_err(setup_error)? {
            Resolution::Alias(targets) => {
                return Err(ReadinessError::AliasResolution {
                    name: name.to_string(),
                    targets,
                });
            }
            Resolution::Index(_) | Resolution::Missing => {}
        }

        match self.index.create_index(name).await.map_err(setup_error)? {
            CreateOutcome::Created => info!("index created"),
            CreateOutcome::AlreadyExists => debug!("index already exists"),
        }

        if self.config.mode == NodeMode::Replica {
            self.bootstrap_replica().await?;
        }

        self.migrate().await?;

        self.index.refresh(name).await.map_err(setup_error)?;
        Ok(())
    }

    async fn bootstrap_replica(&self) -> Result<(), ReadinessError> {
        let replication = self.config.replication.clone().ok_or_else(|| {
            ReadinessError::Configuration("replica mode requires replication settings".into())
        })?;
        let dump = Arc::new(IndexDumpTool::new(
            Arc::clone(&self.index),
            self.config.index_name.clone(),
        ));

        info!(exchange = %replication.exchange, "pulling snapshot from master");
        let report = SnapshotClient::new(replication, Arc::clone(&self.fabric), dump)
            .sync()
            .await
            .map_err(|e| ReadinessError::Replication(e.to_string()))?;

        info!(
            session = %report.session_id,
            documents = report.documents,
            bytes = report.data_bytes,
            elapsed_ms = report.duration.as_millis() as u64,
            "snapshot loaded"
        );
        Ok(())
    }

    async fn migrate(&self) -> Result<(), ReadinessError> {
        self.migrations
            .validate()
            .map_err(|e| ReadinessError::Configuration(e.to_string()))?;

        let ctx = MigrationContext::new(Arc::clone(&self.index), self.config.index_name.clone());
        let mut state = MigrationState::load(self.index.as_ref(), &ctx.index_name)
            .await
            .map_err(|e| ReadinessError::Index(e.to_string()))?;

        let pending = self.migrations.pending(&state);
        if pending.is_empty() {
            debug!(version = state.current_version(), "no pending migrations");
            return Ok(());
        }

        let run = self
            .migrations
            .run_pending(&ctx, &mut state)
            .await
            .map_err(|e| ReadinessError::Index(e.to_string()))?;

        if let Some(failed) = run.failure() {
            return Err(ReadinessError::Migration {
                version: failed.version,
                name: failed.name.clone(),
                message: failed.error.clone().unwrap_or_default(),
            });
        }
        info!(
            applied = run.applied_count(),
            version = run.final_version,
            "migrations complete"
        );
        Ok(())
    }

    async fn start_snapshot_server(&self) {
        let Some(replication) = self.config.replication.clone() else {
            return;
        };
        let dump = Arc::new(IndexDumpTool::new(
            Arc::clone(&self.index),
            self.config.index_name.clone(),
        ));

        let server = match SnapshotServer::new(replication, Arc::clone(&self.fabric), dump) {
            Ok(server) => Arc::new(server),
            Err(e) => {
                error!(error = %e, "snapshot server not started");
                return;
            }
        };
        match Arc::clone(&server).start().await {
            Ok(task) => *self.shared.server.lock() = Some(RunningServer { server, task }),
            Err(e) => error!(error = %e, "snapshot server not started"),
        }
    }
}

fn setup_error(e: IndexError) -> ReadinessError {
    if e.is_connectivity() {
        ReadinessError::Connectivity(e.to_string())
    } else {
        ReadinessError::Index(e.to_string())
    }
}

impl Drop for ReadinessGate {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        if let Some(running) = self.init.shared.server.lock().take() {
            running.task.abort();
        }
    }
}

impl std::fmt::Debug for ReadinessGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadinessGate")
            .field("mode", &self.init.config.mode)
            .field("index_name", &self.init.config.index_name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
