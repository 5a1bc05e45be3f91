//! Index schema migrations.
//!
//! Migrations are numbered, run in ascending order and recorded so they
//! never rerun. The record lives in the index mapping itself, under
//! `_meta.catalog_migrations`, which means a replica that copied the
//! master's mapping also inherits the master's migration history.
//!
//! ## Usage
//!
//! ```ignore
//! struct AddSkuMapping;
//!
//! #[async_trait]
//! impl Migration for AddSkuMapping {
//!     fn version(&self) -> u64 { 3 }
//!     fn name(&self) -> &str { "sku_mapping" }
//!     async fn up(&self, ctx: &MigrationContext) -> CoreResult<()> {
//!         ctx.put_mapping(json!({"properties": {"sku": {"type": "keyword"}}})).await
//!     }
//! }
//!
//! let mut manager = MigrationManager::builtin();
//! manager.register(Box::new(AddSkuMapping))?;
//! ```

use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use catalog_index::SearchIndex;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, Instrument};

/// Key under the mapping `_meta` holding applied migrations.
pub const META_KEY: &str = "catalog_migrations";

/// Version number for migrations.
pub type MigrationVersion = u64;

/// Information about a migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationInfo {
    /// Version number (unique, sequential).
    pub version: MigrationVersion,
    /// Human-readable name.
    pub name: String,
    /// Description of what this migration does.
    pub description: Option<String>,
}

/// Result of running a single migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationResult {
    /// The migration version that was run.
    pub version: MigrationVersion,
    /// The migration name.
    pub name: String,
    /// Error message if the migration failed.
    pub error: Option<String>,
}

impl MigrationResult {
    /// Returns true if the migration was applied.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of running all pending migrations.
#[derive(Debug, Clone, Default)]
pub struct MigrationRunResult {
    /// Migrations that were run, in order. A failed one is always last.
    pub migrations: Vec<MigrationResult>,
    /// Highest applied version after the run.
    pub final_version: MigrationVersion,
}

impl MigrationRunResult {
    /// Number of migrations applied by this run.
    pub fn applied_count(&self) -> usize {
        self.migrations.iter().filter(|m| m.is_success()).count()
    }

    /// The migration that stopped the run, if any.
    pub fn failure(&self) -> Option<&MigrationResult> {
        self.migrations.iter().find(|m| !m.is_success())
    }
}

/// What a migration gets to work with.
pub struct MigrationContext {
    /// Location of the index server.
    pub index_url: String,
    /// Target index.
    pub index_name: String,
    /// Index handle.
    pub index: Arc<dyn SearchIndex>,
    /// Span to log under.
    pub span: tracing::Span,
}

impl MigrationContext {
    /// Creates a context for `index_name` on `index`.
    pub fn new(index: Arc<dyn SearchIndex>, index_name: impl Into<String>) -> Self {
        let index_name = index_name.into();
        Self {
            index_url: index.endpoint(),
            span: tracing::info_span!("migrations", index = %index_name),
            index_name,
            index,
        }
    }

    /// Merges `mapping` into the target index mapping.
    pub async fn put_mapping(&self, mapping: Value) -> CoreResult<()> {
        self.index.put_mapping(&self.index_name, mapping).await?;
        Ok(())
    }
}

impl std::fmt::Debug for MigrationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationContext")
            .field("index_url", &self.index_url)
            .field("index_name", &self.index_name)
            .finish_non_exhaustive()
    }
}

/// Trait for defining migrations.
#[async_trait]
pub trait Migration: Send + Sync {
    /// Returns the version number for this migration.
    ///
    /// Versions must be unique and sequential starting from 1.
    fn version(&self) -> MigrationVersion;

    /// Returns the name of this migration.
    fn name(&self) -> &str;

    /// Returns an optional description.
    fn description(&self) -> Option<&str> {
        None
    }

    /// Runs the migration.
    async fn up(&self, ctx: &MigrationContext) -> CoreResult<()>;
}

/// Record of one applied migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedMigration {
    /// Version number.
    pub version: MigrationVersion,
    /// Migration name.
    pub name: String,
    /// When the migration was applied.
    pub applied_at: DateTime<Utc>,
}

/// Migration history of one index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationState {
    applied: Vec<AppliedMigration>,
}

impl MigrationState {
    /// Creates an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the history from the index mapping.
    pub async fn load(index: &dyn SearchIndex, index_name: &str) -> CoreResult<Self> {
        let mapping = index.get_mapping(index_name).await?;
        let applied = match mapping.pointer(&format!("/_meta/{META_KEY}")) {
            None | Some(Value::Null) => Vec::new(),
            Some(record) => serde_json::from_value(record.clone()).map_err(|e| {
                CoreError::validation(format!("unreadable migration record: {e}"))
            })?,
        };
        Ok(Self { applied })
    }

    /// Writes the history into the index mapping, keeping other `_meta` keys.
    pub async fn save(&self, index: &dyn SearchIndex, index_name: &str) -> CoreResult<()> {
        let mapping = index.get_mapping(index_name).await?;
        let mut meta = mapping
            .get("_meta")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_else(Map::new);
        let record = serde_json::to_value(&self.applied)
            .map_err(|e| CoreError::validation(e.to_string()))?;
        meta.insert(META_KEY.to_string(), record);
        index
            .put_mapping(index_name, json!({ "_meta": meta }))
            .await?;
        Ok(())
    }

    /// Checks if a version has been applied.
    #[must_use]
    pub fn is_applied(&self, version: MigrationVersion) -> bool {
        self.applied.iter().any(|m| m.version == version)
    }

    /// Highest applied version, 0 if none.
    #[must_use]
    pub fn current_version(&self) -> MigrationVersion {
        self.applied.iter().map(|m| m.version).max().unwrap_or(0)
    }

    /// Applied migrations, in application order.
    pub fn applied(&self) -> &[AppliedMigration] {
        &self.applied
    }

    /// Records a migration as applied.
    pub fn record(&mut self, version: MigrationVersion, name: &str) {
        if !self.is_applied(version) {
            self.applied.push(AppliedMigration {
                version,
                name: name.to_string(),
                applied_at: Utc::now(),
            });
        }
    }
}

/// Manages index migrations.
pub struct MigrationManager {
    migrations: BTreeMap<MigrationVersion, Box<dyn Migration>>,
}

impl Default for MigrationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationManager {
    /// Creates an empty migration manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            migrations: BTreeMap::new(),
        }
    }

    /// Registers a migration.
    ///
    /// Returns an error if a migration with the same version already exists.
    pub fn register(&mut self, migration: Box<dyn Migration>) -> CoreResult<()> {
        let version = migration.version();
        if self.migrations.contains_key(&version) {
            return Err(CoreError::config(format!(
                "migration version {version} already registered"
            )));
        }
        self.migrations.insert(version, migration);
        Ok(())
    }

    /// Returns list of registered migrations.
    #[must_use]
    pub fn list(&self) -> Vec<MigrationInfo> {
        self.migrations.values().map(|m| info_of(m.as_ref())).collect()
    }

    /// Returns migrations not yet applied, in ascending order.
    #[must_use]
    pub fn pending(&self, state: &MigrationState) -> Vec<MigrationInfo> {
        self.migrations
            .values()
            .filter(|m| !state.is_applied(m.version()))
            .map(|m| info_of(m.as_ref()))
            .collect()
    }

    /// Validates that migrations are sequential with no gaps.
    pub fn validate(&self) -> CoreResult<()> {
        for (i, version) in self.migrations.keys().enumerate() {
            let expected = (i + 1) as u64;
            if *version != expected {
                return Err(CoreError::config(format!(
                    "migration version gap: expected {expected}, got {version}"
                )));
            }
        }
        Ok(())
    }

    /// Runs all pending migrations in ascending order, saving the history
    /// after each one. Stops at the first failure.
    pub async fn run_pending(
        &self,
        ctx: &MigrationContext,
        state: &mut MigrationState,
    ) -> CoreResult<MigrationRunResult> {
        let mut run = MigrationRunResult::default();

        for (version, migration) in &self.migrations {
            if state.is_applied(*version) {
                continue;
            }

            let applied = async {
                migration.up(ctx).await?;
                state.record(*version, migration.name());
                state.save(ctx.index.as_ref(), &ctx.index_name).await
            }
            .instrument(ctx.span.clone())
            .await;

            match applied {
                Ok(()) => {
                    info!(parent: &ctx.span, version, name = migration.name(), "migration applied");
                    run.migrations.push(MigrationResult {
                        version: *version,
                        name: migration.name().to_string(),
                        error: None,
                    });
                }
                Err(e) => {
                    run.migrations.push(MigrationResult {
                        version: *version,
                        name: migration.name().to_string(),
                        error: Some(e.to_string()),
                    });
                    break;
                }
            }
        }

        run.final_version = state.current_version();
        Ok(run)
    }
}

fn info_of(migration: &dyn Migration) -> MigrationInfo {
    MigrationInfo {
        version: migration.version(),
        name: migration.name().to_string(),
        description: migration.description().map(String::from),
    }
}

impl std::fmt::Debug for MigrationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationManager")
            .field("migrations", &self.list())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_index::MemoryIndex;
    use parking_lot::Mutex;

    struct Recording {
        version: MigrationVersion,
        log: Arc<Mutex<Vec<MigrationVersion>>>,
        fail: bool,
    }

    #[async_trait]
    impl Migration for Recording {
        fn version(&self) -> MigrationVersion {
            self.version
        }

        fn name(&self) -> &str {
            "recording"
        }

        async fn up(&self, _ctx: &MigrationContext) -> CoreResult<()> {
            self.log.lock().push(self.version);
            if self.fail {
                Err(CoreError::validation("boom"))
            } else {
                Ok(())
            }
        }
    }

    fn manager(versions: &[(MigrationVersion, bool)]) -> (MigrationManager, Arc<Mutex<Vec<u64>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut manager = MigrationManager::new();
        // Registered out of order on purpose.
        for &(version, fail) in versions.iter().rev() {
            manager
                .register(Box::new(Recording {
                    version,
                    log: Arc::clone(&log),
                    fail,
                }))
                .unwrap();
        }
        (manager, log)
    }

    async fn context() -> MigrationContext {
        let index = Arc::new(MemoryIndex::new());
        index.create_index("products").await.unwrap();
        MigrationContext::new(index, "products")
    }

    #[tokio::test]
    async fn runs_in_ascending_order_once() {
        let (manager, log) = manager(&[(1, false), (2, false), (3, false)]);
        let ctx = context().await;

        let mut state = MigrationState::load(ctx.index.as_ref(), "products").await.unwrap();
        let run = manager.run_pending(&ctx, &mut state).await.unwrap();
        assert_eq!(run.applied_count(), 3);
        assert_eq!(run.final_version, 3);
        assert_eq!(*log.lock(), vec![1, 2, 3]);

        // A fresh load sees the persisted record and runs nothing.
        let mut state = MigrationState::load(ctx.index.as_ref(), "products").await.unwrap();
        assert_eq!(state.current_version(), 3);
        let run = manager.run_pending(&ctx, &mut state).await.unwrap();
        assert_eq!(run.applied_count(), 0);
        assert_eq!(log.lock().len(), 3);
    }

    #[tokio::test]
    async fn stops_at_first_failure() {
        let (manager, log) = manager(&[(1, false), (2, true), (3, false)]);
        let ctx = context().await;
        let mut state = MigrationState::new();

        let run = manager.run_pending(&ctx, &mut state).await.unwrap();
        let failure = run.failure().unwrap();
        assert_eq!(failure.version, 2);
        assert!(failure.error.as_ref().unwrap().contains("boom"));
        assert_eq!(run.final_version, 1);
        assert_eq!(*log.lock(), vec![1, 2]);
        assert!(manager.pending(&state).iter().any(|m| m.version == 3));
    }

    #[tokio::test]
    async fn save_keeps_other_meta_keys() {
        let ctx = context().await;
        ctx.put_mapping(json!({"_meta": {"owner": "catalog"}})).await.unwrap();

        let mut state = MigrationState::new();
        state.record(1, "first");
        state.save(ctx.index.as_ref(), "products").await.unwrap();

        let mapping = ctx.index.get_mapping("products").await.unwrap();
        assert_eq!(mapping["_meta"]["owner"], "catalog");
        assert_eq!(mapping["_meta"][META_KEY][0]["name"], "first");
    }

    #[test]
    fn rejects_duplicates_and_gaps() {
        let (mut manager, log) = manager(&[(1, false), (3, false)]);
        assert!(manager.validate().is_err());

        let duplicate = Recording {
            version: 1,
            log,
            fail: false,
        };
        assert!(manager.register(Box::new(duplicate)).is_err());
    }
}
