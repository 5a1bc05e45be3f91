//! Node configuration.

use crate::error::{CoreError, CoreResult};
use catalog_snapshot::{duration_secs, ReplicationConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Default exchange carrying mutation requests.
pub const DEFAULT_MUTATION_EXCHANGE: &str = "catalog.mutations";

/// Role of a node, fixed at process start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeMode {
    /// Sole writer, no replication.
    #[default]
    Standalone,
    /// Sole writer that serves snapshots to replicas.
    Master,
    /// Bootstraps from a master and follows its mutations.
    Replica,
}

impl NodeMode {
    /// Returns the mode name.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeMode::Standalone => "standalone",
            NodeMode::Master => "master",
            NodeMode::Replica => "replica",
        }
    }

    /// Returns true if the node owns the mutation queue and replies.
    pub fn is_writer(&self) -> bool {
        matches!(self, NodeMode::Standalone | NodeMode::Master)
    }

    /// Returns true if the mode needs a replication section.
    pub fn needs_replication(&self) -> bool {
        matches!(self, NodeMode::Master | NodeMode::Replica)
    }
}

impl std::fmt::Display for NodeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standalone" => Ok(NodeMode::Standalone),
            "master" => Ok(NodeMode::Master),
            "replica" => Ok(NodeMode::Replica),
            other => Err(CoreError::config(format!(
                "unknown mode {other:?}, expected standalone, master or replica"
            ))),
        }
    }
}

/// Configuration of one catalog node.
///
/// # Example
///
/// ```toml
/// mode = "master"
/// index_name = "products"
/// reply_timeout_secs = 10
///
/// [replication]
/// host = "10.0.0.4"
/// min_port = 7400
/// max_port = 7410
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Role of this node.
    pub mode: NodeMode,
    /// Concrete index holding the catalog. Required.
    pub index_name: String,
    /// Exchange mutation requests are published on.
    pub mutation_exchange: String,
    /// How long a caller waits for the writer's reply.
    #[serde(rename = "reply_timeout_secs", with = "duration_secs")]
    pub reply_timeout: Duration,
    /// Snapshot replication settings; required for master and replica.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replication: Option<ReplicationConfig>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            mode: NodeMode::Standalone,
            index_name: String::new(),
            mutation_exchange: DEFAULT_MUTATION_EXCHANGE.to_string(),
            reply_timeout: Duration::from_secs(30),
            replication: None,
        }
    }
}

impl CatalogConfig {
    /// Creates a standalone configuration for `index_name`.
    pub fn new(index_name: impl Into<String>) -> Self {
        Self {
            index_name: index_name.into(),
            ..Self::default()
        }
    }

    /// Sets the node mode.
    #[must_use]
    pub fn with_mode(mut self, mode: NodeMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the mutation exchange.
    #[must_use]
    pub fn with_mutation_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.mutation_exchange = exchange.into();
        self
    }

    /// Sets the reply timeout.
    #[must_use]
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Sets the replication settings.
    #[must_use]
    pub fn with_replication(mut self, replication: ReplicationConfig) -> Self {
        self.replication = Some(replication);
        self
    }

    /// Parses a TOML document and validates it.
    pub fn from_toml_str(source: &str) -> CoreResult<Self> {
        let config: Self = toml::from_str(source).map_err(|e| CoreError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> CoreResult<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Renders the configuration as TOML.
    pub fn to_toml_string(&self) -> CoreResult<String> {
        toml::to_string(self).map_err(|e| CoreError::config(e.to_string()))
    }

    /// Checks the configuration.
    pub fn validate(&self) -> CoreResult<()> {
        validate_index_name(&self.index_name)?;
        if self.mutation_exchange.trim().is_empty() {
            return Err(CoreError::config("mutation_exchange must not be empty"));
        }
        if self.reply_timeout.is_zero() {
            return Err(CoreError::config("reply_timeout_secs must be positive"));
        }
        match (&self.replication, self.mode.needs_replication()) {
            (None, true) => Err(CoreError::config(format!(
                "mode {} requires a [replication] section",
                self.mode
            ))),
            (Some(replication), _) => replication
                .validate()
                .map_err(|e| CoreError::config(e.to_string())),
            (None, false) => Ok(()),
        }
    }
}

/// Index names follow the search server's rules: lowercase, no path or
/// wildcard characters, no leading `-`, `_` or `+`.
fn validate_index_name(name: &str) -> CoreResult<()> {
    if name.is_empty() {
        return Err(CoreError::config("index_name is required"));
    }
    if name == "." || name == ".." {
        return Err(CoreError::config(format!("invalid index name {name:?}")));
    }
    if name.starts_with(['-', '_', '+']) {
        return Err(CoreError::config(format!(
            "index name {name:?} must not start with '-', '_' or '+'"
        )));
    }
    if let Some(c) = name.chars().find(|c| {
        c.is_uppercase() || c.is_whitespace() || "\\/*?\"<>|,#:".contains(*c)
    }) {
        return Err(CoreError::config(format!(
            "index name {name:?} contains invalid character {c:?}"
        )));
    }
    Ok(())
}
