//! Replication configuration.

use crate::error::{SnapshotError, SnapshotResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default control exchange for dump requests.
pub const DEFAULT_EXCHANGE: &str = "catalog.snapshot";

/// Configuration shared by the snapshot server and client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Host the server binds and advertises.
    pub host: String,
    /// Lowest listener port. `0` together with `max_port = 0` lets the OS pick.
    pub min_port: u16,
    /// Highest listener port.
    pub max_port: u16,
    /// Control exchange for dump requests.
    pub exchange: String,
    /// Bound on one whole session, from request to last byte.
    #[serde(rename = "session_timeout_secs", with = "duration_secs")]
    pub session_timeout: Duration,
    /// Bound on waiting for the dump offer.
    #[serde(rename = "request_timeout_secs", with = "duration_secs")]
    pub request_timeout: Duration,
}

impl ReplicationConfig {
    /// Creates a configuration for `host` with listeners in `min_port..=max_port`.
    pub fn new(host: impl Into<String>, min_port: u16, max_port: u16) -> Self {
        Self {
            host: host.into(),
            min_port,
            max_port,
            ..Self::default()
        }
    }

    /// Sets the control exchange.
    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = exchange.into();
        self
    }

    /// Sets the session timeout.
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Sets the dump offer timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Returns true if listeners bind OS-assigned ports.
    pub fn uses_ephemeral_ports(&self) -> bool {
        self.min_port == 0 && self.max_port == 0
    }

    /// Checks the configuration for obvious mistakes.
    pub fn validate(&self) -> SnapshotResult<()> {
        if self.host.trim().is_empty() {
            return Err(SnapshotError::Config("host must not be empty".into()));
        }
        if self.min_port > self.max_port {
            return Err(SnapshotError::Config(format!(
                "min_port {} is greater than max_port {}",
                self.min_port, self.max_port
            )));
        }
        if self.min_port == 0 && self.max_port != 0 {
            return Err(SnapshotError::Config(
                "port range must not start at 0".into(),
            ));
        }
        if self.exchange.is_empty() {
            return Err(SnapshotError::Config("exchange must not be empty".into()));
        }
        if self.session_timeout.is_zero() || self.request_timeout.is_zero() {
            return Err(SnapshotError::Config("timeouts must be positive".into()));
        }
        Ok(())
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            min_port: 7400,
            max_port: 7499,
            exchange: DEFAULT_EXCHANGE.to_string(),
            session_timeout: Duration::from_secs(5 * 60),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Serde adapter storing a [`Duration`] as whole seconds.
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serializes as seconds.
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    /// Deserializes from seconds.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
