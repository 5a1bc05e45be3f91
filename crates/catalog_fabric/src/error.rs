//! Error types for the messaging fabric.

use std::time::Duration;
use thiserror::Error;

/// Result type for fabric operations.
pub type FabricResult<T> = Result<T, FabricError>;

/// Errors that can occur on the messaging fabric.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FabricError {
    /// Another consumer already owns the exclusive queue of the exchange.
    #[error("exchange {0} already has an exclusive consumer")]
    ExclusiveConsumerBusy(String),

    /// No reply arrived within the timeout.
    #[error("no reply on {exchange} within {timeout:?}")]
    Timeout {
        /// Exchange the request was published on.
        exchange: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// A message expected to carry a reply address had none.
    #[error("message {0} has no reply address")]
    NoReplyAddress(String),

    /// The fabric or a subscription was closed.
    #[error("fabric closed")]
    Closed,

    /// The fabric could not be reached.
    #[error("fabric unreachable: {0}")]
    Unreachable(String),
}

impl FabricError {
    /// Returns true if this is a request/reply timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, FabricError::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_classification() {
        let err = FabricError::Timeout {
            exchange: "catalog.mutations".into(),
            timeout: Duration::from_secs(1),
        };
        assert!(err.is_timeout());
        assert!(err.to_string().contains("catalog.mutations"));
        assert!(!FabricError::Closed.is_timeout());
    }
}
