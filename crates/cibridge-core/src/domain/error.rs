//! Error taxonomy for cibridge-core.

use std::path::PathBuf;

use cibridge_gateway::GatewayError;

/// cibridge core errors.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Referenced job, build, trigger or artifact does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Network or timeout failure talking to the CI server.
    #[error("transient CI failure: {0}")]
    Transient(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The ledger file exists but cannot be read back.
    #[error("ledger store {} is corrupt: {reason}", .path.display())]
    StoreCorrupt { path: PathBuf, reason: String },

    /// Internal-consistency violation such as a duplicate trigger id.
    #[error("internal consistency fault: {0}")]
    ConcurrencyFault(String),

    /// CI server refused the request or answered with something unusable.
    #[error("CI server error: {0}")]
    Gateway(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Whether invoking the same operation again may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, BridgeError::Transient(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BridgeError::NotFound(_))
    }
}

impl From<GatewayError> for BridgeError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotFound(what) => BridgeError::NotFound(what),
            GatewayError::Transient(msg) => BridgeError::Transient(msg),
            GatewayError::Config(msg) => BridgeError::Config(msg),
            other @ (GatewayError::Rejected { .. } | GatewayError::Decode(_)) => {
                BridgeError::Gateway(other.to_string())
            }
        }
    }
}

/// Result type for cibridge core operations.
pub type Result<T> = std::result::Result<T, BridgeError>;
