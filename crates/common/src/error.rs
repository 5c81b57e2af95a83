//! Error types for Towerlink

use thiserror::Error;

/// Result type alias using Towerlink Error
pub type Result<T> = std::result::Result<T, Error>;

/// Towerlink error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Public key not allowed: {fingerprint}")]
    Unauthorized { fingerprint: String },

    #[error("Resource not found: {kind} with id {id}")]
    NotFound { kind: String, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("No available network blocks in 10.5.x.0/24 range")]
    NoBlockAvailable,

    #[error("No allocatable address left in {block}")]
    NoAddressAvailable { block: String },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Tunnel driver error: {0}")]
    Driver(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Node is not configured, run `towerlink init` first")]
    NotConfigured,

    #[error("Operation requires a {expected} node, this node is a {actual}")]
    WrongRole { expected: String, actual: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for the allocator's capacity errors
    pub fn is_allocation_exhausted(&self) -> bool {
        matches!(self, Error::NoBlockAvailable | Error::NoAddressAvailable { .. })
    }

    /// True when the failure came from reading or writing persisted state
    pub fn is_persistence_failure(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Serialization(_))
    }
}

impl From<ed25519_dalek::SignatureError> for Error {
    fn from(e: ed25519_dalek::SignatureError) -> Self {
        Error::Crypto(e.to_string())
    }
}

impl From<ipnetwork::IpNetworkError> for Error {
    fn from(e: ipnetwork::IpNetworkError) -> Self {
        Error::InvalidAddress(e.to_string())
    }
}
