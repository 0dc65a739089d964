//! Error types for tidal-core

use thiserror::Error;

use crate::models::MutationStatus;
use crate::taxonomy::ClassifiedError;

/// Result type alias using tidal-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tidal-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Mutation, conflict or asset not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Status change rejected because the record is not in an allowed state
    #[error("Mutation {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: MutationStatus,
        to: MutationStatus,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Classified failure reported by the remote store
    #[error("Remote error ({}): {}", .0.category, .0.message)]
    Remote(ClassifiedError),

    /// Wait deadline elapsed
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Asset cache/object storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// A coalesced sync pass failed; the message is relayed from the pass owner
    #[error("Sync failed: {0}")]
    Sync(String),
}

impl From<ClassifiedError> for Error {
    fn from(error: ClassifiedError) -> Self {
        Self::Remote(error)
    }
}
