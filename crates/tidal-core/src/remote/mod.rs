//! Remote data-store contract and its implementations.
//!
//! Everything that talks to the hosted backend fails with [`RemoteError`],
//! which the sync engine classifies the moment it crosses into the core.

mod memory;
mod postgrest;

use async_trait::async_trait;

use crate::models::Payload;
use crate::taxonomy::RemoteError;

pub use memory::{MemoryRemoteStore, RemoteOp};
pub use postgrest::PostgrestRemoteStore;

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Per-table record operations offered by the backend.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Create a record. An existing key is reported as a uniqueness violation.
    async fn insert(&self, table: &str, payload: &Payload) -> RemoteResult<Payload>;

    /// Overwrite the fields of an existing record.
    async fn update(&self, table: &str, record_id: &str, payload: &Payload)
        -> RemoteResult<Payload>;

    /// Remove a record. A missing record is reported as not found.
    async fn delete(&self, table: &str, record_id: &str) -> RemoteResult<()>;

    /// Current remote copy, or `None` when it does not exist.
    async fn get_by_id(&self, table: &str, record_id: &str) -> RemoteResult<Option<Payload>>;
}
