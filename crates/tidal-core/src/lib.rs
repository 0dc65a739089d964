//! tidal-core - Core library for Tidal
//!
//! This crate contains the offline-first sync core used by Tidal clients:
//! the durable mutation outbox, the conflict store, the network monitor,
//! the error taxonomy and the sync engine that ties them together.

pub mod cache;
pub mod config;
pub mod conflicts;
pub mod db;
pub mod error;
pub mod models;
pub mod network;
pub mod outbox;
pub mod remote;
pub mod services;
pub mod state;
pub mod sync;
pub mod taxonomy;
pub mod util;

pub use error::{Error, Result};
pub use models::{
    ConflictId, ConflictRecord, MutationId, MutationOperation, MutationRecord, MutationStatus,
    Payload, ResolutionStrategy,
};
pub use services::SyncService;
pub use state::SyncState;
pub use sync::SyncResult;
