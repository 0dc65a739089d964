//! Database layer for Tidal

mod asset_repository;
mod conflict_repository;
mod connection;
mod migrations;
mod outbox_repository;

use std::sync::Arc;
use tokio::sync::Mutex;

pub use asset_repository::{AssetRepository, LibSqlAssetRepository};
pub use conflict_repository::{ConflictRepository, LibSqlConflictRepository};
pub use connection::Database;
pub use outbox_repository::{LibSqlOutboxRepository, OutboxRepository};

/// Handle shared by the outbox, conflict store and asset cache
pub type SharedDatabase = Arc<Mutex<Database>>;
