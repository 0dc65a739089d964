//! Outbox draining and conflict resolution.

mod engine;
mod worker;

use serde::Serialize;

pub use engine::SyncEngine;
pub use worker::SyncWorker;

/// Aggregate outcome of one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    /// Mutations confirmed by the remote store
    pub synced: usize,
    /// Mutations that reached the terminal `Failed` status
    pub failed: usize,
    /// Conflicts raised during the pass
    pub conflicts: usize,
    /// Mutations left `Pending` for a later attempt
    pub retried: usize,
    /// One line per failed or retried attempt
    pub errors: Vec<String>,
}

impl SyncResult {
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.retried == 0 && self.errors.is_empty()
    }

    fn merge(&mut self, other: Self) {
        self.synced += other.synced;
        self.failed += other.failed;
        self.conflicts += other.conflicts;
        self.retried += other.retried;
        self.errors.extend(other.errors);
    }
}

impl std::fmt::Display for SyncResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "synced {}, failed {}, conflicts {}, retrying {}",
            self.synced, self.failed, self.conflicts, self.retried
        )
    }
}
