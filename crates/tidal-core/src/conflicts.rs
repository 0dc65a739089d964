//! Conflict detection and the durable conflict store.

use crate::config::ConflictPolicy;
use crate::db::{ConflictRepository, LibSqlConflictRepository, SharedDatabase};
use crate::models::{
    ConflictId, ConflictRecord, MutationId, Payload, ResolutionStrategy, UPDATED_AT_FIELD,
};
use crate::util::{parse_timestamp, unix_millis_now};
use crate::Result;

/// Last-writer check: the remote copy changed after the local edit.
///
/// A missing or unparseable timestamp on either side never reports a
/// conflict.
pub fn detect_conflict(local: &Payload, server: &Payload) -> bool {
    let local = local.get(UPDATED_AT_FIELD).and_then(parse_timestamp);
    let server = server.get(UPDATED_AT_FIELD).and_then(parse_timestamp);
    matches!((local, server), (Some(local), Some(server)) if server > local)
}

/// Apply the configured policy.
pub fn detect_conflict_with(policy: &ConflictPolicy, local: &Payload, server: &Payload) -> bool {
    match policy {
        ConflictPolicy::Timestamp => detect_conflict(local, server),
        ConflictPolicy::VersionField(field) => {
            let local = local.get(field).and_then(serde_json::Value::as_i64);
            let server = server.get(field).and_then(serde_json::Value::as_i64);
            matches!((local, server), (Some(local), Some(server)) if server > local)
        }
    }
}

/// Durable store of detected conflicts awaiting resolution.
#[derive(Clone)]
pub struct ConflictStore {
    db: SharedDatabase,
}

impl ConflictStore {
    pub const fn new(db: SharedDatabase) -> Self {
        Self { db }
    }

    /// Record a conflict for `(table, record_id)` and park its mutation.
    ///
    /// Both writes commit together under one lock. Returns `None` when the
    /// mutation already left `Pending`; the already-open conflict is
    /// returned when the record has one.
    pub async fn raise_conflict(
        &self,
        mutation_id: &MutationId,
        table: &str,
        record_id: &str,
        local: &Payload,
        server: &Payload,
    ) -> Result<Option<ConflictRecord>> {
        let db = self.db.lock().await;
        let raised = LibSqlConflictRepository::new(db.connection())
            .raise(mutation_id, table, record_id, local, server, unix_millis_now())
            .await?;
        if let Some(conflict) = &raised {
            tracing::warn!(
                "Conflict {} on {table}/{record_id} (mutation {mutation_id})",
                conflict.id
            );
        }
        Ok(raised)
    }

    pub async fn get(&self, id: &ConflictId) -> Result<Option<ConflictRecord>> {
        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection()).get(id).await
    }

    pub async fn list_unresolved(&self) -> Result<Vec<ConflictRecord>> {
        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection())
            .list_unresolved()
            .await
    }

    pub async fn list_resolved(&self, limit: usize) -> Result<Vec<ConflictRecord>> {
        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection())
            .list_resolved(limit)
            .await
    }

    /// Close the conflict and confirm its originating mutation.
    ///
    /// Callers perform any remote write before this; the close itself is a
    /// single transaction and a no-op on an already resolved conflict.
    pub async fn mark_resolved(
        &self,
        id: &ConflictId,
        strategy: ResolutionStrategy,
    ) -> Result<ConflictRecord> {
        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection())
            .resolve(id, strategy, unix_millis_now())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn newer_server_timestamp_is_a_conflict() {
        let local = payload(json!({"updated_at": "2024-03-01T10:00:00Z"}));
        let server = payload(json!({"updated_at": "2024-03-01T10:00:01Z"}));
        assert!(detect_conflict(&local, &server));
        assert!(!detect_conflict(&server, &local));
    }

    #[test]
    fn equal_timestamps_are_not_a_conflict() {
        let local = payload(json!({"updated_at": 1_700_000_000_000_i64}));
        let server = payload(json!({"updated_at": "2023-11-14T22:13:20Z"}));
        assert!(!detect_conflict(&local, &server));
    }

    #[test]
    fn missing_timestamp_is_never_a_conflict() {
        let stamped = payload(json!({"updated_at": "2024-03-01T10:00:00Z"}));
        let bare = payload(json!({"id": "r1"}));
        let garbage = payload(json!({"updated_at": "yesterday"}));
        assert!(!detect_conflict(&bare, &stamped));
        assert!(!detect_conflict(&stamped, &bare));
        assert!(!detect_conflict(&stamped, &garbage));
    }

    #[test]
    fn version_policy_compares_counters() {
        let policy = ConflictPolicy::VersionField("version".to_string());
        let local = payload(json!({"version": 4, "updated_at": "2030-01-01T00:00:00Z"}));
        let server = payload(json!({"version": 5, "updated_at": "2020-01-01T00:00:00Z"}));
        assert!(detect_conflict_with(&policy, &local, &server));
        assert!(!detect_conflict_with(&ConflictPolicy::Timestamp, &local, &server));
    }
}
