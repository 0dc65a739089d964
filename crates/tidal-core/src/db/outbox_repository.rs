//! Mutation outbox repository implementation

use crate::error::{Error, Result};
use crate::models::{
    record_id_from_payload, MutationId, MutationOperation, MutationRecord, MutationStatus,
    Payload, UPDATED_AT_FIELD,
};
use crate::taxonomy::ClassifiedError;
use crate::util::rfc3339_from_millis;
use libsql::{params, Connection, Row};

const MUTATION_COLUMNS: &str = "id, operation, table_name, record_id, payload, status, \
     attempt_count, last_error, created_at, updated_at, next_attempt_at, synced_at";

/// Trait for outbox storage operations (async)
///
/// Every method is a single committed statement or transaction, so a
/// returned `Ok` means the change survives a restart.
#[allow(async_fn_in_trait)]
pub trait OutboxRepository {
    /// Append a new pending mutation
    ///
    /// A payload without `updated_at` is stamped with `now_ms` so the
    /// conflict check always has a local edit time to compare.
    async fn enqueue(
        &self,
        operation: MutationOperation,
        table: &str,
        payload: &Payload,
        now_ms: i64,
    ) -> Result<MutationRecord>;

    /// Get a mutation by ID
    async fn get(&self, id: &MutationId) -> Result<Option<MutationRecord>>;

    /// Pending and conflict-pending mutations, oldest first
    async fn list_pending(&self) -> Result<Vec<MutationRecord>>;

    /// Mutations with the given status, oldest first
    async fn list_by_status(&self, status: MutationStatus, limit: usize)
        -> Result<Vec<MutationRecord>>;

    /// Number of mutations still waiting to be sent
    async fn pending_count(&self) -> Result<usize>;

    /// Pending -> Synced after a successful remote write
    async fn mark_synced(&self, id: &MutationId, now_ms: i64) -> Result<()>;

    /// Pending -> Failed (terminal)
    async fn mark_failed(&self, id: &MutationId, error: &ClassifiedError, now_ms: i64)
        -> Result<()>;

    /// Pending -> ConflictPending
    async fn mark_conflict_pending(&self, id: &MutationId, now_ms: i64) -> Result<()>;

    /// Stay Pending, count the attempt and gate the next one
    async fn record_retry(
        &self,
        id: &MutationId,
        error: &ClassifiedError,
        next_attempt_at: i64,
        now_ms: i64,
    ) -> Result<()>;

    /// Delete synced mutations confirmed before `older_than_ms`
    async fn purge_synced(&self, older_than_ms: i64) -> Result<usize>;

    /// Delete a failed mutation
    async fn discard_failed(&self, id: &MutationId) -> Result<()>;

    /// Replace a failed mutation with a fresh pending copy
    async fn requeue_failed(&self, id: &MutationId, now_ms: i64) -> Result<MutationRecord>;
}

/// libSQL implementation of `OutboxRepository`
pub struct LibSqlOutboxRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlOutboxRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a mutation from a database row
    fn parse_mutation(row: &Row) -> Result<MutationRecord> {
        let id: String = row.get(0)?;
        let operation: String = row.get(1)?;
        let payload: String = row.get(4)?;
        let status: String = row.get(5)?;
        let attempt_count: i64 = row.get(6)?;
        let last_error: Option<String> = row.get(7)?;

        Ok(MutationRecord {
            id: id
                .parse()
                .map_err(|_| Error::Database(format!("Invalid mutation ID: {id}")))?,
            operation: operation.parse().map_err(Error::Database)?,
            table: row.get(2)?,
            record_id: row.get(3)?,
            payload: serde_json::from_str(&payload)?,
            status: status.parse().map_err(Error::Database)?,
            attempt_count: u32::try_from(attempt_count).unwrap_or(u32::MAX),
            last_error: last_error
                .map(|raw| serde_json::from_str(&raw))
                .transpose()?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
            next_attempt_at: row.get(10)?,
            synced_at: row.get(11)?,
        })
    }

    async fn query_mutations(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<MutationRecord>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut mutations = Vec::new();
        while let Some(row) = rows.next().await? {
            mutations.push(Self::parse_mutation(&row)?);
        }
        Ok(mutations)
    }

    /// Explain why a guarded UPDATE touched no rows
    async fn rejected_transition(&self, id: &MutationId, to: MutationStatus) -> Error {
        match self.get(id).await {
            Ok(Some(current)) => Error::InvalidTransition {
                id: id.to_string(),
                from: current.status,
                to,
            },
            Ok(None) => Error::NotFound(format!("mutation {id}")),
            Err(error) => error,
        }
    }

    async fn insert_pending(
        conn: &Connection,
        id: &MutationId,
        operation: MutationOperation,
        table: &str,
        record_id: &str,
        payload: &Payload,
        now_ms: i64,
    ) -> Result<()> {
        // created_at doubles as the FIFO key, so it must strictly increase
        conn.execute(
            "INSERT INTO outbox (id, operation, table_name, record_id, payload, status,
                                 attempt_count, last_error, created_at, updated_at,
                                 next_attempt_at, synced_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'pending', 0, NULL,
                     MAX(?6, COALESCE((SELECT MAX(created_at) FROM outbox), 0) + 1),
                     ?6, 0, NULL)",
            params![
                id.as_str(),
                operation.as_str(),
                table,
                record_id,
                serde_json::to_string(payload)?,
                now_ms
            ],
        )
        .await?;
        Ok(())
    }
}

impl OutboxRepository for LibSqlOutboxRepository<'_> {
    async fn enqueue(
        &self,
        operation: MutationOperation,
        table: &str,
        payload: &Payload,
        now_ms: i64,
    ) -> Result<MutationRecord> {
        let table = table.trim();
        if table.is_empty() {
            return Err(Error::InvalidInput("Table name cannot be empty".into()));
        }
        let record_id = record_id_from_payload(payload)
            .ok_or_else(|| Error::InvalidInput("Payload must carry an `id` field".into()))?;

        let mut payload = payload.clone();
        if !payload.contains_key(UPDATED_AT_FIELD) {
            payload.insert(
                UPDATED_AT_FIELD.to_string(),
                serde_json::Value::String(rfc3339_from_millis(now_ms)),
            );
        }

        let id = MutationId::new();
        Self::insert_pending(self.conn, &id, operation, table, &record_id, &payload, now_ms)
            .await?;

        self.get(&id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("mutation {id}")))
    }

    async fn get(&self, id: &MutationId) -> Result<Option<MutationRecord>> {
        let sql = format!("SELECT {MUTATION_COLUMNS} FROM outbox WHERE id = ?");
        let mut mutations = self.query_mutations(&sql, params![id.as_str()]).await?;
        Ok(mutations.pop())
    }

    async fn list_pending(&self) -> Result<Vec<MutationRecord>> {
        let sql = format!(
            "SELECT {MUTATION_COLUMNS} FROM outbox
             WHERE status IN ('pending', 'conflict_pending')
             ORDER BY created_at ASC"
        );
        self.query_mutations(&sql, ()).await
    }

    #[allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT
    async fn list_by_status(
        &self,
        status: MutationStatus,
        limit: usize,
    ) -> Result<Vec<MutationRecord>> {
        let sql = format!(
            "SELECT {MUTATION_COLUMNS} FROM outbox
             WHERE status = ?
             ORDER BY created_at ASC
             LIMIT ?"
        );
        self.query_mutations(&sql, params![status.as_str(), limit as i64])
            .await
    }

    async fn pending_count(&self) -> Result<usize> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM outbox WHERE status = 'pending'", ())
            .await?;
        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        Ok(usize::try_from(count).unwrap_or_default())
    }

    async fn mark_synced(&self, id: &MutationId, now_ms: i64) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE outbox
                 SET status = 'synced', attempt_count = attempt_count + 1,
                     last_error = NULL, updated_at = ?1, synced_at = ?1
                 WHERE id = ?2 AND status = 'pending'",
                params![now_ms, id.as_str()],
            )
            .await?;

        if rows == 0 {
            return Err(self.rejected_transition(id, MutationStatus::Synced).await);
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: &MutationId,
        error: &ClassifiedError,
        now_ms: i64,
    ) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE outbox
                 SET status = 'failed', attempt_count = attempt_count + 1,
                     last_error = ?1, updated_at = ?2
                 WHERE id = ?3 AND status = 'pending'",
                params![serde_json::to_string(error)?, now_ms, id.as_str()],
            )
            .await?;

        if rows == 0 {
            return Err(self.rejected_transition(id, MutationStatus::Failed).await);
        }
        Ok(())
    }

    async fn mark_conflict_pending(&self, id: &MutationId, now_ms: i64) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE outbox
                 SET status = 'conflict_pending', attempt_count = attempt_count + 1,
                     updated_at = ?1
                 WHERE id = ?2 AND status = 'pending'",
                params![now_ms, id.as_str()],
            )
            .await?;

        if rows == 0 {
            return Err(self
                .rejected_transition(id, MutationStatus::ConflictPending)
                .await);
        }
        Ok(())
    }

    async fn record_retry(
        &self,
        id: &MutationId,
        error: &ClassifiedError,
        next_attempt_at: i64,
        now_ms: i64,
    ) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE outbox
                 SET attempt_count = attempt_count + 1, last_error = ?1,
                     next_attempt_at = ?2, updated_at = ?3
                 WHERE id = ?4 AND status = 'pending'",
                params![
                    serde_json::to_string(error)?,
                    next_attempt_at,
                    now_ms,
                    id.as_str()
                ],
            )
            .await?;

        if rows == 0 {
            return Err(self.rejected_transition(id, MutationStatus::Pending).await);
        }
        Ok(())
    }

    async fn purge_synced(&self, older_than_ms: i64) -> Result<usize> {
        let rows = self
            .conn
            .execute(
                "DELETE FROM outbox WHERE status = 'synced' AND synced_at < ?",
                params![older_than_ms],
            )
            .await?;
        Ok(usize::try_from(rows).unwrap_or(usize::MAX))
    }

    async fn discard_failed(&self, id: &MutationId) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "DELETE FROM outbox WHERE id = ? AND status = 'failed'",
                params![id.as_str()],
            )
            .await?;

        if rows == 0 {
            return match self.get(id).await? {
                Some(current) => Err(Error::InvalidInput(format!(
                    "Mutation {id} is {}; only failed mutations can be discarded",
                    current.status
                ))),
                None => Err(Error::NotFound(format!("mutation {id}"))),
            };
        }
        Ok(())
    }

    async fn requeue_failed(&self, id: &MutationId, now_ms: i64) -> Result<MutationRecord> {
        let failed = self
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("mutation {id}")))?;
        if failed.status != MutationStatus::Failed {
            return Err(Error::InvalidInput(format!(
                "Mutation {id} is {}; only failed mutations can be requeued",
                failed.status
            )));
        }

        let replacement = MutationId::new();
        let tx = self.conn.transaction().await?;
        Self::insert_pending(
            &tx,
            &replacement,
            failed.operation,
            &failed.table,
            &failed.record_id,
            &failed.payload,
            now_ms,
        )
        .await?;
        tx.execute(
            "DELETE FROM outbox WHERE id = ? AND status = 'failed'",
            params![id.as_str()],
        )
        .await?;
        tx.commit().await?;

        self.get(&replacement)
            .await?
            .ok_or_else(|| Error::NotFound(format!("mutation {replacement}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::taxonomy::{ErrorCategory, RemoteError};
    use serde_json::json;

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn payload(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    fn server_error() -> ClassifiedError {
        RemoteError::http(503, "unavailable").classify()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_enqueue_and_get() {
        let db = setup().await;
        let repo = LibSqlOutboxRepository::new(db.connection());

        let record = repo
            .enqueue(
                MutationOperation::Insert,
                "recipes",
                &payload(json!({"id": "r1", "title": "Soup"})),
                1_000,
            )
            .await
            .unwrap();

        assert_eq!(record.status, MutationStatus::Pending);
        assert_eq!(record.record_id, "r1");
        assert_eq!(record.attempt_count, 0);
        assert_eq!(record.created_at, 1_000);

        let fetched = repo.get(&record.id).await.unwrap().unwrap();
        assert_eq!(fetched, record);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_enqueue_stamps_missing_updated_at() {
        let db = setup().await;
        let repo = LibSqlOutboxRepository::new(db.connection());

        let stamped = repo
            .enqueue(
                MutationOperation::Update,
                "recipes",
                &payload(json!({"id": "r1", "title": "Soup"})),
                1_714_564_800_250,
            )
            .await
            .unwrap();
        assert_eq!(
            stamped.payload.get(UPDATED_AT_FIELD),
            Some(&json!("2024-05-01T12:00:00.250Z"))
        );
        assert_eq!(stamped.payload.get("title"), Some(&json!("Soup")));

        let explicit = repo
            .enqueue(
                MutationOperation::Update,
                "recipes",
                &payload(json!({"id": "r2", "updated_at": "2020-01-01T00:00:00Z"})),
                1_714_564_800_250,
            )
            .await
            .unwrap();
        assert_eq!(
            explicit.payload.get(UPDATED_AT_FIELD),
            Some(&json!("2020-01-01T00:00:00Z"))
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_enqueue_rejects_missing_id() {
        let db = setup().await;
        let repo = LibSqlOutboxRepository::new(db.connection());

        let error = repo
            .enqueue(
                MutationOperation::Insert,
                "recipes",
                &payload(json!({"title": "Soup"})),
                1,
            )
            .await
            .unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_created_at_strictly_increases() {
        let db = setup().await;
        let repo = LibSqlOutboxRepository::new(db.connection());

        let mut previous = i64::MIN;
        for index in 0..5 {
            let record = repo
                .enqueue(
                    MutationOperation::Update,
                    "workouts",
                    &payload(json!({"id": format!("w{index}")})),
                    500,
                )
                .await
                .unwrap();
            assert!(record.created_at > previous);
            previous = record.created_at;
        }

        let pending = repo.list_pending().await.unwrap();
        let ids: Vec<_> = pending.iter().map(|m| m.record_id.clone()).collect();
        assert_eq!(ids, vec!["w0", "w1", "w2", "w3", "w4"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_terminal_status_is_final() {
        let db = setup().await;
        let repo = LibSqlOutboxRepository::new(db.connection());

        let record = repo
            .enqueue(
                MutationOperation::Delete,
                "posts",
                &payload(json!({"id": 7})),
                10,
            )
            .await
            .unwrap();

        repo.mark_synced(&record.id, 20).await.unwrap();
        let synced = repo.get(&record.id).await.unwrap().unwrap();
        assert_eq!(synced.status, MutationStatus::Synced);
        assert_eq!(synced.attempt_count, 1);
        assert_eq!(synced.synced_at, Some(20));

        let error = repo
            .mark_failed(&record.id, &server_error(), 30)
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            Error::InvalidTransition {
                from: MutationStatus::Synced,
                to: MutationStatus::Failed,
                ..
            }
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_retry_keeps_pending_and_records_error() {
        let db = setup().await;
        let repo = LibSqlOutboxRepository::new(db.connection());

        let record = repo
            .enqueue(
                MutationOperation::Insert,
                "recipes",
                &payload(json!({"id": "r1"})),
                10,
            )
            .await
            .unwrap();

        repo.record_retry(&record.id, &server_error(), 5_000, 20)
            .await
            .unwrap();

        let retried = repo.get(&record.id).await.unwrap().unwrap();
        assert_eq!(retried.status, MutationStatus::Pending);
        assert_eq!(retried.attempt_count, 1);
        assert_eq!(retried.next_attempt_at, 5_000);
        assert_eq!(
            retried.last_error.map(|error| error.category),
            Some(ErrorCategory::Server)
        );
        assert_eq!(repo.pending_count().await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_conflict_pending_listed_but_not_counted() {
        let db = setup().await;
        let repo = LibSqlOutboxRepository::new(db.connection());

        let record = repo
            .enqueue(
                MutationOperation::Update,
                "recipes",
                &payload(json!({"id": "r1"})),
                10,
            )
            .await
            .unwrap();
        repo.mark_conflict_pending(&record.id, 11).await.unwrap();

        assert_eq!(repo.pending_count().await.unwrap(), 0);
        let pending = repo.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].status, MutationStatus::ConflictPending);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_purge_synced_respects_cutoff() {
        let db = setup().await;
        let repo = LibSqlOutboxRepository::new(db.connection());

        let old = repo
            .enqueue(MutationOperation::Insert, "a", &payload(json!({"id": 1})), 1)
            .await
            .unwrap();
        let recent = repo
            .enqueue(MutationOperation::Insert, "a", &payload(json!({"id": 2})), 2)
            .await
            .unwrap();
        repo.mark_synced(&old.id, 100).await.unwrap();
        repo.mark_synced(&recent.id, 900).await.unwrap();

        assert_eq!(repo.purge_synced(500).await.unwrap(), 1);
        assert!(repo.get(&old.id).await.unwrap().is_none());
        assert!(repo.get(&recent.id).await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_requeue_and_discard_failed() {
        let db = setup().await;
        let repo = LibSqlOutboxRepository::new(db.connection());

        let first = repo
            .enqueue(MutationOperation::Insert, "a", &payload(json!({"id": 1})), 1)
            .await
            .unwrap();
        let second = repo
            .enqueue(MutationOperation::Insert, "a", &payload(json!({"id": 2})), 2)
            .await
            .unwrap();
        let validation = RemoteError::http(403, "forbidden").classify();
        repo.mark_failed(&first.id, &validation, 3).await.unwrap();
        repo.mark_failed(&second.id, &validation, 3).await.unwrap();

        let replacement = repo.requeue_failed(&first.id, 50).await.unwrap();
        assert_ne!(replacement.id, first.id);
        assert_eq!(replacement.status, MutationStatus::Pending);
        assert_eq!(replacement.payload, first.payload);
        assert!(replacement.created_at > second.created_at);
        assert!(repo.get(&first.id).await.unwrap().is_none());

        repo.discard_failed(&second.id).await.unwrap();
        assert!(repo.get(&second.id).await.unwrap().is_none());

        let error = repo.discard_failed(&replacement.id).await.unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));
    }
}
