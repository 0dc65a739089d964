//! Conflict repository implementation

use crate::db::{LibSqlOutboxRepository, OutboxRepository};
use crate::error::{Error, Result};
use crate::models::{ConflictId, ConflictRecord, MutationId, Payload, ResolutionStrategy};
use libsql::{params, Connection, Row};

const CONFLICT_COLUMNS: &str = "id, mutation_id, table_name, record_id, local_snapshot, \
     server_snapshot, detected_at, resolved_at, resolution_strategy";

/// Trait for conflict storage operations (async)
#[allow(async_fn_in_trait)]
pub trait ConflictRepository {
    /// Persist a conflict unless one is already open for the same record
    ///
    /// Returns the open conflict for `(table, record_id)` either way.
    async fn create(
        &self,
        mutation_id: &MutationId,
        table: &str,
        record_id: &str,
        local_snapshot: &Payload,
        server_snapshot: &Payload,
        now_ms: i64,
    ) -> Result<ConflictRecord>;

    /// Record a conflict and move its mutation `Pending -> ConflictPending`
    /// in one transaction.
    ///
    /// Returns `None`, writing nothing, when the mutation is no longer
    /// pending.
    async fn raise(
        &self,
        mutation_id: &MutationId,
        table: &str,
        record_id: &str,
        local_snapshot: &Payload,
        server_snapshot: &Payload,
        now_ms: i64,
    ) -> Result<Option<ConflictRecord>>;

    /// Get a conflict by ID
    async fn get(&self, id: &ConflictId) -> Result<Option<ConflictRecord>>;

    /// Open conflicts, oldest first
    async fn list_unresolved(&self) -> Result<Vec<ConflictRecord>>;

    /// Resolved conflicts, most recent first
    async fn list_resolved(&self, limit: usize) -> Result<Vec<ConflictRecord>>;

    /// Close a conflict and confirm its mutation in one transaction
    async fn resolve(
        &self,
        id: &ConflictId,
        strategy: ResolutionStrategy,
        now_ms: i64,
    ) -> Result<ConflictRecord>;
}

/// libSQL implementation of `ConflictRepository`
pub struct LibSqlConflictRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlConflictRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_conflict(row: &Row) -> Result<ConflictRecord> {
        let id: String = row.get(0)?;
        let mutation_id: String = row.get(1)?;
        let local_snapshot: String = row.get(4)?;
        let server_snapshot: String = row.get(5)?;
        let strategy: Option<String> = row.get(8)?;

        Ok(ConflictRecord {
            id: id
                .parse()
                .map_err(|_| Error::Database(format!("Invalid conflict ID: {id}")))?,
            mutation_id: mutation_id
                .parse()
                .map_err(|_| Error::Database(format!("Invalid mutation ID: {mutation_id}")))?,
            table: row.get(2)?,
            record_id: row.get(3)?,
            local_snapshot: serde_json::from_str(&local_snapshot)?,
            server_snapshot: serde_json::from_str(&server_snapshot)?,
            detected_at: row.get(6)?,
            resolved_at: row.get(7)?,
            resolution_strategy: strategy
                .map(|raw| raw.parse().map_err(Error::Database))
                .transpose()?,
        })
    }

    async fn query_conflicts(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<ConflictRecord>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut conflicts = Vec::new();
        while let Some(row) = rows.next().await? {
            conflicts.push(Self::parse_conflict(&row)?);
        }
        Ok(conflicts)
    }

    async fn open_for(&self, table: &str, record_id: &str) -> Result<Option<ConflictRecord>> {
        let sql = format!(
            "SELECT {CONFLICT_COLUMNS} FROM sync_conflicts
             WHERE table_name = ? AND record_id = ? AND resolved_at IS NULL"
        );
        let mut conflicts = self
            .query_conflicts(&sql, params![table, record_id])
            .await?;
        Ok(conflicts.pop())
    }
}

impl ConflictRepository for LibSqlConflictRepository<'_> {
    async fn create(
        &self,
        mutation_id: &MutationId,
        table: &str,
        record_id: &str,
        local_snapshot: &Payload,
        server_snapshot: &Payload,
        now_ms: i64,
    ) -> Result<ConflictRecord> {
        // The partial unique index turns a second detection into a no-op
        self.conn
            .execute(
                "INSERT OR IGNORE INTO sync_conflicts
                    (id, mutation_id, table_name, record_id, local_snapshot,
                     server_snapshot, detected_at, resolved_at, resolution_strategy)
                 VALUES (?, ?, ?, ?, ?, ?, ?, NULL, NULL)",
                params![
                    ConflictId::new().as_str(),
                    mutation_id.as_str(),
                    table,
                    record_id,
                    serde_json::to_string(local_snapshot)?,
                    serde_json::to_string(server_snapshot)?,
                    now_ms
                ],
            )
            .await?;

        self.open_for(table, record_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("open conflict for {table}/{record_id}")))
    }

    async fn raise(
        &self,
        mutation_id: &MutationId,
        table: &str,
        record_id: &str,
        local_snapshot: &Payload,
        server_snapshot: &Payload,
        now_ms: i64,
    ) -> Result<Option<ConflictRecord>> {
        let tx = self.conn.transaction().await?;
        match LibSqlOutboxRepository::new(&tx)
            .mark_conflict_pending(mutation_id, now_ms)
            .await
        {
            Ok(()) => {}
            // Dropping `tx` rolls back
            Err(Error::InvalidTransition { .. } | Error::NotFound(_)) => return Ok(None),
            Err(error) => return Err(error),
        }

        let conflict = LibSqlConflictRepository::new(&tx)
            .create(
                mutation_id,
                table,
                record_id,
                local_snapshot,
                server_snapshot,
                now_ms,
            )
            .await?;
        tx.commit().await?;
        Ok(Some(conflict))
    }

    async fn get(&self, id: &ConflictId) -> Result<Option<ConflictRecord>> {
        let sql = format!("SELECT {CONFLICT_COLUMNS} FROM sync_conflicts WHERE id = ?");
        let mut conflicts = self.query_conflicts(&sql, params![id.as_str()]).await?;
        Ok(conflicts.pop())
    }

    async fn list_unresolved(&self) -> Result<Vec<ConflictRecord>> {
        let sql = format!(
            "SELECT {CONFLICT_COLUMNS} FROM sync_conflicts
             WHERE resolved_at IS NULL
             ORDER BY detected_at ASC"
        );
        self.query_conflicts(&sql, ()).await
    }

    #[allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT
    async fn list_resolved(&self, limit: usize) -> Result<Vec<ConflictRecord>> {
        let sql = format!(
            "SELECT {CONFLICT_COLUMNS} FROM sync_conflicts
             WHERE resolved_at IS NOT NULL
             ORDER BY resolved_at DESC
             LIMIT ?"
        );
        self.query_conflicts(&sql, params![limit as i64]).await
    }

    async fn resolve(
        &self,
        id: &ConflictId,
        strategy: ResolutionStrategy,
        now_ms: i64,
    ) -> Result<ConflictRecord> {
        let conflict = self
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("conflict {id}")))?;
        if conflict.is_resolved() {
            return Ok(conflict);
        }

        let tx = self.conn.transaction().await?;
        tx.execute(
            "UPDATE sync_conflicts
             SET resolved_at = ?1, resolution_strategy = ?2
             WHERE id = ?3 AND resolved_at IS NULL",
            params![now_ms, strategy.as_str(), id.as_str()],
        )
        .await?;
        // Resolution is the one path back to Synced that is not an attempt
        tx.execute(
            "UPDATE outbox
             SET status = 'synced', last_error = NULL, updated_at = ?1, synced_at = ?1
             WHERE id = ?2 AND status IN ('conflict_pending', 'pending')",
            params![now_ms, conflict.mutation_id.as_str()],
        )
        .await?;
        tx.commit().await?;

        self.get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("conflict {id}")))
    }
}
