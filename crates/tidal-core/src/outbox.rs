//! Durable mutation outbox shared by domain code and the sync engine.

use crate::db::{LibSqlOutboxRepository, OutboxRepository, SharedDatabase};
use crate::models::{MutationId, MutationOperation, MutationRecord, MutationStatus, Payload};
use crate::taxonomy::ClassifiedError;
use crate::util::unix_millis_now;
use crate::Result;

/// Ordered queue of not-yet-confirmed writes.
///
/// Every call takes the database lock for its whole duration, so each
/// operation is atomic with respect to other outbox and conflict calls.
#[derive(Clone)]
pub struct Outbox {
    db: SharedDatabase,
}

impl Outbox {
    pub const fn new(db: SharedDatabase) -> Self {
        Self { db }
    }

    /// Append a `Pending` mutation and return its id.
    pub async fn enqueue(
        &self,
        operation: MutationOperation,
        table: &str,
        payload: Payload,
    ) -> Result<MutationId> {
        let db = self.db.lock().await;
        let repo = LibSqlOutboxRepository::new(db.connection());
        let record = repo
            .enqueue(operation, table, &payload, unix_millis_now())
            .await?;
        tracing::debug!(
            "Enqueued {} {}/{} as {}",
            record.operation,
            record.table,
            record.record_id,
            record.id
        );
        Ok(record.id)
    }

    pub async fn get(&self, id: &MutationId) -> Result<Option<MutationRecord>> {
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection()).get(id).await
    }

    /// `Pending` and `ConflictPending` records in enqueue order.
    pub async fn list_pending(&self) -> Result<Vec<MutationRecord>> {
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection())
            .list_pending()
            .await
    }

    pub async fn list_by_status(
        &self,
        status: MutationStatus,
        limit: usize,
    ) -> Result<Vec<MutationRecord>> {
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection())
            .list_by_status(status, limit)
            .await
    }

    pub async fn pending_count(&self) -> Result<usize> {
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection())
            .pending_count()
            .await
    }

    pub async fn mark_synced(&self, id: &MutationId) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection())
            .mark_synced(id, unix_millis_now())
            .await
    }

    pub async fn mark_failed(&self, id: &MutationId, error: &ClassifiedError) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection())
            .mark_failed(id, error, unix_millis_now())
            .await
    }

    /// Keep the record `Pending` but hold it back until `next_attempt_at`.
    pub async fn record_retry(
        &self,
        id: &MutationId,
        error: &ClassifiedError,
        next_attempt_at: i64,
    ) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection())
            .record_retry(id, error, next_attempt_at, unix_millis_now())
            .await
    }

    /// Delete `Synced` records confirmed before `older_than_ms`.
    pub async fn purge_synced(&self, older_than_ms: i64) -> Result<usize> {
        let db = self.db.lock().await;
        let removed = LibSqlOutboxRepository::new(db.connection())
            .purge_synced(older_than_ms)
            .await?;
        if removed > 0 {
            tracing::info!("Purged {removed} synced mutations");
        }
        Ok(removed)
    }

    pub async fn discard_failed(&self, id: &MutationId) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlOutboxRepository::new(db.connection())
            .discard_failed(id)
            .await
    }

    /// Queue a fresh copy of a failed mutation; returns the new id.
    pub async fn requeue_failed(&self, id: &MutationId) -> Result<MutationId> {
        let db = self.db.lock().await;
        let record = LibSqlOutboxRepository::new(db.connection())
            .requeue_failed(id, unix_millis_now())
            .await?;
        tracing::info!("Requeued failed mutation {id} as {}", record.id);
        Ok(record.id)
    }
}
