//! Caller-facing sync service shared across clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::cache::AssetManager;
use crate::config::TidalConfig;
use crate::conflicts::ConflictStore;
use crate::db::{Database, SharedDatabase};
use crate::models::{
    ConflictId, ConflictRecord, MutationId, MutationOperation, MutationRecord, MutationStatus,
    Payload, ResolutionStrategy,
};
use crate::network::NetworkMonitor;
use crate::outbox::Outbox;
use crate::remote::RemoteStore;
use crate::state::SyncState;
use crate::sync::{SyncEngine, SyncResult, SyncWorker};
use crate::util::unix_millis_now;
use crate::{Error, Result};

/// Thread-safe facade over the outbox, conflict store and sync engine.
#[derive(Clone)]
pub struct SyncService {
    db: SharedDatabase,
    db_path: Option<PathBuf>,
    config: TidalConfig,
    outbox: Outbox,
    conflicts: ConflictStore,
    engine: SyncEngine,
    worker: Arc<Mutex<Option<SyncWorker>>>,
}

impl SyncService {
    /// Open a service backed by a database file at `db_path`.
    pub async fn open_path(
        db_path: impl Into<PathBuf>,
        config: TidalConfig,
        remote: Arc<dyn RemoteStore>,
        network: NetworkMonitor,
    ) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::open(&db_path).await?;
        tracing::info!("Opened outbox database at {}", db_path.display());
        Self::from_database(db, Some(db_path), config, remote, network)
    }

    /// Open an in-memory service (primarily for tests).
    pub async fn open_in_memory(
        config: TidalConfig,
        remote: Arc<dyn RemoteStore>,
        network: NetworkMonitor,
    ) -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Self::from_database(db, None, config, remote, network)
    }

    fn from_database(
        db: Database,
        db_path: Option<PathBuf>,
        config: TidalConfig,
        remote: Arc<dyn RemoteStore>,
        network: NetworkMonitor,
    ) -> Result<Self> {
        config.validate().map_err(Error::InvalidInput)?;

        let db = Arc::new(Mutex::new(db));
        let outbox = Outbox::new(Arc::clone(&db));
        let conflicts = ConflictStore::new(Arc::clone(&db));
        let engine = SyncEngine::new(
            outbox.clone(),
            conflicts.clone(),
            remote,
            network,
            config.sync.clone(),
        );

        Ok(Self {
            db,
            db_path,
            config,
            outbox,
            conflicts,
            engine,
            worker: Arc::new(Mutex::new(None)),
        })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    pub const fn config(&self) -> &TidalConfig {
        &self.config
    }

    pub fn network(&self) -> &NetworkMonitor {
        self.engine.network()
    }

    pub const fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    /// Queue a local write for synchronization.
    pub async fn enqueue_mutation(
        &self,
        operation: MutationOperation,
        table: &str,
        payload: Payload,
    ) -> Result<MutationId> {
        self.outbox.enqueue(operation, table, payload).await
    }

    /// Drain the outbox now (coalesced with any pass already running).
    pub async fn trigger_sync(&self) -> Result<SyncResult> {
        self.engine.trigger_sync().await
    }

    /// Mutations still waiting to be sent.
    pub async fn pending_count(&self) -> Result<usize> {
        self.outbox.pending_count().await
    }

    pub async fn get_mutation(&self, id: &MutationId) -> Result<Option<MutationRecord>> {
        self.outbox.get(id).await
    }

    pub async fn list_pending(&self) -> Result<Vec<MutationRecord>> {
        self.outbox.list_pending().await
    }

    pub async fn list_failed(&self, limit: usize) -> Result<Vec<MutationRecord>> {
        self.outbox
            .list_by_status(MutationStatus::Failed, limit)
            .await
    }

    pub async fn discard_failed(&self, id: &MutationId) -> Result<()> {
        self.outbox.discard_failed(id).await
    }

    pub async fn requeue_failed(&self, id: &MutationId) -> Result<MutationId> {
        self.outbox.requeue_failed(id).await
    }

    /// Delete synced mutations confirmed more than `older_than` ago.
    pub async fn purge_synced(&self, older_than: Duration) -> Result<usize> {
        let age_ms = i64::try_from(older_than.as_millis()).unwrap_or(i64::MAX);
        self.outbox
            .purge_synced(unix_millis_now().saturating_sub(age_ms))
            .await
    }

    /// Unresolved conflicts, oldest first.
    pub async fn list_conflicts(&self) -> Result<Vec<ConflictRecord>> {
        self.conflicts.list_unresolved().await
    }

    pub async fn list_resolved_conflicts(&self, limit: usize) -> Result<Vec<ConflictRecord>> {
        self.conflicts.list_resolved(limit).await
    }

    /// Resolve a conflict, then run a follow-up pass so mutations held
    /// behind it can drain.
    ///
    /// The resolution is durable once this returns `Ok`; a failing
    /// follow-up pass is only logged and retried by the next trigger.
    pub async fn resolve_conflict(
        &self,
        id: &ConflictId,
        strategy: ResolutionStrategy,
    ) -> Result<ConflictRecord> {
        let resolved = self.engine.resolve_conflict(id, strategy).await?;

        match self.engine.trigger_sync().await {
            Ok(result) => tracing::debug!("Follow-up sync after resolving {id}: {result}"),
            Err(error) => tracing::warn!("Follow-up sync after resolving {id} failed: {error}"),
        }
        Ok(resolved)
    }

    pub fn sync_state(&self) -> SyncState {
        self.engine.state()
    }

    /// Start network/periodic triggers. Restarts a running worker.
    pub async fn start_background(&self) {
        let mut worker = self.worker.lock().await;
        if let Some(previous) = worker.take() {
            previous.stop().await;
        }
        *worker = Some(
            self.engine
                .spawn_background(self.config.sync.periodic_interval()),
        );
        tracing::info!("Background sync started");
    }

    /// Stop background triggers, abort a running pass and stop network polling.
    pub async fn shutdown(&self) {
        self.engine.shutdown();
        if let Some(worker) = self.worker.lock().await.take() {
            worker.stop().await;
        }
        self.engine.network().stop();
    }

    /// Asset cache sharing this service's database and network monitor.
    pub async fn asset_manager(&self, dir: impl Into<PathBuf>) -> Result<AssetManager> {
        AssetManager::new(
            Arc::clone(&self.db),
            dir,
            &self.config.cache,
            self.engine.network().clone(),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemoteStore;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    async fn service(online: bool) -> (SyncService, MemoryRemoteStore) {
        let remote = MemoryRemoteStore::new();
        let network = NetworkMonitor::default();
        network.set_online(online);
        let service =
            SyncService::open_in_memory(TidalConfig::default(), Arc::new(remote.clone()), network)
                .await
                .unwrap();
        (service, remote)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn enqueue_and_sync_roundtrip() {
        let (service, remote) = service(false).await;
        service
            .enqueue_mutation(
                MutationOperation::Insert,
                "recipes",
                payload(json!({"id": "r1", "title": "Soup"})),
            )
            .await
            .unwrap();
        assert_eq!(service.pending_count().await.unwrap(), 1);
        assert_eq!(service.sync_state(), SyncState::Offline);

        service.network().set_online(true);
        let result = service.trigger_sync().await.unwrap();
        assert_eq!(result.synced, 1);
        assert_eq!(service.pending_count().await.unwrap(), 0);
        assert_eq!(remote.len("recipes"), 1);
        assert_eq!(service.sync_state(), SyncState::Synced);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resolving_drains_held_mutations() {
        let (service, remote) = service(true).await;
        remote.seed(
            "posts",
            payload(json!({"id": "p1", "body": "server", "updated_at": "2024-06-02T00:00:00Z"})),
        );
        service
            .enqueue_mutation(
                MutationOperation::Update,
                "posts",
                payload(json!({"id": "p1", "body": "draft", "updated_at": "2024-06-01T00:00:00Z"})),
            )
            .await
            .unwrap();
        service
            .enqueue_mutation(
                MutationOperation::Delete,
                "posts",
                payload(json!({"id": "p1"})),
            )
            .await
            .unwrap();

        let result = service.trigger_sync().await.unwrap();
        assert_eq!(result.conflicts, 1);
        let conflicts = service.list_conflicts().await.unwrap();
        assert_eq!(conflicts.len(), 1);

        service
            .resolve_conflict(&conflicts[0].id, ResolutionStrategy::UseServer)
            .await
            .unwrap();

        assert!(service.list_conflicts().await.unwrap().is_empty());
        assert_eq!(service.list_resolved_conflicts(5).await.unwrap().len(), 1);
        assert_eq!(service.pending_count().await.unwrap(), 0);
        assert!(remote.record("posts", "p1").is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_mutations_can_be_requeued_or_discarded() {
        let (service, remote) = service(true).await;
        let id = service
            .enqueue_mutation(
                MutationOperation::Update,
                "posts",
                payload(json!({"id": "missing"})),
            )
            .await
            .unwrap();

        let result = service.trigger_sync().await.unwrap();
        assert_eq!(result.failed, 1);
        let failed = service.list_failed(10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, id);

        remote.seed("posts", payload(json!({"id": "missing"})));
        let requeued = service.requeue_failed(&id).await.unwrap();
        assert!(service.get_mutation(&id).await.unwrap().is_none());
        assert_eq!(service.trigger_sync().await.unwrap().synced, 1);
        assert_eq!(
            service.get_mutation(&requeued).await.unwrap().unwrap().status,
            MutationStatus::Synced
        );

        assert_eq!(service.purge_synced(Duration::from_secs(3600)).await.unwrap(), 0);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(service.purge_synced(Duration::ZERO).await.unwrap(), 1);
        assert!(matches!(
            service.discard_failed(&requeued).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn open_path_creates_parent_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("tidal.db");
        let service = SyncService::open_path(
            &path,
            TidalConfig::default(),
            Arc::new(MemoryRemoteStore::new()),
            NetworkMonitor::default(),
        )
        .await
        .unwrap();

        assert!(path.exists());
        assert_eq!(service.db_path(), Some(path.as_path()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn background_worker_stops_on_shutdown() {
        let (service, remote) = service(false).await;
        service.start_background().await;
        service
            .enqueue_mutation(MutationOperation::Insert, "posts", payload(json!({"id": 1})))
            .await
            .unwrap();

        service.network().set_online(true);
        for _ in 0..100 {
            if remote.len("posts") == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(remote.len("posts"), 1);

        service.shutdown().await;
        assert!(service.engine().is_shut_down());
    }
}
