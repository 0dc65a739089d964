//! Sync engine: drains the outbox against the remote store.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::stream::{self, StreamExt};
use tokio::sync::watch;

use super::SyncResult;
use crate::config::SyncConfig;
use crate::conflicts::{detect_conflict_with, ConflictStore};
use crate::models::{
    ConflictId, ConflictRecord, MutationOperation, MutationRecord, MutationStatus,
    ResolutionStrategy, UPDATED_AT_FIELD,
};
use crate::network::NetworkMonitor;
use crate::outbox::Outbox;
use crate::remote::{RemoteResult, RemoteStore};
use crate::state::SyncState;
use crate::taxonomy::{retry_delay, should_retry, ClassifiedError, ErrorCategory, RemoteError};
use crate::util::{rfc3339_now, unix_millis_now};
use crate::{Error, Result};

/// How one mutation left the pass.
#[derive(Debug, PartialEq, Eq)]
enum ItemOutcome {
    Synced,
    Conflict,
    /// Moved out of `Pending` by another writer mid-attempt
    Superseded,
    Retried(String),
    Failed(String),
}

#[derive(Default)]
struct Coordinator {
    next_ticket: u64,
    running: bool,
}

/// Latest finished pass, published to coalesced waiters.
#[derive(Clone, Default)]
struct Completed {
    covered: u64,
    outcome: Option<std::result::Result<SyncResult, String>>,
}

struct EngineInner {
    outbox: Outbox,
    conflicts: ConflictStore,
    remote: Arc<dyn RemoteStore>,
    network: NetworkMonitor,
    config: SyncConfig,
    coordinator: Mutex<Coordinator>,
    completed: watch::Sender<Completed>,
    shutdown: watch::Sender<bool>,
    state: watch::Sender<SyncState>,
    passes: AtomicU64,
}

/// Orchestrates outbox draining. Cheap to clone.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

/// Releases the pass slot if the leading trigger is dropped mid-run.
struct LeaderGuard<'a> {
    inner: &'a EngineInner,
    armed: bool,
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let covered = {
            let mut coordinator = self
                .inner
                .coordinator
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            coordinator.running = false;
            coordinator.next_ticket
        };
        self.inner.completed.send_replace(Completed {
            covered,
            outcome: Some(Err("sync pass aborted".to_string())),
        });
        self.inner.state.send_replace(SyncState::Error);
    }
}

impl SyncEngine {
    pub fn new(
        outbox: Outbox,
        conflicts: ConflictStore,
        remote: Arc<dyn RemoteStore>,
        network: NetworkMonitor,
        config: SyncConfig,
    ) -> Self {
        let (completed, _) = watch::channel(Completed::default());
        let (shutdown, _) = watch::channel(false);
        let (state, _) = watch::channel(SyncState::Synced);
        Self {
            inner: Arc::new(EngineInner {
                outbox,
                conflicts,
                remote,
                network,
                config,
                coordinator: Mutex::new(Coordinator::default()),
                completed,
                shutdown,
                state,
                passes: AtomicU64::new(0),
            }),
        }
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.inner.network
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Current engine state; `Offline` whenever the monitor says so.
    pub fn state(&self) -> SyncState {
        if self.inner.network.is_online() {
            *self.inner.state.borrow()
        } else {
            SyncState::Offline
        }
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.inner.state.subscribe()
    }

    /// Number of passes that ran to completion or error.
    pub fn completed_passes(&self) -> u64 {
        self.inner.passes.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    /// Abort running passes and refuse new ones.
    ///
    /// In-flight items are dropped before their status transition, so they
    /// stay `Pending`.
    pub fn shutdown(&self) {
        if !self.inner.shutdown.send_replace(true) {
            tracing::info!("Sync engine shutting down");
        }
    }

    /// Request a pass and wait for one that covers this request.
    ///
    /// If a pass is already running, the request is coalesced with every
    /// other request that arrives meanwhile into a single follow-up pass.
    pub async fn trigger_sync(&self) -> Result<SyncResult> {
        let (ticket, lead, mut completed) = {
            let mut coordinator = self
                .inner
                .coordinator
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            coordinator.next_ticket += 1;
            let lead = !coordinator.running;
            coordinator.running = true;
            (
                coordinator.next_ticket,
                lead,
                self.inner.completed.subscribe(),
            )
        };

        if lead {
            return self.lead_passes().await;
        }

        tracing::debug!("Sync already running; coalescing trigger #{ticket}");
        let done = completed
            .wait_for(|done| done.covered >= ticket && done.outcome.is_some())
            .await
            .map_err(|_| Error::Sync("sync engine dropped".to_string()))?;
        match done.outcome.clone() {
            Some(Ok(result)) => Ok(result),
            Some(Err(message)) => Err(Error::Sync(message)),
            None => Err(Error::Sync("sync pass produced no result".to_string())),
        }
    }

    async fn lead_passes(&self) -> Result<SyncResult> {
        let mut guard = LeaderGuard {
            inner: &self.inner,
            armed: true,
        };
        let mut first: Option<Result<SyncResult>> = None;

        loop {
            let covered = self
                .inner
                .coordinator
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .next_ticket;

            let outcome = self.run_once().await;
            self.inner.passes.fetch_add(1, Ordering::SeqCst);
            let shared = match &outcome {
                Ok(result) => Ok(result.clone()),
                Err(error) => Err(error.to_string()),
            };

            let (finished, covered) = {
                let mut coordinator = self
                    .inner
                    .coordinator
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                let finished = coordinator.next_ticket == covered || self.is_shut_down();
                if finished {
                    // After shutdown no follow-up runs, so this answers everyone
                    coordinator.running = false;
                    (true, coordinator.next_ticket)
                } else {
                    (false, covered)
                }
            };
            self.inner.completed.send_replace(Completed {
                covered,
                outcome: Some(shared),
            });

            first.get_or_insert(outcome);
            if finished {
                guard.armed = false;
                break;
            }
            tracing::debug!("Running follow-up sync pass for coalesced triggers");
        }

        first.unwrap_or_else(|| Err(Error::Sync("sync pass did not run".to_string())))
    }

    /// Run exactly one pass over the outbox.
    ///
    /// Per-item failures are recorded in the result; only local storage
    /// failures and shutdown surface as `Err`.
    pub async fn run_once(&self) -> Result<SyncResult> {
        if self.is_shut_down() {
            return Err(Error::Sync("sync engine is shut down".to_string()));
        }
        if !self.inner.network.is_online() {
            tracing::debug!("Offline; skipping sync pass");
            self.inner.state.send_replace(SyncState::Offline);
            return Ok(SyncResult::default());
        }

        self.inner.state.send_replace(SyncState::Syncing);
        let mut shutdown = self.inner.shutdown.subscribe();

        let outcome = tokio::select! {
            outcome = self.drain() => outcome,
            _ = shutdown.wait_for(|stopped| *stopped) => {
                tracing::warn!("Sync pass aborted; in-flight mutations stay pending");
                Err(Error::Sync("sync pass aborted".to_string()))
            }
        };

        let state = match &outcome {
            Ok(result) if result.errors.is_empty() => SyncState::Synced,
            _ => SyncState::Error,
        };
        self.inner.state.send_replace(state);
        outcome
    }

    async fn drain(&self) -> Result<SyncResult> {
        let pending = self.inner.outbox.list_pending().await?;
        if pending.is_empty() {
            return Ok(SyncResult::default());
        }

        let lanes = group_lanes(pending);
        let now = unix_millis_now();
        tracing::debug!("Draining {} record lanes", lanes.len());

        let outcomes: Vec<Result<SyncResult>> = stream::iter(
            lanes
                .into_iter()
                .map(|lane| self.process_lane(lane, now)),
        )
        .buffer_unordered(self.inner.config.concurrency.max(1))
        .collect()
        .await;

        let mut result = SyncResult::default();
        for outcome in outcomes {
            result.merge(outcome?);
        }

        tracing::info!("Sync pass finished: {result}");
        Ok(result)
    }

    async fn process_lane(&self, lane: Vec<MutationRecord>, now: i64) -> Result<SyncResult> {
        let mut result = SyncResult::default();

        for record in lane {
            if record.status == MutationStatus::ConflictPending {
                tracing::debug!(
                    "{}/{} waits on an open conflict",
                    record.table,
                    record.record_id
                );
                break;
            }
            if !record.is_due(now) {
                break;
            }

            match self.process_record(&record).await? {
                ItemOutcome::Synced => result.synced += 1,
                ItemOutcome::Failed(message) => {
                    result.failed += 1;
                    result.errors.push(message);
                }
                ItemOutcome::Conflict => {
                    result.conflicts += 1;
                    break;
                }
                ItemOutcome::Superseded => break,
                ItemOutcome::Retried(message) => {
                    result.retried += 1;
                    result.errors.push(message);
                    break;
                }
            }
        }

        Ok(result)
    }

    async fn process_record(&self, record: &MutationRecord) -> Result<ItemOutcome> {
        let remote = &self.inner.remote;
        tracing::debug!(
            "Syncing {} {}/{} (attempt {})",
            record.operation,
            record.table,
            record.record_id,
            record.attempt_count + 1
        );

        match record.operation {
            MutationOperation::Insert => {
                match self
                    .call(remote.insert(&record.table, &record.payload))
                    .await
                {
                    Ok(_) => self.finish_synced(record).await,
                    // Already applied by an earlier attempt
                    Err(error) if error.is_unique_violation() => self.apply_update(record).await,
                    Err(error) => self.finish_failure(record, error).await,
                }
            }
            MutationOperation::Update => self.apply_update(record).await,
            MutationOperation::Delete => {
                match self
                    .call(remote.delete(&record.table, &record.record_id))
                    .await
                {
                    Ok(()) => self.finish_synced(record).await,
                    Err(error) if error.is_not_found() => self.finish_synced(record).await,
                    Err(error) => self.finish_failure(record, error).await,
                }
            }
        }
    }

    async fn apply_update(&self, record: &MutationRecord) -> Result<ItemOutcome> {
        let remote = &self.inner.remote;
        let server = match self
            .call(remote.get_by_id(&record.table, &record.record_id))
            .await
        {
            Ok(server) => server,
            Err(error) => return self.finish_failure(record, error).await,
        };

        if let Some(server) = server {
            if detect_conflict_with(&self.inner.config.conflict_policy, &record.payload, &server)
            {
                let raised = self
                    .inner
                    .conflicts
                    .raise_conflict(
                        &record.id,
                        &record.table,
                        &record.record_id,
                        &record.payload,
                        &server,
                    )
                    .await?;
                if raised.is_none() {
                    tracing::debug!(
                        "Mutation {} left pending before its conflict was recorded",
                        record.id
                    );
                    return Ok(ItemOutcome::Superseded);
                }
                return Ok(ItemOutcome::Conflict);
            }
        }

        match self
            .call(remote.update(&record.table, &record.record_id, &record.payload))
            .await
        {
            Ok(_) => self.finish_synced(record).await,
            Err(error) => self.finish_failure(record, error).await,
        }
    }

    async fn finish_synced(&self, record: &MutationRecord) -> Result<ItemOutcome> {
        self.inner.outbox.mark_synced(&record.id).await?;
        Ok(ItemOutcome::Synced)
    }

    async fn finish_failure(
        &self,
        record: &MutationRecord,
        error: ClassifiedError,
    ) -> Result<ItemOutcome> {
        let attempt = record.attempt_count + 1;
        let message = format!(
            "{} {}/{}: {error}",
            record.operation, record.table, record.record_id
        );

        if error.retryable && should_retry(error.category, attempt, self.inner.config.max_attempts)
        {
            let delay = retry_delay(record.attempt_count, self.inner.config.base_delay());
            let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
            let next_attempt_at = unix_millis_now().saturating_add(delay_ms);
            self.inner
                .outbox
                .record_retry(&record.id, &error, next_attempt_at)
                .await?;
            tracing::warn!(
                "Retrying {message} in {delay_ms} ms (attempt {attempt}/{})",
                self.inner.config.max_attempts
            );
            return Ok(ItemOutcome::Retried(message));
        }

        self.inner.outbox.mark_failed(&record.id, &error).await?;
        tracing::warn!("Mutation {} failed permanently: {message}", record.id);
        Ok(ItemOutcome::Failed(message))
    }

    /// Bound a remote call by the configured deadline and classify failures.
    async fn call<T>(
        &self,
        request: impl Future<Output = RemoteResult<T>>,
    ) -> std::result::Result<T, ClassifiedError> {
        let limit = self.inner.config.remote_timeout();
        match tokio::time::timeout(limit, request).await {
            Ok(outcome) => outcome.map_err(RemoteError::classify),
            Err(_) => Err(RemoteError::categorized(
                ErrorCategory::Timeout,
                format!("remote call exceeded {} ms", limit.as_millis()),
            )
            .classify()),
        }
    }

    /// Settle an open conflict.
    ///
    /// `UseLocal` rewrites the remote record from the stored local snapshot
    /// with a fresh `updated_at`; `UseServer` keeps the remote copy. Both
    /// then close the conflict and confirm the held mutation. Safe to call
    /// again after an interruption.
    pub async fn resolve_conflict(
        &self,
        id: &ConflictId,
        strategy: ResolutionStrategy,
    ) -> Result<ConflictRecord> {
        let conflict = self
            .inner
            .conflicts
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("conflict {id}")))?;
        if conflict.is_resolved() {
            return Ok(conflict);
        }

        if strategy == ResolutionStrategy::UseLocal {
            self.push_local_snapshot(&conflict).await?;
        }

        let resolved = self.inner.conflicts.mark_resolved(id, strategy).await?;
        tracing::info!(
            "Resolved conflict {id} on {}/{} with {strategy}",
            resolved.table,
            resolved.record_id
        );
        Ok(resolved)
    }

    async fn push_local_snapshot(&self, conflict: &ConflictRecord) -> Result<()> {
        let remote = &self.inner.remote;
        let mut snapshot = conflict.local_snapshot.clone();
        snapshot.insert(
            UPDATED_AT_FIELD.to_string(),
            serde_json::Value::String(rfc3339_now()),
        );

        match self
            .call(remote.update(&conflict.table, &conflict.record_id, &snapshot))
            .await
        {
            Ok(_) => Ok(()),
            Err(error) if error.is_not_found() => {
                // Deleted remotely since detection: recreate it
                self.call(remote.insert(&conflict.table, &snapshot))
                    .await
                    .map(|_| ())
                    .map_err(Error::Remote)
            }
            Err(error) => Err(Error::Remote(error)),
        }
    }
}

/// Group records by target, keeping enqueue order inside each lane and
/// ordering lanes by their oldest record.
fn group_lanes(records: Vec<MutationRecord>) -> Vec<Vec<MutationRecord>> {
    let mut lanes: Vec<Vec<MutationRecord>> = Vec::new();
    let mut index: HashMap<(String, String), usize> = HashMap::new();

    for record in records {
        let (table, record_id) = record.target_key();
        let key = (table.to_owned(), record_id.to_owned());
        if let Some(&lane) = index.get(&key) {
            lanes[lane].push(record);
        } else {
            index.insert(key, lanes.len());
            lanes.push(vec![record]);
        }
    }
    lanes
}
