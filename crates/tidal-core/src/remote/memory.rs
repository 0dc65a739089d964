//! In-process remote store with fault injection.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::{RemoteResult, RemoteStore};
use crate::models::{record_id_from_payload, Payload};
use crate::taxonomy::{ErrorCategory, RemoteError, NO_ROWS_CODE, UNIQUE_VIOLATION_CODE};

/// Operation kinds, used to target injected faults and count calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    Insert,
    Update,
    Delete,
    Get,
}

#[derive(Default)]
struct State {
    tables: HashMap<String, BTreeMap<String, Payload>>,
    faults: HashMap<RemoteOp, VecDeque<RemoteError>>,
    calls: HashMap<RemoteOp, usize>,
    unreachable: bool,
    latency: Option<Duration>,
}

/// Remote store backed by a map, shared between clones.
///
/// Behaves like PostgREST: duplicate inserts fail with `23505`, updates and
/// deletes of missing rows fail with `PGRST116`.
#[derive(Clone, Default)]
pub struct MemoryRemoteStore {
    state: Arc<Mutex<State>>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Put a record directly, bypassing faults and counters.
    pub fn seed(&self, table: &str, payload: Payload) {
        if let Some(record_id) = record_id_from_payload(&payload) {
            self.lock()
                .tables
                .entry(table.to_string())
                .or_default()
                .insert(record_id, payload);
        }
    }

    pub fn record(&self, table: &str, record_id: &str) -> Option<Payload> {
        self.lock()
            .tables
            .get(table)
            .and_then(|rows| rows.get(record_id))
            .cloned()
    }

    pub fn len(&self, table: &str) -> usize {
        self.lock().tables.get(table).map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }

    /// Fail the next `op` call with `error`. Faults queue up per operation.
    pub fn fail_next(&self, op: RemoteOp, error: RemoteError) {
        self.lock().faults.entry(op).or_default().push_back(error);
    }

    /// Fail every call with a network error until cleared.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Sleep before answering each call.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.lock().latency = latency;
    }

    /// Number of calls made for `op`, including failed ones.
    pub fn calls(&self, op: RemoteOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or_default()
    }

    async fn begin(&self, op: RemoteOp) -> RemoteResult<()> {
        let latency = {
            let mut state = self.lock();
            *state.calls.entry(op).or_default() += 1;
            state.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        if state.unreachable {
            return Err(RemoteError::categorized(
                ErrorCategory::Network,
                "network unreachable",
            ));
        }
        match state.faults.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn missing(table: &str, record_id: &str) -> RemoteError {
    RemoteError::http(404, format!("{table}/{record_id} does not exist")).with_code(NO_ROWS_CODE)
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn insert(&self, table: &str, payload: &Payload) -> RemoteResult<Payload> {
        self.begin(RemoteOp::Insert).await?;
        let record_id = record_id_from_payload(payload)
            .ok_or_else(|| RemoteError::http(400, "payload is missing an id"))?;

        let mut state = self.lock();
        let rows = state.tables.entry(table.to_string()).or_default();
        if rows.contains_key(&record_id) {
            return Err(RemoteError::http(
                409,
                format!("duplicate key value violates unique constraint on {table}"),
            )
            .with_code(UNIQUE_VIOLATION_CODE));
        }
        rows.insert(record_id, payload.clone());
        Ok(payload.clone())
    }

    async fn update(
        &self,
        table: &str,
        record_id: &str,
        payload: &Payload,
    ) -> RemoteResult<Payload> {
        self.begin(RemoteOp::Update).await?;
        let mut state = self.lock();
        let row = state
            .tables
            .get_mut(table)
            .and_then(|rows| rows.get_mut(record_id))
            .ok_or_else(|| missing(table, record_id))?;
        for (field, value) in payload {
            row.insert(field.clone(), value.clone());
        }
        Ok(row.clone())
    }

    async fn delete(&self, table: &str, record_id: &str) -> RemoteResult<()> {
        self.begin(RemoteOp::Delete).await?;
        self.lock()
            .tables
            .get_mut(table)
            .and_then(|rows| rows.remove(record_id))
            .map(|_| ())
            .ok_or_else(|| missing(table, record_id))
    }

    async fn get_by_id(&self, table: &str, record_id: &str) -> RemoteResult<Option<Payload>> {
        self.begin(RemoteOp::Get).await?;
        Ok(self.record(table, record_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn duplicate_insert_is_a_unique_violation() {
        let store = MemoryRemoteStore::new();
        let row = payload(json!({"id": "a", "title": "x"}));
        store.insert("posts", &row).await.unwrap();

        let error = store.insert("posts", &row).await.unwrap_err().classify();
        assert!(error.is_unique_violation());
        assert_eq!(store.len("posts"), 1);
        assert_eq!(store.calls(RemoteOp::Insert), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_merges_fields_and_delete_reports_missing() {
        let store = MemoryRemoteStore::new();
        store.seed("posts", payload(json!({"id": "a", "title": "x", "likes": 1})));

        let updated = store
            .update("posts", "a", &payload(json!({"id": "a", "title": "y"})))
            .await
            .unwrap();
        assert_eq!(updated.get("likes"), Some(&json!(1)));
        assert_eq!(updated.get("title"), Some(&json!("y")));

        store.delete("posts", "a").await.unwrap();
        let error = store.delete("posts", "a").await.unwrap_err().classify();
        assert!(error.is_not_found());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn injected_faults_fire_once() {
        let store = MemoryRemoteStore::new();
        store.fail_next(RemoteOp::Get, RemoteError::http(503, "busy"));

        assert!(store.get_by_id("posts", "a").await.is_err());
        assert_eq!(store.get_by_id("posts", "a").await.unwrap(), None);

        store.set_unreachable(true);
        let error = store.get_by_id("posts", "a").await.unwrap_err().classify();
        assert_eq!(error.category, ErrorCategory::Network);
    }
}
