//! Background trigger loop for the sync engine.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};

use super::SyncEngine;
use crate::network::ListenerId;

/// Running background trigger loop. Stop it explicitly with [`SyncWorker::stop`];
/// dropping it aborts the loop.
pub struct SyncWorker {
    engine: SyncEngine,
    listener: ListenerId,
    stop: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl SyncEngine {
    /// Run a pass on every offline→online transition and, when
    /// `periodic` is set, on a fixed interval.
    pub fn spawn_background(&self, periodic: Option<Duration>) -> SyncWorker {
        let wake = Arc::new(Notify::new());
        let listener = {
            let wake = Arc::clone(&wake);
            self.network().on_online(move || wake.notify_one())
        };
        let (stop, mut stop_rx) = watch::channel(false);

        let engine = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = periodic.map(|period| {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                ticker
            });

            loop {
                let reason = tokio::select! {
                    _ = stop_rx.wait_for(|stopped| *stopped) => break,
                    () = wake.notified() => "network",
                    () = next_tick(&mut ticker) => "periodic",
                };
                if engine.is_shut_down() {
                    break;
                }

                match engine.trigger_sync().await {
                    Ok(result) => tracing::debug!("Background sync ({reason}): {result}"),
                    Err(error) => tracing::warn!("Background sync ({reason}) failed: {error}"),
                }
            }
            tracing::debug!("Background sync worker stopped");
        });

        SyncWorker {
            engine: self.clone(),
            listener,
            stop,
            handle: Some(handle),
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

impl SyncWorker {
    /// Stop triggering and wait for the loop to exit.
    ///
    /// A pass already in progress runs to completion first.
    pub async fn stop(mut self) {
        self.stop.send_replace(true);
        self.engine.network().remove_listener(self.listener);
        if let Some(handle) = self.handle.take() {
            if let Err(error) = handle.await {
                if !error.is_cancelled() {
                    tracing::warn!("Background sync worker panicked: {error}");
                }
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for SyncWorker {
    fn drop(&mut self) {
        self.engine.network().remove_listener(self.listener);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::conflicts::ConflictStore;
    use crate::db::Database;
    use crate::models::MutationOperation;
    use crate::network::NetworkMonitor;
    use crate::outbox::Outbox;
    use crate::remote::MemoryRemoteStore;
    use serde_json::json;
    use tokio::sync::Mutex;

    async fn setup() -> (SyncEngine, Outbox, MemoryRemoteStore, NetworkMonitor) {
        let db = Arc::new(Mutex::new(Database::open_in_memory().await.unwrap()));
        let outbox = Outbox::new(Arc::clone(&db));
        let remote = MemoryRemoteStore::new();
        let network = NetworkMonitor::default();
        let engine = SyncEngine::new(
            outbox.clone(),
            ConflictStore::new(db),
            Arc::new(remote.clone()),
            network.clone(),
            SyncConfig::default(),
        );
        (engine, outbox, remote, network)
    }

    async fn wait_until_drained(outbox: &Outbox) {
        for _ in 0..100 {
            if outbox.pending_count().await.unwrap() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("outbox was not drained");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn going_online_triggers_a_pass() {
        let (engine, outbox, remote, network) = setup().await;
        outbox
            .enqueue(
                MutationOperation::Insert,
                "posts",
                json!({"id": "a"}).as_object().cloned().unwrap(),
            )
            .await
            .unwrap();

        let worker = engine.spawn_background(None);
        assert!(worker.is_running());

        network.set_online(true);
        wait_until_drained(&outbox).await;
        assert_eq!(remote.len("posts"), 1);

        worker.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn periodic_tick_triggers_a_pass() {
        let (engine, outbox, remote, network) = setup().await;
        network.set_online(true);
        let worker = engine.spawn_background(Some(Duration::from_millis(30)));

        outbox
            .enqueue(
                MutationOperation::Insert,
                "posts",
                json!({"id": "b"}).as_object().cloned().unwrap(),
            )
            .await
            .unwrap();
        wait_until_drained(&outbox).await;
        assert_eq!(remote.len("posts"), 1);

        worker.stop().await;
    }
}
