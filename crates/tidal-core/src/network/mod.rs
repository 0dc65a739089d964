//! Connectivity tracking.
//!
//! [`NetworkMonitor`] is an owned object: hosts create one, feed it state
//! either directly through [`NetworkMonitor::set_state`] or by starting a
//! polling task over a [`ConnectivityProbe`], and hand clones to whoever
//! needs to observe transitions.

mod probe;

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::models::{ConnectionQuality, NetworkState};
use crate::{Error, Result};

pub use probe::{quality_from_latency, ConnectivityProbe, HttpConnectivityProbe};

/// Handle returned when registering a listener.
pub type ListenerId = u64;

type Callback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: ListenerId,
    online: Vec<(ListenerId, Callback)>,
    offline: Vec<(ListenerId, Callback)>,
}

struct Inner {
    state: watch::Sender<NetworkState>,
    listeners: Mutex<Listeners>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self
            .poller
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

/// Tracks online/offline transitions and connection quality.
#[derive(Clone)]
pub struct NetworkMonitor {
    inner: Arc<Inner>,
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(NetworkState::offline())
    }
}

impl NetworkMonitor {
    pub fn new(initial: NetworkState) -> Self {
        let (state, _) = watch::channel(initial);
        Self {
            inner: Arc::new(Inner {
                state,
                listeners: Mutex::new(Listeners::default()),
                poller: Mutex::new(None),
            }),
        }
    }

    pub fn online() -> Self {
        Self::new(NetworkState::online(ConnectionQuality::default()))
    }

    pub fn state(&self) -> NetworkState {
        *self.inner.state.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.state().online
    }

    pub fn connection_quality(&self) -> ConnectionQuality {
        self.state().connection_quality
    }

    /// Receiver that observes every state change, including quality-only ones.
    pub fn subscribe(&self) -> watch::Receiver<NetworkState> {
        self.inner.state.subscribe()
    }

    /// Publish a new state.
    ///
    /// Listeners fire only when the `online` flag flips.
    pub fn set_state(&self, state: NetworkState) {
        Self::publish(&self.inner, state);
    }

    pub fn set_online(&self, online: bool) {
        let state = if online {
            NetworkState::online(self.connection_quality())
        } else {
            NetworkState::offline()
        };
        self.set_state(state);
    }

    fn publish(inner: &Inner, state: NetworkState) {
        let previous = inner.state.send_replace(state);
        if previous.online == state.online {
            return;
        }

        tracing::info!(
            "Network {} ({:?})",
            if state.online { "online" } else { "offline" },
            state.connection_quality
        );

        // Callbacks run without the lock so they may register or remove listeners
        let callbacks: Vec<Callback> = {
            let listeners = inner
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let set = if state.online {
                &listeners.online
            } else {
                &listeners.offline
            };
            set.iter().map(|(_, callback)| Arc::clone(callback)).collect()
        };
        for callback in callbacks {
            callback();
        }
    }

    /// Register a callback for offline→online transitions.
    pub fn on_online(&self, callback: impl Fn() + Send + Sync + 'static) -> ListenerId {
        self.register(true, Arc::new(callback))
    }

    /// Register a callback for online→offline transitions.
    pub fn on_offline(&self, callback: impl Fn() + Send + Sync + 'static) -> ListenerId {
        self.register(false, Arc::new(callback))
    }

    fn register(&self, online: bool, callback: Callback) -> ListenerId {
        let mut listeners = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        listeners.next_id += 1;
        let id = listeners.next_id;
        if online {
            listeners.online.push((id, callback));
        } else {
            listeners.offline.push((id, callback));
        }
        id
    }

    /// Unregister a listener. Returns `false` if the id is unknown.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.online.len() + listeners.offline.len();
        listeners.online.retain(|(listener, _)| *listener != id);
        listeners.offline.retain(|(listener, _)| *listener != id);
        before != listeners.online.len() + listeners.offline.len()
    }

    /// Resolve once the monitor reports online.
    ///
    /// Returns immediately when already online; fails with
    /// [`Error::Timeout`] if `timeout` elapses first.
    pub async fn wait_for_online(&self, timeout: Option<Duration>) -> Result<()> {
        let mut receiver = self.subscribe();
        let wait = async move {
            receiver
                .wait_for(|state| state.online)
                .await
                .map(|_| ())
                .map_err(|_| Error::Sync("network monitor dropped".to_string()))
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await.map_err(|_| {
                Error::Timeout(format!(
                    "still offline after {} ms",
                    limit.as_millis()
                ))
            })?,
            None => wait.await,
        }
    }

    /// Start polling `probe` every `interval`. Restarts an existing poller.
    pub fn start(&self, probe: Arc<dyn ConnectivityProbe>, interval: Duration) {
        self.stop();

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let state = probe.check().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                Self::publish(&inner, state);
            }
        });

        *self
            .inner
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        tracing::debug!("Network polling started every {} ms", interval.as_millis());
    }

    /// Stop the polling task, if any. The last published state is kept.
    pub fn stop(&self) {
        let handle = self
            .inner
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            tracing::debug!("Network polling stopped");
        }
    }

    pub fn is_polling(&self) -> bool {
        self.inner
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = Arc::clone(&count);
        (count, move || {
            handle.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn listeners_fire_once_per_transition() {
        let monitor = NetworkMonitor::default();
        let (online_count, on_online) = counter();
        let (offline_count, on_offline) = counter();
        monitor.on_online(on_online);
        monitor.on_offline(on_offline);

        monitor.set_online(true);
        monitor.set_online(true);
        monitor.set_state(NetworkState::online(ConnectionQuality::Fast));
        assert_eq!(online_count.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.connection_quality(), ConnectionQuality::Fast);

        monitor.set_online(false);
        monitor.set_online(false);
        assert_eq!(offline_count.load(Ordering::SeqCst), 1);
        assert!(!monitor.is_online());
    }

    #[test]
    fn removed_listener_is_not_called() {
        let monitor = NetworkMonitor::default();
        let (count, callback) = counter();
        let id = monitor.on_online(callback);

        assert!(monitor.remove_listener(id));
        assert!(!monitor.remove_listener(id));
        monitor.set_online(true);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn instances_are_isolated() {
        let first = NetworkMonitor::default();
        let second = NetworkMonitor::default();
        let (count, callback) = counter();
        second.on_online(callback);

        first.set_online(true);
        assert!(!second.is_online());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn wait_for_online_resolves_immediately_when_online() {
        let monitor = NetworkMonitor::online();
        monitor
            .wait_for_online(Some(Duration::from_millis(1)))
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn wait_for_online_resolves_on_transition() {
        let monitor = NetworkMonitor::default();
        let waiter = {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.wait_for_online(Some(Duration::from_secs(5))).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        monitor.set_online(true);
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn wait_for_online_times_out() {
        let monitor = NetworkMonitor::default();
        let error = monitor
            .wait_for_online(Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(error, Error::Timeout(_)));
    }

    struct FixedProbe(NetworkState);

    #[async_trait]
    impl ConnectivityProbe for FixedProbe {
        async fn check(&self) -> NetworkState {
            self.0
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn polling_publishes_probe_state() {
        let monitor = NetworkMonitor::default();
        monitor.start(
            Arc::new(FixedProbe(NetworkState::online(ConnectionQuality::Slow))),
            Duration::from_millis(10),
        );
        assert!(monitor.is_polling());

        monitor
            .wait_for_online(Some(Duration::from_secs(2)))
            .await
            .unwrap();
        assert_eq!(monitor.connection_quality(), ConnectionQuality::Slow);

        monitor.stop();
        assert!(!monitor.is_polling());
    }
}
