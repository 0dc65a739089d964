//! Connectivity probes used by the network monitor's polling task.

use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::models::{ConnectionQuality, NetworkState};

const FAST_LATENCY: Duration = Duration::from_millis(150);
const MEDIUM_LATENCY: Duration = Duration::from_millis(600);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Source of connectivity snapshots.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn check(&self) -> NetworkState;
}

/// Map a round-trip latency to a quality bucket.
pub fn quality_from_latency(latency: Duration) -> ConnectionQuality {
    if latency < FAST_LATENCY {
        ConnectionQuality::Fast
    } else if latency < MEDIUM_LATENCY {
        ConnectionQuality::Medium
    } else {
        ConnectionQuality::Slow
    }
}

/// Probe that issues a `HEAD` request against a known endpoint.
///
/// Any HTTP response counts as online; transport failures count as offline.
#[derive(Clone)]
pub struct HttpConnectivityProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpConnectivityProbe {
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(PROBE_TIMEOUT).build()?,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ConnectivityProbe for HttpConnectivityProbe {
    async fn check(&self) -> NetworkState {
        let started = Instant::now();
        match self.client.head(&self.url).send().await {
            Ok(_) => NetworkState::online(quality_from_latency(started.elapsed())),
            Err(error) => {
                tracing::debug!("Connectivity probe to {} failed: {error}", self.url);
                NetworkState::offline()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_buckets() {
        assert_eq!(
            quality_from_latency(Duration::from_millis(20)),
            ConnectionQuality::Fast
        );
        assert_eq!(
            quality_from_latency(Duration::from_millis(150)),
            ConnectionQuality::Medium
        );
        assert_eq!(
            quality_from_latency(Duration::from_millis(599)),
            ConnectionQuality::Medium
        );
        assert_eq!(
            quality_from_latency(Duration::from_secs(2)),
            ConnectionQuality::Slow
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unreachable_endpoint_is_offline() {
        // Port 9 (discard) on localhost is closed in test environments
        let probe = HttpConnectivityProbe::new("http://127.0.0.1:9/").unwrap();
        assert_eq!(probe.check().await, NetworkState::offline());
    }
}
