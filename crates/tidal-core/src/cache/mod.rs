//! Offline asset cache.
//!
//! Downloads binary assets (images, audio) into a local directory, keeps
//! their metadata in the `cached_assets` table and evicts the least
//! recently used files once the configured quota is exceeded.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::config::CacheConfig;
use crate::db::{AssetRepository, LibSqlAssetRepository, SharedDatabase};
use crate::models::{CachedAsset, ConnectionQuality, StorageQuota};
use crate::network::NetworkMonitor;
use crate::taxonomy::{ErrorCategory, RemoteError};
use crate::util::{is_http_url, unix_millis_now};
use crate::{Error, Result};

/// Urgency of a fetch; only background fetches are deferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetPriority {
    /// The user is waiting for this asset
    Foreground,
    /// Prefetch for offline use
    Background,
}

/// Result of [`AssetManager::fetch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetFetch {
    /// Served from disk without touching the network
    Cached(PathBuf),
    /// Downloaded now and stored
    Downloaded(PathBuf),
    /// Skipped because the connection is slow
    Deferred,
}

/// Manages downloaded assets and reports quota usage.
pub struct AssetManager {
    db: SharedDatabase,
    dir: PathBuf,
    quota_bytes: u64,
    defer_on_slow: bool,
    network: NetworkMonitor,
    client: reqwest::Client,
}

impl AssetManager {
    /// Create a manager storing files under `dir` (created if missing).
    pub async fn new(
        db: SharedDatabase,
        dir: impl Into<PathBuf>,
        config: &CacheConfig,
        network: NetworkMonitor,
    ) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|error| Error::Storage(format!("Failed to build HTTP client: {error}")))?;

        Ok(Self {
            db,
            dir,
            quota_bytes: config.quota_bytes,
            defer_on_slow: config.defer_on_slow,
            network,
            client,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Return the cached file for `key`, downloading it from `url` if needed.
    pub async fn fetch(&self, key: &str, url: &str, priority: AssetPriority) -> Result<AssetFetch> {
        let key = normalize_key(key)?;
        if let Some(path) = self.get(&key).await? {
            return Ok(AssetFetch::Cached(path));
        }

        if !is_http_url(url) {
            return Err(Error::InvalidInput(format!(
                "Asset URL must include http:// or https://: {url}"
            )));
        }
        if !self.network.is_online() {
            return Err(RemoteError::categorized(
                ErrorCategory::Network,
                format!("offline; cannot download {key}"),
            )
            .classify()
            .into());
        }
        if priority == AssetPriority::Background
            && self.defer_on_slow
            && self.network.connection_quality() == ConnectionQuality::Slow
        {
            tracing::debug!("Deferring background download of {key} on a slow connection");
            return Ok(AssetFetch::Deferred);
        }

        let (bytes, content_type) = self.download(url).await?;
        let asset = self.store_bytes(&key, url, &bytes, content_type).await?;
        Ok(AssetFetch::Downloaded(self.dir.join(asset.file_name)))
    }

    async fn download(&self, url: &str) -> Result<(Vec<u8>, Option<String>)> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|error| Error::Remote(RemoteError::from(error).classify()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::http(status.as_u16(), format!("GET {url} returned {status}"))
                .classify()
                .into());
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToOwned::to_owned);
        let bytes = response
            .bytes()
            .await
            .map_err(|error| Error::Remote(RemoteError::from(error).classify()))?;

        Ok((bytes.to_vec(), content_type))
    }

    /// Path of a cached asset, marking it as recently used.
    ///
    /// Metadata whose file went missing is dropped and reported as a miss.
    pub async fn get(&self, key: &str) -> Result<Option<PathBuf>> {
        let key = normalize_key(key)?;
        let db = self.db.lock().await;
        let repo = LibSqlAssetRepository::new(db.connection());
        let Some(asset) = repo.get(&key).await? else {
            return Ok(None);
        };

        let path = self.dir.join(&asset.file_name);
        if !tokio::fs::try_exists(&path).await? {
            tracing::warn!("Cached file for {key} disappeared; dropping metadata");
            repo.delete(&key).await?;
            return Ok(None);
        }

        repo.touch(&key, unix_millis_now()).await?;
        Ok(Some(path))
    }

    /// Write `bytes` as the asset for `key` and evict older assets over quota.
    pub async fn store_bytes(
        &self,
        key: &str,
        url: &str,
        bytes: &[u8],
        content_type: Option<String>,
    ) -> Result<CachedAsset> {
        let key = normalize_key(key)?;
        let size = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
        if size > self.quota_bytes {
            return Err(Error::Storage(format!(
                "Asset {key} ({size} bytes) exceeds the cache quota of {} bytes",
                self.quota_bytes
            )));
        }

        let file_name = format!("{}-{}.bin", sanitize_token(&key), Uuid::now_v7().simple());
        let path = self.dir.join(&file_name);
        let staging = self.dir.join(format!("{file_name}.part"));
        tokio::fs::write(&staging, bytes).await?;
        tokio::fs::rename(&staging, &path).await?;

        let now = unix_millis_now();
        let asset = CachedAsset {
            key: key.clone(),
            url: url.to_string(),
            file_name,
            size_bytes: i64::try_from(size).unwrap_or(i64::MAX),
            content_type,
            downloaded_at: now,
            last_accessed_at: now,
        };

        // Metadata changes under the lock; unlinking happens after release
        let stale = {
            let db = self.db.lock().await;
            let repo = LibSqlAssetRepository::new(db.connection());
            let previous = repo.get(&key).await?;
            repo.upsert(&asset).await?;
            let mut stale = self.evict_over_quota(&repo, &key).await?;
            stale.extend(previous.map(|previous| previous.file_name));
            stale
        };
        self.remove_files(&stale).await;

        tracing::debug!("Cached {key} ({size} bytes)");
        Ok(asset)
    }

    /// Drop metadata for least recently used assets until under quota and
    /// return the file names to unlink.
    async fn evict_over_quota(
        &self,
        repo: &LibSqlAssetRepository<'_>,
        keep: &str,
    ) -> Result<Vec<String>> {
        let mut used = repo.total_size().await?;
        let mut evicted = Vec::new();
        if used <= self.quota_bytes {
            return Ok(evicted);
        }

        for asset in repo.list_by_access().await? {
            if used <= self.quota_bytes {
                break;
            }
            if asset.key == keep {
                continue;
            }
            repo.delete(&asset.key).await?;
            used = used.saturating_sub(u64::try_from(asset.size_bytes).unwrap_or_default());
            tracing::info!("Evicted cached asset {} to stay under quota", asset.key);
            evicted.push(asset.file_name);
        }
        Ok(evicted)
    }

    async fn remove_files(&self, file_names: &[String]) {
        for file_name in file_names {
            let path = self.dir.join(file_name);
            if let Err(error) = tokio::fs::remove_file(&path).await {
                if error.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to remove {}: {error}", path.display());
                }
            }
        }
    }

    /// Remove one asset. Returns `false` when it was not cached.
    pub async fn remove(&self, key: &str) -> Result<bool> {
        let key = normalize_key(key)?;
        let asset = {
            let db = self.db.lock().await;
            let repo = LibSqlAssetRepository::new(db.connection());
            let Some(asset) = repo.get(&key).await? else {
                return Ok(false);
            };
            repo.delete(&key).await?;
            asset
        };
        self.remove_files(&[asset.file_name]).await;
        Ok(true)
    }

    /// Remove every cached asset; returns how many were removed.
    pub async fn clear(&self) -> Result<usize> {
        let assets = {
            let db = self.db.lock().await;
            let repo = LibSqlAssetRepository::new(db.connection());
            let assets = repo.list_by_access().await?;
            repo.clear().await?;
            assets
        };
        let file_names: Vec<String> = assets.into_iter().map(|asset| asset.file_name).collect();
        self.remove_files(&file_names).await;
        Ok(file_names.len())
    }

    pub async fn list(&self) -> Result<Vec<CachedAsset>> {
        let db = self.db.lock().await;
        LibSqlAssetRepository::new(db.connection())
            .list_by_access()
            .await
    }

    /// Bytes used by cached assets against the configured quota.
    pub async fn storage_quota(&self) -> Result<StorageQuota> {
        let db = self.db.lock().await;
        let used_bytes = LibSqlAssetRepository::new(db.connection())
            .total_size()
            .await?;
        Ok(StorageQuota {
            used_bytes,
            total_bytes: self.quota_bytes,
        })
    }
}

fn normalize_key(key: &str) -> Result<String> {
    let key = key.trim();
    if key.is_empty() {
        return Err(Error::InvalidInput("Asset key cannot be empty".to_string()));
    }
    Ok(key.to_string())
}

fn sanitize_token(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_dash = false;

    for ch in input.chars().flat_map(char::to_lowercase).take(48) {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }

    let out = out.trim_matches('-');
    if out.is_empty() {
        "asset".to_string()
    } else {
        out.to_string()
    }
}
