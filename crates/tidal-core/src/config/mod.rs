//! Runtime configuration for the sync core.
//!
//! Hosts load a `TidalConfig` from JSON (CLI profile files, bundled app
//! config) or build one in code. Every field has a default so partial
//! documents are accepted; unknown fields are rejected.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::{is_http_url, normalize_text_option};

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
const DEFAULT_CONCURRENCY: usize = 4;
const DEFAULT_REMOTE_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_PERIODIC_INTERVAL_SECS: u64 = 300;
const DEFAULT_CACHE_QUOTA_BYTES: u64 = 200 * 1024 * 1024;

/// How a queued update is compared with the remote copy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "field")]
pub enum ConflictPolicy {
    /// Remote `updated_at` strictly newer than the local one is a conflict.
    #[default]
    Timestamp,
    /// Compare an integer version counter assigned by the server.
    VersionField(String),
}

/// Retry, concurrency and trigger settings for the sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Attempts per mutation before a transient failure becomes terminal
    pub max_attempts: u32,
    /// Base for exponential backoff
    pub base_delay_ms: u64,
    /// Lanes (distinct records) processed in parallel
    pub concurrency: usize,
    /// Deadline for every remote call
    pub remote_timeout_ms: u64,
    /// Background pass interval; `None` disables the periodic trigger
    pub periodic_interval_secs: Option<u64>,
    /// Conflict detection policy
    pub conflict_policy: ConflictPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            concurrency: DEFAULT_CONCURRENCY,
            remote_timeout_ms: DEFAULT_REMOTE_TIMEOUT_MS,
            periodic_interval_secs: Some(DEFAULT_PERIODIC_INTERVAL_SECS),
            conflict_policy: ConflictPolicy::Timestamp,
        }
    }
}

impl SyncConfig {
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub const fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    pub fn periodic_interval(&self) -> Option<Duration> {
        self.periodic_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Disable the periodic trigger (network and manual triggers only)
    #[must_use]
    pub const fn without_periodic_sync(mut self) -> Self {
        self.periodic_interval_secs = None;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("sync.max_attempts must be at least 1".to_string());
        }
        if self.concurrency == 0 {
            return Err("sync.concurrency must be at least 1".to_string());
        }
        if self.remote_timeout_ms == 0 {
            return Err("sync.remote_timeout_ms must be greater than zero".to_string());
        }
        if let ConflictPolicy::VersionField(field) = &self.conflict_policy {
            if field.trim().is_empty() {
                return Err("sync.conflict_policy field must not be empty".to_string());
            }
        }
        Ok(())
    }
}

/// Hosted backend endpoint (Supabase/PostgREST style).
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteConfig {
    /// Project URL, e.g. `https://project.supabase.co`
    pub url: Option<String>,
    /// Public anon key sent as `apikey`
    pub anon_key: Option<String>,
    /// User access token; falls back to the anon key when absent
    pub access_token: Option<String>,
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RemoteConfig")
            .field("url", &self.url)
            .field("anon_key", &self.anon_key.as_ref().map(|_| "[REDACTED]"))
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl RemoteConfig {
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            anon_key: Some(anon_key.into()),
            access_token: None,
        }
    }

    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Check if the remote endpoint is configured
    pub fn is_configured(&self) -> bool {
        normalize_text_option(self.url.clone()).is_some()
            && normalize_text_option(self.anon_key.clone()).is_some()
    }

    /// Normalized base URL without a trailing slash
    pub fn base_url(&self) -> Result<String, String> {
        let url = normalize_text_option(self.url.clone())
            .ok_or_else(|| "remote.url is required".to_string())?;
        if !is_http_url(&url) {
            return Err("remote.url must include http:// or https://".to_string());
        }
        Ok(url.trim_end_matches('/').to_string())
    }

    fn normalize(&mut self) {
        self.url = normalize_text_option(self.url.take());
        self.anon_key = normalize_text_option(self.anon_key.take());
        self.access_token = normalize_text_option(self.access_token.take());
    }
}

/// Offline asset cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Directory holding cached files; `None` lets the host choose
    pub dir: Option<PathBuf>,
    /// Maximum bytes kept on disk
    pub quota_bytes: u64,
    /// Skip background downloads on slow connections
    pub defer_on_slow: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            quota_bytes: DEFAULT_CACHE_QUOTA_BYTES,
            defer_on_slow: true,
        }
    }
}

/// Complete configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TidalConfig {
    pub sync: SyncConfig,
    pub remote: RemoteConfig,
    pub cache: CacheConfig,
}

impl TidalConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json(payload: &str) -> Result<Self, String> {
        let mut config: Self = serde_json::from_str(payload)
            .map_err(|error| format!("invalid tidal config JSON: {error}"))?;
        config.remote.normalize();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        self.sync.validate()?;
        if self.remote.url.is_some() {
            self.remote.base_url()?;
        }
        Ok(())
    }
}
