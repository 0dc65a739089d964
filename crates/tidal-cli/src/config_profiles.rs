//! Persistent CLI profile configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tidal_core::config::{CacheConfig, RemoteConfig, TidalConfig};

const CONFIG_FILE_NAME: &str = "cli-config.json";
const BYTES_PER_MIB: u64 = 1024 * 1024;

pub const PROFILE_ENV: &str = "TIDAL_PROFILE";
pub const REMOTE_URL_ENV: &str = "TIDAL_REMOTE_URL";
pub const ANON_KEY_ENV: &str = "TIDAL_ANON_KEY";
pub const ACCESS_TOKEN_ENV: &str = "TIDAL_ACCESS_TOKEN";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliProfilesConfig {
    #[serde(default = "default_config_version")]
    pub version: u32,
    #[serde(default)]
    pub active_profile: Option<String>,
    #[serde(default)]
    pub profiles: BTreeMap<String, CliProfile>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliProfile {
    #[serde(default)]
    pub remote_url: Option<String>,
    #[serde(default)]
    pub anon_key: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default)]
    pub cache_quota_mb: Option<u64>,
}

const fn default_config_version() -> u32 {
    1
}

fn tidal_dir(base: Option<PathBuf>) -> PathBuf {
    base.unwrap_or_else(|| PathBuf::from(".")).join("tidal")
}

pub fn default_config_path() -> PathBuf {
    tidal_dir(dirs::config_dir()).join(CONFIG_FILE_NAME)
}

pub fn default_db_path() -> PathBuf {
    tidal_dir(dirs::data_dir()).join("tidal.db")
}

pub fn default_cache_dir() -> PathBuf {
    tidal_dir(dirs::cache_dir()).join("assets")
}

pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    tidal_core::util::normalize_text_option(value)
}

pub fn normalize_profile_name(value: Option<&str>) -> Option<String> {
    let value = value?.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

impl CliProfilesConfig {
    pub fn load() -> Result<Self, String> {
        Self::load_from_path(&default_config_path())
    }

    pub fn load_from_path(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|error| format!("Failed to read config at {}: {}", path.display(), error))?;
        let mut config = serde_json::from_str::<Self>(&raw)
            .map_err(|error| format!("Failed to parse config at {}: {}", path.display(), error))?;
        config.normalize();
        Ok(config)
    }

    pub fn save(&self) -> Result<PathBuf, String> {
        let path = default_config_path();
        self.save_to_path(&path)?;
        Ok(path)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    error
                )
            })?;
        }

        let mut normalized = self.clone();
        normalized.normalize();
        let serialized = serde_json::to_string_pretty(&normalized)
            .map_err(|error| format!("Failed to serialize config: {error}"))?;
        std::fs::write(path, serialized)
            .map_err(|error| format!("Failed to write config at {}: {}", path.display(), error))
    }

    pub fn resolve_profile_name(&self, explicit: Option<&str>) -> String {
        normalize_profile_name(explicit)
            .or_else(|| normalize_profile_name(std::env::var(PROFILE_ENV).ok().as_deref()))
            .or_else(|| normalize_profile_name(self.active_profile.as_deref()))
            .unwrap_or_else(|| "default".to_string())
    }

    pub fn profile(&self, name: &str) -> Option<&CliProfile> {
        self.profiles.get(name)
    }

    pub fn profile_mut_or_default(&mut self, name: &str) -> &mut CliProfile {
        self.profiles.entry(name.to_string()).or_default()
    }

    fn normalize(&mut self) {
        self.active_profile = normalize_profile_name(self.active_profile.as_deref());
        for profile in self.profiles.values_mut() {
            profile.normalize();
        }
    }
}

impl CliProfile {
    /// Build the core configuration, filling unset remote fields from `env`.
    ///
    /// The CLI runs one pass per invocation, so the periodic trigger is off.
    pub fn to_tidal_config(&self, env: impl Fn(&str) -> Option<String>) -> TidalConfig {
        let pick = |value: &Option<String>, key: &str| {
            normalize_text_option(value.clone()).or_else(|| normalize_text_option(env(key)))
        };

        let mut cache = CacheConfig {
            dir: Some(self.cache_dir.clone().unwrap_or_else(default_cache_dir)),
            ..CacheConfig::default()
        };
        if let Some(quota_mb) = self.cache_quota_mb {
            cache.quota_bytes = quota_mb.saturating_mul(BYTES_PER_MIB);
        }

        TidalConfig {
            sync: tidal_core::config::SyncConfig::default().without_periodic_sync(),
            remote: RemoteConfig {
                url: pick(&self.remote_url, REMOTE_URL_ENV),
                anon_key: pick(&self.anon_key, ANON_KEY_ENV),
                access_token: pick(&self.access_token, ACCESS_TOKEN_ENV),
            },
            cache,
        }
    }

    fn normalize(&mut self) {
        self.remote_url = normalize_text_option(self.remote_url.take())
            .map(|url| url.trim_end_matches('/').to_string());
        self.anon_key = normalize_text_option(self.anon_key.take());
        self.access_token = normalize_text_option(self.access_token.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn normalize_text_option_rejects_empty() {
        assert_eq!(normalize_text_option(None), None);
        assert_eq!(normalize_text_option(Some("   ".to_string())), None);
    }

    #[test]
    fn normalize_profile_name_rejects_empty() {
        assert_eq!(normalize_profile_name(None), None);
        assert_eq!(normalize_profile_name(Some(" ")), None);
    }

    #[test]
    fn config_roundtrip_preserves_profiles() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join(CONFIG_FILE_NAME);

        let mut config = CliProfilesConfig {
            version: 1,
            active_profile: Some(" default ".to_string()),
            profiles: BTreeMap::new(),
        };
        config.profiles.insert(
            "default".to_string(),
            CliProfile {
                remote_url: Some(" https://project.supabase.co/ ".to_string()),
                anon_key: Some(" anon-key ".to_string()),
                access_token: Some("  ".to_string()),
                cache_dir: None,
                cache_quota_mb: Some(64),
            },
        );

        config.save_to_path(&path).unwrap();
        let loaded = CliProfilesConfig::load_from_path(&path).unwrap();
        assert_eq!(loaded.active_profile.as_deref(), Some("default"));
        let profile = loaded.profile("default").unwrap();
        assert_eq!(
            profile.remote_url.as_deref(),
            Some("https://project.supabase.co")
        );
        assert_eq!(profile.anon_key.as_deref(), Some("anon-key"));
        assert_eq!(profile.access_token, None);
        assert_eq!(profile.cache_quota_mb, Some(64));
    }

    #[test]
    fn missing_config_file_loads_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let loaded = CliProfilesConfig::load_from_path(&tmp.path().join("absent.json")).unwrap();
        assert_eq!(loaded, CliProfilesConfig::default());
    }

    #[test]
    fn resolve_profile_name_prefers_explicit_then_active() {
        let config = CliProfilesConfig {
            version: 1,
            active_profile: Some("work".to_string()),
            profiles: BTreeMap::new(),
        };
        assert_eq!(config.resolve_profile_name(Some("mobile")), "mobile");
        if std::env::var(PROFILE_ENV).is_err() {
            assert_eq!(config.resolve_profile_name(None), "work");
        }
    }

    #[test]
    fn profile_values_win_over_env_fallbacks() {
        let profile = CliProfile {
            remote_url: Some("https://profile.example.com".to_string()),
            anon_key: None,
            access_token: None,
            cache_dir: Some(PathBuf::from("/tmp/tidal-assets")),
            cache_quota_mb: Some(2),
        };
        let config = profile.to_tidal_config(|key| match key {
            REMOTE_URL_ENV => Some("https://env.example.com".to_string()),
            ANON_KEY_ENV => Some("env-anon".to_string()),
            _ => None,
        });

        assert_eq!(
            config.remote.url.as_deref(),
            Some("https://profile.example.com")
        );
        assert_eq!(config.remote.anon_key.as_deref(), Some("env-anon"));
        assert_eq!(config.remote.access_token, None);
        assert!(config.remote.is_configured());
        assert_eq!(config.cache.quota_bytes, 2 * BYTES_PER_MIB);
        assert_eq!(
            config.cache.dir.as_deref(),
            Some(Path::new("/tmp/tidal-assets"))
        );
        assert_eq!(config.sync.periodic_interval(), None);
    }
}
