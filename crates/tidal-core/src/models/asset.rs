//! Cached asset model

use serde::{Deserialize, Serialize};

/// Binary asset downloaded for offline use
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedAsset {
    /// Caller-chosen cache key
    pub key: String,
    /// Source URL
    pub url: String,
    /// File name inside the cache directory
    pub file_name: String,
    /// Size on disk
    pub size_bytes: i64,
    /// MIME type reported by the origin
    pub content_type: Option<String>,
    /// Download timestamp (Unix ms)
    pub downloaded_at: i64,
    /// Last read timestamp (Unix ms), drives eviction order
    pub last_accessed_at: i64,
}

/// Storage usage reported against the configured cache quota
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageQuota {
    pub used_bytes: u64,
    pub total_bytes: u64,
}

impl StorageQuota {
    pub const fn available_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.used_bytes)
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn usage_ratio(&self) -> f64 {
        if self.total_bytes == 0 {
            return 1.0;
        }
        self.used_bytes as f64 / self.total_bytes as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_math_saturates() {
        let quota = StorageQuota {
            used_bytes: 150,
            total_bytes: 100,
        };
        assert_eq!(quota.available_bytes(), 0);
        assert!(quota.usage_ratio() > 1.0);

        let empty = StorageQuota {
            used_bytes: 0,
            total_bytes: 0,
        };
        assert!((empty.usage_ratio() - 1.0).abs() < f64::EPSILON);
    }
}
