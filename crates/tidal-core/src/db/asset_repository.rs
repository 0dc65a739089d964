//! Cached asset metadata repository

use crate::error::Result;
use crate::models::CachedAsset;
use libsql::{params, Connection, Row};

const ASSET_COLUMNS: &str =
    "key, url, file_name, size_bytes, content_type, downloaded_at, last_accessed_at";

/// Trait for cached asset metadata (async)
#[allow(async_fn_in_trait)]
pub trait AssetRepository {
    /// Insert or replace the metadata row for `asset.key`
    async fn upsert(&self, asset: &CachedAsset) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<CachedAsset>>;

    /// Bump `last_accessed_at`
    async fn touch(&self, key: &str, now_ms: i64) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<bool>;

    /// All assets, least recently accessed first
    async fn list_by_access(&self) -> Result<Vec<CachedAsset>>;

    /// Sum of `size_bytes` across all assets
    async fn total_size(&self) -> Result<u64>;

    async fn clear(&self) -> Result<usize>;
}

/// libSQL implementation of `AssetRepository`
pub struct LibSqlAssetRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlAssetRepository<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_asset(row: &Row) -> Result<CachedAsset> {
        Ok(CachedAsset {
            key: row.get(0)?,
            url: row.get(1)?,
            file_name: row.get(2)?,
            size_bytes: row.get(3)?,
            content_type: row.get(4)?,
            downloaded_at: row.get(5)?,
            last_accessed_at: row.get(6)?,
        })
    }
}

impl AssetRepository for LibSqlAssetRepository<'_> {
    async fn upsert(&self, asset: &CachedAsset) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO cached_assets
                    (key, url, file_name, size_bytes, content_type, downloaded_at, last_accessed_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(key) DO UPDATE SET
                    url = excluded.url,
                    file_name = excluded.file_name,
                    size_bytes = excluded.size_bytes,
                    content_type = excluded.content_type,
                    downloaded_at = excluded.downloaded_at,
                    last_accessed_at = excluded.last_accessed_at",
                params![
                    asset.key.as_str(),
                    asset.url.as_str(),
                    asset.file_name.as_str(),
                    asset.size_bytes,
                    asset.content_type.clone(),
                    asset.downloaded_at,
                    asset.last_accessed_at
                ],
            )
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<CachedAsset>> {
        let sql = format!("SELECT {ASSET_COLUMNS} FROM cached_assets WHERE key = ?");
        let mut rows = self.conn.query(&sql, params![key]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_asset(&row)?)),
            None => Ok(None),
        }
    }

    async fn touch(&self, key: &str, now_ms: i64) -> Result<()> {
        self.conn
            .execute(
                "UPDATE cached_assets SET last_accessed_at = ? WHERE key = ?",
                params![now_ms, key],
            )
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM cached_assets WHERE key = ?", params![key])
            .await?;
        Ok(rows > 0)
    }

    async fn list_by_access(&self) -> Result<Vec<CachedAsset>> {
        let sql = format!(
            "SELECT {ASSET_COLUMNS} FROM cached_assets ORDER BY last_accessed_at ASC, key ASC"
        );
        let mut rows = self.conn.query(&sql, ()).await?;
        let mut assets = Vec::new();
        while let Some(row) = rows.next().await? {
            assets.push(Self::parse_asset(&row)?);
        }
        Ok(assets)
    }

    async fn total_size(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COALESCE(SUM(size_bytes), 0) FROM cached_assets", ())
            .await?;
        let total: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        Ok(u64::try_from(total).unwrap_or_default())
    }

    async fn clear(&self) -> Result<usize> {
        let rows = self.conn.execute("DELETE FROM cached_assets", ()).await?;
        Ok(usize::try_from(rows).unwrap_or(usize::MAX))
    }
}
