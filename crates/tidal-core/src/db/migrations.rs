//! Database migrations

use crate::error::Result;
use libsql::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 3;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;
    if version > CURRENT_VERSION {
        tracing::warn!(
            "Database schema version {version} is newer than supported version {CURRENT_VERSION}"
        );
    }

    if version < 1 {
        migrate_v1(conn).await?;
    }
    if version < 2 {
        migrate_v2(conn).await?;
    }
    if version < 3 {
        migrate_v3(conn).await?;
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Execute a migration's statements inside one transaction
async fn apply(conn: &Connection, version: i32, statements: &[&str]) -> Result<()> {
    // libsql doesn't have execute_batch, so we run each statement separately
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn
        .execute(
            "INSERT INTO schema_version (version) VALUES (?)",
            libsql::params![version],
        )
        .await
    {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated database to version {version}");
    Ok(())
}

/// Migration to version 1: mutation outbox
async fn migrate_v1(conn: &Connection) -> Result<()> {
    apply(
        conn,
        1,
        &[
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            "CREATE TABLE IF NOT EXISTS outbox (
                id TEXT PRIMARY KEY,
                operation TEXT NOT NULL,
                table_name TEXT NOT NULL,
                record_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                attempt_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                created_at INTEGER NOT NULL UNIQUE,
                updated_at INTEGER NOT NULL,
                next_attempt_at INTEGER NOT NULL DEFAULT 0,
                synced_at INTEGER
            )",
            "CREATE INDEX IF NOT EXISTS idx_outbox_status_created ON outbox(status, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_outbox_target ON outbox(table_name, record_id)",
            "CREATE INDEX IF NOT EXISTS idx_outbox_synced_at ON outbox(synced_at)",
        ],
    )
    .await
}

/// Migration to version 2: conflict store
async fn migrate_v2(conn: &Connection) -> Result<()> {
    apply(
        conn,
        2,
        &[
            "CREATE TABLE IF NOT EXISTS sync_conflicts (
                id TEXT PRIMARY KEY,
                mutation_id TEXT NOT NULL,
                table_name TEXT NOT NULL,
                record_id TEXT NOT NULL,
                local_snapshot TEXT NOT NULL,
                server_snapshot TEXT NOT NULL,
                detected_at INTEGER NOT NULL,
                resolved_at INTEGER,
                resolution_strategy TEXT
            )",
            // At most one open conflict per record
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_sync_conflicts_open
             ON sync_conflicts(table_name, record_id) WHERE resolved_at IS NULL",
            "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_resolved_at ON sync_conflicts(resolved_at DESC)",
            "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_mutation ON sync_conflicts(mutation_id)",
        ],
    )
    .await
}

/// Migration to version 3: offline asset cache metadata
async fn migrate_v3(conn: &Connection) -> Result<()> {
    apply(
        conn,
        3,
        &[
            "CREATE TABLE IF NOT EXISTS cached_assets (
                key TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                file_name TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                content_type TEXT,
                downloaded_at INTEGER NOT NULL,
                last_accessed_at INTEGER NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_cached_assets_accessed ON cached_assets(last_accessed_at)",
        ],
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use libsql::Builder;

    async fn setup() -> Connection {
        let db = Builder::new_local(":memory:").build().await.unwrap();
        db.connect().unwrap()
    }

    async fn table_exists(conn: &Connection, name: &str) -> bool {
        let mut rows = conn
            .query(
                "SELECT EXISTS(
                    SELECT 1 FROM sqlite_master
                    WHERE type = 'table' AND name = ?
                )",
                libsql::params![name],
            )
            .await
            .unwrap();

        rows.next()
            .await
            .unwrap()
            .is_some_and(|row| row.get::<i32>(0).unwrap() != 0)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migrations() {
        let conn = setup().await;
        run(&conn).await.unwrap();

        let version = get_version(&conn).await.unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migrations_idempotent() {
        let conn = setup().await;
        run(&conn).await.unwrap();
        run(&conn).await.unwrap(); // Should not fail

        let version = get_version(&conn).await.unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migrations_create_all_tables() {
        let conn = setup().await;
        run(&conn).await.unwrap();

        for table in ["outbox", "sync_conflicts", "cached_assets"] {
            assert!(table_exists(&conn, table).await, "{table} missing");
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_conflict_index_is_partial() {
        let conn = setup().await;
        run(&conn).await.unwrap();

        let insert = "INSERT INTO sync_conflicts
            (id, mutation_id, table_name, record_id, local_snapshot, server_snapshot, detected_at, resolved_at)
            VALUES (?, 'm', 'recipes', 'r1', '{}', '{}', 1, NULL)";

        conn.execute(insert, libsql::params!["c1"]).await.unwrap();
        assert!(conn.execute(insert, libsql::params!["c2"]).await.is_err());

        conn.execute("UPDATE sync_conflicts SET resolved_at = 5 WHERE id = 'c1'", ())
            .await
            .unwrap();
        conn.execute(insert, libsql::params!["c3"]).await.unwrap();
    }
}
