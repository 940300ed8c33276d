//! Schema migrations for the SQLite store

use sqlx::SqlitePool;
use timebox_common::{Error, Result};

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            executed_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
    )
    .execute(pool)
    .await
    .map_err(|e| Error::Storage(format!("Failed to create migrations table: {}", e)))?;

    run_migration(pool, "001_create_lifecycle_records", MIGRATION_001_LIFECYCLE_RECORDS).await?;
    run_migration(pool, "002_index_pending_records", MIGRATION_002_PENDING_INDEX).await?;

    Ok(())
}

async fn run_migration(pool: &SqlitePool, name: &str, sql: &str) -> Result<()> {
    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM migrations WHERE name = ?")
        .bind(name)
        .fetch_one(pool)
        .await
        .map_err(|e| Error::Storage(format!("Migration check failed: {}", e)))?;

    if applied > 0 {
        tracing::debug!("Migration {} already applied", name);
        return Ok(());
    }

    tracing::info!("Running migration: {}", name);

    let mut tx = pool
        .begin()
        .await
        .map_err(|e| Error::Storage(format!("Failed to open migration transaction: {}", e)))?;

    sqlx::query(sql)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Storage(format!("Migration {} failed: {}", name, e)))?;

    sqlx::query("INSERT INTO migrations (name) VALUES (?)")
        .bind(name)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Storage(format!("Failed to record migration: {}", e)))?;

    tx.commit()
        .await
        .map_err(|e| Error::Storage(format!("Failed to commit migration {}: {}", name, e)))?;

    tracing::info!("Migration {} completed", name);
    Ok(())
}

// Timestamps are microseconds since the Unix epoch
const MIGRATION_001_LIFECYCLE_RECORDS: &str = "
CREATE TABLE lifecycle_records (
    resource_id TEXT PRIMARY KEY,
    created_at_us INTEGER NOT NULL,
    ttl_secs INTEGER NOT NULL,
    notify_lead_secs INTEGER NOT NULL,
    destroy_at_us INTEGER NOT NULL,
    notify_at_us INTEGER NOT NULL,
    notified INTEGER NOT NULL DEFAULT 0,
    destroyed INTEGER NOT NULL DEFAULT 0,
    notification_target TEXT,
    locator TEXT NOT NULL DEFAULT '{}',
    registered_at_us INTEGER NOT NULL,
    notified_at_us INTEGER,
    destroyed_at_us INTEGER
)
";

const MIGRATION_002_PENDING_INDEX: &str = "
CREATE INDEX idx_lifecycle_records_pending ON lifecycle_records (destroyed, destroy_at_us)
";

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn test_migrations_are_rerunnable() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM migrations")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 2);
    }
}
