//! SQLite-backed lifecycle store

use super::{migrations, LifecycleStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use timebox_common::{Error, LifecycleRecord, Result};

const SELECT_COLUMNS: &str = "resource_id, created_at_us, ttl_secs, notify_lead_secs, \
    destroy_at_us, notify_at_us, notified, destroyed, notification_target, locator, \
    registered_at_us, notified_at_us, destroyed_at_us";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        if let Some(path) = database_url.strip_prefix("sqlite://") {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await.map_err(|e| {
                        Error::Storage(format!("Failed to create database directory: {}", e))
                    })?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| Error::Storage(format!("Invalid database URL: {}", e)))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| Error::Storage(format!("Database connection failed: {}", e)))?;

        tracing::info!("Database connection established");
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        migrations::run_migrations(&self.pool).await?;
        tracing::info!("Database migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn exists(&self, resource_id: &str) -> Result<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM lifecycle_records WHERE resource_id = ?")
                .bind(resource_id)
                .fetch_one(&self.pool)
                .await
                .map_err(storage_error)?;
        Ok(count > 0)
    }

    async fn fetch(&self, sql: &str) -> Result<Vec<LifecycleRecord>> {
        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;
        rows.iter().map(row_to_record).collect()
    }
}

#[async_trait]
impl LifecycleStore for SqliteStore {
    async fn get(&self, resource_id: &str) -> Result<Option<LifecycleRecord>> {
        let sql = format!(
            "SELECT {} FROM lifecycle_records WHERE resource_id = ?",
            SELECT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(resource_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn put(&self, record: &LifecycleRecord) -> Result<()> {
        let locator = serde_json::to_string(&record.locator)
            .map_err(|e| Error::Storage(format!("Failed to encode locator: {}", e)))?;

        // Unqualified columns in the UPDATE arm refer to the stored row,
        // so set flags survive a replace.
        sqlx::query(
            "INSERT INTO lifecycle_records (
                resource_id, created_at_us, ttl_secs, notify_lead_secs, destroy_at_us,
                notify_at_us, notified, destroyed, notification_target, locator,
                registered_at_us, notified_at_us, destroyed_at_us
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(resource_id) DO UPDATE SET
                created_at_us = excluded.created_at_us,
                ttl_secs = excluded.ttl_secs,
                notify_lead_secs = excluded.notify_lead_secs,
                destroy_at_us = excluded.destroy_at_us,
                notify_at_us = excluded.notify_at_us,
                notification_target = excluded.notification_target,
                locator = excluded.locator,
                registered_at_us = excluded.registered_at_us,
                notified_at_us = CASE WHEN notified = 1 THEN notified_at_us ELSE excluded.notified_at_us END,
                destroyed_at_us = CASE WHEN destroyed = 1 THEN destroyed_at_us ELSE excluded.destroyed_at_us END,
                notified = MAX(notified, excluded.notified),
                destroyed = MAX(destroyed, excluded.destroyed)",
        )
        .bind(&record.resource_id)
        .bind(record.created_at.timestamp_micros())
        .bind(record.ttl_secs)
        .bind(record.notify_lead_secs)
        .bind(record.destroy_at.timestamp_micros())
        .bind(record.notify_at.timestamp_micros())
        .bind(record.notified)
        .bind(record.destroyed)
        .bind(&record.notification_target)
        .bind(locator)
        .bind(record.registered_at.timestamp_micros())
        .bind(record.notified_at.map(|t| t.timestamp_micros()))
        .bind(record.destroyed_at.map(|t| t.timestamp_micros()))
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(())
    }

    async fn list_pending(&self, _now: DateTime<Utc>) -> Result<Vec<LifecycleRecord>> {
        self.fetch(&format!(
            "SELECT {} FROM lifecycle_records WHERE destroyed = 0 ORDER BY destroy_at_us, resource_id",
            SELECT_COLUMNS
        ))
        .await
    }

    async fn list_all(&self) -> Result<Vec<LifecycleRecord>> {
        self.fetch(&format!(
            "SELECT {} FROM lifecycle_records ORDER BY resource_id",
            SELECT_COLUMNS
        ))
        .await
    }

    async fn mark_notified(&self, resource_id: &str, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE lifecycle_records SET notified = 1, notified_at_us = ?
             WHERE resource_id = ? AND notified = 0",
        )
        .bind(at.timestamp_micros())
        .bind(resource_id)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        if result.rows_affected() == 0 && !self.exists(resource_id).await? {
            return Err(Error::ResourceNotFound(resource_id.to_string()));
        }
        Ok(())
    }

    async fn mark_destroyed(&self, resource_id: &str, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE lifecycle_records SET destroyed = 1, destroyed_at_us = ?
             WHERE resource_id = ? AND destroyed = 0",
        )
        .bind(at.timestamp_micros())
        .bind(resource_id)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        if result.rows_affected() == 0 && !self.exists(resource_id).await? {
            return Err(Error::ResourceNotFound(resource_id.to_string()));
        }
        Ok(())
    }

    async fn remove(&self, resource_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM lifecycle_records WHERE resource_id = ?")
            .bind(resource_id)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_destroyed(&self, before: DateTime<Utc>) -> Result<usize> {
        let result = sqlx::query(
            "DELETE FROM lifecycle_records
             WHERE destroyed = 1 AND (destroyed_at_us IS NULL OR destroyed_at_us < ?)",
        )
        .bind(before.timestamp_micros())
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(result.rows_affected() as usize)
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}

fn storage_error(e: sqlx::Error) -> Error {
    Error::Storage(e.to_string())
}

fn timestamp(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| Error::Storage(format!("Stored timestamp out of range: {}", micros)))
}

fn row_to_record(row: &SqliteRow) -> Result<LifecycleRecord> {
    let locator: String = row.try_get("locator").map_err(storage_error)?;
    let locator: BTreeMap<String, String> = serde_json::from_str(&locator)
        .map_err(|e| Error::Storage(format!("Corrupt locator: {}", e)))?;

    let notified_at: Option<i64> = row.try_get("notified_at_us").map_err(storage_error)?;
    let destroyed_at: Option<i64> = row.try_get("destroyed_at_us").map_err(storage_error)?;

    Ok(LifecycleRecord {
        resource_id: row.try_get("resource_id").map_err(storage_error)?,
        created_at: timestamp(row.try_get("created_at_us").map_err(storage_error)?)?,
        ttl_secs: row.try_get("ttl_secs").map_err(storage_error)?,
        notify_lead_secs: row.try_get("notify_lead_secs").map_err(storage_error)?,
        destroy_at: timestamp(row.try_get("destroy_at_us").map_err(storage_error)?)?,
        notify_at: timestamp(row.try_get("notify_at_us").map_err(storage_error)?)?,
        notified: row.try_get("notified").map_err(storage_error)?,
        destroyed: row.try_get("destroyed").map_err(storage_error)?,
        notification_target: row.try_get("notification_target").map_err(storage_error)?,
        locator,
        registered_at: timestamp(row.try_get("registered_at_us").map_err(storage_error)?)?,
        notified_at: notified_at.map(timestamp).transpose()?,
        destroyed_at: destroyed_at.map(timestamp).transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::record;
    use chrono::Duration;

    async fn memory_store() -> SqliteStore {
        let store = SqliteStore::connect("sqlite::memory:", 1).await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_put_and_get_preserves_record() {
        let store = memory_store().await;
        let r = record("cluster-a", 6);
        store.put(&r).await.unwrap();

        assert_eq!(store.get("cluster-a").await.unwrap(), Some(r));
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_flags_survive_put() {
        let store = memory_store().await;
        let r = record("cluster-a", 6);
        store.put(&r).await.unwrap();
        store.mark_notified("cluster-a", r.notify_at).await.unwrap();

        store.put(&r).await.unwrap();
        let stored = store.get("cluster-a").await.unwrap().unwrap();
        assert!(stored.notified);
        assert_eq!(stored.notified_at, Some(r.notify_at));
    }

    #[tokio::test]
    async fn test_mark_destroyed_idempotent_and_unknown() {
        let store = memory_store().await;
        let r = record("cluster-a", 6);
        store.put(&r).await.unwrap();

        store.mark_destroyed("cluster-a", r.destroy_at).await.unwrap();
        store
            .mark_destroyed("cluster-a", r.destroy_at + Duration::hours(1))
            .await
            .unwrap();
        let stored = store.get("cluster-a").await.unwrap().unwrap();
        assert_eq!(stored.destroyed_at, Some(r.destroy_at));

        let err = store.mark_destroyed("ghost", r.destroy_at).await;
        assert!(matches!(err, Err(Error::ResourceNotFound(_))));
    }

    #[tokio::test]
    async fn test_pending_excludes_destroyed() {
        let store = memory_store().await;
        let a = record("a", 2);
        let b = record("b", 3);
        store.put(&b).await.unwrap();
        store.put(&a).await.unwrap();
        store.mark_destroyed("a", a.destroy_at).await.unwrap();

        let pending = store.list_pending(a.destroy_at).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].resource_id, "b");
        assert_eq!(store.list_all().await.unwrap().len(), 2);

        assert_eq!(
            store
                .purge_destroyed(a.destroy_at + Duration::days(8))
                .await
                .unwrap(),
            1
        );
        assert!(store.remove("b").await.unwrap());
        assert!(store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("state/timebox.db").display());
        let r = record("cluster-a", 6);

        {
            let store = SqliteStore::connect(&url, 2).await.unwrap();
            store.migrate().await.unwrap();
            store.put(&r).await.unwrap();
            store.mark_notified("cluster-a", r.notify_at).await.unwrap();
            store.pool().close().await;
        }

        let store = SqliteStore::connect(&url, 2).await.unwrap();
        store.migrate().await.unwrap();
        let stored = store.get("cluster-a").await.unwrap().unwrap();
        assert!(stored.notified);
        assert!(!stored.destroyed);
        assert_eq!(stored.locator.get("region").map(String::as_str), Some("europe-west1"));
    }
}
