//! Lifecycle state store
//!
//! One durable record per managed resource. The controller is the only
//! writer; reads reflect the latest write before the next tick.

pub mod memory;
pub mod migrations;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use timebox_common::{LifecycleRecord, Result};

#[async_trait]
pub trait LifecycleStore: Send + Sync {
    async fn get(&self, resource_id: &str) -> Result<Option<LifecycleRecord>>;

    /// Insert or replace a record. Flags already set on a stored record are kept.
    async fn put(&self, record: &LifecycleRecord) -> Result<()>;

    /// Records that are not yet destroyed, ordered by destruction time.
    /// `now` lets a backend rank by due time; nothing is filtered on it.
    async fn list_pending(&self, now: DateTime<Utc>) -> Result<Vec<LifecycleRecord>>;

    async fn list_all(&self) -> Result<Vec<LifecycleRecord>>;

    /// Idempotent; an already-notified record is left untouched.
    async fn mark_notified(&self, resource_id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Idempotent; an already-destroyed record is left untouched.
    async fn mark_destroyed(&self, resource_id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Stop tracking a resource. Returns whether a record existed.
    async fn remove(&self, resource_id: &str) -> Result<bool>;

    /// Drop destroyed records whose destruction happened before `before`.
    async fn purge_destroyed(&self, before: DateTime<Utc>) -> Result<usize>;

    async fn health_check(&self) -> Result<()>;

    fn backend(&self) -> &'static str;
}

/// Open the store named by a database URL (`memory://` or `sqlite://...`)
pub async fn open(url: &str, max_connections: u32) -> Result<Arc<dyn LifecycleStore>> {
    if url.starts_with("memory://") {
        tracing::warn!("Using in-memory lifecycle store; state will not survive a restart");
        return Ok(Arc::new(MemoryStore::new()));
    }

    if url.starts_with("sqlite:") {
        let store = SqliteStore::connect(url, max_connections).await?;
        store.migrate().await?;
        return Ok(Arc::new(store));
    }

    Err(timebox_common::Error::Validation(format!(
        "Unsupported database URL: {}",
        url
    )))
}

/// Merge monotonic flags of a stored record into an incoming one
pub(crate) fn keep_flags(incoming: &LifecycleRecord, stored: Option<&LifecycleRecord>) -> LifecycleRecord {
    let mut merged = incoming.clone();
    if let Some(stored) = stored {
        if stored.notified && !merged.notified {
            merged.notified = true;
            merged.notified_at = stored.notified_at;
        }
        if stored.destroyed && !merged.destroyed {
            merged.destroyed = true;
            merged.destroyed_at = stored.destroyed_at;
        }
    }
    merged
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_memory_store() {
        let store = open("memory://", 1).await.unwrap();
        assert_eq!(store.backend(), "memory");
        assert!(store.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn test_open_rejects_unknown_scheme() {
        assert!(open("postgres://localhost/timebox", 1).await.is_err());
    }

    #[test]
    fn test_keep_flags_is_monotonic() {
        let mut stored = test_support::record("a", 4);
        stored.notified = true;
        stored.notified_at = Some(stored.notify_at);

        let incoming = test_support::record("a", 4);
        let merged = keep_flags(&incoming, Some(&stored));
        assert!(merged.notified);
        assert_eq!(merged.notified_at, Some(stored.notify_at));
        assert!(!merged.destroyed);
    }
}
