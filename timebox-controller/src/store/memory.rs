//! In-process store, used for tests and throwaway deployments

use super::{keep_flags, LifecycleStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use timebox_common::{Error, LifecycleRecord, Result};
use tokio::sync::RwLock;

#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<RwLock<HashMap<String, LifecycleRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LifecycleStore for MemoryStore {
    async fn get(&self, resource_id: &str) -> Result<Option<LifecycleRecord>> {
        Ok(self.records.read().await.get(resource_id).cloned())
    }

    async fn put(&self, record: &LifecycleRecord) -> Result<()> {
        let mut records = self.records.write().await;
        let merged = keep_flags(record, records.get(&record.resource_id));
        records.insert(merged.resource_id.clone(), merged);
        Ok(())
    }

    async fn list_pending(&self, _now: DateTime<Utc>) -> Result<Vec<LifecycleRecord>> {
        let records = self.records.read().await;
        let mut pending: Vec<LifecycleRecord> =
            records.values().filter(|r| !r.destroyed).cloned().collect();
        pending.sort_by(|a, b| {
            a.destroy_at
                .cmp(&b.destroy_at)
                .then_with(|| a.resource_id.cmp(&b.resource_id))
        });
        Ok(pending)
    }

    async fn list_all(&self) -> Result<Vec<LifecycleRecord>> {
        let records = self.records.read().await;
        let mut all: Vec<LifecycleRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
        Ok(all)
    }

    async fn mark_notified(&self, resource_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(resource_id)
            .ok_or_else(|| Error::ResourceNotFound(resource_id.to_string()))?;

        if !record.notified {
            record.notified = true;
            record.notified_at = Some(at);
        }
        Ok(())
    }

    async fn mark_destroyed(&self, resource_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(resource_id)
            .ok_or_else(|| Error::ResourceNotFound(resource_id.to_string()))?;

        if !record.destroyed {
            record.destroyed = true;
            record.destroyed_at = Some(at);
        }
        Ok(())
    }

    async fn remove(&self, resource_id: &str) -> Result<bool> {
        Ok(self.records.write().await.remove(resource_id).is_some())
    }

    async fn purge_destroyed(&self, before: DateTime<Utc>) -> Result<usize> {
        let mut records = self.records.write().await;
        let len = records.len();
        records.retain(|_, r| !(r.destroyed && r.destroyed_at.map_or(true, |at| at < before)));
        Ok(len - records.len())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::record;
    use chrono::Duration;

    #[tokio::test]
    async fn test_put_and_get() {
        let store = MemoryStore::new();
        let r = record("cluster-a", 4);
        store.put(&r).await.unwrap();

        assert_eq!(store.get("cluster-a").await.unwrap(), Some(r));
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mark_notified_is_idempotent() {
        let store = MemoryStore::new();
        let r = record("cluster-a", 4);
        store.put(&r).await.unwrap();

        let first = r.notify_at;
        store.mark_notified("cluster-a", first).await.unwrap();
        store
            .mark_notified("cluster-a", first + Duration::hours(1))
            .await
            .unwrap();

        let stored = store.get("cluster-a").await.unwrap().unwrap();
        assert!(stored.notified);
        assert_eq!(stored.notified_at, Some(first));
    }

    #[tokio::test]
    async fn test_mark_destroyed_is_idempotent() {
        let store = MemoryStore::new();
        let r = record("cluster-a", 4);
        store.put(&r).await.unwrap();

        store.mark_destroyed("cluster-a", r.destroy_at).await.unwrap();
        store.mark_destroyed("cluster-a", r.destroy_at).await.unwrap();

        let stored = store.get("cluster-a").await.unwrap().unwrap();
        assert!(stored.destroyed);
        assert!(store.list_pending(r.destroy_at).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mark_unknown_resource() {
        let store = MemoryStore::new();
        let err = store.mark_destroyed("ghost", chrono::Utc::now()).await;
        assert!(matches!(err, Err(Error::ResourceNotFound(_))));
    }

    #[tokio::test]
    async fn test_put_never_resets_flags() {
        let store = MemoryStore::new();
        let r = record("cluster-a", 4);
        store.put(&r).await.unwrap();
        store.mark_destroyed("cluster-a", r.destroy_at).await.unwrap();

        store.put(&r).await.unwrap();
        assert!(store.get("cluster-a").await.unwrap().unwrap().destroyed);
    }

    #[tokio::test]
    async fn test_list_pending_orders_by_destroy_at() {
        let store = MemoryStore::new();
        store.put(&record("late", 8)).await.unwrap();
        store.put(&record("early", 2)).await.unwrap();
        store.put(&record("middle", 4)).await.unwrap();

        let ids: Vec<String> = store
            .list_pending(chrono::Utc::now())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.resource_id)
            .collect();
        assert_eq!(ids, vec!["early", "middle", "late"]);
    }

    #[tokio::test]
    async fn test_purge_destroyed() {
        let store = MemoryStore::new();
        let gone = record("gone", 2);
        let alive = record("alive", 2);
        store.put(&gone).await.unwrap();
        store.put(&alive).await.unwrap();
        store.mark_destroyed("gone", gone.destroy_at).await.unwrap();

        assert_eq!(store.purge_destroyed(gone.destroy_at).await.unwrap(), 0);
        assert_eq!(
            store
                .purge_destroyed(gone.destroy_at + Duration::seconds(1))
                .await
                .unwrap(),
            1
        );
        assert_eq!(store.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove() {
        let store = MemoryStore::new();
        store.put(&record("cluster-a", 4)).await.unwrap();
        assert!(store.remove("cluster-a").await.unwrap());
        assert!(!store.remove("cluster-a").await.unwrap());
    }
}
