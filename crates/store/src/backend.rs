//! Storage backend seam.
//!
//! The event store needs a small slice of a sorted-set capable key-value
//! store: plain records, time-scored ordered indexes, and hash fields
//! with atomic increments. [`MemoryKv`] implements it in-process for
//! tests; [`RedisKv`](crate::redis_kv::RedisKv) is the durable backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StoreError;

// ---------------------------------------------------------------------------
// SortedKv
// ---------------------------------------------------------------------------

/// Minimal sorted-set capable key-value interface.
///
/// Index members are returned in ascending score order, ties broken
/// lexicographically by member, matching Redis sorted-set semantics.
#[async_trait]
pub trait SortedKv: Send + Sync {
    /// Set a plain record.
    async fn put(&self, key: &str, value: String) -> Result<(), StoreError>;

    /// Fetch a plain record.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Batch-fetch plain records, preserving input order.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError>;

    /// Add (or rescore) a member of a sorted index.
    async fn zadd(&self, key: &str, score: i64, member: &str) -> Result<(), StoreError>;

    /// Members of a sorted index with scores in `min..=max`, ascending.
    async fn zrange_by_score(
        &self,
        key: &str,
        min: i64,
        max: i64,
    ) -> Result<Vec<String>, StoreError>;

    /// Atomically increment a hash field, returning the new value.
    async fn hincr(&self, key: &str, field: &str, by: i64) -> Result<i64, StoreError>;

    /// Set a hash field.
    async fn hset(&self, key: &str, field: &str, value: String) -> Result<(), StoreError>;

    /// Fetch a hash field.
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;
}

// ---------------------------------------------------------------------------
// MemoryKv
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryInner {
    records: HashMap<String, String>,
    indexes: HashMap<String, BTreeMap<(i64, String), ()>>,
    hashes: HashMap<String, HashMap<String, String>>,
}

/// In-process [`SortedKv`] backend.
#[derive(Debug, Default)]
pub struct MemoryKv {
    inner: Mutex<MemoryInner>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SortedKv for MemoryKv {
    async fn put(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.lock().records.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock().records.get(key).cloned())
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        let inner = self.lock();
        Ok(keys.iter().map(|k| inner.records.get(k).cloned()).collect())
    }

    async fn zadd(&self, key: &str, score: i64, member: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let index = inner.indexes.entry(key.to_string()).or_default();
        // Rescoring removes the old entry first, as ZADD does.
        index.retain(|(_, m), _| m != member);
        index.insert((score, member.to_string()), ());
        Ok(())
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: i64,
        max: i64,
    ) -> Result<Vec<String>, StoreError> {
        let inner = self.lock();
        let Some(index) = inner.indexes.get(key) else {
            return Ok(Vec::new());
        };
        Ok(index
            .keys()
            .filter(|(score, _)| *score >= min && *score <= max)
            .map(|(_, member)| member.clone())
            .collect())
    }

    async fn hincr(&self, key: &str, field: &str, by: i64) -> Result<i64, StoreError> {
        let mut inner = self.lock();
        let hash = inner.hashes.entry(key.to_string()).or_default();
        let current: i64 = hash
            .get(field)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let next = current + by;
        hash.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    async fn hset(&self, key: &str, field: &str, value: String) -> Result<(), StoreError> {
        self.lock()
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value);
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .lock()
            .hashes
            .get(key)
            .and_then(|hash| hash.get(field))
            .cloned())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_round_trip() {
        let kv = MemoryKv::new();
        kv.put("a", "1".to_string()).await.unwrap();
        assert_eq!(kv.get("a").await.unwrap(), Some("1".to_string()));
        assert_eq!(kv.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn get_many_preserves_order_and_gaps() {
        let kv = MemoryKv::new();
        kv.put("a", "1".to_string()).await.unwrap();
        kv.put("c", "3".to_string()).await.unwrap();

        let values = kv
            .get_many(&["a".to_string(), "b".to_string(), "c".to_string()])
            .await
            .unwrap();
        assert_eq!(
            values,
            vec![Some("1".to_string()), None, Some("3".to_string())]
        );
    }

    #[tokio::test]
    async fn zrange_orders_by_score_then_member() {
        let kv = MemoryKv::new();
        kv.zadd("idx", 30, "c").await.unwrap();
        kv.zadd("idx", 10, "b").await.unwrap();
        kv.zadd("idx", 10, "a").await.unwrap();
        kv.zadd("idx", 20, "d").await.unwrap();

        let all = kv.zrange_by_score("idx", i64::MIN, i64::MAX).await.unwrap();
        assert_eq!(all, vec!["a", "b", "d", "c"]);

        let window = kv.zrange_by_score("idx", 10, 20).await.unwrap();
        assert_eq!(window, vec!["a", "b", "d"]);
    }

    #[tokio::test]
    async fn zadd_rescores_existing_member() {
        let kv = MemoryKv::new();
        kv.zadd("idx", 10, "a").await.unwrap();
        kv.zadd("idx", 99, "a").await.unwrap();

        let all = kv.zrange_by_score("idx", i64::MIN, i64::MAX).await.unwrap();
        assert_eq!(all, vec!["a"]);
        assert!(kv.zrange_by_score("idx", 0, 50).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_index_is_empty() {
        let kv = MemoryKv::new();
        assert!(kv
            .zrange_by_score("nope", i64::MIN, i64::MAX)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn hash_fields_increment_and_read_back() {
        let kv = MemoryKv::new();
        assert_eq!(kv.hincr("h", "count", 1).await.unwrap(), 1);
        assert_eq!(kv.hincr("h", "count", 1).await.unwrap(), 2);

        kv.hset("h", "last", "2026-01-10T12:00:00Z".to_string())
            .await
            .unwrap();
        assert_eq!(
            kv.hget("h", "last").await.unwrap(),
            Some("2026-01-10T12:00:00Z".to_string())
        );
        assert_eq!(kv.hget("h", "missing").await.unwrap(), None);
    }
}
