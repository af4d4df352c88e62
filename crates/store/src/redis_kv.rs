//! Redis [`SortedKv`] backend.
//!
//! One multiplexed connection serves all store traffic; the event store
//! composes the actual key shapes (see `store.rs`). Commands map 1:1
//! onto Redis primitives: SET/GET/MGET, ZADD/ZRANGEBYSCORE, and
//! HINCRBY/HSET/HGET for the replay bookkeeping hashes.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use crate::backend::SortedKv;
use crate::error::StoreError;

/// Redis-backed [`SortedKv`].
pub struct RedisKv {
    conn: MultiplexedConnection,
}

impl RedisKv {
    /// Connect to the store at the given URL.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(StoreError::from)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(StoreError::from)?;
        Ok(Self { conn })
    }

    /// Wrap an existing connection (lets the bus share one client).
    pub fn from_connection(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl SortedKv for RedisKv {
    async fn put(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        // MGET with a single key returns a scalar, so go through the
        // generic command builder for a uniform reply shape.
        let mut cmd = redis::cmd("MGET");
        for key in keys {
            cmd.arg(key);
        }
        Ok(cmd.query_async(&mut conn).await?)
    }

    async fn zadd(&self, key: &str, score: i64, member: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.zadd::<_, _, _, ()>(key, member, score).await?;
        Ok(())
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: i64,
        max: i64,
    ) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.zrangebyscore(key, min, max).await?)
    }

    async fn hincr(&self, key: &str, field: &str, by: i64) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.hincr(key, field, by).await?)
    }

    async fn hset(&self, key: &str, field: &str, value: String) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.hset::<_, _, _, ()>(key, field, value).await?;
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.hget(key, field).await?)
    }
}
