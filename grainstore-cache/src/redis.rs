//! Redis-backed implementation of [`crate::CacheAdapter`].
//!
//! Grounded in the same `redis::aio::ConnectionManager` + `AsyncCommands`
//! pattern used throughout the corpus's distributed-cache code: one
//! `ConnectionManager` is opened per process and cloned cheaply per call,
//! since it multiplexes over a single multiplexed connection and reconnects
//! transparently.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::debug;

use grainstore_core::{keys, CacheEnvelope};

use crate::{CacheAdapter, CacheError};

/// A lease value written by [`RedisCacheAdapter::try_acquire_drain_lease`].
/// Its content is never inspected, only its presence/absence.
const LEASE_VALUE: &str = "locked";

pub struct RedisCacheAdapter {
    cluster_id: String,
    conn: ConnectionManager,
}

impl RedisCacheAdapter {
    /// Opens a connection manager against `redis_url` for `cluster_id`.
    pub async fn connect(redis_url: &str, cluster_id: impl Into<String>) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            cluster_id: cluster_id.into(),
            conn,
        })
    }

    /// Adopts an already-constructed connection manager, e.g. one shared with
    /// other subsystems of a host process.
    pub fn new(conn: ConnectionManager, cluster_id: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            conn,
        }
    }
}

#[async_trait::async_trait]
impl CacheAdapter for RedisCacheAdapter {
    async fn read(
        &self,
        storage_name: &str,
        tenant: Option<&str>,
        entity_id: &str,
    ) -> Result<Option<CacheEnvelope>, CacheError> {
        let map_key = keys::state_map_key(&self.cluster_id, storage_name, tenant);
        let field = keys::cache_grain_key(entity_id);
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.hget(&map_key, &field).await?;
        Ok(raw.and_then(|json| serde_json::from_str(&json).ok()))
    }

    async fn write(
        &self,
        storage_name: &str,
        tenant: Option<&str>,
        entity_id: &str,
        envelope: &CacheEnvelope,
        state_ttl_sec: u64,
    ) -> Result<(), CacheError> {
        let map_key = keys::state_map_key(&self.cluster_id, storage_name, tenant);
        let field = keys::cache_grain_key(entity_id);
        let json = serde_json::to_string(envelope)
            .expect("CacheEnvelope always serializes: its fields are plain JSON/String/i64");
        let mut conn = self.conn.clone();
        conn.hset::<_, _, _, ()>(&map_key, &field, json).await?;
        if state_ttl_sec > 0 {
            conn.expire::<_, ()>(&map_key, state_ttl_sec as i64).await?;
        }
        Ok(())
    }

    async fn remove(&self, storage_name: &str, tenant: Option<&str>, entity_id: &str) -> Result<(), CacheError> {
        let map_key = keys::state_map_key(&self.cluster_id, storage_name, tenant);
        let field = keys::cache_grain_key(entity_id);
        let mut conn = self.conn.clone();
        conn.hdel::<_, _, ()>(&map_key, &field).await?;
        Ok(())
    }

    async fn mark_dirty(&self, storage_name: &str, tenant: Option<&str>, entity_id: &str) -> Result<(), CacheError> {
        let dirty_key = keys::dirty_set_key(&self.cluster_id, storage_name, tenant);
        let field = keys::cache_grain_key(entity_id);
        let mut conn = self.conn.clone();
        conn.sadd::<_, _, ()>(&dirty_key, field).await?;
        Ok(())
    }

    async fn clear_dirty(&self, storage_name: &str, tenant: Option<&str>, entity_id: &str) -> Result<(), CacheError> {
        let dirty_key = keys::dirty_set_key(&self.cluster_id, storage_name, tenant);
        let field = keys::cache_grain_key(entity_id);
        let mut conn = self.conn.clone();
        conn.srem::<_, _, ()>(&dirty_key, field).await?;
        Ok(())
    }

    async fn pop_dirty(&self, storage_name: &str, tenant: Option<&str>, n: usize) -> Result<Vec<String>, CacheError> {
        let dirty_key = keys::dirty_set_key(&self.cluster_id, storage_name, tenant);
        let mut conn = self.conn.clone();
        // SPOP key count: atomic remove-and-return, so a crash mid-drain never
        // loses track of which keys were claimed.
        let popped: Vec<String> = redis::cmd("SPOP")
            .arg(&dirty_key)
            .arg(n)
            .query_async(&mut conn)
            .await?;
        debug!(storage_name, count = popped.len(), "popped dirty entries");
        Ok(popped)
    }

    async fn incr_write_counter(&self, storage_name: &str) -> Result<u64, CacheError> {
        let counter_key = keys::write_counter_key(&self.cluster_id, storage_name);
        let mut conn = self.conn.clone();
        let count: u64 = conn.incr(&counter_key, 1u64).await?;
        if count == 1 {
            conn.expire::<_, ()>(&counter_key, 1).await?;
        }
        Ok(count)
    }

    async fn try_acquire_drain_lease(&self, storage_name: &str, ttl_sec: u64) -> Result<bool, CacheError> {
        let lease_key = keys::drain_lease_key(&self.cluster_id, storage_name);
        let mut conn = self.conn.clone();
        // SET key value NX EX ttl: atomic set-if-absent-with-expiry, the
        // standard Redis distributed-lease primitive.
        let acquired: Option<String> = redis::cmd("SET")
            .arg(&lease_key)
            .arg(LEASE_VALUE)
            .arg("NX")
            .arg("EX")
            .arg(ttl_sec)
            .query_async(&mut conn)
            .await?;
        Ok(acquired.is_some())
    }

    async fn release_drain_lease(&self, storage_name: &str) -> Result<(), CacheError> {
        let lease_key = keys::drain_lease_key(&self.cluster_id, storage_name);
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(&lease_key).await?;
        Ok(())
    }
}
