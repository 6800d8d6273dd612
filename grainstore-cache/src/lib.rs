//! The cache adapter: the coalescing write-behind buffer, the cluster-wide
//! write-rate counter, and the distributed drain lease, all backed by a
//! Redis-like key/value store.
//!
//! ## Overview
//!
//! Every operation here is best-effort from the grain storage core's
//! perspective except [`CacheAdapter::mark_dirty`] and the write call made on
//! the overflow path — those two are the ones whose failure must be visible,
//! because losing either one silently would mean a write-behind write is
//! never drained. Every other operation swallows its own transport errors at
//! the call site in the facade crate and falls back to the durable path or an
//! empty read.
//!
//! [`redis::RedisCacheAdapter`] is the production implementation; it speaks
//! the bit-exact key namespace defined by [`grainstore_core::keys`] so that
//! any cache tooling pointed at the same cluster sees the same layout this
//! crate writes.

pub mod error;
pub mod redis;

pub use error::CacheError;
pub use crate::redis::RedisCacheAdapter;

use async_trait::async_trait;
use grainstore_core::CacheEnvelope;

/// The cache contract the grain storage core and the drainer depend on.
///
/// `storage_name` selects the per-storage state map / dirty set; `tenant`
/// further partitions within it. The write-counter and drain-lease keys are
/// intentionally tenant-less (see `grainstore_core::keys`), so no `tenant`
/// parameter appears on those two methods.
#[async_trait]
pub trait CacheAdapter: Send + Sync {
    /// Reads the cached entry for `entity_id`, if any. Returns `Ok(None)` both
    /// when the field is absent and when the stored JSON is of an unrecognized
    /// shape; only a transport-level failure is an `Err`.
    async fn read(
        &self,
        storage_name: &str,
        tenant: Option<&str>,
        entity_id: &str,
    ) -> Result<Option<CacheEnvelope>, CacheError>;

    /// Sets the cached entry for `entity_id`. When `state_ttl_sec` is
    /// positive, (re)applies that TTL to the whole state map, per the
    /// documented coalescing-TTL design (a hot storage's map never expires
    /// while any key in it is still being written).
    async fn write(
        &self,
        storage_name: &str,
        tenant: Option<&str>,
        entity_id: &str,
        envelope: &CacheEnvelope,
        state_ttl_sec: u64,
    ) -> Result<(), CacheError>;

    /// Removes the cached entry for `entity_id`.
    async fn remove(&self, storage_name: &str, tenant: Option<&str>, entity_id: &str) -> Result<(), CacheError>;

    /// Adds `entity_id` to the dirty set. Must propagate failures: the caller
    /// (the write-behind path) treats this as fatal and falls through to
    /// write-through.
    async fn mark_dirty(&self, storage_name: &str, tenant: Option<&str>, entity_id: &str) -> Result<(), CacheError>;

    /// Removes `entity_id` from the dirty set.
    async fn clear_dirty(&self, storage_name: &str, tenant: Option<&str>, entity_id: &str) -> Result<(), CacheError>;

    /// Atomically removes and returns up to `n` members of the dirty set.
    async fn pop_dirty(&self, storage_name: &str, tenant: Option<&str>, n: usize) -> Result<Vec<String>, CacheError>;

    /// Atomically increments the storage's cluster-wide write counter and
    /// returns its new value. Implementations must apply a 1-second
    /// expiration exactly on the transition from 0 to 1, so the value
    /// approximates writes-per-second.
    async fn incr_write_counter(&self, storage_name: &str) -> Result<u64, CacheError>;

    /// Attempts to acquire the storage's drain lease for `ttl_sec` seconds.
    /// Returns `true` iff this call acquired it.
    async fn try_acquire_drain_lease(&self, storage_name: &str, ttl_sec: u64) -> Result<bool, CacheError>;

    /// Unconditionally releases the storage's drain lease.
    async fn release_drain_lease(&self, storage_name: &str) -> Result<(), CacheError>;
}

/// An in-process fake satisfying the `CacheAdapter` contract. Used by this
/// crate's own unit tests and re-used by `grainstore-drainer` and the
/// `grainstore` facade crate's tests so they can exercise cache-interaction
/// logic without a live Redis instance.
pub mod testing {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryCache {
        state: Mutex<HashMap<String, HashMap<String, CacheEnvelope>>>,
        dirty: Mutex<HashMap<String, HashSet<String>>>,
        counters: Mutex<HashMap<String, u64>>,
        leases: Mutex<HashSet<String>>,
    }

    fn map_key(storage: &str, tenant: Option<&str>) -> String {
        grainstore_core::keys::state_map_key("test-cluster", storage, tenant)
    }

    fn dirty_key(storage: &str, tenant: Option<&str>) -> String {
        grainstore_core::keys::dirty_set_key("test-cluster", storage, tenant)
    }

    #[async_trait]
    impl CacheAdapter for InMemoryCache {
        async fn read(
            &self,
            storage_name: &str,
            tenant: Option<&str>,
            entity_id: &str,
        ) -> Result<Option<CacheEnvelope>, CacheError> {
            let field = grainstore_core::keys::cache_grain_key(entity_id);
            Ok(self
                .state
                .lock()
                .unwrap()
                .get(&map_key(storage_name, tenant))
                .and_then(|m| m.get(&field))
                .cloned())
        }

        async fn write(
            &self,
            storage_name: &str,
            tenant: Option<&str>,
            entity_id: &str,
            envelope: &CacheEnvelope,
            _state_ttl_sec: u64,
        ) -> Result<(), CacheError> {
            let field = grainstore_core::keys::cache_grain_key(entity_id);
            self.state
                .lock()
                .unwrap()
                .entry(map_key(storage_name, tenant))
                .or_default()
                .insert(field, envelope.clone());
            Ok(())
        }

        async fn remove(&self, storage_name: &str, tenant: Option<&str>, entity_id: &str) -> Result<(), CacheError> {
            let field = grainstore_core::keys::cache_grain_key(entity_id);
            if let Some(m) = self.state.lock().unwrap().get_mut(&map_key(storage_name, tenant)) {
                m.remove(&field);
            }
            Ok(())
        }

        async fn mark_dirty(&self, storage_name: &str, tenant: Option<&str>, entity_id: &str) -> Result<(), CacheError> {
            let field = grainstore_core::keys::cache_grain_key(entity_id);
            self.dirty
                .lock()
                .unwrap()
                .entry(dirty_key(storage_name, tenant))
                .or_default()
                .insert(field);
            Ok(())
        }

        async fn clear_dirty(&self, storage_name: &str, tenant: Option<&str>, entity_id: &str) -> Result<(), CacheError> {
            let field = grainstore_core::keys::cache_grain_key(entity_id);
            if let Some(s) = self.dirty.lock().unwrap().get_mut(&dirty_key(storage_name, tenant)) {
                s.remove(&field);
            }
            Ok(())
        }

        async fn pop_dirty(&self, storage_name: &str, tenant: Option<&str>, n: usize) -> Result<Vec<String>, CacheError> {
            let mut dirty = self.dirty.lock().unwrap();
            let Some(set) = dirty.get_mut(&dirty_key(storage_name, tenant)) else {
                return Ok(Vec::new());
            };
            let popped: Vec<String> = set.iter().take(n).cloned().collect();
            for key in &popped {
                set.remove(key);
            }
            Ok(popped)
        }

        async fn incr_write_counter(&self, storage_name: &str) -> Result<u64, CacheError> {
            let mut counters = self.counters.lock().unwrap();
            let count = counters.entry(storage_name.to_string()).or_insert(0);
            *count += 1;
            Ok(*count)
        }

        async fn try_acquire_drain_lease(&self, storage_name: &str, _ttl_sec: u64) -> Result<bool, CacheError> {
            Ok(self.leases.lock().unwrap().insert(storage_name.to_string()))
        }

        async fn release_drain_lease(&self, storage_name: &str) -> Result<(), CacheError> {
            self.leases.lock().unwrap().remove(storage_name);
            Ok(())
        }
    }
}
