//! The public READ/WRITE/CLEAR surface: read-through, write-through, the
//! write-behind overflow decision, ETag enforcement, and legacy-id migration.
//!
//! This is the grain storage core (§4.5 of the storage's component design).
//! Everything it needs from the cache and durable tiers is expressed purely
//! through the [`CacheAdapter`] and [`DurableStore`] traits, so a
//! `GrainStorage` never depends on Redis or Postgres directly.

use std::sync::Arc;

use tracing::{debug, warn};

use grainstore_cache::CacheAdapter;
use grainstore_core::{keys, CacheEnvelope, Document, GrainStorageConfig, GrainStorageError, GrainStorageResult, StateSlot};
use grainstore_durable::DurableStore;

/// `typeString` carried on every envelope this implementation writes. Payload
/// types are never resolved back to a concrete Rust type across process
/// boundaries here — callers work with `serde_json::Value` throughout — so
/// this is a fixed marker rather than a per-call type name. See the
/// "Dynamic payload type in the drainer" design note for why that's an
/// acceptable simplification.
const TYPE_STRING: &str = "json";

/// The grain storage core for one storage-name.
///
/// Cheap to clone via `Arc` and safe to share across concurrent callers: the
/// only mutable state it touches lives in the cache and durable tiers, not in
/// this struct.
pub struct GrainStorage {
    cluster_id: String,
    storage_name: String,
    config: GrainStorageConfig,
    durable: Arc<dyn DurableStore>,
    cache: Option<Arc<dyn CacheAdapter>>,
}

impl GrainStorage {
    pub fn new(
        cluster_id: impl Into<String>,
        storage_name: impl Into<String>,
        config: GrainStorageConfig,
        durable: Arc<dyn DurableStore>,
        cache: Option<Arc<dyn CacheAdapter>>,
    ) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            storage_name: storage_name.into(),
            config,
            durable,
            cache,
        }
    }

    pub fn storage_name(&self) -> &str {
        &self.storage_name
    }

    pub fn config(&self) -> &GrainStorageConfig {
        &self.config
    }

    fn db_tenant(&self) -> Option<String> {
        self.config.use_tenant_per_storage.then(|| self.storage_name.clone())
    }

    /// Loads the current state of `entity_id` into `slot`, preferring the
    /// cache when read-through is enabled. Never returns an error: on an
    /// unrecoverable failure `slot` is left as it was passed in and the
    /// failure is only logged, matching the READ contract that the host
    /// retries naturally on a later tick.
    pub async fn read(&self, entity_id: &str, tenant: Option<&str>, slot: &mut StateSlot) {
        if self.config.write_behind.enable_read_through {
            if let Some(cache) = &self.cache {
                match cache.read(&self.storage_name, tenant, entity_id).await {
                    Ok(Some(entry)) => {
                        *slot = StateSlot {
                            data: entry.serialized_data,
                            etag: Some(entry.etag),
                            record_exists: true,
                        };
                        return;
                    }
                    Ok(None) => {}
                    Err(e) => debug!(storage = %self.storage_name, entity_id, error = %e, "cache read failed, falling back to durable store"),
                }
            }
        }

        let canonical_id = keys::document_id(&self.cluster_id, entity_id);
        let db_tenant = self.db_tenant();
        match self.durable.load(&canonical_id, db_tenant.as_deref()).await {
            Ok(Some(doc)) => {
                self.populate_from_document(entity_id, &doc, tenant, slot).await;
                return;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(storage = %self.storage_name, entity_id, error = %e, "durable load failed");
                return;
            }
        }

        let legacy_id = keys::legacy_document_id(entity_id);
        match self.durable.load(&legacy_id, db_tenant.as_deref()).await {
            Ok(Some(legacy_doc)) => {
                self.migrate(&legacy_id, &canonical_id, &legacy_doc, db_tenant.as_deref()).await;
                self.populate_from_document(entity_id, &legacy_doc, tenant, slot).await;
            }
            Ok(None) => *slot = StateSlot::absent(),
            Err(e) => warn!(storage = %self.storage_name, entity_id, error = %e, "legacy durable load failed"),
        }
    }

    async fn populate_from_document(&self, entity_id: &str, doc: &Document, tenant: Option<&str>, slot: &mut StateSlot) {
        let etag = match doc.etag() {
            Ok(etag) => etag,
            Err(e) => {
                warn!(storage = %self.storage_name, id = %doc.id, error = %e, "failed to recompute etag on read");
                return;
            }
        };
        *slot = StateSlot {
            data: doc.data.clone(),
            etag: Some(etag.clone()),
            record_exists: true,
        };

        if self.config.write_behind.enable_read_through {
            if let Some(cache) = &self.cache {
                let envelope = CacheEnvelope::new(doc.data.clone(), TYPE_STRING, etag, doc.last_modified_ms);
                if let Err(e) = cache
                    .write(&self.storage_name, tenant, &entity_id, &envelope, self.config.write_behind.state_ttl_sec)
                    .await
                {
                    debug!(storage = %self.storage_name, error = %e, "failed to warm cache after durable read");
                }
            }
        }
    }

    /// Migrates a legacy-id document to the canonical id. Per the documented
    /// idempotence guarantee, a failure deleting the legacy id leaves both
    /// copies in place; a later READ simply repeats the migration.
    async fn migrate(&self, legacy_id: &str, canonical_id: &str, legacy_doc: &Document, db_tenant: Option<&str>) {
        let canonical_doc = Document::new(canonical_id, legacy_doc.data.clone(), legacy_doc.last_modified_ms);
        if let Err(e) = self.durable.upsert(&canonical_doc, db_tenant).await {
            warn!(storage = %self.storage_name, canonical_id, error = %e, "failed to migrate legacy document to canonical id");
            return;
        }
        if let Err(e) = self.durable.delete(legacy_id, db_tenant).await {
            warn!(storage = %self.storage_name, legacy_id, error = %e, "failed to delete legacy document after migration");
        }
    }

    /// Writes `slot.data` for `entity_id`, taking the write-behind overflow
    /// path when the cluster-wide write rate exceeds the configured
    /// threshold, otherwise the write-through path.
    pub async fn write(&self, entity_id: &str, tenant: Option<&str>, slot: &mut StateSlot) -> GrainStorageResult<()> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let canonical_id = keys::document_id(&self.cluster_id, entity_id);
        let new_doc = Document::new(canonical_id.clone(), slot.data.clone(), now_ms);
        let new_etag = new_doc.etag()?;

        if self.config.write_behind.enable_write_behind {
            if let Some(cache) = &self.cache {
                if self.try_write_behind(cache, entity_id, tenant, &new_doc, &new_etag).await {
                    slot.etag = Some(new_etag);
                    slot.record_exists = true;
                    return Ok(());
                }
            }
        }

        self.write_through(entity_id, tenant, &new_doc, &new_etag, slot).await
    }

    /// Attempts the overflow write-behind path. Returns `true` if it
    /// succeeded and the caller should treat the write as complete; `false`
    /// if overflow did not engage or the cache failed, in which case the
    /// caller must fall through to write-through.
    async fn try_write_behind(
        &self,
        cache: &Arc<dyn CacheAdapter>,
        entity_id: &str,
        tenant: Option<&str>,
        new_doc: &Document,
        new_etag: &str,
    ) -> bool {
        let count = match cache.incr_write_counter(&self.storage_name).await {
            Ok(count) => count,
            Err(e) => {
                debug!(storage = %self.storage_name, error = %e, "write counter increment failed, treating as non-overflow");
                0
            }
        };

        if count <= self.config.write_behind.threshold {
            return false;
        }

        let envelope = CacheEnvelope::new(new_doc.data.clone(), TYPE_STRING, new_etag.to_string(), new_doc.last_modified_ms);
        let write_result = cache
            .write(&self.storage_name, tenant, entity_id, &envelope, self.config.write_behind.state_ttl_sec)
            .await;
        if let Err(e) = write_result {
            warn!(storage = %self.storage_name, entity_id, error = %e, "write-behind cache write failed, falling back to write-through");
            return false;
        }

        if let Err(e) = cache.mark_dirty(&self.storage_name, tenant, entity_id).await {
            warn!(storage = %self.storage_name, entity_id, error = %e, "mark-dirty failed after write-behind write, falling back to write-through");
            return false;
        }

        true
    }

    async fn write_through(
        &self,
        entity_id: &str,
        tenant: Option<&str>,
        new_doc: &Document,
        new_etag: &str,
        slot: &mut StateSlot,
    ) -> GrainStorageResult<()> {
        let db_tenant = self.db_tenant();

        if self.config.check_concurrency && slot.record_exists {
            if let Some(expected_etag) = &slot.etag {
                if let Some(current_doc) = self
                    .durable
                    .load(&new_doc.id, db_tenant.as_deref())
                    .await
                    .map_err(GrainStorageError::DurableStoreFailure)?
                {
                    let actual_etag = current_doc.etag()?;
                    if &actual_etag != expected_etag {
                        return Err(GrainStorageError::ConcurrencyConflict {
                            entity_id: entity_id.to_string(),
                            expected_etag: expected_etag.clone(),
                            actual_etag,
                        });
                    }
                }
            }
        }

        self.durable
            .upsert(new_doc, db_tenant.as_deref())
            .await
            .map_err(GrainStorageError::DurableStoreFailure)?;

        slot.etag = Some(new_etag.to_string());
        slot.record_exists = true;

        if self.config.write_behind.enable_read_through || self.config.write_behind.enable_write_behind {
            if let Some(cache) = &self.cache {
                let envelope = CacheEnvelope::new(new_doc.data.clone(), TYPE_STRING, new_etag.to_string(), new_doc.last_modified_ms);
                if let Err(e) = cache
                    .write(&self.storage_name, tenant, entity_id, &envelope, self.config.write_behind.state_ttl_sec)
                    .await
                {
                    debug!(storage = %self.storage_name, entity_id, error = %e, "cache refresh after write-through failed");
                }
                if let Err(e) = cache.clear_dirty(&self.storage_name, tenant, entity_id).await {
                    debug!(storage = %self.storage_name, entity_id, error = %e, "clear-dirty after write-through failed");
                }
            }
        }

        Ok(())
    }

    /// Deletes `entity_id`'s document from the durable store and reports the
    /// cleared slot. Cache entries are proactively removed but a failure to
    /// do so is not fatal — they are allowed to age out per the documented
    /// CLEAR contract.
    pub async fn clear(&self, entity_id: &str, tenant: Option<&str>, slot: &mut StateSlot) -> GrainStorageResult<()> {
        let canonical_id = keys::document_id(&self.cluster_id, entity_id);
        let db_tenant = self.db_tenant();

        self.durable
            .delete(&canonical_id, db_tenant.as_deref())
            .await
            .map_err(GrainStorageError::DurableStoreFailure)?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.remove(&self.storage_name, tenant, entity_id).await {
                debug!(storage = %self.storage_name, entity_id, error = %e, "cache removal after clear failed");
            }
        }

        *slot = StateSlot::absent();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grainstore_cache::testing::InMemoryCache;
    use grainstore_core::WriteBehindConfig;
    use grainstore_durable::testing::InMemoryStore;
    use serde_json::json;

    fn storage_with_cache() -> GrainStorage {
        GrainStorage::new(
            "c1",
            "s1",
            GrainStorageConfig::default(),
            Arc::new(InMemoryStore::default()),
            Some(Arc::new(InMemoryCache::default())),
        )
    }

    fn storage_without_cache() -> GrainStorage {
        GrainStorage::new("c1", "s1", GrainStorageConfig::default(), Arc::new(InMemoryStore::default()), None)
    }

    #[tokio::test]
    async fn scenario_1_new_grain_basic_write_through() {
        let storage = storage_without_cache();
        let mut slot = StateSlot::absent();
        slot.data = json!({"n": "a", "v": 1});
        storage.write("u/1", None, &mut slot).await.unwrap();

        assert!(slot.etag.is_some());
        assert!(slot.record_exists);

        let mut read_slot = StateSlot::absent();
        storage.read("u/1", None, &mut read_slot).await;
        assert_eq!(read_slot.data, json!({"n": "a", "v": 1}));
        assert_eq!(read_slot.etag, slot.etag);
    }

    #[tokio::test]
    async fn scenario_2_concurrency_conflict() {
        let storage = storage_without_cache();
        let mut slot = StateSlot::absent();
        slot.data = json!({"n": "a", "v": 1});
        storage.write("u/1", None, &mut slot).await.unwrap();

        // externally mutate the document underneath the caller's stale slot
        let canonical_id = keys::document_id("c1", "u/1");
        let mutated = Document::new(canonical_id, json!({"n": "x", "v": 9}), 999);
        storage.durable.upsert(&mutated, None).await.unwrap();

        slot.data = json!({"n": "b", "v": 2});
        let result = storage.write("u/1", None, &mut slot).await;
        assert!(matches!(result, Err(GrainStorageError::ConcurrencyConflict { .. })));

        let mut read_slot = StateSlot::absent();
        storage.read("u/1", None, &mut read_slot).await;
        assert_eq!(read_slot.data, json!({"n": "x", "v": 9}));
    }

    #[tokio::test]
    async fn scenario_3_overflow_write_behind_then_drain() {
        let mut config = GrainStorageConfig::default();
        config.write_behind = WriteBehindConfig {
            threshold: 0,
            ..WriteBehindConfig::default()
        };
        let cache = Arc::new(InMemoryCache::default());
        let durable = Arc::new(InMemoryStore::default());
        let storage = GrainStorage::new("c1", "s1", config, durable.clone(), Some(cache.clone()));

        let mut slot = StateSlot::absent();
        slot.data = json!({"n": "w", "v": 7});
        storage.write("u/2", None, &mut slot).await.unwrap();

        assert!(storage.durable.load("c1_u_2", None).await.unwrap().is_none());
        let dirty = cache.pop_dirty("s1", None, 10).await.unwrap();
        assert_eq!(dirty, vec!["u_2".to_string()]);
    }

    #[tokio::test]
    async fn scenario_4_legacy_id_migration() {
        let storage = storage_without_cache();
        let legacy = Document::new("TestState/migration-1", json!({"n": "old", "v": 5}), 1_700_000_000_000);
        storage.durable.upsert(&legacy, None).await.unwrap();

        let mut slot = StateSlot::absent();
        storage.read("TestState/migration-1", None, &mut slot).await;
        assert_eq!(slot.data, json!({"n": "old", "v": 5}));
        assert!(slot.record_exists);

        assert!(storage.durable.load("TestState/migration-1", None).await.unwrap().is_none());
        assert!(storage
            .durable
            .load("c1_TestState_migration-1", None)
            .await
            .unwrap()
            .is_some());

        let mut second_read = StateSlot::absent();
        storage.read("TestState/migration-1", None, &mut second_read).await;
        assert_eq!(second_read.data, json!({"n": "old", "v": 5}));
    }

    #[tokio::test]
    async fn scenario_6_cache_failure_falls_back_to_write_through() {
        // A cache whose mark_dirty always fails, simulating CacheFailureFatal.
        struct FailingMarkDirtyCache(InMemoryCache);

        #[async_trait::async_trait]
        impl CacheAdapter for FailingMarkDirtyCache {
            async fn read(&self, s: &str, t: Option<&str>, e: &str) -> Result<Option<CacheEnvelope>, grainstore_cache::CacheError> {
                self.0.read(s, t, e).await
            }
            async fn write(
                &self,
                s: &str,
                t: Option<&str>,
                e: &str,
                env: &CacheEnvelope,
                ttl: u64,
            ) -> Result<(), grainstore_cache::CacheError> {
                self.0.write(s, t, e, env, ttl).await
            }
            async fn remove(&self, s: &str, t: Option<&str>, e: &str) -> Result<(), grainstore_cache::CacheError> {
                self.0.remove(s, t, e).await
            }
            async fn mark_dirty(&self, _s: &str, _t: Option<&str>, _e: &str) -> Result<(), grainstore_cache::CacheError> {
                Err(grainstore_cache::CacheError(redis::RedisError::from(std::io::Error::other("boom"))))
            }
            async fn clear_dirty(&self, s: &str, t: Option<&str>, e: &str) -> Result<(), grainstore_cache::CacheError> {
                self.0.clear_dirty(s, t, e).await
            }
            async fn pop_dirty(&self, s: &str, t: Option<&str>, n: usize) -> Result<Vec<String>, grainstore_cache::CacheError> {
                self.0.pop_dirty(s, t, n).await
            }
            async fn incr_write_counter(&self, s: &str) -> Result<u64, grainstore_cache::CacheError> {
                self.0.incr_write_counter(s).await
            }
            async fn try_acquire_drain_lease(&self, s: &str, ttl: u64) -> Result<bool, grainstore_cache::CacheError> {
                self.0.try_acquire_drain_lease(s, ttl).await
            }
            async fn release_drain_lease(&self, s: &str) -> Result<(), grainstore_cache::CacheError> {
                self.0.release_drain_lease(s).await
            }
        }

        let mut config = GrainStorageConfig::default();
        config.write_behind.threshold = 0;
        let cache: Arc<dyn CacheAdapter> = Arc::new(FailingMarkDirtyCache(InMemoryCache::default()));
        let durable = Arc::new(InMemoryStore::default());
        let storage = GrainStorage::new("c1", "s1", config, durable.clone(), Some(cache.clone()));

        let mut slot = StateSlot::absent();
        slot.data = json!({"n": "w", "v": 1});
        storage.write("u/3", None, &mut slot).await.unwrap();

        let doc = durable.load("c1_u_3", None).await.unwrap().unwrap();
        assert_eq!(doc.data, json!({"n": "w", "v": 1}));
        assert_eq!(slot.etag.unwrap(), doc.etag().unwrap());
        assert!(cache.pop_dirty("s1", None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn scenario_6b_cache_write_failure_falls_back_to_write_through() {
        // A cache whose write always fails, simulating CacheFailureFatal on the
        // write-behind write itself rather than on the subsequent mark_dirty.
        struct FailingWriteCache(InMemoryCache);

        #[async_trait::async_trait]
        impl CacheAdapter for FailingWriteCache {
            async fn read(&self, s: &str, t: Option<&str>, e: &str) -> Result<Option<CacheEnvelope>, grainstore_cache::CacheError> {
                self.0.read(s, t, e).await
            }
            async fn write(
                &self,
                _s: &str,
                _t: Option<&str>,
                _e: &str,
                _env: &CacheEnvelope,
                _ttl: u64,
            ) -> Result<(), grainstore_cache::CacheError> {
                Err(grainstore_cache::CacheError(redis::RedisError::from(std::io::Error::other("boom"))))
            }
            async fn remove(&self, s: &str, t: Option<&str>, e: &str) -> Result<(), grainstore_cache::CacheError> {
                self.0.remove(s, t, e).await
            }
            async fn mark_dirty(&self, s: &str, t: Option<&str>, e: &str) -> Result<(), grainstore_cache::CacheError> {
                self.0.mark_dirty(s, t, e).await
            }
            async fn clear_dirty(&self, s: &str, t: Option<&str>, e: &str) -> Result<(), grainstore_cache::CacheError> {
                self.0.clear_dirty(s, t, e).await
            }
            async fn pop_dirty(&self, s: &str, t: Option<&str>, n: usize) -> Result<Vec<String>, grainstore_cache::CacheError> {
                self.0.pop_dirty(s, t, n).await
            }
            async fn incr_write_counter(&self, s: &str) -> Result<u64, grainstore_cache::CacheError> {
                self.0.incr_write_counter(s).await
            }
            async fn try_acquire_drain_lease(&self, s: &str, ttl: u64) -> Result<bool, grainstore_cache::CacheError> {
                self.0.try_acquire_drain_lease(s, ttl).await
            }
            async fn release_drain_lease(&self, s: &str) -> Result<(), grainstore_cache::CacheError> {
                self.0.release_drain_lease(s).await
            }
        }

        let mut config = GrainStorageConfig::default();
        config.write_behind.threshold = 0;
        let cache: Arc<dyn CacheAdapter> = Arc::new(FailingWriteCache(InMemoryCache::default()));
        let durable = Arc::new(InMemoryStore::default());
        let storage = GrainStorage::new("c1", "s1", config, durable.clone(), Some(cache.clone()));

        let mut slot = StateSlot::absent();
        slot.data = json!({"n": "w", "v": 2});
        storage.write("u/4", None, &mut slot).await.unwrap();

        let doc = durable.load("c1_u_4", None).await.unwrap().unwrap();
        assert_eq!(doc.data, json!({"n": "w", "v": 2}));
        assert_eq!(slot.etag.unwrap(), doc.etag().unwrap());
        assert!(cache.pop_dirty("s1", None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_removes_the_document() {
        let storage = storage_with_cache();
        let mut slot = StateSlot::absent();
        slot.data = json!({"n": "a"});
        storage.write("u/5", None, &mut slot).await.unwrap();

        storage.clear("u/5", None, &mut slot).await.unwrap();
        assert!(!slot.record_exists);
        assert_eq!(slot.etag, None);

        let mut read_slot = StateSlot::absent();
        storage.read("u/5", None, &mut read_slot).await;
        assert!(!read_slot.record_exists);
    }

    #[tokio::test]
    async fn first_write_succeeds_regardless_of_check_concurrency() {
        let storage = storage_without_cache();
        let mut slot = StateSlot::absent();
        slot.data = json!({"n": "a"});
        assert!(storage.write("u/6", None, &mut slot).await.is_ok());
    }
}
