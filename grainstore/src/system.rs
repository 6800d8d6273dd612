//! `GrainStorageSystem`: the top-level orchestrator that wires the durable
//! store adapter, the cache adapter, and the background drainer together and
//! hands out one [`GrainStorage`] per storage-name.
//!
//! Modeled on the corpus's convention of a single facade struct owning
//! `Arc`-wrapped subsystems and exposing an explicit `start`/`stop` lifecycle
//! rather than doing background-task management in a constructor.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

use grainstore_cache::CacheAdapter;
use grainstore_core::GrainStorageConfig;
use grainstore_drainer::{Drainer, DrainerStatsSnapshot, StorageRegistration};
use grainstore_durable::DurableStore;

use crate::storage::GrainStorage;

/// Owns the shared durable/cache adapters for one cluster and produces
/// per-storage [`GrainStorage`] handles, registering each with the
/// background drainer when a cache adapter is configured.
pub struct GrainStorageSystem {
    cluster_id: String,
    durable: Arc<dyn DurableStore>,
    cache: Option<Arc<dyn CacheAdapter>>,
    drainer: Option<Arc<Drainer>>,
    storages: DashMap<String, Arc<GrainStorage>>,
    drain_handle: Mutex<Option<JoinHandle<()>>>,
}

impl GrainStorageSystem {
    /// Creates a system with no cache tier: every storage it hands out always
    /// takes the write-through path, and no drainer is started.
    pub fn without_cache(cluster_id: impl Into<String>, durable: Arc<dyn DurableStore>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            durable,
            cache: None,
            drainer: None,
            storages: DashMap::new(),
            drain_handle: Mutex::new(None),
        }
    }

    /// Creates a system with a cache tier and a drainer ready to be
    /// [`start`](Self::start)ed.
    pub fn with_cache(cluster_id: impl Into<String>, durable: Arc<dyn DurableStore>, cache: Arc<dyn CacheAdapter>) -> Self {
        let cluster_id = cluster_id.into();
        let drainer = Arc::new(Drainer::new(cluster_id.clone(), cache.clone(), durable.clone()));
        Self {
            cluster_id,
            durable,
            cache: Some(cache),
            drainer: Some(drainer),
            storages: DashMap::new(),
            drain_handle: Mutex::new(None),
        }
    }

    /// Returns the `GrainStorage` for `storage_name`, creating it with
    /// `config` on first access and registering it with the drainer under
    /// `cache_tenant` if a cache tier is present. Subsequent calls with the
    /// same `storage_name` ignore `config`/`cache_tenant` and return the
    /// existing handle — configuration is fixed at first use.
    pub async fn storage(&self, storage_name: &str, config: GrainStorageConfig, cache_tenant: Option<&str>) -> Arc<GrainStorage> {
        if let Some(existing) = self.storages.get(storage_name) {
            return existing.clone();
        }

        let handle = Arc::new(GrainStorage::new(
            self.cluster_id.clone(),
            storage_name,
            config.clone(),
            self.durable.clone(),
            self.cache.clone(),
        ));

        if let Some(drainer) = &self.drainer {
            let registration = StorageRegistration {
                storage_name: storage_name.to_string(),
                cache_tenant: cache_tenant.map(str::to_string),
                use_tenant_per_storage: config.use_tenant_per_storage,
                config: config.write_behind,
            };
            drainer.register(registration).await;
        }

        self.storages.entry(storage_name.to_string()).or_insert(handle).clone()
    }

    /// Starts the background drainer, ticking every `drain_tick_interval_sec`
    /// seconds. A no-op if this system has no cache tier.
    pub async fn start(&self, drain_tick_interval_sec: u64) {
        let Some(drainer) = &self.drainer else {
            return;
        };
        info!(cluster = %self.cluster_id, "starting grain storage drainer");
        let handle = drainer.clone().spawn(drain_tick_interval_sec);
        *self.drain_handle.lock().await = Some(handle);
    }

    /// Stops the background drainer started by [`start`](Self::start).
    pub async fn stop(&self) {
        if let Some(handle) = self.drain_handle.lock().await.take() {
            info!(cluster = %self.cluster_id, "stopping grain storage drainer");
            handle.abort();
        }
    }

    pub fn drainer_stats(&self) -> Option<DrainerStatsSnapshot> {
        self.drainer.as_ref().map(|d| d.stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grainstore_cache::testing::InMemoryCache;
    use grainstore_durable::testing::InMemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn storage_returns_the_same_handle_on_repeated_access() {
        let system = GrainStorageSystem::without_cache("c1", Arc::new(InMemoryStore::default()));
        let a = system.storage("s1", GrainStorageConfig::default(), None).await;
        let b = system.storage("s1", GrainStorageConfig::default(), None).await;
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn without_cache_system_has_no_drainer_stats() {
        let system = GrainStorageSystem::without_cache("c1", Arc::new(InMemoryStore::default()));
        assert!(system.drainer_stats().is_none());
        system.start(5).await;
        system.stop().await;
    }

    #[tokio::test]
    async fn with_cache_system_reports_drainer_stats_after_a_cycle() {
        let cache = Arc::new(InMemoryCache::default());
        let durable = Arc::new(InMemoryStore::default());
        let system = GrainStorageSystem::with_cache("c1", durable, cache);
        let storage = system.storage("s1", GrainStorageConfig::default(), None).await;

        let mut slot = grainstore_core::StateSlot::absent();
        slot.data = json!({"n": "a"});
        storage.write("u/1", None, &mut slot).await.unwrap();

        assert_eq!(system.drainer_stats().unwrap().cycles, 0);
    }
}
