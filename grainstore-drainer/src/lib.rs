//! The background drainer: periodic, cluster-wide-exclusive reconciliation of
//! a storage's dirty cache entries into the durable store.
//!
//! ## Overview
//!
//! One `Drainer` runs per process and holds the set of storage-names
//! registered with it (by the `grainstore` facade, one registration per
//! storage it opens). Every tick, it attempts a drain cycle for each
//! registered storage; the storage's drain lease (see
//! `grainstore_core::keys::drain_lease_key`) ensures at most one process in
//! the cluster actually pops and persists dirty entries for a given storage
//! in a given cycle, so every process can safely run its own `Drainer`
//! without coordinating out of band.
//!
//! ## Failure handling
//!
//! A key that fails anywhere between being popped off the dirty set and being
//! durably upserted is re-marked dirty so a later cycle retries it. Because
//! `pop_dirty` removes a key before it is processed, a crash between pop and
//! re-mark would lose the key; accepting that narrow window in exchange for
//! at-most-one-popper-at-a-time is the same trade-off the cache adapter's
//! `SPOP`-equivalent contract makes explicit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use grainstore_cache::CacheAdapter;
use grainstore_core::{keys, CacheEnvelope, Document, WriteBehindConfig};
use grainstore_durable::DurableStore;

/// One storage-name's drain policy, as registered by the facade crate.
#[derive(Debug, Clone)]
pub struct StorageRegistration {
    pub storage_name: String,
    /// The request-scoped cache tenant this registration drains. A deployment
    /// that partitions traffic by tenant registers one `StorageRegistration`
    /// per (storage, tenant) pair it wants drained in the background, since
    /// the drainer has no ambient request context of its own to resolve this
    /// from per cycle.
    pub cache_tenant: Option<String>,
    /// Mirrors `GrainStorageConfig::use_tenant_per_storage`: when true, the
    /// durable-store session opened during drain uses `storage_name` as its
    /// database tenant.
    pub use_tenant_per_storage: bool,
    pub config: WriteBehindConfig,
}

/// The outcome of one drain attempt for one storage, for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Another process in the cluster held the lease this cycle.
    LeaseNotAcquired,
    /// The lease was acquired but the dirty set was empty.
    Empty,
    /// `drained` entries were durably persisted; `failed` were re-marked dirty
    /// for retry.
    Drained { drained: usize, failed: usize },
}

/// Cumulative counters surfaced for operational visibility, in the style of
/// the corpus's cache/storage `*Stats` snapshot structs.
#[derive(Debug, Default)]
pub struct DrainerStats {
    cycles: AtomicU64,
    drained: AtomicU64,
    failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DrainerStatsSnapshot {
    pub cycles: u64,
    pub drained: u64,
    pub failures: u64,
}

impl DrainerStats {
    pub fn snapshot(&self) -> DrainerStatsSnapshot {
        DrainerStatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            drained: self.drained.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// The background drainer. Cheap to clone via `Arc` and share between the
/// facade crate and a spawned background task.
pub struct Drainer {
    cluster_id: String,
    cache: Arc<dyn CacheAdapter>,
    durable: Arc<dyn DurableStore>,
    registrations: tokio::sync::RwLock<Vec<StorageRegistration>>,
    stats: DrainerStats,
}

impl Drainer {
    pub fn new(cluster_id: impl Into<String>, cache: Arc<dyn CacheAdapter>, durable: Arc<dyn DurableStore>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            cache,
            durable,
            registrations: tokio::sync::RwLock::new(Vec::new()),
            stats: DrainerStats::default(),
        }
    }

    /// Adds a storage to the set this drainer sweeps every cycle. Idempotent
    /// registration is the caller's responsibility; registering the same
    /// storage twice drains it twice per cycle.
    pub async fn register(&self, registration: StorageRegistration) {
        self.registrations.write().await.push(registration);
    }

    pub fn stats(&self) -> DrainerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Runs one drain cycle over every registered storage.
    pub async fn run_once(&self) -> Vec<(String, DrainOutcome)> {
        self.stats.cycles.fetch_add(1, Ordering::Relaxed);
        let registrations = self.registrations.read().await.clone();
        let mut results = Vec::with_capacity(registrations.len());
        for registration in &registrations {
            let outcome = self.drain_storage(registration).await;
            results.push((registration.storage_name.clone(), outcome));
        }
        results
    }

    /// Spawns a background task that runs a drain cycle every
    /// `tick_interval_sec` seconds until the returned handle is aborted.
    pub fn spawn(self: Arc<Self>, tick_interval_sec: u64) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(tick_interval_sec.max(1)));
            loop {
                ticker.tick().await;
                self.run_once().await;
            }
        })
    }

    async fn drain_storage(&self, reg: &StorageRegistration) -> DrainOutcome {
        let lease_acquired = match self
            .cache
            .try_acquire_drain_lease(&reg.storage_name, reg.config.drain_lock_ttl_sec)
            .await
        {
            Ok(acquired) => acquired,
            Err(e) => {
                warn!(storage = %reg.storage_name, error = %e, "failed to acquire drain lease");
                false
            }
        };

        if !lease_acquired {
            return DrainOutcome::LeaseNotAcquired;
        }

        let outcome = self.drain_with_lease(reg).await;

        if let Err(e) = self.cache.release_drain_lease(&reg.storage_name).await {
            warn!(storage = %reg.storage_name, error = %e, "failed to release drain lease");
        }

        outcome
    }

    async fn drain_with_lease(&self, reg: &StorageRegistration) -> DrainOutcome {
        let tenant = reg.cache_tenant.as_deref();
        let keys_popped = match self
            .cache
            .pop_dirty(&reg.storage_name, tenant, reg.config.batch_size)
            .await
        {
            Ok(keys) => keys,
            Err(e) => {
                warn!(storage = %reg.storage_name, error = %e, "failed to pop dirty set");
                return DrainOutcome::Empty;
            }
        };

        if keys_popped.is_empty() {
            return DrainOutcome::Empty;
        }

        let db_tenant = reg.use_tenant_per_storage.then(|| reg.storage_name.clone());
        let mut drained = 0usize;
        let mut failed = 0usize;

        for grain_key in keys_popped {
            let entity_id = keys::entity_id_from_grain_key(&grain_key);
            match self.drain_one(reg, tenant, db_tenant.as_deref(), &entity_id).await {
                Ok(true) => drained += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(storage = %reg.storage_name, entity_id, error = %e, "drain of entity failed, re-marking dirty");
                    self.stats.failures.fetch_add(1, Ordering::Relaxed);
                    failed += 1;
                    if let Err(e) = self.cache.mark_dirty(&reg.storage_name, tenant, &entity_id).await {
                        warn!(storage = %reg.storage_name, entity_id, error = %e, "failed to re-mark entity dirty after drain failure");
                    }
                }
            }
        }

        self.stats.drained.fetch_add(drained as u64, Ordering::Relaxed);
        DrainOutcome::Drained { drained, failed }
    }

    /// Drains a single dirty entity. Returns `Ok(true)` if it was persisted,
    /// `Ok(false)` if there was nothing to persist (entry already gone), and
    /// `Err` if persistence failed and the caller should retry later.
    async fn drain_one(
        &self,
        reg: &StorageRegistration,
        cache_tenant: Option<&str>,
        db_tenant: Option<&str>,
        entity_id: &str,
    ) -> anyhow::Result<bool> {
        let entry = match self.cache.read(&reg.storage_name, cache_tenant, entity_id).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                let _ = self.cache.clear_dirty(&reg.storage_name, cache_tenant, entity_id).await;
                return Ok(false);
            }
            Err(e) => return Err(anyhow::anyhow!("cache read failed: {e}")),
        };

        let last_modified_ms = chrono::Utc::now().timestamp_millis();
        let doc = Document::new(
            keys::document_id(&self.cluster_id, entity_id),
            entry.serialized_data.clone(),
            last_modified_ms,
        );

        self.durable
            .upsert(&doc, db_tenant)
            .await
            .map_err(|e| anyhow::anyhow!("durable upsert failed: {e}"))?;

        let new_etag = doc.etag().map_err(|e| anyhow::anyhow!("etag recompute failed: {e}"))?;
        let refreshed = CacheEnvelope::new(doc.data.clone(), entry.type_string.clone(), new_etag, last_modified_ms);
        if let Err(e) = self
            .cache
            .write(&reg.storage_name, cache_tenant, entity_id, &refreshed, reg.config.state_ttl_sec)
            .await
        {
            debug!(storage = %reg.storage_name, entity_id, error = %e, "cache refresh after drain failed, entry remains durable");
        }
        let _ = self.cache.clear_dirty(&reg.storage_name, cache_tenant, entity_id).await;

        Ok(true)
    }
}
