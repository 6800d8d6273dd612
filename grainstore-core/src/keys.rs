//! Deterministic derivation of durable-store document ids and cache key names.
//!
//! Every function here is pure: given the same inputs it always produces the same
//! string, and no function performs I/O. This module is the single place that knows
//! the bit-exact key/id formats so that the read path, the write path, and the
//! drainer can never disagree with each other about where a given entity's state
//! lives.

/// Replaces the `/` separator in an entity identifier with `_`, the form that is
/// safe to embed in both durable-store document ids and cache key segments.
fn grain_key(entity_id: &str) -> String {
    entity_id.replace('/', "_")
}

/// The canonical durable-store document id: `{cluster}_{entity-with-underscores}`.
pub fn document_id(cluster_id: &str, entity_id: &str) -> String {
    format!("{}_{}", cluster_id, grain_key(entity_id))
}

/// The legacy durable-store document id: the raw, unmodified entity identifier.
///
/// Pre-migration documents were written under this id. [`document_id`] must be
/// consulted first on every read; this is only a fallback.
pub fn legacy_document_id(entity_id: &str) -> String {
    entity_id.to_string()
}

/// The field name under which an entity's cache entry lives within its storage's
/// state map.
pub fn cache_grain_key(entity_id: &str) -> String {
    grain_key(entity_id)
}

/// Reverses [`cache_grain_key`], recovering the entity id from a grain key popped
/// off the dirty set. Lossy in theory (an entity id could itself legitimately
/// contain an underscore), but the drainer only ever needs this to re-derive the
/// canonical document id, which applies the same forward mapping, so the round
/// trip through `document_id` is stable even when it isn't injective.
pub fn entity_id_from_grain_key(grain_key: &str) -> String {
    grain_key.replace('_', "/")
}

fn tenant_suffix(tenant: Option<&str>) -> String {
    match tenant {
        Some(t) if !t.is_empty() => format!(":tenant:{t}"),
        _ => String::new(),
    }
}

/// The Redis hash key holding every cached entry for a (cluster, storage, tenant).
pub fn state_map_key(cluster_id: &str, storage_name: &str, tenant: Option<&str>) -> String {
    format!(
        "mgs:{}:{}{}:state",
        cluster_id,
        storage_name,
        tenant_suffix(tenant)
    )
}

/// The Redis set key holding the grain keys not yet persisted to the durable store.
pub fn dirty_set_key(cluster_id: &str, storage_name: &str, tenant: Option<&str>) -> String {
    format!(
        "mgs:{}:{}{}:dirty",
        cluster_id,
        storage_name,
        tenant_suffix(tenant)
    )
}

/// The cluster-wide, tenant-less write-rate counter key for a storage.
///
/// Deliberately has no tenant component: surge detection is global per storage,
/// not per tenant, per §5 of the storage's concurrency model.
pub fn write_counter_key(cluster_id: &str, storage_name: &str) -> String {
    format!("mgs:{}:{}:wcount", cluster_id, storage_name)
}

/// The cluster-wide, tenant-less drain lease key for a storage.
pub fn drain_lease_key(cluster_id: &str, storage_name: &str) -> String {
    format!("mgs:{}:{}:drain-lock", cluster_id, storage_name)
}
