//! Typed configuration for a single storage-name's grain storage provider.
//!
//! These structs describe policy only. Connection strings, credentials, and
//! anything else needed to actually reach Postgres or Redis are constructor
//! arguments of `grainstore-durable`/`grainstore-cache`, not fields here — the
//! provider never parses a connection string itself.

use serde::{Deserialize, Serialize};

/// Top-level options for one storage-name's grain storage provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrainStorageConfig {
    /// When true, every durable-store session for this storage is opened with
    /// the database tenant set to the storage's own name, isolating it from
    /// every other storage at the database layer. Default `false`.
    #[serde(default)]
    pub use_tenant_per_storage: bool,

    /// When true, a write-through WRITE that claims to be updating an existing
    /// record enforces that the record's current ETag matches the caller's.
    /// Default `true`.
    #[serde(default = "default_true")]
    pub check_concurrency: bool,

    /// Write-behind / coalescing-cache policy. Disabled entirely (falls back to
    /// always-write-through) when no cache adapter is wired up, regardless of
    /// these settings.
    #[serde(default)]
    pub write_behind: WriteBehindConfig,
}

impl Default for GrainStorageConfig {
    fn default() -> Self {
        Self {
            use_tenant_per_storage: false,
            check_concurrency: true,
            write_behind: WriteBehindConfig::default(),
        }
    }
}

/// Policy governing the overflow write-behind path and the background drainer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteBehindConfig {
    /// Cluster-wide writes/second for this storage at which the overflow
    /// (write-behind) path engages. Comparison is strictly greater-than.
    /// Default `100`.
    #[serde(default = "default_threshold")]
    pub threshold: u64,

    /// Maximum number of dirty entries popped per drain cycle. Default `50`.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Seconds between drain cycles. Default `5`.
    #[serde(default = "default_drain_interval_sec")]
    pub drain_interval_sec: u64,

    /// TTL in seconds re-applied to the state hash on every write; `0` means no
    /// expiration. Default `300`.
    #[serde(default = "default_state_ttl_sec")]
    pub state_ttl_sec: u64,

    /// Seconds the drain lease is held for once acquired. Default `30`.
    #[serde(default = "default_drain_lock_ttl_sec")]
    pub drain_lock_ttl_sec: u64,

    /// Gates the overflow path. When false, writes always go through to the
    /// durable store regardless of the write counter. Default `true`.
    #[serde(default = "default_true")]
    pub enable_write_behind: bool,

    /// Gates the cache-first READ. When false, every READ loads from the
    /// durable store. Default `true`.
    #[serde(default = "default_true")]
    pub enable_read_through: bool,
}

impl Default for WriteBehindConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            batch_size: default_batch_size(),
            drain_interval_sec: default_drain_interval_sec(),
            state_ttl_sec: default_state_ttl_sec(),
            drain_lock_ttl_sec: default_drain_lock_ttl_sec(),
            enable_write_behind: true,
            enable_read_through: true,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_threshold() -> u64 {
    100
}
fn default_batch_size() -> usize {
    50
}
fn default_drain_interval_sec() -> u64 {
    5
}
fn default_state_ttl_sec() -> u64 {
    300
}
fn default_drain_lock_ttl_sec() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let cfg = GrainStorageConfig::default();
        assert!(!cfg.use_tenant_per_storage);
        assert!(cfg.check_concurrency);
        assert_eq!(cfg.write_behind.threshold, 100);
        assert_eq!(cfg.write_behind.batch_size, 50);
        assert_eq!(cfg.write_behind.drain_interval_sec, 5);
        assert_eq!(cfg.write_behind.state_ttl_sec, 300);
        assert_eq!(cfg.write_behind.drain_lock_ttl_sec, 30);
        assert!(cfg.write_behind.enable_write_behind);
        assert!(cfg.write_behind.enable_read_through);
    }

    #[test]
    fn deserializes_from_partial_json_with_defaults() {
        let cfg: GrainStorageConfig =
            serde_json::from_str(r#"{"write_behind": {"threshold": 0}}"#).unwrap();
        assert_eq!(cfg.write_behind.threshold, 0);
        assert_eq!(cfg.write_behind.batch_size, 50);
    }
}
