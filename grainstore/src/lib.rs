//! Grain storage — a durable per-entity state store with a coalescing
//! write-behind cache.
//!
//! ## Architecture overview
//!
//! Each entity (a "grain" in the host runtime's terminology) has exactly one
//! versioned state document. Callers issue three operations — READ, WRITE,
//! CLEAR — against a [`GrainStorage`] handle. Under normal load the store is
//! strongly read-after-write consistent against a durable document database
//! ([`grainstore_durable`]); under write surges it temporarily absorbs
//! traffic in a fast key/value cache ([`grainstore_cache`]) and a background
//! [`grainstore_drainer::Drainer`] reconciles the cache to the database,
//! preserving durability and at-most-one-writer semantics through
//! content-derived optimistic concurrency tokens ([`grainstore_core::etag`]).
//!
//! ## Modules
//! - [`storage`] — the grain storage core: read-through/write-through
//!   decisions, the write-behind overflow path, ETag enforcement, and
//!   legacy-id migration. Re-exported as [`GrainStorage`].
//! - [`system`] — the top-level facade wiring a durable adapter, an optional
//!   cache adapter, and the drainer together for a cluster. Re-exported as
//!   [`GrainStorageSystem`].
//!
//! ## Example
//! ```no_run
//! # use std::sync::Arc;
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use grainstore::GrainStorageSystem;
//! use grainstore_core::{GrainStorageConfig, StateSlot};
//! use grainstore_durable::PostgresStore;
//! use grainstore_cache::RedisCacheAdapter;
//!
//! let durable = Arc::new(PostgresStore::connect("postgres://localhost/grainstore").await?);
//! let cache = Arc::new(RedisCacheAdapter::connect("redis://localhost", "cluster-1").await?);
//! let system = GrainStorageSystem::with_cache("cluster-1", durable, cache);
//! system.start(5).await;
//!
//! let users = system.storage("users", GrainStorageConfig::default(), None).await;
//! let mut slot = StateSlot::absent();
//! slot.data = serde_json::json!({"name": "ada"});
//! users.write("u/1", None, &mut slot).await?;
//! # Ok(())
//! # }
//! ```

pub mod storage;
pub mod system;

pub use storage::GrainStorage;
pub use system::GrainStorageSystem;
