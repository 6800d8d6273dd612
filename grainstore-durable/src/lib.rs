//! The durable store adapter: typed load/upsert/delete of a single entity's
//! state document, optionally scoped to a database tenant.
//!
//! ## Overview
//!
//! This is the one tier of the grain storage provider that must never lose an
//! acknowledged write. Everything the cache tier does is a derived view or a
//! pending-write buffer over what lives here. The adapter trait is kept small
//! and backend-agnostic so the rest of the workspace never has to know it is
//! talking to Postgres specifically — [`postgres::PostgresStore`] is the only
//! implementation today, grounded in the corpus's convention of reaching for
//! `sqlx` with `runtime-tokio-rustls` + `postgres` + `json` features whenever a
//! durable document store is required.
//!
//! ## Consistency
//!
//! Every operation here is a single atomic statement against Postgres — there
//! is no multi-document transaction support, matching the storage's own
//! non-goal of transactional multi-entity writes. `upsert` uses
//! `INSERT ... ON CONFLICT DO UPDATE` so callers never need to branch on
//! whether a document already exists.

pub mod postgres;

use async_trait::async_trait;
use grainstore_core::{Document, DurableStoreFailure};

pub use postgres::PostgresStore;

/// The durable store contract the grain storage core depends on.
///
/// `tenant` selects a database-tenant partition when the storage is configured
/// with `use_tenant_per_storage`; `None` addresses the default (untenanted)
/// partition.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn load(&self, id: &str, tenant: Option<&str>) -> Result<Option<Document>, DurableStoreFailure>;
    async fn upsert(&self, doc: &Document, tenant: Option<&str>) -> Result<(), DurableStoreFailure>;
    async fn delete(&self, id: &str, tenant: Option<&str>) -> Result<(), DurableStoreFailure>;
}

/// An in-memory `DurableStore` used to test the adapter contract. Not gated
/// behind `#[cfg(test)]` so that `grainstore-drainer` and the `grainstore`
/// facade crate's own test suites can depend on it too, without a live
/// Postgres instance.
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryStore {
        rows: Mutex<std::collections::HashMap<(String, String), Document>>,
    }

    #[async_trait]
    impl DurableStore for InMemoryStore {
        async fn load(&self, id: &str, tenant: Option<&str>) -> Result<Option<Document>, DurableStoreFailure> {
            let key = (id.to_string(), tenant.unwrap_or("").to_string());
            Ok(self.rows.lock().unwrap().get(&key).cloned())
        }

        async fn upsert(&self, doc: &Document, tenant: Option<&str>) -> Result<(), DurableStoreFailure> {
            let key = (doc.id.clone(), tenant.unwrap_or("").to_string());
            self.rows.lock().unwrap().insert(key, doc.clone());
            Ok(())
        }

        async fn delete(&self, id: &str, tenant: Option<&str>) -> Result<(), DurableStoreFailure> {
            let key = (id.to_string(), tenant.unwrap_or("").to_string());
            self.rows.lock().unwrap().remove(&key);
            Ok(())
        }
    }
}
