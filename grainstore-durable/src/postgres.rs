//! Postgres-backed implementation of [`crate::DurableStore`].
//!
//! Documents are stored one row per (id, tenant) in a single table, data held as
//! `JSONB`. There is deliberately no tiering, replication, or sharding here —
//! the grain storage provider asks for exactly one durable document store with
//! strong read-after-write consistency, not a storage hierarchy; a dedicated
//! replicated/sharded deployment of Postgres itself is how that scales, not a
//! responsibility this adapter takes on.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use grainstore_core::{Document, DurableStoreFailure};

use crate::DurableStore;

/// Tenant value used for rows opened without an explicit database tenant.
const DEFAULT_TENANT: &str = "";

/// A Postgres-backed durable document store.
///
/// Construct via [`PostgresStore::connect`] for a fresh pool, or
/// [`PostgresStore::new`] to adopt a pool the host application already manages
/// (the common case in a multi-tenant deployment sharing one pool across many
/// storages).
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Wraps an already-constructed pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a new connection pool against `database_url` and ensures the
    /// backing table exists.
    ///
    /// Connection-string parsing and credential management are the caller's
    /// responsibility; this only consumes an already-valid Postgres DSN.
    pub async fn connect(database_url: &str) -> Result<Self, DurableStoreFailure> {
        info!("connecting durable store to postgres");
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| DurableStoreFailure::wrap("connect", e))?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<(), DurableStoreFailure> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS grain_documents (
                id TEXT NOT NULL,
                tenant TEXT NOT NULL DEFAULT '',
                data JSONB NOT NULL,
                last_modified_ms BIGINT NOT NULL,
                PRIMARY KEY (id, tenant)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| DurableStoreFailure::wrap("ensure_schema", e))?;
        Ok(())
    }
}

#[async_trait]
impl DurableStore for PostgresStore {
    async fn load(&self, id: &str, tenant: Option<&str>) -> Result<Option<Document>, DurableStoreFailure> {
        let tenant = tenant.unwrap_or(DEFAULT_TENANT);
        debug!(id, tenant, "loading document");
        let row = sqlx::query(
            "SELECT id, data, last_modified_ms FROM grain_documents WHERE id = $1 AND tenant = $2",
        )
        .bind(id)
        .bind(tenant)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DurableStoreFailure::wrap(format!("load {id}"), e))?;

        Ok(match row {
            Some(row) => {
                let doc_id: String =
                    row.try_get("id").map_err(|e| DurableStoreFailure::wrap(format!("load {id}: column id"), e))?;
                let data: serde_json::Value = row
                    .try_get("data")
                    .map_err(|e| DurableStoreFailure::wrap(format!("load {id}: column data"), e))?;
                let last_modified_ms: i64 = row
                    .try_get("last_modified_ms")
                    .map_err(|e| DurableStoreFailure::wrap(format!("load {id}: column last_modified_ms"), e))?;
                Some(Document::new(doc_id, data, last_modified_ms))
            }
            None => None,
        })
    }

    async fn upsert(&self, doc: &Document, tenant: Option<&str>) -> Result<(), DurableStoreFailure> {
        let tenant = tenant.unwrap_or(DEFAULT_TENANT);
        debug!(id = %doc.id, tenant, "upserting document");
        sqlx::query(
            r#"
            INSERT INTO grain_documents (id, tenant, data, last_modified_ms)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id, tenant) DO UPDATE SET
                data = EXCLUDED.data,
                last_modified_ms = EXCLUDED.last_modified_ms
            "#,
        )
        .bind(&doc.id)
        .bind(tenant)
        .bind(&doc.data)
        .bind(doc.last_modified_ms)
        .execute(&self.pool)
        .await
        .map_err(|e| DurableStoreFailure::wrap(format!("upsert {}", doc.id), e))?;
        Ok(())
    }

    async fn delete(&self, id: &str, tenant: Option<&str>) -> Result<(), DurableStoreFailure> {
        let tenant = tenant.unwrap_or(DEFAULT_TENANT);
        debug!(id, tenant, "deleting document");
        // idempotent per the adapter contract: deleting an absent document is
        // not an error, so the affected-row count is not checked.
        sqlx::query("DELETE FROM grain_documents WHERE id = $1 AND tenant = $2")
            .bind(id)
            .bind(tenant)
            .execute(&self.pool)
            .await
            .map_err(|e| DurableStoreFailure::wrap(format!("delete {id}"), e))?;
        Ok(())
    }
}
