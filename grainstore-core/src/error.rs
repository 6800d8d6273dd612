//! Error taxonomy for the grain storage provider.
//!
//! Only two of the four error kinds the design distinguishes ever reach a caller:
//! a concurrency conflict on a write-through write, and an unrecoverable durable
//! store failure. The other two — an ignorable cache read failure and a fatal
//! cache write failure during overflow — never leave the crate boundary; they
//! drive internal fallback decisions (see `grainstore::GrainStorage::write`) and
//! are only ever logged, never returned.

use thiserror::Error;

/// Errors a caller of [`grainstore::GrainStorage`](../../grainstore/index.html)
/// can observe.
#[derive(Debug, Error)]
pub enum GrainStorageError {
    /// A write-through WRITE found that the durable document's current ETag does
    /// not match the ETag the caller last observed. No state was mutated.
    #[error("concurrency conflict writing entity {entity_id:?}: expected etag {expected_etag:?}, found {actual_etag:?}")]
    ConcurrencyConflict {
        entity_id: String,
        expected_etag: String,
        actual_etag: String,
    },

    /// The durable store rejected or failed a write-through WRITE or a CLEAR.
    /// Propagated to the caller unchanged.
    #[error("durable store failure: {0}")]
    DurableStoreFailure(#[from] DurableStoreFailure),

    /// The payload could not be serialized to or deserialized from its canonical
    /// JSON form. This indicates a caller bug (a non-serializable `T`) rather
    /// than an infrastructure failure, so it is not folded into
    /// `DurableStoreFailure`.
    #[error("payload (de)serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Opaque wrapper around a durable-store backend error, so that
/// `grainstore-core` does not need a dependency on any particular database
/// driver crate. `grainstore-durable` converts its own `sqlx`-flavored errors
/// into this type at the trait boundary, preserving the original error as
/// [`Error::source`](std::error::Error::source) via [`DurableStoreFailure::wrap`]
/// so a caller walking the source chain (or a `tracing` error-field formatter)
/// still reaches the real `sqlx::Error`, not just its flattened message.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct DurableStoreFailure {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl DurableStoreFailure {
    /// Builds a failure with no preserved source, for call sites that have
    /// nothing but a message (e.g. a row the driver reported as malformed).
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Builds a failure that keeps `source` reachable through
    /// `Error::source()`, so no type information is lost converting a
    /// backend-specific error into this opaque wrapper.
    pub fn wrap(message: impl Into<String>, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

pub type GrainStorageResult<T> = Result<T, GrainStorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_conflict_message_names_the_entity() {
        let err = GrainStorageError::ConcurrencyConflict {
            entity_id: "u/1".into(),
            expected_etag: "e1".into(),
            actual_etag: "e2".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("u/1"));
        assert!(msg.contains("e1"));
        assert!(msg.contains("e2"));
    }

    #[test]
    fn durable_store_failure_converts_via_from() {
        let inner = DurableStoreFailure::new("connection reset");
        let err: GrainStorageError = inner.into();
        assert!(matches!(err, GrainStorageError::DurableStoreFailure(_)));
    }

    #[derive(Debug, thiserror::Error)]
    #[error("inner driver error")]
    struct FakeDriverError;

    #[test]
    fn wrapped_failure_preserves_the_original_error_as_its_source() {
        use std::error::Error as _;

        let failure = DurableStoreFailure::wrap("load c1_u_1", FakeDriverError);
        let source = failure.source().expect("wrap() must record a source");
        assert_eq!(source.to_string(), "inner driver error");
        assert!(source.downcast_ref::<FakeDriverError>().is_some());
    }

    #[test]
    fn new_failure_has_no_source() {
        use std::error::Error as _;
        assert!(DurableStoreFailure::new("connection reset").source().is_none());
    }
}
