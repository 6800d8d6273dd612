//! The cache adapter's own error type.
//!
//! Kept separate from [`grainstore_core::GrainStorageError`] because most
//! `CacheError`s never reach a caller of the grain storage facade: per the
//! cache adapter's error-handling contract (read-side operations swallow
//! transport errors and report an empty result; only `mark_dirty` and the
//! write-behind `write` propagate). The facade crate is what decides, for
//! each call site, whether a `CacheError` becomes a swallowed log line or a
//! forced fall-through to the write-through path.

use thiserror::Error;

#[derive(Debug, Error)]
#[error("cache transport error: {0}")]
pub struct CacheError(#[from] pub redis::RedisError);
