//! Identity/keying, ETag derivation, the error taxonomy, and the shared data
//! model for the grain storage provider.
//!
//! ## Architecture overview
//!
//! `grainstore-core` is deliberately free of any I/O: it has no Postgres or
//! Redis dependency, and every public function is either pure or a plain struct
//! constructor. This is the layer `grainstore-durable`, `grainstore-cache`,
//! `grainstore-drainer`, and the `grainstore` facade crate all depend on, so
//! keeping it free of backend-specific dependencies keeps those crates from
//! needing to agree on anything beyond these shared types.
//!
//! ## Modules
//! - [`keys`] — deterministic document-id and cache-key derivation (§4.1 of the
//!   storage's identity & keying design).
//! - [`etag`] — the SHA-256-derived optimistic-concurrency version token (§4.2).
//! - [`error`] — the error taxonomy a caller of the top-level facade observes.
//! - [`config`] — typed per-storage configuration with documented defaults.
//! - [`model`] — the mutable state slot, the durable document shape, and the
//!   cache envelope wire format.

pub mod config;
pub mod error;
pub mod etag;
pub mod keys;
pub mod model;

pub use config::{GrainStorageConfig, WriteBehindConfig};
pub use error::{DurableStoreFailure, GrainStorageError, GrainStorageResult};
pub use model::{CacheEnvelope, Document, StateSlot};
