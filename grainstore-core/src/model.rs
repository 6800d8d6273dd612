//! Shared data model for the grain storage provider: the mutable slot the host
//! runtime passes through READ/WRITE/CLEAR, the durable document shape, and the
//! cache envelope the cache adapter serializes entries as.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The mutable record a host runtime threads through a single READ, WRITE, or
/// CLEAR call. The provider reads `etag`/`record_exists` to decide concurrency
/// checks and writes all three fields to report the outcome.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateSlot {
    pub data: Value,
    pub etag: Option<String>,
    pub record_exists: bool,
}

impl StateSlot {
    /// The empty slot a READ reports when no document exists under either the
    /// canonical or the legacy id.
    pub fn absent() -> Self {
        Self {
            data: Value::Null,
            etag: None,
            record_exists: false,
        }
    }
}

/// A durable-store document: the unit of storage for one entity's state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub data: Value,
    /// Unix epoch milliseconds. Stored explicitly because the ETag is derived
    /// from it; the durable store's own row-modified timestamp (if any) is not
    /// a substitute, since `etag` must be recomputable offline from this value
    /// alone.
    pub last_modified_ms: i64,
}

impl Document {
    pub fn new(id: impl Into<String>, data: Value, last_modified_ms: i64) -> Self {
        Self {
            id: id.into(),
            data,
            last_modified_ms,
        }
    }

    /// Recomputes this document's ETag from its current `data`/`last_modified_ms`.
    pub fn etag(&self) -> Result<String, serde_json::Error> {
        crate::etag::compute(self.last_modified_ms, &self.data)
    }
}

/// The JSON envelope a cache entry is serialized as within the state hash.
/// Field names are camelCase on the wire to match the bit-exact envelope format;
/// `typeString` is carried through opaquely — this crate never attempts to
/// resolve it to a Rust type, only to pass it along so a caller in a different
/// process can.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEnvelope {
    #[serde(rename = "serializedData")]
    pub serialized_data: Value,
    #[serde(rename = "typeString")]
    pub type_string: String,
    #[serde(rename = "eTag")]
    pub etag: String,
    #[serde(rename = "lastModified")]
    pub last_modified_ms: i64,
}

impl CacheEnvelope {
    pub fn new(data: Value, type_string: impl Into<String>, etag: String, last_modified_ms: i64) -> Self {
        Self {
            serialized_data: data,
            type_string: type_string.into(),
            etag,
            last_modified_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn absent_slot_has_no_etag_and_no_record() {
        let slot = StateSlot::absent();
        assert_eq!(slot.data, Value::Null);
        assert_eq!(slot.etag, None);
        assert!(!slot.record_exists);
    }

    #[test]
    fn document_etag_matches_direct_computation() {
        let doc = Document::new("c1_u_1", json!({"n": "a"}), 1_700_000_000_000);
        assert_eq!(
            doc.etag().unwrap(),
            crate::etag::compute(1_700_000_000_000, &json!({"n": "a"})).unwrap()
        );
    }

    #[test]
    fn cache_envelope_round_trips_through_json_with_camel_case_fields() {
        let envelope = CacheEnvelope::new(json!({"n": "a"}), "UserState", "e1".into(), 1_700_000_000_000);
        let wire = serde_json::to_value(&envelope).unwrap();
        assert_eq!(wire["serializedData"], json!({"n": "a"}));
        assert_eq!(wire["typeString"], "UserState");
        assert_eq!(wire["eTag"], "e1");
        assert_eq!(wire["lastModified"], 1_700_000_000_000i64);

        let round_tripped: CacheEnvelope = serde_json::from_value(wire).unwrap();
        assert_eq!(round_tripped.etag, envelope.etag);
    }
}
