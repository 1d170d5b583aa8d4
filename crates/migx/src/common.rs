//! Core data carried through the pipeline.
//!
//! A source hit travels as a raw `HitEnvelope` (the untyped JSON object the
//! engine returned, `_index`/`_type`/`_id`/`_source` and friends) until a
//! writer turns it into a [`Document`]. Only the envelope is typed; the
//! `_source` payload stays an opaque map all the way to the sink.

use serde::Serialize;
use serde_json::{json, Map, Value};

/// One decoded hit as it came off the wire. Keys are whatever the engine
/// sent; required keys are checked by the consuming worker, not here.
pub(crate) type HitEnvelope = Map<String, Value>;

/// Envelope keys a document must carry before it can be written anywhere.
pub(crate) const REQUIRED_ENVELOPE_KEYS: [&str; 4] = ["_index", "_type", "_source", "_id"];

/// True when every required envelope key is present on the hit.
pub(crate) fn has_required_keys(hit: &HitEnvelope) -> bool {
    REQUIRED_ENVELOPE_KEYS.iter().all(|key| hit.contains_key(*key))
}

/// A unit of transferable content, addressed by (index, type, id).
///
/// Serializing a `Document` produces the *metadata* of a bulk action line
/// only. `source` is skipped so the same struct can sit inside
/// `{"index": {...}}` without dragging the payload along; the payload is
/// written as its own line by the composer.
#[derive(Debug, Clone, Default, Serialize)]
pub(crate) struct Document {
    #[serde(rename = "_index", skip_serializing_if = "String::is_empty")]
    pub index: String,
    /// May be empty on typeless engine versions.
    #[serde(rename = "_type", skip_serializing_if = "String::is_empty")]
    pub doc_type: String,
    /// Empty after an id regeneration request; omitted from the action line
    /// so the destination assigns one.
    #[serde(rename = "_id", skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(rename = "routing", skip_serializing_if = "Option::is_none")]
    pub routing: Option<String>,
    #[serde(skip)]
    pub source: Map<String, Value>,
}

impl Document {
    /// The `{"index": {...}}` header line for the newline-delimited bulk
    /// dialect. Empty fields are absent rather than null.
    pub(crate) fn action_line(&self) -> Value {
        json!({ "index": self })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_doc() -> Document {
        Document {
            index: "logs-2024".to_string(),
            doc_type: "doc".to_string(),
            id: "42".to_string(),
            routing: Some("route-66".to_string()),
            source: serde_json::from_str(r#"{"name":"a"}"#).unwrap(),
        }
    }

    #[test]
    fn the_one_where_the_action_line_carries_all_metadata() {
        let action = sample_doc().action_line();
        assert_eq!(action["index"]["_index"], "logs-2024");
        assert_eq!(action["index"]["_type"], "doc");
        assert_eq!(action["index"]["_id"], "42");
        assert_eq!(action["index"]["routing"], "route-66");
        // The payload never leaks into the header.
        assert!(action["index"].get("_source").is_none());
    }

    #[test]
    fn the_one_where_cleared_fields_vanish_from_the_action_line() {
        let mut doc = sample_doc();
        doc.id.clear();
        doc.doc_type.clear();
        doc.routing = None;
        let action = doc.action_line();
        let meta = action["index"].as_object().unwrap();
        assert!(!meta.contains_key("_id"));
        assert!(!meta.contains_key("_type"));
        assert!(!meta.contains_key("routing"));
        assert_eq!(meta["_index"], "logs-2024");
    }

    #[test]
    fn envelope_key_check_spots_missing_fields() {
        let mut hit: HitEnvelope =
            serde_json::from_str(r#"{"_index":"a","_type":"b","_id":"1","_source":{}}"#).unwrap();
        assert!(has_required_keys(&hit));
        hit.remove("_id");
        assert!(!has_required_keys(&hit));
    }
}
