//! The per-document transform applied between dequeue and encode.
//!
//! Order matters and is fixed: stale-hit filtering, envelope check, index
//! and type overrides, id regeneration, field renames, routing copy. The
//! `_type` rename source reads the document's original type, not the
//! overridden one.

use serde_json::Value;
use tracing::error;

use crate::app_config::AppConfig;
use crate::common::{has_required_keys, Document, HitEnvelope};

/// What became of one hit envelope.
#[derive(Debug)]
pub(crate) enum Outcome {
    /// Transformed and ready to encode.
    Doc(Document),
    /// Logged and dropped (stale 404 hit, unusable metadata).
    Skip,
    /// The stream is corrupt; the owning worker must stop.
    Corrupt,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct DocumentTransformer {
    target_index: Option<String>,
    override_type: Option<String>,
    regenerate_id: bool,
    renames: Vec<(String, String)>,
}

impl DocumentTransformer {
    pub(crate) fn from_config(config: &AppConfig) -> Self {
        Self {
            target_index: config.dest_index.clone().filter(|name| !name.is_empty()),
            override_type: config.type_override.clone().filter(|name| !name.is_empty()),
            regenerate_id: config.regenerate_id,
            renames: parse_rename_list(config.rename.as_deref().unwrap_or("")),
        }
    }

    pub(crate) fn apply(&self, mut hit: HitEnvelope) -> Outcome {
        // Stale hits from the source carry a status envelope instead of a
        // document; drop them and keep the stream alive.
        if hit.get("status").and_then(Value::as_i64) == Some(404) {
            let response = hit.get("response").cloned().unwrap_or(Value::Null);
            error!("error: {}", response);
            return Outcome::Skip;
        }

        if !has_required_keys(&hit) {
            error!("document missing one of _index/_type/_source/_id: {:?}", hit);
            return Outcome::Corrupt;
        }

        let original_index = match hit.get("_index").and_then(Value::as_str) {
            Some(index) => index.to_string(),
            None => {
                error!("document carries a non-string _index: {:?}", hit);
                return Outcome::Corrupt;
            }
        };
        // Typeless engines may send null here; treat that as an empty type.
        let original_type = hit
            .get("_type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let original_id = hit
            .get("_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let source = match hit.remove("_source") {
            Some(Value::Object(source)) => source,
            _ => {
                error!("document carries a non-object _source");
                return Outcome::Corrupt;
            }
        };

        let mut doc = Document {
            index: self
                .target_index
                .clone()
                .unwrap_or_else(|| original_index.clone()),
            doc_type: self
                .override_type
                .clone()
                .unwrap_or_else(|| original_type.clone()),
            id: original_id,
            routing: None,
            source,
        };

        if self.regenerate_id {
            doc.id.clear();
        }

        for (old_field, new_field) in &self.renames {
            if old_field == "_type" {
                doc.source
                    .insert(new_field.clone(), Value::String(original_type.clone()));
            } else {
                let value = doc.source.remove(old_field).unwrap_or(Value::Null);
                doc.source.insert(new_field.clone(), value);
            }
        }

        if let Some(routing) = hit.get("_routing").and_then(Value::as_str) {
            if !routing.is_empty() {
                doc.routing = Some(routing.to_string());
            }
        }

        // A document with no index cannot be addressed anywhere. An empty
        // type is fine; newer engines are typeless.
        if doc.index.is_empty() {
            error!("failed decoding document: {:?}", doc);
            return Outcome::Skip;
        }

        Outcome::Doc(doc)
    }
}

/// Parse `old:new,old2:new2`. Whitespace around names is tolerated; pairs
/// without a colon are dropped.
fn parse_rename_list(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|pair| {
            let (old_field, new_field) = pair.split_once(':')?;
            let old_field = old_field.trim();
            let new_field = new_field.trim();
            if old_field.is_empty() || new_field.is_empty() {
                return None;
            }
            Some((old_field.to_string(), new_field.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hit(raw: Value) -> HitEnvelope {
        match raw {
            Value::Object(map) => map,
            _ => panic!("test hit must be an object"),
        }
    }

    fn transformer_for(config: &AppConfig) -> DocumentTransformer {
        DocumentTransformer::from_config(config)
    }

    #[test]
    fn the_one_where_a_plain_document_passes_through() {
        let transformer = transformer_for(&AppConfig::default());
        let outcome = transformer.apply(hit(json!({
            "_index": "logs", "_type": "doc", "_id": "1",
            "_source": {"name": "a"}
        })));
        match outcome {
            Outcome::Doc(doc) => {
                assert_eq!(doc.index, "logs");
                assert_eq!(doc.doc_type, "doc");
                assert_eq!(doc.id, "1");
                assert_eq!(doc.source["name"], "a");
                assert!(doc.routing.is_none());
            }
            other => panic!("expected a document, got {other:?}"),
        }
    }

    #[test]
    fn the_one_where_rename_and_type_override_compose() {
        // Spec scenario: rename=_type:typeField,name:myname with
        // type_override=entry.
        let mut config = AppConfig::default();
        config.rename = Some("_type:typeField,name:myname".to_string());
        config.type_override = Some("entry".to_string());
        let transformer = transformer_for(&config);

        let outcome = transformer.apply(hit(json!({
            "_index": "idx", "_type": "doc", "_id": "1",
            "_source": {"name": "a"}
        })));
        match outcome {
            Outcome::Doc(doc) => {
                assert_eq!(doc.doc_type, "entry");
                // The rename reads the original type, not the override.
                assert_eq!(doc.source["typeField"], "doc");
                assert_eq!(doc.source["myname"], "a");
                assert!(!doc.source.contains_key("name"));
            }
            other => panic!("expected a document, got {other:?}"),
        }
    }

    #[test]
    fn the_one_where_stale_404_hits_are_skipped() {
        let transformer = transformer_for(&AppConfig::default());
        let outcome = transformer.apply(hit(json!({
            "status": 404, "response": "not found"
        })));
        assert!(matches!(outcome, Outcome::Skip));
    }

    #[test]
    fn the_one_where_a_missing_envelope_key_is_corruption() {
        let transformer = transformer_for(&AppConfig::default());
        let outcome = transformer.apply(hit(json!({
            "_index": "idx", "_type": "doc", "_source": {}
        })));
        assert!(matches!(outcome, Outcome::Corrupt));
    }

    #[test]
    fn the_one_where_regenerate_id_clears_the_id() {
        let mut config = AppConfig::default();
        config.regenerate_id = true;
        let transformer = transformer_for(&config);
        let outcome = transformer.apply(hit(json!({
            "_index": "idx", "_type": "doc", "_id": "keep-me-not",
            "_source": {}
        })));
        match outcome {
            Outcome::Doc(doc) => assert!(doc.id.is_empty()),
            other => panic!("expected a document, got {other:?}"),
        }
    }

    #[test]
    fn the_one_where_the_target_index_override_wins() {
        let mut config = AppConfig::default();
        config.dest_index = Some("archive".to_string());
        let transformer = transformer_for(&config);
        let outcome = transformer.apply(hit(json!({
            "_index": "logs-2024", "_type": "doc", "_id": "1", "_source": {}
        })));
        match outcome {
            Outcome::Doc(doc) => assert_eq!(doc.index, "archive"),
            other => panic!("expected a document, got {other:?}"),
        }
    }

    #[test]
    fn the_one_where_routing_survives_when_present_and_non_empty() {
        let transformer = transformer_for(&AppConfig::default());
        let outcome = transformer.apply(hit(json!({
            "_index": "idx", "_type": "doc", "_id": "1",
            "_source": {}, "_routing": "tenant-9"
        })));
        match outcome {
            Outcome::Doc(doc) => assert_eq!(doc.routing.as_deref(), Some("tenant-9")),
            other => panic!("expected a document, got {other:?}"),
        }

        let outcome = transformer.apply(hit(json!({
            "_index": "idx", "_type": "doc", "_id": "1",
            "_source": {}, "_routing": ""
        })));
        match outcome {
            Outcome::Doc(doc) => assert!(doc.routing.is_none()),
            other => panic!("expected a document, got {other:?}"),
        }
    }

    #[test]
    fn the_one_where_renaming_a_missing_field_leaves_null() {
        let mut config = AppConfig::default();
        config.rename = Some("ghost:spirit".to_string());
        let transformer = transformer_for(&config);
        let outcome = transformer.apply(hit(json!({
            "_index": "idx", "_type": "doc", "_id": "1", "_source": {"kept": 1}
        })));
        match outcome {
            Outcome::Doc(doc) => {
                assert_eq!(doc.source["spirit"], Value::Null);
                assert!(!doc.source.contains_key("ghost"));
                assert_eq!(doc.source["kept"], 1);
            }
            other => panic!("expected a document, got {other:?}"),
        }
    }

    #[test]
    fn rename_list_parsing_is_forgiving() {
        let pairs = parse_rename_list("_type:type, name:myname,,broken");
        assert_eq!(
            pairs,
            vec![
                ("_type".to_string(), "type".to_string()),
                ("name".to_string(), "myname".to_string()),
            ]
        );
    }

    #[test]
    fn the_one_where_a_typeless_hit_is_still_writable() {
        let transformer = transformer_for(&AppConfig::default());
        let outcome = transformer.apply(hit(json!({
            "_index": "idx", "_type": null, "_id": "1", "_source": {}
        })));
        match outcome {
            Outcome::Doc(doc) => assert!(doc.doc_type.is_empty()),
            other => panic!("expected a document, got {other:?}"),
        }
    }
}
