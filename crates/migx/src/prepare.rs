//! Destination preparation before the stream starts, and its undo.
//!
//! Preparation reconfigures the destination for ingest throughput: refresh
//! disabled, no replicas, shards fixed at creation. The original
//! `refresh_interval` of every touched index is remembered and handed back
//! to [`restore_index_settings`] once the writers are done.

use std::time::Duration;

use anyhow::{bail, Result};
use serde_json::{json, Map, Value};
use tracing::{debug, error, info};

use crate::app_config::AppConfig;
use crate::cluster::{EsClient, IndexSet};

/// Cadence of the cluster readiness poll.
const READINESS_POLL: Duration = Duration::from_secs(3);

/// Outcome of the preparation phase, consumed by the orchestrator.
#[derive(Debug, Default)]
pub(crate) struct PreparedIndexes {
    /// Resolved comma-separated source index names; the cursor streams read
    /// these instead of the raw pattern.
    pub index_names: String,
    /// Original `refresh_interval` per destination index, for restore.
    pub refresh_intervals: Map<String, Value>,
}

/// Block until the cluster is usable. `green` is always acceptable,
/// `yellow` only when the caller did not insist on green, `red` never. The
/// loop has no upper bound; a persistently unhealthy cluster is the
/// operator's call to kill.
pub(crate) async fn wait_for_cluster(client: &EsClient, wait_for_green: bool) {
    loop {
        let health = client.cluster_health().await;
        let acceptable =
            health.status == "green" || (!wait_for_green && health.status == "yellow");
        if acceptable {
            return;
        }
        info!(
            "{} at {} is {}, delaying migration",
            health.name,
            client.host(),
            health.status
        );
        tokio::time::sleep(READINESS_POLL).await;
    }
}

pub(crate) struct IndexPreparer<'a> {
    source: &'a EsClient,
    target: &'a EsClient,
    config: &'a AppConfig,
}

impl<'a> IndexPreparer<'a> {
    pub(crate) fn new(source: &'a EsClient, target: &'a EsClient, config: &'a AppConfig) -> Self {
        Self {
            source,
            target,
            config,
        }
    }

    pub(crate) async fn run(&self) -> Result<PreparedIndexes> {
        let (index_names, mut source_mappings) = self
            .source
            .get_index_mappings(self.config.all, &self.config.src_indexes)
            .await?;
        let index_count = source_mappings.len();
        debug!("index count: {index_count}");
        if index_count == 0 {
            bail!("index not exists, {}", self.config.src_indexes);
        }

        let mut prepared = PreparedIndexes {
            index_names,
            refresh_intervals: Map::new(),
        };

        if self.config.copy_settings || self.config.shards.is_some() {
            info!("start settings/mappings migration..");
            self.copy_settings(&prepared.index_names, index_count, &mut prepared.refresh_intervals)
                .await?;
        }

        if self.config.copy_mappings {
            self.rewrite_single_index(&mut source_mappings, index_count);
            for (name, mapping) in &source_mappings {
                let body = mapping
                    .get("mappings")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                if let Err(err) = self.target.update_index_mapping(name, &body).await {
                    error!("{err:#}");
                }
            }
        }

        if self.config.copy_settings || self.config.copy_mappings || self.config.shards.is_some() {
            info!("settings/mappings migration finished.");
        }

        Ok(prepared)
    }

    async fn copy_settings(
        &self,
        resolved_names: &str,
        index_count: usize,
        refresh_intervals: &mut Map<String, Value>,
    ) -> Result<()> {
        let mut source_settings = self.source.get_index_settings(resolved_names).await?;
        debug!("source index settings fetched for {resolved_names}");

        // The destination fetch may fail on a fresh cluster; that only means
        // every index gets created instead of updated.
        let target_pattern = self
            .config
            .dest_index
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(resolved_names);
        let target_settings = match self.target.get_index_settings(target_pattern).await {
            Ok(settings) => Some(settings),
            Err(err) => {
                debug!("target settings not available: {err:#}");
                None
            }
        };

        self.rewrite_single_index(&mut source_settings, index_count);

        for (name, source_entry) in &source_settings {
            debug!("dealing with index {name}");

            let mut target_exists = false;
            let mut effective = empty_index_settings();
            if let Some(target_settings) = &target_settings {
                if let Some(existing) = target_settings.get(name) {
                    target_exists = true;
                    effective = existing.clone();
                }
                if self.config.force {
                    // Deleting an index that is not there is not a failure.
                    if let Err(err) = self.target.delete_index(name).await {
                        debug!("delete of {name} before recreate: {err:#}");
                    }
                    target_exists = false;
                }
            }
            if self.config.copy_settings {
                effective = source_entry.clone();
            }

            refresh_intervals.insert(name.clone(), extract_refresh_interval(source_entry));

            sanitize_settings(&mut effective);
            compose_ingest_settings(&mut effective, self.config.shards);

            if target_exists {
                debug!("update index with settings: {name}");
                if let Err(err) = self.target.update_index_settings(name, effective).await {
                    error!("{err:#}");
                }
            } else {
                debug!("create index with settings: {name}");
                if let Err(err) = self.target.create_index(name, &effective).await {
                    error!("{err:#}");
                }
            }
        }
        Ok(())
    }

    /// With exactly one source index and a configured rename, retitle the
    /// in-memory descriptor so creation and mapping copy target the new
    /// name.
    fn rewrite_single_index(&self, indexes: &mut IndexSet, index_count: usize) {
        let target_name = match self
            .config
            .dest_index
            .as_deref()
            .filter(|name| !name.is_empty())
        {
            Some(name) => name,
            None => return,
        };
        if index_count != 1 || self.config.src_indexes == target_name {
            return;
        }
        let source_name = match indexes.keys().next() {
            Some(name) => name.clone(),
            None => return,
        };
        if source_name == target_name {
            return;
        }
        debug!(
            "only one index, rewriting index name, src: {source_name}, dest: {target_name}"
        );
        if let Some(entry) = indexes.remove(&source_name) {
            indexes.insert(target_name.to_string(), entry);
        }
    }
}

/// Put every prepared index back to its pre-migration refresh behavior and
/// optionally force a refresh. Best effort; failures are logged.
pub(crate) async fn restore_index_settings(
    target: &EsClient,
    refresh_intervals: &Map<String, Value>,
    refresh_after: bool,
) {
    for (name, interval) in refresh_intervals {
        let body = json!({
            "settings": { "index": { "refresh_interval": interval } }
        });
        if let Err(err) = target.update_index_settings(name, body).await {
            error!("failed to restore refresh_interval on {name}: {err:#}");
        }
        if refresh_after {
            if let Err(err) = target.refresh(name).await {
                error!("failed to refresh {name}: {err:#}");
            }
        }
    }
}

/// `{"settings": {"index": {}}}`, the shape every settings write starts from.
pub(crate) fn empty_index_settings() -> Value {
    json!({ "settings": { "index": {} } })
}

fn index_object_mut(settings: &mut Value) -> &mut Map<String, Value> {
    let root = match settings {
        Value::Object(root) => root,
        other => {
            *other = json!({});
            match other {
                Value::Object(root) => root,
                _ => unreachable!(),
            }
        }
    };
    if !root.get("settings").map(Value::is_object).unwrap_or(false) {
        root.insert("settings".to_string(), json!({}));
    }
    let settings_obj = match root.get_mut("settings") {
        Some(Value::Object(map)) => map,
        _ => unreachable!(),
    };
    if !settings_obj
        .get("index")
        .map(Value::is_object)
        .unwrap_or(false)
    {
        settings_obj.insert("index".to_string(), json!({}));
    }
    match settings_obj.get_mut("index") {
        Some(Value::Object(map)) => map,
        _ => unreachable!(),
    }
}

/// Strip the engine-generated keys a settings tree must not carry when it
/// is replayed against another cluster.
pub(crate) fn sanitize_settings(settings: &mut Value) {
    let index = index_object_mut(settings);
    for key in ["creation_date", "uuid", "version", "provided_name"] {
        index.remove(key);
    }
}

/// Force the ingest profile: refresh off, no replicas, shard count fixed at
/// creation time only (copied shard counts are dropped, an override is
/// injected).
pub(crate) fn compose_ingest_settings(settings: &mut Value, shards_override: Option<u32>) {
    let index = index_object_mut(settings);
    index.insert("refresh_interval".to_string(), json!(-1));
    index.insert("number_of_replicas".to_string(), json!(0));
    index.remove("number_of_shards");
    if let Some(shards) = shards_override {
        index.insert("number_of_shards".to_string(), json!(shards));
    }
}

/// The pre-migration `refresh_interval` of a settings entry; null when the
/// index never set one, which restores the engine default.
pub(crate) fn extract_refresh_interval(settings_entry: &Value) -> Value {
    settings_entry
        .pointer("/settings/index/refresh_interval")
        .cloned()
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_settings() -> Value {
        json!({
            "settings": {
                "index": {
                    "creation_date": "1700000000000",
                    "uuid": "w9JZbJkfSEWBI",
                    "version": {"created": "6080099"},
                    "provided_name": "logs-2024",
                    "number_of_shards": "5",
                    "number_of_replicas": "2",
                    "refresh_interval": "30s",
                    "analysis": {"analyzer": {"default": {"type": "keyword"}}}
                }
            }
        })
    }

    #[test]
    fn the_one_where_engine_generated_keys_are_stripped() {
        let mut settings = sample_settings();
        sanitize_settings(&mut settings);
        let index = settings["settings"]["index"].as_object().unwrap();
        for key in ["creation_date", "uuid", "version", "provided_name"] {
            assert!(!index.contains_key(key), "{key} should be stripped");
        }
        assert!(index.contains_key("analysis"), "analysis must survive");
    }

    #[test]
    fn the_one_where_ingest_settings_are_forced() {
        let mut settings = sample_settings();
        compose_ingest_settings(&mut settings, None);
        let index = settings["settings"]["index"].as_object().unwrap();
        assert_eq!(index["refresh_interval"], json!(-1));
        assert_eq!(index["number_of_replicas"], json!(0));
        assert!(!index.contains_key("number_of_shards"));
    }

    #[test]
    fn the_one_where_a_shards_override_is_injected() {
        let mut settings = sample_settings();
        compose_ingest_settings(&mut settings, Some(3));
        assert_eq!(settings["settings"]["index"]["number_of_shards"], json!(3));
    }

    #[test]
    fn refresh_interval_extraction_defaults_to_null() {
        assert_eq!(extract_refresh_interval(&sample_settings()), json!("30s"));
        assert_eq!(extract_refresh_interval(&json!({})), Value::Null);
    }

    #[test]
    fn ingest_settings_survive_a_bare_tree() {
        let mut settings = json!({});
        compose_ingest_settings(&mut settings, Some(1));
        assert_eq!(settings["settings"]["index"]["number_of_shards"], json!(1));
        assert_eq!(settings["settings"]["index"]["refresh_interval"], json!(-1));
    }
}
