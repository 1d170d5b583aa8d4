//! The version-dialected cluster client.
//!
//! One capability set, four dialects. The dialect is picked at connect time
//! from the leading major digit of the version endpoint and only changes
//! three operations: the open-cursor URL shape, the cursor result envelope
//! (normalized in [`types::HitsTotal`]) and the mapping-update endpoint.
//! Everything else shares the default implementation.

use anyhow::{bail, Context, Result};
use regex::Regex;
use reqwest::Method;
use serde_json::{json, Map, Value};
use tracing::{debug, error, trace};

use super::http::{Auth, Transport};
use super::types::{BulkResponse, ClusterHealth, ClusterVersion, IndexSet, ScrollResponse};

/// Wire dialect keyed by the engine's reported major version. `V0` is the
/// legacy default for anything below 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dialect {
    V0,
    V5,
    V6,
    V7,
}

impl Dialect {
    pub(crate) fn from_major(major: u32) -> Self {
        match major {
            7 => Self::V7,
            6 => Self::V6,
            5 => Self::V5,
            _ => Self::V0,
        }
    }

    /// v6 and v7 reject `dynamic_templates` in mapping-update payloads.
    fn strips_dynamic_templates(self) -> bool {
        matches!(self, Self::V6 | Self::V7)
    }

    /// Sliced scrolls only exist from v5 on.
    pub(crate) fn supports_sliced_scroll(self) -> bool {
        !matches!(self, Self::V0)
    }
}

/// Parameters of one cursor open; each slice gets its own request.
#[derive(Debug, Clone)]
pub(crate) struct ScrollRequest {
    pub index_pattern: String,
    pub ttl: String,
    pub page_size: usize,
    pub query: Option<String>,
    pub fields: Option<String>,
    pub slice_id: usize,
    pub slice_count: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct EsClient {
    host: String,
    dialect: Dialect,
    transport: Transport,
}

impl EsClient {
    /// Probe the version endpoint, pick a dialect and hand back a connected
    /// client. A failed probe is a connectivity error; nothing is retried.
    pub(crate) async fn connect(
        host: &str,
        auth: Option<Auth>,
        proxy: Option<&str>,
        compress: bool,
    ) -> Result<(Self, ClusterVersion)> {
        let host = host.trim_end_matches('/').to_string();
        let transport = Transport::new(auth, proxy, compress)?;
        let (status, body) = transport
            .get(&host)
            .await
            .with_context(|| format!("cannot reach cluster at {host}"))?;
        if !status.is_success() {
            bail!("version probe of {host} returned {status}: {body}");
        }
        let version: ClusterVersion = serde_json::from_str(&body)
            .with_context(|| format!("unexpected version response from {host}: {body}"))?;
        let dialect = Dialect::from_major(version.major());
        debug!(
            "cluster {host} reports version {}, using dialect {dialect:?}",
            version.version.number
        );
        trace!(
            "cluster {:?}, node {:?}, lucene {:?}",
            version.cluster_name,
            version.name,
            version.version.lucene_version
        );
        Ok((
            Self {
                host,
                dialect,
                transport,
            },
            version,
        ))
    }

    pub(crate) fn host(&self) -> &str {
        &self.host
    }

    pub(crate) fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Health of the cluster; an unreachable endpoint synthesizes a health
    /// object instead of erroring so the readiness loop can keep polling.
    pub(crate) async fn cluster_health(&self) -> ClusterHealth {
        let url = format!("{}/_cluster/health", self.host);
        match self.transport.get(&url).await {
            Ok((status, body)) if status.is_success() => serde_json::from_str(&body)
                .unwrap_or_else(|_| ClusterHealth::unreachable(&self.host)),
            _ => ClusterHealth::unreachable(&self.host),
        }
    }

    pub(crate) async fn get_index_settings(&self, index_names: &str) -> Result<IndexSet> {
        let url = format!("{}/{}/_settings", self.host, index_names);
        let (status, body) = self.transport.get(&url).await?;
        if !status.is_success() {
            bail!("{body}");
        }
        serde_json::from_str(&body).with_context(|| format!("bad settings response: {body}"))
    }

    /// Apply a settings body to a live index. `analysis` is rejected on
    /// open indices, so when present it is split out and applied through a
    /// close, static update, open cycle before the dynamic settings go in.
    pub(crate) async fn update_index_settings(&self, name: &str, mut settings: Value) -> Result<()> {
        debug!("update index settings: {name} {settings}");
        let url = format!("{}/{}/_settings", self.host, name);

        let analysis = settings
            .pointer_mut("/settings/index")
            .and_then(Value::as_object_mut)
            .and_then(|index| index.remove("analysis"));
        if let Some(analysis) = analysis {
            debug!("update static index settings: {name}");
            let static_settings = json!({ "settings": { "index": { "analysis": analysis } } });
            self.json_op(Method::POST, &format!("{}/{}/_close", self.host, name), None)
                .await
                .with_context(|| format!("failed to close index {name}"))?;
            self.json_op(Method::PUT, &url, Some(&static_settings))
                .await
                .with_context(|| format!("failed to apply static settings on {name}"))?;
            self.json_op(Method::POST, &format!("{}/{}/_open", self.host, name), None)
                .await
                .with_context(|| format!("failed to reopen index {name}"))?;
        }

        debug!("update dynamic index settings: {name}");
        self.json_op(Method::PUT, &url, Some(&settings))
            .await
            .with_context(|| format!("failed to update settings on {name}"))?;
        Ok(())
    }

    /// Fetch mappings for a pattern and resolve the pattern into the
    /// concrete comma-separated index list the rest of the run will use.
    /// Returns `(resolved_names, mappings_by_index)`.
    pub(crate) async fn get_index_mappings(
        &self,
        copy_all_indexes: bool,
        index_names: &str,
    ) -> Result<(String, IndexSet)> {
        let url = format!("{}/{}/_mapping", self.host, index_names);
        let (status, body) = self.transport.get(&url).await?;
        if !status.is_success() {
            bail!("{body}");
        }
        let mut indexes: IndexSet =
            serde_json::from_str(&body).with_context(|| format!("bad mapping response: {body}"))?;

        let kept = filter_index_names(indexes.keys(), index_names, copy_all_indexes)?;
        indexes.retain(|name, _| kept.contains(name));

        // Pre-mapping-era responses carry the types at the top level; wrap
        // them so every entry has a "mappings" key.
        for (_, entry) in indexes.iter_mut() {
            let wrapped = entry
                .as_object()
                .map(|object| !object.contains_key("mappings"))
                .unwrap_or(true);
            if wrapped {
                *entry = json!({ "mappings": entry.take() });
            }
        }

        Ok((kept.join(","), indexes))
    }

    /// Push one index's mappings to the destination. The endpoint and the
    /// payload both vary by dialect.
    pub(crate) async fn update_index_mapping(
        &self,
        index_name: &str,
        mappings: &Map<String, Value>,
    ) -> Result<()> {
        debug!("start update mapping: {index_name}");
        let mut mappings = mappings.clone();
        if self.dialect.strips_dynamic_templates() {
            mappings.remove("dynamic_templates");
        }

        match self.dialect {
            Dialect::V7 => {
                // Typeless endpoint, whole tree in one shot.
                let url = format!("{}/{}/_mapping", self.host, index_name);
                self.json_op(Method::POST, &url, Some(&Value::Object(mappings)))
                    .await
                    .with_context(|| format!("failed to update mapping on {index_name}"))?;
            }
            Dialect::V6 => {
                // Per-type URL, but the body keeps the type wrapper.
                let body = Value::Object(mappings.clone());
                for type_name in mappings.keys() {
                    let url = format!("{}/{}/{}/_mapping", self.host, index_name, type_name);
                    self.json_op(Method::POST, &url, Some(&body))
                        .await
                        .with_context(|| format!("failed to update mapping on {index_name}"))?;
                }
            }
            Dialect::V0 | Dialect::V5 => {
                for (type_name, mapping) in &mappings {
                    let url = format!("{}/{}/{}/_mapping", self.host, index_name, type_name);
                    self.json_op(Method::POST, &url, Some(mapping))
                        .await
                        .with_context(|| format!("failed to update mapping on {index_name}"))?;
                }
            }
        }
        Ok(())
    }

    pub(crate) async fn create_index(&self, name: &str, settings: &Value) -> Result<()> {
        debug!("start create index: {name} {settings}");
        let url = format!("{}/{}", self.host, name);
        self.json_op(Method::PUT, &url, Some(settings))
            .await
            .with_context(|| format!("failed to create index {name}"))?;
        Ok(())
    }

    pub(crate) async fn delete_index(&self, name: &str) -> Result<()> {
        debug!("start delete index: {name}");
        let url = format!("{}/{}", self.host, name);
        self.json_op(Method::DELETE, &url, None)
            .await
            .with_context(|| format!("failed to delete index {name}"))?;
        Ok(())
    }

    pub(crate) async fn refresh(&self, name: &str) -> Result<()> {
        debug!("refresh index: {name}");
        let url = format!("{}/{}/_refresh", self.host, name);
        self.json_op(Method::POST, &url, None)
            .await
            .with_context(|| format!("failed to refresh index {name}"))?;
        Ok(())
    }

    /// Open a cursor and return the first page. v0 keeps the ancient
    /// `search_type=scan` form; later dialects use a plain scroll search.
    pub(crate) async fn open_scroll(&self, request: &ScrollRequest) -> Result<ScrollResponse> {
        let url = match self.dialect {
            Dialect::V0 => format!(
                "{}/{}/_search?search_type=scan&scroll={}&size={}",
                self.host, request.index_pattern, request.ttl, request.page_size
            ),
            _ => format!(
                "{}/{}/_search?scroll={}&size={}",
                self.host, request.index_pattern, request.ttl, request.page_size
            ),
        };
        let body = self.scroll_body(request);
        let (status, text) = self
            .transport
            .request_json(Method::POST, &url, body.as_ref())
            .await
            .context("failed to open scroll")?;
        if !status.is_success() {
            bail!("{text}");
        }
        trace!("new scroll: {text}");
        serde_json::from_str(&text).with_context(|| format!("bad scroll response: {text}"))
    }

    /// Advance a cursor. The returned page carries the rotated handle.
    pub(crate) async fn next_scroll(&self, ttl: &str, scroll_id: &str) -> Result<ScrollResponse> {
        let url = format!(
            "{}/_search/scroll?scroll={}&scroll_id={}",
            self.host, ttl, scroll_id
        );
        let (status, text) = self
            .transport
            .request_json(Method::GET, &url, None)
            .await
            .context("failed to advance scroll")?;
        if !status.is_success() {
            bail!("{text}");
        }
        serde_json::from_str(&text).with_context(|| format!("bad scroll response: {text}"))
    }

    /// Ship one bulk body. Item-level errors and decode problems are logged
    /// and swallowed; only transport failures and non-2xx statuses surface,
    /// and the caller decides whether those abort anything.
    pub(crate) async fn bulk(&self, body: Vec<u8>) -> Result<()> {
        if body.is_empty() {
            trace!("bulk body is empty, skip");
            return Ok(());
        }
        let url = format!("{}/_bulk", self.host);
        let (status, text) = self.transport.post_ndjson(&url, body).await?;
        if !status.is_success() {
            bail!("bulk request returned {status}: {text}");
        }
        match serde_json::from_str::<BulkResponse>(&text) {
            Ok(response) if response.errors => {
                error!("bulk response contains item errors: {text}");
            }
            Ok(response) => {
                trace!(
                    "bulk took {:?} ms, {} items",
                    response.took,
                    response.items.len()
                );
            }
            Err(err) => {
                error!("failed to decode bulk response ({err}): {text}");
            }
        }
        Ok(())
    }

    fn scroll_body(&self, request: &ScrollRequest) -> Option<Value> {
        let mut body = Map::new();
        if let Some(fields) = request.fields.as_deref() {
            if !fields.is_empty() {
                if fields.contains(',') {
                    let list: Vec<&str> = fields.split(',').collect();
                    body.insert("_source".to_string(), json!(list));
                } else {
                    body.insert("_source".to_string(), json!(fields));
                }
            }
        }
        if let Some(query) = request.query.as_deref() {
            if !query.is_empty() {
                body.insert(
                    "query".to_string(),
                    json!({ "query_string": { "query": query } }),
                );
            }
        }
        if request.slice_count > 1 && self.dialect.supports_sliced_scroll() {
            trace!(
                "sliced scroll, {} of {}",
                request.slice_id,
                request.slice_count
            );
            body.insert(
                "slice".to_string(),
                json!({ "id": request.slice_id, "max": request.slice_count }),
            );
        }
        if body.is_empty() {
            None
        } else {
            Some(Value::Object(body))
        }
    }

    async fn json_op(&self, method: Method, url: &str, body: Option<&Value>) -> Result<String> {
        let (status, text) = self.transport.request_json(method, url, body).await?;
        if !status.is_success() {
            bail!("server error: {text}");
        }
        Ok(text)
    }
}

/// Resolve an index pattern against the names the engine returned. `_all`
/// means everything; tokens with `*`/`?` are shell-style globs evaluated as
/// anchored regular expressions; plain tokens pass through verbatim. Names
/// starting with `.` or `_` are only kept for expanded patterns when
/// `copy_all_indexes` is set.
pub(crate) fn filter_index_names<'a>(
    known: impl Iterator<Item = &'a String>,
    pattern: &str,
    copy_all_indexes: bool,
) -> Result<Vec<String>> {
    let known: Vec<&String> = known.collect();
    let expanded_ok = |name: &str| copy_all_indexes || !name.starts_with(['.', '_']);

    let mut kept = Vec::new();
    for token in pattern.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        if token == "_all" {
            for name in &known {
                if expanded_ok(name.as_str()) && !kept.contains(*name) {
                    kept.push((*name).clone());
                }
            }
        } else if token.contains('*') || token.contains('?') {
            let regex = Regex::new(&glob_to_regex(token))
                .with_context(|| format!("invalid index pattern '{token}'"))?;
            for name in &known {
                if regex.is_match(name.as_str())
                    && expanded_ok(name.as_str())
                    && !kept.contains(*name)
                {
                    kept.push((*name).clone());
                }
            }
        } else if !kept.iter().any(|kept_name| kept_name.as_str() == token) {
            kept.push(token.to_string());
        }
    }
    Ok(kept)
}

fn glob_to_regex(pattern: &str) -> String {
    let mut regex = String::with_capacity(pattern.len() + 8);
    regex.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
    }
    regex.push('$');
    regex
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn dialect_selection_follows_the_major_digit() {
        assert_eq!(Dialect::from_major(7), Dialect::V7);
        assert_eq!(Dialect::from_major(6), Dialect::V6);
        assert_eq!(Dialect::from_major(5), Dialect::V5);
        assert_eq!(Dialect::from_major(2), Dialect::V0);
        assert_eq!(Dialect::from_major(0), Dialect::V0);
    }

    #[test]
    fn the_one_where_all_expands_but_hides_dot_indices() {
        let known = names(&["logs-2024", ".kibana", "_internal", "metrics"]);
        let kept = filter_index_names(known.iter(), "_all", false).unwrap();
        assert_eq!(kept, vec!["logs-2024".to_string(), "metrics".to_string()]);

        let kept = filter_index_names(known.iter(), "_all", true).unwrap();
        assert_eq!(kept.len(), 4);
    }

    #[test]
    fn the_one_where_globs_match_like_a_shell() {
        let known = names(&["logs-2023", "logs-2024", "metrics-2024"]);
        let kept = filter_index_names(known.iter(), "logs-*", false).unwrap();
        assert_eq!(kept, vec!["logs-2023".to_string(), "logs-2024".to_string()]);

        let kept = filter_index_names(known.iter(), "logs-202?", false).unwrap();
        assert_eq!(kept.len(), 2);

        // A dot in the pattern is literal, not a regex wildcard.
        let known = names(&["a.bc", "axbc"]);
        let kept = filter_index_names(known.iter(), "a.b*", true).unwrap();
        assert_eq!(kept, vec!["a.bc".to_string()]);
    }

    #[test]
    fn the_one_where_comma_lists_pass_through_verbatim() {
        let known = names(&["logs", "metrics"]);
        let kept = filter_index_names(known.iter(), "logs, special", false).unwrap();
        // Explicit names are trusted even when the mapping fetch did not
        // return them; the engine will complain soon enough.
        assert_eq!(kept, vec!["logs".to_string(), "special".to_string()]);
    }

    #[test]
    fn glob_translation_anchors_and_escapes() {
        assert_eq!(glob_to_regex("logs-*"), "^logs\\-.*$");
        assert_eq!(glob_to_regex("a?c"), "^a.c$");
    }
}
