//! Wire envelopes for the engine's REST surface.
//!
//! Only the envelopes are typed. Hit payloads, settings trees and mapping
//! trees stay `serde_json::Value` because their shape belongs to the user's
//! data, not to us.

use serde::Deserialize;
use serde_json::{Map, Value};

/// Settings or mappings trees keyed by index name, as returned by
/// `/{pattern}/_settings` and `/{pattern}/_mapping`.
pub(crate) type IndexSet = Map<String, Value>;

/// Response of `GET /` on a cluster, used for dialect selection.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ClusterVersion {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub cluster_name: Option<String>,
    pub version: VersionInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct VersionInfo {
    pub number: String,
    #[serde(default)]
    pub lucene_version: Option<String>,
}

impl ClusterVersion {
    /// Leading major digit of the reported version, 0 when unparseable.
    pub(crate) fn major(&self) -> u32 {
        self.version
            .number
            .split('.')
            .next()
            .and_then(|major| major.parse().ok())
            .unwrap_or(0)
    }
}

/// Response of `/_cluster/health`, reduced to what the readiness gate needs.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ClusterHealth {
    #[serde(rename = "cluster_name", default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
}

impl ClusterHealth {
    /// Synthesized result for a cluster the health endpoint cannot reach.
    pub(crate) fn unreachable(host: &str) -> Self {
        Self {
            name: host.to_string(),
            status: "unreachable".to_string(),
        }
    }
}

/// Total-hits counter. Before v7 this is a bare integer; v7 nests it as
/// `{value, relation}`. The untagged enum accepts both so callers see one
/// normalized `value()`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum HitsTotal {
    Legacy(i64),
    Typed {
        value: i64,
        #[serde(default)]
        relation: Option<String>,
    },
}

impl Default for HitsTotal {
    fn default() -> Self {
        Self::Legacy(0)
    }
}

impl HitsTotal {
    pub(crate) fn value(&self) -> i64 {
        match self {
            Self::Legacy(value) => *value,
            Self::Typed { value, .. } => *value,
        }
    }
}

/// One page of a cursor read: either the open response of `/{p}/_search` or
/// a `/_search/scroll` continuation. The handle rotates, so every page
/// carries the id to use for the next call.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ScrollResponse {
    #[serde(rename = "_scroll_id", default)]
    pub scroll_id: Option<String>,
    #[serde(default)]
    pub hits: ScrollHits,
    #[serde(rename = "_shards", default)]
    pub shards: ShardStats,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ScrollHits {
    #[serde(default)]
    pub total: HitsTotal,
    /// The raw hit envelopes. Left untyped; workers decode what they need.
    #[serde(rename = "hits", default)]
    pub docs: Vec<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ShardStats {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub successful: u64,
    #[serde(default)]
    pub skipped: u64,
    #[serde(default)]
    pub failed: u64,
    #[serde(default)]
    pub failures: Vec<ShardFailure>,
}

/// Per-shard failure inside a cursor page; logged, never fatal.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ShardFailure {
    #[serde(default)]
    pub shard: Option<i64>,
    #[serde(default)]
    pub index: Option<String>,
    #[serde(default)]
    pub status: Option<i64>,
    #[serde(default)]
    pub reason: Option<Value>,
}

/// Response of `POST /_bulk`. Item-level errors are reported but do not
/// abort the stream.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct BulkResponse {
    #[serde(default)]
    pub took: Option<i64>,
    #[serde(default)]
    pub errors: bool,
    #[serde(default)]
    pub items: Vec<Map<String, Value>>,
}
