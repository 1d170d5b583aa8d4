//! Migration configuration: the full option surface as one serde struct.
//!
//! The CLI fills this from flags; [`load_config`] then layers an optional
//! TOML file and `MIGX_*` environment variables on top via figment, so the
//! same knobs work from a config file in unattended runs.

use anyhow::{bail, Context, Result};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// How the lines of an input dump file are decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InputFileType {
    /// Engine dump format: one full hit envelope per line.
    #[default]
    Dump,
    /// Same wire shape as `Dump`, one JSON envelope per line.
    JsonLine,
    /// The whole file is a single JSON array of envelopes.
    JsonArray,
    /// Plain text; each line becomes a `_source` with a `message` field.
    LogLine,
}

impl FromStr for InputFileType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "dump" => Ok(Self::Dump),
            "json_line" => Ok(Self::JsonLine),
            "json_array" => Ok(Self::JsonArray),
            "log_line" => Ok(Self::LogLine),
            other => bail!(
                "unknown input file type '{other}', options: dump, json_line, json_array, log_line"
            ),
        }
    }
}

impl fmt::Display for InputFileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Dump => "dump",
            Self::JsonLine => "json_line",
            Self::JsonArray => "json_array",
            Self::LogLine => "log_line",
        };
        f.write_str(name)
    }
}

/// Everything one migration run can be told to do.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Source cluster URL, e.g. `http://localhost:9200`.
    pub source: Option<String>,
    /// Destination cluster URL.
    pub dest: Option<String>,
    /// Basic auth for the source, `user:pass`.
    pub source_auth: Option<String>,
    /// Basic auth for the destination, `user:pass`.
    pub dest_auth: Option<String>,
    /// HTTP proxy for source connections.
    pub source_proxy: Option<String>,
    /// HTTP proxy for destination connections.
    pub dest_proxy: Option<String>,
    /// Filter expression applied to the source read (`query_string` syntax).
    pub query: Option<String>,
    /// Page size per cursor next, the `size` of the scroll request.
    pub count: usize,
    /// Queue capacity in documents.
    pub buffer_count: usize,
    /// Number of bulk writer tasks.
    pub workers: usize,
    /// Flush threshold in MiB.
    pub bulk_size: usize,
    /// Cursor TTL, e.g. `10m`.
    pub time: String,
    /// Number of parallel cursor slices; takes effect above 1.
    pub sliced_scroll_size: usize,
    /// Delete the destination index before copying.
    pub force: bool,
    /// Include indices whose name starts with `.` or `_`.
    pub all: bool,
    /// Replicate index settings from the source.
    pub copy_settings: bool,
    /// Replicate field mappings from the source.
    pub copy_mappings: bool,
    /// Override `number_of_shards` on newly created indices.
    pub shards: Option<u32>,
    /// Source index pattern: `_all`, comma list, or shell-style glob.
    pub src_indexes: String,
    /// Destination rename; only meaningful when exactly one index matches.
    pub dest_index: Option<String>,
    /// Override the document type on write.
    pub type_override: Option<String>,
    /// Wait for green cluster status instead of accepting yellow.
    pub green: bool,
    /// Log level: trace, debug, info, warn, error.
    pub log: String,
    /// Dump documents to this file instead of a destination cluster.
    pub output_file: Option<String>,
    /// Read documents from this file instead of a source cluster.
    pub input_file: Option<String>,
    /// Decoding applied to `input_file` lines.
    pub input_file_type: InputFileType,
    /// Projection list pushed into the request body as `_source`.
    pub fields: Option<String>,
    /// Field rename list, `old:new` pairs, comma separated.
    pub rename: Option<String>,
    /// Re-run the whole pipeline this many times.
    pub repeat_times: usize,
    /// Clear document ids so the destination assigns them.
    pub regenerate_id: bool,
    /// Enable gzip on HTTP traffic.
    pub compress: bool,
    /// Sleep this many seconds after each bulk request; <= 0 disables.
    pub sleep: i64,
    /// Issue a `_refresh` per prepared index after restore.
    pub refresh: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source: None,
            dest: None,
            source_auth: None,
            dest_auth: None,
            source_proxy: None,
            dest_proxy: None,
            query: None,
            count: 10_000,
            buffer_count: 1_000_000,
            workers: 1,
            bulk_size: 5,
            time: "10m".to_string(),
            sliced_scroll_size: 1,
            force: false,
            all: false,
            copy_settings: false,
            copy_mappings: false,
            shards: None,
            src_indexes: "_all".to_string(),
            dest_index: None,
            type_override: None,
            green: false,
            log: "info".to_string(),
            output_file: None,
            input_file: None,
            input_file_type: InputFileType::Dump,
            fields: None,
            rename: None,
            repeat_times: 1,
            regenerate_id: false,
            compress: false,
            sleep: -1,
            refresh: false,
        }
    }
}

impl AppConfig {
    /// Clamp the knobs that must be at least one so the pipeline can run.
    pub fn normalize(&mut self) {
        if self.repeat_times < 1 {
            self.repeat_times = 1;
        }
        if self.workers < 1 {
            self.workers = 1;
        }
        if self.sliced_scroll_size < 1 {
            self.sliced_scroll_size = 1;
        }
        if self.buffer_count < 1 {
            self.buffer_count = 1;
        }
        if self.count < 1 {
            self.count = 1;
        }
    }

    /// Reject configurations that cannot possibly form a pipeline. Runs
    /// before any I/O.
    pub fn validate(&self) -> Result<()> {
        if self.source.is_none() && self.input_file.is_none() {
            bail!("no input, set a source cluster or an input file");
        }
        if self.dest.is_none() && self.output_file.is_none() {
            bail!("no output, set a destination cluster or an output file");
        }
        if self.source.is_some()
            && self.source == self.dest
            && self.dest_index.as_deref() == Some(self.src_indexes.as_str())
        {
            bail!("migration output is the same as the input");
        }
        if self.bulk_size == 0 {
            bail!("bulk_size must be at least 1 MiB");
        }
        Ok(())
    }

    /// Flush threshold in bytes.
    pub(crate) fn max_bulk_bytes(&self) -> usize {
        self.bulk_size * 1024 * 1024
    }
}

/// Layer an optional TOML file and `MIGX_*` environment variables over a
/// flag-built config. Later layers win, so the environment beats the file
/// and both beat the base.
pub fn load_config(base: AppConfig, config_file: Option<&Path>) -> Result<AppConfig> {
    let mut figment = Figment::from(Serialized::defaults(base));
    if let Some(path) = config_file {
        info!("loading configuration file: {}", path.display());
        figment = figment.merge(Toml::file(path));
    }
    figment
        .merge(Env::prefixed("MIGX_"))
        .extract()
        .with_context(|| match config_file {
            Some(path) => format!(
                "failed to parse configuration from '{}' and MIGX_* environment variables",
                path.display()
            ),
            None => "failed to parse configuration from MIGX_* environment variables".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn write_test_config(contents: &str) -> std::path::PathBuf {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock went backwards")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("migx_app_config_{stamp}.toml"));
        fs::write(&path, contents).expect("failed to write test config");
        path
    }

    #[test]
    fn the_one_where_defaults_match_the_documented_surface() {
        let config = AppConfig::default();
        assert_eq!(config.count, 10_000);
        assert_eq!(config.buffer_count, 1_000_000);
        assert_eq!(config.workers, 1);
        assert_eq!(config.bulk_size, 5);
        assert_eq!(config.time, "10m");
        assert_eq!(config.src_indexes, "_all");
        assert_eq!(config.sleep, -1);
        assert_eq!(config.input_file_type, InputFileType::Dump);
    }

    #[test]
    fn the_one_where_the_toml_file_overrides_the_flags() {
        let path = write_test_config(
            r#"
            dest = "http://localhost:9201"
            workers = 4
            bulk_size = 20
            "#,
        );

        let mut base = AppConfig::default();
        base.source = Some("http://localhost:9200".to_string());
        base.workers = 2;

        let config = load_config(base, Some(path.as_path())).expect("config should parse");
        assert_eq!(config.source.as_deref(), Some("http://localhost:9200"));
        assert_eq!(config.dest.as_deref(), Some("http://localhost:9201"));
        assert_eq!(config.workers, 4);
        assert_eq!(config.bulk_size, 20);

        fs::remove_file(path).expect("failed to remove test config");
    }

    #[test]
    fn the_one_where_a_pipeline_without_input_is_rejected() {
        let mut config = AppConfig::default();
        config.dest = Some("http://localhost:9201".to_string());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("no input"));
    }

    #[test]
    fn the_one_where_a_pipeline_without_output_is_rejected() {
        let mut config = AppConfig::default();
        config.source = Some("http://localhost:9200".to_string());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("no output"));
    }

    #[test]
    fn the_one_where_copying_an_index_onto_itself_is_rejected() {
        let mut config = AppConfig::default();
        config.source = Some("http://localhost:9200".to_string());
        config.dest = Some("http://localhost:9200".to_string());
        config.src_indexes = "logs".to_string();
        config.dest_index = Some("logs".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn the_one_where_the_same_host_with_a_rename_is_fine() {
        let mut config = AppConfig::default();
        config.source = Some("http://localhost:9200".to_string());
        config.dest = Some("http://localhost:9200".to_string());
        config.src_indexes = "logs".to_string();
        config.dest_index = Some("archive".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn normalize_clamps_zeroed_knobs() {
        let mut config = AppConfig::default();
        config.workers = 0;
        config.repeat_times = 0;
        config.sliced_scroll_size = 0;
        config.normalize();
        assert_eq!(config.workers, 1);
        assert_eq!(config.repeat_times, 1);
        assert_eq!(config.sliced_scroll_size, 1);
    }

    #[test]
    fn input_file_type_parses_every_documented_value() {
        assert_eq!("dump".parse::<InputFileType>().unwrap(), InputFileType::Dump);
        assert_eq!(
            "json_line".parse::<InputFileType>().unwrap(),
            InputFileType::JsonLine
        );
        assert_eq!(
            "json_array".parse::<InputFileType>().unwrap(),
            InputFileType::JsonArray
        );
        assert_eq!(
            "log_line".parse::<InputFileType>().unwrap(),
            InputFileType::LogLine
        );
        assert!("csv".parse::<InputFileType>().is_err());
    }
}
