//! Thin front end: parse flags, initialize logging, hand off to the
//! library, and turn failures into a non-zero exit code.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use migx::AppConfig;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Migrate document data between search clusters or local dump files.
#[derive(Parser, Debug)]
#[command(
    name = "migx",
    version,
    about = "Migrate document data between search clusters or local dump files",
    after_help = "EXAMPLES:\n    \
        migx -s http://localhost:9200 -d http://localhost:9201 -x logs-2024 --copy_mappings\n    \
        migx -s http://localhost:9200 -o dump.json -x 'logs-*'\n    \
        migx -i dump.json -d http://localhost:9201 -y archive -w 4"
)]
struct Cli {
    /// Source cluster URL, e.g. http://localhost:9200
    #[arg(short = 's', long)]
    source: Option<String>,

    /// Query against the source, filters data before migrate, e.g. name:medcl
    #[arg(short = 'q', long)]
    query: Option<String>,

    /// Destination cluster URL, e.g. http://localhost:9201
    #[arg(short = 'd', long)]
    dest: Option<String>,

    /// Basic auth of the source cluster, user:pass
    #[arg(short = 'm', long = "source_auth")]
    source_auth: Option<String>,

    /// Basic auth of the destination cluster, user:pass
    #[arg(short = 'n', long = "dest_auth")]
    dest_auth: Option<String>,

    /// Number of documents at a time, the "size" in the scroll request
    #[arg(short = 'c', long, default_value_t = 10_000)]
    count: usize,

    /// Number of buffered documents in memory
    #[arg(long = "buffer_count", default_value_t = 1_000_000)]
    buffer_count: usize,

    /// Concurrency number for bulk workers
    #[arg(short = 'w', long, default_value_t = 1)]
    workers: usize,

    /// Bulk size in MB
    #[arg(short = 'b', long = "bulk_size", default_value_t = 5)]
    bulk_size: usize,

    /// Scroll time
    #[arg(short = 't', long, default_value = "10m")]
    time: String,

    /// Size of sliced scroll; takes effect when greater than 1
    #[arg(long = "sliced_scroll_size", default_value_t = 1)]
    sliced_scroll_size: usize,

    /// Delete the destination index before copying
    #[arg(short = 'f', long)]
    force: bool,

    /// Copy indexes starting with . and _
    #[arg(short = 'a', long)]
    all: bool,

    /// Copy index settings from the source
    #[arg(long = "copy_settings")]
    copy_settings: bool,

    /// Copy index mappings from the source
    #[arg(long = "copy_mappings")]
    copy_mappings: bool,

    /// Set a number of shards on newly created indexes
    #[arg(long)]
    shards: Option<u32>,

    /// Indexes to copy; supports glob patterns and comma separated lists
    #[arg(short = 'x', long = "src_indexes", default_value = "_all")]
    src_indexes: String,

    /// Destination index name; allows only one, original name used if unset
    #[arg(short = 'y', long = "dest_index")]
    dest_index: Option<String>,

    /// Override type name
    #[arg(short = 'u', long = "type_override")]
    type_override: Option<String>,

    /// Wait for both clusters to be green before dumping; otherwise yellow is okay
    #[arg(long)]
    green: bool,

    /// Log level: trace, debug, info, warn, error
    #[arg(short = 'v', long, default_value = "info")]
    log: String,

    /// Output documents of the source into a local file
    #[arg(short = 'o', long = "output_file")]
    output_file: Option<String>,

    /// Index from a local dump file
    #[arg(short = 'i', long = "input_file")]
    input_file: Option<String>,

    /// Data type of the input file: dump, json_line, json_array, log_line
    #[arg(long = "input_file_type", default_value = "dump")]
    input_file_type: String,

    /// Filter source fields, comma separated, e.g. col1,col2,col3
    #[arg(long)]
    fields: Option<String>,

    /// Rename source fields, comma separated, e.g. _type:type,name:myname
    #[arg(long)]
    rename: Option<String>,

    /// Repeat the source data N times to the destination; align with
    /// --regenerate_id to amplify the data size
    #[arg(long = "repeat_times", default_value_t = 1)]
    repeat_times: usize,

    /// Regenerate ids for documents, overriding ids in the data source
    #[arg(short = 'r', long = "regenerate_id")]
    regenerate_id: bool,

    /// Use gzip to compress traffic
    #[arg(long)]
    compress: bool,

    /// Sleep N seconds after each bulk request
    #[arg(short = 'p', long, default_value_t = -1, allow_negative_numbers = true)]
    sleep: i64,

    /// Refresh the destination indexes after the migration finished
    #[arg(long)]
    refresh: bool,

    /// Proxy for source http connections, e.g. http://127.0.0.1:8080
    #[arg(long = "source_proxy")]
    source_proxy: Option<String>,

    /// Proxy for destination http connections
    #[arg(long = "dest_proxy")]
    dest_proxy: Option<String>,

    /// Optional TOML config file layered over the flags; MIGX_* environment
    /// variables win over both
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn into_config(self) -> Result<(AppConfig, Option<PathBuf>)> {
        let config_file = self.config;
        let mut config = AppConfig::default();
        config.source = self.source;
        config.dest = self.dest;
        config.source_auth = self.source_auth;
        config.dest_auth = self.dest_auth;
        config.source_proxy = self.source_proxy;
        config.dest_proxy = self.dest_proxy;
        config.query = self.query;
        config.count = self.count;
        config.buffer_count = self.buffer_count;
        config.workers = self.workers;
        config.bulk_size = self.bulk_size;
        config.time = self.time;
        config.sliced_scroll_size = self.sliced_scroll_size;
        config.force = self.force;
        config.all = self.all;
        config.copy_settings = self.copy_settings;
        config.copy_mappings = self.copy_mappings;
        config.shards = self.shards;
        config.src_indexes = self.src_indexes;
        config.dest_index = self.dest_index;
        config.type_override = self.type_override;
        config.green = self.green;
        config.log = self.log;
        config.output_file = self.output_file;
        config.input_file = self.input_file;
        config.input_file_type = self.input_file_type.parse()?;
        config.fields = self.fields;
        config.rename = self.rename;
        config.repeat_times = self.repeat_times;
        config.regenerate_id = self.regenerate_id;
        config.compress = self.compress;
        config.sleep = self.sleep;
        config.refresh = self.refresh;
        Ok((config, config_file))
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(err) = try_main(cli).await {
        error!("error: {err:#}");
        for cause in err.chain().skip(1) {
            error!("cause: {cause}");
        }
        std::process::exit(1);
    }
}

async fn try_main(cli: Cli) -> Result<()> {
    let (base, config_file) = cli.into_config()?;
    let config = migx::load_config(base, config_file.as_deref())
        .context("could not load the configuration")?;
    migx::run(config).await
}
