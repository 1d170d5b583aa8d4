//! migx — streaming bulk migration between document search clusters.
//!
//! One run wires a producer/consumer pipeline: cursor streams (or a file
//! reader) push hit envelopes into a bounded queue, bulk writers (or a file
//! sink) drain it. Around the stream sit the version probe, the cluster
//! readiness gate, destination index preparation and the restore step that
//! puts `refresh_interval` back when the writers are done.

pub mod app_config;
pub(crate) mod cluster;
pub(crate) mod common;
pub(crate) mod composers;
pub(crate) mod prepare;
pub(crate) mod progress;
pub(crate) mod supervisors;
pub(crate) mod transforms;

use std::time::Instant;

use anyhow::{bail, Result};
use serde_json::Map;
use tracing::{debug, info};

pub use app_config::{load_config, AppConfig, InputFileType};

use cluster::{Auth, ClusterVersion, EsClient};
use prepare::IndexPreparer;
use supervisors::Supervisor;

/// Run a complete migration: validate, probe, then repeat the pipeline as
/// many rounds as configured. Returns an error for configuration problems,
/// initial connectivity failures and an empty source; runtime bulk errors
/// only show up in the logs.
pub async fn run(mut config: AppConfig) -> Result<()> {
    config.normalize();
    config.validate()?;

    let started = Instant::now();

    let source = connect_end(
        config.source.as_deref(),
        config.source_auth.as_deref(),
        config.source_proxy.as_deref(),
        &config,
        "source",
    )
    .await?;
    let target = connect_end(
        config.dest.as_deref(),
        config.dest_auth.as_deref(),
        config.dest_proxy.as_deref(),
        &config,
        "target",
    )
    .await?;

    // Mapping trees do not translate across majors; refuse before any
    // write happens.
    if let (Some((_, source_version)), Some((_, target_version))) = (&source, &target) {
        if config.copy_mappings && source_version.major() != target_version.major() {
            bail!(
                "{} => {}, cross-big-version mapping migration not available, please update mapping manually",
                source_version.version.number,
                target_version.version.number
            );
        }
    }

    if config.repeat_times > 1 {
        info!(
            "source data will repeat send to target: {} times, align with regenerate_id to amplify the data size",
            config.repeat_times
        );
    }

    let source_client = source.as_ref().map(|(client, _)| client);
    let target_client = target.as_ref().map(|(client, _)| client);

    for round in 0..config.repeat_times {
        if config.repeat_times > 1 {
            info!("repeat round: {}", round + 1);
        }
        run_round(&config, source_client, target_client).await?;
    }

    info!("data migration finished. took: {:?}", started.elapsed());
    Ok(())
}

async fn connect_end(
    url: Option<&str>,
    auth: Option<&str>,
    proxy: Option<&str>,
    config: &AppConfig,
    role: &str,
) -> Result<Option<(EsClient, ClusterVersion)>> {
    let url = match url {
        Some(url) => url,
        None => return Ok(None),
    };
    let (client, version) =
        EsClient::connect(url, Auth::parse(auth), proxy, config.compress).await?;
    debug!(
        "{role} es is {:?}, {}",
        client.dialect(),
        version.version.number
    );
    Ok(Some((client, version)))
}

/// One end-to-end pipeline over a fresh queue: gate, prepare, stream,
/// restore. Restore runs even when the stream aborts, so a prepared
/// destination never stays frozen at `refresh_interval = -1`.
async fn run_round(
    config: &AppConfig,
    source: Option<&EsClient>,
    target: Option<&EsClient>,
) -> Result<()> {
    let mut resolved_indexes = config.src_indexes.clone();
    let mut saved_refresh = Map::new();

    if let Some(target_client) = target {
        if let Some(source_client) = source {
            prepare::wait_for_cluster(source_client, config.green).await;
        }
        prepare::wait_for_cluster(target_client, config.green).await;

        if let Some(source_client) = source {
            debug!("start process with mappings");
            let prepared = IndexPreparer::new(source_client, target_client, config)
                .run()
                .await?;
            resolved_indexes = prepared.index_names;
            saved_refresh = prepared.refresh_intervals;
        }
    }

    info!("start data migration..");
    let supervisor = Supervisor::new(config.clone());
    let round_result = supervisor
        .run_round(source, target, &resolved_indexes)
        .await;

    if let Some(target_client) = target {
        if !saved_refresh.is_empty() {
            prepare::restore_index_settings(target_client, &saved_refresh, config.refresh).await;
        }
    }

    let stats = round_result?;
    info!(
        "round complete\n{}",
        progress::render_summary(stats.fetched, stats.written, stats.elapsed)
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn the_one_where_an_empty_config_cannot_run() {
        let err = run(AppConfig::default()).await.unwrap_err();
        assert!(err.to_string().contains("no input"));
    }

    #[tokio::test]
    async fn the_one_where_an_output_is_required_too() {
        let mut config = AppConfig::default();
        config.input_file = Some("/tmp/whatever.json".to_string());
        let err = run(config).await.unwrap_err();
        assert!(err.to_string().contains("no output"));
    }
}
