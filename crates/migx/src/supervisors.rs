//! Wiring of one migration round.
//!
//! The supervisor owns the queue for a round: it opens the cursors first
//! (totals up front, fail fast on an empty source), then spawns the reader
//! and writer workers and waits for all of them. Worker failures are
//! logged, never propagated across siblings; the round itself only fails
//! when it could not even start.

pub(crate) mod workers;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::app_config::AppConfig;
use crate::cluster::{EsClient, ScrollRequest};
use crate::progress::MigrationProgress;
use crate::transforms::DocumentTransformer;
use workers::bulk_worker::BulkWorker;
use workers::file_dump_worker::FileDumpWorker;
use workers::file_read_worker::FileReadWorker;
use workers::scroll_worker::ScrollWorker;
use workers::{SliceGate, Worker};

/// What one round moved, for the end-of-round summary.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RoundStats {
    pub fetched: u64,
    pub written: u64,
    pub elapsed: Duration,
}

pub(crate) struct Supervisor {
    config: AppConfig,
}

impl Supervisor {
    pub(crate) fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// Run one end-to-end pipeline over a fresh queue.
    ///
    /// `resolved_indexes` is the concrete index list when preparation
    /// resolved the pattern, or the raw pattern otherwise; the engine
    /// expands patterns in the search URL itself.
    pub(crate) async fn run_round(
        &self,
        source: Option<&EsClient>,
        target: Option<&EsClient>,
        resolved_indexes: &str,
    ) -> Result<RoundStats> {
        let started = Instant::now();
        let progress = MigrationProgress::new(
            if source.is_some() { "Scroll" } else { "Read" },
            if target.is_some() { "Bulk" } else { "Write" },
        );

        let (tx, rx) = async_channel::bounded(self.config.buffer_count);
        let mut handles: Vec<JoinHandle<Result<()>>> = Vec::new();

        if let Some(source_client) = source {
            let mut slice_count = self.config.sliced_scroll_size;
            if slice_count > 1 && !source_client.dialect().supports_sliced_scroll() {
                // A pre-v5 engine cannot partition a scroll; running the
                // same scan N times would duplicate every document.
                warn!(
                    "sliced scroll is not supported by dialect {:?}, using a single stream",
                    source_client.dialect()
                );
                slice_count = 1;
            }

            let mut first_pages = Vec::with_capacity(slice_count);
            for slice_id in 0..slice_count {
                let request = ScrollRequest {
                    index_pattern: resolved_indexes.to_string(),
                    ttl: self.config.time.clone(),
                    page_size: self.config.count,
                    query: self.config.query.clone(),
                    fields: self.config.fields.clone(),
                    slice_id,
                    slice_count,
                };
                first_pages.push(source_client.open_scroll(&request).await?);
            }

            let total: i64 = first_pages
                .iter()
                .map(|page| page.hits.total.value())
                .sum();
            if total == 0 {
                bail!("can't find documents from source.");
            }
            progress.set_total(total as u64);

            let gate = SliceGate::new(slice_count, tx.clone());
            for (slice_id, first_page) in first_pages.into_iter().enumerate() {
                handles.push(
                    ScrollWorker::new(
                        source_client.clone(),
                        self.config.time.clone(),
                        first_page,
                        tx.clone(),
                        Arc::clone(&gate),
                        progress.clone(),
                        slice_id,
                    )
                    .start(),
                );
            }
        } else if let Some(input_file) = &self.config.input_file {
            handles.push(
                FileReadWorker::new(
                    input_file.clone(),
                    self.config.input_file_type,
                    tx.clone(),
                    progress.clone(),
                )
                .start(),
            );
        }

        if let Some(target_client) = target {
            debug!("start es bulk workers");
            let transformer = DocumentTransformer::from_config(&self.config);
            for _ in 0..self.config.workers {
                handles.push(
                    BulkWorker::new(
                        target_client.clone(),
                        rx.clone(),
                        transformer.clone(),
                        self.config.max_bulk_bytes(),
                        self.config.sleep,
                        progress.clone(),
                    )
                    .start(),
                );
            }
        } else if let Some(output_file) = &self.config.output_file {
            handles.push(
                FileDumpWorker::new(output_file.clone(), rx.clone(), progress.clone()).start(),
            );
        }

        // The supervisor's own endpoints must not keep the queue alive.
        drop(tx);
        drop(rx);

        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!("worker failed: {err:#}"),
                Err(err) => error!("worker panicked: {err}"),
            }
        }
        progress.finish();

        Ok(RoundStats {
            fetched: progress.fetched(),
            written: progress.written(),
            elapsed: started.elapsed(),
        })
    }
}
