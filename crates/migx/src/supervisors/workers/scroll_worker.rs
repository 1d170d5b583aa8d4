//! One cursor slice: pull pages from the source, push hits into the queue.

use std::sync::Arc;

use anyhow::Result;
use async_channel::Sender;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::{SliceGate, Worker};
use crate::cluster::{EsClient, ScrollResponse};
use crate::common::HitEnvelope;
use crate::progress::MigrationProgress;

/// Drives one logical slice of a paginated read. The supervisor already
/// opened the cursor (it needed the hit totals up front); this worker emits
/// the first page, then advances the rotating handle until the server
/// returns an empty page.
pub(crate) struct ScrollWorker {
    client: EsClient,
    ttl: String,
    first_page: ScrollResponse,
    tx: Sender<HitEnvelope>,
    gate: Arc<SliceGate>,
    progress: MigrationProgress,
    slice_id: usize,
}

impl ScrollWorker {
    pub(crate) fn new(
        client: EsClient,
        ttl: String,
        first_page: ScrollResponse,
        tx: Sender<HitEnvelope>,
        gate: Arc<SliceGate>,
        progress: MigrationProgress,
        slice_id: usize,
    ) -> Self {
        Self {
            client,
            ttl,
            first_page,
            tx,
            gate,
            progress,
            slice_id,
        }
    }
}

enum PageStep {
    /// Keep scrolling with this (rotated) handle.
    Continue(String),
    /// No handle left or the queue went away; the slice is over.
    Done,
}

impl Worker for ScrollWorker {
    fn start(self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            let Self {
                client,
                ttl,
                first_page,
                tx,
                gate,
                progress,
                slice_id,
            } = self;
            debug!("scroll worker {slice_id} started");

            // The first page of a v0 scan carries no hits; the handle still
            // has to be advanced, so an empty first page is not the end.
            let mut scroll_id = match emit_page(&tx, &progress, first_page).await {
                PageStep::Continue(id) => id,
                PageStep::Done => {
                    gate.complete();
                    return Ok(());
                }
            };

            loop {
                match client.next_scroll(&ttl, &scroll_id).await {
                    Err(err) => {
                        // The handle may have expired past its TTL; there is
                        // no recovery for this slice.
                        error!("scroll slice {slice_id} failed: {err:#}");
                        break;
                    }
                    Ok(page) => {
                        if page.hits.docs.is_empty() {
                            debug!("scroll result is empty");
                            break;
                        }
                        match emit_page(&tx, &progress, page).await {
                            PageStep::Continue(id) => scroll_id = id,
                            PageStep::Done => break,
                        }
                    }
                }
            }

            gate.complete();
            debug!("scroll worker {slice_id} finished");
            Ok(())
        })
    }
}

/// Log per-shard failures, push every hit into the queue, and report the
/// rotated handle for the next call.
async fn emit_page(
    tx: &Sender<HitEnvelope>,
    progress: &MigrationProgress,
    page: ScrollResponse,
) -> PageStep {
    if page.shards.failed > 0 {
        debug!(
            "shards: {} total, {} successful, {} skipped, {} failed",
            page.shards.total, page.shards.successful, page.shards.skipped, page.shards.failed
        );
    }
    for failure in &page.shards.failures {
        let reason = failure.reason.clone().unwrap_or(Value::Null);
        error!(
            "shard {:?} failure on {:?} (status {:?}): {}",
            failure.shard, failure.index, failure.status, reason
        );
    }

    let count = page.hits.docs.len() as u64;
    for doc in page.hits.docs {
        match doc {
            Value::Object(envelope) => {
                if tx.send(envelope).await.is_err() {
                    debug!("doc chan closed, stopping slice");
                    return PageStep::Done;
                }
            }
            other => error!("skipping non-object hit: {other}"),
        }
    }
    progress.add_fetched(count);

    match page.scroll_id {
        Some(id) if !id.is_empty() => PageStep::Continue(id),
        _ => PageStep::Done,
    }
}
