//! A bulk writer: dequeue, transform, batch, flush.
//!
//! The three-way wait is the heart of the worker: a document resets both
//! timers, the idle timer flushes whatever accumulated, and the task timer
//! gives up on a dead upstream. Only a new document pushes the task
//! deadline out, so a writer fed nothing for five minutes terminates even
//! though it idles and flushes every five seconds in between.

use std::time::Duration;

use anyhow::Result;
use async_channel::Receiver;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

use super::Worker;
use crate::cluster::EsClient;
use crate::common::HitEnvelope;
use crate::composers::BulkComposer;
use crate::progress::MigrationProgress;
use crate::transforms::{DocumentTransformer, Outcome};

/// Quiet period after which a partial batch is flushed anyway.
const IDLE_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
/// Quiet period after which the upstream is presumed dead and the worker
/// exits. Does not close the queue; sibling writers keep draining.
const TASK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

pub(crate) struct BulkWorker {
    client: EsClient,
    rx: Receiver<HitEnvelope>,
    transformer: DocumentTransformer,
    max_bulk_bytes: usize,
    sleep_after_bulk: i64,
    progress: MigrationProgress,
}

impl BulkWorker {
    pub(crate) fn new(
        client: EsClient,
        rx: Receiver<HitEnvelope>,
        transformer: DocumentTransformer,
        max_bulk_bytes: usize,
        sleep_after_bulk: i64,
        progress: MigrationProgress,
    ) -> Self {
        Self {
            client,
            rx,
            transformer,
            max_bulk_bytes,
            sleep_after_bulk,
            progress,
        }
    }

    async fn flush(&self, composer: &mut BulkComposer) {
        if composer.is_empty() {
            return;
        }
        let (body, docs) = composer.take();
        trace!("execute bulk insert, {docs} docs, {} bytes", body.len());
        if let Err(err) = self.client.bulk(body).await {
            // At-most-once: the batch is spent whether the engine took it
            // or not.
            error!("bulk request failed: {err:#}");
        }
        self.progress.add_written(docs);
        if self.sleep_after_bulk > 0 {
            tokio::time::sleep(Duration::from_secs(self.sleep_after_bulk as u64)).await;
        }
    }
}

impl Worker for BulkWorker {
    fn start(self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            debug!("start es bulk worker");
            let mut composer =
                BulkComposer::with_capacity(self.max_bulk_bytes.min(8 * 1024 * 1024));
            let mut idle_deadline = Instant::now() + IDLE_FLUSH_INTERVAL;
            let mut task_deadline = Instant::now() + TASK_TIMEOUT;

            loop {
                tokio::select! {
                    received = self.rx.recv() => match received {
                        Ok(hit) => {
                            trace!("read doc from channel");
                            idle_deadline = Instant::now() + IDLE_FLUSH_INTERVAL;
                            task_deadline = Instant::now() + TASK_TIMEOUT;
                            match self.transformer.apply(hit) {
                                Outcome::Doc(doc) => {
                                    composer.append(&doc)?;
                                    if composer.len() >= self.max_bulk_bytes {
                                        self.flush(&mut composer).await;
                                    }
                                }
                                Outcome::Skip => {}
                                Outcome::Corrupt => {
                                    error!("corrupt document stream, stopping this worker");
                                    break;
                                }
                            }
                        }
                        Err(_) => {
                            debug!("doc chan closed, flushing and stopping worker");
                            break;
                        }
                    },
                    _ = tokio::time::sleep_until(idle_deadline) => {
                        debug!("5s no message input");
                        self.flush(&mut composer).await;
                        idle_deadline = Instant::now() + IDLE_FLUSH_INTERVAL;
                    }
                    _ = tokio::time::sleep_until(task_deadline) => {
                        warn!("5m no message input, close worker");
                        break;
                    }
                }
            }

            self.flush(&mut composer).await;
            Ok(())
        })
    }
}
