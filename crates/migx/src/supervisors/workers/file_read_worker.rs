//! Alternate producer: feed the queue from a local dump file.

use anyhow::{Context, Result};
use async_channel::Sender;
use serde_json::{json, Value};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

use super::Worker;
use crate::app_config::InputFileType;
use crate::common::HitEnvelope;
use crate::progress::MigrationProgress;

pub(crate) struct FileReadWorker {
    path: String,
    file_type: InputFileType,
    tx: Sender<HitEnvelope>,
    progress: MigrationProgress,
}

impl FileReadWorker {
    pub(crate) fn new(
        path: String,
        file_type: InputFileType,
        tx: Sender<HitEnvelope>,
        progress: MigrationProgress,
    ) -> Self {
        Self {
            path,
            file_type,
            tx,
            progress,
        }
    }

    async fn read_all(&self) -> Result<()> {
        match self.file_type {
            InputFileType::JsonArray => self.read_array().await,
            _ => self.read_lines().await,
        }
    }

    async fn read_lines(&self) -> Result<()> {
        let total = count_lines(&self.path).await?;
        trace!("file lines: {total}");
        self.progress.set_total(total);

        let file = File::open(&self.path)
            .await
            .with_context(|| format!("failed to open input file '{}'", self.path))?;
        let mut lines = BufReader::new(file).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let envelope = match self.file_type {
                InputFileType::LogLine => log_line_envelope(&line),
                // dump and json_line share the wire shape: one hit envelope
                // per line. A bad line is logged and skipped; the file keeps
                // streaming.
                _ => match serde_json::from_str::<HitEnvelope>(&line) {
                    Ok(envelope) => envelope,
                    Err(err) => {
                        error!("skipping undecodable line: {err}");
                        continue;
                    }
                },
            };
            if self.tx.send(envelope).await.is_err() {
                break;
            }
            self.progress.add_fetched(1);
        }
        Ok(())
    }

    async fn read_array(&self) -> Result<()> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("failed to open input file '{}'", self.path))?;
        let docs: Vec<Value> =
            serde_json::from_str(&raw).context("input file is not a JSON array")?;
        self.progress.set_total(docs.len() as u64);
        for doc in docs {
            match doc {
                Value::Object(envelope) => {
                    if self.tx.send(envelope).await.is_err() {
                        break;
                    }
                    self.progress.add_fetched(1);
                }
                other => error!("skipping non-object array element: {other}"),
            }
        }
        Ok(())
    }
}

impl Worker for FileReadWorker {
    fn start(self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            debug!("start reading file {}", self.path);
            let result = self.read_all().await;
            // EOF or error, the queue closes either way so the writers can
            // finish.
            self.tx.close();
            debug!("end reading file");
            result
        })
    }
}

/// A raw log line has no envelope of its own; give it one with no id so the
/// destination assigns one, and no index so the target rename provides it.
fn log_line_envelope(line: &str) -> HitEnvelope {
    let mut envelope = HitEnvelope::new();
    envelope.insert("_index".to_string(), json!(""));
    envelope.insert("_type".to_string(), json!(""));
    envelope.insert("_id".to_string(), json!(""));
    envelope.insert("_source".to_string(), json!({ "message": line }));
    envelope
}

async fn count_lines(path: &str) -> Result<u64> {
    let file = File::open(path)
        .await
        .with_context(|| format!("failed to open input file '{path}'"))?;
    let mut lines = BufReader::new(file).lines();
    let mut count = 0u64;
    while lines.next_line().await?.is_some() {
        count += 1;
    }
    Ok(count)
}
