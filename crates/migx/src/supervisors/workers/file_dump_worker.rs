//! Alternate consumer: append the queue to a local dump file, one JSON
//! envelope per line.

use anyhow::{Context, Result};
use async_channel::Receiver;
use serde_json::Value;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

use super::Worker;
use crate::common::{has_required_keys, HitEnvelope};
use crate::progress::MigrationProgress;

pub(crate) struct FileDumpWorker {
    path: String,
    rx: Receiver<HitEnvelope>,
    progress: MigrationProgress,
}

impl FileDumpWorker {
    pub(crate) fn new(path: String, rx: Receiver<HitEnvelope>, progress: MigrationProgress) -> Self {
        Self { path, rx, progress }
    }
}

impl Worker for FileDumpWorker {
    fn start(self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            // Append so repeat rounds amplify into the same dump.
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await
                .with_context(|| format!("failed to open output file '{}'", self.path))?;
            let mut writer = BufWriter::new(file);

            loop {
                let hit = match self.rx.recv().await {
                    Ok(hit) => hit,
                    Err(_) => break,
                };

                if hit.get("status").and_then(Value::as_i64) == Some(404) {
                    let response = hit.get("response").cloned().unwrap_or(Value::Null);
                    error!("error: {}", response);
                    continue;
                }
                if !has_required_keys(&hit) {
                    error!("document missing one of _index/_type/_source/_id, stopping file sink");
                    break;
                }

                let line =
                    serde_json::to_string(&hit).context("failed to encode document envelope")?;
                trace!("{line}");
                writer.write_all(line.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                self.progress.add_written(1);
            }

            writer.flush().await.context("failed to flush output file")?;
            debug!("file dump finished");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_path(tag: &str) -> std::path::PathBuf {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock went backwards")
            .as_nanos();
        std::env::temp_dir().join(format!("migx_dump_{tag}_{stamp}.json"))
    }

    fn envelope(raw: serde_json::Value) -> HitEnvelope {
        match raw {
            Value::Object(map) => map,
            _ => panic!("test envelope must be an object"),
        }
    }

    #[tokio::test]
    async fn the_one_where_documents_land_one_per_line() {
        let path = temp_path("lines");
        let (tx, rx) = async_channel::bounded(4);
        let progress = MigrationProgress::new("Scroll", "Write");
        let handle = FileDumpWorker::new(path.to_string_lossy().to_string(), rx, progress).start();

        tx.send(envelope(json!({
            "_index": "logs", "_type": "doc", "_id": "1", "_source": {"n": 1}
        })))
        .await
        .unwrap();
        tx.send(envelope(json!({
            "_index": "logs", "_type": "doc", "_id": "2", "_source": {"n": 2}
        })))
        .await
        .unwrap();
        tx.close();
        handle.await.unwrap().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["_id"], "1");
        assert_eq!(first["_source"]["n"], 1);

        std::fs::remove_file(path).unwrap();
    }

    #[tokio::test]
    async fn the_one_where_stale_hits_never_reach_the_file() {
        let path = temp_path("stale");
        let (tx, rx) = async_channel::bounded(4);
        let progress = MigrationProgress::new("Scroll", "Write");
        let handle = FileDumpWorker::new(path.to_string_lossy().to_string(), rx, progress).start();

        tx.send(envelope(json!({"status": 404, "response": "not found"})))
            .await
            .unwrap();
        tx.send(envelope(json!({
            "_index": "logs", "_type": "doc", "_id": "1", "_source": {}
        })))
        .await
        .unwrap();
        tx.close();
        handle.await.unwrap().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);

        std::fs::remove_file(path).unwrap();
    }

    #[tokio::test]
    async fn the_one_where_file_to_file_round_trips_unchanged() {
        use crate::app_config::InputFileType;
        use crate::supervisors::workers::file_read_worker::FileReadWorker;

        let input = temp_path("rt_in");
        let output = temp_path("rt_out");
        let original = concat!(
            r#"{"_id":"1","_index":"logs","_source":{"name":"a"},"_type":"doc"}"#,
            "\n",
            r#"{"_id":"2","_index":"logs","_routing":"r1","_source":{"name":"b"},"_type":"doc"}"#,
            "\n",
        );
        std::fs::write(&input, original).unwrap();

        let (tx, rx) = async_channel::bounded(4);
        let progress = MigrationProgress::new("Read", "Write");
        let reader = FileReadWorker::new(
            input.to_string_lossy().to_string(),
            InputFileType::Dump,
            tx,
            progress.clone(),
        )
        .start();
        let writer =
            FileDumpWorker::new(output.to_string_lossy().to_string(), rx, progress).start();

        reader.await.unwrap().unwrap();
        writer.await.unwrap().unwrap();

        // Identity on the envelope: same keys, same values, key order may
        // differ because the envelope is an unordered mapping.
        let round_tripped = std::fs::read_to_string(&output).unwrap();
        let expected: Vec<Value> = original
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        let actual: Vec<Value> = round_tripped
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(expected, actual);

        std::fs::remove_file(input).unwrap();
        std::fs::remove_file(output).unwrap();
    }
}
