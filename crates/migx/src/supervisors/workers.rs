//! The worker zoo: cursor readers, file readers, bulk writers, file sinks.
//!
//! Workers are plain structs consumed by `start()`, which hands back the
//! task's `JoinHandle`. The supervisor owns the handles; a worker that
//! stops early never tears down its siblings.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_channel::Sender;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::common::HitEnvelope;

pub(crate) mod bulk_worker;
pub(crate) mod file_dump_worker;
pub(crate) mod file_read_worker;
pub(crate) mod scroll_worker;

/// A background worker. `start` consumes the worker and spawns its task.
pub(crate) trait Worker {
    fn start(self) -> JoinHandle<Result<()>>;
}

/// Completion barrier for the producer side. Every cursor slice reports in
/// once; the last one to arrive closes the document channel, exactly once,
/// no matter how the slices interleave.
#[derive(Debug)]
pub(crate) struct SliceGate {
    finished: AtomicUsize,
    slice_count: usize,
    tx: Sender<HitEnvelope>,
}

impl SliceGate {
    pub(crate) fn new(slice_count: usize, tx: Sender<HitEnvelope>) -> Arc<Self> {
        Arc::new(Self {
            finished: AtomicUsize::new(0),
            slice_count,
            tx,
        })
    }

    /// Report one finished slice. Call at most once per slice.
    pub(crate) fn complete(&self) {
        let finished = self.finished.fetch_add(1, Ordering::AcqRel) + 1;
        if finished == self.slice_count {
            debug!("closing doc chan");
            self.tx.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_only_the_last_slice_closes_the_queue() {
        let (tx, _rx) = async_channel::bounded::<HitEnvelope>(4);
        let gate = SliceGate::new(3, tx.clone());
        gate.complete();
        gate.complete();
        assert!(!tx.is_closed(), "queue must stay open while slices remain");
        gate.complete();
        assert!(tx.is_closed(), "last slice closes the queue");
    }

    #[test]
    fn a_single_slice_still_closes_the_queue() {
        let (tx, _rx) = async_channel::bounded::<HitEnvelope>(1);
        let gate = SliceGate::new(1, tx.clone());
        gate.complete();
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn the_one_where_racing_slices_close_exactly_once() {
        let (tx, rx) = async_channel::bounded::<HitEnvelope>(1);
        let gate = SliceGate::new(8, tx.clone());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let gate = Arc::clone(&gate);
            handles.push(tokio::spawn(async move {
                gate.complete();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(tx.is_closed());
        // Consumers observe a clean close, not a hang.
        assert!(rx.recv().await.is_err());
    }
}
