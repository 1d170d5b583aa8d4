//! Assembly of the newline-delimited bulk wire format.
//!
//! A batch is an append-only byte buffer of action-line/source-line pairs.
//! Every line, including the last, ends in `\n`; the engine rejects bodies
//! without the trailing newline.

use anyhow::{Context, Result};

use crate::common::Document;

#[derive(Debug, Default)]
pub(crate) struct BulkComposer {
    buf: Vec<u8>,
    docs: u64,
}

impl BulkComposer {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            docs: 0,
        }
    }

    /// Append one document as its two-line bulk fragment.
    pub(crate) fn append(&mut self, doc: &Document) -> Result<()> {
        serde_json::to_writer(&mut self.buf, &doc.action_line())
            .context("failed to encode bulk action line")?;
        self.buf.push(b'\n');
        serde_json::to_writer(&mut self.buf, &doc.source)
            .context("failed to encode document source")?;
        self.buf.push(b'\n');
        self.docs += 1;
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Hand off the accumulated body and start a fresh buffer. Returns the
    /// body and the number of documents it carries.
    pub(crate) fn take(&mut self) -> (Vec<u8>, u64) {
        let docs = self.docs;
        self.docs = 0;
        (std::mem::take(&mut self.buf), docs)
    }
}
