//! 📦 The batch writer: chunks in, one at a time, no skipping the queue.
//!
//! A rebuild can produce tens of thousands of buckets, and stores cap how many
//! writes one commit may carry. So: fixed-size chunks, committed strictly in
//! order, each its own atomic batch. The first chunk that fails stops the line.
//! Whatever already committed stays committed; we report it, we don't undo it.

use anyhow::Result;
use thiserror::Error;
use tracing::debug;

use crate::backends::AggregateStore;
use crate::common::BucketDocument;

/// ✅ What a fully successful write looked like.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchWriteSummary {
    pub batches_committed: usize,
    pub entries_committed: usize,
}

/// 💥 A chunk failed. Everything before it is durable; nothing after it was attempted.
#[derive(Debug, Error)]
#[error("batch {failed_batch} of {total_batches} failed after {entries_committed} bucket writes were committed")]
pub struct BatchWriteError {
    pub batches_committed: usize,
    pub entries_committed: usize,
    pub total_batches: usize,
    /// 1-based number of the chunk that failed
    pub failed_batch: usize,
    #[source]
    pub source: anyhow::Error,
}

/// 📦 Splits writes into chunks of at most `chunk_size` and commits them serially.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchWriter {
    chunk_size: usize,
}

impl BatchWriter {
    /// A `chunk_size` of 0 is treated as 1. Config validation stops that earlier; this stops the infinite loop.
    pub fn new(chunk_size: usize) -> Self {
        Self { chunk_size: chunk_size.max(1) }
    }

    /// 📏 The size actually used against `store`: ours, or the store's hard limit if that's smaller.
    pub fn effective_chunk_size(&self, store: &dyn AggregateStore) -> usize {
        self.chunk_size.min(store.max_writes_per_batch().max(1))
    }

    /// 🚀 Write every entry, chunk by chunk. Returns how many chunks committed.
    pub async fn write(&self, store: &dyn AggregateStore, entries: Vec<BucketDocument>) -> Result<BatchWriteSummary, BatchWriteError> {
        let chunk_size = self.effective_chunk_size(store);
        let total_batches = entries.len().div_ceil(chunk_size);
        let mut summary = BatchWriteSummary::default();

        let mut remaining = entries.into_iter().peekable();
        while remaining.peek().is_some() {
            let chunk: Vec<BucketDocument> = remaining.by_ref().take(chunk_size).collect();
            let size = chunk.len();
            let batch_number = summary.batches_committed + 1;

            if let Err(source) = store.write_batch(chunk).await {
                return Err(BatchWriteError {
                    batches_committed: summary.batches_committed,
                    entries_committed: summary.entries_committed,
                    total_batches,
                    failed_batch: batch_number,
                    source,
                });
            }
            summary.batches_committed += 1;
            summary.entries_committed += size;
            debug!("📦 batch {batch_number}/{total_batches} committed ({size} buckets)");
        }
        Ok(summary)
    }
}
