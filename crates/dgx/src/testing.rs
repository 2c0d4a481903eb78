//! 🧪 Test fixtures shared across modules: report builders and a store that misbehaves on command.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::backends::{AggregateStore, Commit, InMemoryAggregateStore, StoreError, VersionedBucket};
use crate::bucket_key::{BucketKey, DayStamp};
use crate::common::{BucketDocument, Diagnostic, Report};

pub(crate) fn at(raw: &str) -> DateTime<Utc> {
    raw.parse().expect("💀 test timestamp should be RFC 3339")
}

pub(crate) fn report(session_id: &str, locator: &str, diagnostic: u8, timestamp: &str) -> Report {
    Report {
        locator: locator.to_string(),
        session_id: session_id.to_string(),
        diagnostic: Diagnostic(diagnostic),
        symptoms: serde_json::Value::Null,
        timestamp: at(timestamp),
        trust_score: 0.9,
    }
}

pub(crate) fn day(raw: &str) -> DayStamp {
    DayStamp::parse(raw).expect("💀 test daystamp should be canonical")
}

pub(crate) fn key(locator: &str, daystamp: &str) -> BucketKey {
    BucketKey::new(locator, day(daystamp))
}

/// 🎭 An in-memory store that fails on cue and keeps receipts.
///
/// - `with_conflicts(n)`: the next `n` commits come back as write conflicts.
/// - `failing_batch(n)`: the n-th `write_batch` call (1-based) fails.
/// - every successful batch's size lands in `batch_sizes`.
#[derive(Debug, Clone, Default)]
pub(crate) struct FlakyStore {
    pub(crate) inner: InMemoryAggregateStore,
    conflicts_remaining: Arc<AtomicUsize>,
    fail_batch_number: Option<usize>,
    batches_seen: Arc<AtomicUsize>,
    pub(crate) commit_calls: Arc<AtomicUsize>,
    pub(crate) batch_sizes: Arc<Mutex<Vec<usize>>>,
}

impl FlakyStore {
    pub(crate) fn new(inner: InMemoryAggregateStore) -> Self {
        Self { inner, ..Self::default() }
    }

    pub(crate) fn with_conflicts(self, count: usize) -> Self {
        self.conflicts_remaining.store(count, Ordering::SeqCst);
        self
    }

    pub(crate) fn failing_batch(mut self, batch_number: usize) -> Self {
        self.fail_batch_number = Some(batch_number);
        self
    }

    pub(crate) fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().expect("💀 batch log poisoned").clone()
    }
}

#[async_trait]
impl AggregateStore for FlakyStore {
    async fn read_versioned(&self, key: &BucketKey) -> Result<VersionedBucket> {
        self.inner.read_versioned(key).await
    }

    async fn commit(&self, commit: Commit) -> Result<()> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .conflicts_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if injected {
            let key = commit.writes.first().map(|(key, _)| key.id()).unwrap_or_default();
            return Err(StoreError::Conflict { key }.into());
        }
        self.inner.commit(commit).await
    }

    async fn write_batch(&self, documents: Vec<BucketDocument>) -> Result<()> {
        let batch_number = self.batches_seen.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_batch_number == Some(batch_number) {
            bail!("💥 injected failure on batch {batch_number}");
        }
        let size = documents.len();
        self.inner.write_batch(documents).await?;
        self.batch_sizes.lock().expect("💀 batch log poisoned").push(size);
        Ok(())
    }

    async fn get(&self, key: &BucketKey) -> Result<Option<BucketDocument>> {
        self.inner.get(key).await
    }

    async fn scan(&self, day: Option<&DayStamp>) -> Result<Vec<BucketDocument>> {
        self.inner.scan(day).await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }

    fn max_writes_per_batch(&self) -> usize {
        self.inner.max_writes_per_batch()
    }
}
