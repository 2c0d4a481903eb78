use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::trace;

use crate::backends::{AggregateStore, Commit, CommonStoreConfig, StoreError, VersionedBucket, WriteOp};
use crate::bucket_key::{BucketKey, DayStamp};
use crate::common::BucketDocument;

/// 🔢 A document plus the number of times it has been written. `0` is reserved for "absent".
#[derive(Debug, Clone)]
struct StoredBucket {
    version: u64,
    document: BucketDocument,
}

/// 🪣 Buckets in RAM, with optimistic concurrency that actually bites.
///
/// Clone-able because tests (and the file store) need to keep a handle after
/// handing one to the pipeline. The `Arc` means every clone shares the same map.
///
/// 🔒 The mutex is held for the whole of a `commit`: version check and apply
/// happen under one lock, which is what makes a commit all-or-nothing.
/// Reads take the lock only long enough to clone one document.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAggregateStore {
    buckets: Arc<Mutex<BTreeMap<BucketKey, StoredBucket>>>,
    common_config: CommonStoreConfig,
}

impl InMemoryAggregateStore {
    pub fn new(common_config: CommonStoreConfig) -> Self {
        Self { buckets: Arc::default(), common_config }
    }

    /// 🌱 Load documents as if they had each been written once. Used when a snapshot is opened.
    pub(crate) async fn seed(&self, documents: Vec<BucketDocument>) {
        let mut buckets = self.buckets.lock().await;
        for document in documents {
            let version = buckets.get(&document.key()).map_or(0, |b| b.version) + 1;
            buckets.insert(document.key(), StoredBucket { version, document });
        }
    }

    fn check_batch_size(&self, size: usize) -> Result<()> {
        let limit = self.common_config.max_writes_per_batch;
        if size > limit {
            return Err(StoreError::BatchTooLarge { size, limit }.into());
        }
        Ok(())
    }
}

#[async_trait]
impl AggregateStore for InMemoryAggregateStore {
    async fn read_versioned(&self, key: &BucketKey) -> Result<VersionedBucket> {
        let buckets = self.buckets.lock().await;
        Ok(match buckets.get(key) {
            Some(stored) => VersionedBucket { version: stored.version, document: Some(stored.document.clone()) },
            None => VersionedBucket { version: 0, document: None },
        })
    }

    async fn commit(&self, commit: Commit) -> Result<()> {
        self.check_batch_size(commit.writes.len())?;
        let mut buckets = self.buckets.lock().await;

        // 🔍 validate everything first. Nothing is applied unless everything passes.
        for (key, seen_version) in &commit.reads {
            let current_version = buckets.get(key).map_or(0, |b| b.version);
            if current_version != *seen_version {
                trace!("🔄 conflict on {key}: read v{seen_version}, now v{current_version}");
                return Err(StoreError::Conflict { key: key.id() }.into());
            }
        }
        for (key, op) in &commit.writes {
            if matches!(op, WriteOp::Update { .. }) && !buckets.contains_key(key) {
                return Err(StoreError::MissingDocument { key: key.id() }.into());
            }
        }

        for (key, op) in commit.writes {
            match op {
                WriteOp::Set(document) => {
                    let version = buckets.get(&key).map_or(0, |b| b.version) + 1;
                    buckets.insert(key, StoredBucket { version, document });
                }
                WriteOp::Update { diagnostics } => {
                    if let Some(stored) = buckets.get_mut(&key) {
                        stored.document.diagnostics = diagnostics;
                        stored.version += 1;
                    }
                }
            }
        }
        Ok(())
    }

    async fn write_batch(&self, documents: Vec<BucketDocument>) -> Result<()> {
        self.check_batch_size(documents.len())?;
        let mut buckets = self.buckets.lock().await;
        for document in documents {
            let key = document.key();
            let version = buckets.get(&key).map_or(0, |b| b.version) + 1;
            buckets.insert(key, StoredBucket { version, document });
        }
        Ok(())
    }

    async fn get(&self, key: &BucketKey) -> Result<Option<BucketDocument>> {
        Ok(self.buckets.lock().await.get(key).map(|stored| stored.document.clone()))
    }

    async fn scan(&self, day: Option<&DayStamp>) -> Result<Vec<BucketDocument>> {
        let buckets = self.buckets.lock().await;
        Ok(buckets
            .iter()
            .filter(|(key, _)| day.is_none_or(|day| &key.daystamp == day))
            .map(|(_, stored)| stored.document.clone())
            .collect())
    }

    async fn close(&self) -> Result<()> {
        // 🗑️ nothing to flush. We live in RAM. The OS reclaims it all on the way out.
        Ok(())
    }

    fn max_writes_per_batch(&self) -> usize {
        self.common_config.max_writes_per_batch
    }
}
