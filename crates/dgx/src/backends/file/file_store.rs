use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::{fs::File, io::AsyncWriteExt, io::BufWriter};
use tracing::{debug, info};

use super::parse_ndjson;
use crate::backends::{AggregateStore, Commit, CommonStoreConfig, InMemoryAggregateStore, VersionedBucket};
use crate::bucket_key::{BucketKey, DayStamp};
use crate::common::BucketDocument;

// 📂 FileAggregateStoreConfig: lives right next to the store that reads it.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct FileAggregateStoreConfig {
    /// 📄 NDJSON, one bucket per line. Missing file = empty store.
    pub snapshot_path: PathBuf,
    #[serde(flatten)]
    pub common_config: CommonStoreConfig,
}

/// 💾 The in-memory store with a memory of its own: an NDJSON snapshot on disk.
///
/// All the transactional work is delegated to [`InMemoryAggregateStore`]. The
/// disk is touched exactly twice: on `open` and on `close`. Snapshot lines are
/// written in key order, so the same buckets always produce the same bytes.
#[derive(Debug, Clone)]
pub struct FileAggregateStore {
    inner: InMemoryAggregateStore,
    config: FileAggregateStoreConfig,
}

impl FileAggregateStore {
    pub async fn open(config: FileAggregateStoreConfig) -> Result<Self> {
        let inner = InMemoryAggregateStore::new(config.common_config.clone());
        let path = &config.snapshot_path;

        let exists = tokio::fs::try_exists(path)
            .await
            .with_context(|| format!("💀 Could not even check whether '{}' exists. The filesystem is being coy.", path.display()))?;
        if exists {
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("💀 The snapshot '{}' exists but refused to be read.", path.display()))?;
            let documents: Vec<BucketDocument> = parse_ndjson(&bytes, path)?;
            info!("💾 loaded {} buckets from '{}'", documents.len(), path.display());
            inner.seed(documents).await;
        } else {
            info!("🌱 no snapshot at '{}' yet, starting empty", path.display());
        }
        Ok(Self { inner, config })
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.config.snapshot_path.clone().into_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

#[async_trait]
impl AggregateStore for FileAggregateStore {
    async fn read_versioned(&self, key: &BucketKey) -> Result<VersionedBucket> {
        self.inner.read_versioned(key).await
    }

    async fn commit(&self, commit: Commit) -> Result<()> {
        self.inner.commit(commit).await
    }

    async fn write_batch(&self, documents: Vec<BucketDocument>) -> Result<()> {
        self.inner.write_batch(documents).await
    }

    async fn get(&self, key: &BucketKey) -> Result<Option<BucketDocument>> {
        self.inner.get(key).await
    }

    async fn scan(&self, day: Option<&DayStamp>) -> Result<Vec<BucketDocument>> {
        self.inner.scan(day).await
    }

    /// 💾 Temp file, flush, rename. A crash halfway leaves yesterday's snapshot intact.
    async fn close(&self) -> Result<()> {
        let documents = self.inner.scan(None).await?;
        let temp_path = self.temp_path();
        let file = File::create(&temp_path).await.with_context(|| {
            format!("💀 The snapshot '{}' could not be conjured into existence. Does the directory exist?", temp_path.display())
        })?;

        let mut writer = BufWriter::new(file);
        for document in &documents {
            let mut line = serde_json::to_vec(document).context("💀 a bucket refused to become JSON")?;
            line.push(b'\n');
            writer.write_all(&line).await.context("💀 writing the snapshot failed. Disk full, perhaps?")?;
        }
        writer.flush().await.context("💀 flushing the snapshot failed")?;

        tokio::fs::rename(&temp_path, &self.config.snapshot_path).await.with_context(|| {
            format!("💀 could not move '{}' over '{}'", temp_path.display(), self.config.snapshot_path.display())
        })?;
        debug!("💾 wrote {} buckets to '{}'", documents.len(), self.config.snapshot_path.display());
        Ok(())
    }

    fn max_writes_per_batch(&self) -> usize {
        self.inner.max_writes_per_batch()
    }
}
