use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use serde::Deserialize;
use tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::Mutex};
use tracing::info;

use super::parse_ndjson;
use crate::backends::{InMemoryReportHistory, ReportHistory};
use crate::common::Report;

// 📂 FileReportHistoryConfig: co-located with the history that uses it.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct FileReportHistoryConfig {
    /// 📁 one `<collection>.ndjson` (or `.ndjson.gz`) per collection lives here
    pub directory: PathBuf,
}

/// 🗂️ Where a collection came from, which decides whether it takes appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Plain,
    Gzip,
}

/// 📜 Report collections as NDJSON files, cached in memory on first touch.
///
/// A collection is read from disk at most once per process. After that every
/// query is served by the in-memory history, and appends go to both places.
/// Plain files win over gzipped ones if somebody left both lying around.
#[derive(Debug)]
pub struct FileReportHistory {
    config: FileReportHistoryConfig,
    cache: InMemoryReportHistory,
    /// 🔒 collections known to exist. Held across a load so nobody reads the same file twice.
    known: Mutex<HashMap<String, Origin>>,
}

impl FileReportHistory {
    pub async fn open(config: FileReportHistoryConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.directory).await.with_context(|| {
            format!("💀 The report directory '{}' could not be found or made.", config.directory.display())
        })?;
        Ok(Self { config, cache: InMemoryReportHistory::new(), known: Mutex::new(HashMap::new()) })
    }

    fn plain_path(&self, collection: &str) -> PathBuf {
        self.config.directory.join(format!("{collection}.ndjson"))
    }

    fn gzip_path(&self, collection: &str) -> PathBuf {
        self.config.directory.join(format!("{collection}.ndjson.gz"))
    }

    /// 🔍 Make sure `collection` is cached if it exists anywhere. `None` means it doesn't.
    async fn ensure_loaded(&self, collection: &str) -> Result<Option<Origin>> {
        let mut known = self.known.lock().await;
        self.load_into(&mut known, collection).await
    }

    /// 📥 The loading half of [`Self::ensure_loaded`], for callers already holding the lock.
    async fn load_into(&self, known: &mut HashMap<String, Origin>, collection: &str) -> Result<Option<Origin>> {
        if let Some(origin) = known.get(collection) {
            return Ok(Some(*origin));
        }

        let plain = self.plain_path(collection);
        let gzip = self.gzip_path(collection);
        let (origin, path, bytes) = if tokio::fs::try_exists(&plain).await? {
            (Origin::Plain, plain.clone(), read_plain(&plain).await?)
        } else if tokio::fs::try_exists(&gzip).await? {
            (Origin::Gzip, gzip.clone(), read_gzip(&gzip).await?)
        } else {
            return Ok(None);
        };

        let reports: Vec<Report> = parse_ndjson(&bytes, &path)?;
        info!("📜 loaded {} reports from '{}'", reports.len(), path.display());
        self.cache.seed(collection, reports).await;
        known.insert(collection.to_string(), origin);
        Ok(Some(origin))
    }
}

async fn read_plain(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path).await.with_context(|| format!("💀 '{}' exists but refused to be read", path.display()))
}

async fn read_gzip(path: &Path) -> Result<Vec<u8>> {
    let compressed = read_plain(path).await?;
    let display = path.display().to_string();
    // 🗜️ inflating is CPU work; keep it off the async worker threads
    tokio::task::spawn_blocking(move || {
        let mut decoded = Vec::new();
        GzDecoder::new(compressed.as_slice())
            .read_to_end(&mut decoded)
            .with_context(|| format!("💀 '{display}' claims to be gzip. It is lying."))?;
        Ok::<_, anyhow::Error>(decoded)
    })
    .await
    .context("💀 the gzip task fell over")?
}

#[async_trait]
impl ReportHistory for FileReportHistory {
    async fn latest_before(&self, collection: &str, session_id: &str, before: DateTime<Utc>) -> Result<Option<Report>> {
        match self.ensure_loaded(collection).await? {
            Some(_) => self.cache.latest_before(collection, session_id, before).await,
            None => Ok(None),
        }
    }

    async fn append(&self, collection: &str, report: Report) -> Result<()> {
        // 🔒 held until the cache has the row too, or a concurrent first load could read it off disk and we'd add it twice
        let mut known = self.known.lock().await;
        if self.load_into(&mut known, collection).await? == Some(Origin::Gzip) {
            bail!("💀 '{collection}' is a gzipped archive. Archives are read-only; decompress it to keep appending.");
        }

        let path = self.plain_path(collection);
        let mut line = serde_json::to_vec(&report).context("💀 a report refused to become JSON")?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("💀 could not open '{}' for appending", path.display()))?;
        file.write_all(&line).await.with_context(|| format!("💀 appending to '{}' failed", path.display()))?;
        file.flush().await?;

        self.cache.append(collection, report).await?;
        known.insert(collection.to_string(), Origin::Plain);
        Ok(())
    }

    async fn load_collection(&self, collection: &str) -> Result<Vec<Report>> {
        match self.ensure_loaded(collection).await? {
            Some(_) => self.cache.load_collection(collection).await,
            None => bail!(
                "💀 No report collection named '{collection}' in '{}'. We looked for .ndjson and .ndjson.gz. Typo, perhaps?",
                self.config.directory.display()
            ),
        }
    }
}
