//! 🔌 Backends: where the real I/O happens.
//!
//! 🪣 The aggregate store holds the buckets. 📜 The report history holds every
//! accepted (and quarantined) report. And in between, we panic! (kidding, we use anyhow)
//!
//! 🎭 Same casting agency as always: a trait per concern, concrete backends per
//! medium (RAM, disk), and an enum that dispatches so the rest of the crate
//! never has to know which one it got. Everyone above this module holds an
//! `Arc<dyn AggregateStore>` / `Arc<dyn ReportHistory>` and lives a quiet life.
//!
//! ⚠️ The store contract mirrors a document database with optimistic
//! transactions: reads hand back a version, commits present the versions they
//! read, and the store refuses the commit if any of them moved. The retry loop
//! lives in [`crate::transaction`], not here.
//!
//! 🦆 The duck is here because every file must have one. This is law.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::app_config::{AggregateStoreConfig, ReportHistoryConfig};
use crate::bucket_key::{BucketKey, DayStamp};
use crate::common::{BucketDocument, DiagnosticCounts, Report};

pub(crate) mod common_config;
pub mod file;
pub mod in_mem;

pub use common_config::CommonStoreConfig;
pub use file::{FileAggregateStore, FileAggregateStoreConfig, FileReportHistory, FileReportHistoryConfig, SubmissionFileSource};
pub use in_mem::{InMemoryAggregateStore, InMemoryReportHistory};

// ===== Store errors =====

/// 💥 The things a store can say "no" with.
///
/// `Conflict` and `MissingDocument` are the retryable ones: the transaction
/// runner downcasts for them and re-runs the body against fresh reads.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// 🔄 Someone committed to a document we read before we could commit. Optimism punished.
    #[error("write conflict on bucket '{key}': it changed after it was read")]
    Conflict { key: String },
    /// 🕳️ An update targeted a bucket that does not exist.
    #[error("bucket '{key}' does not exist, so it cannot be updated")]
    MissingDocument { key: String },
    /// ⚠️ All reads must precede all writes inside one transaction.
    #[error("read of bucket '{key}' attempted after writes were staged in the same transaction")]
    ReadAfterWrite { key: String },
    /// 📦 The backend's per-commit write limit.
    #[error("{size} writes in one commit, but the store accepts at most {limit}")]
    BatchTooLarge { size: usize, limit: usize },
    /// 💀 The retry budget is spent. Terminal.
    #[error("transaction aborted after {attempts} attempts")]
    TransactionAborted { attempts: u32 },
}

impl StoreError {
    /// 🔁 Would a fresh attempt (fresh reads) plausibly succeed?
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict { .. } | StoreError::MissingDocument { .. })
    }
}

// ===== Store vocabulary =====

/// 📖 A document as read inside a transaction, plus the version it was read at.
/// Version `0` means "does not exist".
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedBucket {
    pub version: u64,
    pub document: Option<BucketDocument>,
}

/// ✍️ One staged write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// create-or-replace the whole document
    Set(BucketDocument),
    /// merge a new diagnostics mapping into an existing document; fails if absent
    Update { diagnostics: DiagnosticCounts },
}

/// 📨 Everything one transaction attempt wants to make true, atomically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Commit {
    /// (key, version observed) for every read in the attempt
    pub reads: Vec<(BucketKey, u64)>,
    pub writes: Vec<(BucketKey, WriteOp)>,
}

// ===== AggregateStore =====

/// 🪣 A transactional keyed-document store for buckets.
///
/// # Contract
/// - `read_versioned` never fails for "absent": absent is version `0`.
/// - `commit` is all-or-nothing. If any read version moved it returns
///   [`StoreError::Conflict`]; an `Update` on an absent document returns
///   [`StoreError::MissingDocument`]; more than `max_writes_per_batch` writes
///   returns [`StoreError::BatchTooLarge`]. Nothing is applied in any of those cases.
/// - `write_batch` is a blind, atomic batch of create-or-replace writes.
/// - `close` makes everything durable. Call it. Skipping it is a bug, and rude.
#[async_trait]
pub trait AggregateStore: std::fmt::Debug + Send + Sync {
    async fn read_versioned(&self, key: &BucketKey) -> Result<VersionedBucket>;
    async fn commit(&self, commit: Commit) -> Result<()>;
    async fn write_batch(&self, documents: Vec<BucketDocument>) -> Result<()>;
    async fn get(&self, key: &BucketKey) -> Result<Option<BucketDocument>>;
    /// 🔍 Every bucket (optionally only one day), in key order.
    async fn scan(&self, day: Option<&DayStamp>) -> Result<Vec<BucketDocument>>;
    async fn close(&self) -> Result<()>;
    fn max_writes_per_batch(&self) -> usize;
}

/// 🎭 The many faces of an aggregate store.
#[derive(Debug)]
pub enum AggregateStoreBackend {
    InMemory(InMemoryAggregateStore),
    File(FileAggregateStore),
}

impl AggregateStoreBackend {
    /// 🔧 Resolve a store from config. The file store loads its snapshot right here.
    pub async fn from_config(config: &AggregateStoreConfig) -> Result<Self> {
        Ok(match config {
            AggregateStoreConfig::InMemory(common) => Self::InMemory(InMemoryAggregateStore::new(common.clone())),
            AggregateStoreConfig::File(file_config) => Self::File(FileAggregateStore::open(file_config.clone()).await?),
        })
    }
}

#[async_trait]
impl AggregateStore for AggregateStoreBackend {
    async fn read_versioned(&self, key: &BucketKey) -> Result<VersionedBucket> {
        match self {
            Self::InMemory(store) => store.read_versioned(key).await,
            Self::File(store) => store.read_versioned(key).await,
        }
    }

    async fn commit(&self, commit: Commit) -> Result<()> {
        match self {
            Self::InMemory(store) => store.commit(commit).await,
            Self::File(store) => store.commit(commit).await,
        }
    }

    async fn write_batch(&self, documents: Vec<BucketDocument>) -> Result<()> {
        match self {
            Self::InMemory(store) => store.write_batch(documents).await,
            Self::File(store) => store.write_batch(documents).await,
        }
    }

    async fn get(&self, key: &BucketKey) -> Result<Option<BucketDocument>> {
        match self {
            Self::InMemory(store) => store.get(key).await,
            Self::File(store) => store.get(key).await,
        }
    }

    async fn scan(&self, day: Option<&DayStamp>) -> Result<Vec<BucketDocument>> {
        match self {
            Self::InMemory(store) => store.scan(day).await,
            Self::File(store) => store.scan(day).await,
        }
    }

    async fn close(&self) -> Result<()> {
        match self {
            Self::InMemory(store) => store.close().await,
            Self::File(store) => store.close().await,
        }
    }

    fn max_writes_per_batch(&self) -> usize {
        match self {
            Self::InMemory(store) => store.max_writes_per_batch(),
            Self::File(store) => store.max_writes_per_batch(),
        }
    }
}

// ===== ReportHistory =====

/// 📜 The append-only log of raw reports, split into named collections.
///
/// # Contract
/// - `latest_before` answers "newest report for this session strictly before
///   `before`". Unknown collections and unknown sessions are `None`, not errors:
///   a freshly appended row that isn't visible yet is indistinguishable from no row.
/// - `load_collection` returns the whole collection in ascending timestamp order
///   and errors if the collection does not exist (a typo in a rebuild request
///   should not silently produce an empty aggregate).
#[async_trait]
pub trait ReportHistory: std::fmt::Debug + Send + Sync {
    async fn latest_before(&self, collection: &str, session_id: &str, before: DateTime<Utc>) -> Result<Option<Report>>;
    async fn append(&self, collection: &str, report: Report) -> Result<()>;
    async fn load_collection(&self, collection: &str) -> Result<Vec<Report>>;
}

/// 🎭 The many faces of a report history.
#[derive(Debug)]
pub enum ReportHistoryBackend {
    InMemory(InMemoryReportHistory),
    File(FileReportHistory),
}

impl ReportHistoryBackend {
    pub async fn from_config(config: &ReportHistoryConfig) -> Result<Self> {
        Ok(match config {
            ReportHistoryConfig::InMemory => Self::InMemory(InMemoryReportHistory::new()),
            ReportHistoryConfig::File(file_config) => Self::File(FileReportHistory::open(file_config.clone()).await?),
        })
    }
}

#[async_trait]
impl ReportHistory for ReportHistoryBackend {
    async fn latest_before(&self, collection: &str, session_id: &str, before: DateTime<Utc>) -> Result<Option<Report>> {
        match self {
            Self::InMemory(history) => history.latest_before(collection, session_id, before).await,
            Self::File(history) => history.latest_before(collection, session_id, before).await,
        }
    }

    async fn append(&self, collection: &str, report: Report) -> Result<()> {
        match self {
            Self::InMemory(history) => history.append(collection, report).await,
            Self::File(history) => history.append(collection, report).await,
        }
    }

    async fn load_collection(&self, collection: &str) -> Result<Vec<Report>> {
        match self {
            Self::InMemory(history) => history.load_collection(collection).await,
            Self::File(history) => history.load_collection(collection).await,
        }
    }
}

/// 🧰 Both backends, resolved from config and ready to share across tasks.
#[derive(Debug, Clone)]
pub struct Backends {
    pub store: Arc<dyn AggregateStore>,
    pub history: Arc<dyn ReportHistory>,
}

impl Backends {
    pub async fn from_config(store: &AggregateStoreConfig, history: &ReportHistoryConfig) -> Result<Self> {
        let store = AggregateStoreBackend::from_config(store).await?;
        let history = ReportHistoryBackend::from_config(history).await?;
        Ok(Self { store: Arc::new(store), history: Arc::new(history) })
    }
}
