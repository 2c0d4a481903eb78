//! 🩺 dgx: per-(locator, day) diagnostic counts that stay right as sessions change their minds.
//!
//! Two ways in:
//! - incremental: one submission at a time, one optimistic transaction each
//!   ([`ingest`], [`aggregator`], [`transaction`]);
//! - rebuild: replay the whole history in memory, flush in chunks
//!   ([`rebuild`], [`batch_writer`]).
//!
//! Both share the same transition rules, so they agree on what the buckets should say.
//!
//! ⚠️ A session that moves buckets is decremented and incremented in ONE
//! transaction here, so a half-applied move can't be observed from this crate.
//! Stores that can't span two documents in one transaction would have to split
//! it, and then a transient negative count becomes possible until the second half lands.

pub mod aggregator;
pub mod app_config;
pub mod backends;
pub mod batch_writer;
pub mod bucket_key;
pub mod common;
pub mod export;
pub mod ingest;
mod progress;
pub mod query;
pub mod rebuild;
pub mod session_state;
mod supervisors;
pub mod transaction;

#[cfg(test)]
mod testing;

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::app_config::AppConfig;
use crate::backends::{Backends, SubmissionFileSource};
use crate::bucket_key::DayStamp;
use crate::common::{BucketDocument, Report};
use crate::export::ReportExport;
use crate::ingest::{IngestTally, Ingestor};
use crate::query::BucketQuery;
use crate::rebuild::{RebuildJob, RebuildSummary};
use crate::supervisors::Supervisor;

/// 🎯 What to do this time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// 📥 feed a file of submissions through the incremental path
    Ingest { submissions: PathBuf },
    /// 🏗️ replay these collections (empty means the trusted collection)
    Rebuild { collections: Vec<String> },
    /// 🔍 read buckets, one day or all of them
    Query { day: Option<String> },
    /// 📤 raw reports from one collection (default: the trusted one) with `start <= timestamp < end`
    Export { collection: Option<String>, start: DateTime<Utc>, end: DateTime<Utc> },
}

/// 📦 What came out.
#[derive(Debug)]
pub enum Outcome {
    Ingested(IngestTally),
    Rebuilt(RebuildSummary),
    Buckets(Vec<BucketDocument>),
    Exported(Vec<Report>),
}

/// 🚀 Stand up the backends, run `operation`, and close the store whatever happens.
pub async fn run(app_config: AppConfig, operation: Operation) -> Result<Outcome> {
    app_config.validate()?;
    let backends = Backends::from_config(&app_config.aggregate_store, &app_config.report_history)
        .await
        .context("💀 could not stand up the backends")?;

    let result = dispatch(&app_config, &backends, operation).await;
    let closed = backends.store.close().await.context("💀 closing the aggregate store failed");

    match (result, closed) {
        (Ok(outcome), Ok(())) => Ok(outcome),
        (Ok(_), Err(close_err)) => Err(close_err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(close_err)) => {
            // 🧅 the first failure is the story; the close failure is a footnote
            warn!("⚠️ the store also failed to close: {close_err:#}");
            Err(err)
        }
    }
}

async fn dispatch(app_config: &AppConfig, backends: &Backends, operation: Operation) -> Result<Outcome> {
    match operation {
        Operation::Ingest { submissions } => {
            info!("📥 ingesting '{}'", submissions.display());
            let ingestor = Ingestor::new(
                backends.store.clone(),
                backends.history.clone(),
                &app_config.aggregation,
                app_config.transaction,
            )?;
            let source = SubmissionFileSource::open(&submissions, app_config.runtime.queue_capacity).await?;
            let tally = Supervisor::new(app_config.runtime).ingest(source, ingestor).await?;
            Ok(Outcome::Ingested(tally))
        }
        Operation::Rebuild { collections } => {
            let collections = if collections.is_empty() {
                vec![app_config.aggregation.trusted_collection.clone()]
            } else {
                collections
            };
            let job = RebuildJob::new(
                backends.store.clone(),
                backends.history.clone(),
                app_config.aggregation.clock()?,
                app_config.aggregation.decrement_day,
                app_config.rebuild.chunk_size,
            )
            .with_progress(app_config.runtime.show_progress);
            Ok(Outcome::Rebuilt(job.run(&collections).await?))
        }
        Operation::Query { day } => {
            let query = BucketQuery::new(backends.store.clone());
            let buckets = match day {
                Some(raw) => query.by_day(&DayStamp::parse(&raw)?).await?,
                None => query.snapshot().await?,
            };
            Ok(Outcome::Buckets(buckets))
        }
        Operation::Export { collection, start, end } => {
            let collection = collection.unwrap_or_else(|| app_config.aggregation.trusted_collection.clone());
            let rows = ReportExport::new(backends.history.clone()).window(&collection, start, end).await?;
            Ok(Outcome::Exported(rows))
        }
    }
}
