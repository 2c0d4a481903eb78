//! 📥 Ingest: one submission in, at most one aggregate transaction out.
//!
//! 🎬 *[a phone, somewhere, submits "I feel fine" for the fourth time today]*
//! *[the verdict says it's probably a human. probably.]*
//!
//! The path, in order:
//! 1. Verification failed outright → rejected, nothing stored.
//! 2. Score below the trust threshold → stored in the suspicious collection for
//!    audit, never aggregated.
//! 3. Otherwise: stamp the report strictly after the session's newest trusted
//!    report, look up its prior state, skip it if nothing changed, let the
//!    aggregator apply the transition, then append it to the trusted collection.
//!
//! ⏱️ Client clocks lie. A submission dated at or before the session's newest
//! trusted report is restamped a millisecond after it, so the history's order is
//! the order we aggregated in and a rebuild replays exactly what happened here.
//!
//! The bot scoring itself happens elsewhere; we only read its verdict.
//!
//! ⚠️ Two concurrent submissions for the SAME session can both read the same
//! prior state. The pipeline routes each session to one worker to close that gap
//! in-process; across processes nothing does.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::aggregator::{ChangeAggregator, ChangeKind};
use crate::app_config::{AggregationConfig, TransactionConfig};
use crate::backends::{AggregateStore, ReportHistory};
use crate::common::{Diagnostic, Report};
use crate::session_state::{HistoryTracker, SessionStateTracker};

/// 🤖 What the external verification service said about a submission.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrustVerdict {
    pub success: bool,
    pub score: f64,
}

/// 📨 A validated submission, before it becomes a [`Report`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub locator: String,
    pub session_id: String,
    pub diagnostic: Diagnostic,
    #[serde(default)]
    pub symptoms: serde_json::Value,
    /// 🕰️ when absent, the report is stamped with the time it was received.
    /// Never trusted to go backwards: see the module docs.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    pub verdict: TrustVerdict,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum IngestError {
    #[error("submission from session '{session_id}' failed verification")]
    Rejected { session_id: String },
}

/// 🏷️ What happened to one accepted submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// the session's state changed and the buckets were updated
    Aggregated(ChangeKind),
    /// same locator, same diagnostic: stored, not counted again
    Unchanged,
    /// stored for audit only
    Quarantined,
}

/// 🧮 Running totals for a batch of submissions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestTally {
    pub aggregated: usize,
    pub unchanged: usize,
    pub quarantined: usize,
    pub rejected: usize,
    pub failed: usize,
}

impl IngestTally {
    pub fn record(&mut self, result: &Result<IngestOutcome>) {
        match result {
            Ok(IngestOutcome::Aggregated(_)) => self.aggregated += 1,
            Ok(IngestOutcome::Unchanged) => self.unchanged += 1,
            Ok(IngestOutcome::Quarantined) => self.quarantined += 1,
            Err(err) if err.downcast_ref::<IngestError>().is_some() => self.rejected += 1,
            Err(_) => self.failed += 1,
        }
    }

    pub fn merge(&mut self, other: IngestTally) {
        self.aggregated += other.aggregated;
        self.unchanged += other.unchanged;
        self.quarantined += other.quarantined;
        self.rejected += other.rejected;
        self.failed += other.failed;
    }

    pub fn total(&self) -> usize {
        self.aggregated + self.unchanged + self.quarantined + self.rejected + self.failed
    }
}

/// 📥 The incremental path, end to end.
#[derive(Debug, Clone)]
pub struct Ingestor {
    aggregator: ChangeAggregator,
    tracker: HistoryTracker,
    history: Arc<dyn ReportHistory>,
    trust_threshold: f64,
    trusted_collection: String,
    suspicious_collection: String,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn AggregateStore>,
        history: Arc<dyn ReportHistory>,
        config: &AggregationConfig,
        transaction: TransactionConfig,
    ) -> Result<Self> {
        let clock = config.clock()?;
        Ok(Self {
            aggregator: ChangeAggregator::new(store, clock, config.decrement_day, transaction),
            tracker: HistoryTracker::new(history.clone(), config.trusted_collection.clone()),
            history,
            trust_threshold: config.trust_threshold,
            trusted_collection: config.trusted_collection.clone(),
            suspicious_collection: config.suspicious_collection.clone(),
        })
    }

    /// 🚀 Run one submission through the gate, the aggregator, and into the history.
    pub async fn submit(&self, submission: Submission) -> Result<IngestOutcome> {
        if !submission.verdict.success {
            warn!("🚫 session '{}' failed verification", submission.session_id);
            return Err(IngestError::Rejected { session_id: submission.session_id }.into());
        }

        let mut report = Report {
            locator: submission.locator,
            session_id: submission.session_id,
            diagnostic: submission.diagnostic,
            symptoms: submission.symptoms,
            timestamp: submission.timestamp.unwrap_or_else(Utc::now),
            trust_score: submission.verdict.score,
        };

        if report.trust_score < self.trust_threshold {
            debug!("🕵️ session '{}' scored {} and is quarantined", report.session_id, report.trust_score);
            self.history
                .append(&self.suspicious_collection, report)
                .await
                .context("💀 could not store a quarantined report")?;
            return Ok(IngestOutcome::Quarantined);
        }

        let latest = self
            .history
            .latest_before(&self.trusted_collection, &report.session_id, DateTime::<Utc>::MAX_UTC)
            .await?;
        report.timestamp = stamp_after(report.timestamp, latest.map(|row| row.timestamp));
        let new = report.state();
        let prior = self.tracker.prior_state(&report.session_id, report.timestamp).await?;

        let outcome = if prior.as_ref().is_some_and(|prior| prior.is_same_status(&new)) {
            IngestOutcome::Unchanged
        } else {
            match self.aggregator.apply(prior.as_ref(), &new).await? {
                ChangeKind::NoChange => IngestOutcome::Unchanged,
                kind => IngestOutcome::Aggregated(kind),
            }
        };
        self.history
            .append(&self.trusted_collection, report)
            .await
            .context("💀 the buckets were updated but the report could not be stored")?;
        Ok(outcome)
    }
}

/// ⏱️ `requested`, unless that isn't strictly after `latest`; then one millisecond past `latest`.
fn stamp_after(requested: DateTime<Utc>, latest: Option<DateTime<Utc>>) -> DateTime<Utc> {
    match latest {
        Some(latest) if requested <= latest => {
            let restamped = latest + Duration::milliseconds(1);
            warn!("⏱️ a report dated {requested} arrived after one dated {latest}; restamped to {restamped}");
            restamped
        }
        _ => requested,
    }
}
