//! 🏗️ The rebuild: recompute every bucket from the raw history.
//!
//! 🎬 *[the buckets have drifted. an incremental update was lost somewhere in March.]*
//! *[nobody knows which one. nobody needs to.]*
//! *[we replay everything.]*
//!
//! The algorithm:
//! 1. Load every report from the given collections, collection by collection,
//!    each in timestamp order. Collections are concatenated, NOT merge-sorted:
//!    if one session's reports are split across collections with interleaved
//!    timestamps, the replay sees them out of order. We warn about it; we can't fix it.
//! 2. Walk the reports keeping `session → last state` and `bucket → counts` in memory,
//!    applying the exact same transition rules as the incremental path.
//! 3. Hand the final bucket map to the [`BatchWriter`].
//!
//! Idempotent end to end: same history in, byte-identical buckets out. So
//! "resuming" a failed rebuild means running it again.
//!
//! ⚠️ Buckets that exist in the store but not in the replayed map are left
//! alone. A rebuild overwrites, it does not purge.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, trace, warn};

use crate::aggregator::{DecrementDay, apply_in_memory, plan_change};
use crate::backends::{AggregateStore, ReportHistory};
use crate::batch_writer::BatchWriter;
use crate::bucket_key::{BucketKey, DayClock};
use crate::common::{BucketDocument, Report};
use crate::progress::RebuildProgress;
use crate::session_state::ReplayTracker;

// 📊 redraw the progress bar every this many reports
const PROGRESS_EVERY: usize = 1_000;

/// 🎞️ The in-memory half of a rebuild: feed it reports oldest-first, get buckets out.
#[derive(Debug)]
pub struct Replay {
    clock: DayClock,
    keying: DecrementDay,
    tracker: ReplayTracker,
    buckets: BTreeMap<BucketKey, BucketDocument>,
    reports_processed: usize,
    out_of_order: usize,
}

impl Replay {
    pub fn new(clock: DayClock, keying: DecrementDay) -> Self {
        Self {
            clock,
            keying,
            tracker: ReplayTracker::new(),
            buckets: BTreeMap::new(),
            reports_processed: 0,
            out_of_order: 0,
        }
    }

    /// ➡️ One report, treated as a live status update at its own timestamp.
    pub fn feed(&mut self, report: &Report) {
        let new = report.state();
        if self.tracker.last_report_at(&report.session_id).is_some_and(|last| last > new.observed_at) {
            self.out_of_order += 1;
        }
        let old = self.tracker.observe(report);
        let plan = plan_change(&self.clock, self.keying, old.as_ref(), &new);
        trace!("🎞️ {} @ {}: {:?}", report.session_id, report.timestamp, plan.kind);
        apply_in_memory(&mut self.buckets, &plan.deltas);
        self.reports_processed += 1;
    }

    pub fn reports_processed(&self) -> usize {
        self.reports_processed
    }

    pub fn sessions(&self) -> usize {
        self.tracker.sessions()
    }

    pub fn buckets(&self) -> &BTreeMap<BucketKey, BucketDocument> {
        &self.buckets
    }

    /// ⚠️ How many reports arrived older than their session's previous one.
    pub fn out_of_order(&self) -> usize {
        self.out_of_order
    }

    pub fn into_buckets(self) -> BTreeMap<BucketKey, BucketDocument> {
        self.buckets
    }
}

/// 🧮 Replay `reports` in the order given and return the resulting bucket map.
pub fn replay<'r>(clock: DayClock, keying: DecrementDay, reports: impl IntoIterator<Item = &'r Report>) -> BTreeMap<BucketKey, BucketDocument> {
    let mut replay = Replay::new(clock, keying);
    for report in reports {
        replay.feed(report);
    }
    replay.into_buckets()
}

/// ✅ `{reportsProcessed, batchesCommitted}` and a little extra.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RebuildSummary {
    pub reports_processed: usize,
    pub sessions: usize,
    pub buckets: usize,
    pub batches_committed: usize,
}

/// 💥 The rebuild stopped. Here's exactly how far it got.
#[derive(Debug, Error)]
#[error("rebuild failed after processing {reports_processed} reports and committing {batches_committed} batches")]
pub struct RebuildError {
    pub reports_processed: usize,
    pub batches_committed: usize,
    #[source]
    pub source: anyhow::Error,
}

/// 🏗️ Replays history into the store.
#[derive(Debug, Clone)]
pub struct RebuildJob {
    store: Arc<dyn AggregateStore>,
    history: Arc<dyn ReportHistory>,
    clock: DayClock,
    keying: DecrementDay,
    writer: BatchWriter,
    show_progress: bool,
}

impl RebuildJob {
    pub fn new(
        store: Arc<dyn AggregateStore>,
        history: Arc<dyn ReportHistory>,
        clock: DayClock,
        keying: DecrementDay,
        chunk_size: usize,
    ) -> Self {
        Self { store, history, clock, keying, writer: BatchWriter::new(chunk_size), show_progress: false }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// 🚀 Replay `collections` (in the order given) and flush the result.
    pub async fn run(&self, collections: &[String]) -> Result<RebuildSummary, RebuildError> {
        info!("🏗️ rebuild starting from {collections:?}");

        let mut reports = Vec::new();
        for collection in collections {
            match self.history.load_collection(collection).await {
                Ok(rows) => {
                    info!("📜 loaded {} reports from '{collection}'", rows.len());
                    reports.extend(rows);
                }
                Err(source) => return Err(RebuildError { reports_processed: 0, batches_committed: 0, source }),
            }
        }

        let mut progress = RebuildProgress::new(collections.join(", "), reports.len() as u64, self.show_progress);
        let mut replay = Replay::new(self.clock, self.keying);
        for (n, report) in reports.iter().enumerate() {
            replay.feed(report);
            if (n + 1) % PROGRESS_EVERY == 0 {
                progress.replayed(replay.reports_processed() as u64, replay.buckets().len() as u64);
            }
        }
        progress.replayed(replay.reports_processed() as u64, replay.buckets().len() as u64);
        if replay.out_of_order() > 0 {
            warn!(
                "⚠️ {} reports were older than their session's previous report. Are one session's reports split across collections?",
                replay.out_of_order()
            );
        }

        let reports_processed = replay.reports_processed();
        let sessions = replay.sessions();
        let documents: Vec<BucketDocument> = replay.into_buckets().into_values().collect();
        let buckets = documents.len();

        let written = self.writer.write(self.store.as_ref(), documents).await;
        let batches_committed = match &written {
            Ok(summary) => summary.batches_committed,
            Err(err) => err.batches_committed,
        };
        progress.flushed(batches_committed as u64);
        progress.finish();

        match written {
            Ok(_) => {
                info!("✅ rebuild done: {reports_processed} reports, {sessions} sessions, {buckets} buckets, {batches_committed} batches");
                Ok(RebuildSummary { reports_processed, sessions, buckets, batches_committed })
            }
            Err(err) => Err(RebuildError { reports_processed, batches_committed, source: err.into() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, HashMap};

    use chrono::Duration;

    use super::*;
    use crate::aggregator::ChangeAggregator;
    use crate::app_config::TransactionConfig;
    use crate::backends::{InMemoryAggregateStore, InMemoryReportHistory};
    use crate::bucket_key::DayStamp;
    use crate::common::{Diagnostic, DiagnosticCounts};
    use crate::session_state::{HistoryTracker, SessionStateTracker};
    use crate::testing::{FlakyStore, at, key, report};

    /// 🎲 A deterministic, messy-enough history: 6 sessions, 3 locators, 5 diagnostics,
    /// one report every 5 hours for 40 reports (a bit over 8 days).
    fn history() -> Vec<Report> {
        let start = at("2020-04-01T00:00:00Z");
        (0..40i64)
            .map(|i| {
                let mut row = report(&format!("s{}", (i * 7) % 6), ["1000", "2000", "3000"][((i * 5) % 3) as usize], 0, "2020-04-01T00:00:00Z");
                row.diagnostic = Diagnostic(((i * 3) % 5) as u8);
                row.timestamp = start + Duration::hours(5 * i);
                row
            })
            .collect()
    }

    async fn seeded_history(reports: &[Report]) -> Result<Arc<InMemoryReportHistory>> {
        let history = InMemoryReportHistory::new();
        for row in reports {
            history.append("reports", row.clone()).await?;
        }
        Ok(Arc::new(history))
    }

    fn job(store: Arc<dyn AggregateStore>, history: Arc<dyn ReportHistory>, chunk_size: usize) -> RebuildJob {
        RebuildJob::new(store, history, DayClock::utc(), DecrementDay::Report, chunk_size)
    }

    #[tokio::test]
    async fn the_one_where_replay_reproduces_the_move_across_town() -> Result<()> {
        let reports = [report("s1", "1000", 2, "2020-04-02T08:00:00Z"), report("s1", "2000", 1, "2020-04-02T17:00:00Z")];
        let buckets = replay(DayClock::utc(), DecrementDay::Report, &reports);

        let expected_1000: DiagnosticCounts = [(Diagnostic(2), 0)].into_iter().collect();
        let expected_2000: DiagnosticCounts = [(Diagnostic(1), 1)].into_iter().collect();
        assert_eq!(buckets[&key("1000", "2020-0402")].diagnostics, expected_1000);
        assert_eq!(buckets[&key("2000", "2020-0402")].diagnostics, expected_2000);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_rebuilding_twice_is_byte_identical() -> Result<()> {
        let history = seeded_history(&history()).await?;
        let store = Arc::new(InMemoryAggregateStore::default());

        job(store.clone(), history.clone(), 4).run(&["reports".to_string()]).await?;
        let first = serde_json::to_string(&store.scan(None).await?)?;
        job(store.clone(), history.clone(), 4).run(&["reports".to_string()]).await?;
        let second = serde_json::to_string(&store.scan(None).await?)?;

        let fresh = Arc::new(InMemoryAggregateStore::default());
        job(fresh.clone(), history, 500).run(&["reports".to_string()]).await?;
        let third = serde_json::to_string(&fresh.scan(None).await?)?;

        assert_eq!(first, second);
        assert_eq!(first, third, "chunk size changes the batches, never the buckets");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_every_session_is_counted_exactly_once() -> Result<()> {
        // 🧮 with decrements keyed to the report's own day, every later report nets
        // zero on its day, so a day's total is the number of sessions first seen that day
        let reports = history();
        let buckets = replay(DayClock::utc(), DecrementDay::Report, &reports);

        let mut first_seen: HashMap<&str, DayStamp> = HashMap::new();
        for row in &reports {
            first_seen.entry(row.session_id.as_str()).or_insert_with(|| DayClock::utc().daystamp(row.timestamp));
        }
        let days: BTreeSet<DayStamp> = buckets.keys().map(|k| k.daystamp.clone()).collect();
        for day in days {
            let total: i64 = buckets.values().filter(|b| b.daystamp == day).map(|b| b.diagnostics.total()).sum();
            let sessions = first_seen.values().filter(|d| **d == day).count() as i64;
            assert_eq!(total, sessions, "day {day}");
        }
        let grand_total: i64 = buckets.values().map(|b| b.diagnostics.total()).sum();
        assert_eq!(grand_total, 6, "six sessions, six current states");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_incremental_and_rebuild_agree() -> Result<()> {
        for keying in [DecrementDay::Report, DecrementDay::Prior] {
            let reports = history();

            // 🐢 the incremental way: one report at a time, prior state from the history
            let live_history = Arc::new(InMemoryReportHistory::new());
            let tracker = HistoryTracker::new(live_history.clone(), "reports");
            let incremental: Arc<dyn AggregateStore> = Arc::new(InMemoryAggregateStore::default());
            let aggregator = ChangeAggregator::new(incremental.clone(), DayClock::utc(), keying, TransactionConfig::default());
            for row in &reports {
                let prior = tracker.prior_state(&row.session_id, row.timestamp).await?;
                aggregator.apply(prior.as_ref(), &row.state()).await?;
                live_history.append("reports", row.clone()).await?;
            }

            // 🏗️ the rebuild way
            let rebuilt = Arc::new(InMemoryAggregateStore::default());
            RebuildJob::new(rebuilt.clone(), seeded_history(&reports).await?, DayClock::utc(), keying, 3)
                .run(&["reports".to_string()])
                .await?;

            assert_eq!(incremental.scan(None).await?, rebuilt.scan(None).await?, "{keying:?}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_failed_batch_reports_how_far_we_got() -> Result<()> {
        let reports = history();
        let expected_buckets = replay(DayClock::utc(), DecrementDay::Report, &reports).len();
        assert!(expected_buckets > 4, "the fixture needs at least three batches of two");

        let store = FlakyStore::new(InMemoryAggregateStore::default()).failing_batch(2);
        let err = job(Arc::new(store.clone()), seeded_history(&reports).await?, 2)
            .run(&["reports".to_string()])
            .await
            .expect_err("batch 2 is rigged");

        assert_eq!(err.reports_processed, 40);
        assert_eq!(err.batches_committed, 1);
        assert_eq!(store.batch_sizes(), vec![2], "nothing after the failed batch");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_missing_collection_stops_before_replaying() -> Result<()> {
        let store = Arc::new(InMemoryAggregateStore::default());
        let err = job(store.clone(), seeded_history(&history()).await?, 500)
            .run(&["reports".to_string(), "nope".to_string()])
            .await
            .expect_err("'nope' does not exist");

        assert_eq!((err.reports_processed, err.batches_committed), (0, 0));
        assert!(store.scan(None).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_collections_are_concatenated_not_merged() -> Result<()> {
        // ⚠️ s1's newer report sits in the first collection: the replay sees it first
        let history = InMemoryReportHistory::new();
        history.append("later", report("s1", "2000", 1, "2020-04-02T17:00:00Z")).await?;
        history.append("earlier", report("s1", "1000", 2, "2020-04-02T08:00:00Z")).await?;
        let store = Arc::new(InMemoryAggregateStore::default());

        let summary = job(store.clone(), Arc::new(history), 500).run(&["later".to_string(), "earlier".to_string()]).await?;

        assert_eq!(summary.reports_processed, 2);
        let last_word = store.get(&key("1000", "2020-0402")).await?.expect("replayed last");
        assert_eq!(last_word.diagnostics.get(Diagnostic(2)), 1, "the older report wins because it came last");
        Ok(())
    }
}
