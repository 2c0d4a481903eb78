//! 🎬 *[camera pans across a dimly lit server room]*
//! 🎬 "In a world where submissions arrive endlessly..."
//! 🎬 "One supervisor dared to route them all."
//! 🎬 *[record scratch]* 🦆
//!
//! 📦 The Supervisor staffs the ingest floor: one source worker reading the
//! file, `ingest_parallelism` ingest workers, and a bounded lane between the
//! source and each of them. Sessions are pinned to lanes, so different sessions
//! run in parallel while one session's submissions are handled strictly in order.
//!
//! 💀 WORKERS ARE THE SUPERVISOR'S PRIVATE LITTLE MINIONS. Nobody outside gets to see them.

mod workers;

use anyhow::{Context, Result};
use tracing::info;

use crate::app_config::RuntimeConfig;
use crate::backends::SubmissionFileSource;
use crate::ingest::{IngestTally, Ingestor};
use workers::{IngestWorker, SourceWorker, Worker};

/// 📦 Hovers over the workers asking "is it done yet?" until it is.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Supervisor {
    runtime: RuntimeConfig,
}

impl Supervisor {
    pub(crate) fn new(runtime: RuntimeConfig) -> Self {
        Self { runtime }
    }

    /// 🧵 Run every submission in `source` through `ingestor` and add up what happened.
    ///
    /// Per-submission failures land in the tally. A failure to read the source is
    /// returned, but only after the workers have finished what they were already handed.
    pub(crate) async fn ingest(&self, source: SubmissionFileSource, ingestor: Ingestor) -> Result<IngestTally> {
        let lanes = self.runtime.ingest_parallelism.max(1);
        let capacity = self.runtime.queue_capacity.max(1);
        info!("🧵 ingesting with {lanes} workers, {capacity} submissions of headroom each");

        let (senders, receivers): (Vec<_>, Vec<_>) = (0..lanes).map(|_| async_channel::bounded(capacity)).unzip();
        let ingest_handles: Vec<_> = receivers
            .into_iter()
            .enumerate()
            .map(|(id, rx)| IngestWorker::new(id, rx, ingestor.clone()).start())
            .collect();
        let source_result = SourceWorker::new(source, senders).start().await.context("💀 the source worker panicked");

        let mut tally = IngestTally::default();
        for joined in futures::future::join_all(ingest_handles).await {
            tally.merge(joined.context("💀 an ingest worker panicked")??);
        }

        let malformed = source_result??;
        tally.failed += malformed;
        info!(
            "✅ ingest done: {} aggregated, {} unchanged, {} quarantined, {} rejected, {} failed",
            tally.aggregated, tally.unchanged, tally.quarantined, tally.rejected, tally.failed
        );
        Ok(tally)
    }
}
