//! 🎬 *[a channel fills with submissions. somewhere, an ingest worker waits.]*
//! *[the clock on the wall reads 2:47am.]*
//!
//! 📥 The IngestWorker: patient, tireless, and deeply unbothered by the chaos
//! upstream. It receives a submission. It ingests the submission. It writes
//! down what happened. One bad submission is a line in the tally, not a reason
//! to stop.

use anyhow::Result;
use async_channel::Receiver;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::Worker;
use crate::ingest::{IngestTally, Ingestor, Submission};

#[derive(Debug)]
pub(in crate::supervisors) struct IngestWorker {
    id: usize,
    rx: Receiver<Submission>,
    ingestor: Ingestor,
}

impl IngestWorker {
    pub(in crate::supervisors) fn new(id: usize, rx: Receiver<Submission>, ingestor: Ingestor) -> Self {
        Self { id, rx, ingestor }
    }
}

impl Worker for IngestWorker {
    type Output = IngestTally;

    fn start(self) -> JoinHandle<Result<IngestTally>> {
        tokio::spawn(async move {
            debug!("📥 IngestWorker {} started draining its lane", self.id);
            let mut tally = IngestTally::default();
            // 🔄 recv fails only once the lane is empty AND closed
            while let Ok(submission) = self.rx.recv().await {
                let session_id = submission.session_id.clone();
                let result = self.ingestor.submit(submission).await;
                if let Err(err) = &result {
                    error!("💀 IngestWorker {}: session '{session_id}': {err:#}", self.id);
                }
                tally.record(&result);
            }
            debug!("🏁 IngestWorker {}: lane closed after {} submissions", self.id, tally.total());
            Ok(tally)
        })
    }
}
