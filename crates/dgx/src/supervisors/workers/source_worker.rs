//! 🚰 The SourceWorker: reads the file, deals the cards.
//!
//! Every submission for one session goes to the same ingest worker, in file
//! order. That's the whole trick: one session's prior-state lookups can never
//! race each other inside this process.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use anyhow::{Context, Result};
use async_channel::Sender;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::Worker;
use crate::backends::SubmissionFileSource;
use crate::ingest::Submission;

#[derive(Debug)]
pub(in crate::supervisors) struct SourceWorker {
    source: SubmissionFileSource,
    lanes: Vec<Sender<Submission>>,
}

impl SourceWorker {
    pub(in crate::supervisors) fn new(source: SubmissionFileSource, lanes: Vec<Sender<Submission>>) -> Self {
        Self { source, lanes }
    }
}

/// 🎯 Which lane a session belongs to. Stable for the life of the process.
pub(in crate::supervisors) fn lane_for(session_id: &str, lanes: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    session_id.hash(&mut hasher);
    (hasher.finish() % lanes.max(1) as u64) as usize
}

impl Worker for SourceWorker {
    /// how many lines could not be parsed
    type Output = usize;

    fn start(mut self) -> JoinHandle<Result<usize>> {
        tokio::spawn(async move {
            debug!("🚰 SourceWorker started dealing submissions across {} lanes", self.lanes.len());
            let mut malformed = 0usize;
            while let Some(batch) = self.source.next_batch().await.context("SourceWorker failed to read the next batch")? {
                for parsed in batch {
                    let submission = match parsed {
                        Ok(submission) => submission,
                        Err(err) => {
                            warn!("⚠️ skipping a line: {err:#}");
                            malformed += 1;
                            continue;
                        }
                    };
                    let lane = lane_for(&submission.session_id, self.lanes.len());
                    self.lanes[lane]
                        .send(submission)
                        .await
                        .with_context(|| format!("SourceWorker found lane {lane} closed. Did an ingest worker die?"))?;
                }
            }
            // 🏁 dropping the senders closes every lane, which is how the ingest workers learn to go home
            debug!("🏁 SourceWorker: end of file. Closing the lanes.");
            Ok(malformed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_a_session_always_takes_the_same_lane() {
        let lane = lane_for("s1", 4);
        assert!(lane < 4);
        assert!((0..10).all(|_| lane_for("s1", 4) == lane));
        assert_eq!(lane_for("anyone", 1), 0);
    }
}
