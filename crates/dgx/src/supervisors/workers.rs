//! 🧵 Workers: the ones who actually do the work while the Supervisor takes all
//! the credit in the sprint retro.
//!
//! Two kinds on the ingest floor:
//! - [`SourceWorker`] reads submissions and deals them out, one channel per ingest worker.
//! - [`IngestWorker`] drains its channel through the [`Ingestor`](crate::ingest::Ingestor).
//!
//! ⚠️ "If you're reading this, the code review went poorly." 🦆

use anyhow::Result;
use tokio::task::JoinHandle;

mod ingest_worker;
mod source_worker;

pub(in crate::supervisors) use ingest_worker::IngestWorker;
pub(in crate::supervisors) use source_worker::SourceWorker;

/// 🏗️ A background worker, that does work. duh.
///
/// Each worker owns its inputs, runs on its own task, and hands back whatever
/// it has to report when it's done.
pub(in crate::supervisors) trait Worker {
    type Output: Send + 'static;

    /// 🚀 Start the worker. Returns a JoinHandle because we trust but verify. Mostly verify.
    fn start(self) -> JoinHandle<Result<Self::Output>>;
}
