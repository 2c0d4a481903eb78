//! 🔁 Transactions: optimistic, retrying, all-or-nothing.
//!
//! 🎬 *[two requests walk into the same bucket]*
//! *[both read `{2: 4}`. both write `{2: 5}`. one of them is lying.]*
//! *[the store notices. the liar is sent back to the start of the line.]*
//!
//! A [`Transaction`] buffers reads (remembering the version each one saw) and
//! writes. Reads must all happen before the first write, the same rule the
//! document databases we emulate enforce. At the end the whole thing is handed
//! to the store as one [`Commit`]; if any version moved, the store refuses.
//!
//! [`run_transaction`] is the retry loop. It re-runs the *body* from scratch on
//! a retryable failure, which means fresh reads every attempt. Retrying a commit
//! built on stale reads would be the lost update we are here to prevent. 🦆

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::app_config::TransactionConfig;
use crate::backends::{AggregateStore, Commit, StoreError, WriteOp};
use crate::bucket_key::BucketKey;
use crate::common::{BucketDocument, DiagnosticCounts};

// ⏱️ nobody should wait more than a second between two attempts at adding 1 to a number
const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// 📝 One attempt's worth of reads and staged writes.
pub struct Transaction<'s> {
    store: &'s dyn AggregateStore,
    reads: Vec<(BucketKey, u64)>,
    writes: Vec<(BucketKey, WriteOp)>,
}

impl<'s> Transaction<'s> {
    fn new(store: &'s dyn AggregateStore) -> Self {
        Self { store, reads: Vec::new(), writes: Vec::new() }
    }

    /// 📖 Read a bucket (`None` if absent). Fails once any write is staged.
    pub async fn get(&mut self, key: &BucketKey) -> Result<Option<BucketDocument>> {
        if !self.writes.is_empty() {
            return Err(StoreError::ReadAfterWrite { key: key.id() }.into());
        }
        let read = self.store.read_versioned(key).await?;
        if !self.reads.iter().any(|(seen, _)| seen == key) {
            self.reads.push((key.clone(), read.version));
        }
        Ok(read.document)
    }

    /// ✍️ Create-or-replace.
    pub fn set(&mut self, document: BucketDocument) {
        self.writes.push((document.key(), WriteOp::Set(document)));
    }

    /// ✍️ Replace the diagnostics of an existing bucket. The store fails the commit if it's absent.
    pub fn update(&mut self, key: BucketKey, diagnostics: DiagnosticCounts) {
        self.writes.push((key, WriteOp::Update { diagnostics }));
    }

    fn into_commit(self) -> Commit {
        Commit { reads: self.reads, writes: self.writes }
    }
}

/// 🎬 The logic run inside a transaction. Must be safe to run more than once:
/// every attempt gets a fresh [`Transaction`] and should derive everything from its reads.
#[async_trait]
pub trait TransactionBody: Send + Sync {
    type Output: Send;
    async fn run(&self, tx: &mut Transaction<'_>) -> Result<Self::Output>;
}

fn is_retryable(err: &anyhow::Error) -> bool {
    err.downcast_ref::<StoreError>().is_some_and(StoreError::is_retryable)
}

fn backoff(config: &TransactionConfig, attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    Duration::from_millis(config.backoff_base_ms.saturating_mul(factor)).min(MAX_BACKOFF)
}

/// 🔁 `runTransaction(fn)`: run `body`, commit, and on conflict start over with fresh reads.
///
/// Non-retryable errors surface immediately and untouched. When the budget is
/// spent, the last error comes back wrapped in [`StoreError::TransactionAborted`].
/// Nothing from a failed attempt is ever applied.
pub async fn run_transaction<B>(store: &dyn AggregateStore, config: &TransactionConfig, body: &B) -> Result<B::Output>
where
    B: TransactionBody + ?Sized,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let mut tx = Transaction::new(store);
        let result = match body.run(&mut tx).await {
            Ok(output) => store.commit(tx.into_commit()).await.map(|()| output),
            Err(err) => Err(err),
        };

        match result {
            Ok(output) => {
                debug!("✅ transaction committed on attempt {attempt}");
                return Ok(output);
            }
            Err(err) if is_retryable(&err) && attempt < config.max_attempts => {
                let delay = backoff(config, attempt);
                debug!("🔄 transaction attempt {attempt} hit '{err}', retrying in {delay:?}");
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            Err(err) if is_retryable(&err) => {
                return Err(err.context(StoreError::TransactionAborted { attempts: attempt }));
            }
            Err(err) => return Err(err),
        }
    }
}
