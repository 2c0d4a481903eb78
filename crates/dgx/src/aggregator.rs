//! 🧮 The change aggregator: turning "session moved" into bucket deltas.
//!
//! 🎬 *[a session was at locator 1000 with diagnostic 2]*
//! *[it now reports locator 2000 with diagnostic 1]*
//! *[somewhere, two buckets brace themselves]*
//!
//! The rules, in full:
//! 1. No prior state: one increment on the new bucket. That's it.
//! 2. Prior state, same bucket: decrement old diagnostic, increment new one,
//!    one read-modify-write.
//! 3. Prior state, different bucket: decrement on the old bucket, increment on
//!    the new one, both inside ONE transaction. Both land or neither does.
//! 4. Nothing actually changed: nothing happens.
//!
//! [`plan_change`] is the pure half and is shared with the rebuild replay, so the
//! incremental path and the rebuild can never disagree about what a transition means.
//! [`ChangeAggregator`] is the transactional half.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::app_config::TransactionConfig;
use crate::backends::AggregateStore;
use crate::bucket_key::{BucketKey, DayClock};
use crate::common::{BucketDocument, Diagnostic, DiagnosticCounts, SessionState};
use crate::transaction::{Transaction, TransactionBody, run_transaction};

/// 📅 Which calendar day a vacated state is decremented on.
///
/// `Report` re-keys the decrement to the day of the report causing the
/// transition: status snapshots read "as of today", even retroactively. That's
/// how the rebuild has always behaved, so it is the default for both modes.
/// `Prior` decrements on the day the session entered its old state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecrementDay {
    #[default]
    Report,
    Prior,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    Increment,
    Decrement,
}

impl Sign {
    pub fn value(self) -> i64 {
        match self {
            Sign::Increment => 1,
            Sign::Decrement => -1,
        }
    }
}

/// ➕➖ One signed unit of work against one diagnostic in one bucket. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    pub key: BucketKey,
    pub diagnostic: Diagnostic,
    pub sign: Sign,
}

/// 🏷️ Which of the four rules a transition fell under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    FirstReport,
    SameBucket,
    CrossBucket,
    NoChange,
}

/// 📋 The deltas for one transition, and what kind of transition it was.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangePlan {
    pub kind: ChangeKind,
    pub deltas: Vec<Delta>,
}

impl ChangePlan {
    /// 🧺 Net adjustment per bucket, in key order. One or two entries, or none for a no-op.
    pub fn by_bucket(&self) -> BTreeMap<BucketKey, DiagnosticCounts> {
        let mut grouped: BTreeMap<BucketKey, DiagnosticCounts> = BTreeMap::new();
        for delta in &self.deltas {
            grouped.entry(delta.key.clone()).or_default().adjust(delta.diagnostic, delta.sign.value());
        }
        grouped
    }
}

/// 🧠 Work out the deltas for `old → new`. Pure: no store, no clock reads, no surprises.
///
/// The increment always lands on `(new.locator, day(new))`. The decrement lands
/// on `old.locator` and the day picked by `keying`. Same locator and same
/// diagnostic is a no-op whatever the keying, and so is a plan whose two halves
/// would cancel in one bucket.
pub fn plan_change(clock: &DayClock, keying: DecrementDay, old: Option<&SessionState>, new: &SessionState) -> ChangePlan {
    let increment = Delta {
        key: clock.key(&new.locator, new.observed_at),
        diagnostic: new.diagnostic,
        sign: Sign::Increment,
    };
    let Some(old) = old else {
        return ChangePlan { kind: ChangeKind::FirstReport, deltas: vec![increment] };
    };
    if old.is_same_status(new) {
        return ChangePlan { kind: ChangeKind::NoChange, deltas: Vec::new() };
    }

    let vacated_at = match keying {
        DecrementDay::Report => new.observed_at,
        DecrementDay::Prior => old.observed_at,
    };
    let decrement = Delta {
        key: clock.key(&old.locator, vacated_at),
        diagnostic: old.diagnostic,
        sign: Sign::Decrement,
    };

    let kind = if decrement.key != increment.key {
        ChangeKind::CrossBucket
    } else if decrement.diagnostic == increment.diagnostic {
        return ChangePlan { kind: ChangeKind::NoChange, deltas: Vec::new() };
    } else {
        ChangeKind::SameBucket
    };
    ChangePlan { kind, deltas: vec![decrement, increment] }
}

/// 🧮 Fold deltas into an in-memory bucket map, creating buckets on first touch.
/// The rebuild's accumulator. Same arithmetic as the transactional path, no I/O.
pub fn apply_in_memory(buckets: &mut BTreeMap<BucketKey, BucketDocument>, deltas: &[Delta]) {
    for delta in deltas {
        buckets
            .entry(delta.key.clone())
            .or_insert_with(|| BucketDocument::empty(&delta.key))
            .diagnostics
            .adjust(delta.diagnostic, delta.sign.value());
    }
}

/// 🔁 The body run (possibly several times) inside the transaction.
struct ApplyAdjustments {
    adjustments: BTreeMap<BucketKey, DiagnosticCounts>,
}

#[async_trait]
impl TransactionBody for ApplyAdjustments {
    type Output = ();

    async fn run(&self, tx: &mut Transaction<'_>) -> Result<()> {
        // 📖 every read first, the store insists
        let mut current = Vec::with_capacity(self.adjustments.len());
        for key in self.adjustments.keys() {
            current.push(tx.get(key).await?);
        }

        for ((key, adjustment), existing) in self.adjustments.iter().zip(current) {
            match existing {
                // 🆕 first writer for this bucket: create. A racing creator bumps the
                // version we read as 0 and our commit conflicts instead of overwriting.
                None => {
                    let mut document = BucketDocument::empty(key);
                    for (diagnostic, delta) in adjustment.iter() {
                        document.diagnostics.adjust(diagnostic, delta);
                    }
                    tx.set(document);
                }
                Some(document) => {
                    let mut diagnostics = document.diagnostics;
                    for (diagnostic, delta) in adjustment.iter() {
                        diagnostics.adjust(diagnostic, delta);
                    }
                    tx.update(key.clone(), diagnostics);
                }
            }
        }
        Ok(())
    }
}

/// 🧮 Applies session transitions to the aggregate store, one transaction each.
#[derive(Debug, Clone)]
pub struct ChangeAggregator {
    store: Arc<dyn AggregateStore>,
    clock: DayClock,
    keying: DecrementDay,
    transaction: TransactionConfig,
}

impl ChangeAggregator {
    pub fn new(store: Arc<dyn AggregateStore>, clock: DayClock, keying: DecrementDay, transaction: TransactionConfig) -> Self {
        Self { store, clock, keying, transaction }
    }

    pub fn plan(&self, old: Option<&SessionState>, new: &SessionState) -> ChangePlan {
        plan_change(&self.clock, self.keying, old, new)
    }

    /// 🚀 Apply `old → new`. One transaction touching one or two buckets, or none at all for a no-op.
    ///
    /// Conflicts are retried by the transaction runner with fresh reads. If the
    /// budget runs out the error comes back and nothing was applied.
    pub async fn apply(&self, old: Option<&SessionState>, new: &SessionState) -> Result<ChangeKind> {
        let plan = self.plan(old, new);
        if plan.deltas.is_empty() {
            debug!("😴 {} → {}: no change, no writes", new.locator, new.diagnostic);
            return Ok(plan.kind);
        }

        let body = ApplyAdjustments { adjustments: plan.by_bucket() };
        run_transaction(self.store.as_ref(), &self.transaction, &body).await?;
        debug!("🧮 applied {:?} across {} bucket(s)", plan.kind, body.adjustments.len());
        Ok(plan.kind)
    }
}
