//! 📦 Common data structures: the building blocks of dgx.
//!
//! 🎬 COLD OPEN. INT. HEALTH DASHBOARD, 3:47 AM
//!
//! A postal code lights up. Somebody, somewhere, said they feel worse today.
//! A `Report` is born. It will never be mutated. It will never be deleted.
//! It will simply sit in the history, immutable and append-only, like that one
//! embarrassing commit on `main` that everyone agreed not to force-push away.
//!
//! From that report we derive a `SessionState` (where is this session, how is
//! it doing) and from the states we derive `BucketDocument`s: one per
//! (locator, day), counting how many sessions currently hold each diagnostic.
//! Buckets count *current states*, not raw report volume. Say it with me.
//!
//! 🦆

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bucket_key::{BucketKey, DayStamp};

/// 🩺 A diagnostic value as sent by the client.
///
/// The clients send small integers and we do not pretend to know the full
/// catalogue. `BTreeMap` ordering on this type is what keeps bucket documents
/// byte-stable across rebuilds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diagnostic(pub u8);

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 📜 One accepted submission, exactly as stored in the history.
///
/// Created once by the ingest path, read by everyone else, owned by no one.
/// `symptoms` is opaque to the aggregation: we carry it, we never look inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub locator: String,
    pub session_id: String,
    pub diagnostic: Diagnostic,
    #[serde(default)]
    pub symptoms: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    /// 🎯 the external verification score. `score` in older exports.
    #[serde(default, alias = "score")]
    pub trust_score: f64,
}

impl Report {
    /// 🔄 The state this report puts its session into.
    pub fn state(&self) -> SessionState {
        SessionState {
            locator: self.locator.clone(),
            diagnostic: self.diagnostic,
            observed_at: self.timestamp,
        }
    }
}

/// 🧍 Where a session is and how it's doing, as of its latest accepted report.
///
/// Never stored on its own. It is always derived: either from the newest row
/// in the history, or from the replay map while rebuilding. `observed_at` is the
/// timestamp of the report that put the session into this status; repeating the
/// same locator and diagnostic later doesn't move it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub locator: String,
    pub diagnostic: Diagnostic,
    pub observed_at: DateTime<Utc>,
}

impl SessionState {
    /// ✅ Same locator, same diagnostic. The timestamp doesn't count as a change.
    pub fn is_same_status(&self, other: &SessionState) -> bool {
        self.locator == other.locator && self.diagnostic == other.diagnostic
    }
}

/// 🔢 diagnostic → count, with missing keys meaning zero.
///
/// Counts are signed on purpose: a decrement may land before its matching
/// increment in the cross-bucket case and that transient negative must be
/// representable rather than clamped away.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiagnosticCounts(BTreeMap<Diagnostic, i64>);

impl DiagnosticCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// 🔍 Missing key reads as zero. No existence checks sprinkled around the callers.
    pub fn get(&self, diagnostic: Diagnostic) -> i64 {
        self.0.get(&diagnostic).copied().unwrap_or(0)
    }

    /// ➕➖ Add `delta` to one diagnostic, materializing the key at zero first.
    pub fn adjust(&mut self, diagnostic: Diagnostic, delta: i64) {
        *self.0.entry(diagnostic).or_insert(0) += delta;
    }

    /// 📊 Sum over every diagnostic. With no partial failures this is the number of sessions in the bucket.
    pub fn total(&self) -> i64 {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Diagnostic, i64)> + '_ {
        self.0.iter().map(|(diagnostic, count)| (*diagnostic, *count))
    }
}

impl FromIterator<(Diagnostic, i64)> for DiagnosticCounts {
    fn from_iter<T: IntoIterator<Item = (Diagnostic, i64)>>(iter: T) -> Self {
        let mut counts = Self::new();
        for (diagnostic, delta) in iter {
            counts.adjust(diagnostic, delta);
        }
        counts
    }
}

/// 🪣 The aggregate unit: one document per (locator, daystamp).
///
/// Persisted layout is exactly these three fields. Created lazily on the first
/// write for a key, never deleted, only ever mutated through the delta-apply path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketDocument {
    pub locator: String,
    pub daystamp: DayStamp,
    pub diagnostics: DiagnosticCounts,
}

impl BucketDocument {
    /// 🏗️ An empty bucket for `key`, as if it had been read back as "does not exist".
    pub fn empty(key: &BucketKey) -> Self {
        Self {
            locator: key.locator.clone(),
            daystamp: key.daystamp.clone(),
            diagnostics: DiagnosticCounts::new(),
        }
    }

    pub fn key(&self) -> BucketKey {
        BucketKey::new(self.locator.clone(), self.daystamp.clone())
    }
}
