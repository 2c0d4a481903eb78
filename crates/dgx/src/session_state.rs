//! 🧍 Session state tracking: "where was this session last time?"
//!
//! Two answers to one question:
//! - [`HistoryTracker`] asks the report history (incremental mode). The newest
//!   report strictly before the one being processed wins. Not found is `None`,
//!   never an error: the history may simply not have caught up yet.
//! - [`ReplayTracker`] remembers, in memory, while the rebuild walks the history
//!   oldest-first. Each session gets `None` exactly once: on its first report.
//!
//! Both report `observed_at` as the moment the session ENTERED its current
//! status. Repeating the same locator and diagnostic later doesn't move it, so a
//! decrement keyed to the prior day finds the bucket that was actually counted.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::backends::ReportHistory;
use crate::common::{Report, SessionState};

/// 🔍 `priorState(sessionId)`, evaluated as of `before`.
#[async_trait]
pub trait SessionStateTracker: Send + Sync {
    async fn prior_state(&self, session_id: &str, before: DateTime<Utc>) -> Result<Option<SessionState>>;
}

/// 📜 The query variant: latest report in one collection, strictly earlier than `before`.
#[derive(Debug, Clone)]
pub struct HistoryTracker {
    history: Arc<dyn ReportHistory>,
    collection: String,
}

impl HistoryTracker {
    pub fn new(history: Arc<dyn ReportHistory>, collection: impl Into<String>) -> Self {
        Self { history, collection: collection.into() }
    }
}

#[async_trait]
impl SessionStateTracker for HistoryTracker {
    async fn prior_state(&self, session_id: &str, before: DateTime<Utc>) -> Result<Option<SessionState>> {
        let Some(latest) = self.history.latest_before(&self.collection, session_id, before).await? else {
            return Ok(None);
        };
        let mut state = latest.state();
        // ⏪ walk back through repeats of the same status to find where it started
        while let Some(earlier) = self.history.latest_before(&self.collection, session_id, state.observed_at).await? {
            if !earlier.state().is_same_status(&state) {
                break;
            }
            state.observed_at = earlier.timestamp;
        }
        Ok(Some(state))
    }
}

/// 🎞️ The replay variant: last-seen state per session, built as the history streams past.
#[derive(Debug, Default)]
pub struct ReplayTracker {
    last_seen: HashMap<String, Seen>,
}

#[derive(Debug)]
struct Seen {
    state: SessionState,
    last_report_at: DateTime<Utc>,
}

impl ReplayTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 🔄 Record `report` as its session's newest report and hand back the state it follows.
    ///
    /// A repeat of the current status keeps the original `observed_at`.
    pub fn observe(&mut self, report: &Report) -> Option<SessionState> {
        let new = report.state();
        match self.last_seen.get_mut(&report.session_id) {
            Some(seen) => {
                let prior = seen.state.clone();
                if !prior.is_same_status(&new) {
                    seen.state = new;
                }
                seen.last_report_at = report.timestamp;
                Some(prior)
            }
            None => {
                self.last_seen.insert(report.session_id.clone(), Seen { state: new, last_report_at: report.timestamp });
                None
            }
        }
    }

    /// 🕰️ Timestamp of the newest report seen for `session_id`, repeats included.
    pub fn last_report_at(&self, session_id: &str) -> Option<DateTime<Utc>> {
        self.last_seen.get(session_id).map(|seen| seen.last_report_at)
    }

    pub fn sessions(&self) -> usize {
        self.last_seen.len()
    }
}

#[async_trait]
impl SessionStateTracker for ReplayTracker {
    /// Answers from whatever has been observed so far. `before` is implied by replay order.
    async fn prior_state(&self, session_id: &str, _before: DateTime<Utc>) -> Result<Option<SessionState>> {
        Ok(self.last_seen.get(session_id).map(|seen| seen.state.clone()))
    }
}
