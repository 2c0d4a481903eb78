use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::backends::ReportHistory;
use crate::common::Report;

/// 📜 Report collections in RAM, each kept sorted by timestamp.
///
/// Appends slot in after every report with an equal-or-earlier timestamp, so
/// ties keep their arrival order. That's what the replay relies on.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReportHistory {
    collections: Arc<Mutex<HashMap<String, Vec<Report>>>>,
}

impl InMemoryReportHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 🌱 Bulk-load a collection (creating it if needed). Used by the file history cache.
    pub(crate) async fn seed(&self, collection: &str, reports: Vec<Report>) {
        let mut collections = self.collections.lock().await;
        let rows = collections.entry(collection.to_string()).or_default();
        rows.extend(reports);
        // 🔄 stable: equal timestamps keep file order
        rows.sort_by_key(|report| report.timestamp);
    }
}

#[async_trait]
impl ReportHistory for InMemoryReportHistory {
    async fn latest_before(&self, collection: &str, session_id: &str, before: DateTime<Utc>) -> Result<Option<Report>> {
        let collections = self.collections.lock().await;
        let Some(rows) = collections.get(collection) else {
            return Ok(None);
        };
        Ok(rows
            .iter()
            .rev()
            .find(|report| report.session_id == session_id && report.timestamp < before)
            .cloned())
    }

    async fn append(&self, collection: &str, report: Report) -> Result<()> {
        let mut collections = self.collections.lock().await;
        let rows = collections.entry(collection.to_string()).or_default();
        let slot = rows.partition_point(|existing| existing.timestamp <= report.timestamp);
        rows.insert(slot, report);
        Ok(())
    }

    async fn load_collection(&self, collection: &str) -> Result<Vec<Report>> {
        let collections = self.collections.lock().await;
        match collections.get(collection) {
            Some(rows) => Ok(rows.clone()),
            None => bail!("💀 No report collection named '{collection}'. We looked. It's not there. Typo, perhaps?"),
        }
    }
}
