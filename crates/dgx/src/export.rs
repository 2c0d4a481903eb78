//! 📤 Raw report export: every report in one collection with a timestamp in `[start, end)`.
//!
//! For researchers who want the rows, not the buckets. Nothing is aggregated,
//! nothing is reformatted; the caller decides what the output looks like.

use std::sync::Arc;

use anyhow::{Result, ensure};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::info;

use crate::backends::ReportHistory;
use crate::common::Report;

/// 🕳️ The window was valid, the collection exists, and still: nothing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("no reports in '{collection}' between {start} (inclusive) and {end} (exclusive)")]
pub struct EmptyExport {
    pub collection: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ReportExport {
    history: Arc<dyn ReportHistory>,
}

impl ReportExport {
    pub fn new(history: Arc<dyn ReportHistory>) -> Self {
        Self { history }
    }

    /// 📤 Reports with `start <= timestamp < end`, oldest first. An empty result is an [`EmptyExport`] error.
    pub async fn window(&self, collection: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Report>> {
        ensure!(start < end, "💀 an export window must start before it ends (got {start} .. {end})");
        let rows: Vec<Report> = self
            .history
            .load_collection(collection)
            .await?
            .into_iter()
            .filter(|row| row.timestamp >= start && row.timestamp < end)
            .collect();
        if rows.is_empty() {
            return Err(EmptyExport { collection: collection.to_string(), start, end }.into());
        }
        info!("📤 exporting {} reports from '{collection}'", rows.len());
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemoryReportHistory;
    use crate::testing::{at, report};

    async fn export() -> Result<ReportExport> {
        let history = InMemoryReportHistory::new();
        history.append("reports", report("s1", "1000", 2, "2020-04-01T23:59:59Z")).await?;
        history.append("reports", report("s2", "1000", 1, "2020-04-02T00:00:00Z")).await?;
        history.append("reports", report("s3", "2000", 3, "2020-04-02T23:00:00Z")).await?;
        history.append("reports", report("s4", "2000", 3, "2020-04-03T00:00:00Z")).await?;
        Ok(ReportExport::new(Arc::new(history)))
    }

    #[tokio::test]
    async fn the_one_where_the_window_includes_its_start_and_not_its_end() -> Result<()> {
        let rows = export().await?.window("reports", at("2020-04-02T00:00:00Z"), at("2020-04-03T00:00:00Z")).await?;
        let sessions: Vec<&str> = rows.iter().map(|r| r.session_id.as_str()).collect();
        assert_eq!(sessions, vec!["s2", "s3"]);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_empty_window_is_an_error_you_can_name() -> Result<()> {
        let err = export()
            .await?
            .window("reports", at("2020-05-01T00:00:00Z"), at("2020-05-02T00:00:00Z"))
            .await
            .expect_err("nobody reported in May");
        assert!(err.downcast_ref::<EmptyExport>().is_some());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_backwards_windows_and_ghost_collections_are_refused() -> Result<()> {
        let export = export().await?;
        assert!(export.window("reports", at("2020-04-03T00:00:00Z"), at("2020-04-02T00:00:00Z")).await.is_err());
        assert!(export.window("ghost", at("2020-04-01T00:00:00Z"), at("2020-04-03T00:00:00Z")).await.is_err());
        Ok(())
    }
}
