//! 📂 Previously, on "Things That Could Go Wrong With A File"...
//!
//! The disk was quiet. Too quiet. A lone process had been tasked with keeping
//! some buckets and a few million reports. Just files, they said. Simple, they said.
//!
//! The file didn't exist. The process died before closing. Someone gzipped last
//! year's collection "to save space" and then asked why appends to it fail.
//!
//! This module is the disk-backed flavor of every backend:
//! - [`FileAggregateStore`]: the in-memory store, seeded from an NDJSON snapshot
//!   on open and rewritten on `close` (temp file, then rename, so a crash mid-write
//!   leaves the old snapshot standing).
//! - [`FileReportHistory`]: one NDJSON file per collection in a directory.
//!   `<name>.ndjson` is read-write, `<name>.ndjson.gz` is read-only.
//! - [`SubmissionFileSource`]: raw submissions for the ingest pipeline, in batches.
//!
//! 💀 Disk full → your problem now
//! 🦆 (mandatory, no notes)

use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;

mod file_history;
mod file_store;
mod submission_source;

pub use file_history::{FileReportHistory, FileReportHistoryConfig};
pub use file_store::{FileAggregateStore, FileAggregateStoreConfig};
pub use submission_source::SubmissionFileSource;

/// 🔪 Split NDJSON bytes on `\n` and parse every non-blank line.
///
/// memchr does the newline hunting. A bad line fails the whole parse with its
/// 1-based line number, because a snapshot with a hole in it is not a snapshot.
pub(crate) fn parse_ndjson<T: DeserializeOwned>(bytes: &[u8], origin: &Path) -> Result<Vec<T>> {
    let mut rows = Vec::with_capacity(memchr::memchr_iter(b'\n', bytes).count() + 1);
    let mut start = 0usize;
    let ends = memchr::memchr_iter(b'\n', bytes).chain(std::iter::once(bytes.len()));
    for (index, end) in ends.enumerate() {
        let line = bytes[start..end].trim_ascii();
        start = (end + 1).min(bytes.len());
        if line.is_empty() {
            continue;
        }
        let row = serde_json::from_slice(line)
            .with_context(|| format!("💀 {} line {} is not the JSON we were promised", origin.display(), index + 1))?;
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Report;

    #[test]
    fn the_one_where_blank_lines_and_crlf_are_shrugged_off() -> Result<()> {
        let bytes = b"{\"locator\":\"1000\",\"sessionId\":\"s1\",\"diagnostic\":2,\"timestamp\":\"2020-04-02T08:00:00Z\"}\r\n\n\
{\"locator\":\"2000\",\"sessionId\":\"s2\",\"diagnostic\":1,\"timestamp\":\"2020-04-02T09:00:00Z\"}";
        let rows: Vec<Report> = parse_ndjson(bytes, Path::new("reports.ndjson"))?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].session_id, "s2");
        Ok(())
    }

    #[test]
    fn the_one_where_a_broken_line_is_named_and_shamed() {
        let bytes = b"{\"locator\":\"1000\",\"sessionId\":\"s1\",\"diagnostic\":2,\"timestamp\":\"2020-04-02T08:00:00Z\"}\n{oops\n";
        let err = parse_ndjson::<Report>(bytes, Path::new("reports.ndjson")).expect_err("line 2 is garbage");
        assert!(err.to_string().contains("line 2"), "got: {err}");
    }
}
