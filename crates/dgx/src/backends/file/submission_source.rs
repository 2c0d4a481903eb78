use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, BufReader},
};
use tracing::trace;

use crate::ingest::Submission;

/// 📨 Reads raw submissions, one JSON object per line, a batch at a time.
///
/// A malformed line doesn't end the file: it comes back as an `Err` entry in its
/// batch (with its line number) and the reading carries on. Only I/O failures
/// stop the source.
#[derive(Debug)]
pub struct SubmissionFileSource {
    path: PathBuf,
    reader: BufReader<File>,
    line_number: usize,
    batch_size: usize,
}

impl SubmissionFileSource {
    pub async fn open(path: &Path, batch_size: usize) -> Result<Self> {
        let file = File::open(path).await.with_context(|| {
            format!(
                "💀 The door to '{}' would not budge. It might not exist, or the permissions might disagree with us.",
                path.display()
            )
        })?;
        Ok(Self { path: path.to_path_buf(), reader: BufReader::new(file), line_number: 0, batch_size: batch_size.max(1) })
    }

    /// 📄 Up to `batch_size` parsed lines. `None` at end of file.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<Result<Submission>>>> {
        let mut batch = Vec::with_capacity(self.batch_size);
        let mut line = String::new();

        while batch.len() < self.batch_size {
            line.clear();
            let bytes_read = self
                .reader
                .read_line(&mut line)
                .await
                .with_context(|| format!("💀 reading '{}' failed after line {}", self.path.display(), self.line_number))?;
            if bytes_read == 0 {
                break;
            }
            self.line_number += 1;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let parsed = serde_json::from_str::<Submission>(trimmed)
                .with_context(|| format!("💀 {} line {} is not a submission", self.path.display(), self.line_number));
            batch.push(parsed);
        }

        trace!("📖 read {} submissions from '{}'", batch.len(), self.path.display());
        Ok(if batch.is_empty() { None } else { Some(batch) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn the_one_where_a_bad_line_does_not_sink_the_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("submissions.ndjson");
        let good = r#"{"locator":"1000","sessionId":"s1","diagnostic":2,"verdict":{"success":true,"score":0.9}}"#;
        tokio::fs::write(&path, format!("{good}\nnot json\n\n{good}\n{good}\n")).await?;

        let mut source = SubmissionFileSource::open(&path, 2).await?;
        let first = source.next_batch().await?.expect("two lines");
        assert_eq!(first.len(), 2);
        assert!(first[0].is_ok());
        let err = first[1].as_ref().expect_err("line 2 is not json");
        assert!(err.to_string().contains("line 2"), "got: {err}");

        let second = source.next_batch().await?.expect("blank line skipped, two more");
        assert_eq!(second.len(), 2);
        assert!(source.next_batch().await?.is_none());
        Ok(())
    }
}
