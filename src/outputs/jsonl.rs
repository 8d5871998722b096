//! JSON Lines checkpoint sink: one serialized [`Record`] per line.

use super::{Ack, CheckpointSink};
use crate::error::WriteError;
use crate::models::Record;
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

/// Writes each record as one `serde_json` line.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonLinesSink;

impl CheckpointSink for JsonLinesSink {
    #[instrument(level = "info", skip_all, fields(path = %destination.display(), count = records.len()))]
    async fn append(
        &mut self,
        records: &[Record],
        destination: &Path,
    ) -> Result<Ack, WriteError> {
        if records.is_empty() {
            debug!("Empty batch; nothing to append");
            return Ok(Ack { written: 0 });
        }

        let mut buf = String::new();
        for record in records {
            buf.push_str(&serde_json::to_string(record)?);
            buf.push('\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(destination)
            .await?;
        file.write_all(buf.as_bytes()).await?;
        file.flush().await?;

        info!(written = records.len(), "Checkpoint appended");
        Ok(Ack {
            written: records.len(),
        })
    }

    #[instrument(level = "info", skip_all, fields(path = %destination.display()))]
    async fn existing_identifiers(&self, destination: &Path) -> Result<Vec<String>, WriteError> {
        let text = match fs::read_to_string(destination).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        for (n, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: Record = serde_json::from_str(line)
                .map_err(|e| WriteError::Corrupt(format!("line {}: {e}", n + 1)))?;
            ids.push(record.identifier);
        }
        info!(count = ids.len(), "Read persisted identifiers");
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outputs::testing::record;

    #[tokio::test]
    async fn test_appends_are_cumulative() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("news_messages.jsonl");
        let mut sink = JsonLinesSink;

        sink.append(&[record(1, "MSG-00005")], &path).await.unwrap();
        sink.append(&[record(2, "MSG-00004"), record(3, "MSG-00003")], &path)
            .await
            .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 3);
        let first: Record = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        assert_eq!(first, record(1, "MSG-00005"));

        let ids = sink.existing_identifiers(&path).await.unwrap();
        assert_eq!(ids, vec!["MSG-00005", "MSG-00004", "MSG-00003"]);
    }

    #[tokio::test]
    async fn test_garbage_line_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.jsonl");
        std::fs::write(&path, "{\"not\":\"a record\"}\n").unwrap();

        let err = JsonLinesSink.existing_identifiers(&path).await.unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }
}
