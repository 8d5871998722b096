//! CSV checkpoint sink.
//!
//! Columns are `Channel,Number,Sequence,Date,Message,Views`. The file starts
//! with a UTF-8 BOM so spreadsheet tools pick the right encoding for
//! non-Latin message text. Fields are quoted only when they contain a comma,
//! a quote or a line break.

use super::{Ack, CheckpointSink};
use crate::error::WriteError;
use crate::models::Record;
use std::io::{self, ErrorKind, Write};
use std::mem::take;
use std::path::Path;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

pub const HEADER: [&str; 6] = ["Channel", "Number", "Sequence", "Date", "Message", "Views"];
const IDENTIFIER_COLUMN: &str = "Number";
const BOM: &str = "\u{feff}";

/// Writes records as CSV rows.
///
/// The header and BOM go out only when the destination is missing or empty,
/// so resumed runs extend the existing table.
///
/// # Examples
///
/// ```ignore
/// let mut sink = CsvSink;
/// sink.append(&batch, Path::new("out/news_messages.csv")).await?;
/// let ids = sink.existing_identifiers(Path::new("out/news_messages.csv")).await?;
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct CsvSink;

impl CheckpointSink for CsvSink {
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

        // an existing but empty file (crash right after create) still needs a header
        let needs_header = match fs::metadata(destination).await {
            Ok(meta) => meta.len() == 0,
            Err(e) if e.kind() == ErrorKind::NotFound => true,
            Err(e) => return Err(e.into()),
        };

        let mut buf = Vec::new();
        if needs_header {
            buf.extend_from_slice(BOM.as_bytes());
            write_row(&mut buf, HEADER)?;
        }
        for record in records {
            write_row(&mut buf, record_row(record).iter().map(String::as_str))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(destination)
            .await?;
        file.write_all(&buf).await?;
        file.flush().await?;

        info!(written = records.len(), created = needs_header, "Checkpoint appended");
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

        let mut rows = parse_rows(text.trim_start_matches(BOM)).into_iter();
        let Some(header) = rows.next() else {
            return Ok(Vec::new());
        };
        let column = header
            .iter()
            .position(|h| h == IDENTIFIER_COLUMN)
            .ok_or_else(|| WriteError::Corrupt(format!("no `{IDENTIFIER_COLUMN}` column")))?;

        let ids: Vec<String> = rows
            .filter_map(|mut row| (column < row.len()).then(|| take(&mut row[column])))
            .filter(|id| !id.is_empty())
            .collect();
        info!(count = ids.len(), "Read persisted identifiers");
        Ok(ids)
    }
}

fn record_row(record: &Record) -> [String; 6] {
    [
        record.channel.clone(),
        record.identifier.clone(),
        record.sequence_number.to_string(),
        record.timestamp.clone(),
        record.body.clone(),
        record.metric.to_string(),
    ]
}

fn needs_quotes(field: &str) -> bool {
    field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r')
}

/// Write a single CSV row to any writer.
fn write_row<'a, W, I>(mut w: W, row: I) -> io::Result<()>
where
    W: Write,
    I: IntoIterator<Item = &'a str>,
{
    let mut first = true;
    for cell in row {
        if !first {
            w.write_all(b",")?;
        } else {
            first = false;
        }
        if needs_quotes(cell) {
            write!(w, "\"{}\"", cell.replace('"', "\"\""))?;
        } else {
            w.write_all(cell.as_bytes())?;
        }
    }
    w.write_all(b"\n")
}

/// Minimal CSV parser (quotes + CRLF tolerant).
fn parse_rows(text: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut field = String::new();
    let mut row = Vec::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            ',' if !in_quotes => row.push(take(&mut field)),
            '\n' | '\r' if !in_quotes => {
                if ch == '\r' && chars.peek() == Some(&'\n') {
                    chars.next();
                }
                row.push(take(&mut field));
                if !(row.len() == 1 && row[0].is_empty()) {
                    rows.push(take(&mut row));
                } else {
                    row.clear();
                }
            }
            _ => field.push(ch),
        }
    }

    // trailing row without a final newline
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outputs::testing::record;

    #[tokio::test]
    async fn test_two_appends_keep_order_without_duplication() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("news_messages.csv");
        let mut sink = CsvSink;

        let b1 = vec![record(1, "MSG-00010"), record(2, "MSG-00009")];
        let b2 = vec![record(3, "MSG-00008")];
        assert_eq!(sink.append(&b1, &path).await.unwrap().written, 2);
        assert_eq!(sink.append(&b2, &path).await.unwrap().written, 1);

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with(BOM));
        assert_eq!(text.matches("Channel,Number,Sequence").count(), 1);

        let ids = sink.existing_identifiers(&path).await.unwrap();
        assert_eq!(ids, vec!["MSG-00010", "MSG-00009", "MSG-00008"]);
    }

    #[tokio::test]
    async fn test_empty_batch_does_not_create_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nothing.csv");
        let ack = CsvSink.append(&[], &path).await.unwrap();
        assert_eq!(ack.written, 0);
        assert!(!path.exists());
        assert!(CsvSink.existing_identifiers(&path).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_existing_file_gets_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("truncated.csv");
        std::fs::write(&path, "").unwrap();

        CsvSink.append(&[record(1, "MSG-00001")], &path).await.unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("\u{feff}Channel,Number"));
    }

    #[tokio::test]
    async fn test_foreign_file_is_reported_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.csv");
        std::fs::write(&path, "a,b\n1,2\n").unwrap();

        let err = CsvSink.existing_identifiers(&path).await.unwrap_err();
        assert!(matches!(err, WriteError::Corrupt(_)));
    }

    #[test]
    fn test_quoting_round_trips_through_parser() {
        let mut buf = Vec::new();
        let r = record(7, "MSG-00007");
        write_row(&mut buf, record_row(&r).iter().map(String::as_str)).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("\"body, \"\"quoted\"\"\nline 7\""));

        let rows = parse_rows(&text);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][4], r.body);
        assert_eq!(rows[0][5], "700");
    }

    #[test]
    fn test_parse_rows_tolerates_crlf_and_missing_newline() {
        let rows = parse_rows("a,b\r\n\r\nc,\"d\"");
        assert_eq!(rows, vec![vec!["a", "b"], vec!["c", "d"]]);
    }
}
