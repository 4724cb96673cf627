//! Legacy collection source
//!
//! Lazy, restartable streams of `(pid, record)` pairs per collection and
//! entity kind, plus the typed views the orchestrator reads from them.

mod files;

pub use files::{FsLegacyFiles, LegacyFileImporter, NoopFileImporter};

use crate::db::models::EntityKind;
use crate::errors::{AppError, Result};
use crate::store::non_blank;
use futures::stream::{self, BoxStream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

/// One legacy record keyed by its PID
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyRecord {
    pub pid: String,
    pub data: Value,
}

impl LegacyRecord {
    /// Build from a JSON object carrying a `pid` field
    pub fn from_value(data: Value) -> Result<Self> {
        let pid = data
            .get("pid")
            .and_then(Value::as_str)
            .and_then(|p| non_blank(Some(p)))
            .ok_or_else(|| AppError::InvalidLegacyRecord {
                pid: String::new(),
                message: "record has no pid".to_string(),
            })?;
        Ok(Self { pid, data })
    }
}

/// Source of legacy records
pub trait LegacySource: Send + Sync {
    /// Records of `kind` in `collection`; calling again restarts the sequence
    fn records(&self, collection: &str, kind: EntityKind) -> BoxStream<'static, Result<LegacyRecord>>;
}

/// Reads `{root}/{collection}/{kind}.jsonl`, one JSON object per line.
/// A missing file is an empty collection.
pub struct JsonLinesSource {
    root: PathBuf,
}

impl JsonLinesSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, collection: &str, kind: EntityKind) -> PathBuf {
        self.root.join(collection).join(format!("{}.jsonl", kind))
    }
}

impl LegacySource for JsonLinesSource {
    fn records(&self, collection: &str, kind: EntityKind) -> BoxStream<'static, Result<LegacyRecord>> {
        let path = self.path(collection, kind);

        let opened = async move {
            match tokio::fs::File::open(&path).await {
                Ok(file) => {
                    debug!(path = %path.display(), "Reading legacy records");
                    Ok(Some((BufReader::new(file), 0)))
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %path.display(), "No legacy export");
                    Ok(None)
                }
                Err(e) => Err(AppError::LegacySource {
                    message: format!("{}: {}", path.display(), e),
                }),
            }
        };

        stream::once(opened)
            .flat_map(|opened| match opened {
                Ok(Some(reader)) => stream::try_unfold(reader, next_record)
                    .map(|item| item.and_then(|record| record))
                    .boxed(),
                Ok(None) => stream::empty().boxed(),
                Err(e) => stream::iter(vec![Err(e)]).boxed(),
            })
            .boxed()
    }
}

/// Reader over one export file and the number of the last line read
type JsonLines = (BufReader<tokio::fs::File>, usize);

/// Next non-blank line as a record. A line that is not UTF-8 or not a JSON
/// object with a pid is an error item for that line only; an I/O error ends
/// the stream.
async fn next_record((mut reader, mut line_no): JsonLines) -> Result<Option<(Result<LegacyRecord>, JsonLines)>> {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(None);
        }
        line_no += 1;

        let record = match std::str::from_utf8(&buf) {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => serde_json::from_str::<Value>(line)
                .map_err(AppError::from)
                .and_then(LegacyRecord::from_value),
            Err(e) => Err(AppError::InvalidLegacyRecord {
                pid: String::new(),
                message: format!("line {}: {}", line_no, e),
            }),
        };
        return Ok(Some((record, (reader, line_no))));
    }
}

/// In-memory source for tests. Data without a pid comes back as an error
/// item, like a bad export line.
#[derive(Default)]
pub struct VecLegacySource {
    records: Vec<(String, EntityKind, Value)>,
}

impl VecLegacySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, collection: &str, kind: EntityKind, data: Value) -> Self {
        self.records.push((collection.to_string(), kind, data));
        self
    }
}

impl LegacySource for VecLegacySource {
    fn records(&self, collection: &str, kind: EntityKind) -> BoxStream<'static, Result<LegacyRecord>> {
        let items: Vec<Result<LegacyRecord>> = self
            .records
            .iter()
            .filter(|(c, k, _)| c == collection && *k == kind)
            .map(|(_, _, data)| LegacyRecord::from_value(data.clone()))
            .collect();
        stream::iter(items).boxed()
    }
}

fn stringish<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => non_blank(Some(&s)),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Legacy journal record (`title` database)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyJournal {
    #[serde(default, deserialize_with = "stringish")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "stringish")]
    pub acron: Option<String>,
    #[serde(default, deserialize_with = "stringish")]
    pub issn_print: Option<String>,
    #[serde(default, deserialize_with = "stringish")]
    pub issn_electronic: Option<String>,
    #[serde(default, deserialize_with = "stringish")]
    pub availability_status: Option<String>,
}

/// Legacy issue record (`issue` database)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyIssue {
    #[serde(default, deserialize_with = "stringish")]
    pub journal_pid: Option<String>,
    #[serde(default, deserialize_with = "stringish")]
    pub volume: Option<String>,
    #[serde(default, deserialize_with = "stringish")]
    pub number: Option<String>,
    #[serde(default, deserialize_with = "stringish")]
    pub supplement: Option<String>,
    #[serde(default, deserialize_with = "stringish")]
    pub publication_year: Option<String>,
    #[serde(default, deserialize_with = "stringish")]
    pub issue_folder: Option<String>,
}

/// Legacy document record (`artigo` database)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyArticle {
    #[serde(default, deserialize_with = "stringish")]
    pub issue_pid: Option<String>,
    #[serde(default, deserialize_with = "stringish")]
    pub pid_v3: Option<String>,
    #[serde(default, deserialize_with = "stringish")]
    pub doi: Option<String>,
    #[serde(default, deserialize_with = "stringish")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "stringish")]
    pub first_page: Option<String>,
    #[serde(default, deserialize_with = "stringish")]
    pub last_page: Option<String>,
    #[serde(default, deserialize_with = "stringish")]
    pub publication_year: Option<String>,
}

/// Typed view over a stored legacy record
pub fn view<T: for<'de> Deserialize<'de>>(pid: &str, data: &Value) -> Result<T> {
    T::deserialize(data).map_err(|e| AppError::InvalidLegacyRecord {
        pid: pid.to_string(),
        message: e.to_string(),
    })
}

impl LegacyIssue {
    /// Parent journal PID: explicit field, else the first 9 characters
    /// of a legacy issue PID (`ISSN-like journal pid + year + order`)
    pub fn journal_pid_of(&self, issue_pid: &str) -> Option<String> {
        self.journal_pid
            .clone()
            .or_else(|| issue_pid.get(..9).map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_jsonl_source_reads_and_restarts() {
        let root = std::env::temp_dir().join(format!("bibliosync-legacy-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(root.join("scl")).await.unwrap();
        tokio::fs::write(
            root.join("scl").join("journal.jsonl"),
            "{\"pid\": \"0001-0001\", \"title\": \"Revista\"}\n\n{\"pid\": \"0001-0002\"}\n",
        )
        .await
        .unwrap();

        let source = JsonLinesSource::new(&root);
        let first: Vec<LegacyRecord> = source.records("scl", EntityKind::Journal).try_collect().await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].pid, "0001-0001");

        let again: Vec<LegacyRecord> = source.records("scl", EntityKind::Journal).try_collect().await.unwrap();
        assert_eq!(again, first);

        tokio::fs::remove_dir_all(&root).await.unwrap();
    }

    #[tokio::test]
    async fn test_jsonl_missing_file_is_empty() {
        let source = JsonLinesSource::new("/nonexistent/bibliosync");
        let items: Vec<_> = source.records("scl", EntityKind::Issue).collect().await;
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_record_without_pid_is_error_item() {
        let root = std::env::temp_dir().join(format!("bibliosync-legacy-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(root.join("scl")).await.unwrap();
        tokio::fs::write(root.join("scl").join("article.jsonl"), "{\"title\": \"x\"}\n{\"pid\": \"S1\"}\n")
            .await
            .unwrap();

        let items: Vec<_> = JsonLinesSource::new(&root)
            .records("scl", EntityKind::Article)
            .collect()
            .await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_err());
        assert!(items[1].is_ok());

        tokio::fs::remove_dir_all(&root).await.unwrap();
    }

    #[tokio::test]
    async fn test_non_utf8_line_does_not_end_stream() {
        let root = std::env::temp_dir().join(format!("bibliosync-legacy-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(root.join("scl")).await.unwrap();
        let mut content = b"{\"pid\": \"S0\", \"title\": \"Caf".to_vec();
        content.extend_from_slice(&[0xE9, b'"', b'}', b'\n']);
        content.extend_from_slice(b"{\"pid\": \"S1\"}\n");
        tokio::fs::write(root.join("scl").join("article.jsonl"), content).await.unwrap();

        let items: Vec<_> = JsonLinesSource::new(&root)
            .records("scl", EntityKind::Article)
            .collect()
            .await;
        assert_eq!(items.len(), 2);
        assert!(matches!(
            items[0],
            Err(AppError::InvalidLegacyRecord { ref message, .. }) if message.starts_with("line 1")
        ));
        assert_eq!(items[1].as_ref().unwrap().pid, "S1");

        tokio::fs::remove_dir_all(&root).await.unwrap();
    }

    #[tokio::test]
    async fn test_vec_source_yields_error_for_record_without_pid() {
        let source = VecLegacySource::new()
            .with("scl", EntityKind::Article, json!({"title": "no pid"}))
            .with("scl", EntityKind::Article, json!({"pid": "S1"}));
        let items: Vec<_> = source.records("scl", EntityKind::Article).collect().await;
        assert!(items[0].is_err());
        assert_eq!(items[1].as_ref().unwrap().pid, "S1");
    }

    #[test]
    fn test_issue_view() {
        let data = json!({"pid": "0001-000120230003", "volume": 12, "number": "3", "publication_year": "2023"});
        let issue: LegacyIssue = view("0001-000120230003", &data).unwrap();
        assert_eq!(issue.volume.as_deref(), Some("12"));
        assert_eq!(issue.journal_pid_of("0001-000120230003").as_deref(), Some("0001-0001"));
    }
}
