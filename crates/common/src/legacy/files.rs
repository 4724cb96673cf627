//! Legacy file import
//!
//! Journal `acron.id` files and per-issue asset folders exported from the
//! legacy website, laid out as `{root}/{collection}/{journal_acron}[/{issue_folder}]`.

use crate::db::models::ProcRecord;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, warn};

#[async_trait]
pub trait LegacyFileImporter: Send + Sync {
    /// Import the journal's `acron.id` content; returns the number of entries
    async fn import_journal_files(&self, record: &ProcRecord) -> Result<usize>;

    /// Import the issue folder; returns the number of files
    async fn import_issue_files(&self, record: &ProcRecord) -> Result<usize>;
}

/// Filesystem importer
pub struct FsLegacyFiles {
    root: PathBuf,
}

impl FsLegacyFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn journal_dir(&self, record: &ProcRecord) -> Result<PathBuf> {
        let acron = record.journal_acron.as_deref().ok_or_else(|| AppError::MissingField {
            field: format!("journal_acron of {}", record.label()),
        })?;
        Ok(self.root.join(&record.collection).join(acron))
    }
}

#[async_trait]
impl LegacyFileImporter for FsLegacyFiles {
    async fn import_journal_files(&self, record: &ProcRecord) -> Result<usize> {
        let path = self.journal_dir(record)?.join("acron.id");
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "No acron.id file");
                return Ok(0);
            }
            Err(e) => {
                return Err(AppError::LegacySource {
                    message: format!("{}: {}", path.display(), e),
                })
            }
        };

        let entries = content.lines().filter(|l| !l.trim().is_empty()).count();
        debug!(path = %path.display(), entries, "acron.id imported");
        Ok(entries)
    }

    async fn import_issue_files(&self, record: &ProcRecord) -> Result<usize> {
        let folder = record.issue_folder.as_deref().ok_or_else(|| AppError::MissingField {
            field: format!("issue_folder of {}", record.label()),
        })?;
        let dir = self.journal_dir(record)?.join(folder);

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %dir.display(), "No legacy files for issue");
                return Ok(0);
            }
            Err(e) => {
                return Err(AppError::LegacySource {
                    message: format!("{}: {}", dir.display(), e),
                })
            }
        };

        let mut count = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                count += 1;
            }
        }
        debug!(path = %dir.display(), files = count, "Issue files imported");
        Ok(count)
    }
}

/// Importer that finds nothing; for runs without a file export
pub struct NoopFileImporter;

#[async_trait]
impl LegacyFileImporter for NoopFileImporter {
    async fn import_journal_files(&self, _record: &ProcRecord) -> Result<usize> {
        Ok(0)
    }

    async fn import_issue_files(&self, _record: &ProcRecord) -> Result<usize> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::EntityKind;

    #[tokio::test]
    async fn test_issue_files_counted() {
        let root = std::env::temp_dir().join(format!("bibliosync-files-{}", uuid::Uuid::new_v4()));
        let dir = root.join("scl").join("rsp").join("v12n3");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("a01.xml"), "<article/>").await.unwrap();
        tokio::fs::write(dir.join("a01.pdf"), "%PDF").await.unwrap();
        tokio::fs::write(root.join("scl").join("rsp").join("acron.id"), "rsp\n\n").await.unwrap();

        let mut record = ProcRecord::new(EntityKind::Issue, "scl", "0034-891020230001");
        record.journal_acron = Some("rsp".to_string());
        record.issue_folder = Some("v12n3".to_string());

        let importer = FsLegacyFiles::new(&root);
        assert_eq!(importer.import_issue_files(&record).await.unwrap(), 2);
        assert_eq!(importer.import_journal_files(&record).await.unwrap(), 1);

        tokio::fs::remove_dir_all(&root).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_acron_is_error() {
        let record = ProcRecord::new(EntityKind::Journal, "scl", "0034-8910");
        let err = FsLegacyFiles::new("/tmp").import_journal_files(&record).await.unwrap_err();
        assert!(matches!(err, AppError::MissingField { .. }));
    }
}
