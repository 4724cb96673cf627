//! Processing record state machine
//!
//! Migration and publication are separate axes on one record, each with
//! its own transitions:
//!
//! ```text
//! NOT_STARTED | ERROR ──begin──> IN_PROGRESS ──complete──> DONE
//!                                     └────────fail─────> ERROR
//! DONE ──begin(force)──> IN_PROGRESS
//! ```

use crate::db::models::{ProcRecord, ProgressStatus, WebsiteKind};
use crate::errors::{AppError, Result};
use serde_json::Value;
use uuid::Uuid;

impl ProcRecord {
    /// Migration still has work to do, or the caller forces it
    pub fn needs_migration(&self, force_update: bool) -> bool {
        force_update || self.migration_status != ProgressStatus::Done
    }

    /// Enter IN_PROGRESS; returns false (no change) when DONE and not forced
    pub fn begin_migration(&mut self, force_update: bool) -> bool {
        if !self.needs_migration(force_update) {
            return false;
        }
        self.migration_status = ProgressStatus::InProgress;
        true
    }

    /// Link the canonical entity and finish the migration
    pub fn complete_migration(&mut self, entity_id: Uuid) {
        self.entity_id = Some(entity_id);
        self.migration_status = ProgressStatus::Done;
    }

    pub fn fail_migration(&mut self) {
        self.migration_status = ProgressStatus::Error;
    }

    /// Publication still has work to do for `website`, or the caller forces it.
    /// A record without an entity is never publishable.
    pub fn needs_publication(&self, website: WebsiteKind, force_update: bool) -> bool {
        self.entity_id.is_some()
            && (force_update || self.publication_status(website) != ProgressStatus::Done)
    }

    pub fn begin_publication(&mut self, website: WebsiteKind, force_update: bool) -> bool {
        if !self.needs_publication(website, force_update) {
            return false;
        }
        self.set_publication_status(website, ProgressStatus::InProgress);
        true
    }

    /// DONE when the target accepted the payload, ERROR otherwise
    pub fn complete_publication(&mut self, website: WebsiteKind, accepted: bool) {
        let status = if accepted {
            ProgressStatus::Done
        } else {
            ProgressStatus::Error
        };
        self.set_publication_status(website, status);
    }

    pub fn fail_publication(&mut self, website: WebsiteKind) {
        self.set_publication_status(website, ProgressStatus::Error);
    }

    /// Store a legacy record. Returns whether the record changed, in which
    /// case migration restarts from NOT_STARTED.
    pub fn register_legacy(&mut self, data: &Value, force_update: bool) -> bool {
        if !force_update && self.legacy_data == *data {
            return false;
        }
        self.legacy_data = data.clone();
        self.migration_status = ProgressStatus::NotStarted;
        true
    }

    /// Generic guard for the auxiliary axes (documents, files)
    pub fn aux_pending(status: ProgressStatus, force_update: bool) -> bool {
        force_update || status != ProgressStatus::Done
    }

    pub fn label(&self) -> String {
        format!("{}:{}:{}", self.collection, self.kind, self.pid)
    }
}

/// Issue PID derived from its journal's PID: `{journal_pid}{year}{sequence:04}`
pub fn derive_issue_pid(journal_pid: &str, publication_year: &str, sequence: i32) -> Result<String> {
    let year = publication_year.trim();
    if year.len() != 4 || !year.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::Validation {
            message: format!("publication year must have 4 digits, got {:?}", publication_year),
            field: Some("publication_year".to_string()),
        });
    }
    if !(1..=9999).contains(&sequence) {
        return Err(AppError::Validation {
            message: format!("issue order out of range: {}", sequence),
            field: Some("sequence".to_string()),
        });
    }
    Ok(format!("{}{}{:04}", journal_pid, year, sequence))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::EntityKind;
    use serde_json::json;

    #[test]
    fn test_derive_issue_pid() {
        assert_eq!(derive_issue_pid("J1", "2023", 7).unwrap(), "J120230007");
        assert_eq!(
            derive_issue_pid("0001-0001", "1999", 12).unwrap(),
            "0001-000119990012"
        );
        assert!(derive_issue_pid("J1", "23", 7).is_err());
        assert!(derive_issue_pid("J1", "2023", 0).is_err());
    }

    #[test]
    fn test_migration_transitions() {
        let mut record = ProcRecord::new(EntityKind::Journal, "scl", "0001-0001");
        assert!(record.begin_migration(false));
        assert_eq!(record.migration_status, ProgressStatus::InProgress);

        let entity = Uuid::new_v4();
        record.complete_migration(entity);
        assert_eq!(record.migration_status, ProgressStatus::Done);
        assert_eq!(record.entity_id, Some(entity));

        assert!(!record.begin_migration(false));
        assert_eq!(record.migration_status, ProgressStatus::Done);

        assert!(record.begin_migration(true));
        record.fail_migration();
        assert_eq!(record.migration_status, ProgressStatus::Error);
        assert!(record.begin_migration(false));
    }

    #[test]
    fn test_publication_axis_is_independent() {
        let mut record = ProcRecord::new(EntityKind::Issue, "scl", "0001-000120230001");
        assert!(!record.begin_publication(WebsiteKind::Qa, true));

        record.complete_migration(Uuid::new_v4());
        assert!(record.begin_publication(WebsiteKind::Qa, false));
        record.complete_publication(WebsiteKind::Qa, true);

        assert_eq!(record.publication_status(WebsiteKind::Qa), ProgressStatus::Done);
        assert_eq!(record.publication_status(WebsiteKind::Public), ProgressStatus::NotStarted);
        assert_eq!(record.migration_status, ProgressStatus::Done);
        assert!(!record.needs_publication(WebsiteKind::Qa, false));
        assert!(record.needs_publication(WebsiteKind::Public, false));

        record.complete_publication(WebsiteKind::Public, false);
        assert_eq!(record.publication_status(WebsiteKind::Public), ProgressStatus::Error);
    }

    #[test]
    fn test_register_legacy_resets_on_change() {
        let mut record = ProcRecord::new(EntityKind::Journal, "scl", "0001-0001");
        record.complete_migration(Uuid::new_v4());

        let data = json!({"pid": "0001-0001", "title": "Revista"});
        assert!(record.register_legacy(&data, false));
        assert_eq!(record.migration_status, ProgressStatus::NotStarted);

        record.migration_status = ProgressStatus::Done;
        assert!(!record.register_legacy(&data, false));
        assert_eq!(record.migration_status, ProgressStatus::Done);
    }
}
