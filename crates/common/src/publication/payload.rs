//! Website payloads built from canonical entities

use crate::db::models::{
    Article, EntityKind, InstitutionRole, Issue, Journal, JournalInstitution, JournalSubject, ProcRecord,
};
use crate::errors::{AppError, Result};
use crate::store::EntityStore;
use serde_json::{json, Value};
use uuid::Uuid;

fn not_found(resource_type: &str, id: Uuid) -> AppError {
    AppError::NotFound {
        resource_type: resource_type.to_string(),
        id: id.to_string(),
    }
}

/// Payload for the canonical entity behind `record`
pub async fn build_payload(entities: &dyn EntityStore, record: &ProcRecord) -> Result<Value> {
    let entity_id = record.entity_id.ok_or_else(|| AppError::Validation {
        message: format!("{} has no canonical entity", record.label()),
        field: Some("entity_id".to_string()),
    })?;

    match record.kind {
        EntityKind::Journal => {
            let journal = entities
                .find_journal_by_id(entity_id)
                .await?
                .ok_or_else(|| not_found("journal", entity_id))?;
            let subjects = entities.journal_subjects(journal.id).await?;
            let institutions = entities.journal_institutions(journal.id).await?;
            Ok(journal_payload(record, &journal, &subjects, &institutions))
        }
        EntityKind::Issue => {
            let issue = entities
                .find_issue_by_id(entity_id)
                .await?
                .ok_or_else(|| not_found("issue", entity_id))?;
            let journal = entities
                .find_journal_by_id(issue.journal_id)
                .await?
                .ok_or_else(|| not_found("journal", issue.journal_id))?;
            Ok(issue_payload(record, &issue, &journal))
        }
        EntityKind::Article => {
            let article = entities
                .find_article_by_id(entity_id)
                .await?
                .ok_or_else(|| not_found("article", entity_id))?;
            let issue = entities
                .find_issue_by_id(article.issue_id)
                .await?
                .ok_or_else(|| not_found("issue", article.issue_id))?;
            Ok(article_payload(record, &article, &issue))
        }
    }
}

fn institution_names(institutions: &[JournalInstitution], role: InstitutionRole) -> Vec<&str> {
    institutions
        .iter()
        .filter(|i| i.role == role)
        .map(|i| i.name.as_str())
        .collect()
}

pub fn journal_payload(
    record: &ProcRecord,
    journal: &Journal,
    subjects: &[JournalSubject],
    institutions: &[JournalInstitution],
) -> Value {
    json!({
        "pid": record.pid,
        "collection": record.collection,
        "acronym": record.journal_acron,
        "availability_status": record.availability_status,
        "title": journal.title,
        "short_title": journal.short_title,
        "official_title": journal.official_title,
        "iso_short_title": journal.iso_short_title,
        "issn_print": journal.issn_print,
        "issn_electronic": journal.issn_electronic,
        "issnl": journal.issnl,
        "license_code": journal.license_code,
        "previous_title": journal.previous_title,
        "next_title": journal.next_title,
        "subjects": subjects.iter().map(|s| s.code.as_str()).collect::<Vec<_>>(),
        "publishers": institution_names(institutions, InstitutionRole::Publisher),
        "owners": institution_names(institutions, InstitutionRole::Owner),
    })
}

pub fn issue_payload(record: &ProcRecord, issue: &Issue, journal: &Journal) -> Value {
    json!({
        "pid": record.pid,
        "collection": record.collection,
        "journal": {
            "acronym": record.journal_acron,
            "issn_print": journal.issn_print,
            "issn_electronic": journal.issn_electronic,
        },
        "volume": issue.volume,
        "number": issue.number,
        "supplement": issue.supplement,
        "publication_year": issue.publication_year,
        "order": issue.sequence,
        "issue_folder": record.issue_folder.clone().unwrap_or_else(|| issue.issue_folder()),
    })
}

pub fn article_payload(record: &ProcRecord, article: &Article, issue: &Issue) -> Value {
    json!({
        "pid": record.pid,
        "collection": record.collection,
        "pid_v3": article.pid_v3,
        "doi": article.doi,
        "title": article.title,
        "first_page": article.first_page,
        "last_page": article.last_page,
        "publication_year": article.publication_year,
        "journal_acronym": record.journal_acron,
        "issue": {
            "volume": issue.volume,
            "number": issue.number,
            "supplement": issue.supplement,
            "issue_folder": issue.issue_folder(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{JournalData, MemoryStore};

    #[tokio::test]
    async fn test_journal_payload_lists_nested_members() {
        let store = MemoryStore::new();
        let journal = store
            .upsert_journal(&JournalData {
                title: Some("Revista Teste".to_string()),
                issn_electronic: Some("1234-5678".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        store.add_subject(journal.id, "Health Sciences").await.unwrap();
        store
            .add_institution(journal.id, InstitutionRole::Owner, "Universidade")
            .await
            .unwrap();

        let mut record = ProcRecord::new(EntityKind::Journal, "scl", "0001-0001");
        record.complete_migration(journal.id);
        let payload = build_payload(&store, &record).await.unwrap();

        assert_eq!(payload["pid"], "0001-0001");
        assert_eq!(payload["issn_electronic"], "1234-5678");
        assert_eq!(payload["subjects"], json!(["Health Sciences"]));
        assert_eq!(payload["owners"], json!(["Universidade"]));
        assert_eq!(payload["publishers"], json!([]));
    }

    #[tokio::test]
    async fn test_payload_requires_entity() {
        let store = MemoryStore::new();
        let record = ProcRecord::new(EntityKind::Article, "scl", "S0001");
        let err = build_payload(&store, &record).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }
}
