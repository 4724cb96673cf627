//! Result rows of the remote metadata API
//!
//! Scalars arrive as strings or numbers depending on the field and the
//! API version; both are accepted and blank strings read as absent.

use crate::errors::{AppError, Result};
use crate::store::{non_blank, HistoryEvent, JournalData};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

fn stringish<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => non_blank(Some(&s)),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

/// Parse `{"results": [...]}` into typed rows
pub fn parse_results<T: for<'de> Deserialize<'de>>(url: &str, body: Value) -> Result<Vec<T>> {
    let results = match body {
        Value::Object(mut map) => map.remove("results"),
        _ => None,
    }
    .ok_or_else(|| AppError::RemoteUnavailable {
        url: url.to_string(),
        message: "response has no results".to_string(),
    })?;

    serde_json::from_value(results).map_err(|e| AppError::RemoteUnavailable {
        url: url.to_string(),
        message: format!("unexpected result row: {}", e),
    })
}

/// ISSN registry data of a journal
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OfficialRow {
    #[serde(default, deserialize_with = "stringish")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "stringish")]
    pub iso_short_title: Option<String>,
    #[serde(default, deserialize_with = "stringish")]
    pub issn_print: Option<String>,
    #[serde(default, deserialize_with = "stringish")]
    pub issn_electronic: Option<String>,
    #[serde(default, deserialize_with = "stringish")]
    pub issnl: Option<String>,
    #[serde(default, deserialize_with = "stringish")]
    pub foundation_year: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubjectRow {
    #[serde(default, deserialize_with = "stringish")]
    pub value: Option<String>,
}

/// Publisher or owner
#[derive(Debug, Clone, Deserialize)]
pub struct NamedRow {
    #[serde(default, deserialize_with = "stringish")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryRow {
    #[serde(default, deserialize_with = "stringish")]
    pub event_type: Option<String>,
    #[serde(default, deserialize_with = "stringish")]
    pub year: Option<String>,
    #[serde(default, deserialize_with = "stringish")]
    pub month: Option<String>,
    #[serde(default, deserialize_with = "stringish")]
    pub day: Option<String>,
    #[serde(default, deserialize_with = "stringish")]
    pub interruption_reason: Option<String>,
}

impl HistoryRow {
    pub fn to_event(&self) -> Option<HistoryEvent> {
        Some(HistoryEvent {
            event_type: self.event_type.clone()?,
            year: self.year.clone().unwrap_or_default(),
            month: self.month.clone().unwrap_or_default(),
            day: self.day.clone().unwrap_or_default(),
            interruption_reason: self.interruption_reason.clone().unwrap_or_default(),
        })
    }
}

/// Journal presence in one collection
#[derive(Debug, Clone, Deserialize)]
pub struct CollectionRow {
    #[serde(default, deserialize_with = "stringish")]
    pub collection_acron: Option<String>,
    #[serde(default, deserialize_with = "stringish")]
    pub scielo_issn: Option<String>,
    #[serde(default, deserialize_with = "stringish")]
    pub journal_acron: Option<String>,
    #[serde(default, deserialize_with = "stringish")]
    pub availability_status: Option<String>,
    #[serde(default)]
    pub journal_history: Option<Vec<HistoryRow>>,
}

/// One row of the journal endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct JournalRow {
    #[serde(default)]
    pub official: Option<OfficialRow>,
    #[serde(default, deserialize_with = "stringish")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "stringish")]
    pub short_title: Option<String>,
    #[serde(default, deserialize_with = "stringish")]
    pub previous_journal_title: Option<String>,
    #[serde(default, deserialize_with = "stringish")]
    pub next_journal_title: Option<String>,
    #[serde(default, rename = "journal_use_license", deserialize_with = "stringish")]
    pub license_code: Option<String>,
    #[serde(default, deserialize_with = "stringish")]
    pub nlm_title: Option<String>,
    #[serde(default, deserialize_with = "stringish")]
    pub doi_prefix: Option<String>,
    #[serde(default, rename = "Subject", alias = "subject")]
    pub subjects: Option<Vec<SubjectRow>>,
    #[serde(default, rename = "publisher")]
    pub publishers: Option<Vec<NamedRow>>,
    #[serde(default, rename = "owner")]
    pub owners: Option<Vec<NamedRow>>,
    #[serde(default)]
    pub scielo_journal: Option<Vec<CollectionRow>>,
}

impl JournalRow {
    /// Scalars for the root journal
    pub fn journal_data(&self) -> JournalData {
        let official = self.official.clone().unwrap_or_default();
        JournalData {
            title: self.title.clone().or_else(|| official.title.clone()),
            short_title: self.short_title.clone(),
            official_title: official.title,
            iso_short_title: official.iso_short_title,
            issn_print: official.issn_print,
            issn_electronic: official.issn_electronic,
            issnl: official.issnl,
            foundation_year: official.foundation_year,
            previous_title: self.previous_journal_title.clone(),
            next_title: self.next_journal_title.clone(),
            license_code: self.license_code.clone(),
            nlm_title: self.nlm_title.clone(),
            doi_prefix: self.doi_prefix.clone(),
        }
    }

    pub fn subject_codes(&self) -> Vec<String> {
        self.subjects
            .iter()
            .flatten()
            .filter_map(|s| s.value.clone())
            .collect()
    }

    pub fn publisher_names(&self) -> Vec<String> {
        self.publishers.iter().flatten().filter_map(|p| p.name.clone()).collect()
    }

    pub fn owner_names(&self) -> Vec<String> {
        self.owners.iter().flatten().filter_map(|o| o.name.clone()).collect()
    }

    pub fn collections(&self) -> &[CollectionRow] {
        self.scielo_journal.as_deref().unwrap_or_default()
    }
}

/// One row of the issue endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct IssueRow {
    #[serde(default, deserialize_with = "stringish")]
    pub volume: Option<String>,
    #[serde(default, deserialize_with = "stringish")]
    pub number: Option<String>,
    #[serde(default, deserialize_with = "stringish")]
    pub supplement: Option<String>,
    #[serde(default, deserialize_with = "stringish")]
    pub year: Option<String>,
}
