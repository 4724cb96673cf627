//! Status and kind enums shared by the entity models

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Progress of one processing concern (migration, publication, files, documents)
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressStatus {
    #[default]
    #[sea_orm(string_value = "NOT_STARTED")]
    NotStarted,
    #[sea_orm(string_value = "IN_PROGRESS")]
    InProgress,
    #[sea_orm(string_value = "DONE")]
    Done,
    #[sea_orm(string_value = "ERROR")]
    Error,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::NotStarted => "NOT_STARTED",
            ProgressStatus::InProgress => "IN_PROGRESS",
            ProgressStatus::Done => "DONE",
            ProgressStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical entity kind a processing record tracks
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    #[sea_orm(string_value = "journal")]
    Journal,
    #[sea_orm(string_value = "issue")]
    Issue,
    #[sea_orm(string_value = "article")]
    Article,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Journal => "journal",
            EntityKind::Issue => "issue",
            EntityKind::Article => "article",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Public-facing website a record is published to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WebsiteKind {
    Qa,
    Public,
}

impl WebsiteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebsiteKind::Qa => "QA",
            WebsiteKind::Public => "PUBLIC",
        }
    }
}

impl fmt::Display for WebsiteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WebsiteKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "QA" => Ok(WebsiteKind::Qa),
            "PUBLIC" => Ok(WebsiteKind::Public),
            other => Err(format!("unknown website kind: {}", other)),
        }
    }
}

/// Role an institution plays for a journal
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum InstitutionRole {
    #[sea_orm(string_value = "publisher")]
    Publisher,
    #[sea_orm(string_value = "owner")]
    Owner,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_website_kind_parse() {
        assert_eq!("qa".parse::<WebsiteKind>().unwrap(), WebsiteKind::Qa);
        assert_eq!("PUBLIC".parse::<WebsiteKind>().unwrap(), WebsiteKind::Public);
        assert!("staging".parse::<WebsiteKind>().is_err());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ProgressStatus::NotStarted).unwrap();
        assert_eq!(json, "\"NOT_STARTED\"");
        assert_eq!(ProgressStatus::default(), ProgressStatus::NotStarted);
    }
}
