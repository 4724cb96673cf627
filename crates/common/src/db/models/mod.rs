//! SeaORM entity models
//!
//! Canonical entities (collections, journals, issues, articles), their
//! nested journal sets, processing records and the failure ledger.

mod article;
mod collection;
mod enums;
mod issue;
mod journal;
mod journal_collection;
mod journal_history;
mod journal_institution;
mod journal_subject;
mod proc_record;
mod unexpected_event;

pub use enums::{EntityKind, InstitutionRole, ProgressStatus, WebsiteKind};

pub use collection::{
    ActiveModel as CollectionActiveModel, Column as CollectionColumn, Entity as CollectionEntity,
    Model as Collection,
};

pub use journal::{
    ActiveModel as JournalActiveModel, Column as JournalColumn, Entity as JournalEntity,
    Model as Journal,
};

pub use journal_subject::{
    ActiveModel as JournalSubjectActiveModel, Column as JournalSubjectColumn,
    Entity as JournalSubjectEntity, Model as JournalSubject,
};

pub use journal_institution::{
    ActiveModel as JournalInstitutionActiveModel, Column as JournalInstitutionColumn,
    Entity as JournalInstitutionEntity, Model as JournalInstitution,
};

pub use journal_collection::{
    ActiveModel as JournalCollectionActiveModel, Column as JournalCollectionColumn,
    Entity as JournalCollectionEntity, Model as JournalCollection,
};

pub use journal_history::{
    ActiveModel as JournalHistoryActiveModel, Column as JournalHistoryColumn,
    Entity as JournalHistoryEntity, Model as JournalHistory,
};

pub use issue::{
    ActiveModel as IssueActiveModel, Column as IssueColumn, Entity as IssueEntity, Model as Issue,
};

pub use article::{
    ActiveModel as ArticleActiveModel, Column as ArticleColumn, Entity as ArticleEntity,
    Model as Article,
};

pub use proc_record::{
    ActiveModel as ProcRecordActiveModel, Column as ProcRecordColumn, Entity as ProcRecordEntity,
    Model as ProcRecord,
};

pub use unexpected_event::{
    ActiveModel as UnexpectedEventActiveModel, Column as UnexpectedEventColumn,
    Entity as UnexpectedEventEntity, Model as UnexpectedEvent,
};
