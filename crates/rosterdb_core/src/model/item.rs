//! Item entity with a caller-assigned identifier.
//!
//! # Invariants
//! - The identifier is chosen by the caller, so "new" is decided by the
//!   missing `created_at` stamp rather than a missing id.

use crate::error::{RepoError, RepoResult};
use crate::model::entity::{Audit, Entity};
use crate::model::schema::EntitySchema;
use crate::model::value::{Record, RecordId};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

pub static ITEM: Lazy<EntitySchema> = Lazy::new(|| {
    EntitySchema::builder("Item", "item")
        .assigned_id("item_id")
        .audited()
        .build()
});

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    #[serde(flatten)]
    pub audit: Audit,
}

impl Item {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            audit: Audit::default(),
        }
    }
}

impl Entity for Item {
    fn schema() -> &'static EntitySchema {
        &ITEM
    }

    fn id(&self) -> Option<RecordId> {
        Some(RecordId::Text(self.id.clone()))
    }

    fn is_new(&self) -> bool {
        self.audit.created_at.is_none()
    }

    fn to_record(&self) -> Record {
        let mut record = Record::with_id(self.id.clone());
        self.audit.write_to(&mut record);
        record
    }

    fn from_record(record: &Record) -> RepoResult<Self> {
        let id = match &record.id {
            Some(RecordId::Text(id)) => id.clone(),
            other => {
                return Err(RepoError::CorruptRow(format!(
                    "Item expects a text id, found {other:?}"
                )))
            }
        };
        Ok(Self {
            id,
            audit: Audit::read_from(ITEM.name, record)?,
        })
    }
}
