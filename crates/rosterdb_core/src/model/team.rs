//! Team entity.

use crate::error::RepoResult;
use crate::model::entity::{integer_id, optional_text, Audit, Entity};
use crate::model::schema::{EntitySchema, FieldDef};
use crate::model::value::{Record, RecordId};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

pub static TEAM: Lazy<EntitySchema> = Lazy::new(|| {
    EntitySchema::builder("Team", "team")
        .generated_id("team_id")
        .field(FieldDef::text("name").nullable())
        .audited()
        .build()
});

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: Option<i64>,
    pub name: Option<String>,
    #[serde(flatten)]
    pub audit: Audit,
}

impl Team {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }
}

impl Entity for Team {
    fn schema() -> &'static EntitySchema {
        &TEAM
    }

    fn id(&self) -> Option<RecordId> {
        self.id.map(RecordId::Integer)
    }

    fn to_record(&self) -> Record {
        let mut record = Record {
            id: self.id(),
            ..Record::default()
        };
        record.put("name", self.name.clone());
        self.audit.write_to(&mut record);
        record
    }

    fn from_record(record: &Record) -> RepoResult<Self> {
        Ok(Self {
            id: integer_id(TEAM.name, record)?,
            name: optional_text(TEAM.name, record, "name")?,
            audit: Audit::read_from(TEAM.name, record)?,
        })
    }
}
