//! Member entity.
//!
//! # Invariants
//! - `team_id` and `team` agree whenever `team` is populated.
//! - `team` is only populated by an eager fetch or `change_team`; it is
//!   never loaded behind the caller's back.

use crate::error::RepoResult;
use crate::model::entity::{integer_id, optional_integer, optional_text, required_integer, Audit, Entity};
use crate::model::schema::{EntitySchema, FieldDef};
use crate::model::team::Team;
use crate::model::value::{Record, RecordId};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

pub static MEMBER: Lazy<EntitySchema> = Lazy::new(|| {
    EntitySchema::builder("Member", "member")
        .generated_id("member_id")
        .field(FieldDef::text("username").nullable())
        .field(FieldDef::integer("age"))
        .field(FieldDef::integer("team_id").nullable())
        .audited()
        .relation("team", "team_id", "Team")
        .build()
});

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: Option<i64>,
    pub username: Option<String>,
    pub age: i64,
    pub team_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team: Option<Team>,
    #[serde(flatten)]
    pub audit: Audit,
}

impl Member {
    pub fn new(username: impl Into<String>, age: i64) -> Self {
        Self {
            username: Some(username.into()),
            age,
            ..Self::default()
        }
    }

    /// Member with only a username; age defaults to zero.
    pub fn named(username: impl Into<String>) -> Self {
        Self::new(username, 0)
    }

    pub fn with_team(username: impl Into<String>, age: i64, team: &Team) -> Self {
        let mut member = Self::new(username, age);
        member.change_team(team);
        member
    }

    /// Points this member at `team`. The team must be saved for the link to
    /// persist; an unsaved team only serves as an example probe.
    pub fn change_team(&mut self, team: &Team) {
        self.team_id = team.id;
        self.team = Some(team.clone());
    }

    pub fn username(&self) -> &str {
        self.username.as_deref().unwrap_or_default()
    }
}

impl Entity for Member {
    fn schema() -> &'static EntitySchema {
        &MEMBER
    }

    fn id(&self) -> Option<RecordId> {
        self.id.map(RecordId::Integer)
    }

    fn to_record(&self) -> Record {
        let mut record = Record {
            id: self.id(),
            ..Record::default()
        };
        record.put("username", self.username.clone());
        record.put("age", self.age);
        record.put("team_id", self.team_id);
        self.audit.write_to(&mut record);
        if let Some(team) = &self.team {
            record.related.insert("team".to_string(), team.to_record());
        }
        record
    }

    fn from_record(record: &Record) -> RepoResult<Self> {
        let entity = MEMBER.name;
        let team = match record.related("team") {
            Some(team) => Some(Team::from_record(team)?),
            None => None,
        };
        Ok(Self {
            id: integer_id(entity, record)?,
            username: optional_text(entity, record, "username")?,
            age: required_integer(entity, record, "age")?,
            team_id: optional_integer(entity, record, "team_id")?,
            team,
            audit: Audit::read_from(entity, record)?,
        })
    }
}
