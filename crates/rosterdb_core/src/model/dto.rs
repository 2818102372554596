//! Typed read shapes built from projection rows.

use crate::error::{RepoError, RepoResult};
use crate::model::member::Member;
use crate::model::schema::SchemaRegistry;
use crate::model::value::{Record, Value};
use crate::projection::{FromProjection, ProjectedRow, Projection};
use serde::{Deserialize, Serialize};

/// Member listing row: `select new MemberDto(m.id, m.username, t.name)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberDto {
    pub id: i64,
    pub username: Option<String>,
    pub team_name: Option<String>,
}

impl From<&Member> for MemberDto {
    fn from(member: &Member) -> Self {
        Self {
            id: member.id.unwrap_or_default(),
            username: member.username.clone(),
            team_name: member.team.as_ref().and_then(|team| team.name.clone()),
        }
    }
}

impl FromProjection for MemberDto {
    fn projection(registry: &SchemaRegistry) -> RepoResult<Projection> {
        Projection::builder("MemberDto")
            .field("id")
            .field("username")
            .field("team.name")
            .build(registry, "Member")
    }

    fn from_row(row: &ProjectedRow) -> RepoResult<Self> {
        Ok(Self {
            id: integer(row, "id")?.ok_or_else(|| missing("MemberDto", "id"))?,
            username: text(row, "username")?,
            team_name: text(row, "team_name")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsernameOnly {
    pub username: Option<String>,
}

impl FromProjection for UsernameOnly {
    fn projection(registry: &SchemaRegistry) -> RepoResult<Projection> {
        Projection::builder("UsernameOnly")
            .field("username")
            .build(registry, "Member")
    }

    fn from_row(row: &ProjectedRow) -> RepoResult<Self> {
        Ok(Self {
            username: text(row, "username")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamInfo {
    pub name: Option<String>,
}

/// Username plus the member's team as a nested shape. Needs a full fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NestedClosedProjection {
    pub username: Option<String>,
    pub team: Option<TeamInfo>,
}

impl FromProjection for NestedClosedProjection {
    fn projection(registry: &SchemaRegistry) -> RepoResult<Projection> {
        Projection::builder("NestedClosedProjections")
            .field("username")
            .nested("team", ["name"])
            .build(registry, "Member")
    }

    fn from_row(row: &ProjectedRow) -> RepoResult<Self> {
        let team = match row.nested("team") {
            Some(team) => Some(TeamInfo {
                name: text(team, "name")?,
            }),
            None => None,
        };
        Ok(Self {
            username: text(row, "username")?,
            team,
        })
    }
}

/// Open projection: `summary` is computed from the whole member as
/// `"<username> <age>"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberSummary {
    pub username: Option<String>,
    pub summary: String,
}

impl FromProjection for MemberSummary {
    fn projection(registry: &SchemaRegistry) -> RepoResult<Projection> {
        Projection::builder("MemberSummary")
            .field("username")
            .computed("summary", summarize)
            .build(registry, "Member")
    }

    fn from_row(row: &ProjectedRow) -> RepoResult<Self> {
        Ok(Self {
            username: text(row, "username")?,
            summary: text(row, "summary")?.ok_or_else(|| missing("MemberSummary", "summary"))?,
        })
    }
}

fn summarize(record: &Record) -> Value {
    Value::from(format!(
        "{} {}",
        record.text("username").unwrap_or_default(),
        record.integer("age").unwrap_or_default()
    ))
}

fn text(row: &ProjectedRow, name: &str) -> RepoResult<Option<String>> {
    match row.get(name) {
        Value::Null => Ok(None),
        Value::Text(value) => Ok(Some(value.clone())),
        other => Err(RepoError::CorruptRow(format!(
            "projected `{name}` expected text, found {}",
            other.kind()
        ))),
    }
}

fn integer(row: &ProjectedRow, name: &str) -> RepoResult<Option<i64>> {
    match row.get(name) {
        Value::Null => Ok(None),
        Value::Integer(value) => Ok(Some(*value)),
        other => Err(RepoError::CorruptRow(format!(
            "projected `{name}` expected integer, found {}",
            other.kind()
        ))),
    }
}

fn missing(shape: &str, name: &str) -> RepoError {
    RepoError::CorruptRow(format!("{shape}.{name} is null"))
}

#[cfg(test)]
mod tests {
    use super::{MemberDto, MemberSummary, NestedClosedProjection, TeamInfo};
    use crate::model::default_registry;
    use crate::model::member::Member;
    use crate::model::team::Team;
    use crate::model::value::Record;
    use crate::projection::{FromProjection, ProjectedRow};

    #[test]
    fn dto_from_member_uses_loaded_team() {
        let mut team = Team::new("teamA");
        team.id = Some(1);
        let mut member = Member::with_team("m1", 10, &team);
        member.id = Some(4);
        assert_eq!(
            MemberDto::from(&member),
            MemberDto {
                id: 4,
                username: Some("m1".to_string()),
                team_name: Some("teamA".to_string()),
            }
        );
    }

    #[test]
    fn dto_reads_joined_column_alias() {
        let row = ProjectedRow::from_values(vec![
            ("id".to_string(), 2.into()),
            ("username".to_string(), "m2".into()),
            ("team_name".to_string(), crate::model::value::Value::Null),
        ]);
        let dto = MemberDto::from_row(&row).unwrap();
        assert_eq!(dto.team_name, None);
        assert!(MemberDto::projection(&default_registry()).unwrap().is_optimized());
    }

    #[test]
    fn nested_and_open_shapes_map_from_full_records() {
        let registry = default_registry();
        let mut record = Record::with_id(1).set("username", "m1").set("age", 10);
        record
            .related
            .insert("team".to_string(), Record::with_id(3).set("name", "teamA"));

        let nested = NestedClosedProjection::projection(&registry).unwrap();
        let nested = NestedClosedProjection::from_row(&nested.apply(&record)).unwrap();
        assert_eq!(
            nested.team,
            Some(TeamInfo {
                name: Some("teamA".to_string())
            })
        );

        let open = MemberSummary::projection(&registry).unwrap();
        assert_eq!(MemberSummary::from_row(&open.apply(&record)).unwrap().summary, "m1 10");
    }
}
