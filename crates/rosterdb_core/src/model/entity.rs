//! Typed entity contract and shared bookkeeping fields.
//!
//! # Responsibility
//! - Map typed domain structs to and from the dynamic `Record` shape.
//! - Decide "new vs existing" for `save` semantics.

use crate::error::{RepoError, RepoResult};
use crate::model::schema::EntitySchema;
use crate::model::value::{Record, RecordId, Value};
use serde::{Deserialize, Serialize};

/// Domain struct stored as one row of `schema()`.
pub trait Entity: Sized {
    fn schema() -> &'static EntitySchema;

    fn id(&self) -> Option<RecordId>;

    fn to_record(&self) -> Record;

    fn from_record(record: &Record) -> RepoResult<Self>;

    /// New entities are inserted by `save`, existing ones updated.
    fn is_new(&self) -> bool {
        self.id().is_none()
    }
}

/// Bookkeeping timestamps and principals stamped by the auditing hook.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Audit {
    /// Epoch milliseconds of the insert. Never rewritten.
    pub created_at: Option<i64>,
    /// Epoch milliseconds of the last hook-driven write.
    pub updated_at: Option<i64>,
    pub created_by: Option<String>,
    pub last_modified_by: Option<String>,
}

impl Audit {
    pub(crate) fn write_to(&self, record: &mut Record) {
        record.put("created_at", self.created_at);
        record.put("updated_at", self.updated_at);
        record.put("created_by", self.created_by.clone());
        record.put("last_modified_by", self.last_modified_by.clone());
    }

    pub(crate) fn read_from(entity: &str, record: &Record) -> RepoResult<Self> {
        Ok(Self {
            created_at: optional_integer(entity, record, "created_at")?,
            updated_at: optional_integer(entity, record, "updated_at")?,
            created_by: optional_text(entity, record, "created_by")?,
            last_modified_by: optional_text(entity, record, "last_modified_by")?,
        })
    }
}

pub(crate) fn required_integer(entity: &str, record: &Record, field: &str) -> RepoResult<i64> {
    optional_integer(entity, record, field)?
        .ok_or_else(|| RepoError::CorruptRow(format!("{entity}.{field} is null")))
}

pub(crate) fn optional_integer(
    entity: &str,
    record: &Record,
    field: &str,
) -> RepoResult<Option<i64>> {
    match record.get(field) {
        Value::Null => Ok(None),
        Value::Integer(value) => Ok(Some(*value)),
        other => Err(RepoError::CorruptRow(format!(
            "{entity}.{field} expected integer, found {}",
            other.kind()
        ))),
    }
}

pub(crate) fn optional_text(
    entity: &str,
    record: &Record,
    field: &str,
) -> RepoResult<Option<String>> {
    match record.get(field) {
        Value::Null => Ok(None),
        Value::Text(value) => Ok(Some(value.clone())),
        other => Err(RepoError::CorruptRow(format!(
            "{entity}.{field} expected text, found {}",
            other.kind()
        ))),
    }
}

pub(crate) fn integer_id(entity: &str, record: &Record) -> RepoResult<Option<i64>> {
    match &record.id {
        None => Ok(None),
        Some(RecordId::Integer(id)) => Ok(Some(*id)),
        Some(RecordId::Text(id)) => Err(RepoError::CorruptRow(format!(
            "{entity} expects an integer id, found `{id}`"
        ))),
    }
}
