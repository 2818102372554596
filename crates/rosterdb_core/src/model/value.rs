//! Dynamic values, identifiers and records.
//!
//! # Responsibility
//! - Carry field values between typed entities, predicates and SQLite rows.
//! - Define the `Record` shape every entity kind is stored as.
//!
//! # Invariants
//! - `Value::List` only appears as a bound argument of `In`/`NotIn` clauses,
//!   never as a stored field value.
//! - A record identifier is immutable once assigned.

use crate::error::{RepoError, RepoResult};
use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Field value as seen by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Integer(i64),
    Text(String),
    List(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Short type label used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Integer(_) => "integer",
            Self::Text(_) => "text",
            Self::List(_) => "list",
        }
    }

    /// SQL-style comparison: `None` whenever either side is null or the
    /// kinds differ.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Self::Integer(left), Self::Integer(right)) => Some(left.cmp(right)),
            (Self::Text(left), Self::Text(right)) => Some(left.as_bytes().cmp(right.as_bytes())),
            _ => None,
        }
    }

    pub(crate) fn to_sql(&self) -> RepoResult<SqlValue> {
        match self {
            Self::Null => Ok(SqlValue::Null),
            Self::Integer(value) => Ok(SqlValue::Integer(*value)),
            Self::Text(value) => Ok(SqlValue::Text(value.clone())),
            Self::List(_) => Err(RepoError::InvalidParameter {
                parameter: "list".to_string(),
                message: "list values can only be bound to `in` clauses".to_string(),
            }),
        }
    }

    pub(crate) fn from_sql(value: SqlValue, column: &str) -> RepoResult<Self> {
        match value {
            SqlValue::Null => Ok(Self::Null),
            SqlValue::Integer(value) => Ok(Self::Integer(value)),
            SqlValue::Text(value) => Ok(Self::Text(value)),
            SqlValue::Real(value) => Err(RepoError::CorruptRow(format!(
                "unexpected real value `{value}` in column `{column}`"
            ))),
            SqlValue::Blob(_) => Err(RepoError::CorruptRow(format!(
                "unexpected blob value in column `{column}`"
            ))),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "'{value}'"),
            Self::List(values) => {
                write!(f, "[")?;
                for (index, value) in values.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{value}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&String> for Value {
    fn from(value: &String) -> Self {
        Self::Text(value.clone())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

impl From<RecordId> for Value {
    fn from(value: RecordId) -> Self {
        match value {
            RecordId::Integer(id) => Self::Integer(id),
            RecordId::Text(id) => Self::Text(id),
        }
    }
}

/// Record identity: generated integers or caller-assigned strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Integer(i64),
    Text(String),
}

impl RecordId {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(id) => Some(*id),
            Self::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Integer(_) => None,
            Self::Text(id) => Some(id.as_str()),
        }
    }

    pub(crate) fn to_sql(&self) -> SqlValue {
        match self {
            Self::Integer(id) => SqlValue::Integer(*id),
            Self::Text(id) => SqlValue::Text(id.clone()),
        }
    }

    pub(crate) fn from_value(value: Value, column: &str) -> RepoResult<Self> {
        match value {
            Value::Integer(id) => Ok(Self::Integer(id)),
            Value::Text(id) => Ok(Self::Text(id)),
            other => Err(RepoError::CorruptRow(format!(
                "invalid identifier `{other}` in column `{column}`"
            ))),
        }
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer(id) => write!(f, "{id}"),
            Self::Text(id) => write!(f, "{id}"),
        }
    }
}

impl From<i64> for RecordId {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Storage shape shared by every entity kind.
///
/// `related` holds relationships fetched eagerly by a join; it is empty
/// unless the caller asked for them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Record {
    pub id: Option<RecordId>,
    pub fields: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub related: BTreeMap<String, Record>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(id: impl Into<RecordId>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Builder-style field setter.
    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(field.to_string(), value.into());
        self
    }

    pub fn put(&mut self, field: &str, value: impl Into<Value>) {
        self.fields.insert(field.to_string(), value.into());
    }

    /// Returns the field value, `Null` when absent.
    pub fn get(&self, field: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.fields.get(field).unwrap_or(&NULL)
    }

    pub fn related(&self, relation: &str) -> Option<&Record> {
        self.related.get(relation)
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        self.get(field).as_str()
    }

    pub fn integer(&self, field: &str) -> Option<i64> {
        self.get(field).as_i64()
    }
}

#[cfg(test)]
mod tests {
    use super::{Record, RecordId, Value};
    use std::cmp::Ordering;

    #[test]
    fn compare_is_undefined_across_kinds_and_nulls() {
        assert_eq!(Value::from(1).compare(&Value::from(2)), Some(Ordering::Less));
        assert_eq!(Value::from("b").compare(&Value::from("a")), Some(Ordering::Greater));
        assert_eq!(Value::from(1).compare(&Value::from("1")), None);
        assert_eq!(Value::Null.compare(&Value::Null), None);
    }

    #[test]
    fn option_and_vec_conversions() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(
            Value::from(vec!["a", "b"]),
            Value::List(vec![Value::from("a"), Value::from("b")])
        );
        assert_eq!(Value::from(RecordId::from("x")), Value::from("x"));
    }

    #[test]
    fn missing_field_reads_as_null() {
        let record = Record::with_id(7).set("username", "m1");
        assert_eq!(record.text("username"), Some("m1"));
        assert!(record.get("age").is_null());
        assert_eq!(record.id, Some(RecordId::Integer(7)));
    }

    #[test]
    fn list_values_cannot_be_bound_as_scalars() {
        assert!(Value::from(vec![1, 2]).to_sql().is_err());
    }
}
