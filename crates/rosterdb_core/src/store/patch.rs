//! Partial updates of a single record.

use crate::error::{RepoError, RepoResult};
use crate::model::schema::{EntitySchema, ID_FIELD};
use crate::model::value::{Record, Value};
use std::collections::BTreeMap;

/// Field assignments applied by `Session::update`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Patch {
    changes: BTreeMap<String, Value>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.put(field, value);
        self
    }

    pub fn put(&mut self, field: &str, value: impl Into<Value>) {
        self.changes.insert(field.to_string(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.changes.get(field)
    }

    pub fn changes(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.changes.iter().map(|(field, value)| (field.as_str(), value))
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Every updatable field of `schema` carried by `record`, as written by
    /// `save` for an existing entity.
    pub fn from_record(schema: &EntitySchema, record: &Record) -> Self {
        let changes = schema
            .data_fields()
            .iter()
            .filter(|field| field.updatable)
            .filter_map(|field| {
                record
                    .fields
                    .get(field.name)
                    .map(|value| (field.name.to_string(), value.clone()))
            })
            .collect();
        Self { changes }
    }

    /// # Errors
    /// - `SchemaMismatch` for unknown, identity or non-updatable fields.
    /// - `MutationType` when a value does not fit its field.
    pub(crate) fn validate(&self, schema: &EntitySchema) -> RepoResult<()> {
        for (name, value) in &self.changes {
            let field = schema.require_field(name)?;
            if field.name == ID_FIELD || !field.updatable {
                return Err(RepoError::schema(
                    schema.name,
                    format!("field `{name}` is not updatable"),
                ));
            }
            field.check_value(value).map_err(|message| RepoError::MutationType {
                entity: schema.name.to_string(),
                field: field.name.to_string(),
                message,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Patch;
    use crate::error::RepoError;
    use crate::model::member::MEMBER;
    use crate::model::value::{Record, Value};

    #[test]
    fn validate_separates_schema_and_type_errors() {
        assert!(Patch::new().set("age", 30).validate(&MEMBER).is_ok());
        assert!(matches!(
            Patch::new().set("nickname", "x").validate(&MEMBER),
            Err(RepoError::SchemaMismatch { .. })
        ));
        assert!(matches!(
            Patch::new().set("created_at", 1).validate(&MEMBER),
            Err(RepoError::SchemaMismatch { .. })
        ));
        assert!(matches!(
            Patch::new().set("age", "old").validate(&MEMBER),
            Err(RepoError::MutationType { .. })
        ));
    }

    #[test]
    fn from_record_skips_immutable_fields() {
        let record = Record::with_id(1)
            .set("username", "m1")
            .set("created_at", 5)
            .set("age", Value::from(3));
        let patch = Patch::from_record(&MEMBER, &record);
        assert!(patch.get("created_at").is_none());
        assert_eq!(patch.get("username"), Some(&Value::from("m1")));
    }
}
