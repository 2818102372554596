//! Projections: narrowed output shapes over one root entity.
//!
//! # Responsibility
//! - Declare once, validate against the schema, and map records or selected
//!   columns into `ProjectedRow`s.
//! - Tell the SQL layer whether the shape can be served by column
//!   selection (optimized) or needs a full fetch (unoptimized).
//!
//! # Invariants
//! - A projection never names a field outside its root schema or the
//!   target schema of a declared relation.
//! - Optimized and unoptimized execution produce equal rows.

use crate::error::{RepoError, RepoResult};
use crate::model::schema::{EntitySchema, FieldDef, FieldPath, Relation, ResolvedPath, SchemaRegistry};
use crate::model::value::{Record, Value};
use log::warn;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Value computed from the whole record (open projection).
pub type ComputedFn = Arc<dyn Fn(&Record) -> Value + Send + Sync>;

#[derive(Clone)]
pub enum ProjectionField {
    /// Root or one-level related field, emitted under `alias`.
    Path { path: ResolvedPath, alias: String },
    /// Sub-row over a relation; `None` in the output when the relation is
    /// unset.
    Nested {
        relation: &'static Relation,
        target: &'static EntitySchema,
        fields: Vec<&'static FieldDef>,
    },
    Computed { alias: String, compute: ComputedFn },
}

impl Debug for ProjectionField {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Path { path, alias } => write!(f, "Path({} as {alias})", path.path()),
            Self::Nested {
                relation, fields, ..
            } => {
                let names = fields.iter().map(|field| field.name).collect::<Vec<_>>();
                write!(f, "Nested({} {names:?})", relation.name)
            }
            Self::Computed { alias, .. } => write!(f, "Computed({alias})"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Projection {
    name: String,
    root: &'static EntitySchema,
    fields: Vec<ProjectionField>,
}

impl Projection {
    pub fn builder(name: &str) -> ProjectionBuilder {
        ProjectionBuilder {
            name: name.to_string(),
            entries: Vec::new(),
        }
    }

    /// Closed projection over resolved column paths (`select a.x, b.y`).
    pub(crate) fn from_paths(
        name: &str,
        root: &'static EntitySchema,
        paths: Vec<ResolvedPath>,
    ) -> RepoResult<Self> {
        let mut fields: Vec<ProjectionField> = Vec::with_capacity(paths.len());
        for path in paths {
            let alias = path.path().alias();
            if fields
                .iter()
                .any(|field| matches!(field, ProjectionField::Path { alias: known, .. } if *known == alias))
            {
                return Err(RepoError::schema(
                    root.name,
                    format!("projection `{name}` selects `{alias}` twice"),
                ));
            }
            fields.push(ProjectionField::Path { path, alias });
        }
        Ok(Self {
            name: name.to_string(),
            root,
            fields,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &'static EntitySchema {
        self.root
    }

    pub fn fields(&self) -> &[ProjectionField] {
        &self.fields
    }

    /// Whether column selection alone can produce every output field.
    pub fn is_optimized(&self) -> bool {
        self.unoptimized_reason().is_none()
    }

    fn unoptimized_reason(&self) -> Option<&'static str> {
        self.fields.iter().find_map(|field| match field {
            ProjectionField::Path { .. } => None,
            ProjectionField::Nested { .. } => Some("nested projection over a relation"),
            ProjectionField::Computed { .. } => Some("computed field needs the whole entity"),
        })
    }

    /// Relations the projection reads, with their target schemas.
    pub(crate) fn fetched_relations(&self) -> Vec<(&'static Relation, &'static EntitySchema)> {
        let mut relations: Vec<(&'static Relation, &'static EntitySchema)> = Vec::new();
        for field in &self.fields {
            let relation = match field {
                ProjectionField::Path { path, .. } => path.relation,
                ProjectionField::Nested {
                    relation, target, ..
                } => Some((*relation, *target)),
                ProjectionField::Computed { .. } => None,
            };
            if let Some((relation, target)) = relation {
                if !relations.iter().any(|(known, _)| known.name == relation.name) {
                    relations.push((relation, target));
                }
            }
        }
        relations
    }

    /// Column paths of an optimized projection, in output order.
    pub(crate) fn column_paths(&self) -> Vec<(ResolvedPath, String)> {
        self.fields
            .iter()
            .filter_map(|field| match field {
                ProjectionField::Path { path, alias } => Some((*path, alias.clone())),
                _ => None,
            })
            .collect()
    }

    /// Maps a fully fetched record (with its relations) into the shape.
    pub fn apply(&self, record: &Record) -> ProjectedRow {
        let mut row = ProjectedRow::default();
        for field in &self.fields {
            match field {
                ProjectionField::Path { path, alias } => {
                    let value = path.read(record).map_or(Value::Null, |value| value.to_value());
                    row.values.push((alias.clone(), value));
                }
                ProjectionField::Nested {
                    relation, fields, ..
                } => {
                    let nested = record.related(relation.name).map(|related| {
                        let mut nested = ProjectedRow::default();
                        for field in fields {
                            let value = if field.name == crate::model::schema::ID_FIELD {
                                related.id.clone().map_or(Value::Null, Value::from)
                            } else {
                                related.get(field.name).clone()
                            };
                            nested.values.push((field.name.to_string(), value));
                        }
                        nested
                    });
                    row.nested.push((relation.name.to_string(), nested));
                }
                ProjectionField::Computed { alias, compute } => {
                    row.values.push((alias.clone(), compute(record)));
                }
            }
        }
        row
    }
}

enum Entry {
    Field { path: String, alias: Option<String> },
    Nested { relation: String, fields: Vec<String> },
    Computed { alias: String, compute: ComputedFn },
}

pub struct ProjectionBuilder {
    name: String,
    entries: Vec<Entry>,
}

impl ProjectionBuilder {
    /// Adds `field` or `relation.field`; related fields are emitted as
    /// `relation_field`.
    pub fn field(mut self, path: &str) -> Self {
        self.entries.push(Entry::Field {
            path: path.to_string(),
            alias: None,
        });
        self
    }

    pub fn field_as(mut self, path: &str, alias: &str) -> Self {
        self.entries.push(Entry::Field {
            path: path.to_string(),
            alias: Some(alias.to_string()),
        });
        self
    }

    pub fn nested<'a>(mut self, relation: &str, fields: impl IntoIterator<Item = &'a str>) -> Self {
        self.entries.push(Entry::Nested {
            relation: relation.to_string(),
            fields: fields.into_iter().map(str::to_string).collect(),
        });
        self
    }

    pub fn computed(
        mut self,
        alias: &str,
        compute: impl Fn(&Record) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.entries.push(Entry::Computed {
            alias: alias.to_string(),
            compute: Arc::new(compute),
        });
        self
    }

    /// Validates every declared field against `entity`.
    ///
    /// # Side effects
    /// - Emits one `projection_unoptimized` warning when the shape needs a
    ///   full fetch.
    pub fn build(self, registry: &SchemaRegistry, entity: &str) -> RepoResult<Projection> {
        let root = registry.get(entity)?;
        if self.entries.is_empty() {
            return Err(RepoError::schema(
                root.name,
                format!("projection `{}` declares no fields", self.name),
            ));
        }
        let mut fields = Vec::with_capacity(self.entries.len());
        let mut aliases: Vec<String> = Vec::new();
        for entry in self.entries {
            let field = match entry {
                Entry::Field { path, alias } => {
                    let path = registry.resolve(root, &FieldPath::parse(root.name, &path)?)?;
                    let alias = alias.unwrap_or_else(|| path.path().alias());
                    ProjectionField::Path { path, alias }
                }
                Entry::Nested { relation, fields } => {
                    let (relation, target) = registry.relation_target(root, &relation)?;
                    let fields = fields
                        .iter()
                        .map(|field| target.require_field(field))
                        .collect::<RepoResult<Vec<_>>>()?;
                    ProjectionField::Nested {
                        relation,
                        target,
                        fields,
                    }
                }
                Entry::Computed { alias, compute } => ProjectionField::Computed { alias, compute },
            };
            let output = match &field {
                ProjectionField::Path { alias, .. } | ProjectionField::Computed { alias, .. } => {
                    alias.clone()
                }
                ProjectionField::Nested { relation, .. } => relation.name.to_string(),
            };
            if aliases.contains(&output) {
                return Err(RepoError::schema(
                    root.name,
                    format!("projection `{}` declares `{output}` twice", self.name),
                ));
            }
            aliases.push(output);
            fields.push(field);
        }

        let projection = Projection {
            name: self.name,
            root,
            fields,
        };
        if let Some(reason) = projection.unoptimized_reason() {
            warn!(
                "event=projection_unoptimized module=projection status=warn projection={} entity={} reason=\"{}\"",
                projection.name, root.name, reason
            );
        }
        Ok(projection)
    }
}

/// Output row of a projection or native query. Serializes as a map in
/// declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectedRow {
    values: Vec<(String, Value)>,
    nested: Vec<(String, Option<ProjectedRow>)>,
}

impl ProjectedRow {
    pub(crate) fn from_values(values: Vec<(String, Value)>) -> Self {
        Self {
            values,
            nested: Vec::new(),
        }
    }

    /// Returns the named value, `Null` when absent.
    pub fn get(&self, name: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.values
            .iter()
            .find(|(key, _)| key == name)
            .map_or(&NULL, |(_, value)| value)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).as_str()
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        self.get(name).as_i64()
    }

    pub fn nested(&self, relation: &str) -> Option<&ProjectedRow> {
        self.nested
            .iter()
            .find(|(key, _)| key == relation)
            .and_then(|(_, row)| row.as_ref())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values
            .iter()
            .map(|(name, _)| name.as_str())
            .chain(self.nested.iter().map(|(name, _)| name.as_str()))
    }
}

impl Serialize for ProjectedRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len() + self.nested.len()))?;
        for (name, value) in &self.values {
            map.serialize_entry(name, value)?;
        }
        for (name, row) in &self.nested {
            map.serialize_entry(name, row)?;
        }
        map.end()
    }
}

/// Typed view built from a projection row.
pub trait FromProjection: Sized {
    fn projection(registry: &SchemaRegistry) -> RepoResult<Projection>;

    fn from_row(row: &ProjectedRow) -> RepoResult<Self>;
}

#[cfg(test)]
mod tests {
    use super::Projection;
    use crate::model::default_registry;
    use crate::model::value::{Record, Value};

    #[test]
    fn closed_projection_is_optimized() {
        let registry = default_registry();
        let projection = Projection::builder("UsernameOnly")
            .field("username")
            .field("team.name")
            .build(&registry, "Member")
            .unwrap();
        assert!(projection.is_optimized());
        assert_eq!(projection.fetched_relations().len(), 1);
    }

    #[test]
    fn nested_and_computed_fall_back_to_full_fetch() {
        let registry = default_registry();
        let projection = Projection::builder("Summary")
            .field("username")
            .nested("team", ["name"])
            .computed("summary", |record| {
                Value::from(format!(
                    "{} {}",
                    record.text("username").unwrap_or_default(),
                    record.integer("age").unwrap_or_default()
                ))
            })
            .build(&registry, "Member")
            .unwrap();
        assert!(!projection.is_optimized());

        let mut record = Record::with_id(1).set("username", "m1").set("age", 10);
        record
            .related
            .insert("team".to_string(), Record::with_id(3).set("name", "teamA"));
        let row = projection.apply(&record);
        assert_eq!(row.text("username"), Some("m1"));
        assert_eq!(row.text("summary"), Some("m1 10"));
        assert_eq!(row.nested("team").and_then(|team| team.text("name")), Some("teamA"));
    }

    #[test]
    fn unknown_fields_fail_at_build() {
        let registry = default_registry();
        assert!(Projection::builder("Bad")
            .field("nickname")
            .build(&registry, "Member")
            .is_err());
        assert!(Projection::builder("Bad")
            .nested("team", ["owner"])
            .build(&registry, "Member")
            .is_err());
        assert!(Projection::builder("Bad")
            .field("username")
            .field("username")
            .build(&registry, "Member")
            .is_err());
    }
}
