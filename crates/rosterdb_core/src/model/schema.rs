//! Entity schema definitions and registry.
//!
//! # Responsibility
//! - Describe each entity kind: table, identity strategy, typed fields and
//!   one-level relationships.
//! - Resolve field paths (`username`, `team.name`) against those schemas so
//!   queries, projections and patches fail at build time on unknown names.
//!
//! # Invariants
//! - `fields[0]` is always the identity field named `id`.
//! - Relation foreign keys are integer fields of the owning schema.
//! - Registered tables and columns are verified once against the database.

use crate::error::{RepoError, RepoResult};
use crate::model::value::{Record, RecordId, Value};
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Name of the identity field on every schema.
pub const ID_FIELD: &str = "id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Integer,
    Text,
    /// Epoch milliseconds stored as an integer.
    Timestamp,
}

impl FieldType {
    /// Returns whether a non-null value can be stored in this field.
    pub fn accepts(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (Self::Integer | Self::Timestamp, Value::Integer(_)) | (Self::Text, Value::Text(_))
        )
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Timestamp)
    }
}

impl Display for FieldType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer => write!(f, "integer"),
            Self::Text => write!(f, "text"),
            Self::Timestamp => write!(f, "timestamp"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: &'static str,
    pub column: &'static str,
    pub ty: FieldType,
    pub nullable: bool,
    pub updatable: bool,
}

impl FieldDef {
    pub fn integer(name: &'static str) -> Self {
        Self::new(name, FieldType::Integer)
    }

    pub fn text(name: &'static str) -> Self {
        Self::new(name, FieldType::Text)
    }

    pub fn timestamp(name: &'static str) -> Self {
        Self::new(name, FieldType::Timestamp)
    }

    fn new(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            column: name,
            ty,
            nullable: false,
            updatable: true,
        }
    }

    pub fn column(mut self, column: &'static str) -> Self {
        self.column = column;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn immutable(mut self) -> Self {
        self.updatable = false;
        self
    }

    /// Checks that `value` may be written to this field.
    pub fn check_value(&self, value: &Value) -> Result<(), String> {
        if value.is_null() {
            if self.nullable {
                return Ok(());
            }
            return Err(format!("field `{}` is not nullable", self.name));
        }
        if self.ty.accepts(value) {
            Ok(())
        } else {
            Err(format!(
                "field `{}` is {} but value is {}",
                self.name,
                self.ty,
                value.kind()
            ))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdStrategy {
    /// Store assigns monotonically increasing integers.
    Generated,
    /// Caller supplies a text identifier at insert.
    Assigned,
}

/// Many-to-one reference from the owning schema to `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub name: &'static str,
    pub foreign_key: &'static str,
    pub target: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySchema {
    pub name: &'static str,
    pub table: &'static str,
    pub id_strategy: IdStrategy,
    fields: Vec<FieldDef>,
    relations: Vec<Relation>,
}

impl EntitySchema {
    pub fn builder(name: &'static str, table: &'static str) -> EntitySchemaBuilder {
        EntitySchemaBuilder {
            name,
            table,
            id: FieldDef::integer(ID_FIELD).immutable(),
            id_strategy: IdStrategy::Generated,
            fields: Vec::new(),
            relations: Vec::new(),
        }
    }

    pub fn id_field(&self) -> &FieldDef {
        &self.fields[0]
    }

    /// All fields including the identity field.
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Fields stored in `Record::fields` (everything except the identity).
    pub fn data_fields(&self) -> &[FieldDef] {
        &self.fields[1..]
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|relation| relation.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub(crate) fn require_field(&self, name: &str) -> RepoResult<&FieldDef> {
        self.field(name)
            .ok_or_else(|| RepoError::schema(self.name, format!("unknown field `{name}`")))
    }

    pub(crate) fn require_relation(&self, name: &str) -> RepoResult<&Relation> {
        self.relation(name)
            .ok_or_else(|| RepoError::schema(self.name, format!("unknown relation `{name}`")))
    }
}

pub struct EntitySchemaBuilder {
    name: &'static str,
    table: &'static str,
    id: FieldDef,
    id_strategy: IdStrategy,
    fields: Vec<FieldDef>,
    relations: Vec<Relation>,
}

impl EntitySchemaBuilder {
    pub fn generated_id(mut self, column: &'static str) -> Self {
        self.id = FieldDef::integer(ID_FIELD).column(column).immutable();
        self.id_strategy = IdStrategy::Generated;
        self
    }

    pub fn assigned_id(mut self, column: &'static str) -> Self {
        self.id = FieldDef::text(ID_FIELD).column(column).immutable();
        self.id_strategy = IdStrategy::Assigned;
        self
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Adds the bookkeeping columns stamped by the auditing hook.
    pub fn audited(self) -> Self {
        self.field(FieldDef::timestamp("created_at").nullable().immutable())
            .field(FieldDef::timestamp("updated_at").nullable())
            .field(FieldDef::text("created_by").nullable().immutable())
            .field(FieldDef::text("last_modified_by").nullable())
    }

    pub fn relation(
        mut self,
        name: &'static str,
        foreign_key: &'static str,
        target: &'static str,
    ) -> Self {
        self.relations.push(Relation {
            name,
            foreign_key,
            target,
        });
        self
    }

    pub fn build(self) -> EntitySchema {
        let mut fields = Vec::with_capacity(self.fields.len() + 1);
        fields.push(self.id);
        fields.extend(self.fields);
        EntitySchema {
            name: self.name,
            table: self.table,
            id_strategy: self.id_strategy,
            fields,
            relations: self.relations,
        }
    }
}

/// Field path relative to a root schema: either a root field or one
/// relation hop followed by a field of the related schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath {
    pub relation: Option<String>,
    pub field: String,
}

impl FieldPath {
    pub fn root(field: impl Into<String>) -> Self {
        Self {
            relation: None,
            field: field.into(),
        }
    }

    pub fn related(relation: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            relation: Some(relation.into()),
            field: field.into(),
        }
    }

    /// Parses `field` or `relation.field`.
    pub fn parse(entity: &str, text: &str) -> RepoResult<Self> {
        let segments = text.trim().split('.').collect::<Vec<_>>();
        match segments.as_slice() {
            [field] if !field.is_empty() => Ok(Self::root(*field)),
            [relation, field] if !relation.is_empty() && !field.is_empty() => {
                Ok(Self::related(*relation, *field))
            }
            _ => Err(RepoError::schema(
                entity,
                format!("`{text}` is not a field path; expected `field` or `relation.field`"),
            )),
        }
    }

    /// Output name used by projections: `team.name` -> `team_name`.
    pub fn alias(&self) -> String {
        match &self.relation {
            Some(relation) => format!("{relation}_{}", self.field),
            None => self.field.clone(),
        }
    }
}

impl Display for FieldPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.relation {
            Some(relation) => write!(f, "{relation}.{}", self.field),
            None => write!(f, "{}", self.field),
        }
    }
}

/// A field path bound to concrete schema definitions.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedPath {
    pub root: &'static EntitySchema,
    pub relation: Option<(&'static Relation, &'static EntitySchema)>,
    pub field: &'static FieldDef,
}

impl ResolvedPath {
    pub fn path(&self) -> FieldPath {
        match self.relation {
            Some((relation, _)) => FieldPath::related(relation.name, self.field.name),
            None => FieldPath::root(self.field.name),
        }
    }

    pub fn is_id(&self) -> bool {
        self.field.name == ID_FIELD
    }

    /// Reads the addressed value out of a record (and its eager relations).
    pub fn read<'r>(&self, record: &'r Record) -> Option<ValueRef<'r>> {
        let target = match self.relation {
            Some((relation, _)) => record.related.get(relation.name)?,
            None => record,
        };
        if self.is_id() {
            return target.id.as_ref().map(ValueRef::Id);
        }
        Some(ValueRef::Field(target.get(self.field.name)))
    }
}

/// Borrowed view of a record value; identifiers are not stored as fields.
#[derive(Debug, Clone, Copy)]
pub enum ValueRef<'r> {
    Id(&'r RecordId),
    Field(&'r Value),
}

impl ValueRef<'_> {
    pub fn to_value(self) -> Value {
        match self {
            Self::Id(id) => Value::from(id.clone()),
            Self::Field(value) => value.clone(),
        }
    }
}

/// Entity-name keyed lookup of every schema the store manages.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    entities: BTreeMap<&'static str, &'static EntitySchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, schema: &'static EntitySchema) -> Self {
        self.entities.insert(schema.name, schema);
        self
    }

    pub fn get(&self, entity: &str) -> RepoResult<&'static EntitySchema> {
        self.entities
            .get(entity)
            .copied()
            .ok_or_else(|| RepoError::schema(entity, "entity is not registered"))
    }

    pub fn schemas(&self) -> impl Iterator<Item = &'static EntitySchema> + '_ {
        self.entities.values().copied()
    }

    pub fn contains(&self, schema: &EntitySchema) -> bool {
        self.entities.contains_key(schema.name)
    }

    /// Resolves a field path against `root`.
    pub fn resolve(
        &self,
        root: &'static EntitySchema,
        path: &FieldPath,
    ) -> RepoResult<ResolvedPath> {
        match &path.relation {
            None => Ok(ResolvedPath {
                root,
                relation: None,
                field: root.require_field(&path.field)?,
            }),
            Some(relation_name) => {
                let (relation, target) = self.relation_target(root, relation_name)?;
                let field = target.require_field(&path.field).map_err(|_| {
                    RepoError::schema(
                        root.name,
                        format!("unknown field `{}` on relation `{relation_name}`", path.field),
                    )
                })?;
                Ok(ResolvedPath {
                    root,
                    relation: Some((relation, target)),
                    field,
                })
            }
        }
    }

    pub fn relation_target(
        &self,
        root: &'static EntitySchema,
        relation: &str,
    ) -> RepoResult<(&'static Relation, &'static EntitySchema)> {
        let relation = root.require_relation(relation)?;
        let target = self.get(relation.target)?;
        Ok((relation, target))
    }

    /// Checks relation targets and foreign keys of every registered schema.
    pub fn validate(&self) -> RepoResult<()> {
        for schema in self.schemas() {
            for relation in schema.relations() {
                self.get(relation.target).map_err(|_| {
                    RepoError::schema(
                        schema.name,
                        format!(
                            "relation `{}` targets unregistered entity `{}`",
                            relation.name, relation.target
                        ),
                    )
                })?;
                let foreign_key = schema.require_field(relation.foreign_key)?;
                if foreign_key.ty != FieldType::Integer {
                    return Err(RepoError::schema(
                        schema.name,
                        format!("foreign key `{}` must be an integer field", relation.foreign_key),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Verifies that every registered table and column exists on `conn`.
    pub fn verify_tables(&self, conn: &Connection) -> RepoResult<()> {
        for schema in self.schemas() {
            if !table_exists(conn, schema.table)? {
                return Err(RepoError::MissingRequiredTable(schema.table.to_string()));
            }
            let columns = table_columns(conn, schema.table)?;
            for field in schema.fields() {
                if !columns.iter().any(|column| column == field.column) {
                    return Err(RepoError::MissingRequiredColumn {
                        table: schema.table.to_string(),
                        column: field.column.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

fn table_exists(conn: &Connection, table: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_columns(conn: &Connection, table: &str) -> RepoResult<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    let mut columns = Vec::new();
    while let Some(row) = rows.next()? {
        columns.push(row.get::<_, String>(1)?);
    }
    Ok(columns)
}
