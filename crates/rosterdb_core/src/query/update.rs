//! Predicate-scoped bulk updates.
//!
//! # Responsibility
//! - Describe one pass of field deltas or assignments over every row
//!   matching a predicate.
//! - Reject mutations that cannot apply to the field type at build time and
//!   again when call-time arguments are bound.
//!
//! # Invariants
//! - Identity and non-updatable fields are never targeted.
//! - Bulk predicates only reference root fields.

use crate::error::{RepoError, RepoResult};
use crate::model::schema::{EntitySchema, FieldDef, FieldPath, SchemaRegistry};
use crate::model::value::Value;
use crate::query::literal::LiteralQuery;
use crate::query::predicate::{Arg, BoundPredicate, ClauseDef, Params, Predicate};
use rusqlite::types::Value as SqlValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Set,
    Add,
    Subtract,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentDef {
    pub path: FieldPath,
    pub kind: MutationKind,
    pub arg: Arg,
}

/// Unresolved bulk update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateDefinition {
    pub name: String,
    pub entity: String,
    pub assignments: Vec<AssignmentDef>,
    pub clauses: Vec<ClauseDef>,
}

impl UpdateDefinition {
    pub fn compile(&self, registry: &SchemaRegistry) -> RepoResult<BulkUpdate> {
        let root = registry.get(&self.entity)?;
        if self.assignments.is_empty() {
            return Err(RepoError::invalid_query(&self.name, "update sets no fields"));
        }

        let mut mutations: Vec<Mutation> = Vec::with_capacity(self.assignments.len());
        for assignment in &self.assignments {
            if assignment.path.relation.is_some() {
                return Err(RepoError::schema(
                    root.name,
                    format!("bulk update cannot write through relation path `{}`", assignment.path),
                ));
            }
            let field = root.require_field(&assignment.path.field)?;
            if field.name == crate::model::schema::ID_FIELD || !field.updatable {
                return Err(RepoError::schema(
                    root.name,
                    format!("field `{}` is not updatable", field.name),
                ));
            }
            if mutations.iter().any(|known| known.field.name == field.name) {
                return Err(RepoError::invalid_query(
                    &self.name,
                    format!("field `{}` is assigned twice", field.name),
                ));
            }
            let mutation = Mutation {
                field,
                kind: assignment.kind,
                arg: assignment.arg.clone(),
            };
            if mutation.kind != MutationKind::Set && !field.ty.is_numeric() {
                return Err(mutation_error(
                    root,
                    field,
                    format!("cannot add to a {} field", field.ty),
                ));
            }
            if let Arg::Literal(value) = &mutation.arg {
                mutation.check(value).map_err(|message| mutation_error(root, field, message))?;
            }
            mutations.push(mutation);
        }

        let predicate = Predicate::resolve(registry, root, &self.clauses)?;
        if let Some(clause) = predicate
            .clauses()
            .iter()
            .find(|clause| clause.path.relation.is_some())
        {
            return Err(RepoError::schema(
                root.name,
                format!(
                    "bulk update predicates cannot traverse relations (`{}`)",
                    clause.path.path()
                ),
            ));
        }

        Ok(BulkUpdate {
            name: self.name.clone(),
            root,
            mutations,
            predicate,
            clear_automatically: true,
        })
    }
}

fn mutation_error(root: &EntitySchema, field: &FieldDef, message: String) -> RepoError {
    RepoError::MutationType {
        entity: root.name.to_string(),
        field: field.name.to_string(),
        message,
    }
}

#[derive(Debug, Clone)]
pub struct Mutation {
    pub field: &'static FieldDef,
    pub kind: MutationKind,
    pub arg: Arg,
}

impl Mutation {
    fn check(&self, value: &Value) -> Result<(), String> {
        match self.kind {
            MutationKind::Set => self.field.check_value(value),
            MutationKind::Add | MutationKind::Subtract => match value {
                Value::Integer(_) => Ok(()),
                other => Err(format!("delta must be an integer, got {}", other.kind())),
            },
        }
    }

    fn sql(&self) -> String {
        let column = self.field.column;
        match self.kind {
            MutationKind::Set => format!("{column} = ?"),
            MutationKind::Add => format!("{column} = {column} + ?"),
            MutationKind::Subtract => format!("{column} = {column} - ?"),
        }
    }
}

/// Compiled bulk update.
#[derive(Debug, Clone)]
pub struct BulkUpdate {
    name: String,
    root: &'static EntitySchema,
    mutations: Vec<Mutation>,
    predicate: Predicate,
    clear_automatically: bool,
}

impl BulkUpdate {
    pub fn builder<'r>(registry: &'r SchemaRegistry, entity: &str) -> BulkUpdateBuilder<'r> {
        BulkUpdateBuilder {
            registry,
            definition: UpdateDefinition {
                name: format!("bulk update {entity}"),
                entity: entity.to_string(),
                assignments: Vec::new(),
                clauses: Vec::new(),
            },
            clear_automatically: true,
        }
    }

    /// Compiles `update Entity e set ... where ...`.
    pub fn literal(registry: &SchemaRegistry, text: &str) -> RepoResult<Self> {
        LiteralQuery::parse_update(text)?.compile(registry)
    }

    /// Whether the invoking session evicts cached copies of the entity
    /// right after the update. Defaults to `true`.
    pub fn clear_automatically(mut self, clear: bool) -> Self {
        self.clear_automatically = clear;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &'static EntitySchema {
        self.root
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    pub fn clears_automatically(&self) -> bool {
        self.clear_automatically
    }

    /// Resolves mutation arguments and the filter.
    ///
    /// # Errors
    /// - `UnboundParameter` for a missing binding.
    /// - `MutationType` when a bound argument does not fit its field.
    pub(crate) fn bind(&self, params: &Params) -> RepoResult<BoundUpdate> {
        let mut assignments = Vec::with_capacity(self.mutations.len());
        let mut binds = Vec::with_capacity(self.mutations.len());
        for mutation in &self.mutations {
            let value = mutation.arg.resolve(&self.name, params)?;
            mutation
                .check(&value)
                .map_err(|message| mutation_error(self.root, mutation.field, message))?;
            assignments.push(mutation.sql());
            binds.push(value.to_sql()?);
        }
        Ok(BoundUpdate {
            set_clause: assignments.join(", "),
            set_binds: binds,
            filter: self.predicate.bind(&self.name, params)?,
        })
    }
}

pub(crate) struct BoundUpdate {
    pub set_clause: String,
    pub set_binds: Vec<SqlValue>,
    pub filter: BoundPredicate,
}

pub struct BulkUpdateBuilder<'r> {
    registry: &'r SchemaRegistry,
    definition: UpdateDefinition,
    clear_automatically: bool,
}

impl BulkUpdateBuilder<'_> {
    pub fn named(mut self, name: &str) -> Self {
        self.definition.name = name.to_string();
        self
    }

    pub fn set(self, field: &str, arg: Arg) -> Self {
        self.assign(field, MutationKind::Set, arg)
    }

    pub fn add(self, field: &str, arg: Arg) -> Self {
        self.assign(field, MutationKind::Add, arg)
    }

    pub fn subtract(self, field: &str, arg: Arg) -> Self {
        self.assign(field, MutationKind::Subtract, arg)
    }

    fn assign(mut self, field: &str, kind: MutationKind, arg: Arg) -> Self {
        self.definition.assignments.push(AssignmentDef {
            path: FieldPath::root(field),
            kind,
            arg,
        });
        self
    }

    pub fn filter(mut self, clause: ClauseDef) -> Self {
        self.definition.clauses.push(clause);
        self
    }

    pub fn clear_automatically(mut self, clear: bool) -> Self {
        self.clear_automatically = clear;
        self
    }

    pub fn build(self) -> RepoResult<BulkUpdate> {
        Ok(self
            .definition
            .compile(self.registry)?
            .clear_automatically(self.clear_automatically))
    }
}

#[cfg(test)]
mod tests {
    use super::BulkUpdate;
    use crate::error::RepoError;
    use crate::model::default_registry;
    use crate::model::schema::FieldPath;
    use crate::query::predicate::{Arg, ClauseDef, Comparator, Operand, Params};

    #[test]
    fn literal_age_plus_compiles() {
        let registry = default_registry();
        let update = BulkUpdate::literal(
            &registry,
            "update Member m set m.age = m.age + 1 where m.age >= :age",
        )
        .unwrap();
        assert_eq!(update.mutations().len(), 1);
        assert!(update.clears_automatically());
        let bound = update.bind(&Params::new().bind("age", 20)).unwrap();
        assert_eq!(bound.set_clause, "age = age + ?");
    }

    #[test]
    fn delta_on_text_field_is_mutation_type() {
        let registry = default_registry();
        let err = BulkUpdate::builder(&registry, "Member")
            .add("username", Arg::literal(1))
            .build()
            .unwrap_err();
        assert!(matches!(err, RepoError::MutationType { .. }));

        let err = BulkUpdate::builder(&registry, "Member")
            .set("age", Arg::literal("ten"))
            .build()
            .unwrap_err();
        assert!(matches!(err, RepoError::MutationType { .. }));
    }

    #[test]
    fn bound_argument_is_type_checked() {
        let registry = default_registry();
        let update = BulkUpdate::builder(&registry, "Member")
            .add("age", Arg::named("delta"))
            .build()
            .unwrap();
        let err = update.bind(&Params::new().bind("delta", "x")).err().unwrap();
        assert!(matches!(err, RepoError::MutationType { .. }));
        let err = update.bind(&Params::new()).err().unwrap();
        assert!(matches!(err, RepoError::UnboundParameter { .. }));
    }

    #[test]
    fn identity_relation_and_immutable_targets_are_rejected() {
        let registry = default_registry();
        for field in ["id", "created_at", "nickname"] {
            let err = BulkUpdate::builder(&registry, "Member")
                .set(field, Arg::literal(1))
                .build()
                .unwrap_err();
            assert!(matches!(err, RepoError::SchemaMismatch { .. }), "{field}");
        }
        let err = BulkUpdate::builder(&registry, "Member")
            .add("age", Arg::literal(1))
            .filter(ClauseDef::new(
                FieldPath::related("team", "name"),
                Comparator::Eq,
                Operand::One(Arg::literal("teamA")),
            ))
            .build()
            .unwrap_err();
        assert!(matches!(err, RepoError::SchemaMismatch { .. }));
    }
}
