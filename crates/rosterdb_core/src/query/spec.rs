//! Programmatic predicates: specifications and query by example.

use crate::error::{RepoError, RepoResult};
use crate::model::entity::Entity;
use crate::model::schema::{EntitySchema, FieldPath, FieldType, SchemaRegistry, ID_FIELD};
use crate::model::value::{Record, Value};
use crate::query::compiled::{CompiledQuery, QueryDefinition};
use crate::query::predicate::{Arg, ClauseDef, Comparator, Operand};

#[derive(Debug, Clone, PartialEq, Eq)]
struct SpecClause {
    path: String,
    op: Comparator,
    operand: Operand,
}

/// Conjunction of clauses built in code. `Spec::all()` matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Spec {
    clauses: Vec<SpecClause>,
}

impl Spec {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(path: &str, value: impl Into<Value>) -> Self {
        Self::compare(path, Comparator::Eq, value)
    }

    /// Single-argument comparison of `path` against `value`.
    pub fn compare(path: &str, op: Comparator, value: impl Into<Value>) -> Self {
        Self {
            clauses: vec![SpecClause {
                path: path.to_string(),
                op,
                operand: Operand::One(Arg::Literal(value.into())),
            }],
        }
    }

    pub fn between(path: &str, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        Self {
            clauses: vec![SpecClause {
                path: path.to_string(),
                op: Comparator::Between,
                operand: Operand::Two(Arg::Literal(low.into()), Arg::Literal(high.into())),
            }],
        }
    }

    pub fn is_null(path: &str) -> Self {
        Self {
            clauses: vec![SpecClause {
                path: path.to_string(),
                op: Comparator::IsNull,
                operand: Operand::None,
            }],
        }
    }

    pub fn and(mut self, other: Spec) -> Self {
        self.clauses.extend(other.clauses);
        self
    }

    pub fn is_all(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Validates every clause against `entity` and compiles an entity query.
    pub fn to_query(&self, registry: &SchemaRegistry, entity: &str) -> RepoResult<CompiledQuery> {
        let root = registry.get(entity)?;
        let mut clauses = Vec::with_capacity(self.clauses.len());
        for clause in &self.clauses {
            clauses.push(ClauseDef::new(
                FieldPath::parse(root.name, &clause.path)?,
                clause.op,
                clause.operand.clone(),
            ));
        }
        QueryDefinition::new(&format!("specification over {}", root.name), root.name)
            .clauses(clauses)
            .compile(registry)
    }
}

/// How text properties of a probe are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StringMatcher {
    #[default]
    Exact,
    StartingWith,
    EndingWith,
    Containing,
}

impl StringMatcher {
    fn comparator(self) -> Comparator {
        match self {
            Self::Exact => Comparator::Eq,
            Self::StartingWith => Comparator::StartingWith,
            Self::EndingWith => Comparator::EndingWith,
            Self::Containing => Comparator::Containing,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExampleMatcher {
    ignored: Vec<String>,
    string_matcher: StringMatcher,
}

impl ExampleMatcher {
    /// Every non-null probe property must match.
    pub fn matching() -> Self {
        Self::default()
    }

    /// Skips the given paths (`age`, `team.name`), typically properties
    /// that always carry a value on the probe.
    pub fn with_ignore_paths<'a>(mut self, paths: impl IntoIterator<Item = &'a str>) -> Self {
        self.ignored.extend(paths.into_iter().map(str::to_string));
        self
    }

    pub fn with_string_matcher(mut self, matcher: StringMatcher) -> Self {
        self.string_matcher = matcher;
        self
    }
}

/// Probe record plus matcher; non-null probe values become equality
/// clauses, relations become inner-joined clauses on the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Example {
    probe: Record,
    matcher: ExampleMatcher,
}

impl Example {
    pub fn of(probe: Record, matcher: ExampleMatcher) -> Self {
        Self { probe, matcher }
    }

    pub fn of_entity<E: Entity>(probe: &E, matcher: ExampleMatcher) -> Self {
        Self::of(probe.to_record(), matcher)
    }

    pub fn to_query(&self, registry: &SchemaRegistry, entity: &str) -> RepoResult<CompiledQuery> {
        let root = registry.get(entity)?;
        let mut ignored = Vec::with_capacity(self.matcher.ignored.len());
        for path in &self.matcher.ignored {
            let path = FieldPath::parse(root.name, path)?;
            registry.resolve(root, &path)?;
            ignored.push(path);
        }

        let mut clauses = Vec::new();
        self.probe_clauses(root, None, &self.probe, &ignored, &mut clauses)?;
        for (relation, related) in &self.probe.related {
            let (relation, target) = registry.relation_target(root, relation)?;
            self.probe_clauses(target, Some(relation.name), related, &ignored, &mut clauses)?;
        }

        QueryDefinition::new(&format!("example over {}", root.name), root.name)
            .clauses(clauses)
            .compile(registry)
    }

    fn probe_clauses(
        &self,
        schema: &'static EntitySchema,
        relation: Option<&str>,
        probe: &Record,
        ignored: &[FieldPath],
        clauses: &mut Vec<ClauseDef>,
    ) -> RepoResult<()> {
        let path_of = |field: &str| match relation {
            Some(relation) => FieldPath::related(relation, field),
            None => FieldPath::root(field),
        };
        if let Some(id) = &probe.id {
            let path = path_of(ID_FIELD);
            if !ignored.contains(&path) {
                clauses.push(ClauseDef::new(
                    path,
                    Comparator::Eq,
                    Operand::One(Arg::Literal(Value::from(id.clone()))),
                ));
            }
        }
        for (name, value) in &probe.fields {
            let field = schema.field(name).ok_or_else(|| {
                RepoError::schema(schema.name, format!("probe has unknown field `{name}`"))
            })?;
            let path = path_of(field.name);
            if value.is_null() || ignored.contains(&path) {
                continue;
            }
            let op = if field.ty == FieldType::Text {
                self.matcher.string_matcher.comparator()
            } else {
                Comparator::Eq
            };
            clauses.push(ClauseDef::new(path, op, Operand::One(Arg::Literal(value.clone()))));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Example, ExampleMatcher, Spec};
    use crate::model::default_registry;
    use crate::model::member::Member;
    use crate::model::team::Team;

    #[test]
    fn spec_validates_paths() {
        let registry = default_registry();
        let spec = Spec::eq("username", "m1").and(Spec::eq("team.name", "teamA"));
        let query = spec.to_query(&registry, "Member").unwrap();
        assert_eq!(query.predicate().clauses().len(), 2);
        assert!(Spec::eq("nickname", "x").to_query(&registry, "Member").is_err());
        assert!(Spec::all().to_query(&registry, "Member").unwrap().predicate().is_empty());
    }

    #[test]
    fn example_skips_nulls_and_ignored_paths() {
        let registry = default_registry();
        let probe = Member::with_team("m1", 0, &Team::new("teamA"));
        let example = Example::of_entity(&probe, ExampleMatcher::matching().with_ignore_paths(["age"]));
        let query = example.to_query(&registry, "Member").unwrap();
        let paths = query
            .predicate()
            .clauses()
            .iter()
            .map(|clause| clause.path.path().to_string())
            .collect::<Vec<_>>();
        assert_eq!(paths, vec!["username", "team.name"]);

        let bad = ExampleMatcher::matching().with_ignore_paths(["nickname"]);
        assert!(Example::of_entity(&probe, bad).to_query(&registry, "Member").is_err());
    }
}
