//! Query definitions and their validated, compiled form.
//!
//! # Responsibility
//! - Hold the front-end independent shape of a read query
//!   (`QueryDefinition`): selection, joins, clauses, order, hints.
//! - Compile it against the schema registry into a `CompiledQuery`, adding
//!   the joins implied by relation paths.
//!
//! # Invariants
//! - Compilation never touches the store; every unknown entity, relation
//!   or field fails here with `SchemaMismatch`.
//! - Relation paths in predicates join with inner semantics unless the
//!   definition already declares the join; order and projection paths use
//!   left joins.

use crate::error::{RepoError, RepoResult};
use crate::logging::one_line;
use crate::model::schema::{EntitySchema, FieldPath, Relation, ResolvedPath, SchemaRegistry};
use crate::page::{Direction, Sort};
use crate::projection::Projection;
use crate::query::descriptor::QueryDescriptor;
use crate::query::literal::LiteralQuery;
use crate::query::predicate::{ClauseDef, ParamKey, Predicate};
use log::{debug, warn};

const MAX_LOGGED_QUERY_CHARS: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockMode {
    #[default]
    None,
    /// Matched rows stay locked for the session until it completes.
    PessimisticWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinDef {
    pub relation: String,
    pub kind: JoinKind,
    /// Populate `Record::related` from the joined row.
    pub fetch: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionDef {
    Entity,
    /// Column list; `constructor` names the DTO of a `select new` clause.
    Paths {
        paths: Vec<FieldPath>,
        constructor: Option<String>,
    },
    /// `count(*)` or `count(path)` (non-null values of `path`).
    Count(Option<FieldPath>),
    Exists,
}

/// Unresolved read query produced by any front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryDefinition {
    pub name: String,
    pub entity: String,
    pub selection: SelectionDef,
    pub joins: Vec<JoinDef>,
    pub clauses: Vec<ClauseDef>,
    pub order: Vec<(FieldPath, Direction)>,
    pub limit: Option<usize>,
    pub lock: LockMode,
    pub read_only: bool,
}

impl QueryDefinition {
    /// `select root from entity`, no filter.
    pub fn new(name: &str, entity: &str) -> Self {
        Self {
            name: name.to_string(),
            entity: entity.to_string(),
            selection: SelectionDef::Entity,
            joins: Vec::new(),
            clauses: Vec::new(),
            order: Vec::new(),
            limit: None,
            lock: LockMode::None,
            read_only: false,
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn select(mut self, selection: SelectionDef) -> Self {
        self.selection = selection;
        self
    }

    pub fn join(mut self, relation: &str, kind: JoinKind) -> Self {
        self.joins.push(JoinDef {
            relation: relation.to_string(),
            kind,
            fetch: false,
        });
        self
    }

    /// Eagerly loads `relation` with a left join (entity graph).
    pub fn fetch(mut self, relation: &str) -> Self {
        match self.joins.iter_mut().find(|join| join.relation == relation) {
            Some(join) => join.fetch = true,
            None => self.joins.push(JoinDef {
                relation: relation.to_string(),
                kind: JoinKind::Left,
                fetch: true,
            }),
        }
        self
    }

    pub fn clause(mut self, clause: ClauseDef) -> Self {
        self.clauses.push(clause);
        self
    }

    pub fn clauses(mut self, clauses: impl IntoIterator<Item = ClauseDef>) -> Self {
        self.clauses.extend(clauses);
        self
    }

    pub fn order_by(mut self, path: FieldPath, direction: Direction) -> Self {
        self.order.push((path, direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn lock(mut self, mode: LockMode) -> Self {
        self.lock = mode;
        self
    }

    /// Results are not kept in the session's identity map.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Resolves every name against `registry`.
    ///
    /// # Side effects
    /// - Emits a `query_compile` event.
    pub fn compile(&self, registry: &SchemaRegistry) -> RepoResult<CompiledQuery> {
        let result = self.compile_inner(registry);
        let logged_name = one_line(&self.name, MAX_LOGGED_QUERY_CHARS);
        match &result {
            Ok(query) => debug!(
                "event=query_compile module=query status=ok query=\"{}\" entity={} joins={} clauses={}",
                logged_name,
                self.entity,
                query.joins.len(),
                query.predicate.clauses().len()
            ),
            Err(err) => warn!(
                "event=query_compile module=query status=error query=\"{}\" entity={} error={}",
                logged_name, self.entity, err
            ),
        }
        result
    }

    fn compile_inner(&self, registry: &SchemaRegistry) -> RepoResult<CompiledQuery> {
        let root = registry.get(&self.entity)?;
        let mut joins: Vec<Join> = Vec::with_capacity(self.joins.len());
        for def in &self.joins {
            let (relation, target) = registry.relation_target(root, &def.relation)?;
            if joins.iter().any(|join| join.relation.name == relation.name) {
                return Err(RepoError::invalid_query(
                    &self.name,
                    format!("relation `{}` is joined twice", relation.name),
                ));
            }
            joins.push(Join {
                relation,
                target,
                kind: def.kind,
                fetch: def.fetch,
            });
        }

        let predicate = Predicate::resolve(registry, root, &self.clauses)?;
        for clause in predicate.clauses() {
            ensure_join(&mut joins, &clause.path, JoinKind::Inner);
        }

        let selection = match &self.selection {
            SelectionDef::Entity => Selection::Entity,
            SelectionDef::Paths { paths, constructor } => {
                let resolved = paths
                    .iter()
                    .map(|path| registry.resolve(root, path))
                    .collect::<RepoResult<Vec<_>>>()?;
                for path in &resolved {
                    ensure_join(&mut joins, path, JoinKind::Left);
                }
                let name = constructor.as_deref().unwrap_or(&self.name);
                Selection::Projection(Projection::from_paths(name, root, resolved)?)
            }
            SelectionDef::Count(path) => {
                let resolved = path
                    .as_ref()
                    .map(|path| registry.resolve(root, path))
                    .transpose()?;
                if let Some(path) = &resolved {
                    ensure_join(&mut joins, path, JoinKind::Left);
                }
                Selection::Count(resolved)
            }
            SelectionDef::Exists => Selection::Exists,
        };

        if !matches!(selection, Selection::Entity) {
            if joins.iter().any(|join| join.fetch) {
                return Err(RepoError::invalid_query(
                    &self.name,
                    "fetch joins require the root entity in the select list",
                ));
            }
            if self.lock != LockMode::None {
                return Err(RepoError::invalid_query(
                    &self.name,
                    "pessimistic locks require the root entity in the select list",
                ));
            }
        }

        let mut order = Vec::with_capacity(self.order.len());
        for (path, direction) in &self.order {
            let path = registry.resolve(root, path)?;
            ensure_join(&mut joins, &path, JoinKind::Left);
            order.push(OrderTerm {
                path,
                direction: *direction,
            });
        }

        if self.limit == Some(0) {
            return Err(RepoError::invalid_query(&self.name, "result limit must be positive"));
        }

        Ok(CompiledQuery {
            name: self.name.clone(),
            root,
            joins,
            selection,
            predicate,
            order,
            limit: self.limit,
            lock: self.lock,
            read_only: self.read_only,
            count: None,
        })
    }
}

fn ensure_join(joins: &mut Vec<Join>, path: &ResolvedPath, kind: JoinKind) {
    let Some((relation, target)) = path.relation else {
        return;
    };
    if joins.iter().any(|join| join.relation.name == relation.name) {
        return;
    }
    joins.push(Join {
        relation,
        target,
        kind,
        fetch: false,
    });
}

#[derive(Debug, Clone, Copy)]
pub struct Join {
    pub relation: &'static Relation,
    pub target: &'static EntitySchema,
    pub kind: JoinKind,
    pub fetch: bool,
}

#[derive(Debug, Clone)]
pub enum Selection {
    Entity,
    Projection(Projection),
    Count(Option<ResolvedPath>),
    Exists,
}

#[derive(Debug, Clone, Copy)]
pub struct OrderTerm {
    pub path: ResolvedPath,
    pub direction: Direction,
}

/// Validated query, ready to bind and run.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    name: String,
    root: &'static EntitySchema,
    joins: Vec<Join>,
    selection: Selection,
    predicate: Predicate,
    order: Vec<OrderTerm>,
    limit: Option<usize>,
    lock: LockMode,
    read_only: bool,
    count: Option<Box<CompiledQuery>>,
}

impl CompiledQuery {
    /// Compiles a derived method-name descriptor.
    pub fn derived(registry: &SchemaRegistry, entity: &str, method: &str) -> RepoResult<Self> {
        QueryDescriptor::parse(registry, entity, method)?.compile(registry)
    }

    /// Compiles a literal `select` query.
    pub fn literal(registry: &SchemaRegistry, text: &str) -> RepoResult<Self> {
        LiteralQuery::parse_select(text)?.compile(registry)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &'static EntitySchema {
        self.root
    }

    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    pub fn order(&self) -> &[OrderTerm] {
        &self.order
    }

    pub fn result_limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn lock_mode(&self) -> LockMode {
        self.lock
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn count_query(&self) -> Option<&CompiledQuery> {
        self.count.as_deref()
    }

    /// Parameters the caller must bind, in clause order.
    pub fn parameters(&self) -> Vec<ParamKey> {
        self.predicate.parameters()
    }

    /// Attaches a separate count query used by paged execution.
    pub fn with_count_query(mut self, count: CompiledQuery) -> RepoResult<Self> {
        if count.root.name != self.root.name {
            return Err(RepoError::schema(
                self.root.name,
                format!(
                    "count query `{}` counts `{}`, not `{}`",
                    count.name, count.root.name, self.root.name
                ),
            ));
        }
        if !matches!(count.selection, Selection::Count(_)) {
            return Err(RepoError::invalid_query(
                &count.name,
                "count query must select count(...)",
            ));
        }
        self.count = Some(Box::new(count));
        Ok(self)
    }

    /// Re-targets an entity query at `projection`, keeping its filter,
    /// order and hints.
    pub fn with_projection(&self, projection: &Projection) -> RepoResult<Self> {
        if projection.root().name != self.root.name {
            return Err(RepoError::schema(
                self.root.name,
                format!(
                    "projection `{}` is declared over `{}`",
                    projection.name(),
                    projection.root().name
                ),
            ));
        }
        if !matches!(self.selection, Selection::Entity) || self.lock != LockMode::None {
            return Err(RepoError::invalid_query(
                &self.name,
                "only unlocked entity queries can be projected",
            ));
        }
        let mut query = self.clone();
        for join in &mut query.joins {
            join.fetch = false;
        }
        let optimized = projection.is_optimized();
        for (relation, target) in projection.fetched_relations() {
            match query
                .joins
                .iter_mut()
                .find(|join| join.relation.name == relation.name)
            {
                Some(join) => join.fetch = !optimized,
                None => query.joins.push(Join {
                    relation,
                    target,
                    kind: JoinKind::Left,
                    fetch: !optimized,
                }),
            }
        }
        query.selection = Selection::Projection(projection.clone());
        Ok(query)
    }

    /// Appends caller sort keys (page requests, sorted finds); relation
    /// paths add left joins.
    pub fn sorted(&self, registry: &SchemaRegistry, sort: &Sort) -> RepoResult<Self> {
        let mut query = self.clone();
        for order in sort.orders() {
            let path = registry.resolve(
                self.root,
                &FieldPath::parse(self.root.name, &order.property)?,
            )?;
            ensure_join(&mut query.joins, &path, JoinKind::Left);
            query.order.push(OrderTerm {
                path,
                direction: order.direction,
            });
        }
        Ok(query)
    }

    /// Same filter and joins, counting rows.
    pub(crate) fn as_count(&self) -> Self {
        let mut query = self.clone();
        for join in &mut query.joins {
            join.fetch = false;
        }
        query.selection = Selection::Count(None);
        query.order.clear();
        query.lock = LockMode::None;
        query.count = None;
        query
    }
}

#[cfg(test)]
mod tests {
    use super::{CompiledQuery, JoinKind, LockMode, QueryDefinition, Selection, SelectionDef};
    use crate::model::default_registry;
    use crate::model::schema::FieldPath;
    use crate::page::{Direction, Sort};
    use crate::projection::Projection;
    use crate::query::predicate::{Arg, ClauseDef, Comparator, Operand};

    #[test]
    fn relation_clause_adds_inner_join() {
        let registry = default_registry();
        let query = QueryDefinition::new("byTeam", "Member")
            .clause(ClauseDef::new(
                FieldPath::related("team", "name"),
                Comparator::Eq,
                Operand::One(Arg::named("team")),
            ))
            .compile(&registry)
            .unwrap();
        assert_eq!(query.joins().len(), 1);
        assert_eq!(query.joins()[0].kind, JoinKind::Inner);
    }

    #[test]
    fn fetch_join_with_scalar_selection_is_rejected() {
        let registry = default_registry();
        let result = QueryDefinition::new("bad", "Member")
            .fetch("team")
            .select(SelectionDef::Count(None))
            .compile(&registry);
        assert!(result.is_err());
        let result = QueryDefinition::new("bad", "Member")
            .lock(LockMode::PessimisticWrite)
            .select(SelectionDef::Exists)
            .compile(&registry);
        assert!(result.is_err());
    }

    #[test]
    fn unknown_names_fail_at_compile() {
        let registry = default_registry();
        assert!(QueryDefinition::new("q", "Ghost").compile(&registry).is_err());
        assert!(QueryDefinition::new("q", "Member")
            .order_by(FieldPath::root("nickname"), Direction::Asc)
            .compile(&registry)
            .is_err());
        assert!(QueryDefinition::new("q", "Member")
            .join("club", JoinKind::Left)
            .compile(&registry)
            .is_err());
    }

    #[test]
    fn projection_retargets_entity_query() {
        let registry = default_registry();
        let query = CompiledQuery::derived(&registry, "Member", "findByUsername").unwrap();
        let nested = Projection::builder("NestedClosedProjections")
            .field("username")
            .nested("team", ["name"])
            .build(&registry, "Member")
            .unwrap();
        let projected = query.with_projection(&nested).unwrap();
        assert!(matches!(projected.selection(), Selection::Projection(_)));
        assert!(projected.joins().iter().any(|join| join.fetch));
    }

    #[test]
    fn sort_on_unknown_property_fails() {
        let registry = default_registry();
        let query = CompiledQuery::derived(&registry, "Member", "findByAge").unwrap();
        assert!(query
            .sorted(&registry, &Sort::by(Direction::Desc, "nickname"))
            .is_err());
        let sorted = query
            .sorted(&registry, &Sort::by(Direction::Asc, "team.name"))
            .unwrap();
        assert_eq!(sorted.joins().len(), 1);
    }
}
