//! Predicates, parameters and in-memory evaluation.
//!
//! # Responsibility
//! - Represent a conjunction of `(path, comparator, operand)` clauses in
//!   unresolved (`ClauseDef`) and schema-resolved (`Predicate`) form.
//! - Bind named or positional parameters and type-check them against the
//!   compared field.
//! - Evaluate a bound predicate against a `Record` and render it to SQL.
//!
//! # Invariants
//! - A `Predicate` only holds paths that resolved against its root schema.
//! - Binding never touches the store; failures surface before any SQL runs.

use crate::error::{RepoError, RepoResult};
use crate::model::schema::{EntitySchema, FieldPath, FieldType, ResolvedPath, SchemaRegistry};
use crate::model::value::{Record, Value};
use regex::Regex;
use rusqlite::types::Value as SqlValue;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Between,
    In,
    NotIn,
    Like,
    NotLike,
    StartingWith,
    EndingWith,
    Containing,
    IsNull,
    IsNotNull,
}

impl Comparator {
    /// Number of arguments the comparator consumes.
    pub fn arity(self) -> usize {
        match self {
            Self::IsNull | Self::IsNotNull => 0,
            Self::Between => 2,
            _ => 1,
        }
    }

    fn is_pattern(self) -> bool {
        matches!(
            self,
            Self::Like | Self::NotLike | Self::StartingWith | Self::EndingWith | Self::Containing
        )
    }
}

impl Display for Comparator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Between => "between",
            Self::In => "in",
            Self::NotIn => "not in",
            Self::Like => "like",
            Self::NotLike => "not like",
            Self::StartingWith => "starting with",
            Self::EndingWith => "ending with",
            Self::Containing => "containing",
            Self::IsNull => "is null",
            Self::IsNotNull => "is not null",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParamKey {
    Named(String),
    /// 1-based position, in clause order for derived queries.
    Position(usize),
}

impl Display for ParamKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Named(name) => write!(f, ":{name}"),
            Self::Position(index) => write!(f, "?{index}"),
        }
    }
}

/// Clause argument: a parameter reference or an inline literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Param(ParamKey),
    Literal(Value),
}

impl Arg {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Param(ParamKey::Named(name.into()))
    }

    pub fn position(index: usize) -> Self {
        Self::Param(ParamKey::Position(index))
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    pub(crate) fn resolve(&self, query: &str, params: &Params) -> RepoResult<Value> {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Param(key) => params
                .get(key)
                .cloned()
                .ok_or_else(|| RepoError::UnboundParameter {
                    query: query.to_string(),
                    parameter: key.to_string(),
                }),
        }
    }

    fn label(&self) -> String {
        match self {
            Self::Param(key) => key.to_string(),
            Self::Literal(value) => value.to_string(),
        }
    }
}

/// Parameter bindings supplied at call time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    values: BTreeMap<ParamKey, Value>,
    next_position: usize,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `values` to positions 1..=n.
    pub fn positional<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        values.into_iter().fold(Self::new(), Params::push)
    }

    /// Binds the next positional argument.
    pub fn push(mut self, value: impl Into<Value>) -> Self {
        self.next_position += 1;
        self.values
            .insert(ParamKey::Position(self.next_position), value.into());
        self
    }

    /// Binds a named parameter (`:name` in literal and native queries).
    pub fn bind(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.values.insert(
            ParamKey::Named(name.trim_start_matches(':').to_string()),
            value.into(),
        );
        self
    }

    pub fn get(&self, key: &ParamKey) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn named(&self, name: &str) -> Option<&Value> {
        self.values.get(&ParamKey::Named(name.to_string()))
    }
}

/// Clause operands before binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    None,
    One(Arg),
    Two(Arg, Arg),
}

impl Operand {
    fn arity(&self) -> usize {
        match self {
            Self::None => 0,
            Self::One(_) => 1,
            Self::Two(_, _) => 2,
        }
    }
}

/// Clause as written by a descriptor, literal query or specification;
/// not yet checked against a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClauseDef {
    pub path: FieldPath,
    pub op: Comparator,
    pub operand: Operand,
}

impl ClauseDef {
    pub fn new(path: FieldPath, op: Comparator, operand: Operand) -> Self {
        Self { path, op, operand }
    }
}

/// Maps a PascalCase property token to a field path: `Username` ->
/// `username`, `TeamId` -> `team_id`, `TeamName` -> `team.name`.
pub(crate) fn property_path(
    registry: &SchemaRegistry,
    root: &'static EntitySchema,
    token: &str,
) -> RepoResult<FieldPath> {
    let snake = to_snake_case(token);
    if root.has_field(&snake) {
        return Ok(FieldPath::root(snake));
    }
    for relation in root.relations() {
        let Some(rest) = snake
            .strip_prefix(relation.name)
            .and_then(|rest| rest.strip_prefix('_'))
        else {
            continue;
        };
        let target = registry.get(relation.target)?;
        if target.has_field(rest) {
            return Ok(FieldPath::related(relation.name, rest));
        }
    }
    Err(RepoError::schema(
        root.name,
        format!("property `{token}` does not match any field (looked for `{snake}`)"),
    ))
}

pub(crate) fn to_snake_case(token: &str) -> String {
    let mut snake = String::with_capacity(token.len() + 4);
    for (index, ch) in token.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if index > 0 {
                snake.push('_');
            }
            snake.push(ch.to_ascii_lowercase());
        } else {
            snake.push(ch);
        }
    }
    snake
}

/// Clause bound to a schema path.
#[derive(Debug, Clone)]
pub struct Clause {
    pub path: ResolvedPath,
    pub op: Comparator,
    pub operand: Operand,
}

/// Conjunction of schema-checked clauses.
#[derive(Debug, Clone, Default)]
pub struct Predicate {
    clauses: Vec<Clause>,
}

impl Predicate {
    pub fn always() -> Self {
        Self::default()
    }

    /// Resolves clause definitions, failing on the first unknown path,
    /// arity mismatch or ill-typed literal.
    pub fn resolve(
        registry: &SchemaRegistry,
        root: &'static EntitySchema,
        clauses: &[ClauseDef],
    ) -> RepoResult<Self> {
        let mut resolved = Vec::with_capacity(clauses.len());
        for clause in clauses {
            let path = registry.resolve(root, &clause.path)?;
            if clause.operand.arity() != clause.op.arity() {
                return Err(RepoError::schema(
                    root.name,
                    format!(
                        "`{}` {} takes {} argument(s), got {}",
                        clause.path,
                        clause.op,
                        clause.op.arity(),
                        clause.operand.arity()
                    ),
                ));
            }
            for arg in operand_args(&clause.operand) {
                if let Arg::Literal(value) = arg {
                    check_argument(&path, clause.op, value).map_err(|message| {
                        RepoError::schema(root.name, format!("`{}`: {message}", clause.path))
                    })?;
                }
            }
            resolved.push(Clause {
                path,
                op: clause.op,
                operand: clause.operand.clone(),
            });
        }
        Ok(Self { clauses: resolved })
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn and(mut self, other: Predicate) -> Self {
        self.clauses.extend(other.clauses);
        self
    }

    /// Parameter keys referenced by the predicate, in clause order.
    pub fn parameters(&self) -> Vec<ParamKey> {
        self.clauses
            .iter()
            .flat_map(|clause| operand_args(&clause.operand))
            .filter_map(|arg| match arg {
                Arg::Param(key) => Some(key.clone()),
                Arg::Literal(_) => None,
            })
            .collect()
    }

    /// Binds parameters and type-checks every argument.
    pub fn bind(&self, query: &str, params: &Params) -> RepoResult<BoundPredicate> {
        let mut clauses = Vec::with_capacity(self.clauses.len());
        for clause in &self.clauses {
            let mut values = Vec::with_capacity(clause.op.arity());
            for arg in operand_args(&clause.operand) {
                let value = arg.resolve(query, params)?;
                check_argument(&clause.path, clause.op, &value).map_err(|message| {
                    RepoError::InvalidParameter {
                        parameter: arg.label(),
                        message,
                    }
                })?;
                values.push(value);
            }
            let pattern = match (clause.op, values.first()) {
                (Comparator::Like | Comparator::NotLike, Some(Value::Text(raw))) => {
                    Some(LikePattern::compile(raw).map_err(|message| {
                        RepoError::InvalidParameter {
                            parameter: operand_args(&clause.operand)
                                .first()
                                .map(|arg| arg.label())
                                .unwrap_or_default(),
                            message,
                        }
                    })?)
                }
                _ => None,
            };
            clauses.push(BoundClause {
                path: clause.path,
                op: clause.op,
                values,
                pattern,
            });
        }
        Ok(BoundPredicate { clauses })
    }
}

fn operand_args(operand: &Operand) -> Vec<&Arg> {
    match operand {
        Operand::None => Vec::new(),
        Operand::One(arg) => vec![arg],
        Operand::Two(low, high) => vec![low, high],
    }
}

fn check_argument(path: &ResolvedPath, op: Comparator, value: &Value) -> Result<(), String> {
    let ty = path.field.ty;
    match (op, value) {
        (Comparator::In | Comparator::NotIn, Value::List(items)) => {
            match items.iter().find(|item| !ty.accepts(item)) {
                Some(item) => Err(format!(
                    "`{}` is {ty} but list contains {}",
                    path.path(),
                    item.kind()
                )),
                None => Ok(()),
            }
        }
        (Comparator::In | Comparator::NotIn, other) => Err(format!(
            "`{}` {op} expects a list, got {}",
            path.path(),
            other.kind()
        )),
        (_, Value::List(_)) => Err(format!("`{}` {op} does not accept a list", path.path())),
        (op, _) if op.is_pattern() && ty != FieldType::Text => {
            Err(format!("`{}` {op} requires a text field", path.path()))
        }
        (Comparator::Eq | Comparator::Ne, Value::Null) => Ok(()),
        (_, Value::Null) => Err(format!("`{}` {op} does not accept null", path.path())),
        (_, value) if ty.accepts(value) => Ok(()),
        (_, value) => Err(format!(
            "`{}` is {ty} but argument is {}",
            path.path(),
            value.kind()
        )),
    }
}

#[derive(Debug, Clone)]
pub struct BoundClause {
    pub path: ResolvedPath,
    pub op: Comparator,
    pub values: Vec<Value>,
    pattern: Option<LikePattern>,
}

/// Predicate with every argument resolved to a value.
#[derive(Debug, Clone, Default)]
pub struct BoundPredicate {
    clauses: Vec<BoundClause>,
}

impl BoundPredicate {
    pub fn clauses(&self) -> &[BoundClause] {
        &self.clauses
    }

    /// Evaluates the predicate in memory with SQL null semantics: a null
    /// field never satisfies a comparison other than `is null` / `= null`.
    pub fn matches(&self, record: &Record) -> bool {
        self.clauses.iter().all(|clause| clause_matches(clause, record))
    }

    /// Renders `clause AND clause ...` for the given table aliases.
    pub(crate) fn to_sql(
        &self,
        alias_of: &dyn Fn(&ResolvedPath) -> String,
        binds: &mut Vec<SqlValue>,
    ) -> RepoResult<Option<String>> {
        if self.clauses.is_empty() {
            return Ok(None);
        }
        let mut parts = Vec::with_capacity(self.clauses.len());
        for clause in &self.clauses {
            let column = format!("{}.{}", alias_of(&clause.path), clause.path.field.column);
            parts.push(clause_sql(&column, clause, binds)?);
        }
        Ok(Some(parts.join(" AND ")))
    }
}

fn clause_sql(column: &str, clause: &BoundClause, binds: &mut Vec<SqlValue>) -> RepoResult<String> {
    let sql = match clause.op {
        Comparator::IsNull => format!("{column} IS NULL"),
        Comparator::IsNotNull => format!("{column} IS NOT NULL"),
        Comparator::Eq if clause.values[0].is_null() => format!("{column} IS NULL"),
        Comparator::Ne if clause.values[0].is_null() => format!("{column} IS NOT NULL"),
        Comparator::Between => {
            binds.push(clause.values[0].to_sql()?);
            binds.push(clause.values[1].to_sql()?);
            format!("{column} BETWEEN ? AND ?")
        }
        Comparator::In | Comparator::NotIn => {
            let items = match &clause.values[0] {
                Value::List(items) => items.as_slice(),
                other => std::slice::from_ref(other),
            };
            if items.is_empty() {
                return Ok(if clause.op == Comparator::In {
                    "1 = 0".to_string()
                } else {
                    "1 = 1".to_string()
                });
            }
            for item in items {
                binds.push(item.to_sql()?);
            }
            let placeholders = vec!["?"; items.len()].join(", ");
            let keyword = if clause.op == Comparator::In { "IN" } else { "NOT IN" };
            format!("{column} {keyword} ({placeholders})")
        }
        Comparator::StartingWith | Comparator::EndingWith | Comparator::Containing => {
            let raw = clause.values[0].as_str().unwrap_or_default();
            let escaped = escape_like(raw);
            let pattern = match clause.op {
                Comparator::StartingWith => format!("{escaped}%"),
                Comparator::EndingWith => format!("%{escaped}"),
                _ => format!("%{escaped}%"),
            };
            binds.push(SqlValue::Text(pattern));
            format!("{column} LIKE ? ESCAPE '\\'")
        }
        op => {
            binds.push(clause.values[0].to_sql()?);
            let symbol = match op {
                Comparator::Eq => "=",
                Comparator::Ne => "<>",
                Comparator::Gt => ">",
                Comparator::Ge => ">=",
                Comparator::Lt => "<",
                Comparator::Le => "<=",
                Comparator::Like => "LIKE",
                _ => "NOT LIKE",
            };
            format!("{column} {symbol} ?")
        }
    };
    Ok(sql)
}

fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn clause_matches(clause: &BoundClause, record: &Record) -> bool {
    let actual = clause
        .path
        .read(record)
        .map_or(Value::Null, |value| value.to_value());
    let arg = clause.values.first();
    match clause.op {
        Comparator::IsNull => actual.is_null(),
        Comparator::IsNotNull => !actual.is_null(),
        Comparator::Eq if arg.is_some_and(Value::is_null) => actual.is_null(),
        Comparator::Ne if arg.is_some_and(Value::is_null) => !actual.is_null(),
        Comparator::Eq => ordering(&actual, arg) == Some(Ordering::Equal),
        Comparator::Ne => matches!(ordering(&actual, arg), Some(o) if o != Ordering::Equal),
        Comparator::Gt => ordering(&actual, arg) == Some(Ordering::Greater),
        Comparator::Ge => matches!(ordering(&actual, arg), Some(Ordering::Greater | Ordering::Equal)),
        Comparator::Lt => ordering(&actual, arg) == Some(Ordering::Less),
        Comparator::Le => matches!(ordering(&actual, arg), Some(Ordering::Less | Ordering::Equal)),
        Comparator::Between => {
            matches!(ordering(&actual, arg), Some(Ordering::Greater | Ordering::Equal))
                && matches!(
                    ordering(&actual, clause.values.get(1)),
                    Some(Ordering::Less | Ordering::Equal)
                )
        }
        Comparator::In | Comparator::NotIn => {
            let items = match arg {
                Some(Value::List(items)) => items.as_slice(),
                _ => &[],
            };
            // Rendered as a constant, so null fields do not matter here.
            if items.is_empty() {
                return clause.op == Comparator::NotIn;
            }
            if actual.is_null() {
                return false;
            }
            let found = items
                .iter()
                .any(|item| actual.compare(item) == Some(Ordering::Equal));
            found == (clause.op == Comparator::In)
        }
        Comparator::Like | Comparator::NotLike => {
            let (Some(text), Some(pattern)) = (actual.as_str(), clause.pattern.as_ref()) else {
                return false;
            };
            pattern.is_match(text) == (clause.op == Comparator::Like)
        }
        Comparator::StartingWith | Comparator::EndingWith | Comparator::Containing => {
            let (Some(text), Some(needle)) = (actual.as_str(), arg.and_then(Value::as_str)) else {
                return false;
            };
            let text = text.to_ascii_lowercase();
            let needle = needle.to_ascii_lowercase();
            match clause.op {
                Comparator::StartingWith => text.starts_with(&needle),
                Comparator::EndingWith => text.ends_with(&needle),
                _ => text.contains(&needle),
            }
        }
    }
}

fn ordering(actual: &Value, arg: Option<&Value>) -> Option<Ordering> {
    arg.and_then(|arg| actual.compare(arg))
}

/// SQLite `LIKE` pattern: `%` any run, `_` exactly one character, case
/// folded for ASCII letters only. No escape character.
#[derive(Debug, Clone)]
pub struct LikePattern(Regex);

impl LikePattern {
    pub fn compile(pattern: &str) -> Result<Self, String> {
        let mut source = String::from("(?s)^");
        for ch in pattern.to_ascii_lowercase().chars() {
            match ch {
                '%' => source.push_str(".*"),
                '_' => source.push('.'),
                other => source.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
            }
        }
        source.push('$');
        Regex::new(&source)
            .map(Self)
            .map_err(|err| format!("like pattern `{pattern}` is invalid: {err}"))
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.0.is_match(&text.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::{
        to_snake_case, Arg, BoundPredicate, ClauseDef, Comparator, LikePattern, Operand, ParamKey,
        Params, Predicate,
    };
    use crate::error::RepoError;
    use crate::model::default_registry;
    use crate::model::member::MEMBER;
    use crate::model::schema::FieldPath;
    use crate::model::value::{Record, Value};

    fn bound(clauses: &[ClauseDef], params: &Params) -> BoundPredicate {
        Predicate::resolve(&default_registry(), &MEMBER, clauses)
            .unwrap()
            .bind("test", params)
            .unwrap()
    }

    fn one(field: &str, op: Comparator, value: impl Into<Value>) -> BoundPredicate {
        bound(
            &[ClauseDef::new(FieldPath::root(field), op, Operand::One(Arg::named("v")))],
            &Params::new().bind("v", value.into()),
        )
    }

    fn member(username: Option<&str>, age: i64) -> Record {
        let record = Record::with_id(1).set("age", age);
        match username {
            Some(name) => record.set("username", name),
            None => record,
        }
    }

    #[test]
    fn snake_case_splits_on_capitals() {
        assert_eq!(to_snake_case("Username"), "username");
        assert_eq!(to_snake_case("TeamId"), "team_id");
        assert_eq!(to_snake_case("CreatedAt"), "created_at");
    }

    #[test]
    fn like_pattern_follows_sqlite_rules() {
        let like = |pattern: &str, text: &str| LikePattern::compile(pattern).unwrap().is_match(text);
        assert!(like("mem%", "Member1"));
        assert!(!like("m_1", "m1x"));
        assert!(like("m_", "m1"));
        assert!(!like("abc", "abcd"));
        assert!(like("a%", "a\nb"));
        assert!(like("50%", "50% off"));
        // `_` is one character, not one byte.
        assert!(like("é_", "éa"));
        assert!(like("_a", "éa"));
        assert!(!like("__a", "éa"));
        // Only ASCII letters fold.
        assert!(like("ÉA", "Éa"));
        assert!(!like("é", "É"));
    }

    #[test]
    fn comparisons_never_match_null_fields() {
        let named = member(Some("member1"), 20);
        let nameless = member(None, 20);

        let eq = one("username", Comparator::Eq, "member1");
        assert!(eq.matches(&named));
        assert!(!eq.matches(&nameless));
        assert!(!one("username", Comparator::Ne, "other").matches(&nameless));

        for op in [Comparator::Like, Comparator::NotLike, Comparator::StartingWith] {
            assert!(!one("username", op, "mem%").matches(&nameless), "{op}");
        }
        assert!(one("username", Comparator::Like, "MEM%").matches(&named));
        assert!(!one("username", Comparator::NotLike, "mem%").matches(&named));
        assert!(one("username", Comparator::StartingWith, "MEM").matches(&named));
        assert!(!one("username", Comparator::StartingWith, "mem%").matches(&named));
        assert!(one("username", Comparator::EndingWith, "ber1").matches(&named));
        assert!(one("username", Comparator::Containing, "mbe").matches(&named));
    }

    #[test]
    fn null_arguments_test_for_null() {
        let nameless = member(None, 20);
        let named = member(Some("member1"), 20);
        let eq_null = one("username", Comparator::Eq, Value::Null);
        assert!(eq_null.matches(&nameless));
        assert!(!eq_null.matches(&named));

        let is_null = bound(
            &[ClauseDef::new(FieldPath::root("username"), Comparator::IsNull, Operand::None)],
            &Params::new(),
        );
        assert!(is_null.matches(&nameless));
        assert!(!is_null.matches(&named));
    }

    #[test]
    fn ranges_are_inclusive() {
        let between = bound(
            &[ClauseDef::new(
                FieldPath::root("age"),
                Comparator::Between,
                Operand::Two(Arg::literal(10), Arg::literal(20)),
            )],
            &Params::new(),
        );
        for (age, expected) in [(9, false), (10, true), (15, true), (20, true), (21, false)] {
            assert_eq!(between.matches(&member(None, age)), expected, "{age}");
        }

        let greater = one("age", Comparator::Gt, 15);
        assert!(greater.matches(&member(None, 16)));
        assert!(!greater.matches(&member(None, 15)));
        assert!(one("age", Comparator::Ge, 15).matches(&member(None, 15)));
        assert!(one("age", Comparator::Lt, 15).matches(&member(None, 14)));
    }

    #[test]
    fn membership_lists_follow_sql() {
        let ages = Value::List(vec![Value::from(10), Value::from(20)]);
        let within = one("age", Comparator::In, ages.clone());
        assert!(within.matches(&member(None, 10)));
        assert!(!within.matches(&member(None, 15)));
        let outside = one("age", Comparator::NotIn, ages);
        assert!(outside.matches(&member(None, 15)));
        assert!(!outside.matches(&member(None, 20)));

        // Empty lists are constants: nothing is in, everything is not in.
        let nameless = member(None, 10);
        let empty = || Value::List(Vec::new());
        assert!(!one("username", Comparator::In, empty()).matches(&nameless));
        assert!(one("username", Comparator::NotIn, empty()).matches(&nameless));
        let names = Value::List(vec![Value::from("member1")]);
        assert!(!one("username", Comparator::NotIn, names).matches(&nameless));
    }

    #[test]
    fn related_paths_read_eager_relations() {
        let clause = ClauseDef::new(
            FieldPath::related("team", "name"),
            Comparator::Eq,
            Operand::One(Arg::literal("teamA")),
        );
        let predicate = bound(&[clause], &Params::new());
        let mut joined = member(Some("member1"), 10);
        joined
            .related
            .insert("team".to_string(), Record::with_id(1).set("name", "teamA"));
        assert!(predicate.matches(&joined));
        // No eager team reads as null.
        assert!(!predicate.matches(&member(Some("member1"), 10)));
    }

    #[test]
    fn ill_typed_arguments_fail_at_bind() {
        let predicate = Predicate::resolve(
            &default_registry(),
            &MEMBER,
            &[ClauseDef::new(
                FieldPath::root("age"),
                Comparator::Gt,
                Operand::One(Arg::named("age")),
            )],
        )
        .unwrap();
        assert!(matches!(
            predicate.bind("test", &Params::new().bind("age", "old")),
            Err(RepoError::InvalidParameter { .. })
        ));
        assert!(matches!(
            predicate.bind("test", &Params::new()),
            Err(RepoError::UnboundParameter { .. })
        ));
    }

    #[test]
    fn positional_params_are_one_based() {
        let params = Params::positional([Value::from("AAA"), Value::from(15)]);
        assert_eq!(params.get(&ParamKey::Position(1)), Some(&Value::from("AAA")));
        assert_eq!(params.get(&ParamKey::Position(2)), Some(&Value::from(15)));
        let named = Params::new().bind(":age", 20);
        assert_eq!(named.named("age"), Some(&Value::from(20)));
    }
}
