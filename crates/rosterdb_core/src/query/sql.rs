//! SQL rendering and row decoding for compiled queries.
//!
//! # Responsibility
//! - Render one `SELECT` per compiled query and result shape, with the
//!   root table aliased `r` and each joined relation aliased `j_<relation>`.
//! - Decode result rows back into `Record`s or projected column values.
//!
//! # Invariants
//! - Entity rows lay out the root identity, root data fields, then the
//!   identity and data fields of every fetch-joined relation.
//! - Ordered output always ends with the root identity as tie-breaker, so
//!   page windows over equal sort keys are stable.

use crate::error::{RepoError, RepoResult};
use crate::model::schema::{EntitySchema, Relation, ResolvedPath};
use crate::model::value::{Record, RecordId, Value};
use crate::page::Direction;
use crate::query::compiled::{CompiledQuery, Join, JoinKind, Selection};
use crate::query::predicate::BoundPredicate;
use rusqlite::types::Value as SqlValue;
use rusqlite::Row;

pub(crate) const ROOT_ALIAS: &str = "r";

/// Result shape requested from a compiled query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Shape {
    /// Entity or projection rows.
    Rows,
    /// Root identities only, in result order (lock discovery).
    Ids,
    Count,
    Exists,
}

/// `LIMIT ? OFFSET ?` window of a paged or single-result read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Window {
    pub limit: u64,
    pub offset: u64,
}

#[derive(Debug)]
pub(crate) struct Statement {
    pub sql: String,
    pub binds: Vec<SqlValue>,
}

pub(crate) fn alias_of(path: &ResolvedPath) -> String {
    match path.relation {
        Some((relation, _)) => join_alias(relation),
        None => ROOT_ALIAS.to_string(),
    }
}

fn join_alias(relation: &Relation) -> String {
    format!("j_{}", relation.name)
}

fn column_of(path: &ResolvedPath) -> String {
    format!("{}.{}", alias_of(path), path.field.column)
}

/// Renders `query` with its bound filter for the requested shape.
///
/// # Errors
/// - `InvalidPageRequest` when the window does not fit SQLite integers.
pub(crate) fn render(
    query: &CompiledQuery,
    filter: &BoundPredicate,
    shape: Shape,
    window: Option<Window>,
) -> RepoResult<Statement> {
    let root = query.root();
    let columns = match shape {
        Shape::Rows => row_columns(query),
        Shape::Ids | Shape::Exists => vec![format!("{ROOT_ALIAS}.{}", root.id_field().column)],
        Shape::Count => vec![count_column(query)],
    };

    let mut sql = format!(
        "SELECT {} FROM {} {ROOT_ALIAS}",
        columns.join(", "),
        root.table
    );
    for join in query.joins() {
        sql.push(' ');
        sql.push_str(&join_clause(root, join));
    }

    let mut binds = Vec::new();
    if let Some(condition) = filter.to_sql(&alias_of, &mut binds)? {
        sql.push_str(" WHERE ");
        sql.push_str(&condition);
    }

    match shape {
        Shape::Count => {}
        Shape::Exists => sql.push_str(" LIMIT 1"),
        Shape::Rows | Shape::Ids => {
            sql.push_str(" ORDER BY ");
            sql.push_str(&order_clause(query));
            if let Some(window) = window {
                sql.push_str(" LIMIT ? OFFSET ?");
                // SQLite treats any limit past the row count as "all rows".
                binds.push(SqlValue::Integer(i64::try_from(window.limit).unwrap_or(i64::MAX)));
                binds.push(SqlValue::Integer(to_sql_integer(window.offset, "offset")?));
            } else if let Some(limit) = query.result_limit() {
                sql.push_str(&format!(" LIMIT {limit}"));
            }
        }
    }

    Ok(Statement { sql, binds })
}

fn to_sql_integer(value: u64, label: &str) -> RepoResult<i64> {
    i64::try_from(value)
        .map_err(|_| RepoError::InvalidPageRequest(format!("{label} {value} is out of range")))
}

fn join_clause(root: &EntitySchema, join: &Join) -> String {
    let keyword = match join.kind {
        JoinKind::Inner => "JOIN",
        JoinKind::Left => "LEFT JOIN",
    };
    let alias = join_alias(join.relation);
    let foreign_key = root
        .field(join.relation.foreign_key)
        .map_or(join.relation.foreign_key, |field| field.column);
    format!(
        "{keyword} {} {alias} ON {alias}.{} = {ROOT_ALIAS}.{foreign_key}",
        join.target.table,
        join.target.id_field().column
    )
}

fn count_column(query: &CompiledQuery) -> String {
    match query.selection() {
        Selection::Count(Some(path)) => format!("COUNT({})", column_of(path)),
        _ => "COUNT(*)".to_string(),
    }
}

fn order_clause(query: &CompiledQuery) -> String {
    let mut terms = query
        .order()
        .iter()
        .map(|term| format!("{} {}", column_of(&term.path), term.direction.sql()))
        .collect::<Vec<_>>();
    let ordered_by_id = query
        .order()
        .iter()
        .any(|term| term.path.relation.is_none() && term.path.is_id());
    if !ordered_by_id {
        terms.push(format!(
            "{ROOT_ALIAS}.{} {}",
            query.root().id_field().column,
            Direction::Asc.sql()
        ));
    }
    terms.join(", ")
}

fn fetched_joins(query: &CompiledQuery) -> impl Iterator<Item = &Join> {
    query.joins().iter().filter(|join| join.fetch)
}

fn row_columns(query: &CompiledQuery) -> Vec<String> {
    let root = query.root();
    let mut columns = vec![format!("{ROOT_ALIAS}.{}", root.id_field().column)];
    match query.selection() {
        Selection::Projection(projection) if projection.is_optimized() => {
            for (path, _) in projection.column_paths() {
                columns.push(column_of(&path));
            }
        }
        _ => {
            columns.extend(entity_columns(root, ROOT_ALIAS).into_iter().skip(1));
            for join in fetched_joins(query) {
                columns.extend(entity_columns(join.target, &join_alias(join.relation)));
            }
        }
    }
    columns
}

/// Identity column followed by every data column of `schema`.
pub(crate) fn entity_columns(schema: &EntitySchema, alias: &str) -> Vec<String> {
    schema
        .fields()
        .iter()
        .map(|field| format!("{alias}.{}", field.column))
        .collect()
}

/// Decoded form of one `Shape::Rows` row.
#[derive(Debug)]
pub(crate) enum Decoded {
    Entity(Record),
    Columns {
        id: RecordId,
        values: Vec<(String, Value)>,
    },
}

pub(crate) fn decode_row(query: &CompiledQuery, row: &Row<'_>) -> RepoResult<Decoded> {
    let root = query.root();
    if let Selection::Projection(projection) = query.selection() {
        if projection.is_optimized() {
            let id = decode_id(root, row)?;
            let mut values = Vec::new();
            for (index, (path, alias)) in projection.column_paths().into_iter().enumerate() {
                values.push((alias, read_value(row, index + 1, path.field.column)?));
            }
            return Ok(Decoded::Columns { id, values });
        }
    }

    let (record, mut next) = read_entity(root, row, 0)?;
    let mut record = record.ok_or_else(|| {
        RepoError::CorruptRow(format!("`{}` row without identifier", root.table))
    })?;
    for join in fetched_joins(query) {
        let (related, after) = read_entity(join.target, row, next)?;
        next = after;
        if let Some(related) = related {
            record.related.insert(join.relation.name.to_string(), related);
        }
    }
    Ok(Decoded::Entity(record))
}

/// Reads `schema.fields()` starting at column `start`; a null identity
/// means the left join matched nothing. Returns the next column index.
pub(crate) fn read_entity(
    schema: &EntitySchema,
    row: &Row<'_>,
    start: usize,
) -> RepoResult<(Option<Record>, usize)> {
    let fields = schema.fields();
    let next = start + fields.len();
    let id = read_value(row, start, schema.id_field().column)?;
    if id.is_null() {
        return Ok((None, next));
    }
    let mut record = Record {
        id: Some(RecordId::from_value(id, schema.id_field().column)?),
        ..Record::default()
    };
    for (offset, field) in fields.iter().enumerate().skip(1) {
        let value = read_value(row, start + offset, field.column)?;
        record.fields.insert(field.name.to_string(), value);
    }
    Ok((Some(record), next))
}

pub(crate) fn decode_id(schema: &EntitySchema, row: &Row<'_>) -> RepoResult<RecordId> {
    let column = schema.id_field().column;
    RecordId::from_value(read_value(row, 0, column)?, column)
}

pub(crate) fn decode_count(row: &Row<'_>) -> RepoResult<u64> {
    let count: i64 = row.get(0)?;
    u64::try_from(count).map_err(|_| RepoError::CorruptRow(format!("negative count {count}")))
}

fn read_value(row: &Row<'_>, index: usize, column: &str) -> RepoResult<Value> {
    let raw: SqlValue = row.get(index)?;
    Value::from_sql(raw, column)
}
