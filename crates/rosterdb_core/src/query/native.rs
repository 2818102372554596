//! Native SQL queries.
//!
//! # Responsibility
//! - Prepare raw SQL (and an optional count SQL) against the live
//!   connection once, so syntax and table errors surface when the query is
//!   registered.
//! - Bind `:name`, `?N` and `?` parameters from `Params` and run the query,
//!   optionally wrapped in a sorted page window.
//!
//! # Invariants
//! - Native queries bypass the schema registry; their output is rows of
//!   named columns, not entities.
//! - Page sort keys must name a result column.

use crate::error::{RepoError, RepoResult};
use crate::model::schema::{EntitySchema, ID_FIELD};
use crate::model::value::{Record, RecordId, Value};
use crate::page::PageRequest;
use crate::projection::ProjectedRow;
use crate::query::predicate::{ParamKey, Params};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, Row};

const LIMIT_PARAM: &str = ":rosterdb_limit";
const OFFSET_PARAM: &str = ":rosterdb_offset";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeQuery {
    name: String,
    sql: String,
    parameters: Vec<ParamKey>,
    columns: Vec<String>,
    count_sql: Option<String>,
}

impl NativeQuery {
    /// Prepares `sql` and `count_sql` on `conn`.
    ///
    /// # Errors
    /// - `InvalidQuery` when SQLite rejects either statement or the count
    ///   statement does not return exactly one column.
    pub(crate) fn prepare(
        conn: &Connection,
        name: &str,
        sql: &str,
        count_sql: Option<&str>,
    ) -> RepoResult<Self> {
        let sql = trim_statement(sql);
        let stmt = conn
            .prepare(&sql)
            .map_err(|err| RepoError::invalid_query(name, err.to_string()))?;
        let parameters = parameter_keys(&stmt);
        let columns = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        if columns.is_empty() {
            return Err(RepoError::invalid_query(name, "native query returns no columns"));
        }

        let count_sql = match count_sql {
            Some(count_sql) => {
                let count_sql = trim_statement(count_sql);
                let count = conn
                    .prepare(&count_sql)
                    .map_err(|err| RepoError::invalid_query(name, format!("count query: {err}")))?;
                if count.column_count() != 1 {
                    return Err(RepoError::invalid_query(
                        name,
                        "count query must return exactly one column",
                    ));
                }
                Some(count_sql)
            }
            None => None,
        };

        Ok(Self {
            name: name.to_string(),
            sql,
            parameters,
            columns,
            count_sql,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn parameters(&self) -> &[ParamKey] {
        &self.parameters
    }

    /// Result column names in select order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_count_query(&self) -> bool {
        self.count_sql.is_some()
    }

    /// Runs the query (or one page of it) and hands every row to `visit`.
    pub(crate) fn run(
        &self,
        conn: &Connection,
        params: &Params,
        page: Option<&PageRequest>,
        visit: &mut dyn FnMut(&Row<'_>) -> RepoResult<()>,
    ) -> RepoResult<()> {
        let sql = match page {
            Some(request) => self.paged_sql(request)?,
            None => self.sql.clone(),
        };
        let mut stmt = conn.prepare_cached(&sql)?;
        for index in 1..=stmt.parameter_count() {
            let value = match stmt.parameter_name(index) {
                Some(LIMIT_PARAM) => SqlValue::Integer(
                    i64::try_from(page.map_or(0, PageRequest::size)).unwrap_or(i64::MAX),
                ),
                Some(OFFSET_PARAM) => SqlValue::Integer(window_value(page, |r| r.offset())?),
                name => {
                    let key = parameter_key(name, index);
                    params
                        .get(&key)
                        .ok_or_else(|| RepoError::UnboundParameter {
                            query: self.name.clone(),
                            parameter: key.to_string(),
                        })?
                        .to_sql()?
                }
            };
            stmt.raw_bind_parameter(index, value)?;
        }
        let mut rows = stmt.raw_query();
        while let Some(row) = rows.next()? {
            visit(row)?;
        }
        Ok(())
    }

    /// Total rows of the query: the count statement when supplied,
    /// otherwise `COUNT(*)` over the wrapped query.
    pub(crate) fn count(&self, conn: &Connection, params: &Params) -> RepoResult<u64> {
        let sql = match &self.count_sql {
            Some(count_sql) => count_sql.clone(),
            None => format!("SELECT COUNT(*) FROM ({})", self.sql),
        };
        let counter = NativeQuery {
            name: format!("{} (count)", self.name),
            sql,
            parameters: Vec::new(),
            columns: Vec::new(),
            count_sql: None,
        };
        let mut total = None;
        counter.run(conn, params, None, &mut |row| {
            let count: i64 = row.get(0)?;
            total = Some(u64::try_from(count).map_err(|_| {
                RepoError::CorruptRow(format!("negative count {count}"))
            })?);
            Ok(())
        })?;
        total.ok_or_else(|| RepoError::CorruptRow(format!("count query `{}` returned no row", self.name)))
    }

    fn paged_sql(&self, request: &PageRequest) -> RepoResult<String> {
        let mut sql = format!("SELECT * FROM ({})", self.sql);
        let mut terms = Vec::new();
        for order in request.sort().orders() {
            if !self.columns.iter().any(|column| *column == order.property) {
                return Err(RepoError::schema(
                    &self.name,
                    format!("native query has no result column `{}`", order.property),
                ));
            }
            terms.push(format!(
                "\"{}\" {}",
                order.property.replace('"', "\"\""),
                order.direction.sql()
            ));
        }
        if !terms.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }
        sql.push_str(&format!(" LIMIT {LIMIT_PARAM} OFFSET {OFFSET_PARAM}"));
        Ok(sql)
    }

    pub(crate) fn to_row(&self, row: &Row<'_>) -> RepoResult<ProjectedRow> {
        let mut values = Vec::with_capacity(self.columns.len());
        for (index, column) in self.columns.iter().enumerate() {
            let raw: SqlValue = row.get(index)?;
            values.push((column.clone(), Value::from_sql(raw, column)?));
        }
        Ok(ProjectedRow::from_values(values))
    }

    /// Maps result columns onto `schema` by column name. The identity
    /// column must be selected; unselected fields read as null.
    pub(crate) fn to_record(&self, schema: &EntitySchema, row: &Row<'_>) -> RepoResult<Record> {
        let mut record = Record::default();
        for field in schema.fields() {
            let Some(index) = self
                .columns
                .iter()
                .position(|column| column == field.column || column == field.name)
            else {
                continue;
            };
            let raw: SqlValue = row.get(index)?;
            let value = Value::from_sql(raw, field.column)?;
            if field.name == ID_FIELD {
                record.id = Some(RecordId::from_value(value, field.column)?);
            } else {
                record.fields.insert(field.name.to_string(), value);
            }
        }
        if record.id.is_none() {
            return Err(RepoError::schema(
                schema.name,
                format!(
                    "native query `{}` does not select identity column `{}`",
                    self.name,
                    schema.id_field().column
                ),
            ));
        }
        Ok(record)
    }
}

fn trim_statement(sql: &str) -> String {
    sql.trim().trim_end_matches(';').trim_end().to_string()
}

fn window_value(page: Option<&PageRequest>, pick: impl Fn(&PageRequest) -> usize) -> RepoResult<i64> {
    let value = page.map_or(0, pick);
    i64::try_from(value)
        .map_err(|_| RepoError::InvalidPageRequest(format!("window value {value} is out of range")))
}

fn parameter_keys(stmt: &rusqlite::Statement<'_>) -> Vec<ParamKey> {
    (1..=stmt.parameter_count())
        .map(|index| parameter_key(stmt.parameter_name(index), index))
        .collect()
}

/// `:name`, `@name` and `$name` bind by name; `?N` by its number; a bare
/// `?` by its index.
fn parameter_key(name: Option<&str>, index: usize) -> ParamKey {
    match name {
        Some(name) if name.starts_with('?') => name[1..]
            .parse()
            .map_or(ParamKey::Position(index), ParamKey::Position),
        Some(name) => ParamKey::Named(name[1..].to_string()),
        None => ParamKey::Position(index),
    }
}
