//! Repository error taxonomy.
//!
//! # Responsibility
//! - Give every failure mode of the store, translator and repositories one
//!   semantic variant instead of leaking SQLite transport errors.
//!
//! # Invariants
//! - Build-time failures (`SchemaMismatch`, `InvalidQuery`, `MutationType`
//!   raised by compilation) are produced before any store access.
//! - No operation returns a partially-valid result together with an error.

use crate::db::DbError;
use thiserror::Error;

pub type RepoResult<T> = Result<T, RepoError>;

/// Errors returned by store, query and repository operations.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error(transparent)]
    Db(#[from] DbError),

    /// Identifier does not exist for the entity.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A predicate, projection, sort or patch references an unknown entity,
    /// field or relation, or targets a field that cannot be written.
    #[error("schema mismatch on `{entity}`: {message}")]
    SchemaMismatch { entity: String, message: String },

    /// A query declares a parameter the caller did not bind.
    #[error("query `{query}` has no binding for parameter `{parameter}`")]
    UnboundParameter { query: String, parameter: String },

    /// A bound predicate argument does not fit the compared field.
    #[error("invalid value for parameter `{parameter}`: {message}")]
    InvalidParameter { parameter: String, message: String },

    /// Caller-assigned identifier already exists.
    #[error("{entity} with id `{id}` already exists")]
    DuplicateIdentifier { entity: String, id: String },

    /// Mutation value is not applicable to the field type.
    #[error("cannot apply mutation to `{entity}.{field}`: {message}")]
    MutationType {
        entity: String,
        field: String,
        message: String,
    },

    /// Exclusive row lock is held by another session past the lock timeout.
    #[error("{entity} row `{id}` is locked by another session (waited {waited_ms}ms)")]
    LockConflict {
        entity: String,
        id: String,
        waited_ms: u64,
    },

    /// Single-result query matched more than one row.
    #[error("query `{query}` expected at most one result, found {actual}")]
    IncorrectResultSize { query: String, actual: usize },

    #[error("invalid page request: {0}")]
    InvalidPageRequest(String),

    /// Query text or descriptor cannot be parsed.
    #[error("invalid query `{query}`: {message}")]
    InvalidQuery { query: String, message: String },

    /// Scan was cancelled by its caller between two produced records.
    #[error("scan `{query}` cancelled after {produced} record(s)")]
    Cancelled { query: String, produced: usize },

    /// Caller-supplied data breaks the entity's identity or shape rules.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// A stored row cannot be decoded into the shape the store expects.
    #[error("corrupt row: {0}")]
    CorruptRow(String),

    #[error("store requires table `{0}`")]
    MissingRequiredTable(String),

    #[error("store requires column `{column}` in table `{table}`")]
    MissingRequiredColumn { table: String, column: String },
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl RepoError {
    pub(crate) fn schema(entity: &str, message: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            entity: entity.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn invalid_query(query: &str, message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            query: query.to_string(),
            message: message.into(),
        }
    }

    /// Returns whether the error means "no such row" rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
