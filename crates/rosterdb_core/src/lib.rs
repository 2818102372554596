//! Core of rosterdb: a query-derivation, paging, bulk-update, projection
//! and locking layer over SQLite.
//! This crate is the single source of truth for entity schemas and store
//! invariants.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod page;
pub mod projection;
pub mod query;
pub mod repo;
pub mod store;

pub use config::{ConfigError, StoreConfig};
pub use error::{RepoError, RepoResult};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError, LoggingStatus};
pub use model::dto::{MemberDto, MemberSummary, NestedClosedProjection, TeamInfo, UsernameOnly};
pub use model::entity::{Audit, Entity};
pub use model::item::Item;
pub use model::member::Member;
pub use model::schema::{EntitySchema, SchemaRegistry};
pub use model::team::Team;
pub use model::value::{Record, RecordId, Value};
pub use page::{Direction, Page, PageRequest, Slice, Sort};
pub use projection::{FromProjection, ProjectedRow, Projection};
pub use query::{BulkUpdate, CompiledQuery, Example, ExampleMatcher, NativeQuery, Params, Spec};
pub use repo::{
    member_spec, CrudRepository, ItemRepository, MemberRepository, MemberRepositoryCustom,
    TeamRepository,
};
pub use store::{
    AuditingHook, CancellationToken, Patch, PreCommitHook, ScanControl, Session, Store, StoreBuilder,
};
