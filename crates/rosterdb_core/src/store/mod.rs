//! SQLite-backed entity store.
//!
//! # Responsibility
//! - Own the single connection, the schema registry, the row-lock table,
//!   the pre-commit hooks and per-entity invalidation generations.
//! - Hand out `Session`s, the unit of work every read and write goes
//!   through.
//!
//! # Invariants
//! - Every statement runs while holding the connection mutex; a scan holds
//!   it for its whole duration, so it observes one snapshot.
//! - Lock order is connection, then lock table. Waiting for a row lock
//!   never holds the connection.
//! - A write bumps the generation of every entity whose rows it may have
//!   changed, so cached copies in all sessions go stale.

mod hooks;
mod lock;
mod patch;
mod session;

pub use hooks::{AuditingHook, PreCommitHook};
pub use lock::{CancellationToken, ScanControl};
pub use patch::Patch;
pub use session::Session;

use crate::config::StoreConfig;
use crate::db::{open_db, open_db_in_memory};
use crate::error::RepoResult;
use crate::model::default_registry;
use crate::model::schema::{EntitySchema, SchemaRegistry};
use crate::query::NativeQuery;
use lock::RowLockManager;
use log::info;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Cloneable handle to one open database.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Shared>,
}

struct Shared {
    conn: Mutex<Connection>,
    registry: SchemaRegistry,
    locks: RowLockManager,
    hooks: Vec<Box<dyn PreCommitHook>>,
    generations: Mutex<HashMap<&'static str, u64>>,
    config: StoreConfig,
}

impl Store {
    pub fn builder(config: StoreConfig) -> StoreBuilder {
        StoreBuilder {
            config,
            registry: None,
            hooks: Vec::new(),
            auditing: true,
        }
    }

    /// Opens `config.db_path` (in-memory when unset) with the default
    /// registry and the auditing hook.
    pub fn open(config: StoreConfig) -> RepoResult<Self> {
        Self::builder(config).open()
    }

    pub fn open_in_memory() -> RepoResult<Self> {
        Self::open(StoreConfig::in_memory())
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Starts a unit of work with an empty identity map.
    pub fn session(&self) -> Session {
        Session::new(self.clone())
    }

    /// Prepares native SQL against the live schema.
    ///
    /// # Errors
    /// - `InvalidQuery` when SQLite rejects `sql` or `count_sql`.
    pub fn prepare_native(
        &self,
        name: &str,
        sql: &str,
        count_sql: Option<&str>,
    ) -> RepoResult<NativeQuery> {
        let conn = self.inner.conn.lock();
        NativeQuery::prepare(&conn, name, sql, count_sql)
    }

    /// Current invalidation generation of `entity`.
    pub fn generation(&self, entity: &str) -> u64 {
        self.inner
            .generations
            .lock()
            .get(entity)
            .copied()
            .unwrap_or_default()
    }

    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> RepoResult<T>,
    ) -> RepoResult<T> {
        let mut conn = self.inner.conn.lock();
        f(&mut conn)
    }

    pub(crate) fn locks(&self) -> &RowLockManager {
        &self.inner.locks
    }

    pub(crate) fn hooks(&self) -> &[Box<dyn PreCommitHook>] {
        &self.inner.hooks
    }

    /// Bumps `schema` and every schema holding a relation to it (deletes
    /// null out foreign keys).
    pub(crate) fn invalidate(&self, schema: &EntitySchema) {
        let mut generations = self.inner.generations.lock();
        for affected in self.inner.registry.schemas() {
            let references = affected
                .relations()
                .iter()
                .any(|relation| relation.target == schema.name);
            if affected.name == schema.name || references {
                *generations.entry(affected.name).or_default() += 1;
            }
        }
    }
}

pub struct StoreBuilder {
    config: StoreConfig,
    registry: Option<SchemaRegistry>,
    hooks: Vec<Box<dyn PreCommitHook>>,
    auditing: bool,
}

impl StoreBuilder {
    /// Replaces the default `Member`/`Team`/`Item` registry.
    pub fn registry(mut self, registry: SchemaRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Adds a hook that runs after the auditing hook.
    pub fn hook(mut self, hook: impl PreCommitHook + 'static) -> Self {
        self.hooks.push(Box::new(hook));
        self
    }

    pub fn without_auditing(mut self) -> Self {
        self.auditing = false;
        self
    }

    /// Opens the database, applies migrations and verifies that every
    /// registered table and column exists.
    ///
    /// # Side effects
    /// - Emits a `store_open` event.
    pub fn open(self) -> RepoResult<Store> {
        let started_at = Instant::now();
        let registry = self.registry.unwrap_or_else(default_registry);
        registry.validate()?;

        let conn = match &self.config.db_path {
            Some(path) => open_db(path)?,
            None => open_db_in_memory()?,
        };
        conn.busy_timeout(self.config.busy_timeout())?;
        registry.verify_tables(&conn)?;

        let mut hooks: Vec<Box<dyn PreCommitHook>> = Vec::with_capacity(self.hooks.len() + 1);
        if self.auditing {
            hooks.push(Box::new(AuditingHook::new(self.config.auditor.clone())));
        }
        hooks.extend(self.hooks);

        info!(
            "event=store_open module=store status=ok entities={} hooks={} lock_timeout_ms={} duration_ms={}",
            registry.schemas().count(),
            hooks.len(),
            self.config.lock_timeout_ms,
            started_at.elapsed().as_millis()
        );

        Ok(Store {
            inner: Arc::new(Shared {
                conn: Mutex::new(conn),
                registry,
                locks: RowLockManager::new(),
                hooks,
                generations: Mutex::new(HashMap::new()),
                config: self.config,
            }),
        })
    }
}
