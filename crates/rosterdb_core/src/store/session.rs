//! Sessions: the unit of work over a `Store`.
//!
//! # Responsibility
//! - Run single-record writes, query reads, paged reads, scans, bulk
//!   updates and native queries against the shared connection.
//! - Keep an identity map of records read or written by this session and
//!   discard entries whose entity generation moved on.
//! - Hold pessimistic row locks until the session completes or drops.
//!
//! # Invariants
//! - Binding and validation happen before the connection is taken.
//! - A read that meets a row held by another session releases the
//!   connection, waits for the row up to the lock timeout, then retries
//!   from scratch.
//! - Read-only queries, projections, scans and native queries never
//!   populate the identity map.

use super::Store;
use crate::error::{RepoError, RepoResult};
use crate::logging::one_line;
use crate::model::schema::{EntitySchema, IdStrategy, SchemaRegistry, ID_FIELD};
use crate::model::value::{Record, RecordId, Value};
use crate::page::{known_total, Page, PageRequest, Slice};
use crate::projection::{ProjectedRow, Projection};
use crate::query::compiled::{CompiledQuery, LockMode, Selection};
use crate::query::native::NativeQuery;
use crate::query::predicate::{BoundPredicate, Params};
use crate::query::sql::{self, Decoded, Shape, Window, ROOT_ALIAS};
use crate::query::update::BulkUpdate;
use crate::store::lock::ScanControl;
use crate::store::patch::Patch;
use log::{debug, info, warn};
use rusqlite::{params_from_iter, Connection};
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Ids per `UPDATE ... WHERE id IN (...)` statement; stays well below
/// SQLite's bound-parameter limit.
const BULK_CHUNK_SIZE: usize = 500;
const MAX_LOGGED_QUERY_CHARS: usize = 120;

enum Access<T> {
    Done(T),
    Blocked { entity: &'static str, id: RecordId },
}

struct CachedRecord {
    record: Record,
    generation: u64,
}

struct Fetched<T> {
    rows: Vec<T>,
    total: Option<u64>,
    generation: u64,
}

/// Query, filter and count plan of one paged read.
struct PagePlan {
    query: CompiledQuery,
    filter: BoundPredicate,
    counter: CompiledQuery,
    count_filter: BoundPredicate,
}

pub struct Session {
    store: Store,
    owner: Uuid,
    cache: HashMap<(&'static str, RecordId), CachedRecord>,
    lock_timeout: Duration,
}

impl Session {
    pub(crate) fn new(store: Store) -> Self {
        let lock_timeout = store.config().lock_timeout();
        Self {
            store,
            owner: Uuid::new_v4(),
            cache: HashMap::new(),
            lock_timeout,
        }
    }

    pub fn id(&self) -> Uuid {
        self.owner
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn registry(&self) -> &SchemaRegistry {
        self.store.registry()
    }

    /// Overrides the store's lock timeout for this session.
    pub fn set_lock_timeout(&mut self, timeout: Duration) {
        self.lock_timeout = timeout;
    }

    /// Number of rows this session holds locked.
    pub fn held_locks(&self) -> usize {
        self.store.locks().held_by(self.owner)
    }

    /// Number of entries in the identity map, fresh or stale.
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    /// Whether `get_by_id` would be served from the identity map.
    pub fn is_cached(&self, schema: &EntitySchema, id: &RecordId) -> bool {
        self.fresh(schema, id).is_some()
    }

    /// Drops every cached record of `entity`.
    pub fn evict(&mut self, entity: &str) {
        self.cache.retain(|(cached, _), _| *cached != entity);
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }

    /// Ends the unit of work and releases its row locks. Dropping the
    /// session has the same effect.
    pub fn complete(self) {}

    /// Inserts `record` and returns its identifier.
    ///
    /// # Errors
    /// - `SchemaMismatch` for fields the schema does not declare.
    /// - `InvalidData` when the identifier does not follow the schema's
    ///   identity strategy.
    /// - `DuplicateIdentifier` when an assigned identifier already exists.
    /// - `MutationType` when a value does not fit its field after hooks ran.
    pub fn insert(&mut self, schema: &'static EntitySchema, mut record: Record) -> RepoResult<RecordId> {
        self.ensure_registered(schema)?;
        record.related.clear();
        for name in record.fields.keys() {
            let field = schema.require_field(name)?;
            if field.name == ID_FIELD {
                return Err(RepoError::schema(
                    schema.name,
                    "the identifier is carried by `Record::id`, not a field",
                ));
            }
        }
        match (schema.id_strategy, &record.id) {
            (IdStrategy::Generated, Some(id)) => {
                return Err(RepoError::InvalidData(format!(
                    "{} identifiers are generated by the store; got `{id}`",
                    schema.name
                )))
            }
            (IdStrategy::Assigned, None) => {
                return Err(RepoError::InvalidData(format!(
                    "{} requires a caller-assigned identifier",
                    schema.name
                )))
            }
            (IdStrategy::Assigned, Some(id)) => schema
                .id_field()
                .check_value(&Value::from(id.clone()))
                .map_err(RepoError::InvalidData)?,
            (IdStrategy::Generated, None) => {}
        }

        for hook in self.store.hooks() {
            hook.before_insert(schema, &mut record)?;
        }
        for field in schema.data_fields() {
            if !record.fields.contains_key(field.name) {
                record.put(field.name, Value::Null);
            }
            field
                .check_value(record.get(field.name))
                .map_err(|message| RepoError::MutationType {
                    entity: schema.name.to_string(),
                    field: field.name.to_string(),
                    message,
                })?;
        }

        let (id, generation) = self.store.with_conn(|conn| {
            let id = insert_row(conn, schema, &record)?;
            Ok((id, self.store.generation(schema.name)))
        })?;
        debug!(
            "event=record_insert module=store status=ok entity={} id={}",
            schema.name, id
        );
        record.id = Some(id.clone());
        self.cache_record(schema, record, generation);
        Ok(id)
    }

    /// Reads one record, from the identity map when it is still fresh.
    pub fn get_by_id(
        &mut self,
        schema: &'static EntitySchema,
        id: &RecordId,
    ) -> RepoResult<Option<Record>> {
        self.ensure_registered(schema)?;
        if let Some(record) = self.fresh(schema, id) {
            return Ok(Some(record.clone()));
        }
        let (found, generation) = self.acquire(self.lock_timeout, schema.name, |conn| {
            if let Some(access) = self.row_conflict(schema, id) {
                return Ok(access);
            }
            let found = select_by_id(conn, schema, id)?;
            Ok(Access::Done((found, self.store.generation(schema.name))))
        })?;
        if let Some(record) = &found {
            self.cache_record(schema, record.clone(), generation);
        }
        Ok(found)
    }

    /// Applies `patch` to one record after running `before_update` hooks.
    ///
    /// # Errors
    /// - `SchemaMismatch` / `MutationType` from patch validation.
    /// - `NotFound` when the record does not exist.
    /// - `LockConflict` when another session holds the row too long.
    pub fn update(
        &mut self,
        schema: &'static EntitySchema,
        id: &RecordId,
        patch: &Patch,
    ) -> RepoResult<()> {
        self.ensure_registered(schema)?;
        patch.validate(schema)?;
        let mut patch = patch.clone();
        for hook in self.store.hooks() {
            hook.before_update(schema, &mut patch)?;
        }
        patch.validate(schema)?;

        let found = self.acquire(self.lock_timeout, schema.name, |conn| {
            if let Some(access) = self.row_conflict(schema, id) {
                return Ok(access);
            }
            Ok(Access::Done(self.update_row(conn, schema, id, &patch)?))
        })?;
        self.cache.remove(&(schema.name, id.clone()));
        if !found {
            return Err(RepoError::NotFound {
                entity: schema.name.to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Deletes one record. Absent identifiers are a no-op returning `false`.
    pub fn delete(&mut self, schema: &'static EntitySchema, id: &RecordId) -> RepoResult<bool> {
        self.ensure_registered(schema)?;
        let deleted = self.acquire(self.lock_timeout, schema.name, |conn| {
            if let Some(access) = self.row_conflict(schema, id) {
                return Ok(access);
            }
            let changed = conn.execute(
                &format!(
                    "DELETE FROM {} WHERE {} = ?1",
                    schema.table,
                    schema.id_field().column
                ),
                [id.to_sql()],
            )?;
            if changed > 0 {
                self.store.invalidate(schema);
            }
            Ok(Access::Done(changed > 0))
        })?;
        self.cache.remove(&(schema.name, id.clone()));
        Ok(deleted)
    }

    /// Loads `relation` of `record` explicitly and stores it in
    /// `record.related`. Returns `None` when the foreign key is null or
    /// dangling.
    pub fn load_related(
        &mut self,
        schema: &'static EntitySchema,
        record: &mut Record,
        relation: &str,
    ) -> RepoResult<Option<Record>> {
        self.ensure_registered(schema)?;
        let (relation, target) = self.registry().relation_target(schema, relation)?;
        let related = match record.get(relation.foreign_key) {
            Value::Null => None,
            value => {
                let id = RecordId::from_value(value.clone(), relation.foreign_key)?;
                self.get_by_id(target, &id)?
            }
        };
        match &related {
            Some(loaded) => {
                record
                    .related
                    .insert(relation.name.to_string(), loaded.clone());
            }
            None => {
                record.related.remove(relation.name);
            }
        }
        Ok(related)
    }

    /// Runs an entity query.
    pub fn find(&mut self, query: &CompiledQuery, params: &Params) -> RepoResult<Vec<Record>> {
        self.ensure_entity_query(query)?;
        let filter = query.predicate().bind(query.name(), params)?;
        let fetched = self.fetch(query, &filter, None, None, &into_record)?;
        self.remember(query, &fetched.rows, fetched.generation);
        Ok(fetched.rows)
    }

    /// Runs a single-result entity query.
    ///
    /// # Errors
    /// - `IncorrectResultSize` when more than one record matches.
    pub fn find_one(&mut self, query: &CompiledQuery, params: &Params) -> RepoResult<Option<Record>> {
        let mut records = self.find(query, params)?;
        if records.len() > 1 {
            return Err(RepoError::IncorrectResultSize {
                query: query.name().to_string(),
                actual: records.len(),
            });
        }
        Ok(records.pop())
    }

    /// One page of an entity query plus its total.
    ///
    /// Content and count run in the same connection critical section, so
    /// the total is consistent with the content.
    pub fn find_page(
        &mut self,
        query: &CompiledQuery,
        params: &Params,
        request: &PageRequest,
    ) -> RepoResult<Page<Record>> {
        self.ensure_entity_query(query)?;
        let plan = self.plan_page(query, params, request)?;
        let fetched = self.fetch(
            &plan.query,
            &plan.filter,
            Some(window(request, 0)),
            Some((&plan, request)),
            &into_record,
        )?;
        self.remember(query, &fetched.rows, fetched.generation);
        let total = fetched.total.unwrap_or_default();
        Ok(Page::new(fetched.rows, request, total))
    }

    /// One window of an entity query without a count; one extra row decides
    /// `has_next`.
    pub fn find_slice(
        &mut self,
        query: &CompiledQuery,
        params: &Params,
        request: &PageRequest,
    ) -> RepoResult<Slice<Record>> {
        self.ensure_entity_query(query)?;
        let plan = self.plan_page(query, params, request)?;
        let fetched = self.fetch(
            &plan.query,
            &plan.filter,
            Some(window(request, 1)),
            None,
            &into_record,
        )?;
        self.remember(query, &fetched.rows, fetched.generation);
        Ok(Slice::new(fetched.rows, request))
    }

    /// Number of matches: the query's own `count(...)` selection, or
    /// `COUNT(*)` over its filter.
    pub fn count(&mut self, query: &CompiledQuery, params: &Params) -> RepoResult<u64> {
        self.ensure_registered(query.root())?;
        let counter = match query.selection() {
            Selection::Count(_) => query.clone(),
            _ => query.as_count(),
        };
        let filter = counter.predicate().bind(counter.name(), params)?;
        self.store.with_conn(|conn| count_rows(conn, &counter, &filter))
    }

    pub fn exists(&mut self, query: &CompiledQuery, params: &Params) -> RepoResult<bool> {
        self.ensure_registered(query.root())?;
        let filter = query.predicate().bind(query.name(), params)?;
        let statement = sql::render(query, &filter, Shape::Exists, None)?;
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(&statement.sql)?;
            let mut rows = stmt.query(params_from_iter(statement.binds.iter()))?;
            Ok(rows.next()?.is_some())
        })
    }

    /// Runs a projection query (`select m.username ...`, `select new ...`,
    /// or an entity query retargeted with `with_projection`).
    pub fn project(&mut self, query: &CompiledQuery, params: &Params) -> RepoResult<Vec<ProjectedRow>> {
        let projection = self.ensure_projection_query(query)?;
        let filter = query.predicate().bind(query.name(), params)?;
        let map = |decoded: Decoded| -> RepoResult<ProjectedRow> {
            Ok(project_decoded(&projection, decoded))
        };
        Ok(self.fetch(query, &filter, None, None, &map)?.rows)
    }

    pub fn project_page(
        &mut self,
        query: &CompiledQuery,
        params: &Params,
        request: &PageRequest,
    ) -> RepoResult<Page<ProjectedRow>> {
        let projection = self.ensure_projection_query(query)?;
        let plan = self.plan_page(query, params, request)?;
        let map = |decoded: Decoded| -> RepoResult<ProjectedRow> {
            Ok(project_decoded(&projection, decoded))
        };
        let fetched = self.fetch(
            &plan.query,
            &plan.filter,
            Some(window(request, 0)),
            Some((&plan, request)),
            &map,
        )?;
        let total = fetched.total.unwrap_or_default();
        Ok(Page::new(fetched.rows, request, total))
    }

    /// Streams the matches of an entity query to `visitor` in result order
    /// over one snapshot. Returns the number of records produced.
    ///
    /// The connection stays locked for the whole scan; `visitor` must not
    /// use the store.
    ///
    /// # Errors
    /// - `Cancelled` when the control's token is set before a record is
    ///   produced.
    pub fn scan(
        &mut self,
        query: &CompiledQuery,
        params: &Params,
        control: &ScanControl,
        mut visitor: impl FnMut(Record) -> ControlFlow<()>,
    ) -> RepoResult<usize> {
        self.ensure_entity_query(query)?;
        let filter = query.predicate().bind(query.name(), params)?;
        let timeout = control.lock_timeout().unwrap_or(self.lock_timeout);
        self.acquire(timeout, query.name(), |conn| {
            if let Some(id) = self.claim_rows(conn, query, &filter, None)? {
                return Ok(Access::Blocked {
                    entity: query.root().name,
                    id,
                });
            }
            let mut produced = 0;
            query_rows(conn, query, &filter, None, &mut |decoded| {
                if control.is_cancelled() {
                    return Err(RepoError::Cancelled {
                        query: query.name().to_string(),
                        produced,
                    });
                }
                let record = into_record(decoded)?;
                produced += 1;
                Ok(visitor(record))
            })?;
            Ok(Access::Done(produced))
        })
    }

    /// Applies a bulk update in one transaction and returns the number of
    /// affected rows.
    ///
    /// Matching ids are discovered inside the transaction; rows held by
    /// other sessions are waited for. Pre-commit hooks do not run.
    ///
    /// # Side effects
    /// - Bumps the entity generation, so cached copies in every session
    ///   are re-read; evicts this session's copies right away when the
    ///   update clears automatically.
    /// - Emits a `bulk_update` event.
    pub fn execute_update(&mut self, update: &BulkUpdate, params: &Params) -> RepoResult<u64> {
        let root = update.root();
        self.ensure_registered(root)?;
        let bound = update.bind(params)?;
        let started_at = Instant::now();
        let logged_name = one_line(update.name(), MAX_LOGGED_QUERY_CHARS);

        let result = self.acquire(self.lock_timeout, update.name(), |conn| {
            let tx = conn.transaction()?;
            let ids = {
                let mut binds = Vec::new();
                let mut select = format!(
                    "SELECT {ROOT_ALIAS}.{} FROM {} {ROOT_ALIAS}",
                    root.id_field().column,
                    root.table
                );
                if let Some(condition) = bound.filter.to_sql(&sql::alias_of, &mut binds)? {
                    select.push_str(" WHERE ");
                    select.push_str(&condition);
                }
                let mut stmt = tx.prepare(&select)?;
                let mut rows = stmt.query(params_from_iter(binds.iter()))?;
                let mut ids = Vec::new();
                while let Some(row) = rows.next()? {
                    ids.push(sql::decode_id(root, row)?);
                }
                ids
            };
            if let Some(id) = self.store.locks().first_conflict(self.owner, root.name, &ids) {
                return Ok(Access::Blocked {
                    entity: root.name,
                    id,
                });
            }

            let mut affected = 0_u64;
            for chunk in ids.chunks(BULK_CHUNK_SIZE) {
                let placeholders = vec!["?"; chunk.len()].join(", ");
                let statement = format!(
                    "UPDATE {} SET {} WHERE {} IN ({placeholders})",
                    root.table,
                    bound.set_clause,
                    root.id_field().column
                );
                let values = bound
                    .set_binds
                    .iter()
                    .cloned()
                    .chain(chunk.iter().map(RecordId::to_sql));
                affected += tx.execute(&statement, params_from_iter(values))? as u64;
            }
            tx.commit()?;
            if affected > 0 {
                self.store.invalidate(root);
            }
            Ok(Access::Done(affected))
        });

        match result {
            Ok(affected) => {
                if update.clears_automatically() {
                    self.evict(root.name);
                }
                info!(
                    "event=bulk_update module=store status=ok query=\"{}\" entity={} affected={} cleared={} duration_ms={}",
                    logged_name,
                    root.name,
                    affected,
                    update.clears_automatically(),
                    started_at.elapsed().as_millis()
                );
                Ok(affected)
            }
            Err(err) => {
                warn!(
                    "event=bulk_update module=store status=error query=\"{}\" entity={} duration_ms={} error={}",
                    logged_name,
                    root.name,
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    /// Runs a native query, one row of named columns per result.
    pub fn native_rows(&mut self, query: &NativeQuery, params: &Params) -> RepoResult<Vec<ProjectedRow>> {
        self.store.with_conn(|conn| {
            let mut rows = Vec::new();
            query.run(conn, params, None, &mut |row| {
                rows.push(query.to_row(row)?);
                Ok(())
            })?;
            Ok(rows)
        })
    }

    /// Runs a native query whose columns carry `schema`'s column names.
    pub fn native_records(
        &mut self,
        schema: &'static EntitySchema,
        query: &NativeQuery,
        params: &Params,
    ) -> RepoResult<Vec<Record>> {
        self.ensure_registered(schema)?;
        self.store.with_conn(|conn| {
            let mut records = Vec::new();
            query.run(conn, params, None, &mut |row| {
                records.push(query.to_record(schema, row)?);
                Ok(())
            })?;
            Ok(records)
        })
    }

    /// One page of a native query; the total comes from its count SQL, or
    /// `COUNT(*)` over the query when none was supplied.
    pub fn native_page(
        &mut self,
        query: &NativeQuery,
        params: &Params,
        request: &PageRequest,
    ) -> RepoResult<Page<ProjectedRow>> {
        let (rows, total) = self.store.with_conn(|conn| {
            let mut rows = Vec::new();
            query.run(conn, params, Some(request), &mut |row| {
                rows.push(query.to_row(row)?);
                Ok(())
            })?;
            let total = match known_total(request, rows.len()) {
                Some(total) => total,
                None => query.count(conn, params)?,
            };
            Ok((rows, total))
        })?;
        Ok(Page::new(rows, request, total))
    }

    fn ensure_registered(&self, schema: &EntitySchema) -> RepoResult<()> {
        if self.registry().contains(schema) {
            Ok(())
        } else {
            Err(RepoError::schema(schema.name, "entity is not registered with this store"))
        }
    }

    fn ensure_entity_query(&self, query: &CompiledQuery) -> RepoResult<()> {
        self.ensure_registered(query.root())?;
        match query.selection() {
            Selection::Entity => Ok(()),
            _ => Err(RepoError::invalid_query(
                query.name(),
                "query does not select entities",
            )),
        }
    }

    fn ensure_projection_query(&self, query: &CompiledQuery) -> RepoResult<Projection> {
        self.ensure_registered(query.root())?;
        match query.selection() {
            Selection::Projection(projection) => Ok(projection.clone()),
            _ => Err(RepoError::invalid_query(
                query.name(),
                "query does not select a projection",
            )),
        }
    }

    /// Validates the sort and binds content and count filters before any
    /// store access.
    fn plan_page(
        &self,
        query: &CompiledQuery,
        params: &Params,
        request: &PageRequest,
    ) -> RepoResult<PagePlan> {
        if query.result_limit().is_some() {
            return Err(RepoError::InvalidPageRequest(format!(
                "query `{}` already limits its result size",
                query.name()
            )));
        }
        let sorted = query.sorted(self.registry(), request.sort())?;
        let filter = sorted.predicate().bind(query.name(), params)?;
        let counter = match query.count_query() {
            Some(count) => count.clone(),
            None => query.as_count(),
        };
        let count_filter = counter.predicate().bind(counter.name(), params)?;
        Ok(PagePlan {
            query: sorted,
            filter,
            counter,
            count_filter,
        })
    }

    /// Reads rows under the connection lock, waiting out foreign row locks
    /// and counting the page total in the same critical section.
    fn fetch<T>(
        &self,
        query: &CompiledQuery,
        filter: &BoundPredicate,
        window: Option<Window>,
        count: Option<(&PagePlan, &PageRequest)>,
        map: &dyn Fn(Decoded) -> RepoResult<T>,
    ) -> RepoResult<Fetched<T>> {
        self.acquire(self.lock_timeout, query.name(), |conn| {
            if let Some(id) = self.claim_rows(conn, query, filter, window)? {
                return Ok(Access::Blocked {
                    entity: query.root().name,
                    id,
                });
            }
            let mut rows = Vec::new();
            query_rows(conn, query, filter, window, &mut |decoded| {
                rows.push(map(decoded)?);
                Ok(ControlFlow::Continue(()))
            })?;
            let total = match count {
                Some((plan, request)) => Some(match known_total(request, rows.len()) {
                    Some(total) => total,
                    None => count_rows(conn, &plan.counter, &plan.count_filter)?,
                }),
                None => None,
            };
            Ok(Access::Done(Fetched {
                rows,
                total,
                generation: self.store.generation(query.root().name),
            }))
        })
    }

    /// Checks (plain reads) or takes (pessimistic reads) the row locks of
    /// the rows `query` is about to return. Returns the first row held by
    /// another session.
    fn claim_rows(
        &self,
        conn: &Connection,
        query: &CompiledQuery,
        filter: &BoundPredicate,
        window: Option<Window>,
    ) -> RepoResult<Option<RecordId>> {
        let entity = query.root().name;
        let locks = self.store.locks();
        let locking = query.lock_mode() == LockMode::PessimisticWrite;
        if !locking && !locks.has_foreign_locks(self.owner, entity) {
            return Ok(None);
        }

        let statement = sql::render(query, filter, Shape::Ids, window)?;
        let mut stmt = conn.prepare_cached(&statement.sql)?;
        let mut rows = stmt.query(params_from_iter(statement.binds.iter()))?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next()? {
            ids.push(sql::decode_id(query.root(), row)?);
        }

        if !locking {
            return Ok(locks.first_conflict(self.owner, entity, &ids));
        }
        match locks.try_acquire_all(self.owner, entity, &ids) {
            Ok(acquired) => {
                debug!(
                    "event=row_lock module=store status=ok session={} entity={} rows={} acquired={}",
                    self.owner,
                    entity,
                    ids.len(),
                    acquired
                );
                Ok(None)
            }
            Err(conflict) => Ok(Some(conflict)),
        }
    }

    fn row_conflict<T>(&self, schema: &'static EntitySchema, id: &RecordId) -> Option<Access<T>> {
        self.store
            .locks()
            .first_conflict(self.owner, schema.name, std::slice::from_ref(id))
            .map(|id| Access::Blocked {
                entity: schema.name,
                id,
            })
    }

    /// Runs `attempt` under the connection lock until it completes, waiting
    /// for blocking rows without the connection.
    fn acquire<T>(
        &self,
        timeout: Duration,
        label: &str,
        mut attempt: impl FnMut(&mut Connection) -> RepoResult<Access<T>>,
    ) -> RepoResult<T> {
        let started_at = Instant::now();
        let deadline = started_at + timeout;
        let mut waited = false;
        loop {
            match self.store.with_conn(&mut attempt)? {
                Access::Done(value) => {
                    if waited {
                        debug!(
                            "event=lock_wait module=store status=ok session={} query=\"{}\" waited_ms={}",
                            self.owner,
                            one_line(label, MAX_LOGGED_QUERY_CHARS),
                            started_at.elapsed().as_millis()
                        );
                    }
                    return Ok(value);
                }
                Access::Blocked { entity, id } => {
                    waited = true;
                    debug!(
                        "event=lock_wait module=store status=start session={} entity={} id={}",
                        self.owner, entity, id
                    );
                    if !self
                        .store
                        .locks()
                        .wait_for_release(self.owner, entity, &id, deadline)
                    {
                        let waited_ms =
                            u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX);
                        warn!(
                            "event=lock_wait module=store status=timeout session={} query=\"{}\" entity={} id={} waited_ms={}",
                            self.owner,
                            one_line(label, MAX_LOGGED_QUERY_CHARS),
                            entity,
                            id,
                            waited_ms
                        );
                        return Err(RepoError::LockConflict {
                            entity: entity.to_string(),
                            id: id.to_string(),
                            waited_ms,
                        });
                    }
                }
            }
        }
    }

    fn update_row(
        &self,
        conn: &Connection,
        schema: &'static EntitySchema,
        id: &RecordId,
        patch: &Patch,
    ) -> RepoResult<bool> {
        let id_column = schema.id_field().column;
        if patch.is_empty() {
            return Ok(select_by_id(conn, schema, id)?.is_some());
        }
        let mut assignments = Vec::new();
        let mut values = Vec::new();
        for (name, value) in patch.changes() {
            let field = schema.require_field(name)?;
            assignments.push(format!("{} = ?", field.column));
            values.push(value.to_sql()?);
        }
        values.push(id.to_sql());
        let changed = conn.execute(
            &format!(
                "UPDATE {} SET {} WHERE {id_column} = ?",
                schema.table,
                assignments.join(", ")
            ),
            params_from_iter(values),
        )?;
        if changed > 0 {
            self.store.invalidate(schema);
        }
        Ok(changed > 0)
    }

    fn fresh(&self, schema: &EntitySchema, id: &RecordId) -> Option<&Record> {
        let cached = self.cache.get(&(schema.name, id.clone()))?;
        (cached.generation == self.store.generation(schema.name)).then_some(&cached.record)
    }

    fn cache_record(&mut self, schema: &'static EntitySchema, mut record: Record, generation: u64) {
        let Some(id) = record.id.clone() else {
            return;
        };
        record.related.clear();
        self.cache
            .insert((schema.name, id), CachedRecord { record, generation });
    }

    fn remember(&mut self, query: &CompiledQuery, records: &[Record], generation: u64) {
        if query.is_read_only() {
            return;
        }
        for record in records {
            self.cache_record(query.root(), record.clone(), generation);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let released = self.store.locks().release_all(self.owner);
        if released > 0 {
            debug!(
                "event=session_end module=store status=ok session={} released_locks={}",
                self.owner, released
            );
        }
    }
}

fn window(request: &PageRequest, probe: usize) -> Window {
    let widen = |value: usize| u64::try_from(value).unwrap_or(u64::MAX);
    Window {
        limit: widen(request.size().saturating_add(probe)),
        offset: widen(request.offset()),
    }
}

fn into_record(decoded: Decoded) -> RepoResult<Record> {
    match decoded {
        Decoded::Entity(record) => Ok(record),
        Decoded::Columns { id, .. } => Err(RepoError::CorruptRow(format!(
            "expected an entity row, found projected columns for `{id}`"
        ))),
    }
}

fn project_decoded(projection: &Projection, decoded: Decoded) -> ProjectedRow {
    match decoded {
        Decoded::Columns { values, .. } => ProjectedRow::from_values(values),
        Decoded::Entity(record) => projection.apply(&record),
    }
}

fn query_rows(
    conn: &Connection,
    query: &CompiledQuery,
    filter: &BoundPredicate,
    window: Option<Window>,
    visit: &mut dyn FnMut(Decoded) -> RepoResult<ControlFlow<()>>,
) -> RepoResult<()> {
    let statement = sql::render(query, filter, Shape::Rows, window)?;
    let mut stmt = conn.prepare_cached(&statement.sql)?;
    let mut rows = stmt.query(params_from_iter(statement.binds.iter()))?;
    while let Some(row) = rows.next()? {
        if visit(sql::decode_row(query, row)?)?.is_break() {
            break;
        }
    }
    Ok(())
}

fn count_rows(conn: &Connection, counter: &CompiledQuery, filter: &BoundPredicate) -> RepoResult<u64> {
    let statement = sql::render(counter, filter, Shape::Count, None)?;
    let mut stmt = conn.prepare_cached(&statement.sql)?;
    let mut rows = stmt.query(params_from_iter(statement.binds.iter()))?;
    match rows.next()? {
        Some(row) => sql::decode_count(row),
        None => Ok(0),
    }
}

fn select_by_id(
    conn: &Connection,
    schema: &EntitySchema,
    id: &RecordId,
) -> RepoResult<Option<Record>> {
    let statement = format!(
        "SELECT {} FROM {} {ROOT_ALIAS} WHERE {ROOT_ALIAS}.{} = ?1",
        sql::entity_columns(schema, ROOT_ALIAS).join(", "),
        schema.table,
        schema.id_field().column
    );
    let mut stmt = conn.prepare_cached(&statement)?;
    let mut rows = stmt.query([id.to_sql()])?;
    match rows.next()? {
        Some(row) => Ok(sql::read_entity(schema, row, 0)?.0),
        None => Ok(None),
    }
}

fn insert_row(conn: &Connection, schema: &EntitySchema, record: &Record) -> RepoResult<RecordId> {
    let id_column = schema.id_field().column;
    if let Some(id) = &record.id {
        let exists: i64 = conn.query_row(
            &format!(
                "SELECT EXISTS(SELECT 1 FROM {} WHERE {id_column} = ?1)",
                schema.table
            ),
            [id.to_sql()],
            |row| row.get(0),
        )?;
        if exists == 1 {
            return Err(RepoError::DuplicateIdentifier {
                entity: schema.name.to_string(),
                id: id.to_string(),
            });
        }
    }

    let mut columns = Vec::with_capacity(schema.fields().len());
    let mut values = Vec::with_capacity(schema.fields().len());
    if let Some(id) = &record.id {
        columns.push(id_column);
        values.push(id.to_sql());
    }
    for field in schema.data_fields() {
        columns.push(field.column);
        values.push(record.get(field.name).to_sql()?);
    }
    let placeholders = vec!["?"; columns.len()].join(", ");
    conn.execute(
        &format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            schema.table,
            columns.join(", ")
        ),
        params_from_iter(values),
    )?;

    Ok(match &record.id {
        Some(id) => id.clone(),
        None => RecordId::Integer(conn.last_insert_rowid()),
    })
}
