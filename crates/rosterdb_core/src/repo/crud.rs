//! Generic CRUD contract shared by every typed repository.
//!
//! # Invariants
//! - `save` inserts new entities and patches existing ones; the returned
//!   entity is re-read, so it carries the store-assigned id and stamps.
//! - Sort and page requests are validated before any store access.

use crate::error::{RepoError, RepoResult};
use crate::model::entity::Entity;
use crate::model::value::{Record, RecordId};
use crate::page::{Page, PageRequest, Sort};
use crate::query::compiled::CompiledQuery;
use crate::query::predicate::Params;
use crate::query::spec::{Example, Spec};
use crate::store::{Patch, Session};

/// Repository over one entity kind. Implementors only supply the query
/// used for "all entities" reads.
pub trait CrudRepository<E: Entity> {
    /// `select e from E e`, with any eager relations the repository wants.
    fn all_query(&self) -> &CompiledQuery;

    fn save(&self, session: &mut Session, entity: &E) -> RepoResult<E> {
        let schema = E::schema();
        let record = entity.to_record();
        let id = if entity.is_new() {
            session.insert(schema, record)?
        } else {
            let id = entity.id().ok_or_else(|| {
                RepoError::InvalidData(format!("existing {} has no identifier", schema.name))
            })?;
            session.update(schema, &id, &Patch::from_record(schema, &record))?;
            id
        };
        match session.get_by_id(schema, &id)? {
            Some(stored) => E::from_record(&stored),
            None => Err(RepoError::NotFound {
                entity: schema.name.to_string(),
                id: id.to_string(),
            }),
        }
    }

    fn find_by_id(&self, session: &mut Session, id: impl Into<RecordId>) -> RepoResult<Option<E>> {
        session
            .get_by_id(E::schema(), &id.into())?
            .map(|record| E::from_record(&record))
            .transpose()
    }

    fn find_all(&self, session: &mut Session) -> RepoResult<Vec<E>> {
        to_entities(session.find(self.all_query(), &Params::new())?)
    }

    fn find_all_sorted(&self, session: &mut Session, sort: &Sort) -> RepoResult<Vec<E>> {
        let query = self.all_query().sorted(session.registry(), sort)?;
        to_entities(session.find(&query, &Params::new())?)
    }

    fn find_all_paged(&self, session: &mut Session, request: &PageRequest) -> RepoResult<Page<E>> {
        session
            .find_page(self.all_query(), &Params::new(), request)?
            .try_map(|record| E::from_record(&record))
    }

    fn count(&self, session: &mut Session) -> RepoResult<u64> {
        session.count(self.all_query(), &Params::new())
    }

    /// Returns whether a row was deleted.
    fn delete_by_id(&self, session: &mut Session, id: impl Into<RecordId>) -> RepoResult<bool> {
        session.delete(E::schema(), &id.into())
    }

    fn find_all_by_spec(&self, session: &mut Session, spec: &Spec) -> RepoResult<Vec<E>> {
        let query = spec.to_query(session.registry(), E::schema().name)?;
        to_entities(session.find(&query, &Params::new())?)
    }

    fn find_all_by_example(&self, session: &mut Session, example: &Example) -> RepoResult<Vec<E>> {
        let query = example.to_query(session.registry(), E::schema().name)?;
        to_entities(session.find(&query, &Params::new())?)
    }
}

pub(crate) fn to_entities<E: Entity>(records: Vec<Record>) -> RepoResult<Vec<E>> {
    records.iter().map(E::from_record).collect()
}
