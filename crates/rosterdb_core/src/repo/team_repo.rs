//! Team and item repositories: plain CRUD.

use crate::error::RepoResult;
use crate::model::item::Item;
use crate::model::schema::SchemaRegistry;
use crate::model::team::Team;
use crate::query::compiled::{CompiledQuery, QueryDefinition};
use crate::repo::crud::CrudRepository;

pub struct TeamRepository {
    all: CompiledQuery,
}

impl TeamRepository {
    pub fn new(registry: &SchemaRegistry) -> RepoResult<Self> {
        Ok(Self {
            all: QueryDefinition::new("findAll", "Team").compile(registry)?,
        })
    }
}

impl CrudRepository<Team> for TeamRepository {
    fn all_query(&self) -> &CompiledQuery {
        &self.all
    }
}

/// Items carry caller-assigned ids; `save` inserts while `created_at` is
/// unset.
pub struct ItemRepository {
    all: CompiledQuery,
}

impl ItemRepository {
    pub fn new(registry: &SchemaRegistry) -> RepoResult<Self> {
        Ok(Self {
            all: QueryDefinition::new("findAll", "Item").compile(registry)?,
        })
    }
}

impl CrudRepository<Item> for ItemRepository {
    fn all_query(&self) -> &CompiledQuery {
        &self.all
    }
}
