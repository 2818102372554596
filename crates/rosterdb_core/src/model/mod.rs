//! Entity kinds, schemas and the dynamic record model.
//!
//! # Responsibility
//! - Define the schema of every persisted entity kind once.
//! - Provide typed domain structs and their `Record` mapping.
//!
//! # Invariants
//! - Every entity is identified by a `RecordId` that never changes.
//! - Schemas are static; the registry only references them.

pub mod dto;
pub mod entity;
pub mod item;
pub mod member;
pub mod schema;
pub mod team;
pub mod value;

use schema::SchemaRegistry;

/// Registry containing `Member`, `Team` and `Item`.
pub fn default_registry() -> SchemaRegistry {
    SchemaRegistry::new()
        .register(&member::MEMBER)
        .register(&team::TEAM)
        .register(&item::ITEM)
}
