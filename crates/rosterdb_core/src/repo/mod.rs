//! Typed repositories over the store.
//!
//! # Responsibility
//! - Give each entity kind a repository whose queries are compiled when
//!   the repository is built.
//! - Convert records into domain structs and DTOs.
//!
//! # Invariants
//! - Every read and write goes through a caller-supplied `Session`.

pub mod crud;
pub mod member_repo;
pub mod team_repo;

pub use crud::CrudRepository;
pub use member_repo::{member_spec, MemberRepository, MemberRepositoryCustom};
pub use team_repo::{ItemRepository, TeamRepository};
