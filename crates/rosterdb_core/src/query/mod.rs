//! Query translation: derived descriptors, literal queries, specifications
//! and native SQL compiled into validated, executable queries.

pub mod compiled;
pub mod descriptor;
pub mod literal;
pub mod native;
pub mod predicate;
pub(crate) mod sql;
pub mod spec;
pub mod update;

pub use compiled::{CompiledQuery, JoinDef, JoinKind, LockMode, QueryDefinition, SelectionDef};
pub use descriptor::QueryDescriptor;
pub use literal::{LiteralQuery, LiteralStatement};
pub use native::NativeQuery;
pub use predicate::{Arg, ClauseDef, Comparator, Operand, ParamKey, Params, Predicate};
pub use spec::{Example, ExampleMatcher, Spec, StringMatcher};
pub use update::{BulkUpdate, BulkUpdateBuilder, Mutation};
