//! Member repository: derived, literal, native and programmatic queries
//! over `Member`.
//!
//! # Responsibility
//! - Compile every query once, at construction, so a bad descriptor or a
//!   bad native statement fails before the repository is handed out.
//! - Map records and projection rows into typed results.
//!
//! # Invariants
//! - Call-time work is binding and execution only; the one exception is
//!   `find_projections_by_username`, whose shape is chosen by the caller
//!   and validated before any store access.

use crate::error::RepoResult;
use crate::model::dto::MemberDto;
use crate::model::entity::Entity;
use crate::model::member::{Member, MEMBER};
use crate::model::value::{Record, Value};
use crate::page::{Page, PageRequest, Slice};
use crate::projection::FromProjection;
use crate::query::compiled::{CompiledQuery, LockMode, QueryDefinition};
use crate::query::descriptor::QueryDescriptor;
use crate::query::literal::LiteralQuery;
use crate::query::native::NativeQuery;
use crate::query::predicate::Params;
use crate::query::update::BulkUpdate;
use crate::repo::crud::{to_entities, CrudRepository};
use crate::store::{Session, Store};
use log::info;
use std::time::Instant;

const ENTITY: &str = "Member";

/// Hand-written queries living next to the generated ones.
pub trait MemberRepositoryCustom {
    fn find_member_custom(&self, session: &mut Session) -> RepoResult<Vec<Member>>;
}

pub struct MemberRepository {
    all: CompiledQuery,
    by_username_and_age_greater_than: CompiledQuery,
    by_username: CompiledQuery,
    user: CompiledQuery,
    username_list: CompiledQuery,
    member_dto: CompiledQuery,
    by_names: CompiledQuery,
    list_by_username: CompiledQuery,
    member_by_username: CompiledQuery,
    optional_by_username: CompiledQuery,
    by_age: CompiledQuery,
    member_all_count_by: CompiledQuery,
    bulk_age_plus: BulkUpdate,
    member_fetch_join: CompiledQuery,
    member_entity_graph: CompiledQuery,
    entity_graph_by_username: CompiledQuery,
    read_only_by_username: CompiledQuery,
    lock_by_username: CompiledQuery,
    projections_by_username: CompiledQuery,
    custom_all: CompiledQuery,
    native_by_username: NativeQuery,
    native_projection: NativeQuery,
}

impl MemberRepository {
    /// Compiles every member query against `store`'s registry and live
    /// schema.
    ///
    /// # Errors
    /// - `SchemaMismatch` / `InvalidQuery` for the first query that fails
    ///   to compile.
    ///
    /// # Side effects
    /// - Emits a `repository_ready` event.
    pub fn new(store: &Store) -> RepoResult<Self> {
        let started_at = Instant::now();
        let registry = store.registry();
        let derived = |method: &str| CompiledQuery::derived(registry, ENTITY, method);
        let literal = |text: &str| CompiledQuery::literal(registry, text);

        let repository = Self {
            all: QueryDefinition::new("findAll", ENTITY)
                .fetch("team")
                .compile(registry)?,
            by_username_and_age_greater_than: derived("findByUsernameAndAgeGreaterThan")?,
            by_username: LiteralQuery::parse_select(
                "select m from Member m where m.username = :username",
            )?
            .named("Member.findByUsername")
            .compile(registry)?,
            user: literal("select m from Member m where m.username = :username and m.age = :age")?,
            username_list: literal("select m.username from Member m")?,
            member_dto: literal(
                "select new study.datajpa.dto.MemberDto(m.id, m.username, t.name) from Member m join m.team t",
            )?,
            by_names: literal("select m from Member m where m.username in :names")?,
            list_by_username: derived("findListByUsername")?,
            member_by_username: derived("findMemberByUsername")?,
            optional_by_username: derived("findOptionalByUsername")?,
            by_age: derived("findByAge")?,
            member_all_count_by: literal("select m from Member m")?
                .with_count_query(literal("select count(m.username) from Member m")?)?,
            bulk_age_plus: BulkUpdate::literal(
                registry,
                "update Member m set m.age = m.age + 1 where m.age >= :age",
            )?
            .clear_automatically(true),
            member_fetch_join: literal("select m from Member m left join fetch m.team")?,
            member_entity_graph: LiteralQuery::parse_select("select m from Member m")?
                .named("findMemberEntityGraph")
                .fetch("team")
                .compile(registry)?,
            entity_graph_by_username: QueryDescriptor::parse(
                registry,
                ENTITY,
                "findEntityGraphByUsername",
            )?
            .fetch("team")
            .compile(registry)?,
            read_only_by_username: QueryDescriptor::parse(registry, ENTITY, "findReadOnlyByUsername")?
                .read_only()
                .compile(registry)?,
            lock_by_username: QueryDescriptor::parse(registry, ENTITY, "findLockByUsername")?
                .lock(LockMode::PessimisticWrite)
                .compile(registry)?,
            projections_by_username: derived("findProjectionsByUsername")?,
            custom_all: QueryDefinition::new("findMemberCustom", ENTITY).compile(registry)?,
            native_by_username: store.prepare_native(
                "findByNativeQuery",
                "select * from member where username = ?",
                None,
            )?,
            native_projection: store.prepare_native(
                "findByNativeProjection",
                "select m.member_id as id, m.username, t.name as team_name \
                 from member m left join team t on m.team_id = t.team_id",
                Some("select count(*) from member"),
            )?,
        };

        info!(
            "event=repository_ready module=repo status=ok entity={} duration_ms={}",
            ENTITY,
            started_at.elapsed().as_millis()
        );
        Ok(repository)
    }

    pub fn find_by_username_and_age_greater_than(
        &self,
        session: &mut Session,
        username: &str,
        age: i64,
    ) -> RepoResult<Vec<Member>> {
        let params = Params::new().push(username).push(age);
        to_entities(session.find(&self.by_username_and_age_greater_than, &params)?)
    }

    /// Named query `Member.findByUsername`.
    pub fn find_by_username(&self, session: &mut Session, username: &str) -> RepoResult<Vec<Member>> {
        let params = Params::new().bind("username", username);
        to_entities(session.find(&self.by_username, &params)?)
    }

    pub fn find_user(&self, session: &mut Session, username: &str, age: i64) -> RepoResult<Vec<Member>> {
        let params = Params::new().bind("username", username).bind("age", age);
        to_entities(session.find(&self.user, &params)?)
    }

    pub fn find_username_list(&self, session: &mut Session) -> RepoResult<Vec<Option<String>>> {
        Ok(session
            .project(&self.username_list, &Params::new())?
            .iter()
            .map(|row| row.text("username").map(str::to_string))
            .collect())
    }

    /// Members with a team, as `MemberDto`s (inner join).
    pub fn find_member_dto(&self, session: &mut Session) -> RepoResult<Vec<MemberDto>> {
        session
            .project(&self.member_dto, &Params::new())?
            .iter()
            .map(MemberDto::from_row)
            .collect()
    }

    pub fn find_by_names(&self, session: &mut Session, names: &[&str]) -> RepoResult<Vec<Member>> {
        let params = Params::new().bind("names", Value::from(names.to_vec()));
        to_entities(session.find(&self.by_names, &params)?)
    }

    pub fn find_list_by_username(&self, session: &mut Session, username: &str) -> RepoResult<Vec<Member>> {
        to_entities(session.find(&self.list_by_username, &Params::new().push(username))?)
    }

    /// # Errors
    /// - `IncorrectResultSize` when more than one member has `username`.
    pub fn find_member_by_username(
        &self,
        session: &mut Session,
        username: &str,
    ) -> RepoResult<Option<Member>> {
        single(session.find_one(&self.member_by_username, &Params::new().push(username))?)
    }

    pub fn find_optional_by_username(
        &self,
        session: &mut Session,
        username: &str,
    ) -> RepoResult<Option<Member>> {
        single(session.find_one(&self.optional_by_username, &Params::new().push(username))?)
    }

    pub fn find_by_age(
        &self,
        session: &mut Session,
        age: i64,
        request: &PageRequest,
    ) -> RepoResult<Page<Member>> {
        session
            .find_page(&self.by_age, &Params::new().push(age), request)?
            .try_map(|record| Member::from_record(&record))
    }

    pub fn find_slice_by_age(
        &self,
        session: &mut Session,
        age: i64,
        request: &PageRequest,
    ) -> RepoResult<Slice<Member>> {
        session
            .find_slice(&self.by_age, &Params::new().push(age), request)?
            .try_map(|record| Member::from_record(&record))
    }

    /// Pages every member; the total comes from
    /// `select count(m.username) from Member m`, so members without a
    /// username are not counted.
    pub fn find_member_all_count_by(
        &self,
        session: &mut Session,
        request: &PageRequest,
    ) -> RepoResult<Page<Member>> {
        session
            .find_page(&self.member_all_count_by, &Params::new(), request)?
            .try_map(|record| Member::from_record(&record))
    }

    /// Adds one to the age of every member at least `age` years old.
    /// Returns the number of members changed.
    pub fn bulk_age_plus(&self, session: &mut Session, age: i64) -> RepoResult<u64> {
        session.execute_update(&self.bulk_age_plus, &Params::new().bind("age", age))
    }

    pub fn find_member_fetch_join(&self, session: &mut Session) -> RepoResult<Vec<Member>> {
        to_entities(session.find(&self.member_fetch_join, &Params::new())?)
    }

    pub fn find_member_entity_graph(&self, session: &mut Session) -> RepoResult<Vec<Member>> {
        to_entities(session.find(&self.member_entity_graph, &Params::new())?)
    }

    pub fn find_entity_graph_by_username(
        &self,
        session: &mut Session,
        username: &str,
    ) -> RepoResult<Vec<Member>> {
        to_entities(session.find(&self.entity_graph_by_username, &Params::new().push(username))?)
    }

    /// Same as `find_member_by_username`, but the result never enters the
    /// session's identity map.
    pub fn find_read_only_by_username(
        &self,
        session: &mut Session,
        username: &str,
    ) -> RepoResult<Option<Member>> {
        single(session.find_one(&self.read_only_by_username, &Params::new().push(username))?)
    }

    /// Locks the matched rows for `session` until it completes.
    pub fn find_lock_by_username(&self, session: &mut Session, username: &str) -> RepoResult<Vec<Member>> {
        to_entities(session.find(&self.lock_by_username, &Params::new().push(username))?)
    }

    /// Members named `username` in the caller-chosen shape `P`.
    pub fn find_projections_by_username<P: FromProjection>(
        &self,
        session: &mut Session,
        username: &str,
    ) -> RepoResult<Vec<P>> {
        let projection = P::projection(session.registry())?;
        let query = self.projections_by_username.with_projection(&projection)?;
        session
            .project(&query, &Params::new().push(username))?
            .iter()
            .map(P::from_row)
            .collect()
    }

    pub fn find_by_native_query(&self, session: &mut Session, username: &str) -> RepoResult<Vec<Member>> {
        let records = session.native_records(&MEMBER, &self.native_by_username, &Params::new().push(username))?;
        to_entities(records)
    }

    /// Native left join of members and teams, paged; sort keys name result
    /// columns (`id`, `username`, `team_name`).
    pub fn find_by_native_projection(
        &self,
        session: &mut Session,
        request: &PageRequest,
    ) -> RepoResult<Page<MemberDto>> {
        session
            .native_page(&self.native_projection, &Params::new(), request)?
            .try_map(|row| MemberDto::from_row(&row))
    }
}

impl CrudRepository<Member> for MemberRepository {
    /// `findAll` loads each member's team eagerly.
    fn all_query(&self) -> &CompiledQuery {
        &self.all
    }
}

impl MemberRepositoryCustom for MemberRepository {
    fn find_member_custom(&self, session: &mut Session) -> RepoResult<Vec<Member>> {
        to_entities(session.find(&self.custom_all, &Params::new())?)
    }
}

fn single(record: Option<Record>) -> RepoResult<Option<Member>> {
    record.as_ref().map(Member::from_record).transpose()
}

/// Specifications over `Member`.
pub mod member_spec {
    use crate::query::spec::Spec;

    /// Members of the team named `team_name` (inner join). An empty name
    /// places no constraint.
    pub fn team_name(team_name: &str) -> Spec {
        if team_name.is_empty() {
            Spec::all()
        } else {
            Spec::eq("team.name", team_name)
        }
    }

    pub fn username(username: &str) -> Spec {
        Spec::eq("username", username)
    }
}
