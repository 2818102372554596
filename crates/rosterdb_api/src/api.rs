//! Endpoint-shaped use-case API over the member repository.
//!
//! # Responsibility
//! - Expose stable, use-case-level functions for the member endpoints:
//!   read one member, list a page of member DTOs, seed sample data.
//! - Map repository errors to HTTP-like status codes in one place.
//!
//! # Invariants
//! - Exported functions never panic; every failure becomes a response
//!   envelope with a non-2xx status.
//! - Each call runs in its own session, so no identity map leaks between
//!   calls.

use log::{info, warn};
use rosterdb_core::{
    init_logging as init_logging_inner, CrudRepository, Member, MemberDto, MemberRepository, Page,
    PageRequest, RepoError, RepoResult, Sort, Store, StoreConfig,
};
use serde::{Deserialize, Serialize};

pub const STATUS_OK: u16 = 200;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_NOT_FOUND: u16 = 404;
pub const STATUS_CONFLICT: u16 = 409;
pub const STATUS_INTERNAL: u16 = 500;

/// Initializes core logging once per process.
///
/// Returns an empty string on success and the error message on failure.
pub fn init_logging(level: &str, log_dir: &str) -> String {
    match init_logging_inner(level, log_dir) {
        Ok(status) => {
            info!("event=api_logging module=api status=ok {status}");
            String::new()
        }
        Err(err) => err.to_string(),
    }
}

/// Response envelope shared by every endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiResponse<T> {
    /// HTTP-like status code.
    pub status: u16,
    /// Payload, present only on success.
    pub body: Option<T>,
    /// Human-readable message for diagnostics; empty on success.
    pub message: String,
}

impl<T> ApiResponse<T> {
    fn ok(body: T) -> Self {
        Self {
            status: STATUS_OK,
            body: Some(body),
            message: String::new(),
        }
    }

    fn failure(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: None,
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }
}

/// Paging defaults applied to list requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListDefaults {
    pub page: usize,
    pub size: usize,
    pub max_size: usize,
}

impl Default for ListDefaults {
    fn default() -> Self {
        Self {
            page: 0,
            size: 5,
            max_size: 100,
        }
    }
}

/// Raw list query parameters (`?page=&size=&sort=field,desc`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ListParams {
    pub page: Option<usize>,
    pub size: Option<usize>,
    #[serde(default)]
    pub sort: Vec<String>,
}

/// Store plus the repositories the endpoints use.
pub struct ApiContext {
    store: Store,
    members: MemberRepository,
    defaults: ListDefaults,
}

impl ApiContext {
    pub fn new(store: Store) -> RepoResult<Self> {
        let members = MemberRepository::new(&store)?;
        Ok(Self {
            store,
            members,
            defaults: ListDefaults::default(),
        })
    }

    pub fn open(config: StoreConfig) -> RepoResult<Self> {
        Self::new(Store::open(config)?)
    }

    pub fn with_defaults(mut self, defaults: ListDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn members(&self) -> &MemberRepository {
        &self.members
    }

    /// `GET /members/{id}`: username of the member with `raw_id`.
    pub fn find_member(&self, raw_id: &str) -> ApiResponse<String> {
        let result = parse_id(raw_id).and_then(|id| {
            let mut session = self.store.session();
            self.members.find_by_id(&mut session, id)
        });
        respond("find_member", result, |found| {
            found
                .map(|member| member.username().to_string())
                .ok_or_else(|| not_found(raw_id))
        })
    }

    /// `GET /members2/{id}`: the path segment is converted to the entity
    /// before the handler runs; the handler only sees a `Member`.
    pub fn find_member_by_domain(&self, raw_id: &str) -> ApiResponse<String> {
        respond("find_member_by_domain", self.convert_member(raw_id), |member| {
            member
                .as_ref()
                .map(member_username)
                .ok_or_else(|| not_found(raw_id))
        })
    }

    /// `GET /members`: one page of member DTOs.
    pub fn list_members(&self, params: &ListParams) -> ApiResponse<Page<MemberDto>> {
        let result = self.page_request(params).and_then(|request| {
            let mut session = self.store.session();
            self.members.find_all_paged(&mut session, &request)
        });
        respond("list_members", result, |page| Ok(page.map(|member| MemberDto::from(&member))))
    }

    /// Initialization hook: inserts `user0..user{count-1}`, all aged 10.
    pub fn seed_members(&self, count: usize) -> ApiResponse<usize> {
        respond("seed_members", self.insert_members(count), Ok)
    }

    fn insert_members(&self, count: usize) -> RepoResult<usize> {
        let mut session = self.store.session();
        for i in 0..count {
            self.members
                .save(&mut session, &Member::new(format!("user{i}"), 10))?;
        }
        Ok(count)
    }

    fn convert_member(&self, raw_id: &str) -> RepoResult<Option<Member>> {
        let id = parse_id(raw_id)?;
        let mut session = self.store.session();
        self.members.find_by_id(&mut session, id)
    }

    fn page_request(&self, params: &ListParams) -> RepoResult<PageRequest> {
        let page = params.page.unwrap_or(self.defaults.page);
        let size = match params.size {
            None | Some(0) => self.defaults.size,
            Some(size) => size.min(self.defaults.max_size),
        };
        let mut sort = Sort::unsorted();
        for raw in &params.sort {
            for order in Sort::parse(raw)?.orders() {
                sort = sort.and(order.direction, &order.property);
            }
        }
        PageRequest::of_sorted(page, size, sort)
    }
}

/// Maps a repository error to its status code.
pub fn status_for(err: &RepoError) -> u16 {
    match err {
        RepoError::NotFound { .. } => STATUS_NOT_FOUND,
        RepoError::SchemaMismatch { .. }
        | RepoError::UnboundParameter { .. }
        | RepoError::InvalidParameter { .. }
        | RepoError::MutationType { .. }
        | RepoError::InvalidPageRequest(_)
        | RepoError::InvalidData(_) => STATUS_BAD_REQUEST,
        RepoError::LockConflict { .. } | RepoError::DuplicateIdentifier { .. } => STATUS_CONFLICT,
        // Stored data the store cannot read is never the caller's fault.
        RepoError::CorruptRow(_) => STATUS_INTERNAL,
        _ => STATUS_INTERNAL,
    }
}

fn respond<T, U>(
    endpoint: &str,
    result: RepoResult<T>,
    finish: impl FnOnce(T) -> RepoResult<U>,
) -> ApiResponse<U> {
    match result.and_then(finish) {
        Ok(body) => {
            info!("event=api_call module=api status=ok endpoint={endpoint} code={STATUS_OK}");
            ApiResponse::ok(body)
        }
        Err(err) => {
            let status = status_for(&err);
            warn!(
                "event=api_call module=api status=error endpoint={endpoint} code={status} error=\"{err}\""
            );
            ApiResponse::failure(status, format!("{endpoint} failed: {err}"))
        }
    }
}

fn parse_id(raw: &str) -> RepoResult<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| RepoError::InvalidData(format!("member id `{raw}` is not an integer")))
}

fn not_found(raw_id: &str) -> RepoError {
    RepoError::NotFound {
        entity: "Member".to_string(),
        id: raw_id.trim().to_string(),
    }
}

fn member_username(member: &Member) -> String {
    member.username().to_string()
}
