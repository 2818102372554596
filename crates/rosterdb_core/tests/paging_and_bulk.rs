use rosterdb_core::model::member::MEMBER;
use rosterdb_core::model::schema::FieldPath;
use rosterdb_core::query::predicate::{Arg, ClauseDef, Comparator, Operand};
use rosterdb_core::{
    BulkUpdate, CrudRepository, Direction, Member, MemberRepository, PageRequest, Params,
    RecordId, RepoError, Session, Sort, Store, Team, TeamRepository,
};

fn seed(members: &MemberRepository, session: &mut Session, rows: &[(&str, i64)]) -> Vec<Member> {
    rows.iter()
        .map(|(username, age)| members.save(session, &Member::new(*username, *age)).unwrap())
        .collect()
}

fn by_username_desc(page: usize, size: usize) -> PageRequest {
    PageRequest::of_sorted(page, size, Sort::by(Direction::Desc, "username")).unwrap()
}

#[test]
fn five_members_in_pages_of_three() {
    let store = Store::open_in_memory().unwrap();
    let members = MemberRepository::new(&store).unwrap();
    let mut session = store.session();
    seed(
        &members,
        &mut session,
        &[("member1", 10), ("member2", 10), ("member3", 10), ("member4", 10), ("member5", 10)],
    );

    let first = members.find_by_age(&mut session, 10, &by_username_desc(0, 3)).unwrap();
    let names: Vec<&str> = first.content.iter().map(Member::username).collect();
    assert_eq!(names, ["member5", "member4", "member3"]);
    assert_eq!(first.total_elements, 5);
    assert_eq!(first.total_pages, 2);
    assert_eq!(first.number, 0);
    assert!(first.first);
    assert!(first.has_next);

    let second = members.find_by_age(&mut session, 10, &by_username_desc(1, 3)).unwrap();
    assert_eq!(second.content.len(), 2);
    assert_eq!(second.total_elements, 5);
    assert!(!second.has_next);
    assert!(second.last);

    let beyond = members.find_by_age(&mut session, 10, &by_username_desc(4, 3)).unwrap();
    assert!(beyond.content.is_empty());
    assert_eq!(beyond.total_elements, 5);
    assert!(!beyond.has_next);

    let slice = members.find_slice_by_age(&mut session, 10, &by_username_desc(0, 3)).unwrap();
    assert_eq!(slice.content.len(), 3);
    assert!(slice.has_next);
    let last_slice = members.find_slice_by_age(&mut session, 10, &by_username_desc(1, 3)).unwrap();
    assert_eq!(last_slice.content.len(), 2);
    assert!(!last_slice.has_next);

    let dtos = first.map(|member| member.username().to_uppercase());
    assert_eq!(dtos.content, ["MEMBER5", "MEMBER4", "MEMBER3"]);
    assert_eq!(dtos.total_pages, 2);
}

#[test]
fn invalid_page_requests_fail_before_store_access() {
    let store = Store::open_in_memory().unwrap();
    let members = MemberRepository::new(&store).unwrap();
    let mut session = store.session();

    assert!(matches!(PageRequest::of(0, 0), Err(RepoError::InvalidPageRequest(_))));
    let bad_sort = PageRequest::of_sorted(0, 3, Sort::by(Direction::Asc, "nickname")).unwrap();
    assert!(matches!(
        members.find_by_age(&mut session, 10, &bad_sort),
        Err(RepoError::SchemaMismatch { .. })
    ));
    assert!(matches!(
        members.find_all_paged(&mut session, &bad_sort),
        Err(RepoError::SchemaMismatch { .. })
    ));
}

#[test]
fn separate_count_query_counts_usernames_only() {
    let store = Store::open_in_memory().unwrap();
    let members = MemberRepository::new(&store).unwrap();
    let mut session = store.session();
    seed(&members, &mut session, &[("m1", 10), ("m2", 10), ("m3", 10)]);
    let nameless = Member {
        age: 10,
        ..Member::default()
    };
    members.save(&mut session, &nameless).unwrap();

    let page = members
        .find_member_all_count_by(&mut session, &PageRequest::of(0, 2).unwrap())
        .unwrap();
    assert_eq!(page.content.len(), 2);
    assert_eq!(page.total_elements, 3);

    let all = members.find_all_paged(&mut session, &PageRequest::of(0, 2).unwrap()).unwrap();
    assert_eq!(all.total_elements, 4);
}

#[test]
fn sort_by_related_field_and_native_page() {
    let store = Store::open_in_memory().unwrap();
    let members = MemberRepository::new(&store).unwrap();
    let teams = TeamRepository::new(store.registry()).unwrap();
    let mut session = store.session();
    let team_b = teams.save(&mut session, &Team::new("teamB")).unwrap();
    let team_a = teams.save(&mut session, &Team::new("teamA")).unwrap();
    members.save(&mut session, &Member::with_team("m1", 10, &team_b)).unwrap();
    members.save(&mut session, &Member::with_team("m2", 10, &team_a)).unwrap();
    members.save(&mut session, &Member::new("m3", 10)).unwrap();

    let request = PageRequest::of_sorted(0, 2, Sort::by(Direction::Asc, "team.name")).unwrap();
    let page = members.find_all_paged(&mut session, &request).unwrap();
    // NULL team names sort first in ascending order.
    let names: Vec<&str> = page.content.iter().map(Member::username).collect();
    assert_eq!(names, ["m3", "m2"]);
    assert_eq!(page.total_elements, 3);

    let native_request = PageRequest::of_sorted(0, 2, Sort::by(Direction::Desc, "username")).unwrap();
    let native = members.find_by_native_projection(&mut session, &native_request).unwrap();
    assert_eq!(native.total_elements, 3);
    assert_eq!(native.content[0].username.as_deref(), Some("m3"));
    assert_eq!(native.content[1].team_name.as_deref(), Some("teamA"));

    let unknown = PageRequest::of_sorted(0, 2, Sort::by(Direction::Asc, "age")).unwrap();
    assert!(matches!(
        members.find_by_native_projection(&mut session, &unknown),
        Err(RepoError::SchemaMismatch { .. })
    ));
}

#[test]
fn bulk_age_plus_updates_matches_and_invalidates_caches() {
    let store = Store::open_in_memory().unwrap();
    let members = MemberRepository::new(&store).unwrap();
    let mut session = store.session();
    let saved = seed(
        &members,
        &mut session,
        &[("member1", 10), ("member2", 19), ("member3", 20), ("member4", 21), ("member5", 40)],
    );
    let oldest = saved[4].id.unwrap();

    // Another session holds a cached copy too.
    let mut other = store.session();
    assert_eq!(members.find_by_id(&mut other, oldest).unwrap().unwrap().age, 40);

    let affected = members.bulk_age_plus(&mut session, 20).unwrap();
    assert_eq!(affected, 3);
    assert!(!session.is_cached(&MEMBER, &RecordId::from(oldest)));

    let reloaded = members.find_member_by_username(&mut session, "member5").unwrap().unwrap();
    assert_eq!(reloaded.age, 41);
    assert_eq!(members.find_by_id(&mut other, oldest).unwrap().unwrap().age, 41);

    let mut ages: Vec<i64> = members.find_all(&mut session).unwrap().iter().map(|m| m.age).collect();
    ages.sort_unstable();
    assert_eq!(ages, [10, 19, 21, 22, 41]);
}

#[test]
fn builder_updates_validate_types_and_skip_eviction_when_asked() {
    let store = Store::open_in_memory().unwrap();
    let members = MemberRepository::new(&store).unwrap();
    let teams = TeamRepository::new(store.registry()).unwrap();
    let mut session = store.session();
    let team = teams.save(&mut session, &Team::new("teamA")).unwrap();
    let member = members.save(&mut session, &Member::new("m1", 10)).unwrap();
    let id = RecordId::from(member.id.unwrap());

    let registry = store.registry();
    let move_team = BulkUpdate::builder(registry, "Member")
        .named("moveTeam")
        .set("team_id", Arg::named("team"))
        .filter(ClauseDef::new(
            FieldPath::root("username"),
            Comparator::Eq,
            Operand::One(Arg::named("username")),
        ))
        .clear_automatically(false)
        .build()
        .unwrap();

    assert!(matches!(
        session.execute_update(
            &move_team,
            &Params::new().bind("team", "teamA").bind("username", "m1")
        ),
        Err(RepoError::MutationType { .. })
    ));
    assert!(matches!(
        session.execute_update(&move_team, &Params::new().bind("team", team.id.unwrap())),
        Err(RepoError::UnboundParameter { .. })
    ));

    let params = Params::new()
        .bind("team", team.id.unwrap())
        .bind("username", "m1");
    assert_eq!(session.execute_update(&move_team, &params).unwrap(), 1);
    // Still present, but stale: the next read goes to the store.
    assert_eq!(session.cached_len(), 2);
    assert!(!session.is_cached(&MEMBER, &id));
    let moved = members.find_by_id(&mut session, member.id.unwrap()).unwrap().unwrap();
    assert_eq!(moved.team_id, team.id);

    assert!(matches!(
        BulkUpdate::builder(registry, "Member").add("username", Arg::literal(1)).build(),
        Err(RepoError::MutationType { .. })
    ));
    assert!(matches!(
        BulkUpdate::builder(registry, "Member").set("created_at", Arg::literal(1)).build(),
        Err(RepoError::SchemaMismatch { .. })
    ));
}

#[test]
fn oversized_pages_return_every_row() {
    let store = Store::open_in_memory().unwrap();
    let members = MemberRepository::new(&store).unwrap();
    let mut session = store.session();
    seed(&members, &mut session, &[("member1", 10), ("member2", 10), ("member3", 20)]);

    let everything = PageRequest::of(0, usize::MAX).unwrap();
    let slice = members.find_slice_by_age(&mut session, 10, &everything).unwrap();
    assert_eq!(slice.content.len(), 2);
    assert!(!slice.has_next);

    let page = members.find_by_age(&mut session, 10, &everything).unwrap();
    assert_eq!(page.content.len(), 2);
    assert_eq!(page.total_elements, 2);
    assert_eq!(page.total_pages, 1);
    assert!(page.last);

    let native = members.find_by_native_projection(&mut session, &everything).unwrap();
    assert_eq!(native.content.len(), 3);
    assert_eq!(native.total_elements, 3);

    // An offset SQLite cannot represent is still a request error.
    let beyond = PageRequest::of(1, usize::MAX).unwrap();
    assert!(matches!(
        members.find_by_age(&mut session, 10, &beyond),
        Err(RepoError::InvalidPageRequest(_))
    ));
}
