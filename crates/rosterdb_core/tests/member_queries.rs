use rosterdb_core::query::StringMatcher;
use rosterdb_core::{
    member_spec, CompiledQuery, CrudRepository, Example, ExampleMatcher, Member, MemberDto,
    MemberRepository, MemberRepositoryCustom, Params, RepoError, Session, Store, Team,
    TeamRepository,
};

struct Fixture {
    store: Store,
    members: MemberRepository,
    teams: TeamRepository,
}

fn fixture() -> Fixture {
    let store = Store::open_in_memory().unwrap();
    let members = MemberRepository::new(&store).unwrap();
    let teams = TeamRepository::new(store.registry()).unwrap();
    Fixture {
        store,
        members,
        teams,
    }
}

fn save_member(fixture: &Fixture, session: &mut Session, username: &str, age: i64, team: Option<&Team>) -> Member {
    let member = match team {
        Some(team) => Member::with_team(username, age, team),
        None => Member::new(username, age),
    };
    fixture.members.save(session, &member).unwrap()
}

fn usernames(members: &[Member]) -> Vec<&str> {
    members.iter().map(Member::username).collect()
}

#[test]
fn derived_greater_than_and_less_than_are_disjoint() {
    let fixture = fixture();
    let mut session = fixture.store.session();
    save_member(&fixture, &mut session, "AAA", 10, None);
    save_member(&fixture, &mut session, "AAA", 20, None);

    let older = fixture
        .members
        .find_by_username_and_age_greater_than(&mut session, "AAA", 15)
        .unwrap();
    assert_eq!(older.len(), 1);
    assert_eq!(older[0].age, 20);

    let registry = fixture.store.registry();
    let younger_query =
        CompiledQuery::derived(registry, "Member", "findByUsernameAndAgeLessThan").unwrap();
    let younger = session
        .find(&younger_query, &Params::new().push("AAA").push(15))
        .unwrap();
    assert_eq!(younger.len(), 1);
    assert!(younger.iter().all(|record| older.iter().all(|member| member.id != record.id.as_ref().and_then(|id| id.as_i64()))));
}

#[test]
fn malformed_descriptors_fail_at_build_time() {
    let store = Store::open_in_memory().unwrap();
    let registry = store.registry();
    for method in [
        "findByNickname",
        "findByUsernameAndNickname",
        "findByTeamOwner",
        "findByAgeOrderByNicknameDesc",
    ] {
        assert!(
            matches!(
                CompiledQuery::derived(registry, "Member", method),
                Err(RepoError::SchemaMismatch { .. })
            ),
            "{method} compiled"
        );
    }
    assert!(matches!(
        CompiledQuery::literal(registry, "select m from Member m where m.nickname = :n"),
        Err(RepoError::SchemaMismatch { .. })
    ));
    assert!(matches!(
        CompiledQuery::literal(registry, "select m from Member m where"),
        Err(RepoError::InvalidQuery { .. })
    ));
}

#[test]
fn call_time_binding_errors() {
    let fixture = fixture();
    let mut session = fixture.store.session();
    let registry = fixture.store.registry();
    let query = CompiledQuery::literal(
        registry,
        "select m from Member m where m.username = :username and m.age = :age",
    )
    .unwrap();

    assert!(matches!(
        session.find(&query, &Params::new().bind("username", "m1")),
        Err(RepoError::UnboundParameter { ref parameter, .. }) if parameter == ":age"
    ));
    assert!(matches!(
        session.find(&query, &Params::new().bind("username", "m1").bind("age", "ten")),
        Err(RepoError::InvalidParameter { .. })
    ));
}

#[test]
fn named_and_literal_queries() {
    let fixture = fixture();
    let mut session = fixture.store.session();
    let team = fixture.teams.save(&mut session, &Team::new("teamA")).unwrap();
    save_member(&fixture, &mut session, "AAA", 10, Some(&team));
    save_member(&fixture, &mut session, "BBB", 20, None);

    let by_name = fixture.members.find_by_username(&mut session, "AAA").unwrap();
    assert_eq!(usernames(&by_name), ["AAA"]);

    let user = fixture.members.find_user(&mut session, "AAA", 10).unwrap();
    assert_eq!(user.len(), 1);
    assert!(fixture.members.find_user(&mut session, "AAA", 11).unwrap().is_empty());

    let mut names = fixture.members.find_username_list(&mut session).unwrap();
    names.sort();
    assert_eq!(names, [Some("AAA".to_string()), Some("BBB".to_string())]);

    let dtos = fixture.members.find_member_dto(&mut session).unwrap();
    assert_eq!(
        dtos,
        [MemberDto {
            id: by_name[0].id.unwrap(),
            username: Some("AAA".to_string()),
            team_name: Some("teamA".to_string()),
        }]
    );

    let mut both = fixture
        .members
        .find_by_names(&mut session, &["AAA", "BBB", "CCC"])
        .unwrap();
    both.sort_by(|a, b| a.username.cmp(&b.username));
    assert_eq!(usernames(&both), ["AAA", "BBB"]);

    assert_eq!(fixture.members.find_member_custom(&mut session).unwrap().len(), 2);
}

#[test]
fn single_result_queries() {
    let fixture = fixture();
    let mut session = fixture.store.session();
    save_member(&fixture, &mut session, "AAA", 10, None);
    save_member(&fixture, &mut session, "BBB", 20, None);
    save_member(&fixture, &mut session, "BBB", 30, None);

    assert_eq!(
        fixture.members.find_list_by_username(&mut session, "BBB").unwrap().len(),
        2
    );
    let found = fixture.members.find_member_by_username(&mut session, "AAA").unwrap();
    assert_eq!(found.map(|member| member.age), Some(10));
    assert!(fixture
        .members
        .find_optional_by_username(&mut session, "nobody")
        .unwrap()
        .is_none());
    assert!(matches!(
        fixture.members.find_member_by_username(&mut session, "BBB"),
        Err(RepoError::IncorrectResultSize { actual: 2, .. })
    ));
}

#[test]
fn fetch_join_and_entity_graphs_populate_team() {
    let fixture = fixture();
    let mut session = fixture.store.session();
    let team_a = fixture.teams.save(&mut session, &Team::new("teamA")).unwrap();
    let team_b = fixture.teams.save(&mut session, &Team::new("teamB")).unwrap();
    save_member(&fixture, &mut session, "member1", 10, Some(&team_a));
    save_member(&fixture, &mut session, "member2", 10, Some(&team_b));
    save_member(&fixture, &mut session, "member3", 10, None);

    for members in [
        fixture.members.find_member_fetch_join(&mut session).unwrap(),
        fixture.members.find_member_entity_graph(&mut session).unwrap(),
        fixture.members.find_all(&mut session).unwrap(),
    ] {
        assert_eq!(members.len(), 3);
        let team_names: Vec<Option<&str>> = members
            .iter()
            .map(|member| member.team.as_ref().and_then(|team| team.name.as_deref()))
            .collect();
        assert_eq!(team_names, [Some("teamA"), Some("teamB"), None]);
    }

    let graph = fixture
        .members
        .find_entity_graph_by_username(&mut session, "member1")
        .unwrap();
    assert_eq!(graph[0].team.as_ref().map(|team| team.id), Some(team_a.id));

    // Plain reads never load the relation.
    let plain = fixture.members.find_list_by_username(&mut session, "member1").unwrap();
    assert!(plain[0].team.is_none());
    assert_eq!(plain[0].team_id, team_a.id);
}

#[test]
fn read_only_results_stay_out_of_the_identity_map() {
    let fixture = fixture();
    let mut writer = fixture.store.session();
    let saved = save_member(&fixture, &mut writer, "member1", 10, None);
    let id = saved.id.unwrap().into();

    let mut session = fixture.store.session();
    let read_only = fixture
        .members
        .find_read_only_by_username(&mut session, "member1")
        .unwrap();
    assert!(read_only.is_some());
    assert!(!session.is_cached(&rosterdb_core::model::member::MEMBER, &id));

    fixture.members.find_member_by_username(&mut session, "member1").unwrap();
    assert!(session.is_cached(&rosterdb_core::model::member::MEMBER, &id));
}

#[test]
fn specifications_and_examples() {
    let fixture = fixture();
    let mut session = fixture.store.session();
    let team = fixture.teams.save(&mut session, &Team::new("teamA")).unwrap();
    save_member(&fixture, &mut session, "m1", 0, Some(&team));
    save_member(&fixture, &mut session, "m2", 0, Some(&team));
    save_member(&fixture, &mut session, "m1", 5, None);

    let spec = member_spec::username("m1").and(member_spec::team_name("teamA"));
    let found = fixture.members.find_all_by_spec(&mut session, &spec).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].team_id, team.id);

    // An empty team name is no constraint at all.
    let unconstrained = member_spec::username("m1").and(member_spec::team_name(""));
    assert_eq!(
        fixture.members.find_all_by_spec(&mut session, &unconstrained).unwrap().len(),
        2
    );

    let probe = Member::with_team("m1", 0, &Team::new("teamA"));
    let example = Example::of_entity(&probe, ExampleMatcher::matching().with_ignore_paths(["age"]));
    let matched = fixture.members.find_all_by_example(&mut session, &example).unwrap();
    assert_eq!(usernames(&matched), ["m1"]);
    assert_eq!(matched[0].team_id, team.id);

    let prefix = Example::of_entity(
        &Member::named("m"),
        ExampleMatcher::matching()
            .with_ignore_paths(["age"])
            .with_string_matcher(StringMatcher::StartingWith),
    );
    assert_eq!(fixture.members.find_all_by_example(&mut session, &prefix).unwrap().len(), 3);

    let bad = Example::of_entity(&probe, ExampleMatcher::matching().with_ignore_paths(["nickname"]));
    assert!(matches!(
        fixture.members.find_all_by_example(&mut session, &bad),
        Err(RepoError::SchemaMismatch { .. })
    ));
}

#[test]
fn native_queries_map_rows_and_records() {
    let fixture = fixture();
    let mut session = fixture.store.session();
    let team = fixture.teams.save(&mut session, &Team::new("teamA")).unwrap();
    save_member(&fixture, &mut session, "m1", 0, Some(&team));
    save_member(&fixture, &mut session, "m2", 0, None);

    let native = fixture.members.find_by_native_query(&mut session, "m1").unwrap();
    assert_eq!(native.len(), 1);
    assert_eq!(native[0].team_id, team.id);
    assert!(native[0].audit.created_at.is_some());

    assert!(matches!(
        fixture.store.prepare_native("broken", "select * from nowhere", None),
        Err(RepoError::InvalidQuery { .. })
    ));
}
