use rosterdb_core::{
    CompiledQuery, CrudRepository, Member, MemberRepository, Params, Record, RecordId, Session,
    Store, Team, TeamRepository, Value,
};

fn ids<'r>(records: impl IntoIterator<Item = &'r Record>) -> Vec<i64> {
    let mut ids: Vec<i64> = records
        .into_iter()
        .filter_map(|record| record.id.as_ref().and_then(RecordId::as_i64))
        .collect();
    ids.sort_unstable();
    ids
}

fn seeded() -> Store {
    let store = Store::open_in_memory().unwrap();
    let members = MemberRepository::new(&store).unwrap();
    let teams = TeamRepository::new(store.registry()).unwrap();
    let mut session = store.session();
    let team_a = teams.save(&mut session, &Team::new("teamA")).unwrap();
    let team_b = teams.save(&mut session, &Team::new("teamB")).unwrap();
    for member in [
        Member::with_team("member1", 10, &team_a),
        Member::with_team("Member2", 20, &team_a),
        Member::with_team("élan", 30, &team_b),
        Member::new("m_3", 40),
        Member {
            age: 20,
            ..Member::default()
        },
    ] {
        members.save(&mut session, &member).unwrap();
    }
    store
}

/// Runs `query` through SQL and through `matches` over every member, and
/// checks both select the same rows.
fn assert_agrees(session: &mut Session, universe: &[Record], method: &str, params: Params) -> usize {
    let query = CompiledQuery::derived(session.registry(), "Member", method).unwrap();
    let from_sql = session.find(&query, &params).unwrap();
    let filter = query.predicate().bind(query.name(), &params).unwrap();
    let in_memory: Vec<&Record> = universe.iter().filter(|record| filter.matches(record)).collect();
    assert_eq!(ids(&from_sql), ids(in_memory), "{method}");
    from_sql.len()
}

#[test]
fn in_memory_evaluation_agrees_with_sql() {
    let store = seeded();
    let mut session = store.session();
    let everyone =
        CompiledQuery::literal(store.registry(), "select m from Member m left join fetch m.team").unwrap();
    let universe = session.find(&everyone, &Params::new()).unwrap();
    assert_eq!(universe.len(), 5);

    let cases: Vec<(&str, Params, usize)> = vec![
        ("findByUsername", Params::new().push("member1"), 1),
        ("findByUsernameLike", Params::new().push("MEM%"), 2),
        ("findByUsernameLike", Params::new().push("_lan"), 1),
        ("findByUsernameLike", Params::new().push("m_3"), 1),
        ("findByUsernameNotLike", Params::new().push("mem%"), 2),
        ("findByUsernameStartingWith", Params::new().push("m_"), 1),
        ("findByUsernameContaining", Params::new().push("BER"), 2),
        ("findByAgeIn", Params::new().push(vec![10, 30]), 2),
        ("findByAgeNotIn", Params::new().push(Vec::<i64>::new()), 5),
        ("findByUsernameIn", Params::new().push(Vec::<String>::new()), 0),
        ("findByUsernameNotIn", Params::new().push(vec!["member1"]), 3),
        ("findByAgeBetween", Params::new().push(20).push(30), 3),
        ("findByAgeGreaterThan", Params::new().push(20), 2),
        ("findByUsernameIsNull", Params::new(), 1),
        ("findByUsernameIsNotNull", Params::new(), 4),
        ("findByTeamName", Params::new().push("teamA"), 2),
    ];
    for (method, params, expected) in cases {
        assert_eq!(assert_agrees(&mut session, &universe, method, params), expected, "{method}");
    }
}

#[test]
fn null_arguments_match_null_fields_in_both_paths() {
    let store = seeded();
    let mut session = store.session();
    let everyone =
        CompiledQuery::literal(store.registry(), "select m from Member m left join fetch m.team").unwrap();
    let universe = session.find(&everyone, &Params::new()).unwrap();

    assert_eq!(
        assert_agrees(&mut session, &universe, "findByUsername", Params::new().push(Value::Null)),
        1
    );
    assert_eq!(assert_agrees(&mut session, &universe, "findByTeamId", Params::new().push(Value::Null)), 2);
}
