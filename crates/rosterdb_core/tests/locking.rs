use rosterdb_core::model::member::MEMBER;
use rosterdb_core::{
    CrudRepository, Member, MemberRepository, RecordId, RepoError, Store, StoreConfig,
};
use std::thread;
use std::time::{Duration, Instant};

fn seeded() -> (Store, MemberRepository, Vec<Member>) {
    let store = Store::open(StoreConfig::in_memory().with_lock_timeout(Duration::from_millis(50))).unwrap();
    let members = MemberRepository::new(&store).unwrap();
    let mut session = store.session();
    let saved = ["member1", "member2"]
        .into_iter()
        .map(|name| members.save(&mut session, &Member::new(name, 10)).unwrap())
        .collect();
    (store, members, saved)
}

#[test]
fn locked_rows_block_other_sessions_until_timeout() {
    let (store, members, saved) = seeded();
    let locked_id = RecordId::from(saved[0].id.unwrap());

    let mut holder = store.session();
    let locked = members.find_lock_by_username(&mut holder, "member1").unwrap();
    assert_eq!(locked.len(), 1);
    assert_eq!(holder.held_locks(), 1);
    // Re-locking own rows is a no-op.
    members.find_lock_by_username(&mut holder, "member1").unwrap();
    assert_eq!(holder.held_locks(), 1);

    let mut other = store.session();
    let started = Instant::now();
    assert!(matches!(
        members.find_lock_by_username(&mut other, "member1"),
        Err(RepoError::LockConflict { ref entity, .. }) if entity == "Member"
    ));
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert!(matches!(
        other.get_by_id(&MEMBER, &locked_id),
        Err(RepoError::LockConflict { .. })
    ));
    assert!(matches!(
        members.bulk_age_plus(&mut other, 0),
        Err(RepoError::LockConflict { .. })
    ));

    // Rows outside the lock stay readable, and counts never wait.
    let unlocked = members.find_list_by_username(&mut other, "member2").unwrap();
    assert_eq!(unlocked.len(), 1);
    assert_eq!(members.count(&mut other).unwrap(), 2);

    // The holder itself reads and writes freely.
    assert_eq!(members.bulk_age_plus(&mut holder, 0).unwrap(), 2);
}

#[test]
fn waiting_session_proceeds_once_holder_ends() {
    let (store, members, saved) = seeded();
    let locked_id = RecordId::from(saved[0].id.unwrap());

    let mut holder = store.session();
    members.find_lock_by_username(&mut holder, "member1").unwrap();

    thread::scope(|scope| {
        let waiter = scope.spawn(|| {
            let mut session = store.session();
            session.set_lock_timeout(Duration::from_secs(5));
            let locked = members.find_lock_by_username(&mut session, "member1").unwrap();
            let reread = session.get_by_id(&MEMBER, &locked_id).unwrap();
            (locked.len(), reread.is_some(), session.held_locks())
        });

        thread::sleep(Duration::from_millis(100));
        assert!(!waiter.is_finished());
        drop(holder);

        let (locked, reread, held) = waiter.join().unwrap();
        assert_eq!(locked, 1);
        assert!(reread);
        assert_eq!(held, 1);
    });

    // Every lock ended with its session.
    let mut session = store.session();
    session.set_lock_timeout(Duration::from_millis(10));
    assert_eq!(members.find_lock_by_username(&mut session, "member1").unwrap().len(), 1);
}

#[test]
fn concurrent_bulk_updates_serialize() {
    let (store, members, _) = seeded();

    thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                scope.spawn(|| {
                    let mut session = store.session();
                    session.set_lock_timeout(Duration::from_secs(5));
                    members.bulk_age_plus(&mut session, 0).unwrap()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 2);
        }
    });

    let mut session = store.session();
    let ages: Vec<i64> = members.find_all(&mut session).unwrap().iter().map(|m| m.age).collect();
    assert_eq!(ages, [14, 14]);
}
