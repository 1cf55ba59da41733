use datarepo_core::{
    open_db, Member, MemberRepository, RepoError, Session, SessionConfig, TxMode,
};
use std::time::Duration;

const SHORT_TIMEOUT: Duration = Duration::from_millis(100);

fn short_timeout() -> SessionConfig {
    SessionConfig {
        lock_timeout: SHORT_TIMEOUT,
        ..SessionConfig::default()
    }
}

#[test]
fn lock_query_requires_write_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_db(dir.path().join("lock.db")).unwrap();
    let session = Session::with_defaults(&conn).unwrap();
    let repo = MemberRepository::new(&session).unwrap();
    repo.save(&mut Member::new("memberA", 10)).unwrap();

    assert!(matches!(
        repo.find_lock_by_username("memberA"),
        Err(RepoError::StateConflict(_))
    ));

    let locked = session
        .transaction(TxMode::Write, |_| repo.find_lock_by_username("memberA"))
        .unwrap();
    assert_eq!(locked.map(|member| member.age()), Some(10));
}

#[test]
fn competing_writer_times_out_while_lock_is_held() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lock.db");
    let holder_conn = open_db(&path).unwrap();
    let waiter_conn = open_db(&path).unwrap();

    let holder = Session::with_defaults(&holder_conn).unwrap();
    let holder_repo = MemberRepository::new(&holder).unwrap();
    holder_repo.save(&mut Member::new("memberA", 10)).unwrap();

    let waiter = Session::new(&waiter_conn, short_timeout()).unwrap();
    let waiter_repo = MemberRepository::new(&waiter).unwrap();

    holder.begin(TxMode::Write).unwrap();
    let locked = holder_repo.find_lock_by_username("memberA").unwrap();
    assert!(locked.is_some());

    let err = waiter
        .transaction(TxMode::Write, |_| waiter_repo.find_lock_by_username("memberA"))
        .unwrap_err();
    assert!(matches!(err, RepoError::LockTimeout(waited) if waited == SHORT_TIMEOUT));
    assert!(!waiter.in_transaction());

    holder.commit().unwrap();
    let after = waiter
        .transaction(TxMode::Write, |_| waiter_repo.find_lock_by_username("memberA"))
        .unwrap();
    assert!(after.is_some());
}

#[test]
fn lock_holder_writes_are_visible_after_commit() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lock.db");
    let holder_conn = open_db(&path).unwrap();
    let reader_conn = open_db(&path).unwrap();

    let holder = Session::with_defaults(&holder_conn).unwrap();
    let holder_repo = MemberRepository::new(&holder).unwrap();
    holder_repo.save(&mut Member::new("memberA", 10)).unwrap();

    holder
        .transaction(TxMode::Write, |_| {
            let mut member = holder_repo
                .find_lock_by_username("memberA")?
                .ok_or(RepoError::InvalidArgument("memberA is missing".to_string()))?;
            member.change_name("memberB");
            holder_repo.save(&mut member)
        })
        .unwrap();

    let reader = Session::new(&reader_conn, short_timeout()).unwrap();
    let reader_repo = MemberRepository::new(&reader).unwrap();
    assert_eq!(reader_repo.find_by_username("memberB").unwrap().len(), 1);
}
