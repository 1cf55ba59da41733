use datarepo_core::mapping::MEMBER;
use datarepo_core::{
    open_db_in_memory, ArgValue, Args, EntityRepository, Member, MemberRepository, MethodDecl,
    QueryRegistry, RepoError, ReturnKind, Session, SessionConfig, Team, TeamRepository, TxMode,
};
use rusqlite::Connection;

fn seed_ages(session: &Session<'_>) {
    let repo = MemberRepository::new(session).unwrap();
    for (name, age) in [
        ("member1", 10),
        ("member2", 19),
        ("member3", 20),
        ("member4", 21),
        ("member5", 40),
    ] {
        repo.save(&mut Member::new(name, age)).unwrap();
    }
}

fn age_of(conn: &Connection, username: &str) -> i32 {
    conn.query_row(
        "SELECT age FROM members WHERE username = ?1",
        [username],
        |row| row.get(0),
    )
    .unwrap()
}

#[test]
fn bulk_update_returns_count_and_later_reads_see_it() {
    let conn = open_db_in_memory().unwrap();
    let session = Session::with_defaults(&conn).unwrap();
    seed_ages(&session);
    let repo = MemberRepository::new(&session).unwrap();

    session
        .transaction(TxMode::Write, |s| {
            let before = repo.find_by_username("member5")?;
            assert_eq!(before[0].age(), 40);
            assert!(s.tracked_count() > 0);

            let updated = repo.bulk_age_plus(20)?;
            assert_eq!(updated, 3);
            assert_eq!(s.tracked_count(), 0);

            let after = repo.find_by_username("member5")?;
            assert_eq!(after[0].age(), 41);
            Ok(())
        })
        .unwrap();

    assert_eq!(age_of(&conn, "member2"), 19);
    assert_eq!(age_of(&conn, "member3"), 21);
}

#[test]
fn bulk_outside_write_boundary_is_rejected() {
    let conn = open_db_in_memory().unwrap();
    let session = Session::with_defaults(&conn).unwrap();
    seed_ages(&session);
    let repo = MemberRepository::new(&session).unwrap();

    assert!(matches!(
        repo.bulk_age_plus(20),
        Err(RepoError::StateConflict(_))
    ));

    session.begin(TxMode::Read).unwrap();
    assert!(matches!(
        repo.bulk_age_plus(20),
        Err(RepoError::StateConflict(_))
    ));
    session.rollback().unwrap();
    assert_eq!(age_of(&conn, "member5"), 40);
}

#[test]
fn disabled_auto_clear_exposes_stale_reads() {
    let conn = open_db_in_memory().unwrap();
    let session = Session::new(
        &conn,
        SessionConfig {
            auto_clear_after_bulk: false,
            ..SessionConfig::default()
        },
    )
    .unwrap();
    seed_ages(&session);
    let registry = QueryRegistry::build(
        &MEMBER,
        &[MethodDecl::declared(
            "agePlusKeepingCache",
            "update Member m set m.age = m.age + 1 where m.age >= :age",
            ReturnKind::Modifying,
        )
        .params(&["age"])],
    )
    .unwrap();
    let repo = EntityRepository::<Member>::new(&session, &registry).unwrap();
    let args = Args::positional([ArgValue::text("member5")]);

    session
        .transaction(TxMode::Write, |s| {
            let cached = repo.query_list("findByUsername", &args)?;
            assert_eq!(cached[0].age(), 40);

            let updated = repo.execute_modifying(
                "agePlusKeepingCache",
                &Args::named([("age", ArgValue::int(20))]),
            )?;
            assert_eq!(updated, 3);
            assert!(s.tracked_count() > 0);

            // The cached state wins over the fresh row.
            let stale = repo.query_list("findByUsername", &args)?;
            assert_eq!(stale[0].age(), 40);

            s.clear();
            let fresh = repo.query_list("findByUsername", &args)?;
            assert_eq!(fresh[0].age(), 41);
            Ok(())
        })
        .unwrap();
}

#[test]
fn staged_changes_are_flushed_before_bulk_statements() {
    let conn = open_db_in_memory().unwrap();
    let session = Session::with_defaults(&conn).unwrap();
    seed_ages(&session);
    let repo = MemberRepository::new(&session).unwrap();

    session
        .transaction(TxMode::Write, |s| {
            let mut member = repo.find_by_username("member1")?.remove(0);
            member.change_name("renamed");
            repo.save(&mut member)?;
            assert_eq!(s.pending_count(), 1);

            let removed = repo
                .entities()
                .execute_modifying("deleteByUsername", &Args::positional(["renamed".into()]))?;
            assert_eq!(removed, 1);
            Ok(())
        })
        .unwrap();

    assert_eq!(repo.count().unwrap(), 4);
}

#[test]
fn rollback_discards_staged_updates() {
    let conn = open_db_in_memory().unwrap();
    let session = Session::with_defaults(&conn).unwrap();
    seed_ages(&session);
    let repo = MemberRepository::new(&session).unwrap();
    let id = repo.find_by_username("member1").unwrap()[0].id().unwrap();

    session.begin(TxMode::Write).unwrap();
    let mut member = repo.find_by_id(id).unwrap().unwrap();
    member.change_name("never-committed");
    repo.save(&mut member).unwrap();
    assert_eq!(session.pending_count(), 1);
    session.rollback().unwrap();

    assert_eq!(session.pending_count(), 0);
    let reloaded = repo.find_by_id(id).unwrap().unwrap();
    assert_eq!(reloaded.username(), "member1");
}

#[test]
fn failed_transaction_closure_rolls_back_inserts() {
    let conn = open_db_in_memory().unwrap();
    let session = Session::with_defaults(&conn).unwrap();
    let repo = MemberRepository::new(&session).unwrap();

    let err = session
        .transaction(TxMode::Write, |_| {
            repo.save(&mut Member::new("memberA", 10))?;
            repo.save(&mut Member::new("", 10))
        })
        .unwrap_err();
    assert!(matches!(err, RepoError::Validation(_)));
    assert_eq!(repo.count().unwrap(), 0);
}

#[test]
fn write_inside_read_boundary_is_a_state_conflict() {
    let conn = open_db_in_memory().unwrap();
    let session = Session::with_defaults(&conn).unwrap();
    let repo = MemberRepository::new(&session).unwrap();

    let result = session.transaction(TxMode::Read, |_| repo.save(&mut Member::new("memberA", 10)));
    assert!(matches!(result, Err(RepoError::StateConflict(_))));
}

#[test]
fn read_only_results_are_not_tracked() {
    let conn = open_db_in_memory().unwrap();
    let session = Session::with_defaults(&conn).unwrap();
    seed_ages(&session);
    let repo = MemberRepository::new(&session).unwrap();

    session
        .transaction(TxMode::Write, |s| {
            let mut read_only = repo
                .find_read_only_by_username("member1")?
                .ok_or(RepoError::InvalidArgument("member1 is missing".to_string()))?;
            assert!(!s.is_tracked(&read_only));
            assert_eq!(s.tracked_count(), 0);

            // Local edits to an untracked result are never flushed.
            read_only.change_name("edited");
            s.flush()?;

            let tracked = repo.find_by_username("member1")?;
            assert_eq!(tracked.len(), 1);
            assert!(s.is_tracked(&tracked[0]));
            Ok(())
        })
        .unwrap();
}

#[test]
fn entity_graph_avoids_extra_round_trips() {
    let conn = open_db_in_memory().unwrap();
    let session = Session::with_defaults(&conn).unwrap();
    let teams = TeamRepository::new(&session).unwrap();
    let members = MemberRepository::new(&session).unwrap();
    let mut team_a = Team::new("teamA");
    let mut team_b = Team::new("teamB");
    teams.save(&mut team_a).unwrap();
    teams.save(&mut team_b).unwrap();
    members
        .save(&mut Member::create("member1", 10, Some(&mut team_a)).unwrap())
        .unwrap();
    members
        .save(&mut Member::create("member2", 20, Some(&mut team_b)).unwrap())
        .unwrap();

    session
        .transaction(TxMode::Read, |s| {
            let start = s.stats().selects;
            let lazy = members.find_member_custom()?;
            for member in &lazy {
                assert!(members.team_of(member)?.is_some());
            }
            let lazy_selects = s.stats().selects - start;

            s.clear();
            let start = s.stats().selects;
            let eager = members.find_all()?;
            let names: Vec<String> = eager
                .iter()
                .map(|member| members.team_of(member).map(|team| team.unwrap().name))
                .collect::<Result<_, _>>()?;
            let eager_selects = s.stats().selects - start;

            assert_eq!(names, ["teamA", "teamB"]);
            assert_eq!(lazy_selects, 3);
            assert_eq!(eager_selects, 1);
            Ok(())
        })
        .unwrap();

    let graph = members.find_entity_graph_by_username("member2").unwrap();
    assert_eq!(graph[0].fetched_team().unwrap().name, "teamB");
    let declared = members.find_members().unwrap();
    assert_eq!(declared.len(), 2);
    assert!(declared.iter().all(|member| member.fetched_team().is_some()));
    let joined = members.find_member_fetch_join().unwrap();
    assert_eq!(joined, declared);
}
