use datarepo_core::{
    open_db_in_memory, Direction, Member, MemberDto, MemberRepository, PageRequest, Session, Sort,
    Team, TeamRepository,
};

fn seed_same_name(session: &Session<'_>) {
    let repo = MemberRepository::new(session).unwrap();
    for age in [10, 10, 10, 10, 10] {
        repo.save(&mut Member::new("member", age)).unwrap();
    }
}

fn desc_by_username(page: usize, size: usize) -> PageRequest {
    PageRequest::with_sort(page, size, Sort::by(Direction::Desc, ["username"])).unwrap()
}

#[test]
fn counted_page_reports_totals() {
    let conn = open_db_in_memory().unwrap();
    let session = Session::with_defaults(&conn).unwrap();
    seed_same_name(&session);
    let repo = MemberRepository::new(&session).unwrap();

    let before = session.stats();
    let page = repo
        .find_page_by_username("member", &desc_by_username(0, 3))
        .unwrap();
    let after = session.stats();

    assert_eq!(page.content().len(), 3);
    assert_eq!(page.total_elements(), 5);
    assert_eq!(page.total_pages(), 2);
    assert_eq!(page.number(), 0);
    assert!(page.is_first());
    assert!(page.has_next());
    assert_eq!(after.count_queries - before.count_queries, 1);

    let last = repo
        .find_page_by_username("member", &desc_by_username(1, 3))
        .unwrap();
    assert_eq!(last.number_of_elements(), 2);
    assert!(last.is_last());
    assert!(last.has_previous());
}

#[test]
fn pages_do_not_overlap_on_tied_sort_keys() {
    let conn = open_db_in_memory().unwrap();
    let session = Session::with_defaults(&conn).unwrap();
    seed_same_name(&session);
    let repo = MemberRepository::new(&session).unwrap();

    let request = desc_by_username(0, 3);
    let mut ids: Vec<i64> = repo
        .find_page_by_username("member", &request)
        .unwrap()
        .content()
        .iter()
        .chain(
            repo.find_page_by_username("member", &request.next())
                .unwrap()
                .content(),
        )
        .filter_map(Member::id)
        .collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 5);
}

#[test]
fn slice_over_fetches_without_counting() {
    let conn = open_db_in_memory().unwrap();
    let session = Session::with_defaults(&conn).unwrap();
    seed_same_name(&session);
    let repo = MemberRepository::new(&session).unwrap();

    let before = session.stats();
    let slice = repo
        .find_slice_by_username("member", &desc_by_username(0, 3))
        .unwrap();
    let after = session.stats();

    assert_eq!(slice.content().len(), 3);
    assert!(slice.has_next());
    assert!(slice.is_first());
    assert_eq!(after.count_queries, before.count_queries);
    assert_eq!(after.selects - before.selects, 1);

    let tail = repo
        .find_slice_by_username("member", &desc_by_username(1, 3))
        .unwrap();
    assert_eq!(tail.content().len(), 2);
    assert!(tail.is_last());
}

#[test]
fn empty_page_is_first_and_last() {
    let conn = open_db_in_memory().unwrap();
    let session = Session::with_defaults(&conn).unwrap();
    let repo = MemberRepository::new(&session).unwrap();

    let page = repo
        .find_page_by_username("nobody", &PageRequest::of(0, 10).unwrap())
        .unwrap();
    assert!(page.content().is_empty());
    assert_eq!(page.total_pages(), 0);
    assert!(page.is_first());
    assert!(page.is_last());
}

#[test]
fn count_query_override_drives_totals() {
    let conn = open_db_in_memory().unwrap();
    let session = Session::with_defaults(&conn).unwrap();
    let mut team = Team::new("teamA");
    TeamRepository::new(&session).unwrap().save(&mut team).unwrap();
    let repo = MemberRepository::new(&session).unwrap();
    for index in 0..4 {
        let mut member = Member::create(format!("m{index}"), 10, Some(&mut team)).unwrap();
        repo.save(&mut member).unwrap();
    }
    repo.save(&mut Member::new("other", 20)).unwrap();

    let request = PageRequest::with_sort(0, 3, Sort::by(Direction::Asc, ["username"])).unwrap();
    let page = repo.find_by_age(10, &request).unwrap();
    let names: Vec<&str> = page.content().iter().map(Member::username).collect();
    assert_eq!(names, ["m0", "m1", "m2"]);
    assert_eq!(page.total_elements(), 4);
    assert_eq!(page.total_pages(), 2);
}

#[test]
fn page_content_maps_to_dtos() {
    let conn = open_db_in_memory().unwrap();
    let session = Session::with_defaults(&conn).unwrap();
    seed_same_name(&session);
    let repo = MemberRepository::new(&session).unwrap();

    let page = repo
        .find_page_by_username("member", &desc_by_username(0, 3))
        .unwrap();
    let dtos = page.map(|member| {
        MemberDto::from_member(&member, member.fetched_team().map(|team| team.name.clone()))
            .unwrap()
    });
    assert_eq!(dtos.content().len(), 3);
    assert_eq!(dtos.total_elements(), 5);
    assert!(dtos.content().iter().all(|dto| dto.team_name.is_none()));

    let json = serde_json::to_value(&dtos).unwrap();
    assert_eq!(json["total_elements"], 5);
    assert_eq!(json["content"][0]["username"], "member");
}

#[test]
fn find_all_page_sorts_with_fetched_team() {
    let conn = open_db_in_memory().unwrap();
    let session = Session::with_defaults(&conn).unwrap();
    let mut team = Team::new("teamA");
    TeamRepository::new(&session).unwrap().save(&mut team).unwrap();
    let repo = MemberRepository::new(&session).unwrap();
    for age in [10, 30, 20] {
        let mut member = Member::create(format!("m{age}"), age, Some(&mut team)).unwrap();
        repo.save(&mut member).unwrap();
    }

    let request = PageRequest::with_sort(0, 2, Sort::by(Direction::Desc, ["age"])).unwrap();
    let page = repo.entities().find_all_page(&request).unwrap();
    let ages: Vec<i32> = page.content().iter().map(Member::age).collect();
    assert_eq!(ages, [30, 20]);
    assert_eq!(page.total_elements(), 3);
    assert!(page
        .content()
        .iter()
        .all(|member| member.fetched_team().map(|team| team.name.as_str()) == Some("teamA")));
}
