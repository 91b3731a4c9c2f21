use roster_core::db::open_db_in_memory;
use roster_core::{
    roster_registry, Criteria, CriteriaRepository, CrudRepository, Member, MemberDto,
    MemberRepository, PageRequest, RepoResult, Sort, SqliteMemberRepository, TransactionBoundary,
    UnitOfWork,
};

/// Five members aged 10 (`member1`..`member5`) and one aged 30.
fn with_members<R>(
    work: impl FnOnce(&UnitOfWork<'_>, &SqliteMemberRepository<'_>) -> RepoResult<R>,
) -> RepoResult<R> {
    let registry = roster_registry().unwrap();
    let conn = open_db_in_memory(&registry).unwrap();
    let boundary = TransactionBoundary::new(&conn, &registry).unwrap();
    boundary.run_rolled_back(|uow| {
        let members = SqliteMemberRepository::try_new(uow)?;
        for index in 1..=5 {
            members.save(&mut Member::new(format!("member{index}"), 10))?;
        }
        members.save(&mut Member::new("elder", 30))?;
        uow.clear();
        work(uow, &members)
    })
}

fn usernames(members: &[Member]) -> Vec<&str> {
    members.iter().map(|member| member.username.as_str()).collect()
}

#[test]
fn derived_page_reports_totals_and_neighbours() {
    let age_ten = Criteria::field("age").equals(10);
    let (first, second) = with_members(|_, members| {
        let request = PageRequest::of(0, 3)?.with_sort(Sort::desc("username"));
        let first = members.find_page(Some(&age_ten), &request)?;
        let request = PageRequest::of(1, 3)?.with_sort(Sort::desc("username"));
        let second = members.find_page(Some(&age_ten), &request)?;
        Ok((first, second))
    })
    .unwrap();

    assert_eq!(usernames(first.content()), vec!["member5", "member4", "member3"]);
    assert_eq!(first.total_elements(), 5);
    assert_eq!(first.total_pages(), 2);
    assert!(first.is_first());
    assert!(first.has_next());

    assert_eq!(usernames(second.content()), vec!["member2", "member1"]);
    assert_eq!(second.number(), 1);
    assert_eq!(second.total_elements(), 5);
    assert!(!second.is_first());
    assert!(!second.has_next());
}

#[test]
fn named_page_uses_registered_count_query() {
    let page = with_members(|_, members| {
        members.find_by_age(10, &PageRequest::of(0, 3)?.with_sort(Sort::asc("username")))
    })
    .unwrap();

    assert_eq!(usernames(page.content()), vec!["member1", "member2", "member3"]);
    assert_eq!(page.total_elements(), 5);
    assert_eq!(page.total_pages(), 2);
    assert!(page.has_next());

    let dtos = page.map(|member| MemberDto::from_member(&member));
    assert_eq!(dtos.total_elements(), 5);
    assert_eq!(
        dtos.content()[0].as_ref().map(|dto| dto.username.as_str()),
        Some("member1")
    );
}

#[test]
fn count_query_is_skipped_when_the_window_proves_the_total() {
    let (short_statements, full_statements) = with_members(|uow, members| {
        let before = uow.statement_count();
        let page = members.find_by_age(10, &PageRequest::of(0, 10)?)?;
        assert_eq!(page.total_elements(), 5);
        let short_statements = uow.statement_count() - before;

        let before = uow.statement_count();
        members.find_by_age(10, &PageRequest::of(0, 3)?)?;
        Ok((short_statements, uow.statement_count() - before))
    })
    .unwrap();
    assert_eq!(short_statements, 1);
    assert_eq!(full_statements, 2);
}

#[test]
fn slice_reports_only_whether_more_rows_exist() {
    let (first, last) = with_members(|uow, members| {
        let before = uow.statement_count();
        let first = members.find_slice_by_age(10, &PageRequest::of(0, 3)?)?;
        assert_eq!(uow.statement_count() - before, 1);
        let last = members.find_slice_by_age(10, &PageRequest::of(1, 3)?)?;
        Ok((first, last))
    })
    .unwrap();

    assert_eq!(first.number_of_elements(), 3);
    assert!(first.has_next());
    assert_eq!(usernames(last.content()), vec!["member4", "member5"]);
    assert!(!last.has_next());
}

#[test]
fn plain_window_returns_exactly_the_requested_rows() {
    let window = with_members(|_, members| members.find_window_by_age(10, &PageRequest::of(1, 2)?))
        .unwrap();
    assert_eq!(usernames(&window), vec!["member3", "member4"]);

    let derived = with_members(|_, members| members.find_window(None, &PageRequest::of(2, 2)?))
        .unwrap();
    assert_eq!(usernames(&derived), vec!["member5", "elder"]);
}

#[test]
fn requests_beyond_the_last_page_are_empty() {
    let (page, slice) = with_members(|_, members| {
        Ok((
            members.find_by_age(10, &PageRequest::of(4, 3)?)?,
            members.find_slice(None, &PageRequest::of(9, 3)?)?,
        ))
    })
    .unwrap();

    assert!(page.content().is_empty());
    assert_eq!(page.total_elements(), 5);
    assert!(!page.has_next());
    assert!(slice.content().is_empty());
    assert!(!slice.has_next());
}

#[test]
fn ties_are_broken_by_identifier() {
    let page = with_members(|_, members| {
        members.find_page(None, &PageRequest::of(0, 6)?.with_sort(Sort::desc("age")))
    })
    .unwrap();
    assert_eq!(
        usernames(page.content()),
        vec!["elder", "member1", "member2", "member3", "member4", "member5"]
    );
    assert_eq!(page.total_elements(), 6);
}
