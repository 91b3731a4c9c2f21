use roster_core::db::open_db_in_memory;
use roster_core::{
    roster_registry, BulkUpdate, Criteria, CriteriaRepository, CrudRepository, Member,
    MemberRepository, RepoError, SqliteMemberRepository, TransactionBoundary,
};

#[test]
fn bulk_age_plus_updates_every_member_at_or_above_the_threshold() {
    let registry = roster_registry().unwrap();
    let conn = open_db_in_memory(&registry).unwrap();
    let boundary = TransactionBoundary::new(&conn, &registry).unwrap();

    let affected = boundary
        .run(|uow| {
            let members = SqliteMemberRepository::try_new(uow)?;
            for (index, age) in [10, 19, 20, 21, 40].into_iter().enumerate() {
                members.save(&mut Member::new(format!("member{}", index + 1), age))?;
            }
            members.bulk_age_plus(20)
        })
        .unwrap();
    assert_eq!(affected, 3);

    let ages = boundary
        .run(|uow| {
            let members = SqliteMemberRepository::try_new(uow)?;
            Ok(members
                .find_all()?
                .into_iter()
                .map(|member| member.age)
                .collect::<Vec<_>>())
        })
        .unwrap();
    assert_eq!(ages, vec![10, 19, 21, 22, 41]);
}

#[test]
fn managed_members_stay_stale_until_the_unit_of_work_is_cleared() {
    let registry = roster_registry().unwrap();
    let conn = open_db_in_memory(&registry).unwrap();
    let boundary = TransactionBoundary::new(&conn, &registry).unwrap();

    boundary
        .run(|uow| {
            let members = SqliteMemberRepository::try_new(uow)?;
            let mut member5 = Member::new("member5", 40);
            let id = members.save(&mut member5)?;
            let updated_before = member5.audit_fields().updated_date();

            assert_eq!(members.bulk_age_plus(20)?, 1);
            let stale = members.find_by_id(id)?.unwrap();
            assert_eq!(stale.age, 40);
            let listed = members.find_all()?;
            assert_eq!(listed[0].age, 40);

            uow.clear();
            let fresh = members.find_by_id(id)?.unwrap();
            assert_eq!(fresh.age, 41);
            assert_eq!(fresh.audit_fields().updated_date(), updated_before);
            Ok(())
        })
        .unwrap();
}

#[test]
fn generic_bulk_update_sets_values_on_matching_rows() {
    let registry = roster_registry().unwrap();
    let conn = open_db_in_memory(&registry).unwrap();
    let boundary = TransactionBoundary::new(&conn, &registry).unwrap();

    let renamed = boundary
        .run_rolled_back(|uow| {
            let members = SqliteMemberRepository::try_new(uow)?;
            for (username, age) in [("a", 10), ("b", 20), ("c", 30)] {
                members.save(&mut Member::new(username, age))?;
            }
            let affected = members.bulk_update(
                &BulkUpdate::new()
                    .set("username", "senior")
                    .filter(Criteria::field("age").greater_than(15)),
            )?;
            assert_eq!(affected, 2);
            uow.clear();
            members.count_by(&Criteria::field("username").equals("senior"))
        })
        .unwrap();
    assert_eq!(renamed, 2);
}

#[test]
fn bulk_update_refuses_identifier_and_audit_creation_columns() {
    let registry = roster_registry().unwrap();
    let conn = open_db_in_memory(&registry).unwrap();
    let boundary = TransactionBoundary::new(&conn, &registry).unwrap();

    let err = boundary
        .run(|uow| {
            SqliteMemberRepository::try_new(uow)?
                .bulk_update(&BulkUpdate::new().set("id", 7))
        })
        .unwrap_err();
    assert!(matches!(err, RepoError::UnsupportedOperation(_)));

    let err = boundary
        .run(|uow| {
            SqliteMemberRepository::try_new(uow)?
                .bulk_update(&BulkUpdate::new().set("created_date", 0))
        })
        .unwrap_err();
    assert!(matches!(err, RepoError::UnsupportedOperation(_)));
}
