use roster_core::db::open_db_in_memory;
use roster_core::{
    roster_registry, CrudRepository, Entity, EntityRegistry, Member, RepoError,
    SqliteMemberRepository, TransactionBoundary,
};
use rusqlite::Connection;

fn open_store() -> (Connection, EntityRegistry) {
    let registry = roster_registry().unwrap();
    let conn = open_db_in_memory(&registry).unwrap();
    (conn, registry)
}

#[test]
fn save_then_find_returns_equal_member() {
    let (conn, registry) = open_store();
    let boundary = TransactionBoundary::new(&conn, &registry).unwrap();

    boundary
        .run(|uow| {
            let members = SqliteMemberRepository::try_new(uow)?;
            let mut member = Member::new("memberA", 10);
            let id = members.save(&mut member)?;
            assert_eq!(member.id(), Some(id));

            let managed = members.find_by_id(id)?.unwrap();
            assert_eq!(managed, member);

            uow.clear();
            let reloaded = members.find_by_id(id)?.unwrap();
            assert_eq!(reloaded, member);
            assert_eq!(reloaded.username, "memberA");
            assert_eq!(reloaded.age, 10);
            Ok(())
        })
        .unwrap();
}

#[test]
fn insert_stamps_both_audit_dates_and_update_moves_only_updated() {
    let (conn, registry) = open_store();
    let boundary = TransactionBoundary::new(&conn, &registry).unwrap();

    boundary
        .run(|uow| {
            let members = SqliteMemberRepository::try_new(uow)?;
            let mut member = Member::new("memberA", 10);
            members.save(&mut member)?;
            let created = member.audit_fields().created_date().unwrap();
            assert_eq!(member.audit_fields().updated_date(), Some(created));

            member.username = "memberB".to_string();
            members.save(&mut member)?;
            uow.clear();

            let reloaded = members.find_by_id(member.id().unwrap())?.unwrap();
            assert_eq!(reloaded.username, "memberB");
            assert_eq!(reloaded.audit_fields().created_date(), Some(created));
            assert!(reloaded.audit_fields().updated_date().unwrap() >= created);
            Ok(())
        })
        .unwrap();
}

#[test]
fn count_reflects_saves_minus_deletes() {
    let (conn, registry) = open_store();
    let boundary = TransactionBoundary::new(&conn, &registry).unwrap();

    boundary
        .run(|uow| {
            let members = SqliteMemberRepository::try_new(uow)?;
            let mut saved = Vec::new();
            for (name, age) in [("m1", 10), ("m2", 20), ("m3", 30)] {
                let mut member = Member::new(name, age);
                members.save(&mut member)?;
                saved.push(member);
            }
            assert_eq!(members.count()?, 3);
            assert_eq!(members.find_all()?.len(), 3);

            members.delete(&saved[1])?;
            assert_eq!(members.count()?, 2);
            assert!(!members.exists_by_id(saved[1].id().unwrap())?);
            assert!(members.exists_by_id(saved[0].id().unwrap())?);
            assert!(members.find_by_id(saved[1].id().unwrap())?.is_none());

            let names: Vec<String> = members
                .find_all()?
                .into_iter()
                .map(|member| member.username)
                .collect();
            assert_eq!(names, vec!["m1".to_string(), "m3".to_string()]);
            Ok(())
        })
        .unwrap();
}

#[test]
fn find_by_unknown_id_is_none() {
    let (conn, registry) = open_store();
    let boundary = TransactionBoundary::new(&conn, &registry).unwrap();

    let found = boundary
        .run(|uow| SqliteMemberRepository::try_new(uow)?.find_by_id(404))
        .unwrap();
    assert!(found.is_none());
}

#[test]
fn delete_is_idempotent_inside_one_unit_of_work() {
    let (conn, registry) = open_store();
    let boundary = TransactionBoundary::new(&conn, &registry).unwrap();

    let member = boundary
        .run(|uow| {
            let members = SqliteMemberRepository::try_new(uow)?;
            let mut member = Member::new("memberA", 10);
            members.save(&mut member)?;
            members.delete(&member)?;
            members.delete(&member)?;
            Ok(member)
        })
        .unwrap();

    let err = boundary
        .run(|uow| SqliteMemberRepository::try_new(uow)?.delete(&member))
        .unwrap_err();
    assert!(matches!(
        err,
        RepoError::NotFound {
            entity: "Member",
            ..
        }
    ));
}

#[test]
fn saving_a_removed_member_fails() {
    let (conn, registry) = open_store();
    let boundary = TransactionBoundary::new(&conn, &registry).unwrap();

    let err = boundary
        .run(|uow| {
            let members = SqliteMemberRepository::try_new(uow)?;
            let mut member = Member::new("memberA", 10);
            members.save(&mut member)?;
            members.delete(&member)?;
            members.save(&mut member)
        })
        .unwrap_err();
    assert!(matches!(err, RepoError::RemovedEntity { entity: "Member", .. }));
}

#[test]
fn deleting_a_transient_member_fails() {
    let (conn, registry) = open_store();
    let boundary = TransactionBoundary::new(&conn, &registry).unwrap();

    let err = boundary
        .run(|uow| SqliteMemberRepository::try_new(uow)?.delete(&Member::new("ghost", 1)))
        .unwrap_err();
    assert!(matches!(err, RepoError::TransientEntity("Member")));
}

#[test]
fn updating_a_vanished_row_is_not_found() {
    let (conn, registry) = open_store();
    let boundary = TransactionBoundary::new(&conn, &registry).unwrap();

    let mut member = boundary
        .run(|uow| {
            let mut member = Member::new("memberA", 10);
            SqliteMemberRepository::try_new(uow)?.save(&mut member)?;
            Ok(member)
        })
        .unwrap();
    conn.execute("DELETE FROM member;", []).unwrap();

    member.age = 11;
    let err = boundary
        .run(|uow| SqliteMemberRepository::try_new(uow)?.save(&mut member))
        .unwrap_err();
    assert!(matches!(err, RepoError::NotFound { entity: "Member", .. }));
}

#[test]
fn identity_map_serves_repeated_lookups_without_round_trips() {
    let (conn, registry) = open_store();
    let boundary = TransactionBoundary::new(&conn, &registry).unwrap();

    boundary
        .run(|uow| {
            let members = SqliteMemberRepository::try_new(uow)?;
            let mut member = Member::new("memberA", 10);
            let id = members.save(&mut member)?;
            uow.clear();

            let before = uow.statement_count();
            members.find_by_id(id)?;
            assert_eq!(uow.statement_count(), before + 1);
            members.find_by_id(id)?;
            assert_eq!(uow.statement_count(), before + 1);
            assert!(uow.is_managed::<Member>(id));
            assert_eq!(uow.managed_count("Member"), 1);
            Ok(())
        })
        .unwrap();
}

#[test]
fn rolled_back_unit_of_work_leaves_no_rows() {
    let (conn, registry) = open_store();
    let boundary = TransactionBoundary::new(&conn, &registry).unwrap();

    boundary
        .run_rolled_back(|uow| {
            let members = SqliteMemberRepository::try_new(uow)?;
            members.save(&mut Member::new("memberA", 10))?;
            assert_eq!(members.count()?, 1);
            Ok(())
        })
        .unwrap();

    let count = boundary
        .run(|uow| SqliteMemberRepository::try_new(uow)?.count())
        .unwrap();
    assert_eq!(count, 0);
}
