//! Member repository: derived lookups, named queries, paging and bulk age updates.
//!
//! # Responsibility
//! - Expose the roster's member use-cases on top of the generic repository.
//! - Register and validate the member named queries once per repository.
//!
//! # Invariants
//! - Named queries are validated against the live schema before first use.
//! - `bulk_age_plus` leaves managed members stale until the unit of work is
//!   cleared.

use crate::mapping::{EntityId, RowReader};
use crate::model::{Member, MemberDto, Team};
use crate::query::{Bindings, BulkUpdate, Criteria, NamedQuery, Page, PageRequest, QueryRegistry, Slice};
use crate::repo::{CriteriaRepository, CrudRepository, RepoResult, SqliteRepository};
use crate::uow::UnitOfWork;

pub const FIND_BY_USERNAME: &str = "Member.findByUsername";
pub const FIND_USER: &str = "Member.findUser";
pub const FIND_USERNAME_LIST: &str = "Member.findUsernameList";
pub const FIND_MEMBER_DTO: &str = "Member.findMemberDto";
pub const FIND_BY_NAMES: &str = "Member.findByNames";
pub const FIND_BY_AGE: &str = "Member.findByAge";

/// Named queries used by [`SqliteMemberRepository`].
pub fn member_queries() -> RepoResult<QueryRegistry> {
    let mut registry = QueryRegistry::new();
    registry
        .register(
            NamedQuery::new(
                FIND_BY_USERNAME,
                "SELECT m.* FROM member m WHERE m.username = :username ORDER BY m.member_id",
            ),
            &["username"],
        )?
        .register(
            NamedQuery::new(
                FIND_USER,
                "SELECT m.* FROM member m
                 WHERE m.username = :username AND m.age = :age
                 ORDER BY m.member_id",
            ),
            &["username", "age"],
        )?
        .register(
            NamedQuery::new(
                FIND_USERNAME_LIST,
                "SELECT m.username FROM member m ORDER BY m.member_id",
            ),
            &[],
        )?
        .register(
            NamedQuery::new(
                FIND_MEMBER_DTO,
                "SELECT m.member_id, m.username, t.name AS team_name
                 FROM member m
                 JOIN team t ON t.team_id = m.team_id
                 ORDER BY m.member_id",
            ),
            &[],
        )?
        .register(
            NamedQuery::new(
                FIND_BY_NAMES,
                "SELECT m.* FROM member m
                 WHERE m.username IN (SELECT value FROM json_each(:names))
                 ORDER BY m.member_id",
            ),
            &["names"],
        )?
        .register(
            NamedQuery::new(
                FIND_BY_AGE,
                "SELECT m.* FROM member m
                 LEFT JOIN team t ON t.team_id = m.team_id
                 WHERE m.age = :age",
            )
            .with_count_query("SELECT COUNT(*) FROM member m WHERE m.age = :age"),
            &["age"],
        )?;
    Ok(registry)
}

/// Member use-cases.
pub trait MemberRepository: CrudRepository<Member> + CriteriaRepository<Member> {
    fn find_by_username_and_age_greater_than(&self, username: &str, age: i32) -> RepoResult<Vec<Member>>;
    fn find_by_username(&self, username: &str) -> RepoResult<Vec<Member>>;
    fn find_user(&self, username: &str, age: i32) -> RepoResult<Vec<Member>>;
    fn find_username_list(&self) -> RepoResult<Vec<String>>;
    fn find_member_dto(&self) -> RepoResult<Vec<MemberDto>>;
    fn find_by_names(&self, names: &[&str]) -> RepoResult<Vec<Member>>;
    fn find_list_by_username(&self, username: &str) -> RepoResult<Vec<Member>>;
    /// # Errors
    /// - `Multiplicity` when the username is not unique.
    fn find_optional_by_username(&self, username: &str) -> RepoResult<Option<Member>>;
    fn find_by_age(&self, age: i32, request: &PageRequest) -> RepoResult<Page<Member>>;
    fn find_slice_by_age(&self, age: i32, request: &PageRequest) -> RepoResult<Slice<Member>>;
    fn find_window_by_age(&self, age: i32, request: &PageRequest) -> RepoResult<Vec<Member>>;
    /// Adds one to the age of every member at least `age` years old.
    fn bulk_age_plus(&self, age: i32) -> RepoResult<usize>;
    /// Every member with its team loaded in the same statement.
    fn find_member_fetch_join(&self) -> RepoResult<Vec<Member>>;
    /// Every member through a hand-written statement outside the query registry.
    fn find_member_custom(&self) -> RepoResult<Vec<Member>>;
}

pub struct SqliteMemberRepository<'uow> {
    base: SqliteRepository<'uow, Member>,
    queries: QueryRegistry,
}

impl<'uow> SqliteMemberRepository<'uow> {
    /// # Errors
    /// - Any named query that does not prepare against the connection.
    pub fn try_new(uow: &'uow UnitOfWork<'uow>) -> RepoResult<Self> {
        let queries = member_queries()?;
        queries.validate(uow.connection())?;
        Ok(Self {
            base: SqliteRepository::new(uow),
            queries,
        })
    }

    pub fn queries(&self) -> &QueryRegistry {
        &self.queries
    }

    fn uow(&self) -> &'uow UnitOfWork<'uow> {
        self.base.uow()
    }

    fn by_age(&self, age: i32) -> RepoResult<(&NamedQuery, Bindings)> {
        Ok((self.queries.get(FIND_BY_AGE)?, Bindings::new().bind("age", age)))
    }
}

impl CrudRepository<Member> for SqliteMemberRepository<'_> {
    fn save(&self, entity: &mut Member) -> RepoResult<EntityId> {
        self.base.save(entity)
    }

    fn find_by_id(&self, id: EntityId) -> RepoResult<Option<Member>> {
        self.base.find_by_id(id)
    }

    fn exists_by_id(&self, id: EntityId) -> RepoResult<bool> {
        self.base.exists_by_id(id)
    }

    fn find_all(&self) -> RepoResult<Vec<Member>> {
        self.base.find_all()
    }

    fn count(&self) -> RepoResult<u64> {
        self.base.count()
    }

    fn delete(&self, entity: &Member) -> RepoResult<()> {
        self.base.delete(entity)
    }
}

impl CriteriaRepository<Member> for SqliteMemberRepository<'_> {
    fn find_by(&self, criteria: &Criteria) -> RepoResult<Vec<Member>> {
        self.base.find_by(criteria)
    }

    fn find_one_by(&self, criteria: &Criteria) -> RepoResult<Option<Member>> {
        self.base.find_one_by(criteria)
    }

    fn count_by(&self, criteria: &Criteria) -> RepoResult<u64> {
        self.base.count_by(criteria)
    }

    fn find_page(
        &self,
        criteria: Option<&Criteria>,
        request: &PageRequest,
    ) -> RepoResult<Page<Member>> {
        self.base.find_page(criteria, request)
    }

    fn find_slice(
        &self,
        criteria: Option<&Criteria>,
        request: &PageRequest,
    ) -> RepoResult<Slice<Member>> {
        self.base.find_slice(criteria, request)
    }

    fn find_window(
        &self,
        criteria: Option<&Criteria>,
        request: &PageRequest,
    ) -> RepoResult<Vec<Member>> {
        self.base.find_window(criteria, request)
    }

    fn bulk_update(&self, update: &BulkUpdate) -> RepoResult<usize> {
        self.base.bulk_update(update)
    }
}

impl MemberRepository for SqliteMemberRepository<'_> {
    fn find_by_username_and_age_greater_than(&self, username: &str, age: i32) -> RepoResult<Vec<Member>> {
        self.find_by(
            &Criteria::field("username")
                .equals(username)
                .and("age")
                .greater_than(age),
        )
    }

    fn find_by_username(&self, username: &str) -> RepoResult<Vec<Member>> {
        self.queries
            .get(FIND_BY_USERNAME)?
            .fetch_all(self.uow(), &Bindings::new().bind("username", username))
    }

    fn find_user(&self, username: &str, age: i32) -> RepoResult<Vec<Member>> {
        self.queries.get(FIND_USER)?.fetch_all(
            self.uow(),
            &Bindings::new().bind("username", username).bind("age", age),
        )
    }

    fn find_username_list(&self) -> RepoResult<Vec<String>> {
        self.queries
            .get(FIND_USERNAME_LIST)?
            .fetch_map(self.uow(), &Bindings::new(), |row| Ok(row.get(0)?))
    }

    fn find_member_dto(&self) -> RepoResult<Vec<MemberDto>> {
        self.queries
            .get(FIND_MEMBER_DTO)?
            .fetch_map(self.uow(), &Bindings::new(), |row| {
                Ok(MemberDto::new(
                    row.get("member_id")?,
                    row.get::<_, String>("username")?,
                    row.get("team_name")?,
                ))
            })
    }

    fn find_by_names(&self, names: &[&str]) -> RepoResult<Vec<Member>> {
        self.queries.get(FIND_BY_NAMES)?.fetch_all(
            self.uow(),
            &Bindings::new().bind_list("names", names.iter().copied()),
        )
    }

    fn find_list_by_username(&self, username: &str) -> RepoResult<Vec<Member>> {
        self.find_by(&Criteria::field("username").equals(username))
    }

    fn find_optional_by_username(&self, username: &str) -> RepoResult<Option<Member>> {
        self.find_one_by(&Criteria::field("username").equals(username))
    }

    fn find_by_age(&self, age: i32, request: &PageRequest) -> RepoResult<Page<Member>> {
        let (query, bindings) = self.by_age(age)?;
        query.fetch_page(self.uow(), &bindings, request)
    }

    fn find_slice_by_age(&self, age: i32, request: &PageRequest) -> RepoResult<Slice<Member>> {
        let (query, bindings) = self.by_age(age)?;
        query.fetch_slice(self.uow(), &bindings, request)
    }

    fn find_window_by_age(&self, age: i32, request: &PageRequest) -> RepoResult<Vec<Member>> {
        let (query, bindings) = self.by_age(age)?;
        query.fetch_window(self.uow(), &bindings, request)
    }

    fn bulk_age_plus(&self, age: i32) -> RepoResult<usize> {
        self.bulk_update(
            &BulkUpdate::new()
                .increment("age", 1)
                .filter(Criteria::field("age").greater_than_or_equal(age)),
        )
    }

    fn find_member_fetch_join(&self) -> RepoResult<Vec<Member>> {
        self.base.find_all_fetching::<Team>(None)
    }

    fn find_member_custom(&self) -> RepoResult<Vec<Member>> {
        let uow = self.uow();
        uow.query_rows("SELECT m.* FROM member m ORDER BY m.member_id;", [], |row| {
            uow.hydrate::<Member>(&RowReader::new(row))
        })
    }
}
