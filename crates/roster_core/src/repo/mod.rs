//! Repository contracts and their SQLite implementations.
//!
//! # Responsibility
//! - Provide CRUD, derived-query and paging APIs per entity type.
//! - Keep SQL generation inside the persistence boundary.
//!
//! # Invariants
//! - Repositories never open or close transactions; they run inside the
//!   unit of work they were created with.
//! - Lookups report absence as `Ok(None)`; `NotFound` is reserved for
//!   writes against vanished rows.

pub mod crud;
pub mod error;
pub mod member_repo;

pub use crud::{CriteriaRepository, CrudRepository, SqliteRepository};
pub use error::{BindingError, RepoError, RepoResult};
pub use member_repo::{member_queries, MemberRepository, SqliteMemberRepository};

use crate::model::Team;

/// Team access needs nothing beyond the generic repository.
pub type TeamRepository<'uow> = SqliteRepository<'uow, Team>;
