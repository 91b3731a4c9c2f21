//! Core of roster: a small repository and query layer over SQLite.
//! Entities are described by explicit mappings; every statement runs inside
//! a unit of work opened by a `TransactionBoundary`.

pub mod config;
pub mod db;
pub mod logging;
pub mod mapping;
pub mod model;
pub mod query;
pub mod relation;
pub mod repo;
pub mod uow;

pub use config::{ConfigError, LoggingConfig, StoreConfig};
pub use db::{open_db, open_db_in_memory, open_store, DbError, DbResult};
pub use logging::{default_log_level, init_logging, logging_status};
pub use mapping::{AuditFields, Entity, EntityId, EntityMapping, EntityRegistry, RegistryError};
pub use model::{roster_registry, Member, MemberDto, Team};
pub use query::{Bindings, BulkUpdate, Criteria, NamedQuery, Page, PageRequest, QueryRegistry, Slice, Sort};
pub use relation::{link, load_inverse, unlink, InverseSet, ToOne};
pub use repo::{
    CriteriaRepository, CrudRepository, MemberRepository, RepoError, RepoResult,
    SqliteMemberRepository, SqliteRepository, TeamRepository,
};
pub use uow::{TransactionBoundary, UnitOfWork};
