//! Error type shared by repositories, queries and the unit of work.

use crate::db::DbError;
use crate::mapping::{EntityId, RegistryError};
use rusqlite::ErrorCode;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

/// Named-parameter mismatch between a query and the supplied arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingError {
    pub query: String,
    /// Placeholders with no supplied value.
    pub missing: Vec<String>,
    /// Supplied names the query does not use.
    pub unexpected: Vec<String>,
}

impl Display for BindingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "parameter binding mismatch for query `{}`: missing [{}], unexpected [{}]",
            self.query,
            self.missing.join(", "),
            self.unexpected.join(", ")
        )
    }
}

impl Error for BindingError {}

#[derive(Debug)]
pub enum RepoError {
    /// Storage failure, including constraint violations reported by SQLite.
    Db(DbError),
    Registry(RegistryError),
    /// Update or delete targeted a row that no longer exists.
    NotFound {
        entity: &'static str,
        id: EntityId,
    },
    /// A single-result query matched more than one row.
    Multiplicity {
        query: String,
        rows: usize,
    },
    Binding(BindingError),
    UnknownQuery(String),
    UnknownField {
        entity: &'static str,
        field: String,
    },
    UnknownAssociation {
        owner: &'static str,
        target: &'static str,
    },
    /// Operation requires an entity that has been saved at least once.
    TransientEntity(&'static str),
    /// Entity was deleted earlier in the same unit of work.
    RemovedEntity {
        entity: &'static str,
        id: EntityId,
    },
    InvalidPageRequest(String),
    UnsupportedOperation(String),
    InvalidData(String),
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    MissingRequiredTable(&'static str),
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
}

impl RepoError {
    /// Whether this is a uniqueness or foreign-key failure from storage.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            Self::Db(DbError::Sqlite(rusqlite::Error::SqliteFailure(err, _)))
                if err.code == ErrorCode::ConstraintViolation
        )
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Registry(err) => write!(f, "{err}"),
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::Multiplicity { query, rows } => write!(
                f,
                "query `{query}` expected at most one row but matched {rows}"
            ),
            Self::Binding(err) => write!(f, "{err}"),
            Self::UnknownQuery(name) => write!(f, "no query registered as `{name}`"),
            Self::UnknownField { entity, field } => {
                write!(f, "entity `{entity}` has no mapped field `{field}`")
            }
            Self::UnknownAssociation { owner, target } => {
                write!(f, "entity `{owner}` has no association to `{target}`")
            }
            Self::TransientEntity(entity) => {
                write!(f, "{entity} has no identifier yet; save it first")
            }
            Self::RemovedEntity { entity, id } => {
                write!(f, "{entity} {id} was removed in this unit of work")
            }
            Self::InvalidPageRequest(message) => write!(f, "invalid page request: {message}"),
            Self::UnsupportedOperation(message) => write!(f, "unsupported operation: {message}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "repository requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "repository requires column `{column}` in table `{table}`"
            ),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Registry(err) => Some(err),
            Self::Binding(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<RegistryError> for RepoError {
    fn from(value: RegistryError) -> Self {
        Self::Registry(value)
    }
}

impl From<BindingError> for RepoError {
    fn from(value: BindingError) -> Self {
        Self::Binding(value)
    }
}
