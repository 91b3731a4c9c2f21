//! The `Entity` contract and row access helpers.

use crate::mapping::audit::AuditFields;
use crate::mapping::registry::EntityMapping;
use crate::repo::RepoResult;
use rusqlite::types::{FromSql, Value};
use rusqlite::Row;

/// Generated identifier shared by every mapped entity.
///
/// Assigned by storage on first save and never reused.
pub type EntityId = i64;

/// A type persisted through an [`EntityMapping`].
///
/// Implementations are plain data: the repository layer owns every SQL
/// statement, the entity only converts itself to and from column values.
pub trait Entity: Clone + 'static {
    /// Registry key; must equal `mapping().entity()`.
    const NAME: &'static str;

    fn mapping() -> &'static EntityMapping;

    fn id(&self) -> Option<EntityId>;

    /// Called once by the repository after the first insert.
    fn assign_id(&mut self, id: EntityId);

    /// Values for every data and foreign-key column, keyed by column name.
    ///
    /// Audit columns are written by the repository from [`Entity::audit`].
    fn column_values(&self) -> Vec<(&'static str, Value)>;

    fn from_row(reader: &RowReader<'_, '_>) -> RepoResult<Self>;

    fn audit(&self) -> Option<&AuditFields> {
        None
    }

    fn audit_mut(&mut self) -> Option<&mut AuditFields> {
        None
    }

    /// Drops `owner_id` from the inverse collection kept for `owner`, if any.
    ///
    /// Called on managed copies when an owner is deleted.
    fn forget_inverse_member(&mut self, _owner: &'static str, _owner_id: EntityId) {}
}

/// Reads columns of one entity from a result row, honoring select aliases.
pub struct RowReader<'a, 'stmt> {
    row: &'a Row<'stmt>,
    alias: Option<&'a str>,
}

impl<'a, 'stmt> RowReader<'a, 'stmt> {
    /// Reader for rows selected with plain column names.
    pub fn new(row: &'a Row<'stmt>) -> Self {
        Self { row, alias: None }
    }

    /// Reader for rows selected through `EntityMapping::select_list(Some(alias))`.
    pub fn aliased(row: &'a Row<'stmt>, alias: &'a str) -> Self {
        Self {
            row,
            alias: Some(alias),
        }
    }

    pub fn get<T: FromSql>(&self, column: &str) -> RepoResult<T> {
        let label = column_label(self.alias, column);
        Ok(self.row.get::<_, T>(label.as_str())?)
    }
}

pub(crate) fn column_label(alias: Option<&str>, column: &str) -> String {
    match alias {
        Some(alias) => format!("{alias}__{column}"),
        None => column.to_string(),
    }
}
