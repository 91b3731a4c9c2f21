//! Set-based updates that bypass the unit of work's managed state.

use crate::mapping::{ColumnType, Entity, EntityMapping};
use crate::query::{Criteria, IntoValue, SqlFragment};
use crate::repo::{RepoError, RepoResult};
use crate::uow::UnitOfWork;
use log::{info, warn};
use rusqlite::params_from_iter;
use rusqlite::types::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Assignment {
    Set { field: String, value: Value },
    Increment { field: String, delta: i64 },
}

/// One `UPDATE ... SET ... WHERE ...` over every matching row.
///
/// Audit timestamps are not touched and managed copies are not refreshed;
/// call [`UnitOfWork::clear`] before reading affected entities again.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkUpdate {
    assignments: Vec<Assignment>,
    filter: Option<Criteria>,
}

impl BulkUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl IntoValue) -> Self {
        self.assignments.push(Assignment::Set {
            field: field.into(),
            value: value.into_value(),
        });
        self
    }

    pub fn increment(mut self, field: impl Into<String>, delta: i64) -> Self {
        self.assignments.push(Assignment::Increment {
            field: field.into(),
            delta,
        });
        self
    }

    /// Restricts the update; without a filter every row is updated.
    pub fn filter(mut self, criteria: Criteria) -> Self {
        self.filter = Some(criteria);
        self
    }

    pub fn assignments(&self) -> &[Assignment] {
        &self.assignments
    }

    /// Renders the statement against `mapping`.
    ///
    /// # Errors
    /// - `UnsupportedOperation` for an empty assignment list, the identifier,
    ///   a non-updatable column, or an increment of a non-integer column.
    /// - `UnknownField` for unmapped fields.
    pub fn to_sql(&self, mapping: &EntityMapping) -> RepoResult<SqlFragment> {
        if self.assignments.is_empty() {
            return Err(RepoError::UnsupportedOperation(
                "bulk update needs at least one assignment".to_string(),
            ));
        }

        let mut fragment = SqlFragment::default();
        let mut sets = Vec::with_capacity(self.assignments.len());
        for assignment in &self.assignments {
            let field = match assignment {
                Assignment::Set { field, .. } | Assignment::Increment { field, .. } => field,
            };
            let resolved = mapping
                .resolve_field(field)
                .ok_or_else(|| RepoError::UnknownField {
                    entity: mapping.entity(),
                    field: field.clone(),
                })?;
            if resolved.identifier || !resolved.updatable {
                return Err(RepoError::UnsupportedOperation(format!(
                    "field `{field}` of `{}` cannot be bulk updated",
                    mapping.entity()
                )));
            }

            match assignment {
                Assignment::Set { value, .. } => {
                    sets.push(format!("{} = ?", resolved.column));
                    fragment.params.push(value.clone());
                }
                Assignment::Increment { delta, .. } => {
                    if resolved.column_type != ColumnType::Integer {
                        return Err(RepoError::UnsupportedOperation(format!(
                            "field `{field}` of `{}` is not an integer column",
                            mapping.entity()
                        )));
                    }
                    sets.push(format!("{column} = {column} + ?", column = resolved.column));
                    fragment.params.push(Value::Integer(*delta));
                }
            }
        }

        fragment.sql = format!("UPDATE {} SET {}", mapping.table(), sets.join(", "));
        if let Some(filter) = &self.filter {
            let condition = filter.to_sql(mapping, None)?;
            fragment.sql.push_str(" WHERE ");
            fragment.sql.push_str(&condition.sql);
            fragment.params.extend(condition.params);
        }
        fragment.sql.push(';');
        Ok(fragment)
    }

    /// Runs the update and returns the number of affected rows.
    pub fn execute<T: Entity>(&self, uow: &UnitOfWork<'_>) -> RepoResult<usize> {
        let fragment = self.to_sql(T::mapping())?;
        let affected = uow.execute(&fragment.sql, params_from_iter(fragment.params.iter()))?;

        info!(
            "event=bulk_update module=query status=ok uow_id={} entity={} rows={}",
            uow.id(),
            T::NAME,
            affected
        );
        let managed = uow.managed_count(T::NAME);
        if affected > 0 && managed > 0 {
            warn!(
                "event=bulk_update module=query status=stale uow_id={} entity={} managed={} hint=clear_unit_of_work",
                uow.id(),
                T::NAME,
                managed
            );
        }
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::BulkUpdate;
    use crate::mapping::Entity;
    use crate::model::{Member, Team};
    use crate::query::Criteria;
    use crate::repo::RepoError;
    use rusqlite::types::Value;

    #[test]
    fn increment_with_filter_renders_one_statement() {
        let fragment = BulkUpdate::new()
            .increment("age", 1)
            .filter(Criteria::field("age").greater_than_or_equal(20))
            .to_sql(Member::mapping())
            .unwrap();
        assert_eq!(fragment.sql, "UPDATE member SET age = age + ? WHERE age >= ?;");
        assert_eq!(fragment.params, vec![Value::Integer(1), Value::Integer(20)]);
    }

    #[test]
    fn identifier_and_read_only_columns_are_rejected() {
        for field in ["id", "created_date"] {
            let err = BulkUpdate::new()
                .set(field, 1)
                .to_sql(Member::mapping())
                .unwrap_err();
            assert!(matches!(err, RepoError::UnsupportedOperation(_)), "{field}");
        }
    }

    #[test]
    fn increment_requires_integer_column() {
        let err = BulkUpdate::new()
            .increment("name", 1)
            .to_sql(Team::mapping())
            .unwrap_err();
        assert!(matches!(err, RepoError::UnsupportedOperation(_)));
    }

    #[test]
    fn empty_update_is_rejected() {
        assert!(BulkUpdate::new().to_sql(Member::mapping()).is_err());
    }
}
