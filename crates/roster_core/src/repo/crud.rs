//! Generic CRUD and derived-query repository over any mapped entity.
//!
//! # Responsibility
//! - Generate insert/update/select/delete statements from `EntityMapping`.
//! - Apply audit timestamps on save.
//! - Route every read through the unit of work's identity map.
//!
//! # Invariants
//! - The id is assigned once, by the first insert, and never rewritten.
//! - Non-updatable columns (created timestamp) are written only on insert.
//! - Saving an entity removed in the same unit of work fails.

use crate::mapping::audit::audit_now;
use crate::mapping::{ColumnRole, Entity, EntityId, RowReader};
use crate::query::page::{order_clause, resolve_total};
use crate::query::{BulkUpdate, Criteria, Page, PageRequest, Slice};
use crate::relation::{fetch_join, OwnsToOne};
use crate::repo::{RepoError, RepoResult};
use crate::uow::UnitOfWork;
use log::debug;
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use std::marker::PhantomData;

/// Basic persistence operations for one entity type.
pub trait CrudRepository<T: Entity> {
    /// Inserts a transient entity or updates a persisted one, returning its id.
    fn save(&self, entity: &mut T) -> RepoResult<EntityId>;
    fn find_by_id(&self, id: EntityId) -> RepoResult<Option<T>>;
    fn exists_by_id(&self, id: EntityId) -> RepoResult<bool>;
    /// Every entity, ordered by id.
    fn find_all(&self) -> RepoResult<Vec<T>>;
    fn count(&self) -> RepoResult<u64>;
    fn delete(&self, entity: &T) -> RepoResult<()>;
}

/// Queries derived from predicate chains.
pub trait CriteriaRepository<T: Entity> {
    fn find_by(&self, criteria: &Criteria) -> RepoResult<Vec<T>>;
    /// # Errors
    /// - `Multiplicity` when more than one row matches.
    fn find_one_by(&self, criteria: &Criteria) -> RepoResult<Option<T>>;
    fn count_by(&self, criteria: &Criteria) -> RepoResult<u64>;
    fn find_page(&self, criteria: Option<&Criteria>, request: &PageRequest) -> RepoResult<Page<T>>;
    fn find_slice(&self, criteria: Option<&Criteria>, request: &PageRequest)
        -> RepoResult<Slice<T>>;
    fn find_window(&self, criteria: Option<&Criteria>, request: &PageRequest) -> RepoResult<Vec<T>>;
    /// Returns the number of affected rows; managed copies are left stale.
    fn bulk_update(&self, update: &BulkUpdate) -> RepoResult<usize>;
}

/// SQLite-backed repository bound to one unit of work.
pub struct SqliteRepository<'uow, T> {
    uow: &'uow UnitOfWork<'uow>,
    marker: PhantomData<fn() -> T>,
}

impl<'uow, T: Entity> SqliteRepository<'uow, T> {
    pub fn new(uow: &'uow UnitOfWork<'uow>) -> Self {
        Self {
            uow,
            marker: PhantomData,
        }
    }

    pub fn uow(&self) -> &'uow UnitOfWork<'uow> {
        self.uow
    }

    /// Owners with their `A` association loaded by one joined statement.
    pub fn find_all_fetching<A>(&self, criteria: Option<&Criteria>) -> RepoResult<Vec<T>>
    where
        T: OwnsToOne<A>,
        A: Entity,
    {
        fetch_join::<T, A>(self.uow, criteria)
    }

    fn insert(&self, entity: &mut T) -> RepoResult<EntityId> {
        if let Some(audit) = entity.audit_mut() {
            audit.on_insert(audit_now());
        }

        let mapping = T::mapping();
        let values = column_values(entity, false)?;
        let columns: Vec<&str> = values.iter().map(|(column, _)| *column).collect();
        let placeholders: Vec<String> = (1..=values.len()).map(|index| format!("?{index}")).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({});",
            mapping.table(),
            columns.join(", "),
            placeholders.join(", ")
        );
        self.uow
            .execute(&sql, params_from_iter(values.iter().map(|(_, value)| value)))?;

        let id = self.uow.last_insert_rowid();
        entity.assign_id(id);
        self.uow.manage(entity);
        debug!(
            "event=entity_save module=repo status=ok mode=insert uow_id={} entity={} id={}",
            self.uow.id(),
            T::NAME,
            id
        );
        Ok(id)
    }

    fn update(&self, entity: &mut T, id: EntityId) -> RepoResult<EntityId> {
        if let Some(audit) = entity.audit_mut() {
            audit.on_update(audit_now());
        }

        let mapping = T::mapping();
        let values = column_values(entity, true)?;
        let affected = if values.is_empty() {
            usize::from(self.row_exists(id)?)
        } else {
            let assignments: Vec<String> = values
                .iter()
                .enumerate()
                .map(|(index, (column, _))| format!("{column} = ?{}", index + 1))
                .collect();
            let sql = format!(
                "UPDATE {} SET {} WHERE {} = ?{};",
                mapping.table(),
                assignments.join(", "),
                mapping.id_column(),
                values.len() + 1
            );
            let params = values
                .iter()
                .map(|(_, value)| value.clone())
                .chain(std::iter::once(Value::Integer(id)));
            self.uow.execute(&sql, params_from_iter(params))?
        };
        if affected == 0 {
            return Err(RepoError::NotFound {
                entity: T::NAME,
                id,
            });
        }

        self.uow.manage(entity);
        debug!(
            "event=entity_save module=repo status=ok mode=update uow_id={} entity={} id={}",
            self.uow.id(),
            T::NAME,
            id
        );
        Ok(id)
    }

    fn row_exists(&self, id: EntityId) -> RepoResult<bool> {
        let mapping = T::mapping();
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE {} = ?1);",
            mapping.table(),
            mapping.id_column()
        );
        Ok(self.uow.query_count(&sql, [id])? == 1)
    }

    fn select(
        &self,
        criteria: Option<&Criteria>,
        request: Option<&PageRequest>,
        limit: u64,
    ) -> RepoResult<Vec<T>> {
        let mapping = T::mapping();
        let mut sql = format!("SELECT {} FROM {}", mapping.select_list(None), mapping.table());
        let mut params = Vec::new();
        if let Some(criteria) = criteria {
            let condition = criteria.to_sql(mapping, None)?;
            sql.push_str(" WHERE ");
            sql.push_str(&condition.sql);
            params = condition.params;
        }
        sql.push(' ');
        sql.push_str(&order_clause(request.and_then(PageRequest::sort), mapping, None)?);
        if let Some(request) = request {
            sql.push_str(" LIMIT ? OFFSET ?");
            params.push(Value::Integer(to_i64(limit)?));
            params.push(Value::Integer(to_i64(request.offset())?));
        }
        sql.push(';');

        self.uow.query_rows(&sql, params_from_iter(params.iter()), |row| {
            self.uow.hydrate::<T>(&RowReader::new(row))
        })
    }

    fn count_where(&self, criteria: Option<&Criteria>) -> RepoResult<u64> {
        let mapping = T::mapping();
        let mut sql = format!("SELECT COUNT(*) FROM {}", mapping.table());
        let mut params = Vec::new();
        if let Some(criteria) = criteria {
            let condition = criteria.to_sql(mapping, None)?;
            sql.push_str(" WHERE ");
            sql.push_str(&condition.sql);
            params = condition.params;
        }
        sql.push(';');
        self.uow.query_count(&sql, params_from_iter(params.iter()))
    }
}

impl<T: Entity> CrudRepository<T> for SqliteRepository<'_, T> {
    fn save(&self, entity: &mut T) -> RepoResult<EntityId> {
        match entity.id() {
            None => self.insert(entity),
            Some(id) if self.uow.is_removed::<T>(id) => Err(RepoError::RemovedEntity {
                entity: T::NAME,
                id,
            }),
            Some(id) => self.update(entity, id),
        }
    }

    fn find_by_id(&self, id: EntityId) -> RepoResult<Option<T>> {
        self.uow.find::<T>(id)
    }

    fn exists_by_id(&self, id: EntityId) -> RepoResult<bool> {
        if self.uow.is_removed::<T>(id) {
            return Ok(false);
        }
        if self.uow.is_managed::<T>(id) {
            return Ok(true);
        }
        self.row_exists(id)
    }

    fn find_all(&self) -> RepoResult<Vec<T>> {
        self.select(None, None, 0)
    }

    fn count(&self) -> RepoResult<u64> {
        self.count_where(None)
    }

    fn delete(&self, entity: &T) -> RepoResult<()> {
        let id = entity.id().ok_or(RepoError::TransientEntity(T::NAME))?;
        if self.uow.is_removed::<T>(id) {
            return Ok(());
        }

        let mapping = T::mapping();
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?1;",
            mapping.table(),
            mapping.id_column()
        );
        if self.uow.execute(&sql, [id])? == 0 {
            return Err(RepoError::NotFound {
                entity: T::NAME,
                id,
            });
        }

        self.uow.mark_removed::<T>(id);
        debug!(
            "event=entity_delete module=repo status=ok uow_id={} entity={} id={}",
            self.uow.id(),
            T::NAME,
            id
        );
        Ok(())
    }
}

impl<T: Entity> CriteriaRepository<T> for SqliteRepository<'_, T> {
    fn find_by(&self, criteria: &Criteria) -> RepoResult<Vec<T>> {
        self.select(Some(criteria), None, 0)
    }

    fn find_one_by(&self, criteria: &Criteria) -> RepoResult<Option<T>> {
        let mut rows = self.find_by(criteria)?;
        if rows.len() > 1 {
            return Err(RepoError::Multiplicity {
                query: format!("{}.find_one_by", T::NAME),
                rows: rows.len(),
            });
        }
        Ok(rows.pop())
    }

    fn count_by(&self, criteria: &Criteria) -> RepoResult<u64> {
        self.count_where(Some(criteria))
    }

    fn find_page(&self, criteria: Option<&Criteria>, request: &PageRequest) -> RepoResult<Page<T>> {
        let content = self.select(criteria, Some(request), u64::from(request.size()))?;
        let total = match resolve_total(request, content.len()) {
            Some(total) => {
                debug!(
                    "event=page_count module=repo status=skipped entity={} total={}",
                    T::NAME,
                    total
                );
                total
            }
            None => self.count_where(criteria)?,
        };
        Ok(Page::new(content, request, total))
    }

    fn find_slice(
        &self,
        criteria: Option<&Criteria>,
        request: &PageRequest,
    ) -> RepoResult<Slice<T>> {
        let rows = self.select(criteria, Some(request), u64::from(request.size()) + 1)?;
        Ok(Slice::from_overfetched(rows, request))
    }

    fn find_window(&self, criteria: Option<&Criteria>, request: &PageRequest) -> RepoResult<Vec<T>> {
        self.select(criteria, Some(request), u64::from(request.size()))
    }

    fn bulk_update(&self, update: &BulkUpdate) -> RepoResult<usize> {
        update.execute::<T>(self.uow)
    }
}

/// Column/value pairs in mapping order; `for_update` keeps only updatable columns.
fn column_values<T: Entity>(entity: &T, for_update: bool) -> RepoResult<Vec<(&'static str, Value)>> {
    let supplied = entity.column_values();
    let mut values = Vec::with_capacity(T::mapping().columns().len());
    for column in T::mapping().columns() {
        if for_update && !column.updatable {
            continue;
        }
        let value = match column.role {
            ColumnRole::CreatedAt | ColumnRole::UpdatedAt => entity
                .audit()
                .map_or(Value::Null, |audit| audit.column_value(column.role)),
            ColumnRole::Data | ColumnRole::ForeignKey { .. } => supplied
                .iter()
                .find(|(name, _)| *name == column.column)
                .map(|(_, value)| value.clone())
                .ok_or_else(|| {
                    RepoError::InvalidData(format!(
                        "{} did not supply a value for column `{}`",
                        T::NAME,
                        column.column
                    ))
                })?,
        };
        values.push((column.column, value));
    }
    Ok(values)
}

fn to_i64(value: u64) -> RepoResult<i64> {
    i64::try_from(value)
        .map_err(|_| RepoError::InvalidPageRequest(format!("window bound `{value}` is too large")))
}
