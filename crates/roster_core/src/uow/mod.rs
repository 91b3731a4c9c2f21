//! Unit of work: one transaction plus the entities managed inside it.
//!
//! # Responsibility
//! - Run every repository statement inside the ambient transaction.
//! - Keep one managed copy per `(entity, id)` (identity map) and the set of
//!   entities removed in this unit of work.
//! - Count statement round trips so fetch behavior stays observable.
//!
//! # Invariants
//! - A unit of work is used from one thread only (`RefCell` state, `!Sync`).
//! - Nothing is committed before the owning boundary commits.
//! - Bulk statements bypass the identity map; managed copies may go stale
//!   until [`UnitOfWork::clear`] is called.

mod boundary;

pub use boundary::TransactionBoundary;

use crate::mapping::{ColumnRole, Entity, EntityId, RowReader};
use crate::repo::RepoResult;
use log::{debug, info};
use rusqlite::{Connection, Params, Row, Transaction, TransactionBehavior};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use uuid::Uuid;

type EntityKey = (&'static str, EntityId);

/// Object-safe view of a managed entity.
trait Managed: Any {
    fn as_any(&self) -> &dyn Any;
    fn forget_owner(&mut self, owner: &'static str, owner_id: EntityId);
}

impl<T: Entity> Managed for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn forget_owner(&mut self, owner: &'static str, owner_id: EntityId) {
        self.forget_inverse_member(owner, owner_id);
    }
}

#[derive(Default)]
struct Tracking {
    managed: HashMap<EntityKey, Box<dyn Managed>>,
    removed: HashSet<EntityKey>,
}

pub struct UnitOfWork<'conn> {
    id: Uuid,
    tx: Transaction<'conn>,
    tracking: RefCell<Tracking>,
    statements: Cell<u64>,
    started_at: Instant,
}

impl<'conn> UnitOfWork<'conn> {
    pub(crate) fn begin(conn: &'conn Connection) -> RepoResult<Self> {
        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Deferred)?;
        let id = Uuid::new_v4();
        debug!("event=uow_begin module=uow status=ok uow_id={id}");
        Ok(Self {
            id,
            tx,
            tracking: RefCell::new(Tracking::default()),
            statements: Cell::new(0),
            started_at: Instant::now(),
        })
    }

    /// Correlation id used in log events.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Statements sent to storage so far in this unit of work.
    pub fn statement_count(&self) -> u64 {
        self.statements.get()
    }

    /// Raw connection inside the ambient transaction.
    pub fn connection(&self) -> &Connection {
        &self.tx
    }

    /// Detaches every managed entity and forgets removals.
    ///
    /// This is the explicit refresh callers need after bulk updates.
    pub fn clear(&self) {
        let mut tracking = self.tracking.borrow_mut();
        let detached = tracking.managed.len();
        tracking.managed.clear();
        tracking.removed.clear();
        debug!(
            "event=uow_clear module=uow status=ok uow_id={} detached={}",
            self.id, detached
        );
    }

    pub fn is_managed<T: Entity>(&self, id: EntityId) -> bool {
        self.tracking.borrow().managed.contains_key(&(T::NAME, id))
    }

    /// Number of managed copies of the entity named `entity`.
    pub fn managed_count(&self, entity: &str) -> usize {
        self.tracking
            .borrow()
            .managed
            .keys()
            .filter(|(name, _)| *name == entity)
            .count()
    }

    pub fn commit(self) -> RepoResult<()> {
        let statements = self.statements.get();
        self.tx.commit()?;
        info!(
            "event=uow_commit module=uow status=ok uow_id={} statements={} duration_ms={}",
            self.id,
            statements,
            self.started_at.elapsed().as_millis()
        );
        Ok(())
    }

    pub fn rollback(self) -> RepoResult<()> {
        let statements = self.statements.get();
        self.tx.rollback()?;
        info!(
            "event=uow_rollback module=uow status=ok uow_id={} statements={} duration_ms={}",
            self.id,
            statements,
            self.started_at.elapsed().as_millis()
        );
        Ok(())
    }

    /// Identity-map aware lookup by id.
    pub(crate) fn find<T: Entity>(&self, id: EntityId) -> RepoResult<Option<T>> {
        if self.is_removed::<T>(id) {
            return Ok(None);
        }
        if let Some(managed) = self.managed::<T>(id) {
            return Ok(Some(managed));
        }

        let mapping = T::mapping();
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1;",
            mapping.select_list(None),
            mapping.table(),
            mapping.id_column()
        );
        let mut rows = self.query_rows(&sql, [id], |row| self.hydrate::<T>(&RowReader::new(row)))?;
        Ok(rows.pop())
    }

    pub(crate) fn execute<P: Params>(&self, sql: &str, params: P) -> RepoResult<usize> {
        self.record_statement(sql);
        Ok(self.tx.execute(sql, params)?)
    }

    pub(crate) fn query_rows<P, R, F>(&self, sql: &str, params: P, mut map: F) -> RepoResult<Vec<R>>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> RepoResult<R>,
    {
        self.record_statement(sql);
        let mut stmt = self.tx.prepare(sql)?;
        let mut rows = stmt.query(params)?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(map(row)?);
        }
        Ok(items)
    }

    pub(crate) fn query_count<P: Params>(&self, sql: &str, params: P) -> RepoResult<u64> {
        self.record_statement(sql);
        let count: i64 = self.tx.query_row(sql, params, |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    pub(crate) fn last_insert_rowid(&self) -> EntityId {
        self.tx.last_insert_rowid()
    }

    /// Returns the managed copy for the row's id, or builds and manages one.
    pub(crate) fn hydrate<T: Entity>(&self, reader: &RowReader<'_, '_>) -> RepoResult<T> {
        let id: EntityId = reader.get(T::mapping().id_column())?;
        if let Some(managed) = self.managed::<T>(id) {
            return Ok(managed);
        }
        let entity = T::from_row(reader)?;
        self.manage(&entity);
        Ok(entity)
    }

    pub(crate) fn managed<T: Entity>(&self, id: EntityId) -> Option<T> {
        self.tracking
            .borrow()
            .managed
            .get(&(T::NAME, id))
            .and_then(|managed| managed.as_any().downcast_ref::<T>())
            .cloned()
    }

    /// Every managed copy of `T`, in no particular order.
    pub(crate) fn managed_of<T: Entity>(&self) -> Vec<T> {
        self.tracking
            .borrow()
            .managed
            .iter()
            .filter(|((name, _), _)| *name == T::NAME)
            .filter_map(|(_, managed)| managed.as_any().downcast_ref::<T>())
            .cloned()
            .collect()
    }

    /// Stores `entity` as the managed copy for its id. Transient entities are ignored.
    pub(crate) fn manage<T: Entity>(&self, entity: &T) {
        if let Some(id) = entity.id() {
            self.tracking
                .borrow_mut()
                .managed
                .insert((T::NAME, id), Box::new(entity.clone()));
        }
    }

    /// Forgets the managed copy and drops `id` from the inverse sets of
    /// every managed target of `T`'s foreign keys.
    pub(crate) fn mark_removed<T: Entity>(&self, id: EntityId) {
        let mut tracking = self.tracking.borrow_mut();
        tracking.managed.remove(&(T::NAME, id));
        tracking.removed.insert((T::NAME, id));

        let targets: Vec<&'static str> = T::mapping()
            .columns()
            .iter()
            .filter_map(|column| match column.role {
                ColumnRole::ForeignKey { target } => Some(target),
                _ => None,
            })
            .collect();
        if targets.is_empty() {
            return;
        }
        for ((name, _), managed) in tracking.managed.iter_mut() {
            if targets.contains(name) {
                managed.forget_owner(T::NAME, id);
            }
        }
    }

    pub(crate) fn is_removed<T: Entity>(&self, id: EntityId) -> bool {
        self.tracking.borrow().removed.contains(&(T::NAME, id))
    }

    fn record_statement(&self, sql: &str) {
        let sequence = self.statements.get() + 1;
        self.statements.set(sequence);
        debug!(
            "event=sql module=uow status=start uow_id={} seq={} sql={}",
            self.id,
            sequence,
            sql.split_whitespace().collect::<Vec<_>>().join(" ")
        );
    }
}
