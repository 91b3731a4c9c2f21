//! To-one associations, their inverse collections and fetch joins.
//!
//! # Responsibility
//! - Hold an association as an id reference that loads on first access.
//! - Keep the owning foreign key and the inverse id set consistent inside
//!   one unit of work (`link` / `unlink`).
//! - Load owners with their association in one joined statement.
//!
//! # Invariants
//! - A loaded `ToOne` never issues another statement.
//! - Both sides of a link are persisted entities.
//! - Inverse sets reflect managed in-memory links, not only stored rows.

use crate::mapping::{Entity, EntityId, RowReader};
use crate::query::Criteria;
use crate::repo::{RepoError, RepoResult};
use crate::uow::UnitOfWork;
use log::debug;
use once_cell::unsync::OnceCell;
use rusqlite::params_from_iter;
use std::collections::BTreeSet;
use std::fmt::{Debug, Formatter};

/// Owning side of a to-one association.
///
/// Starts as a bare id reference when hydrated from a row and caches the
/// target after the first [`ToOne::load`].
#[derive(Clone)]
pub struct ToOne<T> {
    id: Option<EntityId>,
    value: OnceCell<T>,
}

impl<T> Default for ToOne<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> ToOne<T> {
    pub fn empty() -> Self {
        Self {
            id: None,
            value: OnceCell::new(),
        }
    }

    /// Unloaded reference to the target with `id`.
    pub fn reference(id: Option<EntityId>) -> Self {
        Self {
            id,
            value: OnceCell::new(),
        }
    }

    pub fn id(&self) -> Option<EntityId> {
        self.id
    }

    pub fn is_loaded(&self) -> bool {
        self.value.get().is_some()
    }

    /// The target if it was already loaded; never touches storage.
    pub fn get(&self) -> Option<&T> {
        self.value.get()
    }
}

impl<T: Entity> ToOne<T> {
    pub fn loaded(target: T) -> Self {
        Self {
            id: target.id(),
            value: OnceCell::from(target),
        }
    }

    /// Resolves the target through the unit of work on first access.
    ///
    /// # Errors
    /// - `NotFound` when the referenced row no longer exists.
    pub fn load(&self, uow: &UnitOfWork<'_>) -> RepoResult<Option<&T>> {
        let Some(id) = self.id else {
            return Ok(None);
        };
        let target = self.value.get_or_try_init(|| {
            debug!(
                "event=association_load module=relation status=start uow_id={} target={} id={}",
                uow.id(),
                T::NAME,
                id
            );
            uow.find::<T>(id)?
                .ok_or(RepoError::NotFound { entity: T::NAME, id })
        })?;
        Ok(Some(target))
    }
}

impl<T> PartialEq for ToOne<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Debug for ToOne<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToOne")
            .field("id", &self.id)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

/// Inverse side of a to-one association: ids of the owners pointing here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InverseSet {
    ids: Option<BTreeSet<EntityId>>,
}

impl InverseSet {
    /// Not resolved yet; see [`load_inverse`].
    pub fn unloaded() -> Self {
        Self { ids: None }
    }

    /// Resolved and empty, as for a freshly created target.
    pub fn empty() -> Self {
        Self {
            ids: Some(BTreeSet::new()),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.ids.is_some()
    }

    pub fn ids(&self) -> Option<&BTreeSet<EntityId>> {
        self.ids.as_ref()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.ids.as_ref().is_some_and(|ids| ids.contains(&id))
    }

    fn insert(&mut self, id: EntityId) {
        if let Some(ids) = self.ids.as_mut() {
            ids.insert(id);
        }
    }

    pub(crate) fn remove(&mut self, id: EntityId) {
        if let Some(ids) = self.ids.as_mut() {
            ids.remove(&id);
        }
    }
}

/// Entity owning a foreign key to `T`.
pub trait OwnsToOne<T: Entity>: Entity {
    fn to_one(&self) -> &ToOne<T>;
    fn to_one_mut(&mut self) -> &mut ToOne<T>;
}

/// Entity holding the inverse collection of `O`'s association.
pub trait InverseOf<O: Entity>: Entity {
    fn inverse(&self) -> &InverseSet;
    fn inverse_mut(&mut self) -> &mut InverseSet;
}

/// Resolves `target`'s inverse set if it is not loaded yet.
///
/// Stored rows are merged with managed owners, so links made earlier in the
/// unit of work are visible before they are saved. The loaded set is written
/// through to the managed copy of `target`.
pub fn load_inverse<'t, O, T>(
    uow: &UnitOfWork<'_>,
    target: &'t mut T,
) -> RepoResult<&'t BTreeSet<EntityId>>
where
    O: OwnsToOne<T>,
    T: InverseOf<O>,
{
    if !target.inverse().is_loaded() {
        let target_id = target.id().ok_or(RepoError::TransientEntity(T::NAME))?;
        let owner_mapping = O::mapping();
        let foreign_key =
            owner_mapping
                .foreign_key_to(T::NAME)
                .ok_or(RepoError::UnknownAssociation {
                    owner: O::NAME,
                    target: T::NAME,
                })?;
        let sql = format!(
            "SELECT {id} FROM {table} WHERE {fk} = ?1 ORDER BY {id} ASC;",
            id = owner_mapping.id_column(),
            table = owner_mapping.table(),
            fk = foreign_key.column
        );
        let stored = uow.query_rows(&sql, [target_id], |row| Ok(row.get::<_, EntityId>(0)?))?;

        let managed = uow.managed_of::<O>();
        let mut ids: BTreeSet<EntityId> = stored
            .into_iter()
            .filter(|owner_id| {
                !uow.is_removed::<O>(*owner_id)
                    && managed
                        .iter()
                        .find(|owner| owner.id() == Some(*owner_id))
                        .map_or(true, |owner| owner.to_one().id() == Some(target_id))
            })
            .collect();
        ids.extend(
            managed
                .iter()
                .filter(|owner| owner.to_one().id() == Some(target_id))
                .filter_map(|owner| owner.id()),
        );
        target.inverse_mut().ids = Some(ids);
        uow.manage(target);
    }
    // Loaded above when it was not.
    Ok(target.inverse().ids().map_or(&EMPTY_IDS, |ids| ids))
}

static EMPTY_IDS: BTreeSet<EntityId> = BTreeSet::new();

/// Points `owner` at `target`, moving it out of its previous target's
/// inverse set. Call `save` on the owner to persist the foreign key.
///
/// # Errors
/// - `TransientEntity` when either side has no id yet.
pub fn link<O, T>(uow: &UnitOfWork<'_>, owner: &mut O, target: &mut T) -> RepoResult<()>
where
    O: OwnsToOne<T>,
    T: InverseOf<O>,
{
    let owner_id = owner.id().ok_or(RepoError::TransientEntity(O::NAME))?;
    let target_id = target.id().ok_or(RepoError::TransientEntity(T::NAME))?;

    let previous = owner.to_one().id();
    if let Some(previous_id) = previous.filter(|previous_id| *previous_id != target_id) {
        if let Some(mut previous_target) = uow.managed::<T>(previous_id) {
            previous_target.inverse_mut().remove(owner_id);
            uow.manage(&previous_target);
        }
    }

    load_inverse::<O, T>(uow, target)?;
    target.inverse_mut().insert(owner_id);
    *owner.to_one_mut() = ToOne::loaded(target.clone());
    uow.manage(target);
    uow.manage(owner);

    debug!(
        "event=association_link module=relation status=ok uow_id={} owner={}:{} target={}:{} previous={:?}",
        uow.id(),
        O::NAME,
        owner_id,
        T::NAME,
        target_id,
        previous
    );
    Ok(())
}

/// Clears `owner`'s association if it points at `target`.
///
/// Returns whether anything changed.
pub fn unlink<O, T>(uow: &UnitOfWork<'_>, owner: &mut O, target: &mut T) -> RepoResult<bool>
where
    O: OwnsToOne<T>,
    T: InverseOf<O>,
{
    let owner_id = owner.id().ok_or(RepoError::TransientEntity(O::NAME))?;
    let target_id = target.id().ok_or(RepoError::TransientEntity(T::NAME))?;
    if owner.to_one().id() != Some(target_id) {
        return Ok(false);
    }

    load_inverse::<O, T>(uow, target)?;
    target.inverse_mut().remove(owner_id);
    *owner.to_one_mut() = ToOne::empty();
    uow.manage(target);
    uow.manage(owner);

    debug!(
        "event=association_unlink module=relation status=ok uow_id={} owner={}:{} target={}:{}",
        uow.id(),
        O::NAME,
        owner_id,
        T::NAME,
        target_id
    );
    Ok(true)
}

/// Loads owners matching `criteria` with their `T` association in one
/// `LEFT JOIN`, ordered by owner id.
pub fn fetch_join<O, T>(uow: &UnitOfWork<'_>, criteria: Option<&Criteria>) -> RepoResult<Vec<O>>
where
    O: OwnsToOne<T>,
    T: Entity,
{
    let owner_mapping = O::mapping();
    let target_mapping = T::mapping();
    let foreign_key = owner_mapping
        .foreign_key_to(T::NAME)
        .ok_or(RepoError::UnknownAssociation {
            owner: O::NAME,
            target: T::NAME,
        })?;

    let mut sql = format!(
        "SELECT {}, {} FROM {} o LEFT JOIN {} a ON a.{} = o.{}",
        owner_mapping.select_list(Some("o")),
        target_mapping.select_list(Some("a")),
        owner_mapping.table(),
        target_mapping.table(),
        target_mapping.id_column(),
        foreign_key.column
    );
    let mut params = Vec::new();
    if let Some(criteria) = criteria {
        let condition = criteria.to_sql(owner_mapping, Some("o"))?;
        sql.push_str(" WHERE ");
        sql.push_str(&condition.sql);
        params = condition.params;
    }
    sql.push_str(&format!(" ORDER BY o.{} ASC;", owner_mapping.id_column()));

    let target_label = format!("a__{}", target_mapping.id_column());
    uow.query_rows(&sql, params_from_iter(params.iter()), |row| {
        let mut owner = uow.hydrate::<O>(&RowReader::aliased(row, "o"))?;
        let target_id: Option<EntityId> = row.get(target_label.as_str())?;
        if let Some(target_id) = target_id {
            let target = uow.hydrate::<T>(&RowReader::aliased(row, "a"))?;
            if owner.to_one().id() == Some(target_id) {
                *owner.to_one_mut() = ToOne::loaded(target);
            }
        }
        Ok(owner)
    })
}

#[cfg(test)]
mod tests {
    use super::{InverseSet, ToOne};
    use crate::mapping::Entity;
    use crate::model::Team;

    #[test]
    fn reference_is_not_loaded() {
        let reference = ToOne::<Team>::reference(Some(4));
        assert_eq!(reference.id(), Some(4));
        assert!(!reference.is_loaded());
        assert!(reference.get().is_none());
    }

    #[test]
    fn equality_ignores_load_state() {
        let mut team = Team::new("teamA");
        team.assign_id(4);
        let loaded = ToOne::loaded(team);
        assert!(loaded.is_loaded());
        assert_eq!(loaded, ToOne::reference(Some(4)));
        assert_eq!(format!("{loaded:?}"), "ToOne { id: Some(4), loaded: true }");
    }

    #[test]
    fn inverse_set_ignores_changes_until_loaded() {
        let mut unloaded = InverseSet::unloaded();
        unloaded.insert(1);
        assert!(!unloaded.is_loaded());
        assert!(!unloaded.contains(1));

        let mut loaded = InverseSet::empty();
        loaded.insert(1);
        assert!(loaded.contains(1));
        loaded.remove(1);
        assert_eq!(loaded.ids().map(|ids| ids.len()), Some(0));
    }
}
