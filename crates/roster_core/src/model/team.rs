//! Team entity and its member collection.
//!
//! # Invariants
//! - `members` mirrors `member.team_id` for every managed member.

use crate::mapping::{ColumnMapping, ColumnType, Entity, EntityId, EntityMapping, RowReader};
use crate::model::Member;
use crate::relation::{InverseOf, InverseSet};
use crate::repo::RepoResult;
use once_cell::sync::Lazy;
use rusqlite::types::Value;

static TEAM_MAPPING: Lazy<EntityMapping> = Lazy::new(|| {
    EntityMapping::new(Team::NAME, "team", "team_id")
        .column(ColumnMapping::new("name", "name", ColumnType::Text))
});

/// A named group of members.
#[derive(Debug, Clone)]
pub struct Team {
    id: Option<EntityId>,
    pub name: String,
    members: InverseSet,
}

impl Team {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            members: InverseSet::empty(),
        }
    }

    /// Ids of members pointing at this team; unloaded after hydration.
    pub fn members(&self) -> &InverseSet {
        &self.members
    }
}

impl PartialEq for Team {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.name == other.name
    }
}

impl Entity for Team {
    const NAME: &'static str = "Team";

    fn mapping() -> &'static EntityMapping {
        &TEAM_MAPPING
    }

    fn id(&self) -> Option<EntityId> {
        self.id
    }

    fn assign_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    fn column_values(&self) -> Vec<(&'static str, Value)> {
        vec![("name", Value::Text(self.name.clone()))]
    }

    fn from_row(reader: &RowReader<'_, '_>) -> RepoResult<Self> {
        Ok(Self {
            id: Some(reader.get("team_id")?),
            name: reader.get("name")?,
            members: InverseSet::unloaded(),
        })
    }

    fn forget_inverse_member(&mut self, owner: &'static str, owner_id: EntityId) {
        if owner == Member::NAME {
            self.members.remove(owner_id);
        }
    }
}

impl InverseOf<Member> for Team {
    fn inverse(&self) -> &InverseSet {
        &self.members
    }

    fn inverse_mut(&mut self) -> &mut InverseSet {
        &mut self.members
    }
}
