//! Member entity: the audited owning side of the team association.
//!
//! # Responsibility
//! - Map members to the `member` table, including `team_id`.
//! - Carry created/updated timestamps through `AuditFields`.

use crate::mapping::{
    AuditFields, ColumnMapping, ColumnType, Entity, EntityId, EntityMapping, RowReader,
};
use crate::model::Team;
use crate::relation::{OwnsToOne, ToOne};
use crate::repo::RepoResult;
use once_cell::sync::Lazy;
use rusqlite::types::Value;

static MEMBER_MAPPING: Lazy<EntityMapping> = Lazy::new(|| {
    EntityMapping::new(Member::NAME, "member", "member_id")
        .column(ColumnMapping::new("username", "username", ColumnType::Text))
        .column(ColumnMapping::new("age", "age", ColumnType::Integer))
        .column(ColumnMapping::foreign_key("team", "team_id", Team::NAME))
        .audited()
});

/// A roster member, optionally belonging to one team.
///
/// Team membership changes go through [`crate::relation::link`] so the
/// team's member set stays in step with `team_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    id: Option<EntityId>,
    pub username: String,
    pub age: i32,
    team: ToOne<Team>,
    audit: AuditFields,
}

impl Member {
    pub fn new(username: impl Into<String>, age: i32) -> Self {
        Self {
            id: None,
            username: username.into(),
            age,
            team: ToOne::empty(),
            audit: AuditFields::default(),
        }
    }

    pub fn team(&self) -> &ToOne<Team> {
        &self.team
    }

    pub fn audit_fields(&self) -> &AuditFields {
        &self.audit
    }
}

impl Entity for Member {
    const NAME: &'static str = "Member";

    fn mapping() -> &'static EntityMapping {
        &MEMBER_MAPPING
    }

    fn id(&self) -> Option<EntityId> {
        self.id
    }

    fn assign_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    fn column_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("username", Value::Text(self.username.clone())),
            ("age", Value::Integer(i64::from(self.age))),
            ("team_id", self.team.id().map_or(Value::Null, Value::Integer)),
        ]
    }

    fn from_row(reader: &RowReader<'_, '_>) -> RepoResult<Self> {
        Ok(Self {
            id: Some(reader.get("member_id")?),
            username: reader.get("username")?,
            age: reader.get("age")?,
            team: ToOne::reference(reader.get("team_id")?),
            audit: AuditFields::read(reader)?,
        })
    }

    fn audit(&self) -> Option<&AuditFields> {
        Some(&self.audit)
    }

    fn audit_mut(&mut self) -> Option<&mut AuditFields> {
        Some(&mut self.audit)
    }
}

impl OwnsToOne<Team> for Member {
    fn to_one(&self) -> &ToOne<Team> {
        &self.team
    }

    fn to_one_mut(&mut self) -> &mut ToOne<Team> {
        &mut self.team
    }
}
