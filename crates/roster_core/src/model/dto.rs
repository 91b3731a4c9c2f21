//! Read projections returned by member queries.

use crate::mapping::{Entity, EntityId};
use crate::model::Member;
use serde::{Deserialize, Serialize};

/// Flat read projection of a member and its team name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberDto {
    pub id: EntityId,
    pub username: String,
    pub team_name: Option<String>,
}

impl MemberDto {
    pub fn new(id: EntityId, username: impl Into<String>, team_name: Option<String>) -> Self {
        Self {
            id,
            username: username.into(),
            team_name,
        }
    }

    /// Projects a persisted member; the team name is present only when the
    /// association is already loaded.
    pub fn from_member(member: &Member) -> Option<Self> {
        Some(Self {
            id: member.id()?,
            username: member.username.clone(),
            team_name: member.team().get().map(|team| team.name.clone()),
        })
    }
}
