//! Roster domain model: teams, their members and read projections.
//!
//! # Responsibility
//! - Define the entities persisted by roster core and their mappings.
//! - Provide the registry that derives the roster schema.
//!
//! # Invariants
//! - `Team` is registered before `Member`, which owns the foreign key.
//! - Entity `Debug` output never follows associations.

pub mod dto;
pub mod member;
pub mod team;

pub use dto::MemberDto;
pub use member::Member;
pub use team::Team;

use crate::mapping::{EntityRegistry, RegistryError};

/// Registry with every roster entity, in creation order.
pub fn roster_registry() -> Result<EntityRegistry, RegistryError> {
    let mut registry = EntityRegistry::new();
    registry.register::<Team>()?.register::<Member>()?;
    Ok(registry)
}
