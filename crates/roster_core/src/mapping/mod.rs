//! Explicit entity mapping metadata.
//!
//! # Responsibility
//! - Describe how entity fields map to tables and columns.
//! - Hydrate entities from result rows without reflection.
//!
//! # Invariants
//! - Mappings are built once at startup and never mutated afterwards.
//! - Every entity has exactly one generated integer identifier column.

pub mod audit;
pub mod entity;
pub mod registry;

pub use audit::AuditFields;
pub use entity::{Entity, EntityId, RowReader};
pub use registry::{
    ColumnMapping, ColumnRole, ColumnType, EntityMapping, EntityRegistry, RegistryError,
    ResolvedField,
};
