//! Entity mapping tables and the registry that derives the schema from them.

use crate::mapping::entity::{column_label, Entity};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Column name for the immutable creation timestamp of audited entities.
pub const CREATED_DATE_COLUMN: &str = "created_date";
/// Column name for the last-persist timestamp of audited entities.
pub const UPDATED_DATE_COLUMN: &str = "updated_date";

/// Storage type of a mapped column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    /// Epoch milliseconds stored as `INTEGER`.
    Timestamp,
}

impl ColumnType {
    fn sql_type(self) -> &'static str {
        match self {
            Self::Integer | Self::Timestamp => "INTEGER",
            Self::Real => "REAL",
            Self::Text => "TEXT",
        }
    }
}

/// What a column carries besides its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRole {
    Data,
    /// Owning side of a to-one association; holds the target's id.
    ForeignKey { target: &'static str },
    CreatedAt,
    UpdatedAt,
}

/// Mapping of one entity field to one table column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    pub field: &'static str,
    pub column: &'static str,
    pub column_type: ColumnType,
    pub nullable: bool,
    /// `false` keeps the column out of every `UPDATE`.
    pub updatable: bool,
    pub role: ColumnRole,
}

impl ColumnMapping {
    pub fn new(field: &'static str, column: &'static str, column_type: ColumnType) -> Self {
        Self {
            field,
            column,
            column_type,
            nullable: false,
            updatable: true,
            role: ColumnRole::Data,
        }
    }

    /// Nullable integer column referencing `target`'s id.
    pub fn foreign_key(field: &'static str, column: &'static str, target: &'static str) -> Self {
        Self {
            field,
            column,
            column_type: ColumnType::Integer,
            nullable: true,
            updatable: true,
            role: ColumnRole::ForeignKey { target },
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.updatable = false;
        self
    }
}

/// A field reference resolved against a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedField {
    pub column: &'static str,
    pub column_type: ColumnType,
    pub updatable: bool,
    pub identifier: bool,
}

/// Table-level mapping for one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityMapping {
    entity: &'static str,
    table: &'static str,
    id_field: &'static str,
    id_column: &'static str,
    columns: Vec<ColumnMapping>,
}

impl EntityMapping {
    /// Starts a mapping whose identifier field is `id`.
    pub fn new(entity: &'static str, table: &'static str, id_column: &'static str) -> Self {
        Self {
            entity,
            table,
            id_field: "id",
            id_column,
            columns: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnMapping) -> Self {
        self.columns.push(column);
        self
    }

    /// Adds the shared created/updated timestamp columns.
    pub fn audited(self) -> Self {
        let mut created = ColumnMapping::new("created_date", CREATED_DATE_COLUMN, ColumnType::Timestamp)
            .nullable()
            .read_only();
        created.role = ColumnRole::CreatedAt;
        let mut updated =
            ColumnMapping::new("updated_date", UPDATED_DATE_COLUMN, ColumnType::Timestamp).nullable();
        updated.role = ColumnRole::UpdatedAt;
        self.column(created).column(updated)
    }

    pub fn entity(&self) -> &'static str {
        self.entity
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    pub fn id_field(&self) -> &'static str {
        self.id_field
    }

    pub fn id_column(&self) -> &'static str {
        self.id_column
    }

    /// Non-identifier columns in declaration order.
    pub fn columns(&self) -> &[ColumnMapping] {
        &self.columns
    }

    pub fn is_audited(&self) -> bool {
        self.columns
            .iter()
            .any(|column| matches!(column.role, ColumnRole::CreatedAt | ColumnRole::UpdatedAt))
    }

    /// Resolves a field name (or the identifier field) to its column.
    pub fn resolve_field(&self, field: &str) -> Option<ResolvedField> {
        if field == self.id_field {
            return Some(ResolvedField {
                column: self.id_column,
                column_type: ColumnType::Integer,
                updatable: false,
                identifier: true,
            });
        }
        self.columns
            .iter()
            .find(|column| column.field == field)
            .map(|column| ResolvedField {
                column: column.column,
                column_type: column.column_type,
                updatable: column.updatable,
                identifier: false,
            })
    }

    /// Foreign-key column pointing at `target`, if this entity owns such an association.
    pub fn foreign_key_to(&self, target: &str) -> Option<&ColumnMapping> {
        self.columns.iter().find(
            |column| matches!(column.role, ColumnRole::ForeignKey { target: t } if t == target),
        )
    }

    /// Comma-separated select list. With an alias, every column is labelled
    /// `<alias>__<column>` so joined rows stay unambiguous.
    pub fn select_list(&self, alias: Option<&str>) -> String {
        std::iter::once(self.id_column)
            .chain(self.columns.iter().map(|column| column.column))
            .map(|column| match alias {
                Some(alias) => format!("{alias}.{column} AS {}", column_label(Some(alias), column)),
                None => column.to_string(),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Errors raised while registering entity mappings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    DuplicateEntity(&'static str),
    DuplicateTable(&'static str),
    DuplicateColumn {
        entity: &'static str,
        column: &'static str,
    },
    /// `Entity::NAME` disagrees with the mapping's entity name.
    NameMismatch {
        declared: &'static str,
        mapped: &'static str,
    },
    /// Foreign key references an entity that is not registered yet.
    UnknownTarget {
        entity: &'static str,
        column: &'static str,
        target: &'static str,
    },
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateEntity(entity) => write!(f, "entity `{entity}` is already registered"),
            Self::DuplicateTable(table) => write!(f, "table `{table}` is already mapped"),
            Self::DuplicateColumn { entity, column } => {
                write!(f, "entity `{entity}` maps column `{column}` more than once")
            }
            Self::NameMismatch { declared, mapped } => write!(
                f,
                "entity declares name `{declared}` but its mapping is named `{mapped}`"
            ),
            Self::UnknownTarget {
                entity,
                column,
                target,
            } => write!(
                f,
                "column `{column}` of `{entity}` references unregistered entity `{target}`"
            ),
        }
    }
}

impl Error for RegistryError {}

/// Ordered set of entity mappings known to one store.
///
/// Registration order is creation order, so referenced entities must be
/// registered before the entities that own foreign keys to them.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    mappings: Vec<&'static EntityMapping>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Entity>(&mut self) -> Result<&mut Self, RegistryError> {
        let mapping = T::mapping();
        if mapping.entity() != T::NAME {
            return Err(RegistryError::NameMismatch {
                declared: T::NAME,
                mapped: mapping.entity(),
            });
        }
        if self.mapping(mapping.entity()).is_some() {
            return Err(RegistryError::DuplicateEntity(mapping.entity()));
        }
        if self.mappings.iter().any(|known| known.table() == mapping.table()) {
            return Err(RegistryError::DuplicateTable(mapping.table()));
        }

        let mut seen = vec![mapping.id_column()];
        for column in mapping.columns() {
            if seen.contains(&column.column) {
                return Err(RegistryError::DuplicateColumn {
                    entity: mapping.entity(),
                    column: column.column,
                });
            }
            seen.push(column.column);

            if let ColumnRole::ForeignKey { target } = column.role {
                if target != mapping.entity() && self.mapping(target).is_none() {
                    return Err(RegistryError::UnknownTarget {
                        entity: mapping.entity(),
                        column: column.column,
                        target,
                    });
                }
            }
        }

        self.mappings.push(mapping);
        Ok(self)
    }

    pub fn mapping(&self, entity: &str) -> Option<&'static EntityMapping> {
        self.mappings
            .iter()
            .copied()
            .find(|mapping| mapping.entity() == entity)
    }

    pub fn mappings(&self) -> impl Iterator<Item = &'static EntityMapping> + '_ {
        self.mappings.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// DDL for every registered entity, in registration order.
    pub fn schema_sql(&self) -> Vec<String> {
        let mut statements = Vec::new();
        for mapping in &self.mappings {
            statements.push(self.create_table_sql(mapping));
            for column in mapping.columns() {
                if let ColumnRole::ForeignKey { .. } = column.role {
                    statements.push(format!(
                        "CREATE INDEX IF NOT EXISTS idx_{table}_{column} ON {table}({column});",
                        table = mapping.table(),
                        column = column.column
                    ));
                }
            }
        }
        statements
    }

    fn create_table_sql(&self, mapping: &EntityMapping) -> String {
        let mut definitions = vec![format!(
            "{} INTEGER PRIMARY KEY AUTOINCREMENT",
            mapping.id_column()
        )];
        for column in mapping.columns() {
            let mut definition = format!("{} {}", column.column, column.column_type.sql_type());
            if !column.nullable {
                definition.push_str(" NOT NULL");
            }
            if let ColumnRole::ForeignKey { target } = column.role {
                // register() guarantees the target is known.
                if let Some(target) = self.mapping(target) {
                    definition.push_str(&format!(
                        " REFERENCES {}({})",
                        target.table(),
                        target.id_column()
                    ));
                }
            }
            definitions.push(definition);
        }
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n);",
            mapping.table(),
            definitions.join(",\n    ")
        )
    }
}
