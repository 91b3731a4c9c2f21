//! Created/updated timestamps shared by audited entities.

use crate::mapping::entity::RowReader;
use crate::mapping::registry::{ColumnRole, CREATED_DATE_COLUMN, UPDATED_DATE_COLUMN};
use crate::repo::{RepoError, RepoResult};
use chrono::{DateTime, SubsecRound, TimeZone, Utc};
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

/// Lifecycle timestamps embedded in audited entities.
///
/// `created_date` is written once on insert and never updated;
/// `updated_date` is reset by every save. Bulk updates do not touch either.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFields {
    created_date: Option<DateTime<Utc>>,
    updated_date: Option<DateTime<Utc>>,
}

impl AuditFields {
    pub fn created_date(&self) -> Option<DateTime<Utc>> {
        self.created_date
    }

    pub fn updated_date(&self) -> Option<DateTime<Utc>> {
        self.updated_date
    }

    /// Reads both timestamp columns of an audited row.
    pub fn read(reader: &RowReader<'_, '_>) -> RepoResult<Self> {
        Ok(Self {
            created_date: from_millis(reader.get(CREATED_DATE_COLUMN)?)?,
            updated_date: from_millis(reader.get(UPDATED_DATE_COLUMN)?)?,
        })
    }

    pub(crate) fn on_insert(&mut self, now: DateTime<Utc>) {
        self.created_date = Some(now);
        self.updated_date = Some(now);
    }

    pub(crate) fn on_update(&mut self, now: DateTime<Utc>) {
        self.updated_date = Some(now);
    }

    pub(crate) fn column_value(&self, role: ColumnRole) -> Value {
        let stamp = match role {
            ColumnRole::CreatedAt => self.created_date,
            ColumnRole::UpdatedAt => self.updated_date,
            ColumnRole::Data | ColumnRole::ForeignKey { .. } => None,
        };
        stamp.map_or(Value::Null, |value| Value::Integer(value.timestamp_millis()))
    }
}

/// Current time truncated to the millisecond precision the store keeps.
pub(crate) fn audit_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

fn from_millis(value: Option<i64>) -> RepoResult<Option<DateTime<Utc>>> {
    value
        .map(|millis| {
            Utc.timestamp_millis_opt(millis).single().ok_or_else(|| {
                RepoError::InvalidData(format!("timestamp `{millis}` is out of range"))
            })
        })
        .transpose()
}
