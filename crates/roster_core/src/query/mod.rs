//! Query construction: derived criteria, named queries, paging and bulk updates.
//!
//! # Responsibility
//! - Turn predicate chains and named SQL into parameterized statements.
//! - Shape results as lists, optionals, pages, slices or windows.
//!
//! # Invariants
//! - Generated SQL text depends only on the query shape, never on argument values.
//! - Values are always bound as parameters, never spliced into SQL.

pub mod bulk;
pub mod criteria;
pub mod named;
pub mod page;

pub use bulk::{Assignment, BulkUpdate};
pub use criteria::{Connector, Criteria, Operand, Operator, Predicate, PredicateBuilder};
pub use named::{Bindings, NamedQuery, QueryRegistry};
pub use page::{Direction, Page, PageRequest, Slice, Sort};

use crate::repo::{RepoError, RepoResult};
use rusqlite::types::Value;

/// Placeholder names reserved for paging windows appended to named queries.
pub(crate) const PAGE_LIMIT_PARAM: &str = "page_limit";
pub(crate) const PAGE_OFFSET_PARAM: &str = "page_offset";

/// Conversion of caller arguments into SQLite values.
pub trait IntoValue {
    fn into_value(self) -> Value;
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

impl IntoValue for &str {
    fn into_value(self) -> Value {
        Value::Text(self.to_string())
    }
}

impl IntoValue for String {
    fn into_value(self) -> Value {
        Value::Text(self)
    }
}

impl IntoValue for &String {
    fn into_value(self) -> Value {
        Value::Text(self.clone())
    }
}

impl IntoValue for i64 {
    fn into_value(self) -> Value {
        Value::Integer(self)
    }
}

impl IntoValue for i32 {
    fn into_value(self) -> Value {
        Value::Integer(i64::from(self))
    }
}

impl IntoValue for u32 {
    fn into_value(self) -> Value {
        Value::Integer(i64::from(self))
    }
}

impl IntoValue for bool {
    fn into_value(self) -> Value {
        Value::Integer(i64::from(self))
    }
}

impl IntoValue for f64 {
    fn into_value(self) -> Value {
        Value::Real(self)
    }
}

impl<T: IntoValue> IntoValue for Option<T> {
    fn into_value(self) -> Value {
        self.map_or(Value::Null, IntoValue::into_value)
    }
}

/// Encodes a value list as one JSON array text parameter for `json_each`.
pub(crate) fn json_array(values: &[Value]) -> RepoResult<Value> {
    let items = values
        .iter()
        .map(|value| match value {
            Value::Null => Ok(serde_json::Value::Null),
            Value::Integer(number) => Ok(serde_json::Value::from(*number)),
            Value::Real(number) => serde_json::Number::from_f64(*number)
                .map(serde_json::Value::Number)
                .ok_or_else(|| {
                    RepoError::UnsupportedOperation(format!(
                        "non-finite number `{number}` in value list"
                    ))
                }),
            Value::Text(text) => Ok(serde_json::Value::String(text.clone())),
            Value::Blob(_) => Err(RepoError::UnsupportedOperation(
                "blob values cannot be bound in a value list".to_string(),
            )),
        })
        .collect::<RepoResult<Vec<_>>>()?;
    Ok(Value::Text(serde_json::Value::Array(items).to_string()))
}

/// SQL text plus its positional parameters, in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlFragment {
    pub sql: String,
    pub params: Vec<Value>,
}
