//! Derived queries built from predicate chains.
//!
//! `Criteria::field("username").equals("AAA").and("age").greater_than(15)`
//! resolves to `username = ? AND age > ?` against the entity mapping.
//! `AND` binds tighter than `OR`, exactly as in SQL, because the clauses are
//! emitted in order without extra grouping.

use crate::mapping::EntityMapping;
use crate::query::{json_array, IntoValue, SqlFragment};
use crate::repo::{RepoError, RepoResult};
use rusqlite::types::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    In,
}

impl Operator {
    fn sql(self) -> &'static str {
        match self {
            Self::Equals => "=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
            Self::In => "IN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connector {
    And,
    Or,
}

impl Connector {
    fn sql(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Single(Value),
    Set(Vec<Value>),
}

/// One `field <op> operand` comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: String,
    pub operator: Operator,
    pub operand: Operand,
}

/// An ordered chain of predicates joined by connectors.
#[derive(Debug, Clone, PartialEq)]
pub struct Criteria {
    head: Predicate,
    tail: Vec<(Connector, Predicate)>,
}

impl Criteria {
    /// Starts a chain with a predicate on `field`.
    pub fn field(field: impl Into<String>) -> PredicateBuilder {
        PredicateBuilder {
            prefix: None,
            field: field.into(),
        }
    }

    pub fn and(self, field: impl Into<String>) -> PredicateBuilder {
        PredicateBuilder {
            prefix: Some((self, Connector::And)),
            field: field.into(),
        }
    }

    pub fn or(self, field: impl Into<String>) -> PredicateBuilder {
        PredicateBuilder {
            prefix: Some((self, Connector::Or)),
            field: field.into(),
        }
    }

    /// Predicates in declaration order.
    pub fn predicates(&self) -> impl Iterator<Item = &Predicate> {
        std::iter::once(&self.head).chain(self.tail.iter().map(|(_, predicate)| predicate))
    }

    /// Renders the chain as a `WHERE` body against `mapping`.
    ///
    /// With an alias, columns are qualified as `<alias>.<column>`.
    pub fn to_sql(&self, mapping: &EntityMapping, alias: Option<&str>) -> RepoResult<SqlFragment> {
        let mut fragment = SqlFragment::default();
        render_predicate(&self.head, mapping, alias, &mut fragment)?;
        for (connector, predicate) in &self.tail {
            fragment.sql.push(' ');
            fragment.sql.push_str(connector.sql());
            fragment.sql.push(' ');
            render_predicate(predicate, mapping, alias, &mut fragment)?;
        }
        Ok(fragment)
    }
}

/// Pending predicate waiting for its operator.
#[derive(Debug, Clone)]
pub struct PredicateBuilder {
    prefix: Option<(Criteria, Connector)>,
    field: String,
}

impl PredicateBuilder {
    pub fn equals(self, value: impl IntoValue) -> Criteria {
        self.single(Operator::Equals, value)
    }

    pub fn greater_than(self, value: impl IntoValue) -> Criteria {
        self.single(Operator::GreaterThan, value)
    }

    pub fn greater_than_or_equal(self, value: impl IntoValue) -> Criteria {
        self.single(Operator::GreaterThanOrEqual, value)
    }

    pub fn less_than(self, value: impl IntoValue) -> Criteria {
        self.single(Operator::LessThan, value)
    }

    pub fn less_than_or_equal(self, value: impl IntoValue) -> Criteria {
        self.single(Operator::LessThanOrEqual, value)
    }

    /// Membership test; an empty set matches nothing.
    pub fn in_set<I, V>(self, values: I) -> Criteria
    where
        I: IntoIterator<Item = V>,
        V: IntoValue,
    {
        let values = values.into_iter().map(IntoValue::into_value).collect();
        self.finish(Operator::In, Operand::Set(values))
    }

    fn single(self, operator: Operator, value: impl IntoValue) -> Criteria {
        self.finish(operator, Operand::Single(value.into_value()))
    }

    fn finish(self, operator: Operator, operand: Operand) -> Criteria {
        let predicate = Predicate {
            field: self.field,
            operator,
            operand,
        };
        match self.prefix {
            None => Criteria {
                head: predicate,
                tail: Vec::new(),
            },
            Some((mut criteria, connector)) => {
                criteria.tail.push((connector, predicate));
                criteria
            }
        }
    }
}

fn render_predicate(
    predicate: &Predicate,
    mapping: &EntityMapping,
    alias: Option<&str>,
    fragment: &mut SqlFragment,
) -> RepoResult<()> {
    let resolved =
        mapping
            .resolve_field(&predicate.field)
            .ok_or_else(|| RepoError::UnknownField {
                entity: mapping.entity(),
                field: predicate.field.clone(),
            })?;
    let column = match alias {
        Some(alias) => format!("{alias}.{}", resolved.column),
        None => resolved.column.to_string(),
    };

    match &predicate.operand {
        Operand::Single(value) => {
            fragment
                .sql
                .push_str(&format!("{column} {} ?", predicate.operator.sql()));
            fragment.params.push(value.clone());
        }
        Operand::Set(values) => {
            if predicate.operator != Operator::In {
                return Err(RepoError::UnsupportedOperation(format!(
                    "operator `{}` does not accept a value set",
                    predicate.operator.sql()
                )));
            }
            fragment
                .sql
                .push_str(&format!("{column} IN (SELECT value FROM json_each(?))"));
            fragment.params.push(json_array(values)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::Criteria;
    use crate::mapping::Entity;
    use crate::model::Member;
    use crate::repo::RepoError;
    use rusqlite::types::Value;

    #[test]
    fn chain_renders_in_declaration_order() {
        let criteria = Criteria::field("username")
            .equals("AAA")
            .and("age")
            .greater_than(15);
        let fragment = criteria.to_sql(Member::mapping(), None).unwrap();
        assert_eq!(fragment.sql, "username = ? AND age > ?");
        assert_eq!(
            fragment.params,
            vec![Value::Text("AAA".to_string()), Value::Integer(15)]
        );
    }

    #[test]
    fn sql_text_ignores_argument_values() {
        let first = Criteria::field("username")
            .in_set(["a", "b", "c"])
            .or("age")
            .less_than_or_equal(3)
            .to_sql(Member::mapping(), Some("m"))
            .unwrap();
        let second = Criteria::field("username")
            .in_set(Vec::<&str>::new())
            .or("age")
            .less_than_or_equal(99)
            .to_sql(Member::mapping(), Some("m"))
            .unwrap();
        assert_eq!(first.sql, second.sql);
        assert_eq!(
            first.sql,
            "m.username IN (SELECT value FROM json_each(?)) OR m.age <= ?"
        );
        assert_eq!(second.params[0], Value::Text("[]".to_string()));
    }

    #[test]
    fn identifier_field_resolves_to_id_column() {
        let fragment = Criteria::field("id")
            .greater_than_or_equal(2)
            .to_sql(Member::mapping(), None)
            .unwrap();
        assert_eq!(fragment.sql, "member_id >= ?");
    }

    #[test]
    fn unknown_field_is_rejected() {
        let err = Criteria::field("nickname")
            .equals("x")
            .to_sql(Member::mapping(), None)
            .unwrap_err();
        assert!(matches!(
            err,
            RepoError::UnknownField { entity: "Member", ref field } if field == "nickname"
        ));
    }
}
