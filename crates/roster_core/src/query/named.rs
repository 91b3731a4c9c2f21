//! Explicit queries with `:name` placeholders.
//!
//! # Responsibility
//! - Register named SQL with its declared parameter names.
//! - Bind arguments by name and shape the rows as lists, optionals,
//!   projections, pages, slices or windows.
//!
//! # Invariants
//! - Declared names and placeholders match exactly at registration.
//! - Supplied bindings match exactly at call time; mismatches fail before
//!   any statement runs.
//! - List bindings are bound as one JSON array; write them as
//!   `IN (SELECT value FROM json_each(:name))`.

use crate::mapping::{Entity, RowReader};
use crate::query::page::{order_clause, resolve_total};
use crate::query::{json_array, IntoValue, Page, PageRequest, Slice, PAGE_LIMIT_PARAM, PAGE_OFFSET_PARAM};
use crate::repo::{BindingError, RepoError, RepoResult};
use crate::uow::UnitOfWork;
use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::{ToSql, Value};
use rusqlite::{Connection, Row};
use std::collections::{BTreeMap, BTreeSet};

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r":([A-Za-z_][A-Za-z0-9_]*)").expect("valid placeholder regex"));
static STRING_LITERAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"'(?:[^']|'')*'").expect("valid string literal regex"));

/// Explicit SQL registered under a stable name, e.g. `Member.findByUsername`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedQuery {
    name: String,
    sql: String,
    count_sql: Option<String>,
    placeholders: BTreeSet<String>,
}

impl NamedQuery {
    pub fn new(name: impl Into<String>, sql: impl Into<String>) -> Self {
        let sql = sql.into();
        Self {
            name: name.into(),
            placeholders: placeholders(&sql),
            sql,
            count_sql: None,
        }
    }

    /// Simplified statement returning the total row count for paging.
    pub fn with_count_query(mut self, sql: impl Into<String>) -> Self {
        self.count_sql = Some(sql.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn count_sql(&self) -> Option<&str> {
        self.count_sql.as_deref()
    }

    /// Placeholder names without the leading colon, sorted.
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.placeholders.iter().map(String::as_str)
    }

    /// Every row as a managed entity.
    pub fn fetch_all<T: Entity>(&self, uow: &UnitOfWork<'_>, bindings: &Bindings) -> RepoResult<Vec<T>> {
        self.check(bindings)?;
        run_rows(uow, &self.sql, bindings, &[], |row| {
            uow.hydrate::<T>(&RowReader::new(row))
        })
    }

    /// At most one entity.
    ///
    /// # Errors
    /// - `Multiplicity` when more than one row matches.
    pub fn fetch_optional<T: Entity>(
        &self,
        uow: &UnitOfWork<'_>,
        bindings: &Bindings,
    ) -> RepoResult<Option<T>> {
        let mut rows = self.fetch_all::<T>(uow, bindings)?;
        if rows.len() > 1 {
            return Err(RepoError::Multiplicity {
                query: self.name.clone(),
                rows: rows.len(),
            });
        }
        Ok(rows.pop())
    }

    /// Scalar or DTO projection of every row.
    pub fn fetch_map<R, F>(&self, uow: &UnitOfWork<'_>, bindings: &Bindings, map: F) -> RepoResult<Vec<R>>
    where
        F: FnMut(&Row<'_>) -> RepoResult<R>,
    {
        self.check(bindings)?;
        run_rows(uow, &self.sql, bindings, &[], map)
    }

    /// One page plus the total, counted by the registered count query or by
    /// wrapping the query in `SELECT COUNT(*)`.
    pub fn fetch_page<T: Entity>(
        &self,
        uow: &UnitOfWork<'_>,
        bindings: &Bindings,
        request: &PageRequest,
    ) -> RepoResult<Page<T>> {
        let content = self.fetch_window_rows::<T>(uow, bindings, request, u64::from(request.size()))?;
        let total = match resolve_total(request, content.len()) {
            Some(total) => {
                debug!(
                    "event=page_count module=query status=skipped query={} total={}",
                    self.name, total
                );
                total
            }
            None => self.count(uow, bindings)?,
        };
        Ok(Page::new(content, request, total))
    }

    /// One window plus whether another follows; never counts.
    pub fn fetch_slice<T: Entity>(
        &self,
        uow: &UnitOfWork<'_>,
        bindings: &Bindings,
        request: &PageRequest,
    ) -> RepoResult<Slice<T>> {
        let rows = self.fetch_window_rows::<T>(uow, bindings, request, u64::from(request.size()) + 1)?;
        Ok(Slice::from_overfetched(rows, request))
    }

    /// Exactly the requested window.
    pub fn fetch_window<T: Entity>(
        &self,
        uow: &UnitOfWork<'_>,
        bindings: &Bindings,
        request: &PageRequest,
    ) -> RepoResult<Vec<T>> {
        self.fetch_window_rows(uow, bindings, request, u64::from(request.size()))
    }

    fn fetch_window_rows<T: Entity>(
        &self,
        uow: &UnitOfWork<'_>,
        bindings: &Bindings,
        request: &PageRequest,
        limit: u64,
    ) -> RepoResult<Vec<T>> {
        self.check(bindings)?;
        let order = order_clause(request.sort(), T::mapping(), None)?;
        let sql = format!(
            "SELECT * FROM ({}) {order} LIMIT :{PAGE_LIMIT_PARAM} OFFSET :{PAGE_OFFSET_PARAM};",
            inner_sql(&self.sql)
        );
        let window = [
            (PAGE_LIMIT_PARAM, to_integer(limit)?),
            (PAGE_OFFSET_PARAM, to_integer(request.offset())?),
        ];
        run_rows(uow, &sql, bindings, &window, |row| {
            uow.hydrate::<T>(&RowReader::new(row))
        })
    }

    fn count(&self, uow: &UnitOfWork<'_>, bindings: &Bindings) -> RepoResult<u64> {
        let sql = match &self.count_sql {
            Some(count_sql) => count_sql.clone(),
            None => format!("SELECT COUNT(*) FROM ({});", inner_sql(&self.sql)),
        };
        let named = named_values(&sql, bindings, &[])?;
        let params = as_params(&named);
        uow.query_count(&sql, params.as_slice())
    }

    fn check(&self, bindings: &Bindings) -> RepoResult<()> {
        let supplied: BTreeSet<&str> = bindings.values.keys().map(String::as_str).collect();
        let expected: BTreeSet<&str> = self.placeholders().collect();
        mismatch(&self.name, &expected, &supplied).map_or(Ok(()), |err| Err(err.into()))
    }
}

/// Named queries known to one repository.
#[derive(Debug, Default)]
pub struct QueryRegistry {
    queries: BTreeMap<String, NamedQuery>,
}

impl QueryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `query` after checking `declared` against its placeholders.
    ///
    /// # Errors
    /// - `Binding` when declared names and placeholders differ, or when the
    ///   count query uses a name the main query does not.
    /// - `UnsupportedOperation` for duplicate names or reserved placeholders.
    pub fn register(&mut self, query: NamedQuery, declared: &[&str]) -> RepoResult<&mut Self> {
        if self.queries.contains_key(query.name()) {
            return Err(RepoError::UnsupportedOperation(format!(
                "query `{}` is already registered",
                query.name()
            )));
        }
        if let Some(reserved) = query
            .placeholders()
            .find(|name| *name == PAGE_LIMIT_PARAM || *name == PAGE_OFFSET_PARAM)
        {
            return Err(RepoError::UnsupportedOperation(format!(
                "placeholder `:{reserved}` in query `{}` is reserved for paging",
                query.name()
            )));
        }

        let expected: BTreeSet<&str> = query.placeholders().collect();
        let declared: BTreeSet<&str> = declared.iter().copied().collect();
        if let Some(err) = mismatch(query.name(), &expected, &declared) {
            return Err(err.into());
        }
        if let Some(count_sql) = query.count_sql() {
            let extra: Vec<String> = placeholders(count_sql)
                .into_iter()
                .filter(|name| !expected.contains(name.as_str()))
                .collect();
            if !extra.is_empty() {
                return Err(BindingError {
                    query: format!("{} (count)", query.name()),
                    missing: Vec::new(),
                    unexpected: extra,
                }
                .into());
            }
        }

        self.queries.insert(query.name().to_string(), query);
        Ok(self)
    }

    /// # Errors
    /// - `UnknownQuery` when nothing is registered under `name`.
    pub fn get(&self, name: &str) -> RepoResult<&NamedQuery> {
        self.queries
            .get(name)
            .ok_or_else(|| RepoError::UnknownQuery(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.queries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    /// Prepares every registered statement against `conn`.
    ///
    /// Catches SQL that references unknown tables or columns before the
    /// first call, and confirms SQLite sees the same placeholders.
    pub fn validate(&self, conn: &Connection) -> RepoResult<()> {
        for query in self.queries.values() {
            let statements = std::iter::once(query.sql()).chain(query.count_sql());
            for sql in statements {
                let stmt = conn.prepare(sql)?;
                let prepared: BTreeSet<String> = (1..=stmt.parameter_count())
                    .filter_map(|index| stmt.parameter_name(index))
                    .map(|name| name.trim_start_matches(':').to_string())
                    .collect();
                let parsed = placeholders(sql);
                if prepared != parsed {
                    return Err(BindingError {
                        query: query.name().to_string(),
                        missing: prepared.difference(&parsed).cloned().collect(),
                        unexpected: parsed.difference(&prepared).cloned().collect(),
                    }
                    .into());
                }
            }
        }
        info!(
            "event=query_validate module=query status=ok queries={}",
            self.queries.len()
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Bound {
    Single(Value),
    List(Vec<Value>),
}

/// Arguments for one named-query call, keyed by placeholder name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings {
    values: BTreeMap<String, Bound>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, name: impl Into<String>, value: impl IntoValue) -> Self {
        self.values
            .insert(name.into(), Bound::Single(value.into_value()));
        self
    }

    /// Binds a collection for an `IN (SELECT value FROM json_each(:name))` test.
    pub fn bind_list<I, V>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: IntoValue,
    {
        let values = values.into_iter().map(IntoValue::into_value).collect();
        self.values.insert(name.into(), Bound::List(values));
        self
    }
}

fn placeholders(sql: &str) -> BTreeSet<String> {
    let stripped = STRING_LITERAL_RE.replace_all(sql, "''");
    PLACEHOLDER_RE
        .captures_iter(&stripped)
        .filter_map(|captures| captures.get(1))
        .map(|name| name.as_str().to_string())
        .collect()
}

fn mismatch(query: &str, expected: &BTreeSet<&str>, supplied: &BTreeSet<&str>) -> Option<BindingError> {
    let missing: Vec<String> = expected
        .difference(supplied)
        .map(|name| name.to_string())
        .collect();
    let unexpected: Vec<String> = supplied
        .difference(expected)
        .map(|name| name.to_string())
        .collect();
    if missing.is_empty() && unexpected.is_empty() {
        return None;
    }
    Some(BindingError {
        query: query.to_string(),
        missing,
        unexpected,
    })
}

fn inner_sql(sql: &str) -> &str {
    sql.trim().trim_end_matches(';').trim_end()
}

fn to_integer(value: u64) -> RepoResult<Value> {
    i64::try_from(value)
        .map(Value::Integer)
        .map_err(|_| RepoError::InvalidPageRequest(format!("window bound `{value}` is too large")))
}

/// `:name`/value pairs for exactly the placeholders `sql` uses.
fn named_values(
    sql: &str,
    bindings: &Bindings,
    extra: &[(&str, Value)],
) -> RepoResult<Vec<(String, Value)>> {
    let mut named = Vec::new();
    for name in placeholders(sql) {
        let value = match bindings.values.get(&name) {
            Some(Bound::Single(value)) => value.clone(),
            Some(Bound::List(values)) => json_array(values)?,
            None => match extra.iter().find(|(extra_name, _)| *extra_name == name) {
                Some((_, value)) => value.clone(),
                None => {
                    return Err(BindingError {
                        query: sql.to_string(),
                        missing: vec![name],
                        unexpected: Vec::new(),
                    }
                    .into())
                }
            },
        };
        named.push((format!(":{name}"), value));
    }
    Ok(named)
}

fn as_params(named: &[(String, Value)]) -> Vec<(&str, &dyn ToSql)> {
    named
        .iter()
        .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
        .collect()
}

fn run_rows<R, F>(
    uow: &UnitOfWork<'_>,
    sql: &str,
    bindings: &Bindings,
    extra: &[(&str, Value)],
    map: F,
) -> RepoResult<Vec<R>>
where
    F: FnMut(&Row<'_>) -> RepoResult<R>,
{
    let named = named_values(sql, bindings, extra)?;
    let params = as_params(&named);
    uow.query_rows(sql, params.as_slice(), map)
}

#[cfg(test)]
mod tests {
    use super::{placeholders, Bindings, NamedQuery, QueryRegistry};
    use crate::repo::RepoError;

    #[test]
    fn placeholders_skip_string_literals() {
        let found = placeholders(
            "SELECT * FROM member WHERE username = :username AND note <> ':ignored' AND age > :age",
        );
        let found: Vec<&str> = found.iter().map(String::as_str).collect();
        assert_eq!(found, vec!["age", "username"]);
    }

    #[test]
    fn register_rejects_undeclared_placeholder() {
        let mut registry = QueryRegistry::new();
        let err = registry
            .register(
                NamedQuery::new("Member.findUser", "SELECT * FROM member WHERE username = :username AND age = :age"),
                &["username"],
            )
            .unwrap_err();
        match err {
            RepoError::Binding(binding) => {
                assert_eq!(binding.missing, vec!["age".to_string()]);
                assert!(binding.unexpected.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn register_rejects_declared_name_without_placeholder() {
        let mut registry = QueryRegistry::new();
        let err = registry
            .register(
                NamedQuery::new("Member.all", "SELECT * FROM member"),
                &["username"],
            )
            .unwrap_err();
        assert!(matches!(err, RepoError::Binding(ref binding) if binding.unexpected == vec!["username".to_string()]));
    }

    #[test]
    fn register_rejects_reserved_and_duplicate_names() {
        let mut registry = QueryRegistry::new();
        assert!(matches!(
            registry.register(
                NamedQuery::new("bad", "SELECT * FROM member LIMIT :page_limit"),
                &["page_limit"],
            ),
            Err(RepoError::UnsupportedOperation(_))
        ));

        registry
            .register(NamedQuery::new("ok", "SELECT * FROM member"), &[])
            .unwrap();
        assert!(matches!(
            registry.register(NamedQuery::new("ok", "SELECT * FROM member"), &[]),
            Err(RepoError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn count_query_may_not_add_names() {
        let mut registry = QueryRegistry::new();
        let query = NamedQuery::new("q", "SELECT * FROM member WHERE age = :age")
            .with_count_query("SELECT COUNT(*) FROM member WHERE username = :username");
        assert!(matches!(
            registry.register(query, &["age"]),
            Err(RepoError::Binding(_))
        ));
    }

    #[test]
    fn unknown_query_lookup_fails() {
        let registry = QueryRegistry::new();
        assert!(matches!(
            registry.get("Member.nothing"),
            Err(RepoError::UnknownQuery(ref name)) if name == "Member.nothing"
        ));
    }

    #[test]
    fn call_time_check_reports_both_sides() {
        let query = NamedQuery::new("q", "SELECT * FROM member WHERE age = :age");
        let err = query
            .check(&Bindings::new().bind("username", "a"))
            .unwrap_err();
        match err {
            RepoError::Binding(binding) => {
                assert_eq!(binding.missing, vec!["age".to_string()]);
                assert_eq!(binding.unexpected, vec!["username".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
